use crate::error::{Error, Result};
use image::{GrayImage, ImageFormat};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

/// Keyed storage for pseudo-labels, shared between the dataset (reader) and
/// the self-training loop (writer).
///
/// Writes for one epoch are strictly ordered before the next epoch's reads,
/// so no locking is required beyond write atomicity: a `put` must be fully
/// visible or not at all, never partial.
pub trait PseudoLabelStore: Send + Sync {
    /// Current pseudo-label for `(case, filename)`, or `None` if no epoch has
    /// persisted one yet.
    fn get(&self, case: &str, filename: &str) -> Result<Option<Array2<f32>>>;

    /// Overwrite the pseudo-label for `(case, filename)`. Values are sigmoid
    /// probabilities in `[0, 1]`, not binarized.
    fn put(&self, case: &str, filename: &str, mask: &Array2<f32>) -> Result<()>;
}

/// Filesystem store: one PNG per `(case, filename)` under a root directory
/// kept separate from the ground-truth tree. Labels are overwritten every
/// epoch with no versioning. Writes go through a temp file and an atomic
/// rename so a reader can never observe a half-written label.
pub struct FsLabelStore {
    root: PathBuf,
}

impl FsLabelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Labels are always stored as PNG, whatever the source frame format.
    fn label_path(&self, case: &str, filename: &str) -> PathBuf {
        self.root.join(case).join(filename).with_extension("png")
    }
}

impl PseudoLabelStore for FsLabelStore {
    fn get(&self, case: &str, filename: &str) -> Result<Option<Array2<f32>>> {
        let path = self.label_path(case, filename);
        if !path.exists() {
            return Ok(None);
        }
        let gray = image::open(&path)
            .map_err(|source| Error::Decode {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        let (width, height) = gray.dimensions();
        let mask = Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
            gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0
        });
        Ok(Some(mask))
    }

    fn put(&self, case: &str, filename: &str, mask: &Array2<f32>) -> Result<()> {
        let path = self.label_path(case, filename);
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;

        let (height, width) = mask.dim();
        let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = mask[[y as usize, x as usize]];
            image::Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
        });

        let tmp = path.with_extension("png.tmp");
        image
            .save_with_format(&tmp, ImageFormat::Png)
            .map_err(|source| Error::Encode {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, &path).map_err(|source| Error::Io { path, source })
    }
}

/// In-memory store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryLabelStore {
    masks: Mutex<HashMap<(String, String), Array2<f32>>>,
}

impl PseudoLabelStore for MemoryLabelStore {
    fn get(&self, case: &str, filename: &str) -> Result<Option<Array2<f32>>> {
        let masks = self.masks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(masks.get(&(case.to_string(), filename.to_string())).cloned())
    }

    fn put(&self, case: &str, filename: &str, mask: &Array2<f32>) -> Result<()> {
        let mut masks = self.masks.lock().unwrap_or_else(|e| e.into_inner());
        masks.insert((case.to_string(), filename.to_string()), mask.clone());
        Ok(())
    }
}
