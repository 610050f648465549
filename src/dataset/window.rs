use super::store::{FrameRef, FrameStore};
use crate::config::{CropRect, WindowSettings, MODEL_SIZE};
use crate::error::{Error, Result};
use crate::labels::PseudoLabelStore;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{s, Array4};
use std::sync::Arc;

/// Black-box augmentation seam, applied after the deterministic crop/resize.
///
/// A frame and its mask are transformed together so that any geometric change
/// uses identical parameters for both.
pub trait Augment: Send + Sync {
    fn apply(&self, image: DynamicImage, mask: DynamicImage) -> (DynamicImage, DynamicImage);
}

/// Default augmentation: none.
pub struct IdentityAugment;

impl Augment for IdentityAugment {
    fn apply(&self, image: DynamicImage, mask: DynamicImage) -> (DynamicImage, DynamicImage) {
        (image, mask)
    }
}

/// One training/inference sample: a stacked window of consecutive frames.
pub struct WindowSample {
    /// `[frame_len, 3, 224, 224]`, normalized to `[0, 1]`.
    pub images: Array4<f32>,
    /// Real ground truth, `[frame_len, 1, 224, 224]`. Used for scoring only.
    pub ground_truths: Array4<f32>,
    /// Training target: the current pseudo-label, falling back to the real
    /// ground truth before the first epoch has persisted one.
    pub positive_labels: Array4<f32>,
    /// Source image filenames, for pseudo-label write-back.
    pub filenames: Vec<String>,
    pub case_name: String,
}

/// Maps a flat sample index to a contiguous window of `frame_len` frames from
/// one case and loads it as stacked numeric arrays.
///
/// Index arithmetic is a two-level mapping: `index / windows_per_case` picks
/// the case and `index % windows_per_case` the window slot within it, so the
/// flat frame offset is `case * frames_per_case + slot * frame_len`. The
/// constructor requires `frames_per_case` to be divisible by `frame_len`;
/// trailing partial windows are rejected rather than read out of range.
pub struct WindowedDataset {
    store: FrameStore,
    labels: Arc<dyn PseudoLabelStore>,
    augment: Box<dyn Augment>,
    frame_len: usize,
    crop: Option<CropRect>,
    windows_per_case: usize,
}

impl std::fmt::Debug for WindowedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedDataset")
            .field("store", &self.store)
            .field("frame_len", &self.frame_len)
            .field("crop", &self.crop)
            .field("windows_per_case", &self.windows_per_case)
            .finish_non_exhaustive()
    }
}

impl WindowedDataset {
    pub fn new(
        store: FrameStore,
        labels: Arc<dyn PseudoLabelStore>,
        settings: WindowSettings,
    ) -> Result<Self> {
        if settings.frame_len == 0 {
            return Err(Error::Configuration("frame_len must be at least 1".into()));
        }
        if store.frames_per_case() % settings.frame_len != 0 {
            return Err(Error::Configuration(format!(
                "frames per case ({}) is not divisible by frame_len ({})",
                store.frames_per_case(),
                settings.frame_len
            )));
        }
        let windows_per_case = store.frames_per_case() / settings.frame_len;
        Ok(Self {
            store,
            labels,
            augment: Box::new(IdentityAugment),
            frame_len: settings.frame_len,
            crop: settings.crop,
            windows_per_case,
        })
    }

    /// Replace the identity augmentation.
    pub fn with_augment(mut self, augment: Box<dyn Augment>) -> Self {
        self.augment = augment;
        self
    }

    /// Number of windows across all cases.
    pub fn len(&self) -> usize {
        self.store.case_count() * self.windows_per_case
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the window at `index`.
    ///
    /// Frame reads are not retried and never skipped; any decode failure
    /// propagates, since silently dropping a frame would desynchronize the
    /// flat index arithmetic.
    pub fn get(&self, index: usize) -> Result<WindowSample> {
        let case = index / self.windows_per_case;
        let slot = index % self.windows_per_case;
        let start = case * self.store.frames_per_case() + slot * self.frame_len;

        let (width, height) = MODEL_SIZE;
        let (w, h) = (width as usize, height as usize);
        let mut images = Array4::<f32>::zeros((self.frame_len, 3, h, w));
        let mut ground_truths = Array4::<f32>::zeros((self.frame_len, 1, h, w));
        let mut positive_labels = Array4::<f32>::zeros((self.frame_len, 1, h, w));
        let mut filenames = Vec::with_capacity(self.frame_len);
        let case_name = self.store.image(start).case_name.clone();

        for i in 0..self.frame_len {
            let image_ref = self.store.image(start + i);
            let gt_ref = self.store.ground_truth(start + i);

            let image = self.geometry(decode(image_ref)?);
            let mask = self.geometry(decode(gt_ref)?);
            let (image, mask) = self.augment.apply(image, mask);

            let rgb = image.to_rgb8();
            let gray = mask.to_luma8();
            for y in 0..h {
                for x in 0..w {
                    let pixel = rgb.get_pixel(x as u32, y as u32);
                    images[[i, 0, y, x]] = pixel[0] as f32 / 255.0;
                    images[[i, 1, y, x]] = pixel[1] as f32 / 255.0;
                    images[[i, 2, y, x]] = pixel[2] as f32 / 255.0;
                    ground_truths[[i, 0, y, x]] =
                        gray.get_pixel(x as u32, y as u32)[0] as f32 / 255.0;
                }
            }

            match self.labels.get(&image_ref.case_name, &image_ref.filename)? {
                Some(pseudo) => {
                    if pseudo.dim() != (h, w) {
                        return Err(Error::Configuration(format!(
                            "pseudo-label for {}/{} has shape {:?}, expected ({h}, {w})",
                            image_ref.case_name,
                            image_ref.filename,
                            pseudo.dim()
                        )));
                    }
                    positive_labels.slice_mut(s![i, 0, .., ..]).assign(&pseudo);
                }
                None => {
                    let fallback = ground_truths.slice(s![i, 0, .., ..]).to_owned();
                    positive_labels.slice_mut(s![i, 0, .., ..]).assign(&fallback);
                }
            }

            filenames.push(image_ref.filename.clone());
        }

        Ok(WindowSample {
            images,
            ground_truths,
            positive_labels,
            filenames,
            case_name,
        })
    }

    /// Crop the known border, then resize to the model input size. Applied to
    /// frames and masks with identical parameters so spatial correspondence
    /// is preserved exactly.
    fn geometry(&self, image: DynamicImage) -> DynamicImage {
        let image = match self.crop {
            Some(rect) => image.crop_imm(rect.left, rect.top, rect.width, rect.height),
            None => image,
        };
        let (width, height) = MODEL_SIZE;
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

fn decode(frame: &FrameRef) -> Result<DynamicImage> {
    image::open(&frame.path).map_err(|source| Error::Decode {
        path: frame.path.clone(),
        source,
    })
}
