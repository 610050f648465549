use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// One frame's source location within a case.
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub path: PathBuf,
    pub case_name: String,
    pub filename: String,
}

/// Flat, case-ordered view over per-case image and ground-truth directories.
///
/// Cases are sorted lexicographically by path and frames within a case by
/// filename. Chronological order therefore relies on zero-padded frame numbers
/// in the filenames; that naming convention is required but not enforced.
///
/// Directory listing happens once at construction. There is no cache
/// invalidation: rebuilding the store is the only way to pick up new files.
#[derive(Debug)]
pub struct FrameStore {
    images: Vec<FrameRef>,
    ground_truths: Vec<FrameRef>,
    case_count: usize,
    frames_per_case: usize,
}

impl FrameStore {
    /// Enumerate `image_dirs` and `gt_dirs` (one directory per case each).
    ///
    /// Fails fast on a malformed corpus: differing case counts, an empty case
    /// directory, an image/ground-truth length mismatch within a case, or
    /// non-uniform frame counts across cases.
    pub fn new(image_dirs: &[PathBuf], gt_dirs: &[PathBuf]) -> Result<Self> {
        if image_dirs.len() != gt_dirs.len() {
            return Err(Error::Configuration(format!(
                "{} image case directories but {} ground-truth case directories",
                image_dirs.len(),
                gt_dirs.len()
            )));
        }
        if image_dirs.is_empty() {
            return Err(Error::Configuration("corpus has no cases".into()));
        }

        let mut image_dirs = image_dirs.to_vec();
        let mut gt_dirs = gt_dirs.to_vec();
        image_dirs.sort();
        gt_dirs.sort();

        let mut images = Vec::new();
        let mut ground_truths = Vec::new();
        let mut frames_per_case = None;

        for (image_dir, gt_dir) in image_dirs.iter().zip(&gt_dirs) {
            let case_name = case_name(image_dir);
            let image_names = list_sorted(image_dir)?;
            let gt_names = list_sorted(gt_dir)?;

            if image_names.is_empty() {
                return Err(Error::Configuration(format!(
                    "case directory {} is empty",
                    image_dir.display()
                )));
            }
            if image_names.len() != gt_names.len() {
                return Err(Error::Configuration(format!(
                    "case {case_name}: {} images but {} ground truths",
                    image_names.len(),
                    gt_names.len()
                )));
            }
            match frames_per_case {
                None => frames_per_case = Some(image_names.len()),
                Some(expected) if expected != image_names.len() => {
                    return Err(Error::Configuration(format!(
                        "case {case_name} has {} frames, expected {expected}; \
                         case frame counts must be uniform",
                        image_names.len()
                    )));
                }
                Some(_) => {}
            }

            for name in image_names {
                images.push(FrameRef {
                    path: image_dir.join(&name),
                    case_name: case_name.clone(),
                    filename: name,
                });
            }
            let gt_case = self::case_name(gt_dir);
            for name in gt_names {
                ground_truths.push(FrameRef {
                    path: gt_dir.join(&name),
                    case_name: gt_case.clone(),
                    filename: name,
                });
            }
        }

        let case_count = image_dirs.len();
        let frames_per_case = frames_per_case.unwrap_or(0);
        tracing::info!(
            cases = case_count,
            frames_per_case,
            "frame store ready"
        );

        Ok(Self {
            images,
            ground_truths,
            case_count,
            frames_per_case,
        })
    }

    pub fn case_count(&self) -> usize {
        self.case_count
    }

    pub fn frames_per_case(&self) -> usize {
        self.frames_per_case
    }

    pub fn total_frames(&self) -> usize {
        self.images.len()
    }

    /// Frame image at flat index `index` (case-major order).
    pub fn image(&self, index: usize) -> &FrameRef {
        &self.images[index]
    }

    /// Ground-truth mask aligned with `image(index)`.
    pub fn ground_truth(&self, index: usize) -> &FrameRef {
        &self.ground_truths[index]
    }
}

fn case_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

fn list_sorted(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| Error::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let file_type = entry.file_type().map_err(|source| Error::Io {
            path: entry.path(),
            source,
        })?;
        if file_type.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
