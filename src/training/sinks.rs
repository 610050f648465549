use crate::error::{Error, Result};
use image::{GrayImage, RgbImage};
use ndarray::{Array2, ArrayView2, ArrayView3};
use std::fs;
use std::path::{Path, PathBuf};

/// Fire-and-forget scalar metrics keyed by step (epoch).
pub trait MetricSink {
    fn scalar(&mut self, name: &str, value: f32, step: usize);
}

/// Logs scalars through the tracing subscriber.
pub struct TracingMetrics;

impl MetricSink for TracingMetrics {
    fn scalar(&mut self, name: &str, value: f32, step: usize) {
        tracing::info!(metric = name, value, step, "scalar");
    }
}

/// In-memory recorder, for tests and dry runs.
#[derive(Default)]
pub struct MemoryMetrics {
    pub scalars: Vec<(String, f32, usize)>,
}

impl MemoryMetrics {
    pub fn values_for(&self, name: &str) -> Vec<f32> {
        self.scalars
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|&(_, v, _)| v)
            .collect()
    }
}

impl MetricSink for MemoryMetrics {
    fn scalar(&mut self, name: &str, value: f32, step: usize) {
        self.scalars.push((name.to_string(), value, step));
    }
}

/// A low-IoU sample flagged for inspection.
pub struct OutlierRecord<'a> {
    /// Source frame, `[3, H, W]` in `[0, 1]`.
    pub image: ArrayView3<'a, f32>,
    /// Prediction binarized at the Otsu threshold.
    pub prediction: &'a Array2<u8>,
    /// Real ground truth.
    pub ground_truth: ArrayView2<'a, f32>,
    /// The pseudo-label the sample was trained against this epoch.
    pub pseudo_label: ArrayView2<'a, f32>,
    pub iou: f32,
    pub epoch: usize,
    pub case_name: &'a str,
    pub filename: &'a str,
}

/// Best-effort outlier capture, only invoked in debug mode.
pub trait OutlierSink {
    fn record(&mut self, outlier: &OutlierRecord<'_>) -> Result<()>;
}

/// Writes one PNG panel set per outlier under `<root>/epoch_NNN/<case>/`:
/// the source frame, the binarized prediction, the real ground truth, and
/// the pseudo-label used as the training target.
pub struct FsOutlierSink {
    root: PathBuf,
}

impl FsOutlierSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OutlierSink for FsOutlierSink {
    fn record(&mut self, outlier: &OutlierRecord<'_>) -> Result<()> {
        let dir = self
            .root
            .join(format!("epoch_{:03}", outlier.epoch))
            .join(outlier.case_name);
        fs::create_dir_all(&dir).map_err(|source| Error::Io {
            path: dir.clone(),
            source,
        })?;

        let stem = Path::new(outlier.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| outlier.filename.to_string());

        tracing::debug!(
            epoch = outlier.epoch,
            case = outlier.case_name,
            filename = outlier.filename,
            iou = outlier.iou,
            "capturing outlier"
        );

        save_gray(
            &dir.join(format!("{stem}_pred.png")),
            outlier.prediction.mapv(|v| v as f32).view(),
        )?;
        save_gray(
            &dir.join(format!("{stem}_real_gt.png")),
            outlier.ground_truth,
        )?;
        save_gray(
            &dir.join(format!("{stem}_fake_gt.png")),
            outlier.pseudo_label,
        )?;
        save_rgb(&dir.join(format!("{stem}_image.png")), outlier.image)
    }
}

/// Records (epoch, case, filename, iou) tuples, for tests.
#[derive(Default)]
pub struct MemoryOutliers {
    pub captures: Vec<(usize, String, String, f32)>,
}

impl OutlierSink for MemoryOutliers {
    fn record(&mut self, outlier: &OutlierRecord<'_>) -> Result<()> {
        self.captures.push((
            outlier.epoch,
            outlier.case_name.to_string(),
            outlier.filename.to_string(),
            outlier.iou,
        ));
        Ok(())
    }
}

fn save_gray(path: &Path, mask: ArrayView2<f32>) -> Result<()> {
    let (height, width) = mask.dim();
    let image = GrayImage::from_fn(width as u32, height as u32, |x, y| {
        let value = mask[[y as usize, x as usize]];
        image::Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
    });
    image.save(path).map_err(|source| Error::Encode {
        path: path.to_path_buf(),
        source,
    })
}

fn save_rgb(path: &Path, image: ArrayView3<f32>) -> Result<()> {
    let (_, height, width) = image.dim();
    let rgb = RgbImage::from_fn(width as u32, height as u32, |x, y| {
        let pixel = |channel: usize| {
            (image[[channel, y as usize, x as usize]].clamp(0.0, 1.0) * 255.0).round() as u8
        };
        image::Rgb([pixel(0), pixel(1), pixel(2)])
    });
    rgb.save(path).map_err(|source| Error::Encode {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use tempfile::TempDir;

    #[test]
    fn memory_metrics_filter_by_name() {
        let mut metrics = MemoryMetrics::default();
        metrics.scalar("train/iou", 0.5, 0);
        metrics.scalar("train/bce_loss", 0.2, 0);
        metrics.scalar("train/iou", 0.7, 1);
        assert_eq!(metrics.values_for("train/iou"), vec![0.5, 0.7]);
    }

    #[test]
    fn fs_sink_writes_all_four_panels() {
        let tmp = TempDir::new().unwrap();
        let mut sink = FsOutlierSink::new(tmp.path());

        let image = Array3::<f32>::zeros((3, 8, 8));
        let prediction = Array2::<u8>::ones((8, 8));
        let ground_truth = Array2::<f32>::zeros((8, 8));
        let pseudo = Array2::<f32>::from_elem((8, 8), 0.5);

        sink.record(&OutlierRecord {
            image: image.view(),
            prediction: &prediction,
            ground_truth: ground_truth.view(),
            pseudo_label: pseudo.view(),
            iou: 0.25,
            epoch: 3,
            case_name: "case_1",
            filename: "frame_0007.png",
        })
        .unwrap();

        let dir = tmp.path().join("epoch_003").join("case_1");
        for suffix in ["image", "pred", "real_gt", "fake_gt"] {
            assert!(dir.join(format!("frame_0007_{suffix}.png")).exists());
        }
    }
}
