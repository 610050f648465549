//! End-to-end exercise of the self-training loop over a synthetic on-disk
//! corpus: two cases whose ground truths sit on either side of the outlier
//! threshold, a stub model with a fixed prediction, and a real filesystem
//! pseudo-label store.

use endoseg::config::{TrainSettings, WindowSettings};
use endoseg::{
    FrameStore, FsLabelStore, MemoryMetrics, MemoryOutliers, SegmentationModel, SelfTrainer,
    WindowedDataset,
};
use image::GrayImage;
use ndarray::Array4;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Always predicts the same logit everywhere and counts its updates.
struct StubModel {
    logit: f32,
    train_calls: usize,
}

impl SegmentationModel for StubModel {
    fn forward(&mut self, images: &Array4<f32>) -> anyhow::Result<Array4<f32>> {
        let (n, _, h, w) = images.dim();
        Ok(Array4::from_elem((n, 1, h, w), self.logit))
    }

    fn train_step(&mut self, _images: &Array4<f32>, _targets: &Array4<f32>) -> anyhow::Result<f32> {
        self.train_calls += 1;
        Ok(0.25)
    }
}

fn write_frames(dir: &Path, count: usize, pixel: impl Fn(u32, u32) -> u8) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let frame = GrayImage::from_fn(32, 32, |x, y| image::Luma([pixel(x, y)]));
        frame.save(dir.join(format!("frame_{i:04}.png"))).unwrap();
    }
    dir.to_path_buf()
}

/// Two cases, four frames each. Against an all-foreground prediction,
/// `case img_a` (37.5% foreground) scores below the 0.5 outlier threshold
/// and `img_b` (75% foreground) above it.
fn corpus(root: &Path) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let img_a = write_frames(&root.join("img_a"), 4, |_, _| 128);
    let img_b = write_frames(&root.join("img_b"), 4, |_, _| 128);
    let gt_a = write_frames(&root.join("gt_a"), 4, |x, _| if x < 12 { 255 } else { 0 });
    let gt_b = write_frames(&root.join("gt_b"), 4, |x, _| if x < 24 { 255 } else { 0 });
    (vec![img_a, img_b], vec![gt_a, gt_b])
}

fn dataset(
    images: &[PathBuf],
    gts: &[PathBuf],
    labels: Arc<FsLabelStore>,
    frame_len: usize,
) -> WindowedDataset {
    let store = FrameStore::new(images, gts).unwrap();
    WindowedDataset::new(
        store,
        labels,
        WindowSettings {
            frame_len,
            crop: None,
        },
    )
    .unwrap()
}

fn settings(epochs: usize, debug: bool) -> TrainSettings {
    TrainSettings {
        epochs,
        debug,
        ..TrainSettings::default()
    }
}

#[test]
fn debug_epoch_trains_scores_persists_and_flags_outliers() {
    let tmp = TempDir::new().unwrap();
    let (images, gts) = corpus(tmp.path());
    let labels = Arc::new(FsLabelStore::new(tmp.path().join("pseudo")));
    let train = dataset(&images, &gts, labels.clone(), 2);
    assert_eq!(train.len(), 4);

    let mut trainer = SelfTrainer::new(
        StubModel {
            logit: 4.0,
            train_calls: 0,
        },
        labels,
        MemoryMetrics::default(),
        MemoryOutliers::default(),
        settings(1, true),
    );
    trainer.run(&train, None).unwrap();

    // One update per window.
    assert_eq!(trainer.model().train_calls, 4);

    let metrics = trainer.metrics();
    assert_eq!(metrics.values_for("train/bce_loss"), vec![0.25]);
    let iou = metrics.values_for("train/iou");
    assert_eq!(iou.len(), 1);
    assert!(iou[0] > 0.4 && iou[0] < 0.7, "mean iou {}", iou[0]);
    // Debug mode skips the periodic test even if metrics were wired.
    assert!(metrics.values_for("test/bce_loss").is_empty());
    assert!(metrics.values_for("test/iou").is_empty());

    // Exactly the low-overlap case is flagged, every frame, this epoch.
    let captures = &trainer.outlier_sink().captures;
    assert_eq!(captures.len(), 4);
    assert!(captures
        .iter()
        .all(|(epoch, case, _, iou)| *epoch == 0 && case == "img_a" && *iou < 0.5));

    // The write-back edge: persisted predictions land on disk keyed by the
    // image case and filename...
    assert!(tmp
        .path()
        .join("pseudo")
        .join("img_a")
        .join("frame_0000.png")
        .exists());

    // ...and reloading the same corpus now yields the previous epoch's
    // sigmoid-activated prediction as the positive label, not the original
    // ground truth.
    let reloaded = train.get(0).unwrap();
    let expected = 1.0 / (1.0 + (-4.0f32).exp());
    let got = reloaded.positive_labels[[0, 0, 100, 100]];
    assert!(
        (got - expected).abs() < 2.0 / 255.0,
        "positive label {got}, expected about {expected}"
    );
    assert_ne!(reloaded.positive_labels, reloaded.ground_truths);
}

#[test]
fn periodic_test_runs_when_debug_is_off() {
    let tmp = TempDir::new().unwrap();
    let (images, gts) = corpus(tmp.path());
    let labels = Arc::new(FsLabelStore::new(tmp.path().join("pseudo")));
    let train = dataset(&images, &gts, labels.clone(), 2);

    let test_root = tmp.path().join("test");
    let timg = write_frames(&test_root.join("img_t"), 2, |_, _| 64);
    let tgt = write_frames(&test_root.join("gt_t"), 2, |x, _| if x < 16 { 255 } else { 0 });
    let test = dataset(&[timg], &[tgt], labels.clone(), 2);
    assert_eq!(test.len(), 1);

    let mut trainer = SelfTrainer::new(
        StubModel {
            logit: 4.0,
            train_calls: 0,
        },
        labels,
        MemoryMetrics::default(),
        MemoryOutliers::default(),
        settings(2, false),
    );
    trainer.run(&train, Some(&test)).unwrap();

    let metrics = trainer.metrics();
    assert_eq!(metrics.values_for("train/bce_loss").len(), 2);
    assert_eq!(metrics.values_for("test/bce_loss").len(), 2);
    assert_eq!(metrics.values_for("test/iou").len(), 2);

    // Outlier capture never fires outside debug mode, even below threshold.
    assert!(trainer.outlier_sink().captures.is_empty());
}

#[test]
fn second_epoch_consumes_first_epochs_predictions() {
    let tmp = TempDir::new().unwrap();
    // Constant all-foreground ground truth, so the first-epoch fallback
    // target is exactly 1.0 everywhere even after resizing.
    let img = write_frames(&tmp.path().join("img_a"), 2, |_, _| 128);
    let gt = write_frames(&tmp.path().join("gt_a"), 2, |_, _| 255);
    let labels = Arc::new(FsLabelStore::new(tmp.path().join("pseudo")));
    let train = dataset(&[img], &[gt], labels.clone(), 1);

    // Epoch one: targets are the ground-truth fallback (all 1.0). Epoch two:
    // targets are the persisted sigmoid(4.0) maps. A model that asserts on
    // its targets distinguishes the two.
    struct TargetProbe {
        epoch_calls: usize,
        first_epoch_windows: usize,
    }
    impl SegmentationModel for TargetProbe {
        fn forward(&mut self, images: &Array4<f32>) -> anyhow::Result<Array4<f32>> {
            let (n, _, h, w) = images.dim();
            Ok(Array4::from_elem((n, 1, h, w), 4.0))
        }
        fn train_step(
            &mut self,
            _images: &Array4<f32>,
            targets: &Array4<f32>,
        ) -> anyhow::Result<f32> {
            let expected = 1.0 / (1.0 + (-4.0f32).exp());
            if self.epoch_calls < self.first_epoch_windows {
                assert!(targets.iter().all(|&v| v > 0.99));
            } else {
                assert!(targets
                    .iter()
                    .all(|&v| (v - expected).abs() < 2.0 / 255.0 && v < 0.99));
            }
            self.epoch_calls += 1;
            Ok(0.1)
        }
    }

    let windows = train.len();
    let mut trainer = SelfTrainer::new(
        TargetProbe {
            epoch_calls: 0,
            first_epoch_windows: windows,
        },
        labels,
        MemoryMetrics::default(),
        MemoryOutliers::default(),
        settings(2, false),
    );
    trainer.run(&train, None).unwrap();
    assert_eq!(trainer.model().epoch_calls, windows * 2);
}
