//! Self-training segmentation over per-case frame corpora.
//!
//! Frames are drawn from per-case directories through a windowed dataset and
//! fed to a trainable segmentation model. Each epoch the model's own
//! sigmoid-activated predictions are persisted as the pseudo ground truth the
//! next epoch trains against, while the held-out real ground truth is used
//! only to measure IoU and flag low-quality outputs.

pub mod config;
pub mod dataset;
pub mod error;
pub mod labels;
pub mod model;
pub mod scoring;
pub mod training;

pub use config::{CropRect, DeviceSelector, TrainSettings, WindowSettings};
pub use dataset::{Augment, FrameStore, IdentityAugment, WindowSample, WindowedDataset};
pub use error::{Error, Result};
pub use labels::{FsLabelStore, MemoryLabelStore, PseudoLabelStore};
pub use model::{ConvSegmenter, SegmentationModel};
pub use training::{
    FsOutlierSink, MemoryMetrics, MemoryOutliers, MetricSink, OutlierRecord, OutlierSink,
    SelfTrainer, TracingMetrics,
};
