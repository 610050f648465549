use anyhow::{ensure, Context, Result};
use clap::Parser;
use endoseg::config::{DeviceSelector, TrainSettings, WindowSettings, DEFAULT_CROP};
use endoseg::{
    ConvSegmenter, FrameStore, FsLabelStore, FsOutlierSink, SelfTrainer, TracingMetrics,
    WindowedDataset,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Training image case directories (one per case)
    #[arg(long, required = true, num_args = 1..)]
    train_images: Vec<PathBuf>,

    /// Training ground-truth case directories (one per case)
    #[arg(long, required = true, num_args = 1..)]
    train_gts: Vec<PathBuf>,

    /// Test image case directories (optional disjoint split)
    #[arg(long, num_args = 1..)]
    test_images: Vec<PathBuf>,

    /// Test ground-truth case directories
    #[arg(long, num_args = 1..)]
    test_gts: Vec<PathBuf>,

    /// Root directory for persisted pseudo-labels
    #[arg(long, default_value = "pseudo_labels")]
    label_root: PathBuf,

    /// Root directory for outlier panels (written in debug mode)
    #[arg(long, default_value = "outliers")]
    outlier_root: PathBuf,

    /// Number of consecutive frames per sample
    #[arg(long, default_value_t = 1)]
    frame_len: usize,

    /// Training iteration budget
    #[arg(long, default_value_t = 20)]
    epochs: usize,

    /// Learning rate for the default optimizer
    #[arg(long, default_value_t = 1e-4)]
    learning_rate: f64,

    /// Samples below this symmetric IoU are flagged for inspection
    #[arg(long, default_value_t = 0.5)]
    outlier_iou_threshold: f32,

    /// "cpu" or a CUDA device index
    #[arg(long, default_value = "cpu")]
    device: DeviceSelector,

    /// Capture outliers and skip the periodic test pass
    #[arg(long)]
    debug: bool,

    /// Skip the fixed border crop (for corpora without the black border)
    #[arg(long)]
    no_crop: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("endoseg starting");
    tracing::info!(
        frame_len = args.frame_len,
        epochs = args.epochs,
        device = %args.device,
        debug = args.debug,
        "configuration"
    );

    ensure!(
        args.test_images.is_empty() == args.test_gts.is_empty(),
        "test image and ground-truth directories must be provided together"
    );

    let window_settings = WindowSettings {
        frame_len: args.frame_len,
        crop: if args.no_crop { None } else { Some(DEFAULT_CROP) },
    };
    let labels = Arc::new(FsLabelStore::new(&args.label_root));

    let train_store = FrameStore::new(&args.train_images, &args.train_gts)
        .context("Failed to build training corpus")?;
    let train = WindowedDataset::new(train_store, labels.clone(), window_settings.clone())
        .context("Failed to build training dataset")?;
    tracing::info!(windows = train.len(), "training dataset ready");

    let test = if args.test_images.is_empty() {
        tracing::info!("no test split configured");
        None
    } else {
        let test_store = FrameStore::new(&args.test_images, &args.test_gts)
            .context("Failed to build test corpus")?;
        // The test pass only reads real ground truth; its pseudo-label keys
        // are disjoint from the training cases, so sharing the store is safe.
        let test = WindowedDataset::new(test_store, labels.clone(), window_settings)
            .context("Failed to build test dataset")?;
        tracing::info!(windows = test.len(), "test dataset ready");
        Some(test)
    };

    let model = ConvSegmenter::new(args.learning_rate, args.device)
        .context("Failed to build segmentation model")?;

    let settings = TrainSettings {
        epochs: args.epochs,
        outlier_iou_threshold: args.outlier_iou_threshold,
        debug: args.debug,
    };
    let mut trainer = SelfTrainer::new(
        model,
        labels,
        TracingMetrics,
        FsOutlierSink::new(&args.outlier_root),
        settings,
    );

    trainer
        .run(&train, test.as_ref())
        .context("Training run failed")?;

    tracing::info!("epoch budget exhausted, run complete");
    Ok(())
}
