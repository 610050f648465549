use std::fmt;
use std::str::FromStr;

/// Fixed model input size (width, height), limited by the VGG16-class backbone.
pub const MODEL_SIZE: (u32, u32) = (224, 224);

/// Default border crop for endoscope footage: the recordings carry a black
/// frame around the active area, removed before resizing.
pub const DEFAULT_CROP: CropRect = CropRect {
    top: 36,
    left: 328,
    height: 1010,
    width: 1264,
};

/// Axis-aligned crop region, applied identically to a frame and its mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub top: u32,
    pub left: u32,
    pub height: u32,
    pub width: u32,
}

/// Settings for the windowed dataset, passed by value into its constructor.
#[derive(Debug, Clone)]
pub struct WindowSettings {
    /// Number of consecutive frames per sample.
    pub frame_len: usize,
    /// Border crop applied before resizing; `None` resizes the full frame.
    pub crop: Option<CropRect>,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            frame_len: 1,
            crop: Some(DEFAULT_CROP),
        }
    }
}

/// Settings for the self-training loop.
#[derive(Debug, Clone)]
pub struct TrainSettings {
    /// Training iteration budget; there is no early stopping.
    pub epochs: usize,
    /// Samples scoring below this symmetric IoU are flagged for inspection.
    pub outlier_iou_threshold: f32,
    /// Enables outlier capture and disables the periodic test pass.
    pub debug: bool,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            epochs: 20,
            outlier_iou_threshold: 0.5,
            debug: false,
        }
    }
}

/// Accelerator selection: an explicit CUDA index or the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    Cpu,
    Cuda(usize),
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("cpu") {
            Ok(Self::Cpu)
        } else {
            s.parse::<usize>()
                .map(Self::Cuda)
                .map_err(|_| format!("expected \"cpu\" or a CUDA device index, got {s:?}"))
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(index) => write!(f, "cuda:{index}"),
        }
    }
}
