mod conv;
mod types;

pub use conv::ConvSegmenter;
pub use types::SegmentationModel;
