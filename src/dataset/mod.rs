mod store;
mod window;

pub use store::{FrameRef, FrameStore};
pub use window::{Augment, IdentityAugment, WindowSample, WindowedDataset};
