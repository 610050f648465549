use anyhow::Result;
use ndarray::Array4;

/// Trait for trainable segmentation backends.
///
/// The loop treats the model as an opaque `image-batch -> logit-batch`
/// function over `[N, 3, H, W]` inputs producing `[N, 1, H, W]` logits, plus
/// one gradient-descent update per batch.
pub trait SegmentationModel {
    /// Run the model in eval mode, with parameter updates disabled.
    ///
    /// Returns raw logits; callers apply the sigmoid themselves.
    fn forward(&mut self, images: &Array4<f32>) -> Result<Array4<f32>>;

    /// One training update: forward in train mode, binary cross-entropy on
    /// the logits against `targets`, backward, optimizer step.
    ///
    /// Returns the batch loss.
    fn train_step(&mut self, images: &Array4<f32>, targets: &Array4<f32>) -> Result<f32>;
}
