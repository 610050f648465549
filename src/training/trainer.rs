use super::sinks::{MetricSink, OutlierRecord, OutlierSink};
use crate::config::{TrainSettings, MODEL_SIZE};
use crate::dataset::WindowedDataset;
use crate::error::{Error, Result};
use crate::labels::PseudoLabelStore;
use crate::model::SegmentationModel;
use crate::scoring;
use ndarray::{s, Array4};
use std::sync::Arc;

const IMAGE_CHANNELS: usize = 3;
const MASK_CHANNELS: usize = 1;

/// Per-epoch self-training orchestration.
///
/// Each epoch runs three strictly ordered passes over the training corpus:
/// a parameter-update pass against the current pseudo-labels, an inference
/// pass that scores every window against the real ground truth and flags
/// outliers, and the persistence of the fresh sigmoid outputs as the next
/// epoch's pseudo-labels. Unless debug mode is set, a scoring pass over the
/// disjoint test corpus follows. The epoch budget is fixed; there is no
/// early stopping or convergence check.
pub struct SelfTrainer<M, S, V>
where
    M: SegmentationModel,
    S: MetricSink,
    V: OutlierSink,
{
    model: M,
    labels: Arc<dyn PseudoLabelStore>,
    metrics: S,
    outliers: V,
    settings: TrainSettings,
}

impl<M, S, V> SelfTrainer<M, S, V>
where
    M: SegmentationModel,
    S: MetricSink,
    V: OutlierSink,
{
    pub fn new(
        model: M,
        labels: Arc<dyn PseudoLabelStore>,
        metrics: S,
        outliers: V,
        settings: TrainSettings,
    ) -> Self {
        Self {
            model,
            labels,
            metrics,
            outliers,
            settings,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn metrics(&self) -> &S {
        &self.metrics
    }

    pub fn outlier_sink(&self) -> &V {
        &self.outliers
    }

    /// Run the full epoch budget.
    pub fn run(&mut self, train: &WindowedDataset, test: Option<&WindowedDataset>) -> Result<()> {
        if train.is_empty() {
            return Err(Error::Configuration("training corpus is empty".into()));
        }

        for epoch in 0..self.settings.epochs {
            tracing::info!(epoch, "epoch start");

            let mean_loss = self.train_epoch(train)?;
            tracing::info!(epoch, mean_loss, "training pass done");
            self.metrics.scalar("train/bce_loss", mean_loss, epoch);

            let mean_iou = self.score_and_persist(train, epoch)?;
            tracing::info!(epoch, mean_iou, "scoring pass done");
            self.metrics.scalar("train/iou", mean_iou, epoch);

            if !self.settings.debug {
                if let Some(test) = test {
                    self.test_epoch(test, epoch)?;
                }
            }
        }
        Ok(())
    }

    /// One pass of parameter updates against the current pseudo-labels.
    fn train_epoch(&mut self, train: &WindowedDataset) -> Result<f32> {
        let mut total_loss = 0.0f32;
        for index in 0..train.len() {
            let sample = train.get(index)?;
            check_shape(&sample.images, IMAGE_CHANNELS)?;
            check_shape(&sample.positive_labels, MASK_CHANNELS)?;
            total_loss += self
                .model
                .train_step(&sample.images, &sample.positive_labels)?;
        }
        Ok(total_loss / train.len() as f32)
    }

    /// Inference over the training corpus with updates disabled: score every
    /// frame against the real ground truth, persist the sigmoid output as the
    /// next epoch's pseudo-label, and capture outliers in debug mode.
    fn score_and_persist(&mut self, train: &WindowedDataset, epoch: usize) -> Result<f32> {
        let mut total_iou = 0.0f32;
        let mut frames = 0usize;

        for index in 0..train.len() {
            let sample = train.get(index)?;
            check_shape(&sample.images, IMAGE_CHANNELS)?;
            check_shape(&sample.ground_truths, MASK_CHANNELS)?;
            let logits = self.model.forward(&sample.images)?;
            check_shape(&logits, MASK_CHANNELS)?;
            let probabilities = scoring::sigmoid(&logits);

            for (frame, filename) in sample.filenames.iter().enumerate() {
                let probability = probabilities.slice(s![frame, 0, .., ..]);
                let threshold = scoring::otsu_threshold(probability);
                let real = sample.ground_truths.slice(s![frame, 0, .., ..]);
                let iou = scoring::symmetric_iou(probability, real, threshold);

                self.labels
                    .put(&sample.case_name, filename, &probability.to_owned())?;

                if self.settings.debug && iou < self.settings.outlier_iou_threshold {
                    let prediction = scoring::binarize(probability, threshold);
                    self.outliers.record(&OutlierRecord {
                        image: sample.images.slice(s![frame, .., .., ..]),
                        prediction: &prediction,
                        ground_truth: real,
                        pseudo_label: sample.positive_labels.slice(s![frame, 0, .., ..]),
                        iou,
                        epoch,
                        case_name: &sample.case_name,
                        filename,
                    })?;
                }

                total_iou += iou;
                frames += 1;
            }
        }
        Ok(total_iou / frames as f32)
    }

    /// Score the disjoint test corpus against its fixed real ground truth.
    /// Pseudo-labels are never consulted here.
    fn test_epoch(&mut self, test: &WindowedDataset, epoch: usize) -> Result<()> {
        tracing::info!(epoch, "test pass");
        let mut total_loss = 0.0f32;
        let mut batches = 0usize;
        let mut total_iou = 0.0f32;
        let mut frames = 0usize;

        for index in 0..test.len() {
            let sample = test.get(index)?;
            check_shape(&sample.images, IMAGE_CHANNELS)?;
            check_shape(&sample.ground_truths, MASK_CHANNELS)?;
            let logits = self.model.forward(&sample.images)?;
            check_shape(&logits, MASK_CHANNELS)?;

            total_loss += scoring::bce_with_logits(&logits, &sample.ground_truths);
            batches += 1;

            let probabilities = scoring::sigmoid(&logits);
            for frame in 0..sample.filenames.len() {
                let probability = probabilities.slice(s![frame, 0, .., ..]);
                let threshold = scoring::otsu_threshold(probability);
                let real = sample.ground_truths.slice(s![frame, 0, .., ..]);
                total_iou += scoring::symmetric_iou(probability, real, threshold);
                frames += 1;
            }
        }

        if batches > 0 {
            self.metrics
                .scalar("test/bce_loss", total_loss / batches as f32, epoch);
            self.metrics
                .scalar("test/iou", total_iou / frames as f32, epoch);
        }
        Ok(())
    }
}

/// The fixed layout contract: every batch must be `[N, channels, 224, 224]`.
/// A violation is fatal since it indicates a windowing or transform defect
/// upstream, not a data-quality issue.
fn check_shape(batch: &Array4<f32>, channels: usize) -> Result<()> {
    let (_, c, h, w) = batch.dim();
    let expected = (channels, MODEL_SIZE.1 as usize, MODEL_SIZE.0 as usize);
    if (c, h, w) != expected {
        return Err(Error::ShapeMismatch {
            expected,
            actual: (c, h, w),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_shape_accepts_the_fixed_layout() {
        let images = Array4::<f32>::zeros((4, 3, 224, 224));
        assert!(check_shape(&images, 3).is_ok());
        let masks = Array4::<f32>::zeros((4, 1, 224, 224));
        assert!(check_shape(&masks, 1).is_ok());
    }

    #[test]
    fn check_shape_rejects_wrong_layouts() {
        let bad = Array4::<f32>::zeros((4, 3, 224, 112));
        let err = check_shape(&bad, 3).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));

        let wrong_channels = Array4::<f32>::zeros((4, 3, 224, 224));
        assert!(check_shape(&wrong_channels, 1).is_err());
    }
}
