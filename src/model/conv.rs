use super::types::SegmentationModel;
use crate::config::DeviceSelector;
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{conv2d, loss, AdamW, Conv2d, Conv2dConfig, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ndarray::Array4;

const HIDDEN_CHANNELS: usize = 8;

/// Small fully-convolutional segmenter used as the default backend.
///
/// Two padded 3x3 convolutions with a ReLU in between, so the output keeps
/// the input's spatial dimensions at one channel of logits. Generic over the
/// update algorithm through `candle_nn::Optimizer`.
pub struct ConvSegmenter<O: Optimizer = AdamW> {
    conv1: Conv2d,
    conv2: Conv2d,
    optimizer: O,
    device: Device,
}

impl ConvSegmenter<AdamW> {
    /// Default configuration: AdamW at `learning_rate`.
    pub fn new(learning_rate: f64, selector: DeviceSelector) -> Result<Self> {
        Self::with_optimizer(selector, |vars| {
            AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    ..Default::default()
                },
            )
        })
    }
}

impl<O: Optimizer> ConvSegmenter<O> {
    /// Build the net on the selected device and hand its trainable variables
    /// to a caller-chosen optimizer.
    pub fn with_optimizer<F>(selector: DeviceSelector, make_optimizer: F) -> Result<Self>
    where
        F: FnOnce(Vec<Var>) -> candle_core::Result<O>,
    {
        let device = resolve_device(selector);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let conv1 = conv2d(3, HIDDEN_CHANNELS, 3, config, vb.pp("conv1"))?;
        let conv2 = conv2d(HIDDEN_CHANNELS, 1, 3, config, vb.pp("conv2"))?;
        let optimizer = make_optimizer(varmap.all_vars())?;
        Ok(Self {
            conv1,
            conv2,
            optimizer,
            device,
        })
    }

    fn net_forward(&self, images: &Tensor) -> candle_core::Result<Tensor> {
        self.conv2.forward(&self.conv1.forward(images)?.relu()?)
    }

    fn to_tensor(&self, batch: &Array4<f32>) -> Result<Tensor> {
        let (n, c, h, w) = batch.dim();
        let data: Vec<f32> = batch.iter().copied().collect();
        Tensor::from_vec(data, (n, c, h, w), &self.device).context("building input tensor")
    }

    fn to_array(logits: &Tensor) -> Result<Array4<f32>> {
        let (n, c, h, w) = logits.dims4()?;
        let data = logits.flatten_all()?.to_vec1::<f32>()?;
        Array4::from_shape_vec((n, c, h, w), data).context("reshaping logit batch")
    }
}

impl<O: Optimizer> SegmentationModel for ConvSegmenter<O> {
    fn forward(&mut self, images: &Array4<f32>) -> Result<Array4<f32>> {
        let images = self.to_tensor(images)?;
        let logits = self.net_forward(&images)?.detach();
        Self::to_array(&logits)
    }

    fn train_step(&mut self, images: &Array4<f32>, targets: &Array4<f32>) -> Result<f32> {
        let images = self.to_tensor(images)?;
        let targets = self.to_tensor(targets)?;
        let logits = self.net_forward(&images)?;
        let loss = loss::binary_cross_entropy_with_logit(&logits, &targets)?;
        self.optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()?)
    }
}

fn resolve_device(selector: DeviceSelector) -> Device {
    match selector {
        DeviceSelector::Cpu => Device::Cpu,
        DeviceSelector::Cuda(index) => match Device::new_cuda(index) {
            Ok(device) => device,
            Err(error) => {
                tracing::warn!(index, %error, "CUDA device unavailable, falling back to CPU");
                Device::Cpu
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_preserves_spatial_shape() {
        let mut model = ConvSegmenter::new(1e-3, DeviceSelector::Cpu).unwrap();
        let images = Array4::<f32>::zeros((2, 3, 8, 8));
        let logits = model.forward(&images).unwrap();
        assert_eq!(logits.dim(), (2, 1, 8, 8));
    }

    #[test]
    fn train_step_reduces_loss_on_a_constant_target() {
        let mut model = ConvSegmenter::new(0.1, DeviceSelector::Cpu).unwrap();
        let images = Array4::from_elem((1, 3, 4, 4), 0.5f32);
        let targets = Array4::from_elem((1, 1, 4, 4), 1.0f32);

        let first = model.train_step(&images, &targets).unwrap();
        let mut last = first;
        for _ in 0..20 {
            last = model.train_step(&images, &targets).unwrap();
        }
        assert!(first.is_finite() && last.is_finite());
        assert!(last < first, "loss did not decrease: {first} -> {last}");
    }

    #[test]
    fn cuda_selector_falls_back_when_unavailable() {
        // Built without the CUDA feature, so this must resolve to the CPU.
        let model = ConvSegmenter::new(1e-3, DeviceSelector::Cuda(0)).unwrap();
        assert!(model.device.is_cpu());
    }
}
