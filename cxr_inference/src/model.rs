//! Convolutional classifier for chest X-ray images.
//!
//! A stack of Conv2d -> ReLU -> MaxPool blocks followed by global average
//! pooling and a linear head. The feature extractor and the head are exposed
//! separately so the gradient explainer can capture the last convolutional
//! feature map and differentiate the class score with respect to it.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};

/// Configuration for the [`XrayCnn`] model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XrayCnnConfig {
    /// Number of input channels.
    pub n_channels: usize,
    /// Input resolution (square).
    pub input_size: usize,
    /// Number of output classes.
    pub n_classes: usize,
    /// Output channels of each convolutional block, in order.
    pub conv_channels: Vec<usize>,
    /// Kernel size shared by all convolutional blocks.
    pub kernel_size: usize,
}

impl Default for XrayCnnConfig {
    fn default() -> Self {
        Self {
            n_channels: 3,
            input_size: 256,
            n_classes: 4,
            conv_channels: vec![32, 64, 128, 128],
            kernel_size: 3,
        }
    }
}

impl XrayCnnConfig {
    /// Create a config with the given input resolution and class count.
    pub fn new(input_size: usize, n_classes: usize) -> Self {
        Self {
            input_size,
            n_classes,
            ..Default::default()
        }
    }

    /// Set the convolutional block channels.
    #[must_use]
    pub fn with_conv_channels(mut self, conv_channels: Vec<usize>) -> Self {
        self.conv_channels = conv_channels;
        self
    }

    /// Channel count of the last convolutional feature map, which is also
    /// the input width of the linear head.
    pub fn feature_channels(&self) -> usize {
        self.conv_channels.last().copied().unwrap_or(self.n_channels)
    }

    /// Initialize the model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayCnn<B> {
        XrayCnn::new(self.clone(), device)
    }
}

/// A single convolutional block: Conv2d -> ReLU -> MaxPool(2).
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self { conv, pool }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(x);
        let out = Relu::new().forward(out);
        self.pool.forward(out)
    }
}

/// Convolutional classifier.
///
/// The convolutional blocks are kept as a list so callers can check whether
/// any convolutional feature map exists at all; a head-only model is valid
/// for classification but cannot be explained by Grad-CAM.
#[derive(Module, Debug)]
pub struct XrayCnn<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    gap: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> XrayCnn<B> {
    pub fn new(config: XrayCnnConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.conv_channels.len());
        let mut in_channels = config.n_channels;
        for &out_channels in &config.conv_channels {
            blocks.push(ConvBlock::new(
                in_channels,
                out_channels,
                config.kernel_size,
                device,
            ));
            in_channels = out_channels;
        }

        let gap = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc = LinearConfig::new(config.feature_channels(), config.n_classes).init(device);

        Self { blocks, gap, fc }
    }

    /// Whether the model contains any convolutional feature map.
    pub fn has_conv_features(&self) -> bool {
        !self.blocks.is_empty()
    }

    /// Output width of the classification head.
    pub fn output_width(&self) -> usize {
        self.fc.weight.dims()[1]
    }

    /// Feature extractor: the input after the last convolutional block.
    ///
    /// Shape (batch, channels, h, w). With no blocks this is the identity.
    pub fn features(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut out = x;
        for block in &self.blocks {
            out = block.forward(out);
        }
        out
    }

    /// Classification head over a feature map: global average pooling then
    /// the linear layer. Returns logits of shape (batch, n_classes).
    pub fn head(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let out = self.gap.forward(features);
        let [batch, channels, _, _] = out.dims();
        let out = out.reshape([batch, channels]);
        self.fc.forward(out)
    }

    /// Full forward pass returning logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.features(x);
        self.head(features)
    }

    /// Full forward pass returning class probabilities.
    pub fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuBackend;
    use burn::tensor::Distribution;

    #[test]
    fn test_config_default() {
        let config = XrayCnnConfig::default();
        assert_eq!(config.n_channels, 3);
        assert_eq!(config.n_classes, 4);
        assert_eq!(config.feature_channels(), 128);
    }

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let config = XrayCnnConfig::new(64, 4).with_conv_channels(vec![8, 16]);
        let model = config.init::<CpuBackend>(&device);

        let x = Tensor::random([2, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        let out = model.forward(x);
        assert_eq!(out.dims(), [2, 4]);
        assert!(model.has_conv_features());
        assert_eq!(model.output_width(), 4);
    }

    #[test]
    fn test_feature_map_shape() {
        let device = Default::default();
        let config = XrayCnnConfig::new(64, 4).with_conv_channels(vec![8, 16]);
        let model = config.init::<CpuBackend>(&device);

        let x = Tensor::random([1, 3, 64, 64], Distribution::Normal(0.0, 1.0), &device);
        // Two blocks, each halving the resolution.
        let features = model.features(x);
        assert_eq!(features.dims(), [1, 16, 16, 16]);
    }

    #[test]
    fn test_headless_model() {
        let device = Default::default();
        let config = XrayCnnConfig::new(32, 4).with_conv_channels(vec![]);
        let model = config.init::<CpuBackend>(&device);

        assert!(!model.has_conv_features());

        let x = Tensor::random([1, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let out = model.forward(x);
        assert_eq!(out.dims(), [1, 4]);
    }

    #[test]
    fn test_probs_sum_to_one() {
        let device = Default::default();
        let config = XrayCnnConfig::new(32, 4).with_conv_channels(vec![8]);
        let model = config.init::<CpuBackend>(&device);

        let x = Tensor::random([1, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device);
        let probs = model.forward_probs(x);
        let sum: f32 = probs.sum().into_scalar().elem();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
