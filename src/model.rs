//! Multitask CNN: a shared convolutional trunk followed by one
//! classification head per task (digit, gender).

use crate::dataset::{MultitaskBatch, SampleLayout};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::prelude::*;
use burn::train::ClassificationOutput;

#[derive(Config, Debug)]
pub struct MultitaskCnnConfig {
    /// Input feature map height (e.g. frequency bins).
    #[config(default = 64)]
    pub height: usize,
    /// Input feature map width (e.g. time frames).
    #[config(default = 64)]
    pub width: usize,

    #[config(default = 16)]
    pub conv1_channels: usize,
    #[config(default = 32)]
    pub conv2_channels: usize,

    /// Side of the square feature map fed to the shared dense layer.
    #[config(default = 4)]
    pub pool_size: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
    #[config(default = 0.3)]
    pub dropout: f64,

    #[config(default = 10)]
    pub num_digits: usize,
    #[config(default = 2)]
    pub num_genders: usize,
}

impl MultitaskCnnConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> MultitaskCnn<B> {
        let conv = |channels: [usize; 2]| -> Conv2d<B> {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let flat_size = self.conv2_channels * self.pool_size * self.pool_size;

        MultitaskCnn {
            conv1: conv([1, self.conv1_channels]),
            conv2: conv([self.conv1_channels, self.conv2_channels]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            adaptive_pool: AdaptiveAvgPool2dConfig::new([self.pool_size, self.pool_size]).init(),
            shared: LinearConfig::new(flat_size, self.hidden_size).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
            digit_head: LinearConfig::new(self.hidden_size, self.num_digits).init(device),
            gender_head: LinearConfig::new(self.hidden_size, self.num_genders).init(device),
        }
    }

    /// Sample shape and label ranges this model accepts.
    pub fn sample_layout(&self) -> SampleLayout {
        SampleLayout {
            height: self.height,
            width: self.width,
            num_digits: self.num_digits,
            num_genders: self.num_genders,
        }
    }
}

#[derive(Module, Debug)]
pub struct MultitaskCnn<B: Backend> {
    pub conv1: Conv2d<B>,
    pub conv2: Conv2d<B>,
    pub pool: MaxPool2d,
    pub adaptive_pool: AdaptiveAvgPool2d,
    pub shared: Linear<B>,
    pub dropout: Dropout,
    pub activation: Relu,
    pub digit_head: Linear<B>,
    pub gender_head: Linear<B>,
}

/// Relative weight of each task in the combined loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub digit: f64,
    pub gender: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            digit: 1.0,
            gender: 1.0,
        }
    }
}

/// Forward pass results of both tasks, with the combined loss.
pub struct MultitaskOutput<B: Backend> {
    /// `digit.weight * digit.loss + gender.weight * gender.loss`
    ///
    /// # Shape
    /// [1]
    pub loss: Tensor<B, 1>,
    pub digit: ClassificationOutput<B>,
    pub gender: ClassificationOutput<B>,
}

impl<B: Backend> MultitaskCnn<B> {
    /// # Shapes
    ///   - Input [batch, 1, height, width]
    ///   - Output ([batch, num_digits], [batch, num_genders])
    pub fn forward(&self, inputs: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let [batch_size, channels, _height, _width] = inputs.dims();
        debug_assert_eq!(channels, 1);

        let x = self.conv1.forward(inputs);
        let x = self.pool.forward(self.activation.forward(x));
        let x = self.conv2.forward(x);
        let x = self.pool.forward(self.activation.forward(x));

        let x = self.adaptive_pool.forward(x);
        let [_batch_size, channels, pool_h, pool_w] = x.dims();
        let x = x.reshape([batch_size, channels * pool_h * pool_w]);

        let x = self.shared.forward(x);
        let x = self.dropout.forward(self.activation.forward(x));

        let digit = self.digit_head.forward(x.clone());
        let gender = self.gender_head.forward(x);
        debug_assert_eq!(digit.dims()[0], batch_size);
        debug_assert_eq!(gender.dims()[0], batch_size);

        (digit, gender)
    }

    pub fn forward_multitask(
        &self,
        batch: MultitaskBatch<B>,
        weights: LossWeights,
    ) -> MultitaskOutput<B> {
        let [batch_size] = batch.digits.dims();
        assert_eq!([batch_size], batch.genders.dims());

        let (digit_logits, gender_logits) = self.forward(batch.inputs);
        let device = digit_logits.device();
        let criterion = CrossEntropyLossConfig::new().init(&device);

        let digit_loss = criterion.forward(digit_logits.clone(), batch.digits.clone());
        let gender_loss = criterion.forward(gender_logits.clone(), batch.genders.clone());
        let loss = digit_loss.clone().mul_scalar(weights.digit)
            + gender_loss.clone().mul_scalar(weights.gender);

        MultitaskOutput {
            loss,
            digit: ClassificationOutput::new(digit_loss, digit_logits, batch.digits),
            gender: ClassificationOutput::new(gender_loss, gender_logits, batch.genders),
        }
    }
}
