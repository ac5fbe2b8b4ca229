//! Convolutional backbone and classification head
//!
//! A bottleneck ResNet followed by global average pooling (the embedding)
//! and a linear layer (the logits). The default configuration is ResNet-50
//! with a 2048-dim embedding. Field names follow the torchvision state dict
//! so trained PyTorch weights map onto the record without renaming layers.

use burn::{
    module::Param,
    nn::{
        Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
    },
    prelude::*,
    tensor::activation::relu,
};
use domain::value_objects::CHANNELS;

use crate::error::VisionError;

/// Per-channel mean the backbone was trained with
pub const IMAGENET_MEAN: [f32; CHANNELS] = [0.485, 0.456, 0.406];
/// Per-channel standard deviation the backbone was trained with
pub const IMAGENET_STD: [f32; CHANNELS] = [0.229, 0.224, 0.225];

/// Blocks per stage of ResNet-50
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// Output channels of a bottleneck block relative to its width
const EXPANSION: usize = 4;
const STAGES: usize = 4;
const NORM_EPS: f32 = 1e-5;

/// Architecture of the species network
#[derive(Config, Debug)]
pub struct SpeciesNetConfig {
    /// Number of logits
    pub num_classes: usize,
    /// Bottleneck blocks in each of the four stages
    pub stage_blocks: Vec<usize>,
    /// Channels after the stem; stage `i` is `base_width << i` wide
    #[config(default = 64)]
    pub base_width: usize,
    /// Side length of the square input image
    #[config(default = 224)]
    pub input_size: usize,
    /// How many times ImageNet normalisation is applied to the input
    ///
    /// Weights exported by the original training script saw inputs that
    /// were normalised by the data loader and again inside the model.
    #[config(default = 1)]
    pub input_normalizations: usize,
}

impl SpeciesNetConfig {
    /// ResNet-50 with a fresh head
    pub fn resnet50(num_classes: usize) -> Self {
        Self::new(num_classes, RESNET50_BLOCKS.to_vec())
    }

    /// Length of the pooled backbone output
    pub const fn embedding_size(&self) -> usize {
        (self.base_width << (STAGES - 1)) * EXPANSION
    }

    /// Check the parameters describe a buildable network
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.stage_blocks.len() != STAGES || self.stage_blocks.contains(&0) {
            return Err(VisionError::Checkpoint(format!(
                "stage_blocks must list {STAGES} non-zero block counts, got {:?}",
                self.stage_blocks
            )));
        }
        if self.base_width == 0 {
            return Err(VisionError::Checkpoint("base_width is zero".to_string()));
        }
        if self.num_classes == 0 {
            return Err(VisionError::Checkpoint("num_classes is zero".to_string()));
        }
        // stem and stages downsample by 32 in total
        if self.input_size < 32 {
            return Err(VisionError::Checkpoint(format!(
                "input_size {} is smaller than the network stride",
                self.input_size
            )));
        }
        Ok(())
    }

    /// Build a network with freshly initialised weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpeciesNet<B> {
        let mut in_channels = self.base_width;
        let mut stages: Vec<Vec<Bottleneck<B>>> = Vec::with_capacity(STAGES);

        for (i, &blocks) in self.stage_blocks.iter().enumerate() {
            let width = self.base_width << i;
            let stride = if i == 0 { 1 } else { 2 };
            let mut stage = Vec::with_capacity(blocks);
            for b in 0..blocks {
                let block_stride = if b == 0 { stride } else { 1 };
                stage.push(Bottleneck::new(in_channels, width, block_stride, device));
                in_channels = width * EXPANSION;
            }
            stages.push(stage);
        }
        let mut stages = stages.into_iter();

        SpeciesNet {
            conv1: conv(3, 7, [CHANNELS, self.base_width], 2, device),
            bn1: FrozenNorm::new(self.base_width, device),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1: stages.next().unwrap_or_default(),
            layer2: stages.next().unwrap_or_default(),
            layer3: stages.next().unwrap_or_default(),
            layer4: stages.next().unwrap_or_default(),
            fc: LinearConfig::new(self.embedding_size(), self.num_classes).init(device),
            input_normalizations: self.input_normalizations,
        }
    }
}

fn conv<B: Backend>(
    padding: usize,
    kernel: usize,
    channels: [usize; 2],
    stride: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

/// Batch normalisation with frozen statistics
#[derive(Module, Debug)]
pub struct FrozenNorm<B: Backend> {
    weight: Param<Tensor<B, 1>>,
    bias: Param<Tensor<B, 1>>,
    running_mean: Param<Tensor<B, 1>>,
    running_var: Param<Tensor<B, 1>>,
}

impl<B: Backend> FrozenNorm<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            weight: Param::from_tensor(Tensor::ones([channels], device)),
            bias: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var: Param::from_tensor(Tensor::ones([channels], device)),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, channels, _, _] = x.dims();
        let scale = self.weight.val() / self.running_var.val().add_scalar(NORM_EPS).sqrt();
        let shift = self.bias.val() - self.running_mean.val() * scale.clone();
        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }
}

/// 1×1 projection on the residual path when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: FrozenNorm<B>,
}

/// 1×1 reduce, 3×3 (strided), 1×1 expand, plus the residual
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenNorm<B>,
    conv2: Conv2d<B>,
    bn2: FrozenNorm<B>,
    conv3: Conv2d<B>,
    bn3: FrozenNorm<B>,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    fn new(in_channels: usize, width: usize, stride: usize, device: &B::Device) -> Self {
        let out_channels = width * EXPANSION;
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: conv(0, 1, [in_channels, out_channels], stride, device),
            bn: FrozenNorm::new(out_channels, device),
        });

        Self {
            conv1: conv(0, 1, [in_channels, width], 1, device),
            bn1: FrozenNorm::new(width, device),
            conv2: conv(1, 3, [width, width], stride, device),
            bn2: FrozenNorm::new(width, device),
            conv3: conv(0, 1, [width, out_channels], 1, device),
            bn3: FrozenNorm::new(out_channels, device),
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(down) => down.bn.forward(down.conv.forward(x.clone())),
            None => x.clone(),
        };

        let out = relu(self.bn1.forward(self.conv1.forward(x)));
        let out = relu(self.bn2.forward(self.conv2.forward(out)));
        let out = self.bn3.forward(self.conv3.forward(out));
        relu(out + identity)
    }
}

/// Backbone plus classification head
#[derive(Module, Debug)]
pub struct SpeciesNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: FrozenNorm<B>,
    maxpool: MaxPool2d,
    layer1: Vec<Bottleneck<B>>,
    layer2: Vec<Bottleneck<B>>,
    layer3: Vec<Bottleneck<B>>,
    layer4: Vec<Bottleneck<B>>,
    fc: Linear<B>,
    input_normalizations: usize,
}

impl<B: Backend> SpeciesNet<B> {
    /// Penultimate-layer features for `[batch, 3, h, w]` images in `[0, 1]`
    pub fn embed(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.normalize(images);

        x = self.maxpool.forward(relu(self.bn1.forward(self.conv1.forward(x))));
        for block in self
            .layer1
            .iter()
            .chain(&self.layer2)
            .chain(&self.layer3)
            .chain(&self.layer4)
        {
            x = block.forward(x);
        }

        let [batch, channels, _, _] = x.dims();
        x.mean_dim(3).mean_dim(2).reshape([batch, channels])
    }

    /// Logits and embedding for a batch of images
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let embedding = self.embed(images);
        let logits = self.fc.forward(embedding.clone());
        (logits, embedding)
    }

    fn normalize(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let device = images.device();
        let shape = [1, CHANNELS, 1, 1];
        let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape(shape);
        let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape(shape);

        (0..self.input_normalizations).fold(images, |x, _| (x - mean.clone()) / std.clone())
    }
}
