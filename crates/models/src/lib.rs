//! Burn ML models for tumor tile classification.
//!
//! This crate defines the network used for transfer learning on tile images:
//! - `Backbone`: inception-style convolutional feature extractor (stem plus a
//!   stack of mixed blocks with parallel 1x1 / 3x3 / pooled branches).
//! - `Head`: global average pooling into a dense classification head.
//! - `TileClassifier`: backbone + head with a configurable frozen prefix for
//!   the head-only training phase.
//!
//! These are pure Burn Modules with no awareness of datasets or checkpoints.
//! The `training` crate wires them into the two-phase schedule.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Which parameters receive gradients during a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierPhase {
    /// Gradients stop at the frozen-prefix boundary; only the tail blocks and
    /// the head train.
    HeadOnly,
    /// Every layer trains.
    Full,
}

#[derive(Debug, Clone)]
pub struct TileClassifierConfig {
    pub num_classes: usize,
    /// Width of the dense layer between pooling and the class logits.
    pub hidden: usize,
    pub dropout: f64,
    pub stem_channels: usize,
    /// Output width of each mixed block, in order. Widths must be divisible
    /// by 4 (branch split).
    pub block_widths: Vec<usize>,
    /// Mixed blocks (counted after the stem) whose gradients are stopped in
    /// the head-only phase. The stem is always part of the frozen prefix.
    pub frozen_blocks: usize,
}

impl Default for TileClassifierConfig {
    fn default() -> Self {
        Self {
            num_classes: 2,
            hidden: 1024,
            dropout: 0.2,
            stem_channels: 64,
            block_widths: vec![128, 192, 288, 384],
            frozen_blocks: 3,
        }
    }
}

#[derive(Debug, Module)]
pub struct Stem<B: Backend> {
    conv1: Conv2d<B>,
    bn1: nn::BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: nn::BatchNorm<B, 2>,
    pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    pub fn new(out_channels: usize, device: &B::Device) -> Self {
        let mid = (out_channels / 2).max(1);
        let conv1 = Conv2dConfig::new([3, mid], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn1 = nn::BatchNormConfig::new(mid).init(device);
        let conv2 = Conv2dConfig::new([mid, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let bn2 = nn::BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();
        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            pool,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.bn1.forward(self.conv1.forward(input)));
        let x = relu(self.bn2.forward(self.conv2.forward(x)));
        self.pool.forward(x)
    }
}

/// Mixed block: parallel 1x1, 3x3 (with 1x1 reduce), and pooled-projection
/// branches, concatenated along channels.
#[derive(Debug, Module)]
pub struct MixedBlock<B: Backend> {
    branch1x1: Conv2d<B>,
    branch3x3_reduce: Conv2d<B>,
    branch3x3: Conv2d<B>,
    branch_pool: MaxPool2d,
    branch_pool_proj: Conv2d<B>,
    bn: nn::BatchNorm<B, 2>,
}

impl<B: Backend> MixedBlock<B> {
    pub fn new(in_channels: usize, width: usize, device: &B::Device) -> Self {
        assert!(width % 4 == 0, "mixed block width must be divisible by 4");
        let quarter = width / 4;
        let half = width / 2;
        let branch1x1 = Conv2dConfig::new([in_channels, quarter], [1, 1]).init(device);
        let branch3x3_reduce = Conv2dConfig::new([in_channels, half], [1, 1]).init(device);
        let branch3x3 = Conv2dConfig::new([half, half], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let branch_pool = MaxPool2dConfig::new([3, 3])
            .with_strides([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();
        let branch_pool_proj = Conv2dConfig::new([in_channels, quarter], [1, 1]).init(device);
        let bn = nn::BatchNormConfig::new(width).init(device);
        Self {
            branch1x1,
            branch3x3_reduce,
            branch3x3,
            branch_pool,
            branch_pool_proj,
            bn,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let b1 = self.branch1x1.forward(input.clone());
        let b3 = self
            .branch3x3
            .forward(relu(self.branch3x3_reduce.forward(input.clone())));
        let bp = self.branch_pool_proj.forward(self.branch_pool.forward(input));
        let out = Tensor::cat(vec![b1, b3, bp], 1);
        relu(self.bn.forward(out))
    }
}

#[derive(Debug, Module)]
pub struct Backbone<B: Backend> {
    stem: Stem<B>,
    blocks: Vec<MixedBlock<B>>,
}

impl<B: Backend> Backbone<B> {
    pub fn new(cfg: &TileClassifierConfig, device: &B::Device) -> Self {
        let stem = Stem::new(cfg.stem_channels, device);
        let mut blocks = Vec::with_capacity(cfg.block_widths.len());
        let mut in_channels = cfg.stem_channels;
        for &width in &cfg.block_widths {
            blocks.push(MixedBlock::new(in_channels, width, device));
            in_channels = width;
        }
        Self { stem, blocks }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Feature forward pass. When `frozen_prefix` is given, the gradient is
    /// stopped after the stem plus that many blocks; layers before the
    /// boundary keep their weights for the step.
    pub fn forward(&self, input: Tensor<B, 4>, frozen_prefix: Option<usize>) -> Tensor<B, 4> {
        let boundary = frozen_prefix.map(|n| n.min(self.blocks.len()));
        let mut x = self.stem.forward(input);
        if boundary == Some(0) {
            x = x.detach();
        }
        for (i, block) in self.blocks.iter().enumerate() {
            x = block.forward(x);
            if boundary == Some(i + 1) {
                x = x.detach();
            }
        }
        x
    }
}

#[derive(Debug, Module)]
pub struct Head<B: Backend> {
    pool: AdaptiveAvgPool2d,
    fc1: nn::Linear<B>,
    dropout: nn::Dropout,
    fc2: nn::Linear<B>,
}

impl<B: Backend> Head<B> {
    pub fn new(cfg: &TileClassifierConfig, device: &B::Device) -> Self {
        let features = cfg.block_widths.last().copied().unwrap_or(cfg.stem_channels);
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let fc1 = nn::LinearConfig::new(features, cfg.hidden).init(device);
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let fc2 = nn::LinearConfig::new(cfg.hidden, cfg.num_classes).init(device);
        Self {
            pool,
            fc1,
            dropout,
            fc2,
        }
    }

    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, _, _] = features.dims();
        let x = self.pool.forward(features).reshape([batch, channels]);
        let x = relu(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

#[derive(Debug, Module)]
pub struct TileClassifier<B: Backend> {
    backbone: Backbone<B>,
    head: Head<B>,
    frozen_blocks: usize,
    num_classes: usize,
}

impl<B: Backend> TileClassifier<B> {
    pub fn new(cfg: &TileClassifierConfig, device: &B::Device) -> Self {
        let backbone = Backbone::new(cfg, device);
        let head = Head::new(cfg, device);
        Self {
            backbone,
            head,
            frozen_blocks: cfg.frozen_blocks.min(cfg.block_widths.len()),
            num_classes: cfg.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Replace the randomly initialized backbone with pretrained weights.
    pub fn with_backbone(mut self, backbone: Backbone<B>) -> Self {
        self.backbone = backbone;
        self
    }

    /// Logits of shape [batch, num_classes].
    pub fn forward(&self, input: Tensor<B, 4>, phase: ClassifierPhase) -> Tensor<B, 2> {
        let frozen = match phase {
            ClassifierPhase::HeadOnly => Some(self.frozen_blocks),
            ClassifierPhase::Full => None,
        };
        let features = self.backbone.forward(input, frozen);
        self.head.forward(features)
    }

    /// Class probabilities (softmax over logits).
    pub fn forward_probs(&self, input: Tensor<B, 4>, phase: ClassifierPhase) -> Tensor<B, 2> {
        softmax(self.forward(input, phase), 1)
    }
}

pub mod prelude {
    pub use super::{
        Backbone, ClassifierPhase, Head, MixedBlock, Stem, TileClassifier, TileClassifierConfig,
    };
}
