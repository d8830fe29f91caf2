//! Burn image classifiers for adversarial sample reweighting.
//!
//! A single factory, [`build_network`], produces both networks of a training run:
//! - the primary classifier (`num_outputs = num_classes`, raw logits),
//! - the weighting network (`num_outputs = 1`, sigmoid head, one weight per sample).
//!
//! These are plain Burn modules; the `training` crate couples them through one optimizer.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Architecture family selectable from the command line.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetKind {
    /// Two hidden dense layers over the flattened image.
    Mlp,
    /// Two conv/pool stages followed by global average pooling.
    Cnn,
    /// Four conv/pool stages (VGG-style widths) and a dense layer.
    Vgg,
}

impl NetKind {
    pub fn name(&self) -> &'static str {
        match self {
            NetKind::Mlp => "mlp",
            NetKind::Cnn => "cnn",
            NetKind::Vgg => "vgg",
        }
    }

    fn conv_channels(&self) -> &'static [usize] {
        match self {
            NetKind::Mlp => &[],
            NetKind::Cnn => &[32, 64],
            NetKind::Vgg => &[64, 128, 256, 512],
        }
    }

    fn hidden_widths(&self) -> &'static [usize] {
        match self {
            NetKind::Mlp => &[512, 256],
            NetKind::Cnn => &[],
            NetKind::Vgg => &[512],
        }
    }
}

impl std::fmt::Display for NetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub kind: NetKind,
    pub num_outputs: usize,
    /// Squash every output through a sigmoid (weighting network head).
    pub sigmoid_head: bool,
    pub in_channels: usize,
    /// Square input side length in pixels.
    pub image_size: usize,
}

impl NetworkConfig {
    /// Primary classifier producing `num_classes` logits for 3x32x32 inputs.
    pub fn classifier(kind: NetKind, num_classes: usize) -> Self {
        Self {
            kind,
            num_outputs: num_classes,
            sigmoid_head: false,
            in_channels: 3,
            image_size: 32,
        }
    }

    /// Weighting network: one sigmoid output per sample.
    pub fn weighting(kind: NetKind) -> Self {
        Self {
            kind,
            num_outputs: 1,
            sigmoid_head: true,
            in_channels: 3,
            image_size: 32,
        }
    }

    pub fn with_input(mut self, in_channels: usize, image_size: usize) -> Self {
        self.in_channels = in_channels;
        self.image_size = image_size;
        self
    }
}

#[derive(Debug, Module)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.conv.forward(input));
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

#[derive(Debug, Module)]
pub struct Network<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    gap: AdaptiveAvgPool2d,
    hidden: Vec<nn::Linear<B>>,
    /// Final dense layer; its gradients are reported every training step.
    pub head: nn::Linear<B>,
    sigmoid_head: bool,
}

/// Flattened copy of one parameter tensor, named `<layer>/<attr>`.
#[derive(Debug, Clone)]
pub struct ParamSnapshot {
    pub layer: String,
    pub attr: &'static str,
    pub values: Vec<f32>,
}

impl ParamSnapshot {
    pub fn tag(&self) -> String {
        format!("{}/{}", self.layer, self.attr)
    }
}

/// Build a network for `cfg` on `device`.
///
/// Max-pooling stops once the feature map is a single pixel, so small inputs work with
/// every [`NetKind`].
pub fn build_network<B: Backend>(cfg: &NetworkConfig, device: &B::Device) -> Network<B> {
    let mut blocks = Vec::new();
    let mut channels = cfg.in_channels;
    let mut side = cfg.image_size;
    for &out in cfg.kind.conv_channels() {
        let conv = Conv2dConfig::new([channels, out], [3, 3])
            .with_padding(nn::PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = if side >= 2 {
            side /= 2;
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };
        blocks.push(ConvBlock { conv, pool });
        channels = out;
    }

    let mut features = if blocks.is_empty() {
        cfg.in_channels * cfg.image_size * cfg.image_size
    } else {
        channels
    };
    let mut hidden = Vec::new();
    for &width in cfg.kind.hidden_widths() {
        hidden.push(nn::LinearConfig::new(features, width).init(device));
        features = width;
    }
    let head = nn::LinearConfig::new(features, cfg.num_outputs.max(1)).init(device);

    Network {
        blocks,
        gap: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        hidden,
        head,
        sigmoid_head: cfg.sigmoid_head,
    }
}

impl<B: Backend> Network<B> {
    /// Map `[B, C, H, W]` images to `[B, num_outputs]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = if self.blocks.is_empty() {
            images.flatten::<2>(1, 3)
        } else {
            let mut x = images;
            for block in &self.blocks {
                x = block.forward(x);
            }
            self.gap.forward(x).flatten::<2>(1, 3)
        };
        for layer in &self.hidden {
            x = relu(layer.forward(x));
        }
        let out = self.head.forward(x);
        if self.sigmoid_head {
            sigmoid(out)
        } else {
            out
        }
    }

    /// Snapshot every parameter in declaration order.
    pub fn parameter_snapshots(&self) -> Vec<ParamSnapshot> {
        let mut out = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            push_linear_like(
                &mut out,
                format!("blocks.{i}.conv"),
                block.conv.weight.val(),
                block.conv.bias.as_ref().map(|b| b.val()),
            );
        }
        for (i, layer) in self.hidden.iter().enumerate() {
            push_linear_like(
                &mut out,
                format!("hidden.{i}"),
                layer.weight.val(),
                layer.bias.as_ref().map(|b| b.val()),
            );
        }
        push_linear_like(
            &mut out,
            "head".to_string(),
            self.head.weight.val(),
            self.head.bias.as_ref().map(|b| b.val()),
        );
        out
    }
}

fn push_linear_like<B: Backend, const D: usize>(
    out: &mut Vec<ParamSnapshot>,
    layer: String,
    weight: Tensor<B, D>,
    bias: Option<Tensor<B, 1>>,
) {
    out.push(ParamSnapshot {
        layer: layer.clone(),
        attr: "weight",
        values: flat_values(weight),
    });
    if let Some(bias) = bias {
        out.push(ParamSnapshot {
            layer,
            attr: "bias",
            values: flat_values(bias),
        });
    }
}

fn flat_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default()
}

pub mod prelude {
    pub use super::{build_network, NetKind, Network, NetworkConfig, ParamSnapshot};
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    fn images(batch: usize, side: usize) -> Tensor<B, 4> {
        let device = Default::default();
        Tensor::<B, 4>::random([batch, 3, side, side], Distribution::Default, &device)
    }

    #[test]
    fn every_kind_produces_one_row_per_sample() {
        let device = Default::default();
        for kind in [NetKind::Mlp, NetKind::Cnn, NetKind::Vgg] {
            let cfg = NetworkConfig::classifier(kind, 5).with_input(3, 8);
            let net = build_network::<B>(&cfg, &device);
            let out = net.forward(images(3, 8));
            assert_eq!(out.dims(), [3, 5], "kind {kind}");
        }
    }

    #[test]
    fn weighting_head_stays_inside_unit_interval() {
        let device = Default::default();
        let cfg = NetworkConfig::weighting(NetKind::Cnn).with_input(3, 8);
        let net = build_network::<B>(&cfg, &device);
        let out = net.forward(images(6, 8) * 50.0);
        assert_eq!(out.dims(), [6, 1]);
        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn snapshots_name_layers_and_attrs() {
        let device = Default::default();
        let cfg = NetworkConfig::classifier(NetKind::Cnn, 4).with_input(3, 8);
        let net = build_network::<B>(&cfg, &device);
        let tags: Vec<String> = net.parameter_snapshots().iter().map(|p| p.tag()).collect();
        assert_eq!(
            tags,
            vec![
                "blocks.0.conv/weight",
                "blocks.0.conv/bias",
                "blocks.1.conv/weight",
                "blocks.1.conv/bias",
                "head/weight",
                "head/bias",
            ]
        );
        let head = net
            .parameter_snapshots()
            .into_iter()
            .find(|p| p.tag() == "head/weight")
            .unwrap();
        assert_eq!(head.values.len(), 64 * 4);
    }
}
