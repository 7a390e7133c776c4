//! Activation functions usable between gated layers.

use candle_core::{Module, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Elementwise activation selected by the guide model config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// `log(1 + exp(x))`
    #[default]
    Softplus,
    Relu,
    Silu,
    Gelu,
    Sigmoid,
    Tanh,
}

/// Numerically stable softplus: `relu(x) + log(1 + exp(-|x|))`.
pub fn softplus(xs: &Tensor) -> Result<Tensor> {
    let tail = (xs.abs()?.neg()?.exp()? + 1.0)?.log()?;
    xs.relu()? + tail
}

impl Module for Activation {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Softplus => softplus(xs),
            Self::Relu => xs.relu(),
            Self::Silu => xs.silu(),
            Self::Gelu => xs.gelu(),
            Self::Sigmoid => candle_nn::ops::sigmoid(xs),
            Self::Tanh => xs.tanh(),
        }
    }
}
