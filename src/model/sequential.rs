//! Ordered layer pipeline mixing gated and ungated stages.
//!
//! Gated stages consume the step indices; everything else sees only the
//! running activation.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn as nn;

use super::activation::Activation;
use super::conditional::ConditionalLinear;

/// One pipeline stage.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Step-gated linear layer.
    Gated(ConditionalLinear),
    /// Plain linear layer.
    Linear(nn::Linear),
    Activation(Activation),
    /// Batch normalization; running statistics update in train mode only.
    BatchNorm(nn::BatchNorm),
}

impl Stage {
    /// Whether this stage needs the step indices.
    pub fn requires_step(&self) -> bool {
        matches!(self, Self::Gated(_))
    }

    pub fn forward_t(&self, xs: &Tensor, t: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Gated(layer) => layer.forward(xs, t),
            Self::Linear(layer) => layer.forward(xs),
            Self::Activation(act) => act.forward(xs),
            Self::BatchNorm(norm) => norm.forward_t(xs, train),
        }
    }
}

impl From<ConditionalLinear> for Stage {
    fn from(layer: ConditionalLinear) -> Self {
        Self::Gated(layer)
    }
}

impl From<nn::Linear> for Stage {
    fn from(layer: nn::Linear) -> Self {
        Self::Linear(layer)
    }
}

impl From<Activation> for Stage {
    fn from(act: Activation) -> Self {
        Self::Activation(act)
    }
}

impl From<nn::BatchNorm> for Stage {
    fn from(norm: nn::BatchNorm) -> Self {
        Self::BatchNorm(norm)
    }
}

/// Sequential container that threads step indices to gated stages.
#[derive(Debug, Clone, Default)]
pub struct DiffusionSequential {
    stages: Vec<Stage>,
}

impl DiffusionSequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage (builder style).
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, stage: impl Into<Stage>) -> Self {
        self.stages.push(stage.into());
        self
    }

    pub fn push(&mut self, stage: impl Into<Stage>) {
        self.stages.push(stage.into());
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage in order.
    ///
    /// - `xs`: `[B, F]` input
    /// - `t`: `[B]` step indices, forwarded to gated stages only
    pub fn forward_t(&self, xs: &Tensor, t: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for stage in &self.stages {
            xs = stage.forward_t(&xs, t, train)?;
        }
        Ok(xs)
    }

    /// Eval-mode forward.
    pub fn forward(&self, xs: &Tensor, t: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, t, false)
    }
}
