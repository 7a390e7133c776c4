//! Conditional guided linear model.
//!
//! Predicts the noise residual ε_θ(x, y_t, ŷ_0, t) with a stack of step-gated
//! layers:
//!
//! ```text
//! [y_t | ŷ_0? | x?] → (ConditionalLinear → act) × len(n_hidden) → Linear(n_outputs)
//! ```

use candle_core::{D, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::conditional::ConditionalLinear;
use super::sequential::DiffusionSequential;
use crate::config::GuidedModelConfig;
use crate::{Error, Result};

/// Common interface for noise-predicting guide models.
pub trait GuidedModel {
    /// Number of diffusion steps the gate tables cover.
    fn n_steps(&self) -> usize;

    /// Predict the noise residual.
    ///
    /// - `x`: input features (ignored unless the model consumes them)
    /// - `y_t`: noisy target `[B, y_dim]`
    /// - `y_0_hat`: conditional mean prediction `[B, y_dim]`
    /// - `t`: step indices `[B]` or `[1]`
    /// - `train`: whether normalization layers use batch statistics
    fn forward_t(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: Option<&Tensor>,
        t: &Tensor,
        train: bool,
    ) -> Result<Tensor>;

    /// Eval-mode forward.
    fn forward(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: Option<&Tensor>,
        t: &Tensor,
    ) -> Result<Tensor> {
        self.forward_t(x, y_t, y_0_hat, t, false)
    }
}

/// Feed-forward guide model with step-gated hidden layers.
#[derive(Debug, Clone)]
pub struct ConditionalGuidedLinearModel {
    config: GuidedModelConfig,
    n_steps: usize,
    model: DiffusionSequential,
}

impl ConditionalGuidedLinearModel {
    pub fn new(n_steps: usize, config: &GuidedModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let mut layer_sizes = vec![config.data_dim()];
        layer_sizes.extend_from_slice(&config.n_hidden);

        let vb = vb.pp("model");
        let mut model = DiffusionSequential::new();
        for (idx, pair) in layer_sizes.windows(2).enumerate() {
            let layer = ConditionalLinear::new(pair[0], pair[1], n_steps, vb.pp(2 * idx))?;
            model.push(layer);
            model.push(config.activation);
        }
        // Final output layer is a standard, ungated linear layer.
        let last = *layer_sizes.last().unwrap_or(&config.data_dim());
        model.push(nn::linear(last, config.n_outputs, vb.pp(model.len()))?);

        tracing::info!(
            n_steps,
            data_dim = config.data_dim(),
            hidden = ?config.n_hidden,
            n_outputs = config.n_outputs,
            cat_x = config.cat_x,
            cat_y_pred = config.cat_y_pred,
            "built conditional guided linear model"
        );

        Ok(Self {
            config: config.clone(),
            n_steps,
            model,
        })
    }

    pub fn config(&self) -> &GuidedModelConfig {
        &self.config
    }

    pub fn cat_x(&self) -> bool {
        self.config.cat_x
    }

    pub fn cat_y_pred(&self) -> bool {
        self.config.cat_y_pred
    }

    pub fn y_dim(&self) -> usize {
        self.config.y_dim
    }

    /// Assemble `[y_t, y_0_hat, x]` from the enabled components.
    fn step_input(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: Option<&Tensor>,
    ) -> Result<Tensor> {
        let mut parts = vec![y_t];
        if self.config.cat_y_pred {
            parts.push(y_0_hat.ok_or(Error::MissingInput("y_0_hat (cat_y_pred is set)"))?);
        }
        if self.config.cat_x {
            parts.push(x.ok_or(Error::MissingInput("x (cat_x is set)"))?);
        }
        if parts.len() == 1 {
            return Ok(y_t.clone());
        }
        Ok(Tensor::cat(&parts, D::Minus1)?)
    }
}

impl GuidedModel for ConditionalGuidedLinearModel {
    fn n_steps(&self) -> usize {
        self.n_steps
    }

    fn forward_t(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: Option<&Tensor>,
        t: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let eps_input = self.step_input(x, y_t, y_0_hat)?;
        Ok(self.model.forward_t(&eps_input, t, train)?)
    }
}
