//! Configuration for the CARDS noise scheduler and guide models.
//!
//! Defaults match the regression setup: 1000 linear steps from `1e-5` to
//! `1e-2`, two hidden gated layers of width 64 and a softplus activation.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::activation::Activation;
use crate::scheduler::ScheduleKind;
use crate::{Error, Result};

/// Noise schedule parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseSchedulerConfig {
    /// Beta generator (default: linear).
    #[serde(default)]
    pub schedule: ScheduleKind,

    /// Number of diffusion steps (default: 1000).
    #[serde(default = "default_n_steps")]
    pub n_steps: usize,

    /// First beta value (default: 1e-5).
    #[serde(default = "default_beta_start")]
    pub beta_start: f64,

    /// Last beta value (default: 1e-2).
    #[serde(default = "default_beta_end")]
    pub beta_end: f64,
}

impl Default for NoiseSchedulerConfig {
    fn default() -> Self {
        Self {
            schedule: ScheduleKind::default(),
            n_steps: default_n_steps(),
            beta_start: default_beta_start(),
            beta_end: default_beta_end(),
        }
    }
}

/// Guide model shape and conditioning flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidedModelConfig {
    /// Feature dimension of the input `x`.
    pub x_dim: usize,

    /// Output dimension of the conditional mean model (width of `y_t` and `y_0_hat`).
    pub y_dim: usize,

    /// Widths of the gated hidden layers.
    #[serde(default = "default_n_hidden")]
    pub n_hidden: Vec<usize>,

    /// Width of the final, ungated output layer.
    #[serde(default = "default_n_outputs")]
    pub n_outputs: usize,

    /// Concatenate `x` into every step's input.
    #[serde(default)]
    pub cat_x: bool,

    /// Concatenate `y_0_hat` into every step's input.
    #[serde(default)]
    pub cat_y_pred: bool,

    /// Activation between gated layers.
    #[serde(default)]
    pub activation: Activation,
}

impl Default for GuidedModelConfig {
    fn default() -> Self {
        Self {
            x_dim: 1,
            y_dim: 1,
            n_hidden: default_n_hidden(),
            n_outputs: default_n_outputs(),
            cat_x: false,
            cat_y_pred: false,
            activation: Activation::default(),
        }
    }
}

impl GuidedModelConfig {
    /// Input width of the first gated layer.
    ///
    /// `y_dim + (x_dim if cat_x) + (y_dim if cat_y_pred)`
    pub fn data_dim(&self) -> usize {
        let mut dim = self.y_dim;
        if self.cat_x {
            dim += self.x_dim;
        }
        if self.cat_y_pred {
            dim += self.y_dim;
        }
        dim
    }

    pub fn validate(&self) -> Result<()> {
        if self.y_dim == 0 {
            return Err(Error::Config("y_dim must be positive".into()));
        }
        if self.cat_x && self.x_dim == 0 {
            return Err(Error::Config("cat_x requires a positive x_dim".into()));
        }
        if self.n_outputs == 0 {
            return Err(Error::Config("n_outputs must be positive".into()));
        }
        if let Some(idx) = self.n_hidden.iter().position(|&w| w == 0) {
            return Err(Error::Config(format!("hidden layer {idx} has zero width")));
        }
        Ok(())
    }
}

/// Scheduler plus guide model, as stored in a JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardsConfig {
    #[serde(default)]
    pub scheduler: NoiseSchedulerConfig,
    #[serde(default)]
    pub guide: GuidedModelConfig,
}

impl CardsConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.guide.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

fn default_n_steps() -> usize {
    1000
}

fn default_beta_start() -> f64 {
    1e-5
}

fn default_beta_end() -> f64 {
    1e-2
}

fn default_n_hidden() -> Vec<usize> {
    vec![64, 64]
}

fn default_n_outputs() -> usize {
    1
}
