//! CARDS conditional diffusion components in pure Rust.
//!
//! A candle-based implementation of the building blocks used by CARDS
//! (Classification And Regression Diffusion) for uncertainty
//! quantification: the noise schedules and the step-gated guide networks
//! that predict the denoising residual from `(x, y_t, ŷ_0, t)`.
//!
//! ## Architecture
//!
//! ```text
//! NoiseScheduler ── betas, ᾱ, sqrt(ᾱ), sqrt(1-ᾱ) ──┐
//!                                                    ├→ CardsDiffusion
//! guide model ε_θ(x, y_t, ŷ_0, t) ──────────────────┘   (q_sample, loss, p_sample_loop)
//!   ├─ ConditionalGuidedLinearModel   (gated MLP)
//!   └─ ConditionalGuidedConvModel     (encoder → gated fusion → gated MLP)
//! ```
//!
//! ## Modules
//!
//! - [`scheduler`] — beta schedules and step lookup
//! - [`model`] — gated layers, layer pipeline, guide models
//! - [`diffusion`] — forward noising, training loss, reverse sampling
//! - [`config`] — serde configuration

pub mod config;
pub mod diffusion;
pub mod model;
pub mod scheduler;

mod error;

pub use diffusion::CardsDiffusion;
pub use error::{Error, Result};
pub use scheduler::{NoiseScheduler, ScheduleKind};
