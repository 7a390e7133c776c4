//! Guide model components for CARDS.
//!
//! ## Components
//!
//! - [`conditional`] — step-gated linear layer
//! - [`sequential`] — pipeline dispatching step indices to gated stages
//! - [`guided`] — linear guide model and the [`guided::GuidedModel`] trait
//! - [`conv`] — encoder-fronted guide model for image inputs
//! - [`activation`] — activations selectable from config

pub mod activation;
pub mod conditional;
pub mod conv;
pub mod guided;
pub mod sequential;

pub use activation::Activation;
pub use conditional::ConditionalLinear;
pub use conv::{ConditionalGuidedConvModel, FeatureEncoder};
pub use guided::{ConditionalGuidedLinearModel, GuidedModel};
pub use sequential::{DiffusionSequential, Stage};
