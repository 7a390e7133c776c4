//! Conditional guide model for image inputs.
//!
//! An external encoder turns the image into a feature vector `h` of width
//! `w`, which gates the concatenated targets before the inner linear guide
//! model sees them:
//!
//! ```text
//! h     = Softplus(BN(γ[t] · Linear(BN(encoder(x)))))        [B, w]
//! fused = [y_t | ŷ_0] * [h | h]                               [B, 2w]
//! ε     = guide(x = None, y_t = fused, ŷ_0 = None, t)
//! ```

use candle_core::{D, ModuleT, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::activation::Activation;
use super::conditional::ConditionalLinear;
use super::guided::{ConditionalGuidedLinearModel, GuidedModel};
use super::sequential::DiffusionSequential;
use crate::{Error, Result};

/// Feature extractor whose output width is known up front.
pub trait FeatureEncoder: ModuleT {
    /// Width of the encoded feature vector.
    fn out_features(&self) -> usize;
}

impl FeatureEncoder for nn::Linear {
    fn out_features(&self) -> usize {
        self.weight().dims()[0]
    }
}

/// Guide model wrapping an encoder and an inner [`ConditionalGuidedLinearModel`].
#[derive(Debug, Clone)]
pub struct ConditionalGuidedConvModel<E> {
    encoder: E,
    norm: nn::BatchNorm,
    connect: DiffusionSequential,
    guide: ConditionalGuidedLinearModel,
    n_steps: usize,
}

impl<E: FeatureEncoder> ConditionalGuidedConvModel<E> {
    /// Wire `encoder` to `guide`.
    ///
    /// The guide must not concatenate `x` or `y_0_hat` itself, and its
    /// `y_dim` must be twice the encoder width.
    pub fn new(encoder: E, guide: ConditionalGuidedLinearModel, vb: VarBuilder) -> Result<Self> {
        if guide.cat_x() {
            return Err(Error::Config(
                "guide model must not concatenate x (cat_x = true)".into(),
            ));
        }
        if guide.cat_y_pred() {
            return Err(Error::Config(
                "guide model must not concatenate y_0_hat (cat_y_pred = true)".into(),
            ));
        }
        let width = encoder.out_features();
        if guide.y_dim() != 2 * width {
            return Err(Error::Config(format!(
                "guide y_dim ({}) must be twice the encoder output width ({width})",
                guide.y_dim()
            )));
        }

        let n_steps = guide.n_steps();
        let norm = nn::batch_norm(width, nn::BatchNormConfig::default(), vb.pp("norm"))?;
        let connect = DiffusionSequential::new()
            .add(ConditionalLinear::new(
                width,
                width,
                n_steps,
                vb.pp("connect_module.0"),
            )?)
            .add(nn::batch_norm(
                width,
                nn::BatchNormConfig::default(),
                vb.pp("connect_module.1"),
            )?)
            .add(Activation::Softplus);

        tracing::info!(
            encoder_width = width,
            n_steps,
            "built conditional guided conv model"
        );

        Ok(Self {
            encoder,
            norm,
            connect,
            guide,
            n_steps,
        })
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn guide(&self) -> &ConditionalGuidedLinearModel {
        &self.guide
    }

    /// `[y_t | ŷ_0] * [h | h]`, the `[B, 2w]` input handed to the inner guide.
    fn fused_input(
        &self,
        x: &Tensor,
        y_t: &Tensor,
        y_0_hat: &Tensor,
        t: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let h = self.encoder.forward_t(x, train)?;
        let h = self.norm.forward_t(&h, train)?;
        let h = self.connect.forward_t(&h, t, train)?;

        let y = Tensor::cat(&[y_t, y_0_hat], D::Minus1)?;
        let gate = Tensor::cat(&[&h, &h], D::Minus1)?;
        Ok((y * gate)?)
    }
}

impl<E: FeatureEncoder> GuidedModel for ConditionalGuidedConvModel<E> {
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
        let x = x.ok_or(Error::MissingInput("x (image input to the encoder)"))?;
        let y_0_hat = y_0_hat.ok_or(Error::MissingInput("y_0_hat"))?;
        let fused = self.fused_input(x, y_t, y_0_hat, t, train)?;
        self.guide.forward_t(None, &fused, None, t, train)
    }
}
