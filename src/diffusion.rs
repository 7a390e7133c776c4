//! CARDS forward noising, training loss and ancestral sampling.
//!
//! The forward process drifts towards the conditional mean prediction ŷ_0
//! rather than towards zero:
//!
//! ```text
//! y_t = sqrt(ᾱ_t)·y_0 + (1 - sqrt(ᾱ_t))·ŷ_0 + sqrt(1 - ᾱ_t)·ε
//! ```
//!
//! Reverse steps use the closed-form posterior q(y_{t-1} | y_t, y_0, ŷ_0)
//! with y_0 reparameterised from the guide model's noise estimate.

use candle_core::{DType, Tensor};

use crate::model::guided::GuidedModel;
use crate::scheduler::NoiseScheduler;
use crate::{Error, Result};

/// Scheduler and guide model paired for training and sampling.
#[derive(Debug, Clone)]
pub struct CardsDiffusion<M> {
    scheduler: NoiseScheduler,
    model: M,
}

/// Per-step scalars of the reverse posterior.
#[derive(Debug, Clone, Copy)]
struct StepCoefficients {
    alpha_t: f64,
    sqrt_alpha_bar_t: f64,
    sqrt_one_minus_alpha_bar_t: f64,
    sqrt_alpha_bar_prev: f64,
    sqrt_one_minus_alpha_bar_prev: f64,
}

impl StepCoefficients {
    /// `(γ0, γ1, γ2)` weighting `(y_0, y_t, ŷ_0)` in the posterior mean.
    fn gammas(&self) -> (f64, f64, f64) {
        let one_minus_ab_t = self.sqrt_one_minus_alpha_bar_t.powi(2);
        let one_minus_ab_prev = self.sqrt_one_minus_alpha_bar_prev.powi(2);
        let sqrt_alpha_t = self.alpha_t.sqrt();
        let gamma_0 = (1.0 - self.alpha_t) * self.sqrt_alpha_bar_prev / one_minus_ab_t;
        let gamma_1 = one_minus_ab_prev * sqrt_alpha_t / one_minus_ab_t;
        let gamma_2 = 1.0
            + (self.sqrt_alpha_bar_t - 1.0) * (sqrt_alpha_t + self.sqrt_alpha_bar_prev)
                / one_minus_ab_t;
        (gamma_0, gamma_1, gamma_2)
    }

    /// Posterior variance `(1 - ᾱ_{t-1}) / (1 - ᾱ_t) · (1 - α_t)`.
    fn variance(&self) -> f64 {
        self.sqrt_one_minus_alpha_bar_prev.powi(2) / self.sqrt_one_minus_alpha_bar_t.powi(2)
            * (1.0 - self.alpha_t)
    }
}

fn scalar_at(sequence: &Tensor, t: usize) -> Result<f64> {
    Ok(sequence.get(t)?.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

fn step_tensor(t: usize, like: &Tensor) -> Result<Tensor> {
    Ok(Tensor::new(&[t as u32], like.device())?)
}

impl<M: GuidedModel> CardsDiffusion<M> {
    pub fn new(scheduler: NoiseScheduler, model: M) -> Result<Self> {
        if scheduler.n_steps() != model.n_steps() {
            return Err(Error::Config(format!(
                "scheduler has {} steps but the guide model gates {} steps",
                scheduler.n_steps(),
                model.n_steps()
            )));
        }
        Ok(Self { scheduler, model })
    }

    pub fn scheduler(&self) -> &NoiseScheduler {
        &self.scheduler
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn n_steps(&self) -> usize {
        self.scheduler.n_steps()
    }

    /// Noise-estimation loss `mean((ε - ε_θ(x, y_t, ŷ_0, t))²)` in train mode.
    ///
    /// - `y_0`: clean targets `[B, y_dim]`
    /// - `y_0_hat`: conditional mean predictions `[B, y_dim]`
    /// - `t`: step indices `[B]`
    pub fn noise_estimation_loss(
        &self,
        x: Option<&Tensor>,
        y_0: &Tensor,
        y_0_hat: &Tensor,
        t: &Tensor,
    ) -> Result<Tensor> {
        let noise = y_0.randn_like(0.0, 1.0)?;
        self.loss_with_noise(x, y_0, y_0_hat, t, &noise)
    }

    fn loss_with_noise(
        &self,
        x: Option<&Tensor>,
        y_0: &Tensor,
        y_0_hat: &Tensor,
        t: &Tensor,
        noise: &Tensor,
    ) -> Result<Tensor> {
        let y_t = self.scheduler.q_sample(y_0, y_0_hat, t, noise)?;
        let output = self.model.forward_t(x, &y_t, Some(y_0_hat), t, true)?;
        let loss = (noise - output)?.sqr()?.mean_all()?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let value = loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            tracing::debug!(loss = value, "noise estimation loss");
        }
        Ok(loss)
    }

    fn coefficients(&self, t: usize) -> Result<StepCoefficients> {
        let s = &self.scheduler;
        Ok(StepCoefficients {
            alpha_t: scalar_at(s.alphas(), t)?,
            sqrt_alpha_bar_t: scalar_at(s.alphas_bar_sqrt(), t)?,
            sqrt_one_minus_alpha_bar_t: scalar_at(s.one_minus_alphas_bar_sqrt(), t)?,
            sqrt_alpha_bar_prev: scalar_at(s.alphas_bar_sqrt(), t - 1)?,
            sqrt_one_minus_alpha_bar_prev: scalar_at(s.one_minus_alphas_bar_sqrt(), t - 1)?,
        })
    }

    /// `y_0 = (y_t - (1 - sqrt(ᾱ_t))·ŷ_T - sqrt(1 - ᾱ_t)·ε_θ) / sqrt(ᾱ_t)`
    fn reparameterize(
        y_t: &Tensor,
        y_t_mean: &Tensor,
        eps_theta: &Tensor,
        sqrt_alpha_bar_t: f64,
        sqrt_one_minus_alpha_bar_t: f64,
    ) -> Result<Tensor> {
        let drift = y_t_mean.affine(1.0 - sqrt_alpha_bar_t, 0.0)?;
        let noise = eps_theta.affine(sqrt_one_minus_alpha_bar_t, 0.0)?;
        Ok(((y_t - drift)? - noise)?.affine(1.0 / sqrt_alpha_bar_t, 0.0)?)
    }

    fn validate_step(&self, t: usize) -> Result<()> {
        if t == 0 || t >= self.n_steps() {
            return Err(Error::InvalidArgument(format!(
                "p_sample step must be in [1, {}), got {t}; use p_sample_t_1to0 for the last step",
                self.n_steps()
            )));
        }
        Ok(())
    }

    /// Posterior mean and variance of `y_{t-1}` given `y_t`.
    fn posterior(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: &Tensor,
        y_t_mean: &Tensor,
        t: usize,
    ) -> Result<(Tensor, f64)> {
        self.validate_step(t)?;
        let c = self.coefficients(t)?;
        let eps_theta = self
            .model
            .forward(x, y_t, Some(y_0_hat), &step_tensor(t, y_t)?)?;
        let y_0_reparam = Self::reparameterize(
            y_t,
            y_t_mean,
            &eps_theta,
            c.sqrt_alpha_bar_t,
            c.sqrt_one_minus_alpha_bar_t,
        )?;
        let (gamma_0, gamma_1, gamma_2) = c.gammas();
        let mean = ((y_0_reparam.affine(gamma_0, 0.0)? + y_t.affine(gamma_1, 0.0)?)?
            + y_t_mean.affine(gamma_2, 0.0)?)?;
        Ok((mean, c.variance()))
    }

    /// One reverse step `y_t → y_{t-1}` for `t ≥ 1`.
    ///
    /// - `y_t`: current sample `[B, y_dim]`
    /// - `y_0_hat`: conditional mean passed to the guide model
    /// - `y_t_mean`: prior mean ŷ_T the process drifts towards
    pub fn p_sample(
        &self,
        x: Option<&Tensor>,
        y_t: &Tensor,
        y_0_hat: &Tensor,
        y_t_mean: &Tensor,
        t: usize,
    ) -> Result<Tensor> {
        let (mean, variance) = self.posterior(x, y_t, y_0_hat, y_t_mean, t)?;
        let z = y_t.randn_like(0.0, 1.0)?;
        Ok((mean + z.affine(variance.sqrt(), 0.0)?)?)
    }

    /// Final step `y_1 → y_0`: the reparameterised estimate, without noise.
    pub fn p_sample_t_1to0(
        &self,
        x: Option<&Tensor>,
        y: &Tensor,
        y_0_hat: &Tensor,
        y_t_mean: &Tensor,
    ) -> Result<Tensor> {
        let sqrt_alpha_bar_t = scalar_at(self.scheduler.alphas_bar_sqrt(), 0)?;
        let sqrt_one_minus_alpha_bar_t = scalar_at(self.scheduler.one_minus_alphas_bar_sqrt(), 0)?;
        let eps_theta = self
            .model
            .forward(x, y, Some(y_0_hat), &step_tensor(0, y)?)?;
        Self::reparameterize(
            y,
            y_t_mean,
            &eps_theta,
            sqrt_alpha_bar_t,
            sqrt_one_minus_alpha_bar_t,
        )
    }

    /// Full reverse trajectory starting from `ŷ_T + z`.
    ///
    /// Returns `n_steps + 1` tensors: the initial sample, one per reverse
    /// step from `n_steps - 1` down to 1, and the final `y_0` estimate.
    pub fn p_sample_loop(
        &self,
        x: Option<&Tensor>,
        y_0_hat: &Tensor,
        y_t_mean: &Tensor,
    ) -> Result<Vec<Tensor>> {
        let z = y_t_mean.randn_like(0.0, 1.0)?;
        let mut cur_y = (z + y_t_mean)?;
        let mut trajectory = Vec::with_capacity(self.n_steps() + 1);
        trajectory.push(cur_y.clone());

        for t in (1..self.n_steps()).rev() {
            cur_y = self.p_sample(x, &cur_y, y_0_hat, y_t_mean, t)?;
            tracing::debug!(step = t, "reverse diffusion step");
            trajectory.push(cur_y.clone());
        }

        let y_0 = self.p_sample_t_1to0(x, &cur_y, y_0_hat, y_t_mean)?;
        trajectory.push(y_0);
        Ok(trajectory)
    }
}
