//! Noise scheduler for CARDS diffusion training and sampling.
//!
//! Precomputes the beta schedule for a fixed number of steps together with
//! the derived quantities used by the forward and reverse processes:
//!
//! ```text
//! betas_sqrt                = sqrt(β)
//! alphas                    = 1 - β
//! alphas_cumprod            = ᾱ_t = Π_{s≤t} α_s
//! alphas_bar_sqrt           = sqrt(ᾱ)
//! one_minus_alphas_bar_sqrt = sqrt(1 - ᾱ)
//! ```
//!
//! Beta generators live in [`beta`]. Every sequence is fixed once the
//! scheduler is built.

pub mod beta;

use std::fmt;
use std::str::FromStr;

use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::NoiseSchedulerConfig;
use crate::{Error, Result};

/// Beta schedule generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Linear,
    Const,
    Quad,
    Sigmoid,
    Cosine,
    CosineAnneal,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 6] = [
        Self::Linear,
        Self::Const,
        Self::Quad,
        Self::Sigmoid,
        Self::Cosine,
        Self::CosineAnneal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Const => "const",
            Self::Quad => "quad",
            Self::Sigmoid => "sigmoid",
            Self::Cosine => "cosine",
            Self::CosineAnneal => "cosine_anneal",
        }
    }

    /// Generate `n_steps` betas.
    pub fn betas(&self, n_steps: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
        match self {
            Self::Linear => beta::linear(n_steps, beta_start, beta_end),
            Self::Const => beta::constant(n_steps, beta_end),
            Self::Quad => beta::quadratic(n_steps, beta_start, beta_end),
            Self::Sigmoid => beta::sigmoid_ramp(n_steps, beta_start, beta_end),
            Self::Cosine => beta::cosine(n_steps),
            Self::CosineAnneal => beta::cosine_anneal(n_steps, beta_start, beta_end),
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<_> = Self::ALL.iter().map(|k| k.as_str()).collect();
                Error::InvalidArgument(format!(
                    "invalid schedule '{s}', please choose one of [{}]",
                    valid.join(", ")
                ))
            })
    }
}

/// Gather `input[t]` and reshape to `[len(t), 1, ..., 1]` with the rank of `x`.
///
/// The result is cast to `x`'s dtype so it can be broadcast-multiplied
/// against `x` directly. Out-of-range indices fail inside `index_select`.
pub fn extract(input: &Tensor, t: &Tensor, x: &Tensor) -> Result<Tensor> {
    let t = t.to_device(input.device())?;
    let out = input.index_select(&t, 0)?;
    let mut shape = vec![1usize; x.rank().max(1)];
    shape[0] = t.dim(0)?;
    Ok(out.reshape(shape)?.to_dtype(x.dtype())?)
}

/// Precomputed noise schedule.
#[derive(Debug, Clone)]
pub struct NoiseScheduler {
    kind: ScheduleKind,
    n_steps: usize,
    beta_start: f64,
    beta_end: f64,
    betas: Tensor,
    betas_sqrt: Tensor,
    alphas: Tensor,
    alphas_cumprod: Tensor,
    alphas_bar_sqrt: Tensor,
    one_minus_alphas_bar_sqrt: Tensor,
}

impl NoiseScheduler {
    pub fn new(
        kind: ScheduleKind,
        n_steps: usize,
        beta_start: f64,
        beta_end: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if n_steps < 2 {
            return Err(Error::InvalidArgument(format!(
                "n_steps must be at least 2, got {n_steps}"
            )));
        }

        let betas = kind.betas(n_steps, beta_start, beta_end);
        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();
        let alphas_cumprod: Vec<f64> = alphas
            .iter()
            .scan(1.0, |acc, a| {
                *acc *= a;
                Some(*acc)
            })
            .collect();
        let betas_sqrt: Vec<f64> = betas.iter().map(|b| b.sqrt()).collect();
        let alphas_bar_sqrt: Vec<f64> = alphas_cumprod.iter().map(|a| a.sqrt()).collect();
        let one_minus_alphas_bar_sqrt: Vec<f64> =
            alphas_cumprod.iter().map(|a| (1.0 - a).sqrt()).collect();

        let to_tensor = |values: Vec<f64>| -> Result<Tensor> {
            Ok(Tensor::from_vec(values, n_steps, device)?.to_dtype(dtype)?)
        };

        tracing::info!(
            schedule = %kind,
            n_steps,
            beta_start,
            beta_end,
            "built noise schedule"
        );

        Ok(Self {
            kind,
            n_steps,
            beta_start,
            beta_end,
            betas: to_tensor(betas)?,
            betas_sqrt: to_tensor(betas_sqrt)?,
            alphas: to_tensor(alphas)?,
            alphas_cumprod: to_tensor(alphas_cumprod)?,
            alphas_bar_sqrt: to_tensor(alphas_bar_sqrt)?,
            one_minus_alphas_bar_sqrt: to_tensor(one_minus_alphas_bar_sqrt)?,
        })
    }

    /// Build from a schedule name such as `"cosine_anneal"`.
    pub fn from_name(
        schedule: &str,
        n_steps: usize,
        beta_start: f64,
        beta_end: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        Self::new(
            schedule.parse()?,
            n_steps,
            beta_start,
            beta_end,
            dtype,
            device,
        )
    }

    pub fn from_config(
        config: &NoiseSchedulerConfig,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        Self::new(
            config.schedule,
            config.n_steps,
            config.beta_start,
            config.beta_end,
            dtype,
            device,
        )
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn beta_range(&self) -> (f64, f64) {
        (self.beta_start, self.beta_end)
    }

    pub fn betas(&self) -> &Tensor {
        &self.betas
    }

    pub fn betas_sqrt(&self) -> &Tensor {
        &self.betas_sqrt
    }

    pub fn alphas(&self) -> &Tensor {
        &self.alphas
    }

    pub fn alphas_cumprod(&self) -> &Tensor {
        &self.alphas_cumprod
    }

    pub fn alphas_bar_sqrt(&self) -> &Tensor {
        &self.alphas_bar_sqrt
    }

    pub fn one_minus_alphas_bar_sqrt(&self) -> &Tensor {
        &self.one_minus_alphas_bar_sqrt
    }

    /// Forward diffusion towards the conditional mean.
    ///
    /// `y_t = sqrt(ᾱ_t)·y + (1 - sqrt(ᾱ_t))·y_0_hat + sqrt(1 - ᾱ_t)·noise`
    pub fn q_sample(
        &self,
        y: &Tensor,
        y_0_hat: &Tensor,
        t: &Tensor,
        noise: &Tensor,
    ) -> Result<Tensor> {
        let sqrt_alpha_bar_t = extract(&self.alphas_bar_sqrt, t, y)?;
        let sqrt_one_minus_alpha_bar_t = extract(&self.one_minus_alphas_bar_sqrt, t, y)?;
        let signal = y.broadcast_mul(&sqrt_alpha_bar_t)?;
        let drift = y_0_hat.broadcast_mul(&(1.0 - &sqrt_alpha_bar_t)?)?;
        let noise = noise.broadcast_mul(&sqrt_one_minus_alpha_bar_t)?;
        Ok(((signal + drift)? + noise)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(kind: ScheduleKind, n_steps: usize) -> NoiseScheduler {
        NoiseScheduler::new(kind, n_steps, 1e-5, 1e-2, DType::F64, &Device::Cpu).unwrap()
    }

    #[test]
    fn all_kinds_produce_valid_betas() {
        for kind in ScheduleKind::ALL {
            for n_steps in [2, 10, 1000] {
                let s = scheduler(kind, n_steps);
                let betas: Vec<f64> = s.betas().to_vec1().unwrap();
                assert_eq!(betas.len(), n_steps, "{kind}");
                for (i, b) in betas.iter().enumerate() {
                    assert!(*b > 0.0 && *b < 1.0, "{kind}[{i}] = {b}");
                }
                let cumprod: Vec<f64> = s.alphas_cumprod().to_vec1().unwrap();
                assert_eq!(cumprod.len(), n_steps);
                for w in cumprod.windows(2) {
                    assert!(w[1] <= w[0], "{kind}: alphas_cumprod increased");
                }
            }
        }
    }

    #[test]
    fn const_schedule_is_beta_end() {
        let s = scheduler(ScheduleKind::Const, 100);
        let betas: Vec<f64> = s.betas().to_vec1().unwrap();
        assert!(betas.iter().all(|&b| b == 1e-2));
    }

    #[test]
    fn linear_schedule_endpoints_and_order() {
        let s = scheduler(ScheduleKind::Linear, 1000);
        let betas: Vec<f64> = s.betas().to_vec1().unwrap();
        assert_eq!(betas[0], 1e-5);
        assert_eq!(betas[999], 1e-2);
        for w in betas.windows(2) {
            assert!(w[1] > w[0]);
        }

        let cumprod: Vec<f64> = s.alphas_cumprod().to_vec1().unwrap();
        assert!(cumprod[999] < cumprod[0]);
    }

    #[test]
    fn linear_schedule_in_f32() {
        let s = NoiseScheduler::from_name("linear", 1000, 1e-5, 1e-2, DType::F32, &Device::Cpu)
            .unwrap();
        let betas: Vec<f32> = s.betas().to_vec1().unwrap();
        assert!((betas[0] - 1e-5).abs() < 1e-9);
        assert!((betas[999] - 1e-2).abs() < 1e-7);
    }

    #[test]
    fn cosine_schedule_is_capped() {
        let s = scheduler(ScheduleKind::Cosine, 1000);
        let betas: Vec<f64> = s.betas().to_vec1().unwrap();
        assert!(betas.iter().all(|&b| b <= 0.999));
    }

    #[test]
    fn derived_sequences_are_consistent() {
        let s = scheduler(ScheduleKind::Quad, 50);
        let betas: Vec<f64> = s.betas().to_vec1().unwrap();
        let betas_sqrt: Vec<f64> = s.betas_sqrt().to_vec1().unwrap();
        let alphas: Vec<f64> = s.alphas().to_vec1().unwrap();
        let cumprod: Vec<f64> = s.alphas_cumprod().to_vec1().unwrap();
        let bar_sqrt: Vec<f64> = s.alphas_bar_sqrt().to_vec1().unwrap();
        let one_minus: Vec<f64> = s.one_minus_alphas_bar_sqrt().to_vec1().unwrap();
        for i in 0..50 {
            assert!((betas_sqrt[i] * betas_sqrt[i] - betas[i]).abs() < 1e-12);
            assert!((alphas[i] + betas[i] - 1.0).abs() < 1e-12);
            assert!((bar_sqrt[i] * bar_sqrt[i] - cumprod[i]).abs() < 1e-12);
            assert!((bar_sqrt[i].powi(2) + one_minus[i].powi(2) - 1.0).abs() < 1e-12);
        }
        assert!((cumprod[1] - alphas[0] * alphas[1]).abs() < 1e-12);
    }

    #[test]
    fn invalid_schedule_name_lists_valid_kinds() {
        let result = NoiseScheduler::from_name("jsd", 10, 1e-5, 1e-2, DType::F32, &Device::Cpu);
        let err = result.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::InvalidArgument(_)));
        for kind in ScheduleKind::ALL {
            assert!(msg.contains(kind.as_str()), "{msg}");
        }
    }

    #[test]
    fn too_few_steps_rejected() {
        let err = NoiseScheduler::new(
            ScheduleKind::Linear,
            1,
            1e-5,
            1e-2,
            DType::F32,
            &Device::Cpu,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn schedule_kind_roundtrips_through_str() {
        for kind in ScheduleKind::ALL {
            assert_eq!(kind.to_string().parse::<ScheduleKind>().unwrap(), kind);
        }
    }

    #[test]
    fn extract_reshapes_for_broadcast() {
        let s = scheduler(ScheduleKind::Linear, 1000);
        let t = Tensor::new(&[0u32, 999], &Device::Cpu).unwrap();
        let x = Tensor::zeros((2, 3, 4, 5), DType::F32, &Device::Cpu).unwrap();
        let out = extract(s.betas(), &t, &x).unwrap();
        assert_eq!(out.dims(), &[2, 1, 1, 1]);
        assert_eq!(out.dtype(), DType::F32);
        let values: Vec<f32> = out.flatten_all().unwrap().to_vec1().unwrap();
        assert!((values[0] - 1e-5).abs() < 1e-9);
        assert!((values[1] - 1e-2).abs() < 1e-7);

        let x2 = Tensor::zeros((2, 7), DType::F64, &Device::Cpu).unwrap();
        assert_eq!(extract(s.alphas(), &t, &x2).unwrap().dims(), &[2, 1]);
    }

    #[test]
    fn extract_out_of_range_fails() {
        let s = scheduler(ScheduleKind::Linear, 10);
        let t = Tensor::new(&[10u32], &Device::Cpu).unwrap();
        let x = Tensor::zeros((1, 2), DType::F64, &Device::Cpu).unwrap();
        assert!(matches!(extract(s.betas(), &t, &x), Err(Error::Candle(_))));
    }

    #[test]
    fn q_sample_without_noise_keeps_target_when_mean_matches() {
        let s = scheduler(ScheduleKind::Linear, 100);
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1.5f64, -2.0], [0.25, 4.0]], &dev).unwrap();
        let noise = Tensor::zeros((2, 2), DType::F64, &dev).unwrap();
        let t = Tensor::new(&[3u32, 97], &dev).unwrap();
        let y_t = s.q_sample(&y, &y, &t, &noise).unwrap();
        let diff: f64 = (y_t - &y)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-12, "diff = {diff}");
    }

    #[test]
    fn q_sample_drifts_towards_mean_at_late_steps() {
        let s = scheduler(ScheduleKind::Linear, 1000);
        let dev = Device::Cpu;
        let y = Tensor::new(&[[0.0f64]], &dev).unwrap();
        let y_0_hat = Tensor::new(&[[1.0f64]], &dev).unwrap();
        let noise = Tensor::zeros((1, 1), DType::F64, &dev).unwrap();
        let early: f64 = s
            .q_sample(&y, &y_0_hat, &Tensor::new(&[0u32], &dev).unwrap(), &noise)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f64>()
            .unwrap()[0];
        let late: f64 = s
            .q_sample(&y, &y_0_hat, &Tensor::new(&[999u32], &dev).unwrap(), &noise)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f64>()
            .unwrap()[0];
        assert!(early < 0.01, "early = {early}");
        assert!(late > early, "late = {late}");
    }
}
