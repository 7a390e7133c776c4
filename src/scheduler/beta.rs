//! Beta generators for the six schedule kinds.
//!
//! All generators work in `f64` and return exactly `n_steps` values.

use std::f64::consts::PI;

/// Offset keeping the cosine schedule away from zero at `t = 0`.
const COSINE_S: f64 = 0.008;
/// Upper bound on cosine-schedule betas.
const MAX_BETA: f64 = 0.999;

/// `n` evenly spaced values from `start` to `end`, both endpoints exact.
pub(crate) fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![start];
    }
    let step = (end - start) / (n - 1) as f64;
    (0..n)
        .map(|i| {
            if i == n - 1 {
                end
            } else {
                start + step * i as f64
            }
        })
        .collect()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn linear(n_steps: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
    linspace(beta_start, beta_end, n_steps)
}

pub fn constant(n_steps: usize, beta_end: f64) -> Vec<f64> {
    vec![beta_end; n_steps]
}

pub fn quadratic(n_steps: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
    linspace(beta_start.sqrt(), beta_end.sqrt(), n_steps)
        .into_iter()
        .map(|b| b * b)
        .collect()
}

/// Logistic ramp over `[-6, 6]`, rescaled into `[beta_start, beta_end]`.
///
/// NOTE: the rescaled values go through the logistic function a second
/// time, which lands every beta near 0.5. This matches the reference
/// behaviour and is kept until its intent is confirmed.
pub fn sigmoid_ramp(n_steps: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
    linspace(-6.0, 6.0, n_steps)
        .into_iter()
        .map(|x| sigmoid(sigmoid(x) * (beta_end - beta_start) + beta_start))
        .collect()
}

/// Cosine schedule (Nichol & Dhariwal), capped at [`MAX_BETA`].
pub fn cosine(n_steps: usize) -> Vec<f64> {
    let f = |i: usize| {
        let phase = ((i as f64 / n_steps as f64) + COSINE_S) / (1.0 + COSINE_S) * PI / 2.0;
        phase.cos().powi(2)
    };
    (0..n_steps)
        .map(|i| (1.0 - f(i + 1) / f(i)).min(MAX_BETA))
        .collect()
}

/// Half-cosine ramp from `beta_start` to `beta_end`.
pub fn cosine_anneal(n_steps: usize, beta_start: f64, beta_end: f64) -> Vec<f64> {
    let last = (n_steps - 1) as f64;
    (0..n_steps)
        .map(|t| {
            let ramp = 1.0 - (t as f64 / last * PI).cos();
            beta_start + 0.5 * (beta_end - beta_start) * ramp
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linspace_endpoints() {
        let xs = linspace(0.0, 1.0, 5);
        assert_eq!(xs, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 7.0, 1), vec![3.0]);
    }

    #[test]
    fn quadratic_ramp_endpoints() {
        let betas = quadratic(100, 1e-4, 2e-2);
        assert!((betas[0] - 1e-4).abs() < 1e-12);
        assert!((betas[99] - 2e-2).abs() < 1e-12);
        // Convex: the midpoint sits below the linear midpoint.
        assert!(betas[50] < (1e-4 + 2e-2) / 2.0);
    }

    #[test]
    fn sigmoid_ramp_is_doubly_squashed() {
        let betas = sigmoid_ramp(10, 1e-5, 1e-2);
        for b in betas {
            assert!((b - 0.5).abs() < 0.01, "beta = {b}");
        }
    }

    #[test]
    fn cosine_anneal_endpoints() {
        let betas = cosine_anneal(11, 0.1, 0.3);
        assert!((betas[0] - 0.1).abs() < 1e-12);
        assert!((betas[5] - 0.2).abs() < 1e-12);
        assert!((betas[10] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn cosine_last_step_is_capped() {
        let betas = cosine(1000);
        // cos(π/2) = 0 at the final step, so the raw value is exactly 1.
        assert_eq!(betas[999], MAX_BETA);
        assert!(betas[0] > 0.0);
    }
}
