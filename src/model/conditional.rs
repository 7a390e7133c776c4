//! Step-gated linear layer.
//!
//! ```text
//! out = Linear(x) * γ[t]      γ: Embedding(n_steps, n_outputs), init U(0, 1)
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Init, VarBuilder};

/// Linear layer whose output is scaled by a learned per-step gate.
#[derive(Debug, Clone)]
pub struct ConditionalLinear {
    lin: nn::Linear,
    embed: nn::Embedding,
    n_outputs: usize,
}

impl ConditionalLinear {
    /// - `n_inputs`, `n_outputs`: linear map widths
    /// - `n_steps`: number of rows in the gate table
    pub fn new(n_inputs: usize, n_outputs: usize, n_steps: usize, vb: VarBuilder) -> Result<Self> {
        let lin = nn::linear(n_inputs, n_outputs, vb.pp("lin"))?;
        let gates = vb.pp("embed").get_with_hints(
            (n_steps, n_outputs),
            "weight",
            Init::Uniform { lo: 0.0, up: 1.0 },
        )?;
        let embed = nn::Embedding::new(gates, n_outputs);
        Ok(Self {
            lin,
            embed,
            n_outputs,
        })
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn n_steps(&self) -> usize {
        self.embed.embeddings().dims()[0]
    }

    /// Forward pass.
    ///
    /// - `xs`: `[B, n_inputs]`
    /// - `t`: `[B]` (or `[1]`, broadcast over the batch) step indices
    ///
    /// Returns `[B, n_outputs]`. Out-of-range steps fail in the gate lookup.
    pub fn forward(&self, xs: &Tensor, t: &Tensor) -> Result<Tensor> {
        let out = self.lin.forward(xs)?;
        let gamma = self.embed.forward(t)?.reshape(((), self.n_outputs))?;
        gamma.broadcast_mul(&out)
    }
}
