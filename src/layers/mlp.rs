//! Multi-layer perceptron used as the per-layer node transform.
//!
//! ```text
//! 1 layer:  Linear(in → out)
//! k layers: [Linear → BatchNorm → ReLU] × (k - 1) → Linear(hidden → out)
//! ```

use crate::{GnnError, Result};
use candle_core::Tensor;
use candle_nn::{batch_norm, linear, BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder};

/// Node-wise MLP with batch norm between hidden layers
#[derive(Debug, Clone)]
pub struct Mlp {
    linears: Vec<Linear>,
    batch_norms: Vec<BatchNorm>,
}

impl Mlp {
    /// Build an MLP with `num_layers` linear layers (at least 1)
    pub fn new(
        num_layers: usize,
        input_dim: usize,
        hidden_dim: usize,
        output_dim: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_layers == 0 {
            return Err(GnnError::UnsupportedConfig("MLP needs at least one layer".into()));
        }

        let mut linears = Vec::with_capacity(num_layers);
        let mut batch_norms = Vec::with_capacity(num_layers - 1);
        for layer in 0..num_layers {
            let in_dim = if layer == 0 { input_dim } else { hidden_dim };
            let out_dim = if layer + 1 == num_layers { output_dim } else { hidden_dim };
            linears.push(linear(in_dim, out_dim, vb.pp(format!("linears.{}", layer)))?);
            if layer + 1 < num_layers {
                batch_norms.push(batch_norm(
                    hidden_dim,
                    BatchNormConfig::default(),
                    vb.pp(format!("batch_norms.{}", layer)),
                )?);
            }
        }

        Ok(Self {
            linears,
            batch_norms,
        })
    }

    /// Number of linear layers
    pub fn num_layers(&self) -> usize {
        self.linears.len()
    }

    /// Forward pass; `train` selects batch vs running statistics
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut h = x.clone();
        for (lin, bn) in self.linears.iter().zip(&self.batch_norms) {
            h = bn.forward_t(&lin.forward(&h)?, train)?.relu()?;
        }
        // linears always has one more entry than batch_norms
        let last = &self.linears[self.linears.len() - 1];
        last.forward(&h)
            .map_err(|e| GnnError::Tensor(format!("MLP output layer failed: {}", e)))
    }
}
