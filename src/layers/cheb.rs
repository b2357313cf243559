//! Chebyshev spectral graph convolution.
//!
//! ```text
//! Tx_0 = X
//! Tx_1 = L̂ X
//! Tx_k = 2 L̂ Tx_{k-1} - Tx_{k-2}
//! out  = Σ_k Tx_k Θ_k + b
//! ```
//!
//! `L̂` is the scaled Laplacian from
//! [`BatchBuilder::scaled_laplacian`](crate::graph::BatchBuilder::scaled_laplacian).

use crate::graph::SparseOperator;
use crate::{GnnError, Result};
use candle_core::Tensor;
use candle_nn::{init::Init, linear_no_bias, Linear, Module, VarBuilder};

/// Order-`K` Chebyshev convolution with one weight matrix per order
#[derive(Debug, Clone)]
pub struct ChebConv {
    lins: Vec<Linear>,
    bias: Tensor,
}

impl ChebConv {
    pub fn new(input_dim: usize, output_dim: usize, k: usize, vb: VarBuilder) -> Result<Self> {
        if k == 0 {
            return Err(GnnError::UnsupportedConfig("Chebyshev order must be at least 1".into()));
        }
        let lins = (0..k)
            .map(|order| linear_no_bias(input_dim, output_dim, vb.pp(format!("lins.{}", order))))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let bias = vb.get_with_hints(output_dim, "bias", Init::Const(0.0))?;
        Ok(Self { lins, bias })
    }

    /// Polynomial order `K`
    pub fn order(&self) -> usize {
        self.lins.len()
    }

    /// Apply the convolution with the `[N, N]` scaled Laplacian
    pub fn forward(&self, x: &Tensor, laplacian: &SparseOperator) -> Result<Tensor> {
        let mut out = self.lins[0].forward(x)?;

        if self.lins.len() > 1 {
            let mut tx0 = x.clone();
            let mut tx1 = laplacian.matmul(x)?;
            out = (out + self.lins[1].forward(&tx1)?)?;

            for lin in &self.lins[2..] {
                let tx2 = ((laplacian.matmul(&tx1)? * 2.0)? - &tx0)?;
                out = (out + lin.forward(&tx2)?)?;
                tx0 = tx1;
                tx1 = tx2;
            }
        }

        out.broadcast_add(&self.bias)
            .map_err(|e| GnnError::Tensor(format!("cheb bias failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SparseMatrix;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn conv(k: usize) -> (VarMap, ChebConv) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let conv = ChebConv::new(3, 2, k, vb).unwrap();
        (varmap, conv)
    }

    #[test]
    fn test_parameter_count() {
        let (varmap, conv) = conv(9);
        assert_eq!(conv.order(), 9);
        // nine weight matrices + one bias
        assert_eq!(varmap.all_vars().len(), 10);
    }

    #[test]
    fn test_zero_laplacian_reduces_to_first_order() {
        let (_varmap, conv) = conv(4);
        let x = Tensor::randn(0.0f32, 1.0, (5, 3), &Device::Cpu).unwrap();
        let lap = SparseMatrix::new(5, 5).to_operator(&Device::Cpu).unwrap();

        // Tx_1 = 0, Tx_2 = -X, Tx_3 = 0
        let got = conv.forward(&x, &lap).unwrap();
        let want = (conv.lins[0].forward(&x).unwrap() - conv.lins[2].forward(&x).unwrap())
            .unwrap()
            .broadcast_add(&conv.bias)
            .unwrap();
        let diff: f32 = (got - want).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_output_shape() {
        let (_varmap, conv) = conv(2);
        let x = Tensor::randn(0.0f32, 1.0, (4, 3), &Device::Cpu).unwrap();
        let mut eye = SparseMatrix::new(4, 4);
        for i in 0..4 {
            eye.push(i, i, 1.0);
        }
        let lap = eye.to_operator(&Device::Cpu).unwrap();
        assert_eq!(conv.forward(&x, &lap).unwrap().dims(), &[4, 2]);
    }

    #[test]
    fn test_second_order_matches_dense_recursion() {
        let (_varmap, conv) = conv(3);
        let x = Tensor::randn(0.0f32, 1.0, (3, 3), &Device::Cpu).unwrap();
        let mut lap = SparseMatrix::new(3, 3);
        for &(r, c) in &[(0, 1), (1, 0), (1, 2), (2, 1)] {
            lap.push(r, c, -0.5);
        }
        let dense = lap.to_dense(&Device::Cpu).unwrap();

        let tx1 = dense.matmul(&x).unwrap();
        let tx2 = ((dense.matmul(&tx1).unwrap() * 2.0).unwrap() - &x).unwrap();
        let want = (conv.lins[0].forward(&x).unwrap() + conv.lins[1].forward(&tx1).unwrap()).unwrap();
        let want = (want + conv.lins[2].forward(&tx2).unwrap()).unwrap();
        let want = want.broadcast_add(&conv.bias).unwrap();

        let got = conv.forward(&x, &lap.to_operator(&Device::Cpu).unwrap()).unwrap();
        let diff: f32 = (got - want).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_zero_order_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        assert!(ChebConv::new(3, 2, 0, vb).is_err());
    }
}
