//! Bilinear InfoMax discriminator.
//!
//! Scores how well a node representation matches its graph summary:
//!
//! ```text
//! s(h, c) = hᵀ W c + b
//! ```
//!
//! The true column pairs each node with its own graph's summary; the shuffled
//! column pairs a node from a different graph with the same summary.

use crate::{GnnError, Result};
use candle_core::{Tensor, D};
use candle_nn::{init::Init, VarBuilder};

/// Bilinear scorer with a `[D, D]` weight and scalar bias
#[derive(Debug, Clone)]
pub struct Discriminator {
    weight: Tensor,
    bias: Tensor,
    dim: usize,
}

impl Discriminator {
    /// Xavier-uniform weight, zero bias
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        if dim == 0 {
            return Err(GnnError::UnsupportedConfig("discriminator dimension must be positive".into()));
        }
        let bound = (6.0 / (2 * dim) as f64).sqrt();
        let weight = vb.get_with_hints(
            (dim, dim),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vb.get_with_hints(1, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, dim })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Score true and shuffled node latents against per-node summaries
    ///
    /// # Arguments
    /// - `summary`: Graph summary expanded to nodes `[N, D]`
    /// - `h_true`: Node latents in original order `[N, D]`
    /// - `h_shuffled`: Node latents from the shuffled order `[N, D]`
    /// - `bias_true` / `bias_shuffled`: Optional additive `[N, 1]` terms
    ///
    /// # Returns
    /// Logits `[N, 2]`: column 0 true, column 1 shuffled
    pub fn forward(
        &self,
        summary: &Tensor,
        h_true: &Tensor,
        h_shuffled: &Tensor,
        bias_true: Option<&Tensor>,
        bias_shuffled: Option<&Tensor>,
    ) -> Result<Tensor> {
        if summary.dims() != h_true.dims() || summary.dims() != h_shuffled.dims() {
            return Err(GnnError::Tensor(format!(
                "discriminator shape mismatch: summary {:?}, true {:?}, shuffled {:?}",
                summary.dims(),
                h_true.dims(),
                h_shuffled.dims()
            )));
        }

        let mut true_score = self.score(h_true, summary)?;
        let mut shuffled_score = self.score(h_shuffled, summary)?;
        if let Some(b) = bias_true {
            true_score = true_score.broadcast_add(b)?;
        }
        if let Some(b) = bias_shuffled {
            shuffled_score = shuffled_score.broadcast_add(b)?;
        }

        Tensor::cat(&[&true_score, &shuffled_score], 1)
            .map_err(|e| GnnError::Tensor(format!("discriminator concat failed: {}", e)))
    }

    /// Rowwise `h W c + b` as `[N, 1]`
    fn score(&self, h: &Tensor, c: &Tensor) -> Result<Tensor> {
        let projected = h.matmul(&self.weight)?;
        let dot = (projected * c)?.sum_keepdim(D::Minus1)?;
        dot.broadcast_add(&self.bias)
            .map_err(|e| GnnError::Tensor(format!("discriminator bias failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn disc(dim: usize) -> (VarMap, Discriminator) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let disc = Discriminator::new(dim, vb).unwrap();
        (varmap, disc)
    }

    #[test]
    fn test_output_shape() {
        let (_varmap, disc) = disc(4);
        let c = Tensor::randn(0.0f32, 1.0, (6, 4), &Device::Cpu).unwrap();
        let h = Tensor::randn(0.0f32, 1.0, (6, 4), &Device::Cpu).unwrap();
        let hs = Tensor::randn(0.0f32, 1.0, (6, 4), &Device::Cpu).unwrap();
        let out = disc.forward(&c, &h, &hs, None, None).unwrap();
        assert_eq!(out.dims(), &[6, 2]);
    }

    #[test]
    fn test_identity_weight_gives_dot_product() {
        let (varmap, disc) = disc(2);
        {
            let data = varmap.data().lock().unwrap();
            data["weight"].set(&Tensor::eye(2, DType::F32, &Device::Cpu).unwrap()).unwrap();
        }

        let c = Tensor::new(&[[1.0f32, 2.0]], &Device::Cpu).unwrap();
        let h = Tensor::new(&[[3.0f32, 4.0]], &Device::Cpu).unwrap();
        let hs = Tensor::new(&[[-1.0f32, 0.5]], &Device::Cpu).unwrap();
        let out = disc.forward(&c, &h, &hs, None, None).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![11.0, 0.0]]);
    }

    #[test]
    fn test_optional_biases_are_added() {
        let (_varmap, disc) = disc(3);
        let c = Tensor::randn(0.0f32, 1.0, (2, 3), &Device::Cpu).unwrap();
        let h = Tensor::randn(0.0f32, 1.0, (2, 3), &Device::Cpu).unwrap();
        let plain = disc.forward(&c, &h, &h, None, None).unwrap();
        let shift = Tensor::ones((2, 1), DType::F32, &Device::Cpu).unwrap();
        let shifted = disc.forward(&c, &h, &h, Some(&shift), None).unwrap();

        let delta = (shifted - plain).unwrap().to_vec2::<f32>().unwrap();
        for row in delta {
            assert!((row[0] - 1.0).abs() < 1e-5);
            assert!(row[1].abs() < 1e-5);
        }
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let (_varmap, disc) = disc(3);
        let c = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let h = Tensor::zeros((3, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(disc.forward(&c, &h, &c, None, None).is_err());
    }
}
