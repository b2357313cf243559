//! Saliency and class activation for a single graph.
//!
//! For target class `c` with per-layer heads `W_l` and hidden states `h_l`:
//!
//! ```text
//! S_l   = Σ_{k ≤ l} head_k(P h_k)[c]          running class score
//! CA    = Σ_l h_l · W_l[c]                     class activation
//! GCA   = relu(Σ_l h_l · ∂S_l/∂h_l[0])         gradient class activation
//! sal   = ∂S_L/∂X                              input saliency
//! ```
//!
//! Gradients at `h_l` are read from a zero probe variable added to each
//! layer's output. Every call builds a fresh gradient store, so nothing
//! accumulates across calls.

use super::InfoMaxGnn;
use crate::config::Architecture;
use crate::graph::Graph;
use crate::primitives::relu;
use crate::{GnnError, Result};
use candle_core::backprop::GradStore;
use candle_core::{DType, IndexOp, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

/// Attribution maps for one graph and one target class
#[derive(Debug, Clone)]
pub struct SaliencyMap {
    /// Gradient of the class score w.r.t. the input features `[N, F]`
    pub input_saliency: Tensor,
    /// Class activation `[N]` (GIN: summed over layers, GCN: last layer)
    pub class_activation: Option<Tensor>,
    /// Rectified gradient class activation `[N]` (GIN only)
    pub grad_class_activation: Option<Tensor>,
}

impl InfoMaxGnn {
    /// Attribute class `class` to the nodes and input features of one graph.
    ///
    /// Switches the model to evaluation mode.
    ///
    /// # Errors
    /// - [`GnnError::MalformedBatch`] unless exactly one graph is given
    /// - [`GnnError::InvalidArgument`] if `class` is not a valid class index
    pub fn compute_saliency(&mut self, graphs: &[Graph], class: usize) -> Result<SaliencyMap> {
        if graphs.len() != 1 {
            return Err(GnnError::MalformedBatch(format!(
                "saliency needs exactly one graph, got {}",
                graphs.len()
            )));
        }
        if class >= self.config.output_dim {
            return Err(GnnError::InvalidArgument(format!(
                "class {} out of range for {} classes",
                class, self.config.output_dim
            )));
        }
        self.set_training(false);

        let batch = self.batch(graphs)?;
        let prepared = self.prepare(&batch)?;
        let n = batch.total_nodes();

        let input = Var::from_tensor(&prepared.features)?;
        let probes = self
            .specs
            .iter()
            .map(|spec| Var::zeros((n, spec.output_dim), DType::F32, &self.device))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // evaluation mode never draws from the rng
        let mut rng = StdRng::seed_from_u64(0);
        let hidden = self.encode(&prepared, input.as_tensor(), &probes, &mut rng)?;

        let map = match self.config.architecture {
            Architecture::Gin => {
                let mut score: Option<Tensor> = None;
                let mut class_activation = Tensor::zeros(n, DType::F32, &self.device)?;
                let mut grad_class_activation = Tensor::zeros(n, DType::F32, &self.device)?;
                let mut last_grads = None;

                for (layer, h) in hidden.iter().enumerate() {
                    let pooled = prepared.pool.matmul(h)?;
                    let logits = self.head_logits(layer, &pooled)?;
                    let running = match score {
                        Some(s) => (s + logits)?,
                        None => logits,
                    };

                    let weight = self.head_class_weight(layer, class)?;
                    class_activation = (class_activation + node_dot(h, &weight)?)?;

                    let grads = running.i((0, class))?.backward()?;
                    if let Some(grad) = grads.get(probes[layer].as_tensor()) {
                        let first_node = grad.get(0)?;
                        grad_class_activation = (grad_class_activation + node_dot(h, &first_node)?)?;
                    }

                    score = Some(running);
                    last_grads = Some(grads);
                }

                let grads = last_grads.ok_or_else(|| GnnError::UnsupportedConfig("layer stack is empty".into()))?;
                SaliencyMap {
                    input_saliency: input_gradient(&grads, &input)?,
                    class_activation: Some(class_activation),
                    grad_class_activation: Some(relu(&grad_class_activation)?),
                }
            }
            Architecture::Gcn | Architecture::Cheb => {
                let last_layer = hidden.len() - 1;
                let last = &hidden[last_layer];
                let logits = self.head_logits(last_layer, &prepared.pool.matmul(last)?)?;
                let grads = logits.i((0, class))?.backward()?;

                let class_activation = match self.config.architecture {
                    Architecture::Gcn => Some(node_dot(last, &self.head_class_weight(last_layer, class)?)?),
                    _ => None,
                };
                SaliencyMap {
                    input_saliency: input_gradient(&grads, &input)?,
                    class_activation,
                    grad_class_activation: None,
                }
            }
        };

        debug!(
            nodes = n,
            class,
            saliency = ?map.input_saliency.dims(),
            "computed saliency"
        );
        Ok(map)
    }
}

/// `h [N, D] · w [D]` as `[N]`
fn node_dot(h: &Tensor, w: &Tensor) -> Result<Tensor> {
    Ok(h.matmul(&w.unsqueeze(1)?)?.squeeze(1)?)
}

/// Gradient at the input variable, zeros if the score does not reach it
fn input_gradient(grads: &GradStore, input: &Var) -> Result<Tensor> {
    match grads.get(input.as_tensor()) {
        Some(grad) => Ok(grad.clone()),
        None => Ok(input.as_tensor().zeros_like()?),
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ModelConfig;
    use crate::graph::Graph;
    use crate::model::InfoMaxGnn;
    use crate::primitives::all_finite;
    use crate::{Device, GnnError};

    fn single_node_zero_features(width: usize) -> Vec<Graph> {
        vec![Graph::from_rows(&[vec![0.0; width]], &[]).unwrap()]
    }

    fn path_graph() -> Vec<Graph> {
        vec![Graph::from_rows(
            &[vec![1.0, 0.0, 2.0], vec![0.5, -1.0, 0.0], vec![0.0, 3.0, 1.0], vec![-2.0, 0.0, 0.5]],
            &[(0, 1), (1, 2), (2, 3)],
        )
        .unwrap()]
    }

    #[test]
    fn test_single_node_zero_features() {
        let config = ModelConfig::gin(6, 8, 2).with_layers(3);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let map = model.compute_saliency(&single_node_zero_features(6), 1).unwrap();

        assert!(!model.is_training());
        assert_eq!(map.input_saliency.dims(), &[1, 6]);
        assert!(all_finite(&map.input_saliency).unwrap());
        assert_eq!(map.class_activation.unwrap().dims(), &[1]);
        assert_eq!(map.grad_class_activation.unwrap().dims(), &[1]);
    }

    #[test]
    fn test_gin_maps_shapes_and_rectified() {
        let config = ModelConfig::gin(3, 8, 2).with_layers(3).with_learn_eps(true);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let map = model.compute_saliency(&path_graph(), 0).unwrap();

        assert_eq!(map.input_saliency.dims(), &[4, 3]);
        let gca: Vec<f32> = map.grad_class_activation.unwrap().to_vec1().unwrap();
        assert_eq!(gca.len(), 4);
        assert!(gca.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_repeated_calls_do_not_accumulate() {
        let config = ModelConfig::gin(3, 8, 2).with_layers(2);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let graphs = path_graph();

        let first = model.compute_saliency(&graphs, 1).unwrap().input_saliency;
        let second = model.compute_saliency(&graphs, 1).unwrap().input_saliency;
        let diff: f32 = (first - second)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_class_activation_is_hidden_dot_head_row() {
        let config = ModelConfig::gin(3, 4, 2).with_layers(1).with_mlp_layers(1);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let graphs = path_graph();
        let map = model.compute_saliency(&graphs, 1).unwrap();

        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let h = model.forward(&graphs, &mut rng).unwrap().node_latent;
        let weight = model.heads[0].weight().get(1).unwrap();
        let want = h.matmul(&weight.unsqueeze(1).unwrap()).unwrap().squeeze(1).unwrap();
        let got = map.class_activation.unwrap();
        let diff: f32 = (got - want).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_gcn_returns_class_activation_only() {
        let config = ModelConfig::gcn(3, 2).with_layers(2);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let map = model.compute_saliency(&path_graph(), 0).unwrap();

        assert_eq!(map.input_saliency.dims(), &[4, 3]);
        assert_eq!(map.class_activation.unwrap().dims(), &[4]);
        assert!(map.grad_class_activation.is_none());
    }

    #[test]
    fn test_cheb_returns_saliency_only() {
        let config = ModelConfig::cheb(3, 2).with_layers(2);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let map = model.compute_saliency(&path_graph(), 1).unwrap();

        assert_eq!(map.input_saliency.dims(), &[4, 3]);
        assert!(map.class_activation.is_none());
        assert!(map.grad_class_activation.is_none());
    }

    #[test]
    fn test_batch_of_two_rejected() {
        let config = ModelConfig::gin(3, 8, 2).with_layers(2);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let mut graphs = path_graph();
        graphs.extend(path_graph());
        assert!(matches!(
            model.compute_saliency(&graphs, 0),
            Err(GnnError::MalformedBatch(_))
        ));
        assert!(matches!(model.compute_saliency(&[], 0), Err(GnnError::MalformedBatch(_))));
    }

    #[test]
    fn test_class_out_of_range() {
        let config = ModelConfig::gin(3, 8, 2).with_layers(2);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        assert!(matches!(
            model.compute_saliency(&path_graph(), 2),
            Err(GnnError::InvalidArgument(_))
        ));
    }
}
