//! InfoMax-Regularized Graph Network
//!
//! The layer stack, readout and discriminator head over a batch of graphs.
//!
//! ## Layer step
//!
//! ```text
//! GIN / GCN:  h' = dropout?(relu(BN(MLP(aggregate(h) [+ (1 + ε_l) h]))))
//! Cheb:       h' = dropout?(relu(BN(ChebConv(h, L̂))))
//! ```
//!
//! ## Readout
//!
//! | Architecture | Class logits | Latents |
//! |---|---|---|
//! | GIN | `Σ_l dropout(head_l(P h_l))` (jump readout) | concat over layers |
//! | GCN | `dropout(head(P h_L))` | last layer |
//! | Cheb | `dropout(head(P h_L))` | last layer |
//!
//! `P` is the graph-pooling matrix. GIN and GCN additionally score every node
//! against `σ(graph latent)` with the bilinear [`Discriminator`], once in the
//! original node order and once with each graph's positions filled from
//! another graph of the batch.

mod saliency;

pub use saliency::SaliencyMap;

use crate::config::{Architecture, LayerSpec, ModelConfig};
use crate::graph::{graph_permutation, BatchBuilder, Graph, NeighborStructure, SparseOperator};
use crate::layers::{ChebConv, Discriminator, Mlp};
use crate::primitives::{aggregate, dropout, reweight_center, sigmoid};
use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{batch_norm, init::Init, linear, BatchNorm, BatchNormConfig, Linear, Module, ModuleT, VarBuilder, VarMap};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info};

/// Outputs of one forward pass over a batch
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// Class logits `[B, C]`
    pub class_logits: Tensor,
    /// Discriminator logits `[ΣN, 2]` (true, shuffled); `None` for Chebyshev
    pub discriminator_scores: Option<Tensor>,
    /// Node latent `[ΣN, latent_dim]`
    pub node_latent: Tensor,
    /// Graph latent `[B, latent_dim]`
    pub graph_latent: Tensor,
}

/// Per-layer transform
#[derive(Debug, Clone)]
enum Transform {
    Mlp(Mlp),
    Cheb(ChebConv),
}

/// How node states propagate over the batch
enum Propagation {
    Aggregate(NeighborStructure),
    Laplacian(SparseOperator),
}

/// Device-side tensors for one batch
struct PreparedBatch {
    features: Tensor,
    pool: Tensor,
    propagation: Propagation,
}

/// Readout of a recorded layer stack
struct Readout {
    class_logits: Tensor,
    node_latent: Tensor,
    graph_latent: Tensor,
}

/// Graph classifier with an InfoMax discriminator head
pub struct InfoMaxGnn {
    config: ModelConfig,
    specs: Vec<LayerSpec>,
    device: Device,
    varmap: VarMap,
    eps: Option<Tensor>,
    transforms: Vec<Transform>,
    norms: Vec<BatchNorm>,
    heads: Vec<Linear>,
    discriminator: Option<Discriminator>,
    training: bool,
}

impl std::fmt::Debug for InfoMaxGnn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InfoMaxGnn")
            .field("architecture", &self.config.architecture)
            .field("layers", &self.specs.len())
            .field("training", &self.training)
            .finish()
    }
}

impl InfoMaxGnn {
    /// Validate `config` and allocate all parameters on `device`.
    ///
    /// The model starts in training mode.
    pub fn new(config: ModelConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let specs = config.layer_specs()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let eps = if config.learn_eps && config.architecture != Architecture::Cheb {
            Some(vb.get_with_hints(config.num_layers, "eps", Init::Const(0.0))?)
        } else {
            None
        };

        let mut transforms = Vec::with_capacity(specs.len());
        let mut norms = Vec::with_capacity(specs.len());
        for (layer, spec) in specs.iter().enumerate() {
            let lvb = vb.pp(format!("layers.{}", layer));
            let transform = match config.architecture {
                Architecture::Gin | Architecture::Gcn => Transform::Mlp(Mlp::new(
                    spec.mlp_layers,
                    spec.input_dim,
                    spec.hidden_dim,
                    spec.output_dim,
                    lvb.pp("transform"),
                )?),
                Architecture::Cheb => Transform::Cheb(ChebConv::new(
                    spec.input_dim,
                    spec.output_dim,
                    config.cheb_k,
                    lvb.pp("transform"),
                )?),
            };
            transforms.push(transform);
            norms.push(batch_norm(spec.output_dim, BatchNormConfig::default(), lvb.pp("norm"))?);
        }

        let heads = match config.architecture {
            Architecture::Gin => specs
                .iter()
                .enumerate()
                .map(|(layer, spec)| linear(spec.output_dim, config.output_dim, vb.pp(format!("heads.{}", layer))))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Architecture::Gcn | Architecture::Cheb => {
                let last = specs.len() - 1;
                vec![linear(specs[last].output_dim, config.output_dim, vb.pp(format!("heads.{}", last)))?]
            }
        };

        let discriminator = match config.architecture {
            Architecture::Gin | Architecture::Gcn => {
                Some(Discriminator::new(config.latent_dim()?, vb.pp("discriminator"))?)
            }
            Architecture::Cheb => None,
        };

        info!(
            architecture = %config.architecture,
            layers = specs.len(),
            neighbor_pooling = %config.neighbor_pooling,
            graph_pooling = %config.graph_pooling,
            learn_eps = config.learn_eps,
            parameters = varmap.all_vars().iter().map(|v| v.elem_count()).sum::<usize>(),
            "created graph network"
        );

        Ok(Self {
            config,
            specs,
            device: device.clone(),
            varmap,
            eps,
            transforms,
            norms,
            heads,
            discriminator,
            training: true,
        })
    }

    /// Rebuild a model from `config` and load parameters saved with [`save`](Self::save)
    pub fn load(config: ModelConfig, path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let mut model = Self::new(config, device)?;
        model.varmap.load(path.as_ref())?;
        info!(path = %path.as_ref().display(), "loaded model parameters");
        Ok(model)
    }

    /// Save all parameters (including batch-norm running statistics) as safetensors
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        info!(path = %path.as_ref().display(), "saved model parameters");
        Ok(())
    }

    /// Configuration the model was built from
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Device holding the parameters
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Per-layer input and output widths
    pub fn layer_specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    /// Whether dropout and batch statistics are active
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Switch between training and evaluation mode
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Parameters updated by the optimizer, sorted by name.
    ///
    /// Batch-norm running statistics are excluded; they are updated by the
    /// forward pass itself.
    pub fn trainable_vars(&self) -> Result<Vec<Var>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|e| GnnError::Training(format!("parameter store poisoned: {}", e)))?;
        let mut named: Vec<(&String, &Var)> = data
            .iter()
            .filter(|(name, _)| !name.ends_with("running_mean") && !name.ends_with("running_var"))
            .collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        Ok(named.into_iter().map(|(_, v)| v.clone()).collect())
    }

    /// Total scalar parameter count, running statistics included
    pub fn num_parameters(&self) -> usize {
        self.varmap.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Full forward pass: class logits, discriminator scores and latents.
    ///
    /// `rng` drives dropout (training mode only) and the graph permutation
    /// used for the shuffled discriminator column.
    pub fn forward<R: Rng + ?Sized>(&self, graphs: &[Graph], rng: &mut R) -> Result<ForwardOutput> {
        let batch = self.batch(graphs)?;
        let prepared = self.prepare(&batch)?;
        let hidden = self.encode(&prepared, &prepared.features, &[], rng)?;
        let readout = self.readout(&prepared, &hidden, rng)?;

        let discriminator_scores = match &self.discriminator {
            Some(disc) => {
                let permutation = graph_permutation(batch.len(), rng);
                let order = batch.shuffled_node_order(&permutation)?;
                let order = Tensor::from_vec(order, batch.total_nodes(), &self.device)?;
                let shuffled = readout.node_latent.index_select(&order, 0)?;

                let node_graph = batch.node_graph();
                let node_graph = Tensor::from_vec(node_graph, batch.total_nodes(), &self.device)?;
                let summary = sigmoid(&readout.graph_latent)?.index_select(&node_graph, 0)?;

                Some(disc.forward(&summary, &readout.node_latent, &shuffled, None, None)?)
            }
            None => None,
        };

        debug!(
            graphs = batch.len(),
            nodes = batch.total_nodes(),
            logits = ?readout.class_logits.dims(),
            latent = ?readout.graph_latent.dims(),
            training = self.training,
            "forward pass"
        );

        Ok(ForwardOutput {
            class_logits: readout.class_logits,
            discriminator_scores,
            node_latent: readout.node_latent,
            graph_latent: readout.graph_latent,
        })
    }

    /// Graph latent `[B, latent_dim]` without running the discriminator
    pub fn forward_latent<R: Rng + ?Sized>(&self, graphs: &[Graph], rng: &mut R) -> Result<Tensor> {
        let batch = self.batch(graphs)?;
        let prepared = self.prepare(&batch)?;
        let hidden = self.encode(&prepared, &prepared.features, &[], rng)?;
        Ok(self.readout(&prepared, &hidden, rng)?.graph_latent)
    }

    fn batch<'a>(&self, graphs: &'a [Graph]) -> Result<BatchBuilder<'a>> {
        let batch = BatchBuilder::new(graphs)?;
        if batch.feature_dim() != self.config.input_dim {
            return Err(GnnError::MalformedBatch(format!(
                "graphs have feature width {}, model expects {}",
                batch.feature_dim(),
                self.config.input_dim
            )));
        }
        Ok(batch)
    }

    fn prepare(&self, batch: &BatchBuilder<'_>) -> Result<PreparedBatch> {
        let propagation = match self.config.architecture {
            Architecture::Gin | Architecture::Gcn => Propagation::Aggregate(batch.neighbor_structure(
                self.config.neighbor_pooling,
                self.config.learn_eps,
                &self.device,
            )?),
            Architecture::Cheb => Propagation::Laplacian(batch.scaled_laplacian().to_operator(&self.device)?),
        };
        Ok(PreparedBatch {
            features: batch.node_features(&self.device)?,
            pool: batch.graph_pool(self.config.graph_pooling).to_dense(&self.device)?,
            propagation,
        })
    }

    /// Run the layer stack from `input`, returning every layer's hidden state.
    ///
    /// When `probes` is non-empty, `probes[l]` (zeros) is added to layer `l`'s
    /// output so the gradient at that hidden state can be read back from it.
    fn encode<R: Rng + ?Sized>(
        &self,
        prepared: &PreparedBatch,
        input: &Tensor,
        probes: &[Var],
        rng: &mut R,
    ) -> Result<Vec<Tensor>> {
        let mut hidden = Vec::with_capacity(self.specs.len());
        let mut h = input.clone();
        for layer in 0..self.specs.len() {
            h = self.layer_step(layer, &h, &prepared.propagation, rng)?;
            if let Some(probe) = probes.get(layer) {
                h = (h + probe.as_tensor())?;
            }
            hidden.push(h.clone());
        }
        Ok(hidden)
    }

    fn layer_step<R: Rng + ?Sized>(
        &self,
        layer: usize,
        h: &Tensor,
        propagation: &Propagation,
        rng: &mut R,
    ) -> Result<Tensor> {
        let transformed = match (&self.transforms[layer], propagation) {
            (Transform::Mlp(mlp), Propagation::Aggregate(structure)) => {
                let mut pooled = aggregate(h, structure)?;
                if let Some(eps) = &self.eps {
                    pooled = reweight_center(&pooled, h, &eps.narrow(0, layer, 1)?)?;
                }
                mlp.forward_t(&pooled, self.training)?
            }
            (Transform::Cheb(conv), Propagation::Laplacian(laplacian)) => conv.forward(h, laplacian)?,
            _ => {
                return Err(GnnError::UnsupportedConfig(format!(
                    "layer {} transform does not match the batch propagation",
                    layer
                )))
            }
        };

        let h = self.norms[layer].forward_t(&transformed, self.training)?.relu()?;
        if self.config.dropout_layers.contains(&layer) {
            dropout(&h, self.config.layer_dropout, self.training, rng)
        } else {
            Ok(h)
        }
    }

    /// Class logits of layer `layer`'s pooled state, before final dropout
    fn head_logits(&self, layer: usize, pooled: &Tensor) -> Result<Tensor> {
        let head = match self.config.architecture {
            Architecture::Gin => &self.heads[layer],
            Architecture::Gcn | Architecture::Cheb => &self.heads[0],
        };
        Ok(head.forward(pooled)?)
    }

    /// Class-specific weight row `[D]` of layer `layer`'s head
    fn head_class_weight(&self, layer: usize, class: usize) -> Result<Tensor> {
        let head = match self.config.architecture {
            Architecture::Gin => &self.heads[layer],
            Architecture::Gcn | Architecture::Cheb => &self.heads[0],
        };
        Ok(head.weight().get(class)?)
    }

    fn readout<R: Rng + ?Sized>(&self, prepared: &PreparedBatch, hidden: &[Tensor], rng: &mut R) -> Result<Readout> {
        let p = self.config.final_dropout;
        match self.config.architecture {
            Architecture::Gin => {
                let mut logits: Option<Tensor> = None;
                let mut pooled_layers = Vec::with_capacity(hidden.len());
                for (layer, h) in hidden.iter().enumerate() {
                    let pooled = prepared.pool.matmul(h)?;
                    let layer_logits = dropout(&self.head_logits(layer, &pooled)?, p, self.training, rng)?;
                    logits = Some(match logits {
                        Some(acc) => (acc + layer_logits)?,
                        None => layer_logits,
                    });
                    pooled_layers.push(pooled);
                }
                let class_logits =
                    logits.ok_or_else(|| GnnError::UnsupportedConfig("layer stack is empty".into()))?;
                Ok(Readout {
                    class_logits,
                    node_latent: Tensor::cat(hidden, 1)?,
                    graph_latent: Tensor::cat(&pooled_layers, 1)?,
                })
            }
            Architecture::Gcn | Architecture::Cheb => {
                let last = hidden
                    .last()
                    .ok_or_else(|| GnnError::UnsupportedConfig("layer stack is empty".into()))?;
                let pooled = prepared.pool.matmul(last)?;
                let class_logits = dropout(&self.head_logits(hidden.len() - 1, &pooled)?, p, self.training, rng)?;
                Ok(Readout {
                    class_logits,
                    node_latent: last.clone(),
                    graph_latent: pooled,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphPooling, NeighborPooling};
    use crate::primitives::all_finite;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    /// Graph A: 2 nodes, one edge. Graph B: 3-node path. Feature width 4.
    fn two_graphs() -> Vec<Graph> {
        vec![
            Graph::from_rows(&[vec![1.0, 0.0, 0.5, -1.0], vec![0.0, 1.0, -0.5, 2.0]], &[(0, 1)])
                .unwrap()
                .with_label(0),
            Graph::from_rows(
                &[vec![0.3, 0.3, 0.3, 0.3], vec![-1.0, 0.0, 1.0, 0.0], vec![2.0, 1.0, 0.0, -2.0]],
                &[(0, 1), (1, 2)],
            )
            .unwrap()
            .with_label(1),
        ]
    }

    fn gin_config() -> ModelConfig {
        ModelConfig::gin(4, 8, 2)
            .with_layers(2)
            .with_neighbor_pooling(NeighborPooling::Sum)
            .with_graph_pooling(GraphPooling::Sum)
            .with_learn_eps(false)
    }

    #[test]
    fn test_two_graph_forward() {
        let model = InfoMaxGnn::new(gin_config(), &Device::Cpu).unwrap();
        let out = model.forward(&two_graphs(), &mut rng()).unwrap();

        assert_eq!(out.class_logits.dims(), &[2, 2]);
        let scores = out.discriminator_scores.expect("GIN has a discriminator");
        assert_eq!(scores.dims(), &[5, 2]);
        assert!(all_finite(&out.class_logits).unwrap());
        assert!(all_finite(&scores).unwrap());

        // jump readout concatenates both layers
        assert_eq!(out.node_latent.dims(), &[5, 16]);
        assert_eq!(out.graph_latent.dims(), &[2, 16]);
    }

    #[test]
    fn test_every_pooling_variant_runs() {
        for pooling in [NeighborPooling::Sum, NeighborPooling::Average, NeighborPooling::Max] {
            for learn_eps in [false, true] {
                let config = gin_config()
                    .with_neighbor_pooling(pooling)
                    .with_graph_pooling(GraphPooling::Average)
                    .with_learn_eps(learn_eps);
                let model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
                let out = model.forward(&two_graphs(), &mut rng()).unwrap();
                assert_eq!(out.class_logits.dims(), &[2, 2], "{} eps={}", pooling, learn_eps);
                assert!(all_finite(&out.class_logits).unwrap(), "{} eps={}", pooling, learn_eps);
            }
        }
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let config = gin_config().with_final_dropout(0.5).with_dropout_layers([0]);
        let mut model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        model.set_training(false);
        assert!(!model.is_training());

        let graphs = two_graphs();
        let a = model.forward(&graphs, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = model.forward(&graphs, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(
            a.class_logits.to_vec2::<f32>().unwrap(),
            b.class_logits.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_gcn_uses_baseline_widths() {
        let config = ModelConfig::gcn(4, 3).with_layers(5);
        let model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let out = model.forward(&two_graphs(), &mut rng()).unwrap();

        assert_eq!(out.class_logits.dims(), &[2, 3]);
        assert_eq!(out.node_latent.dims(), &[5, 128]);
        assert_eq!(out.graph_latent.dims(), &[2, 128]);
        assert_eq!(out.discriminator_scores.unwrap().dims(), &[5, 2]);
    }

    #[test]
    fn test_cheb_has_no_discriminator() {
        let config = ModelConfig::cheb(4, 2).with_layers(2);
        let model = InfoMaxGnn::new(config, &Device::Cpu).unwrap();
        let out = model.forward(&two_graphs(), &mut rng()).unwrap();

        assert_eq!(out.class_logits.dims(), &[2, 2]);
        assert!(out.discriminator_scores.is_none());
        assert_eq!(out.graph_latent.dims(), &[2, 32]);
    }

    #[test]
    fn test_forward_latent_width() {
        let model = InfoMaxGnn::new(gin_config(), &Device::Cpu).unwrap();
        let latent = model.forward_latent(&two_graphs(), &mut rng()).unwrap();
        assert_eq!(latent.dims(), &[2, model.config().latent_dim().unwrap()]);
    }

    #[test]
    fn test_feature_width_mismatch() {
        let model = InfoMaxGnn::new(ModelConfig::gin(3, 8, 2).with_layers(2), &Device::Cpu).unwrap();
        let err = model.forward(&two_graphs(), &mut rng()).unwrap_err();
        assert!(matches!(err, GnnError::MalformedBatch(_)));
    }

    #[test]
    fn test_trainable_vars_skip_running_stats() {
        let model = InfoMaxGnn::new(gin_config().with_learn_eps(true), &Device::Cpu).unwrap();
        let trainable = model.trainable_vars().unwrap();
        let all = model.varmap.all_vars();
        // per layer: the stack norm and one MLP norm, each with mean and var
        let running = 2 * (2 + 2);
        assert_eq!(trainable.len(), all.len() - running);
        assert!(model.eps.is_some());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors");

        let mut model = InfoMaxGnn::new(gin_config(), &Device::Cpu).unwrap();
        model.set_training(false);
        model.save(&path).unwrap();

        let mut loaded = InfoMaxGnn::load(gin_config(), &path, &Device::Cpu).unwrap();
        loaded.set_training(false);

        let graphs = two_graphs();
        let a = model.forward(&graphs, &mut rng()).unwrap().class_logits;
        let b = loaded.forward(&graphs, &mut rng()).unwrap().class_logits;
        assert_eq!(a.to_vec2::<f32>().unwrap(), b.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ModelConfig::gcn(4, 2).with_layers(6);
        assert!(matches!(
            InfoMaxGnn::new(config, &Device::Cpu),
            Err(GnnError::UnsupportedConfig(_))
        ));
    }
}
