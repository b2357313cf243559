//! Model Configuration
//!
//! Hyper-parameters for the graph network stack, serializable as JSON.
//!
//! String-valued options (`"sum"`, `"average"`, `"max"`, `"gin"`, ...) parse
//! into enums and are rejected immediately when unknown. The fixed-width
//! baseline used by the GCN and Chebyshev variants is expressed as a
//! declarative [`LayerSpec`] list built by [`ModelConfig::layer_specs`].

use crate::{GnnError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

// =============================================================================
// Enumerated options
// =============================================================================

/// How a node aggregates the states of its neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborPooling {
    /// Sum of neighbor states (block-diagonal adjacency product)
    Sum,
    /// Sum divided by node degree
    Average,
    /// Elementwise maximum over the padded neighbor row
    Max,
}

/// How node states are reduced to one vector per graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphPooling {
    /// Sum over the nodes of a graph
    Sum,
    /// Mean over the nodes of a graph
    Average,
}

/// Layer stack family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Graph isomorphism network: MLP transform per layer, jump readout over
    /// every layer, discriminator over all layers.
    Gin,
    /// Fixed-width baseline with single-linear transforms, last-layer readout.
    Gcn,
    /// Fixed-width baseline with Chebyshev spectral convolutions, no discriminator.
    Cheb,
}

impl FromStr for NeighborPooling {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "average" => Ok(Self::Average),
            "max" => Ok(Self::Max),
            other => Err(GnnError::UnsupportedConfig(format!(
                "unknown neighbor pooling type '{}' (expected sum, average or max)",
                other
            ))),
        }
    }
}

impl FromStr for GraphPooling {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sum" => Ok(Self::Sum),
            "average" => Ok(Self::Average),
            other => Err(GnnError::UnsupportedConfig(format!(
                "unknown graph pooling type '{}' (expected sum or average)",
                other
            ))),
        }
    }
}

impl FromStr for Architecture {
    type Err = GnnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gin" => Ok(Self::Gin),
            "gcn" => Ok(Self::Gcn),
            "cheb" => Ok(Self::Cheb),
            other => Err(GnnError::UnsupportedConfig(format!(
                "unknown architecture '{}' (expected gin, gcn or cheb)",
                other
            ))),
        }
    }
}

impl fmt::Display for NeighborPooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Average => write!(f, "average"),
            Self::Max => write!(f, "max"),
        }
    }
}

impl fmt::Display for GraphPooling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Average => write!(f, "average"),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gin => write!(f, "gin"),
            Self::Gcn => write!(f, "gcn"),
            Self::Cheb => write!(f, "cheb"),
        }
    }
}

// =============================================================================
// Per-layer widths
// =============================================================================

/// Widths of one message-passing layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    /// Width of the layer input (node features for layer 0)
    pub input_dim: usize,
    /// Hidden width inside the transform MLP
    pub hidden_dim: usize,
    /// Width of the layer output
    pub output_dim: usize,
    /// Number of linear layers in the transform MLP
    pub mlp_layers: usize,
}

/// Baseline `(hidden, output)` widths of the GCN / Chebyshev stacks, one row per layer.
pub const BASELINE_WIDTHS: [(usize, usize); 5] = [(32, 32), (32, 32), (64, 64), (64, 64), (64, 128)];

// =============================================================================
// ModelConfig
// =============================================================================

fn default_layer_dropout() -> f64 {
    0.5
}

fn default_cheb_k() -> usize {
    9
}

/// Configuration of an [`InfoMaxGnn`](crate::model::InfoMaxGnn)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Layer stack family
    pub architecture: Architecture,

    /// Number of message-passing layers
    pub num_layers: usize,

    /// Number of linear layers in each GIN transform MLP
    pub num_mlp_layers: usize,

    /// Node feature width
    pub input_dim: usize,

    /// Hidden width of every GIN layer (ignored by the baseline stacks)
    pub hidden_dim: usize,

    /// Number of classes
    pub output_dim: usize,

    /// Dropout on each per-layer prediction head
    pub final_dropout: f64,

    /// Dropout applied after the layers listed in `dropout_layers`
    #[serde(default = "default_layer_dropout")]
    pub layer_dropout: f64,

    /// Layer indices followed by dropout
    #[serde(default)]
    pub dropout_layers: BTreeSet<usize>,

    /// Learn epsilon to separate the center node from its neighbors
    pub learn_eps: bool,

    /// Node-to-graph reduction
    pub graph_pooling: GraphPooling,

    /// Neighbor aggregation
    pub neighbor_pooling: NeighborPooling,

    /// Chebyshev filter size (number of polynomial terms)
    #[serde(default = "default_cheb_k")]
    pub cheb_k: usize,
}

impl ModelConfig {
    /// GIN defaults: 5 layers, 2-layer MLPs, sum pooling, no learned epsilon
    pub fn gin(input_dim: usize, hidden_dim: usize, output_dim: usize) -> Self {
        Self {
            architecture: Architecture::Gin,
            num_layers: 5,
            num_mlp_layers: 2,
            input_dim,
            hidden_dim,
            output_dim,
            final_dropout: 0.5,
            layer_dropout: default_layer_dropout(),
            dropout_layers: BTreeSet::new(),
            learn_eps: false,
            graph_pooling: GraphPooling::Sum,
            neighbor_pooling: NeighborPooling::Sum,
            cheb_k: default_cheb_k(),
        }
    }

    /// GCN baseline with the fixed widths of [`BASELINE_WIDTHS`]
    pub fn gcn(input_dim: usize, output_dim: usize) -> Self {
        Self {
            architecture: Architecture::Gcn,
            num_mlp_layers: 1,
            ..Self::gin(input_dim, BASELINE_WIDTHS[4].1, output_dim)
        }
    }

    /// Chebyshev baseline with the fixed widths of [`BASELINE_WIDTHS`]
    pub fn cheb(input_dim: usize, output_dim: usize) -> Self {
        Self {
            architecture: Architecture::Cheb,
            ..Self::gcn(input_dim, output_dim)
        }
    }

    /// Builder: set layer count
    pub fn with_layers(mut self, num_layers: usize) -> Self {
        self.num_layers = num_layers;
        self
    }

    /// Builder: set MLP depth
    pub fn with_mlp_layers(mut self, num_mlp_layers: usize) -> Self {
        self.num_mlp_layers = num_mlp_layers;
        self
    }

    /// Builder: set neighbor pooling
    pub fn with_neighbor_pooling(mut self, pooling: NeighborPooling) -> Self {
        self.neighbor_pooling = pooling;
        self
    }

    /// Builder: set graph pooling
    pub fn with_graph_pooling(mut self, pooling: GraphPooling) -> Self {
        self.graph_pooling = pooling;
        self
    }

    /// Builder: learn epsilon
    pub fn with_learn_eps(mut self, learn_eps: bool) -> Self {
        self.learn_eps = learn_eps;
        self
    }

    /// Builder: set prediction-head dropout
    pub fn with_final_dropout(mut self, p: f64) -> Self {
        self.final_dropout = p;
        self
    }

    /// Builder: set layers followed by dropout
    pub fn with_dropout_layers(mut self, layers: impl IntoIterator<Item = usize>) -> Self {
        self.dropout_layers = layers.into_iter().collect();
        self
    }

    /// Builder: set Chebyshev filter size
    pub fn with_cheb_k(mut self, k: usize) -> Self {
        self.cheb_k = k;
        self
    }

    /// Parse a JSON configuration and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every hyper-parameter; builds the layer table as a side check.
    pub fn validate(&self) -> Result<()> {
        if self.num_layers == 0 {
            return Err(GnnError::UnsupportedConfig("num_layers must be at least 1".into()));
        }
        if self.num_mlp_layers == 0 {
            return Err(GnnError::UnsupportedConfig("num_mlp_layers must be at least 1".into()));
        }
        if self.input_dim == 0 || self.hidden_dim == 0 || self.output_dim == 0 {
            return Err(GnnError::UnsupportedConfig(format!(
                "dimensions must be positive (input {}, hidden {}, output {})",
                self.input_dim, self.hidden_dim, self.output_dim
            )));
        }
        for (name, p) in [("final_dropout", self.final_dropout), ("layer_dropout", self.layer_dropout)] {
            if !(0.0..1.0).contains(&p) {
                return Err(GnnError::UnsupportedConfig(format!(
                    "{} must be in [0, 1), got {}",
                    name, p
                )));
            }
        }
        if let Some(&layer) = self.dropout_layers.iter().find(|&&l| l >= self.num_layers) {
            return Err(GnnError::UnsupportedConfig(format!(
                "dropout layer {} is outside the {}-layer stack",
                layer, self.num_layers
            )));
        }
        if self.architecture == Architecture::Cheb {
            if self.cheb_k == 0 {
                return Err(GnnError::UnsupportedConfig("cheb_k must be at least 1".into()));
            }
            if self.neighbor_pooling == NeighborPooling::Max {
                return Err(GnnError::UnsupportedConfig(
                    "Chebyshev convolution needs an adjacency; max neighbor pooling is not supported".into(),
                ));
            }
        }
        self.layer_specs().map(|_| ())
    }

    /// Per-layer widths of the stack.
    ///
    /// GIN layers all share `hidden_dim`; the GCN / Chebyshev stacks follow
    /// [`BASELINE_WIDTHS`] and fail for depths beyond the table.
    pub fn layer_specs(&self) -> Result<Vec<LayerSpec>> {
        match self.architecture {
            Architecture::Gin => Ok((0..self.num_layers)
                .map(|layer| LayerSpec {
                    input_dim: if layer == 0 { self.input_dim } else { self.hidden_dim },
                    hidden_dim: self.hidden_dim,
                    output_dim: self.hidden_dim,
                    mlp_layers: self.num_mlp_layers,
                })
                .collect()),
            Architecture::Gcn | Architecture::Cheb => {
                if self.num_layers > BASELINE_WIDTHS.len() {
                    return Err(GnnError::UnsupportedConfig(format!(
                        "{} baseline supports at most {} layers, got {}",
                        self.architecture,
                        BASELINE_WIDTHS.len(),
                        self.num_layers
                    )));
                }
                let mut input_dim = self.input_dim;
                Ok(BASELINE_WIDTHS[..self.num_layers]
                    .iter()
                    .map(|&(hidden_dim, output_dim)| {
                        let spec = LayerSpec {
                            input_dim,
                            hidden_dim,
                            output_dim,
                            mlp_layers: 1,
                        };
                        input_dim = output_dim;
                        spec
                    })
                    .collect())
            }
        }
    }

    /// Width of the concatenated graph latent
    pub fn latent_dim(&self) -> Result<usize> {
        let specs = self.layer_specs()?;
        Ok(match self.architecture {
            Architecture::Gin => specs.iter().map(|s| s.output_dim).sum(),
            Architecture::Gcn | Architecture::Cheb => specs.last().map(|s| s.output_dim).unwrap_or(0),
        })
    }
}
