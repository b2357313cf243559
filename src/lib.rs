//! # brain-gin
//!
//! Graph neural networks for brain-connectivity classification: per-subject
//! graphs of regions of interest (ROIs) are batched into block-diagonal sparse
//! structures and classified by GIN / GCN / Chebyshev stacks trained with an
//! auxiliary InfoMax (mutual-information) discriminator.
//!
//! ## Overview
//!
//! - **Graph**: immutable per-subject graph (node features, symmetric edges)
//! - **Batching**: block-diagonal adjacency, graph-pooling matrix, padded
//!   neighbor table for max pooling
//! - **Aggregation**: sum / average / max neighbor pooling with optional
//!   learnable epsilon reweighting of the center node
//! - **Model**: layer stack with jump readout and a bilinear discriminator head
//! - **Saliency**: input gradients and (gradient) class activations for one graph
//! - **Training**: cross-entropy + InfoMax loss, AdamW / SGD steps
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use brain_gin::prelude::*;
//! use rand::SeedableRng;
//!
//! let device = best_device();
//! let config = ModelConfig::gin(7, 64, 2).with_layers(5);
//! let model = InfoMaxGnn::new(config, &device)?;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let out = model.forward(&graphs, &mut rng)?;
//! println!("logits: {:?}", out.class_logits.dims());
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod config;
pub mod graph;
pub mod layers;
pub mod model;
pub mod primitives;
pub mod training;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph network operations
#[derive(Debug, thiserror::Error)]
pub enum GnnError {
    #[error("Malformed batch: {0}")]
    MalformedBatch(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph network operations
pub type Result<T> = std::result::Result<T, GnnError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{GnnError, Result};

    // Configuration
    pub use crate::config::{
        Architecture, GraphPooling, LayerSpec, ModelConfig, NeighborPooling,
    };

    // Graphs and batching
    pub use crate::graph::{
        BatchBuilder, Graph, NeighborStructure, PaddedNeighbors, SparseMatrix, SparseOperator,
    };

    // Model
    pub use crate::model::{ForwardOutput, InfoMaxGnn, SaliencyMap};

    // Primitives
    pub use crate::primitives::{best_device, cpu_device, gpu_disabled, relu, sigmoid};

    // Training
    pub use crate::training::{
        cross_entropy_loss, evaluate, infomax_loss, train_step, MetricsTracker, Optimizer,
        TrainingConfig, TrainingResult,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = cpu_device();
        assert!(matches!(device, Device::Cpu));
    }

    #[test]
    fn test_error_display() {
        let err = crate::GnnError::MalformedBatch("feature width 3 != 4".into());
        assert_eq!(err.to_string(), "Malformed batch: feature width 3 != 4");
    }
}
