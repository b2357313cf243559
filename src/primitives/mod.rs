//! Graph Network Primitives
//!
//! Tensor-level building blocks of the layer stack.
//!
//! ## Submodules
//!
//! - [`aggregation`]: neighbor aggregation (sum, average, max) and epsilon reweighting
//! - [`tensor_ops`]: device selection, dropout, finiteness checks
//! - [`activations`]: sigmoid and ReLU

pub mod aggregation;
mod activations;
mod tensor_ops;

pub use activations::*;
pub use aggregation::{aggregate, max_pool, reweight_center};
pub use tensor_ops::*;
