//! Neighbor Aggregation
//!
//! One message-passing step over a batched graph:
//!
//! | Pooling | Operation |
//! |---|---|
//! | sum | `A_block @ H` (gather + scatter-add over the edge list) |
//! | average | `(A_block @ H) / deg`, `deg = rowsum(A_block)` |
//! | max | `max_j H'[nbr[i, j]]`, `H' = [H; colmin(H)]` |
//!
//! With learned epsilon the center node is added back separately:
//!
//! ```text
//! pooled = aggregate(H) + (1 + ε_l) · H
//! ```
//!
//! Without it the adjacency already carries self-loops (or the padded row
//! already ends with the center index), so the center contributes once.

use crate::graph::NeighborStructure;
use crate::{GnnError, Result};
use candle_core::Tensor;

/// Aggregate neighbor states for every node in the batch
///
/// # Arguments
/// - `h`: Hidden states `[ΣN, D]`
/// - `structure`: Batch neighbor structure for the configured pooling
///
/// # Returns
/// Aggregated states `[ΣN, D]`
pub fn aggregate(h: &Tensor, structure: &NeighborStructure) -> Result<Tensor> {
    match structure {
        NeighborStructure::Sum { adjacency } => adjacency.matmul(h),
        NeighborStructure::Average { adjacency, degree } => adjacency
            .matmul(h)?
            .broadcast_div(degree)
            .map_err(|e| GnnError::Tensor(format!("average aggregation div failed: {}", e))),
        NeighborStructure::Max { index, width } => max_pool(h, index, *width),
    }
}

/// Elementwise max over padded neighbor rows.
///
/// A dummy row holding the column-wise minimum of `h` is appended at index
/// `ΣN`, so padding entries can never exceed a real neighbor.
///
/// # Arguments
/// - `h`: Hidden states `[ΣN, D]`
/// - `index`: Flattened padded neighbor table `[ΣN * width]` (u32)
/// - `width`: Row width of the table
pub fn max_pool(h: &Tensor, index: &Tensor, width: usize) -> Result<Tensor> {
    let (n, d) = h
        .dims2()
        .map_err(|e| GnnError::Tensor(format!("max_pool dims2 failed: {}", e)))?;
    if index.elem_count() != n * width {
        return Err(GnnError::Tensor(format!(
            "max_pool index has {} entries, expected {} x {}",
            index.elem_count(),
            n,
            width
        )));
    }

    let dummy = h
        .min_keepdim(0)
        .map_err(|e| GnnError::Tensor(format!("max_pool dummy min failed: {}", e)))?;
    let with_dummy = Tensor::cat(&[h, &dummy], 0)
        .map_err(|e| GnnError::Tensor(format!("max_pool cat failed: {}", e)))?;

    with_dummy
        .index_select(index, 0)
        .map_err(|e| GnnError::Tensor(format!("max_pool gather failed: {}", e)))?
        .reshape((n, width, d))
        .map_err(|e| GnnError::Tensor(format!("max_pool reshape failed: {}", e)))?
        .max(1)
        .map_err(|e| GnnError::Tensor(format!("max_pool reduce failed: {}", e)))
}

/// `pooled + (1 + eps) · h` where `eps` is the layer's scalar `[1]`
pub fn reweight_center(pooled: &Tensor, h: &Tensor, eps: &Tensor) -> Result<Tensor> {
    let scale = (eps + 1.0).map_err(|e| GnnError::Tensor(format!("eps shift failed: {}", e)))?;
    let center = h
        .broadcast_mul(&scale)
        .map_err(|e| GnnError::Tensor(format!("eps scale failed: {}", e)))?;
    (pooled + center).map_err(|e| GnnError::Tensor(format!("eps combine failed: {}", e)))
}
