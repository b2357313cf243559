//! Graph Batch Builder
//!
//! Concatenates an ordered batch of graphs into one composite graph so a
//! single sparse product replaces one product per graph.
//!
//! ```text
//! offsets  = [0, N_0, N_0 + N_1, ...]          cumulative node counts
//! A_block  = diag(A_0, A_1, ..., A_{B-1})      (+ I when epsilon is not learned)
//! P        = [B, ΣN_i], P[g, n] = 1 or 1/N_g   graph pooling
//! ```
//!
//! Every local node index is translated to a global batch index by adding its
//! graph's offset, so no entry ever connects two different graphs.

use super::Graph;
use crate::config::{GraphPooling, NeighborPooling};
use crate::{GnnError, Result};
use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

// =============================================================================
// Sparse matrix
// =============================================================================

/// Coordinate-format sparse matrix (duplicate coordinates add up)
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize, f32)>,
}

impl SparseMatrix {
    /// Empty `rows × cols` matrix
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            entries: Vec::new(),
        }
    }

    /// Append an entry
    pub fn push(&mut self, row: usize, col: usize, value: f32) {
        debug_assert!(row < self.rows && col < self.cols);
        self.entries.push((row, col, value));
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Stored `(row, col, value)` triplets
    pub fn entries(&self) -> &[(usize, usize, f32)] {
        &self.entries
    }

    /// Number of stored triplets
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Value at `(row, col)`, zero when absent
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.entries
            .iter()
            .filter(|&&(r, c, _)| r == row && c == col)
            .map(|&(_, _, v)| v)
            .sum()
    }

    /// Sum of each row
    pub fn row_sums(&self) -> Vec<f32> {
        let mut sums = vec![0.0f32; self.rows];
        for &(r, _, v) in &self.entries {
            sums[r] += v;
        }
        sums
    }

    /// Number of stored entries in each column
    pub fn column_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.cols];
        for &(_, c, _) in &self.entries {
            counts[c] += 1;
        }
        counts
    }

    /// Materialize as a dense `[rows, cols]` f32 tensor
    pub fn to_dense(&self, device: &Device) -> Result<Tensor> {
        let mut data = vec![0.0f32; self.rows * self.cols];
        for &(r, c, v) in &self.entries {
            data[r * self.cols + c] += v;
        }
        Tensor::from_vec(data, (self.rows, self.cols), device)
            .map_err(|e| GnnError::Tensor(format!("sparse to_dense failed: {}", e)))
    }

    /// Upload the triplets as a gather/scatter operator.
    ///
    /// Weights are dropped when every stored value is 1.
    pub fn to_operator(&self, device: &Device) -> Result<SparseOperator> {
        let nnz = self.entries.len();
        let rows: Vec<u32> = self.entries.iter().map(|&(r, _, _)| r as u32).collect();
        let cols: Vec<u32> = self.entries.iter().map(|&(_, c, _)| c as u32).collect();
        let weights = if self.entries.iter().all(|&(_, _, v)| v == 1.0) {
            None
        } else {
            let values: Vec<f32> = self.entries.iter().map(|&(_, _, v)| v).collect();
            Some(Tensor::from_vec(values, (nnz, 1), device)?)
        };
        Ok(SparseOperator {
            rows: self.rows,
            cols: self.cols,
            row_index: Tensor::from_vec(rows, nnz, device)?,
            col_index: Tensor::from_vec(cols, nnz, device)?,
            weights,
        })
    }
}

/// Device-resident sparse matrix applied without materializing it.
///
/// `S @ H` gathers the rows of `H` named by the column indices, scales them
/// by the stored values and scatter-adds them onto the row indices. Both
/// steps are differentiable.
#[derive(Debug, Clone)]
pub struct SparseOperator {
    rows: usize,
    cols: usize,
    row_index: Tensor,
    col_index: Tensor,
    weights: Option<Tensor>,
}

impl SparseOperator {
    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of stored entries
    pub fn nnz(&self) -> usize {
        self.row_index.elem_count()
    }

    /// Sparse-dense product `[rows, cols] @ [cols, D] -> [rows, D]`
    pub fn matmul(&self, h: &Tensor) -> Result<Tensor> {
        let (n, d) = h
            .dims2()
            .map_err(|e| GnnError::Tensor(format!("sparse matmul input must be 2-D: {}", e)))?;
        if n != self.cols {
            return Err(GnnError::Tensor(format!(
                "sparse matmul shape mismatch: [{}, {}] @ [{}, {}]",
                self.rows, self.cols, n, d
            )));
        }
        let out = Tensor::zeros((self.rows, d), h.dtype(), h.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }

        let mut messages = h
            .index_select(&self.col_index, 0)
            .map_err(|e| GnnError::Tensor(format!("sparse gather failed: {}", e)))?;
        if let Some(w) = &self.weights {
            messages = messages.broadcast_mul(w)?;
        }
        out.index_add(&self.row_index, &messages, 0)
            .map_err(|e| GnnError::Tensor(format!("sparse scatter failed: {}", e)))
    }
}

// =============================================================================
// Padded neighbor table
// =============================================================================

/// Fixed-width neighbor rows for max pooling.
///
/// Row `i` lists the global indices of node `i`'s neighbors, padded with
/// [`sentinel`](Self::sentinel) (the index of the dummy row appended to the
/// hidden states) and, when epsilon is not learned, ending with `i` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddedNeighbors {
    indices: Vec<u32>,
    num_nodes: usize,
    width: usize,
}

impl PaddedNeighbors {
    /// Row width
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows (batch nodes)
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Padding index: one past the last real node
    pub fn sentinel(&self) -> u32 {
        self.num_nodes as u32
    }

    /// Neighbor row of a node
    pub fn row(&self, node: usize) -> &[u32] {
        &self.indices[node * self.width..(node + 1) * self.width]
    }

    /// Flattened `[num_nodes * width]` u32 index tensor
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_vec(self.indices.clone(), self.indices.len(), device)
            .map_err(|e| GnnError::Tensor(format!("padded neighbor tensor failed: {}", e)))
    }
}

// =============================================================================
// Neighbor structure handed to the aggregation layer
// =============================================================================

/// Device-resident neighbor structure for one aggregation type
#[derive(Debug, Clone)]
pub enum NeighborStructure {
    /// Block-diagonal adjacency `[ΣN, ΣN]`
    Sum { adjacency: SparseOperator },
    /// Adjacency plus its row sums `[ΣN, 1]` (clamped to at least 1)
    Average { adjacency: SparseOperator, degree: Tensor },
    /// Flattened padded neighbor rows
    Max { index: Tensor, width: usize },
}

// =============================================================================
// BatchBuilder
// =============================================================================

/// Validated batch of graphs with cumulative node offsets
#[derive(Debug, Clone)]
pub struct BatchBuilder<'a> {
    graphs: &'a [Graph],
    offsets: Vec<usize>,
    feature_dim: usize,
}

impl<'a> BatchBuilder<'a> {
    /// Validate a batch: non-empty, every graph with the same feature width.
    pub fn new(graphs: &'a [Graph]) -> Result<Self> {
        let first = graphs
            .first()
            .ok_or_else(|| GnnError::MalformedBatch("batch contains no graphs".into()))?;
        let feature_dim = first.feature_dim();

        if let Some((i, g)) = graphs.iter().enumerate().find(|(_, g)| g.feature_dim() != feature_dim) {
            return Err(GnnError::MalformedBatch(format!(
                "graph {} has feature width {}, expected {}",
                i,
                g.feature_dim(),
                feature_dim
            )));
        }

        let mut offsets = Vec::with_capacity(graphs.len() + 1);
        offsets.push(0);
        for g in graphs {
            offsets.push(offsets[offsets.len() - 1] + g.num_nodes());
        }

        debug!(
            graphs = graphs.len(),
            nodes = offsets[graphs.len()],
            feature_dim,
            "built graph batch"
        );

        Ok(Self {
            graphs,
            offsets,
            feature_dim,
        })
    }

    /// Graphs in batch order
    pub fn graphs(&self) -> &'a [Graph] {
        self.graphs
    }

    /// Number of graphs
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Always false: construction rejects empty batches
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Cumulative node offsets, `len() + 1` entries
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Total node count `ΣN_i`
    pub fn total_nodes(&self) -> usize {
        self.offsets[self.graphs.len()]
    }

    /// Shared feature width
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Owning graph index of every batch node
    pub fn node_graph(&self) -> Vec<u32> {
        self.offsets
            .windows(2)
            .enumerate()
            .flat_map(|(g, w)| std::iter::repeat(g as u32).take(w[1] - w[0]))
            .collect()
    }

    /// Concatenated node features `[ΣN, F]`
    pub fn node_features(&self, device: &Device) -> Result<Tensor> {
        let parts: Vec<&Tensor> = self.graphs.iter().map(Graph::node_features).collect();
        Tensor::cat(&parts, 0)
            .and_then(|t| t.to_device(device))
            .map_err(|e| GnnError::Tensor(format!("feature concat failed: {}", e)))
    }

    /// Class labels in batch order; every graph must carry one.
    pub fn labels(&self) -> Result<Vec<u32>> {
        self.graphs
            .iter()
            .enumerate()
            .map(|(i, g)| {
                g.label()
                    .ok_or_else(|| GnnError::MalformedBatch(format!("graph {} has no label", i)))
            })
            .collect()
    }

    /// Block-diagonal adjacency `[ΣN, ΣN]`.
    ///
    /// `self_loops` adds the identity; use it only when the center node is
    /// aggregated together with its neighbors (epsilon not learned).
    pub fn block_diag_adjacency(&self, self_loops: bool) -> SparseMatrix {
        let n = self.total_nodes();
        let mut adj = SparseMatrix::new(n, n);
        for (g, offset) in self.graphs.iter().zip(&self.offsets) {
            for &(u, v) in g.edges() {
                adj.push(u + offset, v + offset, 1.0);
            }
        }
        if self_loops {
            for i in 0..n {
                adj.push(i, i, 1.0);
            }
        }
        adj
    }

    /// Graph pooling matrix `[B, ΣN]` with one entry per column
    pub fn graph_pool(&self, pooling: GraphPooling) -> SparseMatrix {
        let mut pool = SparseMatrix::new(self.len(), self.total_nodes());
        for (g, w) in self.offsets.windows(2).enumerate() {
            let count = w[1] - w[0];
            let value = match pooling {
                GraphPooling::Sum => 1.0,
                GraphPooling::Average => 1.0 / count as f32,
            };
            for node in w[0]..w[1] {
                pool.push(g, node, value);
            }
        }
        pool
    }

    /// Padded neighbor table for max pooling.
    ///
    /// Width is the batch-wide maximum degree, plus one for the center node
    /// when epsilon is not learned. A batch without any edge under learned
    /// epsilon gets a single sentinel column.
    pub fn padded_neighbors(&self, learn_eps: bool) -> PaddedNeighbors {
        let max_degree = self.graphs.iter().map(Graph::max_degree).max().unwrap_or(0);
        let width = if learn_eps { max_degree.max(1) } else { max_degree + 1 };
        let num_nodes = self.total_nodes();
        let sentinel = num_nodes as u32;

        let mut indices = Vec::with_capacity(num_nodes * width);
        for (g, &offset) in self.graphs.iter().zip(&self.offsets) {
            for (local, neighbors) in g.neighbors().iter().enumerate() {
                let start = indices.len();
                indices.extend(neighbors.iter().map(|&n| (n + offset) as u32));
                let pad_to = if learn_eps { start + width } else { start + width - 1 };
                indices.resize(pad_to, sentinel);
                if !learn_eps {
                    indices.push((local + offset) as u32);
                }
            }
        }

        PaddedNeighbors {
            indices,
            num_nodes,
            width,
        }
    }

    /// Scaled graph Laplacian `L̂ = -D^{-1/2} A D^{-1/2}` (self-loops dropped).
    ///
    /// This is `2L/λ_max - I` with `λ_max = 2` for the symmetric normalized
    /// Laplacian, the Chebyshev filter domain. Isolated nodes have empty rows.
    pub fn scaled_laplacian(&self) -> SparseMatrix {
        let adj = self.block_diag_adjacency(false);
        let degree = adj.row_sums();
        let mut laplacian = SparseMatrix::new(adj.rows, adj.cols);
        for &(r, c, v) in adj.entries() {
            let norm = (degree[r] * degree[c]).sqrt();
            if norm > 0.0 {
                laplacian.push(r, c, -v / norm);
            }
        }
        laplacian
    }

    /// Device structure for the given aggregation type
    pub fn neighbor_structure(
        &self,
        pooling: NeighborPooling,
        learn_eps: bool,
        device: &Device,
    ) -> Result<NeighborStructure> {
        match pooling {
            NeighborPooling::Sum => Ok(NeighborStructure::Sum {
                adjacency: self.block_diag_adjacency(!learn_eps).to_operator(device)?,
            }),
            NeighborPooling::Average => {
                let adj = self.block_diag_adjacency(!learn_eps);
                // Zero-degree rows divide by 1, leaving a zero aggregate.
                let degree: Vec<f32> = adj.row_sums().into_iter().map(|d| d.max(1.0)).collect();
                let n = degree.len();
                Ok(NeighborStructure::Average {
                    adjacency: adj.to_operator(device)?,
                    degree: Tensor::from_vec(degree, (n, 1), device)?,
                })
            }
            NeighborPooling::Max => {
                let padded = self.padded_neighbors(learn_eps);
                Ok(NeighborStructure::Max {
                    index: padded.to_tensor(device)?,
                    width: padded.width(),
                })
            }
        }
    }

    /// Node order that fills graph `g`'s positions from graph `permutation[g]`.
    ///
    /// Local position `j` of graph `g` takes node `j mod N_s` of the source
    /// graph `s = permutation[g]`, so every shuffled row of a block comes from
    /// exactly one other graph even when graph sizes differ.
    pub fn shuffled_node_order(&self, permutation: &[usize]) -> Result<Vec<u32>> {
        if permutation.len() != self.len() {
            return Err(GnnError::InvalidArgument(format!(
                "permutation has {} entries for {} graphs",
                permutation.len(),
                self.len()
            )));
        }
        let mut seen = vec![false; self.len()];
        for &g in permutation {
            if g >= self.len() || std::mem::replace(&mut seen[g], true) {
                return Err(GnnError::InvalidArgument(format!(
                    "invalid graph permutation {:?}",
                    permutation
                )));
            }
        }

        let mut order = Vec::with_capacity(self.total_nodes());
        for (g, &source) in permutation.iter().enumerate() {
            let start = self.offsets[source];
            let size = self.offsets[source + 1] - start;
            let len = self.offsets[g + 1] - self.offsets[g];
            order.extend((0..len).map(|j| (start + j % size) as u32));
        }
        Ok(order)
    }
}

/// Random graph-level permutation without fixed points (identity for one graph).
pub fn graph_permutation<R: Rng + ?Sized>(num_graphs: usize, rng: &mut R) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..num_graphs).collect();
    if num_graphs < 2 {
        return permutation;
    }
    loop {
        permutation.shuffle(rng);
        if permutation.iter().enumerate().all(|(i, &p)| i != p) {
            return permutation;
        }
    }
}
