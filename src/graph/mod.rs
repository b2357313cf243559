//! Brain Graphs
//!
//! One [`Graph`] per subject: ROI node features plus a symmetric edge list
//! derived from the thresholded connectivity matrix. Graphs are immutable once
//! built; [`BatchBuilder`] turns an ordered slice of them into the batched
//! sparse structures consumed by the layer stack.

mod batch;

pub use batch::{
    graph_permutation, BatchBuilder, NeighborStructure, PaddedNeighbors, SparseMatrix, SparseOperator,
};

use crate::{GnnError, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::BTreeSet;

/// A single subject's brain network
#[derive(Debug, Clone)]
pub struct Graph {
    /// Node features `[N, F]` (f32)
    node_features: Tensor,
    /// Directed edge list with both directions of every undirected edge, sorted
    edges: Vec<(usize, usize)>,
    /// Sorted neighbor indices per node
    neighbors: Vec<Vec<usize>>,
    max_degree: usize,
    label: Option<u32>,
}

impl Graph {
    /// Build a graph from a `[N, F]` feature tensor and undirected edges.
    ///
    /// Each `(u, v)` is stored in both directions; duplicates collapse.
    /// Fails on an empty graph, a non-matrix feature tensor, an endpoint
    /// outside `0..N`, or a self-edge.
    pub fn new(node_features: Tensor, edges: &[(usize, usize)]) -> Result<Self> {
        let (num_nodes, feature_dim) = node_features
            .dims2()
            .map_err(|e| GnnError::MalformedBatch(format!("node features must be [N, F]: {}", e)))?;
        if num_nodes == 0 || feature_dim == 0 {
            return Err(GnnError::MalformedBatch(format!(
                "graph must have at least one node and one feature, got [{}, {}]",
                num_nodes, feature_dim
            )));
        }

        let mut directed = BTreeSet::new();
        for &(u, v) in edges {
            if u >= num_nodes || v >= num_nodes {
                return Err(GnnError::MalformedBatch(format!(
                    "edge ({}, {}) out of range for {} nodes",
                    u, v, num_nodes
                )));
            }
            if u == v {
                return Err(GnnError::MalformedBatch(format!("self-edge on node {}", u)));
            }
            directed.insert((u, v));
            directed.insert((v, u));
        }

        let mut neighbors = vec![Vec::new(); num_nodes];
        for &(u, v) in &directed {
            neighbors[u].push(v);
        }
        let max_degree = neighbors.iter().map(Vec::len).max().unwrap_or(0);

        Ok(Self {
            node_features: node_features.to_dtype(DType::F32)?,
            edges: directed.into_iter().collect(),
            neighbors,
            max_degree,
            label: None,
        })
    }

    /// Build a graph from row-major feature rows on the CPU
    pub fn from_rows(rows: &[Vec<f32>], edges: &[(usize, usize)]) -> Result<Self> {
        let feature_dim = rows.first().map(Vec::len).unwrap_or(0);
        if rows.iter().any(|r| r.len() != feature_dim) {
            return Err(GnnError::MalformedBatch("feature rows have differing widths".into()));
        }
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        let features = Tensor::from_vec(flat, (rows.len(), feature_dim), &Device::Cpu)?;
        Self::new(features, edges)
    }

    /// Builder: attach a class label
    pub fn with_label(mut self, label: u32) -> Self {
        self.label = Some(label);
        self
    }

    /// Node features `[N, F]`
    pub fn node_features(&self) -> &Tensor {
        &self.node_features
    }

    /// Directed edges (both directions of every undirected edge)
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Neighbor list of every node
    pub fn neighbors(&self) -> &[Vec<usize>] {
        &self.neighbors
    }

    /// Largest node degree
    pub fn max_degree(&self) -> usize {
        self.max_degree
    }

    /// Number of nodes
    pub fn num_nodes(&self) -> usize {
        self.neighbors.len()
    }

    /// Feature width
    pub fn feature_dim(&self) -> usize {
        self.node_features.dims()[1]
    }

    /// Class label, if any
    pub fn label(&self) -> Option<u32> {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_graph(n: usize, features: usize) -> Graph {
        let rows = vec![vec![1.0f32; features]; n];
        let edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
        Graph::from_rows(&rows, &edges).unwrap()
    }

    #[test]
    fn test_edges_are_symmetric() {
        let g = path_graph(3, 2);
        assert_eq!(g.edges(), &[(0, 1), (1, 0), (1, 2), (2, 1)]);
        assert_eq!(g.neighbors(), &[vec![1], vec![0, 2], vec![1]]);
        assert_eq!(g.max_degree(), 2);
        assert_eq!(g.num_nodes(), 3);
        assert_eq!(g.feature_dim(), 2);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let rows = vec![vec![0.0f32]; 2];
        let g = Graph::from_rows(&rows, &[(0, 1), (1, 0), (0, 1)]).unwrap();
        assert_eq!(g.edges().len(), 2);
        assert_eq!(g.max_degree(), 1);
    }

    #[test]
    fn test_isolated_nodes() {
        let rows = vec![vec![0.5f32, 0.5]; 4];
        let g = Graph::from_rows(&rows, &[]).unwrap();
        assert!(g.edges().is_empty());
        assert_eq!(g.max_degree(), 0);
        assert!(g.label().is_none());
        assert_eq!(g.with_label(1).label(), Some(1));
    }

    #[test]
    fn test_invalid_graphs_rejected() {
        let rows = vec![vec![0.0f32]; 2];
        assert!(matches!(
            Graph::from_rows(&rows, &[(0, 2)]),
            Err(GnnError::MalformedBatch(_))
        ));
        assert!(matches!(
            Graph::from_rows(&rows, &[(1, 1)]),
            Err(GnnError::MalformedBatch(_))
        ));
        assert!(Graph::from_rows(&[], &[]).is_err());
        assert!(Graph::from_rows(&[vec![1.0], vec![1.0, 2.0]], &[]).is_err());
    }
}
