//! Compressed Sparse Row (CSR) adjacency.
//!
//! Memory layout:
//! - `row_ptr[i]` = starting index in `col_idx` for unit i
//! - `col_idx[row_ptr[i]..row_ptr[i+1]]` = successors of unit i, ascending
//!
//! Successor lists are sorted and free of duplicates, so iteration order is
//! deterministic for a given edge set.

use super::node::UnitIndex;

/// Compressed Sparse Row adjacency over unit indices.
///
/// For a graph with N units and M edges:
/// - `row_ptr`: N+1 elements, where row_ptr[i] is the start of row i's edges
/// - `col_idx`: M elements, the successor unit indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrGraph {
    /// Number of nodes.
    pub num_nodes: usize,
    /// Row pointers (length = num_nodes + 1).
    pub row_ptr: Vec<u32>,
    /// Column indices (length = number of edges).
    pub col_idx: Vec<u32>,
}

impl CsrGraph {
    /// Create a graph without edges.
    pub fn empty(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            row_ptr: vec![0; num_nodes + 1],
            col_idx: Vec::new(),
        }
    }

    /// Create CSR from an edge list. Duplicate edges collapse.
    ///
    /// ```
    /// use voxelflow_graph::CsrGraph;
    ///
    /// // Graph: 0 -> 1 -> 2
    /// let csr = CsrGraph::from_edges(3, &[(0, 1), (1, 2), (0, 1)]);
    /// assert_eq!(csr.num_edges(), 2);
    /// ```
    pub fn from_edges(num_nodes: usize, edges: &[(u32, u32)]) -> Self {
        CsrGraphBuilder::new(num_nodes).with_edges(edges).build()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.col_idx.len()
    }

    /// Check if the graph has no edges.
    pub fn is_empty(&self) -> bool {
        self.col_idx.is_empty()
    }

    /// Out-degree of a node.
    pub fn degree(&self, node: UnitIndex) -> usize {
        self.successors(node).len()
    }

    /// Successors of a node, ascending.
    pub fn successors(&self, node: UnitIndex) -> &[u32] {
        let i = node.as_usize();
        if i >= self.num_nodes {
            return &[];
        }
        let start = self.row_ptr[i] as usize;
        let end = self.row_ptr[i + 1] as usize;
        &self.col_idx[start..end]
    }

    /// Check if edge exists from src to dst.
    pub fn has_edge(&self, src: UnitIndex, dst: UnitIndex) -> bool {
        self.successors(src).binary_search(&dst.0).is_ok()
    }

    /// In-degree of every node.
    pub fn in_degrees(&self) -> Vec<u32> {
        let mut degrees = vec![0u32; self.num_nodes];
        for &col in &self.col_idx {
            degrees[col as usize] += 1;
        }
        degrees
    }

    /// Iterate over all edges `(src, dst)` in row order.
    pub fn edges(&self) -> impl Iterator<Item = (UnitIndex, UnitIndex)> + '_ {
        (0..self.num_nodes).flat_map(move |row| {
            self.successors(UnitIndex::from(row))
                .iter()
                .map(move |&col| (UnitIndex::from(row), UnitIndex(col)))
        })
    }

    /// Create transpose (reverse graph).
    pub fn transpose(&self) -> Self {
        let mut builder = CsrGraphBuilder::new(self.num_nodes);
        for (src, dst) in self.edges() {
            builder.add_edge(dst.0, src.0);
        }
        builder.build()
    }
}

/// Builder for CSR graphs.
#[derive(Debug, Default)]
pub struct CsrGraphBuilder {
    num_nodes: usize,
    edges: Vec<(u32, u32)>,
}

impl CsrGraphBuilder {
    /// Create new builder with given number of nodes.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            edges: Vec::new(),
        }
    }

    /// Add edges from slice.
    pub fn with_edges(mut self, edges: &[(u32, u32)]) -> Self {
        self.edges.extend_from_slice(edges);
        self
    }

    /// Add a single edge.
    pub fn add_edge(&mut self, src: u32, dst: u32) {
        self.edges.push((src, dst));
    }

    /// Build the CSR graph. Edges touching unknown nodes are dropped.
    pub fn build(mut self) -> CsrGraph {
        let n = self.num_nodes;
        self.edges
            .retain(|&(src, dst)| (src as usize) < n && (dst as usize) < n);
        self.edges.sort_unstable();
        self.edges.dedup();

        let mut row_ptr = vec![0u32; n + 1];
        for &(src, _) in &self.edges {
            row_ptr[src as usize + 1] += 1;
        }
        for i in 1..=n {
            row_ptr[i] += row_ptr[i - 1];
        }

        CsrGraph {
            num_nodes: n,
            row_ptr,
            col_idx: self.edges.iter().map(|e| e.1).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        let csr = CsrGraph::empty(5);
        assert_eq!(csr.num_nodes, 5);
        assert_eq!(csr.num_edges(), 0);
        assert!(csr.is_empty());
        assert!(csr.successors(UnitIndex(9)).is_empty());
    }

    #[test]
    fn test_successors_sorted_and_deduplicated() {
        let csr = CsrGraph::from_edges(4, &[(0, 3), (0, 1), (0, 3), (1, 2)]);
        assert_eq!(csr.successors(UnitIndex(0)), &[1, 3]);
        assert_eq!(csr.successors(UnitIndex(1)), &[2]);
        assert!(csr.successors(UnitIndex(2)).is_empty());
        assert_eq!(csr.degree(UnitIndex(0)), 2);
    }

    #[test]
    fn test_out_of_range_edges_dropped() {
        let csr = CsrGraph::from_edges(2, &[(0, 1), (1, 5), (7, 0)]);
        assert_eq!(csr.num_edges(), 1);
    }

    #[test]
    fn test_in_degrees_and_transpose() {
        // 0 -> 1 -> 2, 0 -> 2
        let csr = CsrGraph::from_edges(3, &[(0, 1), (1, 2), (0, 2)]);
        assert_eq!(csr.in_degrees(), vec![0, 1, 2]);

        let t = csr.transpose();
        assert!(t.has_edge(UnitIndex(2), UnitIndex(0)));
        assert!(t.has_edge(UnitIndex(2), UnitIndex(1)));
        assert!(!t.has_edge(UnitIndex(0), UnitIndex(1)));
        assert_eq!(t.edges().count(), 3);
    }
}
