//! Deterministic topological ordering.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::models::{CsrGraph, UnitIndex};

/// Kahn's algorithm with a min-heap on node index.
///
/// Among all nodes whose predecessors are done, the lowest index runs first,
/// so the order is a pure function of the edge set. Returns `None` if the
/// graph has a cycle; a partial order is never returned.
pub fn topological_order(adj: &CsrGraph) -> Option<Vec<UnitIndex>> {
    let mut in_degree = adj.in_degrees();
    let mut ready: BinaryHeap<Reverse<u32>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i as u32))
        .collect();

    let mut order = Vec::with_capacity(adj.num_nodes);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(UnitIndex(node));
        for &succ in adj.successors(UnitIndex(node)) {
            let d = &mut in_degree[succ as usize];
            *d -= 1;
            if *d == 0 {
                ready.push(Reverse(succ));
            }
        }
    }

    (order.len() == adj.num_nodes).then_some(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(order: &[UnitIndex]) -> Vec<u32> {
        order.iter().map(|u| u.get()).collect()
    }

    #[test]
    fn test_chain() {
        let adj = CsrGraph::from_edges(3, &[(2, 1), (1, 0)]);
        assert_eq!(ids(&topological_order(&adj).unwrap()), vec![2, 1, 0]);
    }

    #[test]
    fn test_lowest_index_first() {
        // 3 -> 0, everything else free
        let adj = CsrGraph::from_edges(4, &[(3, 0)]);
        assert_eq!(ids(&topological_order(&adj).unwrap()), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_cycle_has_no_order() {
        let adj = CsrGraph::from_edges(3, &[(0, 1), (1, 0)]);
        assert!(topological_order(&adj).is_none());
    }

    #[test]
    fn test_empty() {
        assert_eq!(topological_order(&CsrGraph::empty(0)), Some(Vec::new()));
    }
}
