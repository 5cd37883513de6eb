//! Strongly Connected Components (SCC).
//!
//! A strongly connected component is a maximal subgraph where every node
//! can reach every other node. The dependency graph has no self-loops, so a
//! component describes a cycle exactly when it has two or more members.

use crate::models::{ComponentId, CsrGraph, UnitIndex};

/// Tarjan's SCC algorithm.
///
/// Uses DFS with lowlink values to find SCCs in O(V+E) time.
/// Returns component ID for each node.
pub fn scc_tarjan(adj: &CsrGraph) -> Vec<ComponentId> {
    let n = adj.num_nodes;
    let mut component = vec![ComponentId::UNASSIGNED; n];
    if n == 0 {
        return component;
    }

    let mut index = vec![u32::MAX; n]; // Discovery index
    let mut lowlink = vec![u32::MAX; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();

    let mut current_index = 0u32;
    let mut current_component = 0u32;

    // Iterative to keep deep chains off the call stack
    for start in 0..n {
        if index[start] != u32::MAX {
            continue;
        }

        let mut dfs_stack: Vec<(usize, usize)> = vec![(start, 0)];

        while let Some(top) = dfs_stack.last_mut() {
            let (v, neighbor_idx) = *top;
            if neighbor_idx == 0 && index[v] == u32::MAX {
                index[v] = current_index;
                lowlink[v] = current_index;
                current_index += 1;
                stack.push(v);
                on_stack[v] = true;
            }

            let successors = adj.successors(UnitIndex::from(v));

            if neighbor_idx < successors.len() {
                top.1 += 1;
                let w = successors[neighbor_idx] as usize;

                if index[w] == u32::MAX {
                    dfs_stack.push((w, 0));
                } else if on_stack[w] {
                    // Back edge into the current SCC
                    lowlink[v] = lowlink[v].min(index[w]);
                }
            } else {
                dfs_stack.pop();

                if let Some(&(parent, _)) = dfs_stack.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[v]);
                }

                if lowlink[v] == index[v] {
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component[w] = ComponentId::new(current_component);
                        if w == v {
                            break;
                        }
                    }
                    current_component += 1;
                }
            }
        }
    }

    component
}

/// Count unique components.
pub fn count_components(components: &[ComponentId]) -> usize {
    let mut seen: Vec<u32> = components
        .iter()
        .filter(|c| c.is_assigned())
        .map(|c| c.get())
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Group nodes by component. Members are listed in ascending index order.
pub fn get_component_members(components: &[ComponentId]) -> Vec<Vec<UnitIndex>> {
    let num_components = components
        .iter()
        .filter(|c| c.is_assigned())
        .map(|c| c.get() as usize + 1)
        .max()
        .unwrap_or(0);

    let mut members = vec![Vec::new(); num_components];
    for (node, comp) in components.iter().enumerate() {
        if comp.is_assigned() {
            members[comp.get() as usize].push(UnitIndex::from(node));
        }
    }
    members
}

/// Components that contain a cycle.
///
/// Sorted by size, then by lowest member index.
pub fn cyclic_components(adj: &CsrGraph) -> Vec<Vec<UnitIndex>> {
    let components = scc_tarjan(adj);
    let mut cyclic: Vec<Vec<UnitIndex>> = get_component_members(&components)
        .into_iter()
        .filter(|members| {
            members.len() > 1 || members.first().is_some_and(|&u| adj.has_edge(u, u))
        })
        .collect();
    cyclic.sort_by_key(|members| (members.len(), members[0]));
    cyclic
}
