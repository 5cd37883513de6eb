//! Diagnostic export of the dependency graph.
//!
//! [`GraphDescription`] is a plain snapshot of nodes and edges that can be
//! rendered as JSON or as Graphviz DOT.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use voxelflow_core::error::Result;

use crate::graph::DependencyGraph;

/// Node of an exported graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Unit identifier.
    pub id: String,
    /// Registration index.
    pub index: u32,
    /// Input fields.
    pub reads: Vec<String>,
    /// Output fields.
    pub writes: Vec<String>,
    /// Neighbor radius.
    pub neighbor_radius: u32,
    /// Whether a halo exchange precedes this unit.
    pub requires_halo: bool,
    /// Position in the execution order; absent when the graph is cyclic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// Edge of an exported graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDescription {
    /// Producing unit.
    pub from: String,
    /// Consuming unit.
    pub to: String,
    /// Fields carried by the dependency.
    pub fields: Vec<String>,
}

/// Visualizable snapshot of a dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Units in registration order.
    pub nodes: Vec<NodeDescription>,
    /// RAW dependencies.
    pub edges: Vec<EdgeDescription>,
    /// Units of every cycle, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<Vec<String>>,
}

impl GraphDescription {
    /// Snapshot a graph.
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let (order, cycles) = match graph.execution_order() {
            Ok(order) => (Some(order), Vec::new()),
            Err(err) => (None, err.components),
        };

        let nodes = graph
            .units()
            .iter()
            .enumerate()
            .map(|(index, unit)| NodeDescription {
                id: unit.id.clone(),
                index: index as u32,
                reads: unit.reads.clone(),
                writes: unit.writes.clone(),
                neighbor_radius: unit.neighbor_radius,
                requires_halo: unit.requires_halo(),
                position: order
                    .as_ref()
                    .and_then(|order| order.iter().position(|id| *id == unit.id)),
            })
            .collect();

        let edges = graph
            .edges()
            .into_iter()
            .map(|edge| EdgeDescription {
                from: edge.from,
                to: edge.to,
                fields: edge.fields,
            })
            .collect();

        Self {
            nodes,
            edges,
            cycles,
        }
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render as Graphviz DOT.
    ///
    /// Units that need a halo exchange are drawn as double octagons; units
    /// on a cycle are drawn red.
    pub fn to_dot(&self) -> String {
        let on_cycle = |id: &str| self.cycles.iter().any(|c| c.iter().any(|u| u == id));

        let mut out = String::from("digraph units {\n    rankdir=LR;\n");
        for node in &self.nodes {
            let shape = if node.requires_halo {
                "doubleoctagon"
            } else {
                "box"
            };
            let color = if on_cycle(&node.id) { ", color=red" } else { "" };
            let _ = writeln!(
                out,
                "    \"{}\" [shape={}{}, label=\"{}\\nradius {}\"];",
                escape(&node.id),
                shape,
                color,
                escape(&node.id),
                node.neighbor_radius
            );
        }
        for edge in &self.edges {
            let _ = writeln!(
                out,
                "    \"{}\" -> \"{}\" [label=\"{}\"];",
                escape(&edge.from),
                escape(&edge.to),
                escape(&edge.fields.join(", "))
            );
        }
        out.push_str("}\n");
        out
    }
}

impl DependencyGraph {
    /// Snapshot for diagnostics.
    pub fn to_visualizable(&self) -> GraphDescription {
        GraphDescription::from_graph(self)
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
