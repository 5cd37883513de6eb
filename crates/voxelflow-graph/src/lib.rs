//! Dependency graph and deterministic scheduler for VoxelFlow units.
//!
//! This crate turns unit declarations into an execution order:
//!
//! - **Units**: [`UnitSpec`] declares read/write field sets and neighbor radius
//! - **CSR**: [`CsrGraph`] stores read-after-write edges over [`UnitIndex`]
//! - **SCC**: Tarjan's algorithm for cycle detection and reporting
//! - **Scheduling**: Kahn's algorithm with registration-order tie-break
//! - **Export**: [`GraphDescription`] as JSON or Graphviz DOT
//!
//! # Example
//!
//! ```
//! use voxelflow_graph::{DependencyGraph, UnitSpec};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_unit(UnitSpec::new("advect").reads(["velocity", "density"]).writes(["density"]));
//! graph.add_unit(UnitSpec::new("forces").reads(["density"]).writes(["velocity"]));
//! graph.add_unit(UnitSpec::new("init").writes(["density"]));
//!
//! // advect <-> forces form a cycle through velocity and density.
//! assert!(graph.has_cycle());
//! assert!(graph.execution_order().is_err());
//! ```

#![warn(missing_docs)]

use std::sync::Arc;

use voxelflow_core::CycleError;

pub mod algorithms;
pub mod export;
pub mod graph;
pub mod models;
pub mod unit;

pub use algorithms::{cyclic_components, scc_tarjan, topological_order};
pub use export::{EdgeDescription, GraphDescription, NodeDescription};
pub use graph::{DependencyEdge, DependencyGraph, Schedule, WriterConflict};
pub use models::{ComponentId, CsrGraph, CsrGraphBuilder, FieldId, UnitIndex};
pub use unit::UnitSpec;

/// Build a schedule from units in registration order.
pub fn build_graph<I>(units: I) -> Result<Arc<Schedule>, CycleError>
where
    I: IntoIterator<Item = UnitSpec>,
{
    DependencyGraph::from_units(units).schedule()
}
