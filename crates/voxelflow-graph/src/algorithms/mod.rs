//! Graph algorithms.
//!
//! - [`scc`]: strongly connected components and cycle extraction
//! - [`topo`]: deterministic topological ordering

pub mod scc;
pub mod topo;

pub use scc::{count_components, cyclic_components, get_component_members, scc_tarjan};
pub use topo::topological_order;
