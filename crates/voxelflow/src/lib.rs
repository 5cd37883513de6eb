//! # VoxelFlow
//!
//! Deterministic scheduling, domain decomposition and halo exchange for
//! sparse voxel simulations spread over several compute devices.
//!
//! ## Features
//!
//! - **Dependency graph**: units declare the fields they read and write; a
//!   deterministic schedule respects every read-after-write dependency and
//!   cycles are rejected before anything runs
//! - **Domain splitting**: active voxels are cut along a Morton curve into
//!   balanced, spatially compact sub-domains, one per device
//! - **Halo exchange**: boundary layers move between neighboring devices
//!   through a pack, transfer and unpack protocol ordered by timeline
//!   counters
//! - **Orchestration**: each timestep exchanges halos right before the units
//!   that need them and dispatches every unit on every device stream
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use voxelflow::prelude::*;
//!
//! let kernel = |ctx: &DispatchContext<'_>| -> Result<()> {
//!     let phi = ctx.field("phi")?;
//!     let mut phi = phi.write();
//!     for c in ctx.subdomain().voxels() {
//!         phi.set(c, 0, ctx.step() as f32);
//!     }
//!     Ok(())
//! };
//!
//! let mut sim = Simulation::builder()
//!     .config(VoxelFlowConfig::builder().device_count(2).build().unwrap())
//!     .grid(Arc::new(StaticGrid::cube(8)))
//!     .unit(UnitSpec::new("source").writes(["phi"]), kernel)
//!     .declare(UnitSpec::new("diffuse").reads(["phi"]).writes(["psi"]).with_neighbor_radius(1))
//!     .build()
//!     .unwrap();
//!
//! let report = sim.step().unwrap();
//! assert_eq!(report.halo_exchanges, 1);
//! ```
//!
//! ## Crates
//!
//! - [`voxelflow_core`]: types, errors, configuration, counters, devices
//! - [`graph`]: dependency graph and scheduler
//! - [`domain`]: domain splitter and load balance
//! - [`halo`]: halo buffers and the exchange protocol

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(hidden_glob_reexports)]

pub mod kernel;
pub mod simulation;

// Re-export core types
pub use voxelflow_core::*;

pub use voxelflow_domain as domain;
pub use voxelflow_graph as graph;
pub use voxelflow_halo as halo;

pub use kernel::{DispatchContext, UnitKernel};
pub use simulation::{Simulation, SimulationBuilder, StepReport};

use std::sync::Arc;

use voxelflow_domain::SubDomain;
use voxelflow_graph::{Schedule, UnitSpec};

/// Build a schedule from unit declarations.
pub fn build_graph<I>(units: I) -> Result<Arc<Schedule>>
where
    I: IntoIterator<Item = UnitSpec>,
{
    Ok(voxelflow_graph::build_graph(units)?)
}

/// Split active voxels over `device_count` devices.
pub fn decompose_domain(
    coords: &[VoxelCoord],
    device_count: usize,
    config: &DecompositionConfig,
) -> Result<Vec<SubDomain>> {
    voxelflow_domain::decompose(coords, device_count, config)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::kernel::{DispatchContext, UnitKernel};
    pub use crate::simulation::{Simulation, SimulationBuilder, StepReport};
    pub use crate::{build_graph, decompose_domain};
    pub use voxelflow_core::prelude::*;
    pub use voxelflow_domain::{BalanceReport, SubDomain};
    pub use voxelflow_graph::{DependencyGraph, GraphDescription, Schedule, UnitSpec};
    pub use voxelflow_halo::{HaloManager, HaloSynchronizer};
}
