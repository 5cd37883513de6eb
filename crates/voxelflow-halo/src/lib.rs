//! Halo exchange for VoxelFlow.
//!
//! Neighboring devices replicate each other's boundary layers into ghost
//! cells so that stencils with a neighbor radius can read across partition
//! boundaries. This crate provides:
//!
//! - **Plans**: the exact voxels each device sends to each neighbor, derived
//!   from voxel contact ([`ExchangePlan`])
//! - **Buffers**: per-face local and remote halo buffers with timeline
//!   counters ([`HaloBufferSet`], [`FaceHalo`])
//! - **Manager**: ownership of every field's halo buffers across a
//!   decomposition, rebuilt on topology change ([`HaloManager`])
//! - **Synchronizer**: the pack, transfer and unpack protocol on device
//!   command streams, plus gates for dependent dispatches
//!   ([`HaloSynchronizer`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use voxelflow_core::prelude::*;
//! use voxelflow_domain::decompose;
//! use voxelflow_halo::{HaloManager, HaloSynchronizer};
//!
//! let grid = StaticGrid::cube(8);
//! let config = VoxelFlowConfig::builder().device_count(2).halo_thickness(1).build().unwrap();
//! let subs = decompose(&grid.active_voxels(), 2, &config.decomposition).unwrap();
//!
//! let registry = Arc::new(HostFieldRegistry::with_scalar_fields(["phi"]));
//! let regions: Vec<_> = subs.iter().map(|s| (s.device, s.bounds)).collect();
//! registry.allocate(&regions, 1).unwrap();
//!
//! let manager = Arc::new(HaloManager::with_subdomains(1, subs).unwrap());
//! manager.register_field("phi", registry.as_ref()).unwrap();
//!
//! let devices = CpuDevice::pool(2).unwrap();
//! let sync = HaloSynchronizer::new(manager, registry, devices, &config.halo);
//! assert_eq!(sync.step_halo_exchange("phi").unwrap(), 1);
//! ```

#![warn(missing_docs)]

pub mod buffer;
pub mod manager;
pub mod plan;
pub mod sync;

pub use buffer::{FaceHalo, HaloBufferSet, HaloLink, HaloSend};
pub use manager::{FieldHalos, HaloFootprint, HaloManager};
pub use plan::{ExchangePlan, HaloRoute};
pub use sync::{ExchangeTicket, HaloSynchronizer, StreamBarrier};
