//! Core types for VoxelFlow.
//!
//! This crate provides the pieces shared by the scheduler, the domain
//! splitter and the halo protocol:
//!
//! - **Types**: device ids, faces, voxel coordinates and bounding boxes
//! - **Errors**: the [`VoxelError`] enum and crate-wide [`Result`]
//! - **Configuration**: [`VoxelFlowConfig`] with TOML loading and a builder
//! - **Timeline counters**: monotonic cross-device synchronisation values
//! - **Devices**: the [`DeviceStream`] interface and the [`CpuDevice`] backend
//! - **Fields**: the [`FieldRegistry`] interface and host field storage
//! - **Grid**: the [`GridProvider`] interface for the active voxel set

#![warn(missing_docs)]

pub mod config;
pub mod device;
pub mod error;
pub mod field;
pub mod grid;
pub mod timeline;
pub mod types;

pub use config::{ConfigBuilder, DecompositionConfig, HaloConfig, VoxelFlowConfig};
pub use device::{Command, CpuDevice, DeviceStream};
pub use error::{CycleError, Result, VoxelError};
pub use field::{
    FieldBlock, FieldHandle, FieldLayout, FieldRegistry, HostFieldRegistry, MAX_BLOCK_VALUES,
};
pub use grid::{GridProvider, StaticGrid};
pub use timeline::TimelineCounter;
pub use types::{Aabb, Axis, DeviceId, Face, VoxelCoord};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ConfigBuilder, DecompositionConfig, HaloConfig, VoxelFlowConfig};
    pub use crate::device::{Command, CpuDevice, DeviceStream};
    pub use crate::error::{CycleError, Result, VoxelError};
    pub use crate::field::{FieldBlock, FieldHandle, FieldLayout, FieldRegistry, HostFieldRegistry};
    pub use crate::grid::{GridProvider, StaticGrid};
    pub use crate::timeline::TimelineCounter;
    pub use crate::types::{Aabb, Axis, DeviceId, Face, VoxelCoord};
}
