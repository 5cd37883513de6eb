//! Error types for VoxelFlow.
//!
//! Structural errors (cycles, unknown fields, adjacency mismatches) are
//! raised while a plan is being built and prevent any execution. Runtime
//! errors (halo transfer failures, device faults, timeouts) abort the step
//! in progress.

use std::time::Duration;

use thiserror::Error;

use crate::types::{DeviceId, Face};

/// Result type alias for VoxelFlow operations.
pub type Result<T> = std::result::Result<T, VoxelError>;

/// No valid topological order exists for the registered units.
///
/// `units` is the smallest cyclic strongly connected component, listed in
/// registration order. `components` holds every cyclic component found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle between units: {}", .units.join(" -> "))]
pub struct CycleError {
    /// Units of the smallest cycle.
    pub units: Vec<String>,
    /// All cyclic components (each with at least two units).
    pub components: Vec<Vec<String>>,
}

/// Errors raised by the scheduler, the domain splitter and the halo protocol.
#[derive(Debug, Error)]
pub enum VoxelError {
    // ===== Structural errors =====
    /// The unit graph contains a RAW cycle.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A unit references a field that the registry does not know.
    #[error("unit '{unit}' references unknown field '{field}'")]
    UnknownField {
        /// Unit identifier.
        unit: String,
        /// Missing field name.
        field: String,
    },

    /// A unit identifier was not registered.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// A neighbor relation has no reciprocal record.
    #[error(
        "adjacency mismatch: device {device} lists device {neighbor} on face {face} \
         but the reverse relation is missing"
    )]
    AdjacencyMismatch {
        /// Device holding the neighbor record.
        device: DeviceId,
        /// Claimed neighbor.
        neighbor: DeviceId,
        /// Face of `device` on which the neighbor was recorded.
        face: Face,
    },

    /// No device is known for an index.
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    /// The field has no halo buffers registered against the decomposition.
    #[error("field '{0}' is not registered for halo exchange")]
    FieldNotRegistered(String),

    // ===== Runtime errors =====
    /// A cross-device halo transfer failed or timed out.
    #[error("halo transfer {sender} -> {receiver} on face {face} failed: {reason}")]
    HaloTransfer {
        /// Producing device.
        sender: DeviceId,
        /// Consuming device.
        receiver: DeviceId,
        /// Face of the producing device.
        face: Face,
        /// Failure description.
        reason: String,
    },

    /// A device stream failed while executing a command.
    #[error("device {device} fault: {reason}")]
    DeviceFault {
        /// Failed device.
        device: DeviceId,
        /// Failure description.
        reason: String,
    },

    /// A wait did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A timeline counter was asked to move backwards or stand still.
    #[error("timeline counter must increase: current {current}, requested {requested}")]
    NonMonotonicSignal {
        /// Current counter value.
        current: u64,
        /// Rejected value.
        requested: u64,
    },

    /// A timeline counter was poisoned by a failed producer.
    #[error("timeline counter poisoned: {0}")]
    CounterPoisoned(String),

    /// A device stream has been shut down.
    #[error("device {0} stream is closed")]
    StreamClosed(DeviceId),

    // ===== Configuration errors =====
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("configuration parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoxelError {
    /// Check if this error is a structural (plan-time) error.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            VoxelError::Cycle(_)
                | VoxelError::UnknownField { .. }
                | VoxelError::UnknownUnit(_)
                | VoxelError::AdjacencyMismatch { .. }
                | VoxelError::InvalidConfig(_)
        )
    }

    /// Check if this error aborts the step in progress.
    pub fn is_step_fatal(&self) -> bool {
        matches!(
            self,
            VoxelError::HaloTransfer { .. }
                | VoxelError::DeviceFault { .. }
                | VoxelError::Timeout(_)
                | VoxelError::CounterPoisoned(_)
                | VoxelError::StreamClosed(_)
        )
    }
}
