//! Unit kernels.
//!
//! A [`UnitKernel`] is the computation behind a registered unit. The
//! orchestrator dispatches it once per timestep on every device, with a
//! [`DispatchContext`] describing the device's sub-domain and giving access
//! to the fields the unit declared.

use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::field::{FieldHandle, FieldRegistry};
use voxelflow_core::types::DeviceId;
use voxelflow_domain::SubDomain;
use voxelflow_graph::UnitSpec;

/// What a dispatched kernel sees on one device.
pub struct DispatchContext<'a> {
    unit: &'a UnitSpec,
    subdomain: &'a SubDomain,
    registry: &'a dyn FieldRegistry,
    step: u64,
}

impl<'a> DispatchContext<'a> {
    pub(crate) fn new(
        unit: &'a UnitSpec,
        subdomain: &'a SubDomain,
        registry: &'a dyn FieldRegistry,
        step: u64,
    ) -> Self {
        Self {
            unit,
            subdomain,
            registry,
            step,
        }
    }

    /// Declaration of the running unit.
    pub fn unit(&self) -> &UnitSpec {
        self.unit
    }

    /// Device the kernel runs on.
    pub fn device(&self) -> DeviceId {
        self.subdomain.device
    }

    /// Voxels owned by the device.
    pub fn subdomain(&self) -> &SubDomain {
        self.subdomain
    }

    /// Timestep number, starting at 1.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Storage of a declared field on this device.
    ///
    /// Fields the unit neither reads nor writes are refused, so undeclared
    /// accesses cannot slip past the dependency graph.
    pub fn field(&self, name: &str) -> Result<FieldHandle> {
        let unknown = || VoxelError::UnknownField {
            unit: self.unit.id.clone(),
            field: name.to_string(),
        };
        if !self.unit.reads_field(name) && !self.unit.writes_field(name) {
            return Err(unknown());
        }
        self.registry
            .block(name, self.subdomain.device)
            .ok_or_else(unknown)
    }
}

/// Computation of a unit.
pub trait UnitKernel: Send + Sync {
    /// Run the unit on one device.
    fn dispatch(&self, ctx: &DispatchContext<'_>) -> Result<()>;
}

impl<F> UnitKernel for F
where
    F: Fn(&DispatchContext<'_>) -> Result<()> + Send + Sync,
{
    fn dispatch(&self, ctx: &DispatchContext<'_>) -> Result<()> {
        self(ctx)
    }
}
