//! Halo buffer ownership.
//!
//! The [`HaloManager`] owns the halo buffers of every registered field on
//! every device. Field storage itself stays with the field registry; halo
//! operations only borrow blocks from it for the duration of a command.
//!
//! One [`ExchangePlan`] per decomposition decides which voxels move; every
//! field's buffers are laid out from it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::field::{FieldLayout, FieldRegistry};
use voxelflow_core::types::DeviceId;
use voxelflow_domain::{validate_adjacency, SubDomain};

use crate::buffer::HaloBufferSet;
use crate::plan::ExchangePlan;

/// Halo buffers of one field across all devices.
#[derive(Debug)]
pub struct FieldHalos {
    name: String,
    layout: FieldLayout,
    thickness: u32,
    sets: Vec<Arc<HaloBufferSet>>,
    epoch: AtomicU64,
}

impl FieldHalos {
    fn allocate(
        name: &str,
        layout: FieldLayout,
        subdomains: &[SubDomain],
        plan: &ExchangePlan,
    ) -> Self {
        let sets = subdomains
            .iter()
            .map(|sd| Arc::new(HaloBufferSet::new(name, sd.device, plan, layout.components)))
            .collect();
        Self {
            name: name.to_string(),
            layout,
            thickness: plan.thickness(),
            sets,
            epoch: AtomicU64::new(0),
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element layout.
    pub fn layout(&self) -> FieldLayout {
        self.layout
    }

    /// Halo thickness in voxel layers.
    pub fn thickness(&self) -> u32 {
        self.thickness
    }

    /// Buffer sets in sub-domain order.
    pub fn sets(&self) -> &[Arc<HaloBufferSet>] {
        &self.sets
    }

    /// Buffer set of one device.
    pub fn set(&self, device: DeviceId) -> Option<&Arc<HaloBufferSet>> {
        self.sets.iter().find(|s| s.device() == device)
    }

    /// Last exchange epoch issued. 0 before the first exchange.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn commit_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Release);
    }

    /// Bytes held by all halo buffers of the field.
    pub fn bytes(&self) -> usize {
        self.sets.iter().map(|s| s.bytes()).sum()
    }

    /// Poison every counter of the field.
    pub fn poison(&self, reason: &str) {
        for set in &self.sets {
            set.poison(reason);
        }
    }
}

/// Summary of the halo memory of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HaloFootprint {
    /// Field name.
    pub field: String,
    /// Faces with buffers, summed over devices.
    pub faces: usize,
    /// Bytes in local and remote buffers.
    pub bytes: usize,
    /// Last exchange epoch.
    pub epoch: u64,
}

#[derive(Default)]
struct ManagerState {
    subdomains: Arc<Vec<SubDomain>>,
    plan: Arc<ExchangePlan>,
    fields: BTreeMap<String, Arc<FieldHalos>>,
}

/// Owner of all halo buffers.
pub struct HaloManager {
    thickness: u32,
    state: RwLock<ManagerState>,
}

impl HaloManager {
    /// Create a manager without a decomposition.
    pub fn new(thickness: u32) -> Self {
        Self {
            thickness,
            state: RwLock::new(ManagerState::default()),
        }
    }

    /// Create a manager over a decomposition.
    pub fn with_subdomains(thickness: u32, subdomains: Vec<SubDomain>) -> Result<Self> {
        let manager = Self::new(thickness);
        manager.rebuild(subdomains)?;
        Ok(manager)
    }

    /// Halo thickness in voxel layers.
    pub fn thickness(&self) -> u32 {
        self.thickness
    }

    /// Current decomposition.
    pub fn subdomains(&self) -> Arc<Vec<SubDomain>> {
        self.state.read().subdomains.clone()
    }

    /// Routes of the current decomposition.
    pub fn plan(&self) -> Arc<ExchangePlan> {
        self.state.read().plan.clone()
    }

    /// Allocate halo buffers for a field of `registry`.
    ///
    /// Registering a field twice keeps the existing buffers.
    pub fn register_field(&self, name: &str, registry: &dyn FieldRegistry) -> Result<Arc<FieldHalos>> {
        let layout = registry
            .layout(name)
            .ok_or_else(|| VoxelError::UnknownField {
                unit: "halo exchange".to_string(),
                field: name.to_string(),
            })?;

        let mut state = self.state.write();
        if let Some(existing) = state.fields.get(name) {
            return Ok(existing.clone());
        }
        let halos = Arc::new(FieldHalos::allocate(
            name,
            layout,
            &state.subdomains,
            &state.plan,
        ));
        debug!(
            "Registered halo field '{}' ({} bytes over {} devices)",
            name,
            halos.bytes(),
            halos.sets.len()
        );
        state.fields.insert(name.to_string(), halos.clone());
        Ok(halos)
    }

    /// Drop the halo buffers of a field. Pending waiters are poisoned.
    pub fn release_field(&self, name: &str) -> bool {
        match self.state.write().fields.remove(name) {
            Some(halos) => {
                halos.poison("field released");
                debug!("Released halo field '{}'", name);
                true
            }
            None => false,
        }
    }

    /// Replace the decomposition and reallocate every field's buffers.
    ///
    /// Counters restart at zero. Buffers of the old decomposition are
    /// poisoned so stale waiters fail.
    pub fn rebuild(&self, subdomains: Vec<SubDomain>) -> Result<()> {
        validate_adjacency(&subdomains)?;
        let plan = ExchangePlan::build(&subdomains, self.thickness)?;

        let mut state = self.state.write();
        let mut fields = BTreeMap::new();
        for (name, old) in &state.fields {
            let halos = FieldHalos::allocate(name, old.layout, &subdomains, &plan);
            fields.insert(name.clone(), Arc::new(halos));
        }
        for old in state.fields.values() {
            old.poison("decomposition rebuilt");
        }

        info!(
            "Halo buffers rebuilt: {} sub-domains, {} routes, {} fields",
            subdomains.len(),
            plan.routes().len(),
            fields.len()
        );
        state.subdomains = Arc::new(subdomains);
        state.plan = Arc::new(plan);
        state.fields = fields;
        Ok(())
    }

    /// Halo buffers of a field.
    pub fn field(&self, name: &str) -> Result<Arc<FieldHalos>> {
        self.state
            .read()
            .fields
            .get(name)
            .cloned()
            .ok_or_else(|| VoxelError::FieldNotRegistered(name.to_string()))
    }

    /// Buffer set of a field on one device.
    pub fn buffer_set(&self, field: &str, device: DeviceId) -> Result<Arc<HaloBufferSet>> {
        self.field(field)?
            .set(device)
            .cloned()
            .ok_or(VoxelError::UnknownDevice(device))
    }

    /// Names of registered fields.
    pub fn fields(&self) -> Vec<String> {
        self.state.read().fields.keys().cloned().collect()
    }

    /// Check if a field has halo buffers.
    pub fn is_registered(&self, name: &str) -> bool {
        self.state.read().fields.contains_key(name)
    }

    /// Memory summary per registered field.
    pub fn footprint(&self) -> Vec<HaloFootprint> {
        self.state
            .read()
            .fields
            .values()
            .map(|halos| HaloFootprint {
                field: halos.name.clone(),
                faces: halos.sets.iter().map(|s| s.faces().count()).sum(),
                bytes: halos.bytes(),
                epoch: halos.epoch(),
            })
            .collect()
    }
}

impl std::fmt::Debug for HaloManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("HaloManager")
            .field("thickness", &self.thickness)
            .field("subdomains", &state.subdomains.len())
            .field("fields", &state.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
