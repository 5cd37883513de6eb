//! Field storage and the field registry interface.
//!
//! A field is a named per-voxel quantity. The scheduler only needs to know
//! whether a field exists; the halo protocol additionally needs its element
//! layout and per-device storage. [`FieldRegistry`] is that boundary and
//! [`HostFieldRegistry`] is a host-memory implementation of it.
//!
//! Each device stores a field in a [`FieldBlock`]: dense storage over the
//! device's bounding box grown by a ghost margin, double-buffered so that a
//! timestep reads `current` and writes `next`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Result, VoxelError};
use crate::types::{Aabb, DeviceId, VoxelCoord};

/// Element layout of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Values per voxel.
    pub components: usize,
    /// Size of one value in bytes.
    pub element_size: usize,
}

impl FieldLayout {
    /// One `f32` per voxel.
    pub const fn scalar() -> Self {
        Self {
            components: 1,
            element_size: std::mem::size_of::<f32>(),
        }
    }

    /// `components` `f32` values per voxel.
    pub const fn vector(components: usize) -> Self {
        Self {
            components,
            element_size: std::mem::size_of::<f32>(),
        }
    }

    /// Bytes per voxel.
    pub const fn bytes_per_voxel(&self) -> usize {
        self.components * self.element_size
    }
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self::scalar()
    }
}

/// Largest number of `f32` values one buffer of a block may hold.
pub const MAX_BLOCK_VALUES: usize = 1 << 32;

/// Shared handle to a device's field block.
pub type FieldHandle = Arc<RwLock<FieldBlock>>;

/// Double-buffered dense field storage for one device.
#[derive(Debug, Clone)]
pub struct FieldBlock {
    device: DeviceId,
    interior: Aabb,
    storage: Aabb,
    ghost_width: u32,
    components: usize,
    buffers: [Vec<f32>; 2],
    current: usize,
    written: bool,
    reads_pinned: bool,
}

impl FieldBlock {
    /// Allocate a zeroed block covering `interior` plus `ghost_width` layers.
    ///
    /// Storage is dense over the grown box. Boxes whose value count exceeds
    /// [`MAX_BLOCK_VALUES`] are rejected with [`VoxelError::InvalidConfig`].
    pub fn new(
        device: DeviceId,
        interior: Aabb,
        ghost_width: u32,
        components: usize,
    ) -> Result<Self> {
        let margin = i32::try_from(ghost_width).map_err(|_| {
            VoxelError::InvalidConfig(format!("ghost width {} is out of range", ghost_width))
        })?;
        let storage = interior.expanded(margin);
        let len = storage
            .checked_volume()
            .and_then(|volume| volume.checked_mul(components))
            .filter(|&len| len <= MAX_BLOCK_VALUES)
            .ok_or_else(|| {
                VoxelError::InvalidConfig(format!(
                    "{} storage {} with {} components exceeds {} values",
                    device, storage, components, MAX_BLOCK_VALUES
                ))
            })?;
        Ok(Self {
            device,
            interior,
            storage,
            ghost_width,
            components,
            buffers: [vec![0.0; len], vec![0.0; len]],
            current: 0,
            written: false,
            reads_pinned: false,
        })
    }

    /// Owning device.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Bounds of the owned voxels.
    pub fn interior(&self) -> Aabb {
        self.interior
    }

    /// Bounds of the stored voxels, ghost margin included.
    pub fn storage_bounds(&self) -> Aabb {
        self.storage
    }

    /// Ghost margin in voxel layers.
    pub fn ghost_width(&self) -> u32 {
        self.ghost_width
    }

    /// Values per voxel.
    pub fn components(&self) -> usize {
        self.components
    }

    /// Whether `next` has been written since the last swap.
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Offset of the first value of `c`, `None` outside the storage bounds.
    #[inline]
    pub fn offset_of(&self, c: VoxelCoord) -> Option<usize> {
        if !self.storage.contains(c) {
            return None;
        }
        let [dx, dy, _] = self.storage.dims();
        let x = (c.x - self.storage.min.x) as usize;
        let y = (c.y - self.storage.min.y) as usize;
        let z = (c.z - self.storage.min.z) as usize;
        Some(((z * dy + y) * dx + x) * self.components)
    }

    fn read_index(&self) -> usize {
        if self.written && !self.reads_pinned {
            1 - self.current
        } else {
            self.current
        }
    }

    /// Values visible to readers this timestep.
    pub fn read_view(&self) -> &[f32] {
        &self.buffers[self.read_index()]
    }

    /// Mutable access to the read view. Used to fill ghost regions.
    pub fn read_view_mut(&mut self) -> &mut [f32] {
        let idx = self.read_index();
        &mut self.buffers[idx]
    }

    /// Mutable access to `next`.
    ///
    /// The first call of a timestep seeds `next` with `current` so voxels a
    /// unit does not touch keep their values.
    pub fn write_view(&mut self) -> &mut [f32] {
        let next = 1 - self.current;
        if !self.written {
            let (a, b) = self.buffers.split_at_mut(1);
            if next == 1 {
                b[0].copy_from_slice(&a[0]);
            } else {
                a[0].copy_from_slice(&b[0]);
            }
            self.written = true;
        }
        &mut self.buffers[next]
    }

    /// Read one component at `c`.
    pub fn get(&self, c: VoxelCoord, component: usize) -> Option<f32> {
        if component >= self.components {
            return None;
        }
        let offset = self.offset_of(c)?;
        Some(self.read_view()[offset + component])
    }

    /// Write one component at `c` into `next`. Returns false outside bounds.
    pub fn set(&mut self, c: VoxelCoord, component: usize, value: f32) -> bool {
        if component >= self.components {
            return false;
        }
        match self.offset_of(c) {
            Some(offset) => {
                self.write_view()[offset + component] = value;
                true
            }
            None => false,
        }
    }

    /// Make `next` the new `current`. No-op if nothing was written.
    pub fn swap(&mut self) {
        if self.written {
            self.current = 1 - self.current;
            self.written = false;
        }
        self.reads_pinned = false;
    }

    /// Commit pending writes and serve reads from `current` until
    /// [`FieldBlock::unpin_reads`], while writes keep going to `next`.
    ///
    /// A unit that updates a field in place runs between the two calls so
    /// every voxel it computes sees the values from before the unit started.
    pub fn pin_reads(&mut self) {
        self.swap();
        self.reads_pinned = true;
    }

    /// Let readers see `next` again once it has been written.
    pub fn unpin_reads(&mut self) {
        self.reads_pinned = false;
    }

    /// Whether reads are pinned to `current`.
    pub fn reads_pinned(&self) -> bool {
        self.reads_pinned
    }
}

/// Access to named fields and their per-device storage.
pub trait FieldRegistry: Send + Sync {
    /// Check if a field exists.
    fn contains(&self, name: &str) -> bool;

    /// Element layout of a field.
    fn layout(&self, name: &str) -> Option<FieldLayout>;

    /// Block of a field on a device.
    fn block(&self, name: &str, device: DeviceId) -> Option<FieldHandle>;

    /// Names of all fields.
    fn field_names(&self) -> Vec<String>;

    /// (Re)allocate every field over per-device regions.
    ///
    /// Values of voxels that exist in both the old and new layout survive.
    fn allocate(&self, regions: &[(DeviceId, Aabb)], ghost_width: u32) -> Result<()>;

    /// Swap double buffers of every block. Called once per timestep.
    fn swap_buffers(&self);
}

struct FieldEntry {
    layout: FieldLayout,
    blocks: Vec<FieldHandle>,
}

#[derive(Default)]
struct Allocation {
    regions: Vec<(DeviceId, Aabb)>,
    ghost_width: u32,
}

/// Host-memory field registry.
#[derive(Default)]
pub struct HostFieldRegistry {
    fields: RwLock<BTreeMap<String, FieldEntry>>,
    allocation: RwLock<Allocation>,
}

impl HostFieldRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the given scalar fields, not yet allocated.
    pub fn with_scalar_fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields = names
            .into_iter()
            .map(|name| {
                let entry = FieldEntry {
                    layout: FieldLayout::scalar(),
                    blocks: Vec::new(),
                };
                (name.into(), entry)
            })
            .collect();
        Self {
            fields: RwLock::new(fields),
            allocation: RwLock::new(Allocation::default()),
        }
    }

    /// Register a field. Allocates blocks if regions are already known.
    ///
    /// Re-registering an existing name keeps the existing storage.
    pub fn register(&self, name: impl Into<String>, layout: FieldLayout) -> Result<()> {
        let name = name.into();
        let mut fields = self.fields.write();
        if fields.contains_key(&name) {
            return Ok(());
        }
        let allocation = self.allocation.read();
        let blocks = allocation
            .regions
            .iter()
            .map(|(device, aabb)| {
                FieldBlock::new(*device, *aabb, allocation.ghost_width, layout.components)
                    .map(|block| Arc::new(RwLock::new(block)))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("Registered field '{}' ({} components)", name, layout.components);
        fields.insert(name, FieldEntry { layout, blocks });
        Ok(())
    }

    /// Remove a field.
    pub fn unregister(&self, name: &str) -> bool {
        self.fields.write().remove(name).is_some()
    }

    /// Number of registered fields.
    pub fn len(&self) -> usize {
        self.fields.read().len()
    }

    /// Check if no fields are registered.
    pub fn is_empty(&self) -> bool {
        self.fields.read().is_empty()
    }
}

fn migrate(old: &[FieldHandle], block: &mut FieldBlock) {
    let components = block.components();
    for old_block in old {
        let old_block = old_block.read();
        let Some(shared) = old_block.interior().intersection(&block.interior()) else {
            continue;
        };
        let src = old_block.read_view();
        for z in shared.min.z..=shared.max.z {
            for y in shared.min.y..=shared.max.y {
                for x in shared.min.x..=shared.max.x {
                    let c = VoxelCoord::new(x, y, z);
                    if let (Some(s), Some(d)) = (old_block.offset_of(c), block.offset_of(c)) {
                        block.buffers[block.current][d..d + components]
                            .copy_from_slice(&src[s..s + components]);
                    }
                }
            }
        }
    }
}

impl FieldRegistry for HostFieldRegistry {
    fn contains(&self, name: &str) -> bool {
        self.fields.read().contains_key(name)
    }

    fn layout(&self, name: &str) -> Option<FieldLayout> {
        self.fields.read().get(name).map(|entry| entry.layout)
    }

    fn block(&self, name: &str, device: DeviceId) -> Option<FieldHandle> {
        let fields = self.fields.read();
        let entry = fields.get(name)?;
        entry
            .blocks
            .iter()
            .find(|block| block.read().device() == device)
            .cloned()
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    fn allocate(&self, regions: &[(DeviceId, Aabb)], ghost_width: u32) -> Result<()> {
        if ghost_width < 1 {
            return Err(VoxelError::InvalidConfig(
                "ghost width must be at least 1".to_string(),
            ));
        }

        let mut fields = self.fields.write();
        let mut allocated = Vec::with_capacity(fields.len());
        for entry in fields.values() {
            let blocks = regions
                .iter()
                .map(|(device, aabb)| {
                    let mut block =
                        FieldBlock::new(*device, *aabb, ghost_width, entry.layout.components)?;
                    migrate(&entry.blocks, &mut block);
                    Ok(Arc::new(RwLock::new(block)))
                })
                .collect::<Result<Vec<_>>>()?;
            allocated.push(blocks);
        }
        // Commit only once every field fits.
        for (entry, blocks) in fields.values_mut().zip(allocated) {
            entry.blocks = blocks;
        }

        *self.allocation.write() = Allocation {
            regions: regions.to_vec(),
            ghost_width,
        };
        info!(
            "Allocated {} fields over {} devices (ghost width {})",
            fields.len(),
            regions.len(),
            ghost_width
        );
        Ok(())
    }

    fn swap_buffers(&self) {
        for entry in self.fields.read().values() {
            for block in &entry.blocks {
                block.write().swap();
            }
        }
    }
}
