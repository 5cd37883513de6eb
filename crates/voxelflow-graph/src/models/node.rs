//! Index types for the dependency graph.
//!
//! Unit and field names are interned once when the graph is built; all
//! internal structures work on these compact indices:
//! - [`UnitIndex`]: registration index of a unit
//! - [`FieldId`]: interned field name
//! - [`ComponentId`]: strongly connected component

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Unit index (registration order).
///
/// Using a newtype prevents mixing up unit indices with field ids.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct UnitIndex(pub u32);

impl UnitIndex {
    /// Create a new unit index.
    pub const fn new(index: u32) -> Self {
        UnitIndex(index)
    }

    /// Get the inner value.
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Index into per-unit vectors.
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for UnitIndex {
    fn from(index: usize) -> Self {
        UnitIndex(index as u32)
    }
}

impl From<UnitIndex> for usize {
    fn from(index: UnitIndex) -> Self {
        index.0 as usize
    }
}

// SAFETY: UnitIndex is #[repr(transparent)] over u32
unsafe impl Zeroable for UnitIndex {}
unsafe impl Pod for UnitIndex {}

/// Interned field name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct FieldId(pub u32);

impl FieldId {
    /// Create a new field id.
    pub const fn new(id: u32) -> Self {
        FieldId(id)
    }

    /// Get the inner value.
    pub const fn get(&self) -> u32 {
        self.0
    }
}

// SAFETY: FieldId is #[repr(transparent)] over u32
unsafe impl Zeroable for FieldId {}
unsafe impl Pod for FieldId {}

/// Strongly connected component identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ComponentId(pub u32);

impl ComponentId {
    /// Unassigned component.
    pub const UNASSIGNED: ComponentId = ComponentId(u32::MAX);

    /// Create a new component ID.
    pub const fn new(id: u32) -> Self {
        ComponentId(id)
    }

    /// Check if component is assigned.
    pub const fn is_assigned(&self) -> bool {
        self.0 != u32::MAX
    }

    /// Get the inner value.
    pub const fn get(&self) -> u32 {
        self.0
    }
}

// SAFETY: ComponentId is #[repr(transparent)] over u32
unsafe impl Zeroable for ComponentId {}
unsafe impl Pod for ComponentId {}
