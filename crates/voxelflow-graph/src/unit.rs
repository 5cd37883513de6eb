//! Computational unit declarations.
//!
//! A unit ("stencil") declares which fields it reads and writes and how far
//! into neighboring voxels it looks. The scheduler derives dependencies from
//! these declarations alone; it never inspects what a unit computes.

use serde::{Deserialize, Serialize};

/// Declaration of a computational unit.
///
/// ```
/// use voxelflow_graph::UnitSpec;
///
/// let unit = UnitSpec::new("diffuse")
///     .reads(["temperature", "conductivity"])
///     .writes(["temperature"])
///     .with_neighbor_radius(1);
///
/// assert!(unit.requires_halo());
/// assert!(unit.is_in_place("temperature"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Unique identifier.
    pub id: String,
    /// Input fields, in declaration order.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Output fields, in declaration order.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Neighbor radius in voxels; 0 means no neighbor access.
    #[serde(default, rename = "radius")]
    pub neighbor_radius: u32,
}

impl UnitSpec {
    /// Create a unit without inputs or outputs.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            neighbor_radius: 0,
        }
    }

    /// Add input fields.
    pub fn reads<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_unique(&mut self.reads, fields);
        self
    }

    /// Add output fields.
    pub fn writes<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        push_unique(&mut self.writes, fields);
        self
    }

    /// Set the neighbor radius.
    ///
    /// Halos carry the voxels reachable from a sub-domain along a single
    /// axis, up to the halo thickness. Edge and corner neighbors owned by
    /// another device are not exchanged, so a unit with this radius may read
    /// `(c.x + 1, c.y, c.z)` but not `(c.x + 1, c.y + 1, c.z)` across a
    /// device boundary.
    pub fn with_neighbor_radius(mut self, radius: u32) -> Self {
        self.neighbor_radius = radius;
        self
    }

    /// Whether the unit reads data owned by neighboring devices.
    pub fn requires_halo(&self) -> bool {
        self.neighbor_radius > 0
    }

    /// Check if the unit reads a field.
    pub fn reads_field(&self, field: &str) -> bool {
        self.reads.iter().any(|f| f == field)
    }

    /// Check if the unit writes a field.
    pub fn writes_field(&self, field: &str) -> bool {
        self.writes.iter().any(|f| f == field)
    }

    /// Reads and writes the same field.
    pub fn is_in_place(&self, field: &str) -> bool {
        self.reads_field(field) && self.writes_field(field)
    }

    /// Fields the unit both reads and writes, in read order.
    pub fn in_place_fields(&self) -> impl Iterator<Item = &str> + '_ {
        self.reads
            .iter()
            .filter(|f| self.writes_field(f))
            .map(String::as_str)
    }

    /// Drop repeated field names, keeping first occurrences.
    ///
    /// Needed for declarations that did not go through the builder, such as
    /// deserialized ones.
    pub fn normalized(mut self) -> Self {
        dedup_in_order(&mut self.reads);
        dedup_in_order(&mut self.writes);
        self
    }
}

fn push_unique<I, S>(list: &mut Vec<String>, fields: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for field in fields {
        let field = field.into();
        if !list.contains(&field) {
            list.push(field);
        }
    }
}

fn dedup_in_order(list: &mut Vec<String>) {
    let mut kept: Vec<String> = Vec::with_capacity(list.len());
    for field in list.drain(..) {
        if !kept.contains(&field) {
            kept.push(field);
        }
    }
    *list = kept;
}
