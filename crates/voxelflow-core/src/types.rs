//! Core identifiers and geometry types.
//!
//! - [`DeviceId`]: index of a compute device / sub-domain owner
//! - [`Face`], [`Axis`]: the six axis-aligned faces of a box
//! - [`VoxelCoord`]: integer voxel coordinate
//! - [`Aabb`]: inclusive integer bounding box

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Compute device index.
///
/// Using a newtype prevents mixing up device indices with voxel counts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Create a new device id.
    pub const fn new(id: u32) -> Self {
        DeviceId(id)
    }

    /// Get the inner value.
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Index into per-device vectors.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for DeviceId {
    fn from(id: usize) -> Self {
        DeviceId(id as u32)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}", self.0)
    }
}

/// Coordinate axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis.
    X = 0,
    /// Y axis.
    Y = 1,
    /// Z axis.
    Z = 2,
}

impl Axis {
    /// All axes in order.
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Index into `[x, y, z]` arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// The two tangential axes `(u, v)` spanning a face normal to this axis.
    pub const fn tangents(self) -> (Axis, Axis) {
        match self {
            Axis::X => (Axis::Y, Axis::Z),
            Axis::Y => (Axis::X, Axis::Z),
            Axis::Z => (Axis::X, Axis::Y),
        }
    }
}

/// Face direction of an axis-aligned box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Face {
    /// −X
    NegX = 0,
    /// +X
    PosX = 1,
    /// −Y
    NegY = 2,
    /// +Y
    PosY = 3,
    /// −Z
    NegZ = 4,
    /// +Z
    PosZ = 5,
}

impl Face {
    /// All faces in index order.
    pub const ALL: [Face; 6] = [
        Face::NegX,
        Face::PosX,
        Face::NegY,
        Face::PosY,
        Face::NegZ,
        Face::PosZ,
    ];

    /// Face on the other side of a shared boundary.
    pub const fn opposite(self) -> Face {
        match self {
            Face::NegX => Face::PosX,
            Face::PosX => Face::NegX,
            Face::NegY => Face::PosY,
            Face::PosY => Face::NegY,
            Face::NegZ => Face::PosZ,
            Face::PosZ => Face::NegZ,
        }
    }

    /// Normal axis.
    pub const fn axis(self) -> Axis {
        match self {
            Face::NegX | Face::PosX => Axis::X,
            Face::NegY | Face::PosY => Axis::Y,
            Face::NegZ | Face::PosZ => Axis::Z,
        }
    }

    /// True for the positive side of the axis.
    pub const fn is_positive(self) -> bool {
        matches!(self, Face::PosX | Face::PosY | Face::PosZ)
    }

    /// Face on the given side of an axis.
    pub const fn from_axis(axis: Axis, positive: bool) -> Face {
        match (axis, positive) {
            (Axis::X, false) => Face::NegX,
            (Axis::X, true) => Face::PosX,
            (Axis::Y, false) => Face::NegY,
            (Axis::Y, true) => Face::PosY,
            (Axis::Z, false) => Face::NegZ,
            (Axis::Z, true) => Face::PosZ,
        }
    }

    /// Index into per-face arrays.
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Face {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Face::NegX => "-X",
            Face::PosX => "+X",
            Face::NegY => "-Y",
            Face::PosY => "+Y",
            Face::NegZ => "-Z",
            Face::PosZ => "+Z",
        };
        f.write_str(s)
    }
}

/// Integer voxel coordinate.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    PartialOrd,
    Ord,
    Pod,
    Zeroable,
    Serialize,
    Deserialize,
)]
#[repr(C)]
pub struct VoxelCoord {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Z coordinate.
    pub z: i32,
}

impl VoxelCoord {
    /// Create a coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component along an axis.
    #[inline]
    pub const fn get(&self, axis: Axis) -> i32 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Set the component along an axis.
    #[inline]
    pub fn set(&mut self, axis: Axis, value: i32) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    /// Coordinate moved by `(dx, dy, dz)`.
    #[inline]
    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Coordinate `distance` voxels away through `face`.
    #[inline]
    pub const fn step(&self, face: Face, distance: i32) -> Self {
        let d = if face.is_positive() { distance } else { -distance };
        match face.axis() {
            Axis::X => Self::new(self.x.saturating_add(d), self.y, self.z),
            Axis::Y => Self::new(self.x, self.y.saturating_add(d), self.z),
            Axis::Z => Self::new(self.x, self.y, self.z.saturating_add(d)),
        }
    }

    /// Reinterpret a coordinate slice as raw bytes for upload.
    pub fn as_bytes(coords: &[VoxelCoord]) -> &[u8] {
        bytemuck::cast_slice(coords)
    }
}

impl From<[i32; 3]> for VoxelCoord {
    fn from(v: [i32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl fmt::Display for VoxelCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Inclusive integer axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner (inclusive).
    pub min: VoxelCoord,
    /// Maximum corner (inclusive).
    pub max: VoxelCoord,
}

impl Aabb {
    /// Create a box from inclusive corners.
    pub const fn new(min: VoxelCoord, max: VoxelCoord) -> Self {
        Self { min, max }
    }

    /// Box holding a single voxel.
    pub const fn point(c: VoxelCoord) -> Self {
        Self { min: c, max: c }
    }

    /// Smallest box covering all coordinates, `None` when empty.
    pub fn from_coords<'a, I>(coords: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a VoxelCoord>,
    {
        let mut iter = coords.into_iter();
        let first = *iter.next()?;
        let mut aabb = Aabb::point(first);
        for c in iter {
            aabb.include(*c);
        }
        Some(aabb)
    }

    /// Grow the box to include a coordinate.
    pub fn include(&mut self, c: VoxelCoord) {
        self.min = VoxelCoord::new(self.min.x.min(c.x), self.min.y.min(c.y), self.min.z.min(c.z));
        self.max = VoxelCoord::new(self.max.x.max(c.x), self.max.y.max(c.y), self.max.z.max(c.z));
    }

    /// Box grown by `margin` voxels on every side, clamped to the `i32` range.
    pub const fn expanded(&self, margin: i32) -> Self {
        Self {
            min: VoxelCoord::new(
                self.min.x.saturating_sub(margin),
                self.min.y.saturating_sub(margin),
                self.min.z.saturating_sub(margin),
            ),
            max: VoxelCoord::new(
                self.max.x.saturating_add(margin),
                self.max.y.saturating_add(margin),
                self.max.z.saturating_add(margin),
            ),
        }
    }

    /// Number of voxels along an axis.
    #[inline]
    pub const fn extent(&self, axis: Axis) -> usize {
        (self.max.get(axis) as i64 - self.min.get(axis) as i64 + 1) as usize
    }

    /// Extents along `[x, y, z]`.
    pub const fn dims(&self) -> [usize; 3] {
        [self.extent(Axis::X), self.extent(Axis::Y), self.extent(Axis::Z)]
    }

    /// Total number of voxel positions inside the box.
    ///
    /// Wraps on overflow; use [`Aabb::checked_volume`] for untrusted bounds.
    pub const fn volume(&self) -> usize {
        self.extent(Axis::X)
            .wrapping_mul(self.extent(Axis::Y))
            .wrapping_mul(self.extent(Axis::Z))
    }

    /// Voxel positions inside the box, `None` if the count overflows `usize`.
    pub fn checked_volume(&self) -> Option<usize> {
        self.extent(Axis::X)
            .checked_mul(self.extent(Axis::Y))?
            .checked_mul(self.extent(Axis::Z))
    }

    /// Check if a coordinate lies inside the box.
    #[inline]
    pub const fn contains(&self, c: VoxelCoord) -> bool {
        c.x >= self.min.x
            && c.x <= self.max.x
            && c.y >= self.min.y
            && c.y <= self.max.y
            && c.z >= self.min.z
            && c.z <= self.max.z
    }

    /// Inclusive overlap of the two boxes' ranges along an axis.
    pub fn axis_overlap(&self, other: &Aabb, axis: Axis) -> Option<(i32, i32)> {
        let lo = self.min.get(axis).max(other.min.get(axis));
        let hi = self.max.get(axis).min(other.max.get(axis));
        (lo <= hi).then_some((lo, hi))
    }

    /// Box covered by both boxes, `None` when they are disjoint.
    pub fn intersection(&self, other: &Aabb) -> Option<Aabb> {
        let (x0, x1) = self.axis_overlap(other, Axis::X)?;
        let (y0, y1) = self.axis_overlap(other, Axis::Y)?;
        let (z0, z1) = self.axis_overlap(other, Axis::Z)?;
        Some(Aabb::new(VoxelCoord::new(x0, y0, z0), VoxelCoord::new(x1, y1, z1)))
    }
}

impl fmt::Display for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} .. {}]", self.min, self.max)
    }
}
