//! Sub-domain records.

use serde::{Deserialize, Serialize};

use voxelflow_core::types::{Aabb, DeviceId, Face, VoxelCoord};

/// A device adjacent to a sub-domain across one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Neighbor {
    /// Face of the owning sub-domain.
    pub face: Face,
    /// Neighboring device.
    pub device: DeviceId,
}

/// Run of consecutive active voxels along +X.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoxelRun {
    /// First voxel.
    pub start: VoxelCoord,
    /// Number of voxels.
    pub length: u32,
}

impl VoxelRun {
    /// Voxels covered by the run.
    pub fn voxels(&self) -> impl Iterator<Item = VoxelCoord> + '_ {
        (0..self.length as i32).map(move |dx| self.start.offset(dx, 0, 0))
    }

    /// Check if the run covers `c`.
    pub fn contains(&self, c: VoxelCoord) -> bool {
        c.y == self.start.y
            && c.z == self.start.z
            && c.x >= self.start.x
            && c.x < self.start.x + self.length as i32
    }
}

/// Portion of the active voxel set owned by one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubDomain {
    /// Owning device.
    pub device: DeviceId,
    /// Inclusive bounds of the owned voxels.
    pub bounds: Aabb,
    /// Number of owned voxels.
    pub voxel_count: usize,
    /// Owned voxels as x-aligned runs, sorted by `(z, y, x)`.
    pub regions: Vec<VoxelRun>,
    /// Adjacent devices, sorted by face then device.
    pub neighbors: Vec<Neighbor>,
}

impl SubDomain {
    /// Build a sub-domain from its owned voxels.
    ///
    /// Returns `None` for an empty set. Duplicate coordinates are counted once.
    pub fn from_voxels(device: DeviceId, mut voxels: Vec<VoxelCoord>) -> Option<Self> {
        let bounds = Aabb::from_coords(&voxels)?;
        voxels.sort_unstable_by_key(|c| (c.z, c.y, c.x));
        voxels.dedup();

        let mut regions: Vec<VoxelRun> = Vec::new();
        for &c in &voxels {
            match regions.last_mut() {
                Some(run)
                    if run.start.y == c.y
                        && run.start.z == c.z
                        && run.start.x + run.length as i32 == c.x =>
                {
                    run.length += 1;
                }
                _ => regions.push(VoxelRun {
                    start: c,
                    length: 1,
                }),
            }
        }

        Some(Self {
            device,
            bounds,
            voxel_count: voxels.len(),
            regions,
            neighbors: Vec::new(),
        })
    }

    /// Iterate over owned voxels in `(z, y, x)` order.
    pub fn voxels(&self) -> impl Iterator<Item = VoxelCoord> + '_ {
        self.regions.iter().flat_map(|run| run.voxels())
    }

    /// Check if the sub-domain owns `c`.
    pub fn owns(&self, c: VoxelCoord) -> bool {
        if !self.bounds.contains(c) {
            return false;
        }
        // Runs are sorted by (z, y, x start).
        let key = (c.z, c.y, c.x);
        let idx = self
            .regions
            .partition_point(|run| (run.start.z, run.start.y, run.start.x) <= key);
        idx > 0 && self.regions[idx - 1].contains(c)
    }

    /// Neighbors across one face.
    pub fn neighbors_on(&self, face: Face) -> impl Iterator<Item = DeviceId> + '_ {
        self.neighbors
            .iter()
            .filter(move |n| n.face == face)
            .map(|n| n.device)
    }

    /// Check if any neighbor is recorded on `face`.
    pub fn has_neighbor_on(&self, face: Face) -> bool {
        self.neighbors.iter().any(|n| n.face == face)
    }

    /// Faces with at least one neighbor.
    pub fn faces_with_neighbors(&self) -> Vec<Face> {
        Face::ALL
            .into_iter()
            .filter(|&f| self.has_neighbor_on(f))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runs_merge_along_x() {
        let voxels = vec![
            VoxelCoord::new(2, 0, 0),
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(1, 0, 0),
            VoxelCoord::new(1, 0, 0),
            VoxelCoord::new(5, 0, 0),
            VoxelCoord::new(0, 1, 0),
        ];
        let sd = SubDomain::from_voxels(DeviceId(0), voxels).unwrap();
        assert_eq!(sd.voxel_count, 5);
        assert_eq!(sd.regions.len(), 3);
        assert_eq!(sd.regions[0].length, 3);
        assert_eq!(sd.voxels().count(), 5);
        assert_eq!(sd.bounds.max, VoxelCoord::new(5, 1, 0));
    }

    #[test]
    fn test_owns() {
        let voxels = vec![
            VoxelCoord::new(0, 0, 0),
            VoxelCoord::new(1, 0, 0),
            VoxelCoord::new(4, 0, 0),
            VoxelCoord::new(0, 2, 1),
        ];
        let sd = SubDomain::from_voxels(DeviceId(0), voxels).unwrap();
        assert!(sd.owns(VoxelCoord::new(1, 0, 0)));
        assert!(sd.owns(VoxelCoord::new(4, 0, 0)));
        assert!(sd.owns(VoxelCoord::new(0, 2, 1)));
        assert!(!sd.owns(VoxelCoord::new(2, 0, 0)));
        assert!(!sd.owns(VoxelCoord::new(0, 1, 1)));
        assert!(!sd.owns(VoxelCoord::new(9, 9, 9)));
    }

    #[test]
    fn test_empty_voxels() {
        assert!(SubDomain::from_voxels(DeviceId(0), Vec::new()).is_none());
    }
}
