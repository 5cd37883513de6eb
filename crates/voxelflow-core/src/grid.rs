//! Grid topology provider interface.
//!
//! The sparse-grid structure itself lives outside this workspace. The
//! orchestrator only needs the active voxel set and a generation number
//! that changes whenever that set does.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::VoxelCoord;

/// Source of the active voxel set.
pub trait GridProvider: Send + Sync {
    /// All active voxel coordinates.
    fn active_voxels(&self) -> Vec<VoxelCoord>;

    /// Topology generation. Increases whenever the active set changes.
    fn generation(&self) -> u64;
}

/// In-memory grid with an explicit voxel list.
#[derive(Debug, Default)]
pub struct StaticGrid {
    voxels: RwLock<Vec<VoxelCoord>>,
    generation: AtomicU64,
}

impl StaticGrid {
    /// Create a grid from a voxel list.
    pub fn new(voxels: Vec<VoxelCoord>) -> Self {
        Self {
            voxels: RwLock::new(voxels),
            generation: AtomicU64::new(1),
        }
    }

    /// Dense `nx × ny × nz` box anchored at the origin.
    pub fn dense_box(nx: i32, ny: i32, nz: i32) -> Self {
        let mut voxels = Vec::with_capacity((nx.max(0) * ny.max(0) * nz.max(0)) as usize);
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    voxels.push(VoxelCoord::new(x, y, z));
                }
            }
        }
        Self::new(voxels)
    }

    /// Dense cube of edge length `size`.
    pub fn cube(size: i32) -> Self {
        Self::dense_box(size, size, size)
    }

    /// Replace the active set and bump the generation.
    pub fn set_voxels(&self, voxels: Vec<VoxelCoord>) {
        *self.voxels.write() = voxels;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of active voxels.
    pub fn len(&self) -> usize {
        self.voxels.read().len()
    }

    /// Check if the grid has no active voxels.
    pub fn is_empty(&self) -> bool {
        self.voxels.read().is_empty()
    }
}

impl GridProvider for StaticGrid {
    fn active_voxels(&self) -> Vec<VoxelCoord> {
        self.voxels.read().clone()
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_box() {
        let grid = StaticGrid::dense_box(4, 3, 2);
        assert_eq!(grid.len(), 24);
        assert_eq!(grid.active_voxels()[5], VoxelCoord::new(1, 1, 0));
        assert_eq!(StaticGrid::cube(0).len(), 0);
    }

    #[test]
    fn test_generation_bumps_on_change() {
        let grid = StaticGrid::cube(2);
        let before = grid.generation();
        grid.set_voxels(vec![VoxelCoord::new(0, 0, 0)]);
        assert!(grid.generation() > before);
        assert_eq!(grid.len(), 1);
    }
}
