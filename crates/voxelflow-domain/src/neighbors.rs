//! Neighbor adjacency between sub-domains.

use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;
use tracing::debug;

use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::types::{DeviceId, Face, VoxelCoord};

use crate::subdomain::{Neighbor, SubDomain};

/// Owning device of every voxel in a decomposition.
pub fn owner_map(subdomains: &[SubDomain]) -> HashMap<VoxelCoord, DeviceId> {
    let total = subdomains.iter().map(|s| s.voxel_count).sum();
    let mut owners = HashMap::with_capacity(total);
    for sd in subdomains {
        owners.extend(sd.voxels().map(|c| (c, sd.device)));
    }
    owners
}

/// Assign neighbor records from voxel contact.
///
/// Two sub-domains are neighbors across `face` when a voxel of the first has
/// its `face` neighbor owned by the second. Bounding boxes play no part, so
/// interleaved Morton cuts whose boxes overlap still get every contact. A
/// face may have several neighbors. Existing records are replaced.
/// Reciprocity is checked afterwards.
pub fn compute_neighbors(subdomains: &mut [SubDomain]) -> Result<()> {
    let owners = owner_map(subdomains);

    let found: Vec<Vec<Neighbor>> = subdomains
        .par_iter()
        .map(|sd| {
            let mut contacts = BTreeSet::new();
            for c in sd.voxels() {
                for face in Face::ALL {
                    match owners.get(&c.step(face, 1)) {
                        Some(&device) if device != sd.device => {
                            contacts.insert(Neighbor { face, device });
                        }
                        _ => {}
                    }
                }
            }
            contacts.into_iter().collect()
        })
        .collect();

    let mut links = 0usize;
    for (sd, neighbors) in subdomains.iter_mut().zip(found) {
        links += neighbors.len();
        sd.neighbors = neighbors;
    }

    debug!(
        "Computed {} neighbor links across {} sub-domains",
        links,
        subdomains.len()
    );
    validate_adjacency(subdomains)
}

/// Check that every neighbor record has its mirror.
///
/// If A lists B on face F, B must list A on the opposite face.
pub fn validate_adjacency(subdomains: &[SubDomain]) -> Result<()> {
    let by_device: HashMap<DeviceId, &SubDomain> =
        subdomains.iter().map(|s| (s.device, s)).collect();

    for sd in subdomains {
        for nb in &sd.neighbors {
            let other = by_device
                .get(&nb.device)
                .ok_or(VoxelError::UnknownDevice(nb.device))?;
            let mirrored = Neighbor {
                face: nb.face.opposite(),
                device: sd.device,
            };
            if !other.neighbors.contains(&mirrored) {
                return Err(VoxelError::AdjacencyMismatch {
                    device: sd.device,
                    neighbor: nb.device,
                    face: nb.face,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(device: u32, min: (i32, i32, i32), max: (i32, i32, i32)) -> SubDomain {
        let mut voxels = Vec::new();
        for z in min.2..=max.2 {
            for y in min.1..=max.1 {
                for x in min.0..=max.0 {
                    voxels.push(VoxelCoord::new(x, y, z));
                }
            }
        }
        SubDomain::from_voxels(DeviceId(device), voxels).unwrap()
    }

    fn slab(device: u32, x0: i32, x1: i32) -> SubDomain {
        boxed(device, (x0, 0, 0), (x1, 3, 3))
    }

    #[test]
    fn test_slabs_along_x() {
        let mut subs = vec![slab(0, 0, 1), slab(1, 2, 3), slab(2, 4, 5)];
        compute_neighbors(&mut subs).unwrap();

        assert_eq!(
            subs[0].neighbors,
            vec![Neighbor {
                face: Face::PosX,
                device: DeviceId(1)
            }]
        );
        assert_eq!(subs[1].neighbors.len(), 2);
        assert_eq!(subs[1].neighbors_on(Face::NegX).collect::<Vec<_>>(), vec![DeviceId(0)]);
        assert_eq!(subs[1].neighbors_on(Face::PosX).collect::<Vec<_>>(), vec![DeviceId(2)]);
    }

    #[test]
    fn test_several_neighbors_on_one_face() {
        let mut subs = vec![
            slab(0, 0, 1),
            boxed(1, (2, 0, 0), (3, 1, 3)),
            boxed(2, (2, 2, 0), (3, 3, 3)),
        ];
        compute_neighbors(&mut subs).unwrap();
        assert_eq!(
            subs[0].neighbors_on(Face::PosX).collect::<Vec<_>>(),
            vec![DeviceId(1), DeviceId(2)]
        );
        // 1 and 2 touch along Y.
        assert!(subs[1].has_neighbor_on(Face::PosY));
        assert!(subs[2].has_neighbor_on(Face::NegY));
    }

    #[test]
    fn test_interleaved_boxes_use_voxel_contact() {
        // Device 1 wraps around device 0: their boxes overlap entirely.
        let mut inner = Vec::new();
        let mut outer = Vec::new();
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    let c = VoxelCoord::new(x, y, z);
                    if (1..3).contains(&x) && (1..3).contains(&y) && (1..3).contains(&z) {
                        inner.push(c);
                    } else {
                        outer.push(c);
                    }
                }
            }
        }
        let mut subs = vec![
            SubDomain::from_voxels(DeviceId(0), inner).unwrap(),
            SubDomain::from_voxels(DeviceId(1), outer).unwrap(),
        ];
        assert!(subs[1].bounds.intersection(&subs[0].bounds).is_some());

        compute_neighbors(&mut subs).unwrap();
        assert_eq!(subs[0].faces_with_neighbors(), Face::ALL.to_vec());
        assert_eq!(subs[1].faces_with_neighbors(), Face::ALL.to_vec());
        assert_eq!(subs[0].neighbors_on(Face::PosZ).collect::<Vec<_>>(), vec![DeviceId(1)]);
    }

    #[test]
    fn test_diagonal_contact_is_not_adjacency() {
        let mut subs = vec![boxed(0, (0, 0, 0), (1, 1, 1)), boxed(1, (2, 2, 0), (3, 3, 1))];
        compute_neighbors(&mut subs).unwrap();
        assert!(subs[0].neighbors.is_empty());
        assert!(subs[1].neighbors.is_empty());
    }

    #[test]
    fn test_owner_map() {
        let subs = vec![slab(0, 0, 1), slab(1, 2, 3)];
        let owners = owner_map(&subs);
        assert_eq!(owners.len(), 64);
        assert_eq!(owners.get(&VoxelCoord::new(1, 3, 3)), Some(&DeviceId(0)));
        assert_eq!(owners.get(&VoxelCoord::new(2, 0, 0)), Some(&DeviceId(1)));
        assert_eq!(owners.get(&VoxelCoord::new(4, 0, 0)), None);
    }

    #[test]
    fn test_missing_reciprocal_is_rejected() {
        let mut subs = vec![slab(0, 0, 1), slab(1, 2, 3)];
        compute_neighbors(&mut subs).unwrap();
        subs[1].neighbors.clear();

        match validate_adjacency(&subs).unwrap_err() {
            VoxelError::AdjacencyMismatch {
                device,
                neighbor,
                face,
            } => {
                assert_eq!(device, DeviceId(0));
                assert_eq!(neighbor, DeviceId(1));
                assert_eq!(face, Face::PosX);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_neighbor_device() {
        let mut subs = vec![slab(0, 0, 1)];
        subs[0].neighbors.push(Neighbor {
            face: Face::PosZ,
            device: DeviceId(9),
        });
        assert!(matches!(
            validate_adjacency(&subs),
            Err(VoxelError::UnknownDevice(DeviceId(9)))
        ));
    }
}
