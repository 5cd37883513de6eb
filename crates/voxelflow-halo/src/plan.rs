//! Exchange plans.
//!
//! A plan lists, for every ordered pair of devices and every face, the exact
//! voxels the sender has to replicate into the receiver's ghost cells. A
//! sender voxel `c` goes to receiver `B` through face `f` when some voxel
//! `c + k·f` with `1 <= k <= T` is owned by `B`. Plans come from the owned
//! voxel sets, not from bounding boxes, so sub-domains of any shape
//! (interleaved Morton runs, sparse grids) exchange every contact.
//!
//! Both ends of a route read the same voxel list, which fixes the buffer
//! layout: values appear in the list's `(z, y, x)` order.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::types::{DeviceId, Face, VoxelCoord};
use voxelflow_domain::{owner_map, SubDomain};

/// Voxels one device sends to another through one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaloRoute {
    /// Owner of the voxels.
    pub sender: DeviceId,
    /// Device holding them as ghosts.
    pub receiver: DeviceId,
    /// Face of the sender the voxels leave through.
    pub face: Face,
    /// Sender-owned voxels, sorted by `(z, y, x)`.
    pub voxels: Arc<[VoxelCoord]>,
}

/// Every route of a decomposition for one halo thickness.
#[derive(Debug, Clone, Default)]
pub struct ExchangePlan {
    thickness: u32,
    routes: Vec<HaloRoute>,
}

impl ExchangePlan {
    /// Derive the routes of `subdomains`.
    ///
    /// Fails when a recorded neighbor has no voxel contact with its
    /// sub-domain, which means the neighbor list does not belong to these
    /// voxel sets.
    pub fn build(subdomains: &[SubDomain], thickness: u32) -> Result<Self> {
        if thickness < 1 {
            return Err(VoxelError::InvalidConfig(
                "halo thickness must be at least 1".to_string(),
            ));
        }
        let owners = owner_map(subdomains);
        let reach = thickness.min(i32::MAX as u32) as i32;

        let mut routes: Vec<HaloRoute> = subdomains
            .par_iter()
            .flat_map_iter(|sd| {
                let mut outgoing: BTreeMap<(Face, DeviceId), Vec<VoxelCoord>> = BTreeMap::new();
                let mut hits: Vec<DeviceId> = Vec::new();
                for c in sd.voxels() {
                    for face in Face::ALL {
                        hits.clear();
                        for k in 1..=reach {
                            match owners.get(&c.step(face, k)) {
                                Some(&device) if device != sd.device && !hits.contains(&device) => {
                                    hits.push(device);
                                }
                                _ => {}
                            }
                        }
                        for &device in &hits {
                            outgoing.entry((face, device)).or_default().push(c);
                        }
                    }
                }
                outgoing
                    .into_iter()
                    .map(|((face, receiver), voxels)| HaloRoute {
                        sender: sd.device,
                        receiver,
                        face,
                        voxels: voxels.into(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        routes.sort_by_key(|r| (r.sender, r.face, r.receiver));

        let plan = Self { thickness, routes };
        for sd in subdomains {
            for nb in &sd.neighbors {
                if plan.route(sd.device, nb.face, nb.device).is_none() {
                    return Err(VoxelError::AdjacencyMismatch {
                        device: sd.device,
                        neighbor: nb.device,
                        face: nb.face,
                    });
                }
            }
        }

        debug!(
            "Exchange plan: {} routes, {} voxels per exchange (thickness {})",
            plan.routes.len(),
            plan.voxel_count(),
            thickness
        );
        Ok(plan)
    }

    /// Halo thickness the plan was built for.
    pub fn thickness(&self) -> u32 {
        self.thickness
    }

    /// All routes, sorted by sender, face and receiver.
    pub fn routes(&self) -> &[HaloRoute] {
        &self.routes
    }

    /// Route from `sender` to `receiver` through `face` of the sender.
    pub fn route(&self, sender: DeviceId, face: Face, receiver: DeviceId) -> Option<&HaloRoute> {
        self.routes
            .iter()
            .find(|r| r.sender == sender && r.face == face && r.receiver == receiver)
    }

    /// Routes leaving `device` through `face`.
    pub fn outgoing(&self, device: DeviceId, face: Face) -> impl Iterator<Item = &HaloRoute> {
        self.routes
            .iter()
            .filter(move |r| r.sender == device && r.face == face)
    }

    /// Routes arriving at `device` across its `face`.
    pub fn incoming(&self, device: DeviceId, face: Face) -> impl Iterator<Item = &HaloRoute> {
        let through = face.opposite();
        self.routes
            .iter()
            .filter(move |r| r.receiver == device && r.face == through)
    }

    /// Voxels moved by one exchange of a field.
    pub fn voxel_count(&self) -> usize {
        self.routes.iter().map(|r| r.voxels.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxelflow_core::config::DecompositionConfig;
    use voxelflow_core::grid::{GridProvider, StaticGrid};
    use voxelflow_domain::{compute_neighbors, decompose};

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

    #[test]
    fn test_slab_routes_cover_thickness() {
        let mut subs = vec![boxed(0, (0, 0, 0), (3, 3, 3)), boxed(1, (0, 0, 4), (3, 3, 7))];
        compute_neighbors(&mut subs).unwrap();
        let plan = ExchangePlan::build(&subs, 2).unwrap();

        assert_eq!(plan.routes().len(), 2);
        let up = plan.route(DeviceId(0), Face::PosZ, DeviceId(1)).unwrap();
        assert_eq!(up.voxels.len(), 32);
        assert!(up.voxels.iter().all(|c| c.z == 2 || c.z == 3));
        assert!(up
            .voxels
            .windows(2)
            .all(|w| (w[0].z, w[0].y, w[0].x) < (w[1].z, w[1].y, w[1].x)));

        let down = plan.route(DeviceId(1), Face::NegZ, DeviceId(0)).unwrap();
        assert!(down.voxels.iter().all(|c| c.z == 4 || c.z == 5));
        assert_eq!(plan.incoming(DeviceId(1), Face::NegZ).count(), 1);
        assert_eq!(plan.outgoing(DeviceId(1), Face::PosZ).count(), 0);
        assert_eq!(plan.voxel_count(), 64);
    }

    #[test]
    fn test_routes_jump_gaps_within_thickness() {
        // z = 2 is inactive; a radius-2 stencil at z = 3 still reads z = 1.
        let mut subs = vec![boxed(0, (0, 0, 0), (1, 1, 1)), boxed(1, (0, 0, 3), (1, 1, 4))];
        compute_neighbors(&mut subs).unwrap();
        assert!(subs[0].neighbors.is_empty());

        assert!(ExchangePlan::build(&subs, 1).unwrap().routes().is_empty());
        let plan = ExchangePlan::build(&subs, 2).unwrap();
        let up = plan.route(DeviceId(0), Face::PosZ, DeviceId(1)).unwrap();
        assert!(up.voxels.iter().all(|c| c.z == 1));
        assert_eq!(up.voxels.len(), 4);
    }

    #[test]
    fn test_uneven_split_routes_match_contacts() {
        let grid = StaticGrid::cube(8);
        let subs = decompose(&grid.active_voxels(), 3, &DecompositionConfig::default()).unwrap();
        let plan = ExchangePlan::build(&subs, 1).unwrap();
        let owners = owner_map(&subs);

        // Every cross-device face contact is one voxel in one route.
        let mut contacts = 0;
        for sd in &subs {
            for c in sd.voxels() {
                for face in Face::ALL {
                    let Some(&other) = owners.get(&c.step(face, 1)) else {
                        continue;
                    };
                    if other != sd.device {
                        contacts += 1;
                        let route = plan.route(sd.device, face, other).unwrap();
                        let key = (c.z, c.y, c.x);
                        assert!(route
                            .voxels
                            .binary_search_by_key(&key, |v| (v.z, v.y, v.x))
                            .is_ok());
                    }
                }
            }
        }
        assert!(contacts > 0);
        assert_eq!(plan.voxel_count(), contacts);
    }

    #[test]
    fn test_neighbor_without_contact_is_rejected() {
        let mut subs = vec![boxed(0, (0, 0, 0), (1, 1, 1)), boxed(1, (5, 0, 0), (6, 1, 1))];
        subs[0].neighbors.push(voxelflow_domain::Neighbor {
            face: Face::PosX,
            device: DeviceId(1),
        });
        assert!(matches!(
            ExchangePlan::build(&subs, 1),
            Err(VoxelError::AdjacencyMismatch { .. })
        ));
        assert!(ExchangePlan::build(&subs, 0).is_err());
    }
}
