//! Per-face halo buffers.
//!
//! Every device keeps, per field and per face that takes part in an
//! exchange, two staging buffers:
//!
//! - the *remote* halo: the device's own voxels that neighbors across the
//!   face read as ghosts, produced by pack and read by transfers
//! - the *local* halo: ghost data received from neighbors across the face,
//!   consumed by unpack
//!
//! Each buffer is a concatenation of per-neighbor segments, one per
//! [`HaloRoute`] of the [`ExchangePlan`]. A segment holds `components` values
//! per route voxel in the route's order, so a sender and a receiver agree on
//! the layout from the plan alone.

use std::sync::Arc;

use parking_lot::Mutex;

use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::field::FieldBlock;
use voxelflow_core::timeline::TimelineCounter;
use voxelflow_core::types::{DeviceId, Face, VoxelCoord};

use crate::plan::{ExchangePlan, HaloRoute};

/// Outgoing segment of the remote halo, read by one receiver.
#[derive(Debug)]
pub struct HaloSend {
    /// Receiving device.
    pub receiver: DeviceId,
    voxels: Arc<[VoxelCoord]>,
    offset: usize,
}

impl HaloSend {
    /// Owned voxels this segment carries.
    pub fn voxels(&self) -> &[VoxelCoord] {
        &self.voxels
    }
}

/// Incoming data from one neighbor across a face.
#[derive(Debug)]
pub struct HaloLink {
    /// Sending device.
    pub neighbor: DeviceId,
    voxels: Arc<[VoxelCoord]>,
    offset: usize,
    /// Last epoch whose transfer from `neighbor` landed in the local halo.
    pub counter: TimelineCounter,
}

impl HaloLink {
    /// Ghost voxels this neighbor provides.
    pub fn voxels(&self) -> &[VoxelCoord] {
        &self.voxels
    }
}

/// Halo state of one face.
#[derive(Debug)]
pub struct FaceHalo {
    face: Face,
    components: usize,
    local: Mutex<Vec<f32>>,
    remote: Mutex<Vec<f32>>,
    /// Last epoch packed into the remote halo.
    pub write_counter: TimelineCounter,
    /// Last epoch unpacked into the field's ghost region.
    pub read_counter: TimelineCounter,
    sends: Vec<HaloSend>,
    links: Vec<HaloLink>,
}

impl FaceHalo {
    fn new(
        label: &str,
        face: Face,
        components: usize,
        outgoing: &[&HaloRoute],
        incoming: &[&HaloRoute],
    ) -> Self {
        let mut offset = 0;
        let sends = outgoing
            .iter()
            .map(|route| {
                let send = HaloSend {
                    receiver: route.receiver,
                    voxels: Arc::clone(&route.voxels),
                    offset,
                };
                offset += route.voxels.len() * components;
                send
            })
            .collect();
        let remote_len = offset;

        offset = 0;
        let links = incoming
            .iter()
            .map(|route| {
                let link = HaloLink {
                    neighbor: route.sender,
                    voxels: Arc::clone(&route.voxels),
                    offset,
                    counter: TimelineCounter::new(format!(
                        "{}/{}/from {}",
                        label, face, route.sender
                    )),
                };
                offset += route.voxels.len() * components;
                link
            })
            .collect();
        let local_len = offset;

        Self {
            face,
            components,
            local: Mutex::new(vec![0.0; local_len]),
            remote: Mutex::new(vec![0.0; remote_len]),
            write_counter: TimelineCounter::new(format!("{}/{}/write", label, face)),
            read_counter: TimelineCounter::new(format!("{}/{}/read", label, face)),
            sends,
            links,
        }
    }

    /// Face of the owning sub-domain.
    pub fn face(&self) -> Face {
        self.face
    }

    /// Values in the local halo.
    pub fn local_len(&self) -> usize {
        self.links.iter().map(|l| l.voxels.len()).sum::<usize>() * self.components
    }

    /// Values in the remote halo.
    pub fn remote_len(&self) -> usize {
        self.sends.iter().map(|s| s.voxels.len()).sum::<usize>() * self.components
    }

    /// Values in both buffers.
    pub fn len(&self) -> usize {
        self.local_len() + self.remote_len()
    }

    /// Check if the buffers hold no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outgoing segments, one per receiver across this face.
    pub fn sends(&self) -> &[HaloSend] {
        &self.sends
    }

    /// Segment read by a given receiver.
    pub fn send(&self, receiver: DeviceId) -> Option<&HaloSend> {
        self.sends.iter().find(|s| s.receiver == receiver)
    }

    /// Incoming links, one per neighbor across this face.
    pub fn links(&self) -> &[HaloLink] {
        &self.links
    }

    /// Link from a given neighbor.
    pub fn link(&self, neighbor: DeviceId) -> Option<&HaloLink> {
        self.links.iter().find(|l| l.neighbor == neighbor)
    }

    /// Copy of the local halo.
    pub fn local_snapshot(&self) -> Vec<f32> {
        self.local.lock().clone()
    }

    /// Copy of the remote halo.
    pub fn remote_snapshot(&self) -> Vec<f32> {
        self.remote.lock().clone()
    }

    /// Copy every outgoing voxel of `block`'s read view into the remote halo.
    pub fn pack(&self, block: &FieldBlock) -> Result<()> {
        self.check_components(block)?;
        let n = self.components;
        let view = block.read_view();
        let mut remote = self.remote.lock();
        for send in &self.sends {
            for (i, &c) in send.voxels.iter().enumerate() {
                let src = block.offset_of(c).ok_or_else(|| outside_storage(block, c))?;
                let dst = send.offset + i * n;
                remote[dst..dst + n].copy_from_slice(&view[src..src + n]);
            }
        }
        Ok(())
    }

    /// Copy the segment `send` of this remote halo into the segment `link`
    /// of `receiver`'s local halo.
    pub fn send_to(&self, send: &HaloSend, receiver: &FaceHalo, link: &HaloLink) -> Result<()> {
        if receiver.components != self.components {
            return Err(VoxelError::InvalidConfig(format!(
                "halo component mismatch: {} vs {}",
                self.components, receiver.components
            )));
        }
        if send.voxels.len() != link.voxels.len() {
            return Err(VoxelError::InvalidConfig(format!(
                "halo segment to {} holds {} voxels, receiver expects {} from {}",
                send.receiver,
                send.voxels.len(),
                link.voxels.len(),
                link.neighbor
            )));
        }
        let len = send.voxels.len() * self.components;
        let remote = self.remote.lock();
        let mut local = receiver.local.lock();
        local[link.offset..link.offset + len]
            .copy_from_slice(&remote[send.offset..send.offset + len]);
        Ok(())
    }

    /// Merge the local halo into the ghost cells of `block`'s read view.
    ///
    /// Only voxels covered by a link are written.
    pub fn unpack(&self, block: &mut FieldBlock) -> Result<()> {
        self.check_components(block)?;
        let n = self.components;
        let local = self.local.lock();
        for link in &self.links {
            for (i, &c) in link.voxels.iter().enumerate() {
                let dst = block.offset_of(c).ok_or_else(|| outside_storage(block, c))?;
                let src = link.offset + i * n;
                block.read_view_mut()[dst..dst + n].copy_from_slice(&local[src..src + n]);
            }
        }
        Ok(())
    }

    fn check_components(&self, block: &FieldBlock) -> Result<()> {
        if block.components() != self.components {
            return Err(VoxelError::InvalidConfig(format!(
                "field block has {} components, halo expects {}",
                block.components(),
                self.components
            )));
        }
        Ok(())
    }

    fn poison(&self, reason: &str) {
        self.write_counter.poison(reason);
        self.read_counter.poison(reason);
        for link in &self.links {
            link.counter.poison(reason);
        }
    }
}

fn outside_storage(block: &FieldBlock, c: VoxelCoord) -> VoxelError {
    VoxelError::InvalidConfig(format!(
        "voxel {} lies outside the storage {} of the {} block; ghost width {} is too small",
        c,
        block.storage_bounds(),
        block.device(),
        block.ghost_width()
    ))
}

/// Halo buffers of one field on one device.
#[derive(Debug)]
pub struct HaloBufferSet {
    device: DeviceId,
    faces: [Option<FaceHalo>; 6],
}

impl HaloBufferSet {
    /// Allocate buffers for every face of `device` that has a route in `plan`.
    pub fn new(field: &str, device: DeviceId, plan: &ExchangePlan, components: usize) -> Self {
        let label = format!("{}/{}", field, device);
        let mut faces: [Option<FaceHalo>; 6] = Default::default();

        for face in Face::ALL {
            let outgoing: Vec<&HaloRoute> = plan.outgoing(device, face).collect();
            let incoming: Vec<&HaloRoute> = plan.incoming(device, face).collect();
            if outgoing.is_empty() && incoming.is_empty() {
                continue;
            }
            let halo = FaceHalo::new(&label, face, components, &outgoing, &incoming);
            faces[face.index()] = Some(halo);
        }

        Self { device, faces }
    }

    /// Owning device.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Halo of one face, `None` when nothing crosses the face.
    pub fn face(&self, face: Face) -> Option<&FaceHalo> {
        self.faces[face.index()].as_ref()
    }

    /// Halos of all faces taking part in exchanges.
    pub fn faces(&self) -> impl Iterator<Item = &FaceHalo> {
        self.faces.iter().flatten()
    }

    /// Bytes held by the local and remote buffers.
    pub fn bytes(&self) -> usize {
        self.faces()
            .map(|f| f.len() * std::mem::size_of::<f32>())
            .sum()
    }

    /// Poison every counter so waiters fail instead of blocking.
    pub fn poison(&self, reason: &str) {
        for face in self.faces() {
            face.poison(reason);
        }
    }
}
