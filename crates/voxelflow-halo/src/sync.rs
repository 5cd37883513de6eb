//! The halo exchange protocol.
//!
//! One exchange of a field moves every device's boundary layers into its
//! neighbors' ghost regions. Each exchange gets a fresh epoch and runs as
//! three kinds of stream commands:
//!
//! 1. **Pack** on the owner A: every voxel a neighbor across the face reads
//!    goes from the field's read view into A's remote halo, then
//!    `write_counter[face] = epoch`.
//! 2. **Transfer** on A: waits for `write_counter[face]`, copies the segment
//!    routed to B into B's local halo for the mirrored face, then signals B's
//!    link counter for A.
//! 3. **Unpack** on B: waits for every link counter of the face, merges the
//!    local halo into B's ghost cells, then `read_counter[face] = epoch`.
//!
//! A **gate** on B waits for the read counters of every face before a unit
//! that reads neighbor data.
//!
//! All packs of an epoch are submitted before all transfers, and all
//! transfers before all unpacks. Transfers only wait on counters of their
//! own stream or on unpacks of an earlier epoch, so streams never wait on
//! each other in a cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use voxelflow_core::config::HaloConfig;
use voxelflow_core::device::{Command, DeviceStream};
use voxelflow_core::error::{Result, VoxelError};
use voxelflow_core::field::{FieldHandle, FieldRegistry};
use voxelflow_core::timeline::TimelineCounter;
use voxelflow_core::types::{DeviceId, Face};

use crate::buffer::{FaceHalo, HaloBufferSet};
use crate::manager::{FieldHalos, HaloManager};

/// A counter value a stream must reach before packing.
#[derive(Debug, Clone)]
pub struct StreamBarrier {
    /// Counter to wait on.
    pub counter: Arc<TimelineCounter>,
    /// Required value.
    pub value: u64,
}

/// Handle to a submitted exchange.
#[derive(Debug, Clone)]
pub struct ExchangeTicket {
    field: String,
    epoch: u64,
    halos: Arc<FieldHalos>,
    waits: Vec<(DeviceId, Face)>,
}

impl ExchangeTicket {
    /// Exchanged field.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Epoch of the exchange.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// `(device, face)` pairs whose read counters complete the exchange.
    pub fn faces(&self) -> &[(DeviceId, Face)] {
        &self.waits
    }
}

/// Drives halo exchanges over a set of device streams.
pub struct HaloSynchronizer {
    manager: Arc<HaloManager>,
    registry: Arc<dyn FieldRegistry>,
    devices: Vec<Arc<dyn DeviceStream>>,
    timeout: Duration,
}

impl HaloSynchronizer {
    /// Create a synchronizer.
    pub fn new(
        manager: Arc<HaloManager>,
        registry: Arc<dyn FieldRegistry>,
        devices: Vec<Arc<dyn DeviceStream>>,
        config: &HaloConfig,
    ) -> Self {
        Self {
            manager,
            registry,
            devices,
            timeout: config.transfer_timeout(),
        }
    }

    /// Halo buffer owner.
    pub fn manager(&self) -> &Arc<HaloManager> {
        &self.manager
    }

    /// Timeout applied to every counter wait.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn device(&self, id: DeviceId) -> Result<&Arc<dyn DeviceStream>> {
        self.devices
            .iter()
            .find(|d| d.id() == id)
            .ok_or(VoxelError::UnknownDevice(id))
    }

    fn block(&self, field: &str, device: DeviceId) -> Result<FieldHandle> {
        self.registry
            .block(field, device)
            .ok_or_else(|| VoxelError::FieldNotRegistered(field.to_string()))
    }

    /// Submit one exchange of `field` without waiting for it.
    ///
    /// Exchanges of one field must be submitted from a single thread.
    pub fn submit_exchange(&self, field: &str) -> Result<ExchangeTicket> {
        self.submit_exchange_after(field, &HashMap::new())
    }

    /// Submit one exchange of `field`; each device's packs first wait for
    /// its barrier, if any.
    pub fn submit_exchange_after(
        &self,
        field: &str,
        barriers: &HashMap<DeviceId, StreamBarrier>,
    ) -> Result<ExchangeTicket> {
        let halos = self.manager.field(field)?;
        let timeout = self.timeout;

        // Resolve everything before the first submit so structural problems
        // leave the streams untouched.
        let mut packs = Vec::new();
        let mut transfers = Vec::new();
        let mut unpacks = Vec::new();
        let mut waits = Vec::new();
        let epoch = halos.epoch() + 1;

        for set in halos.sets() {
            if set.faces().next().is_none() {
                continue;
            }
            let device = set.device();
            let stream = self.device(device)?;
            let block = self.block(field, device)?;

            for halo in set.faces() {
                let face = halo.face();
                let first_neighbor = halo
                    .sends()
                    .first()
                    .map(|s| s.receiver)
                    .or_else(|| halo.links().first().map(|l| l.neighbor))
                    .unwrap_or(device);
                packs.push((
                    stream.clone(),
                    pack_command(
                        field,
                        epoch,
                        set.clone(),
                        face,
                        first_neighbor,
                        block.clone(),
                        barriers.get(&device).cloned(),
                        timeout,
                    ),
                ));
                unpacks.push((
                    stream.clone(),
                    unpack_command(field, epoch, set.clone(), face, block.clone(), timeout),
                ));
                waits.push((device, face));

                for send in halo.sends() {
                    let receiver = halos
                        .set(send.receiver)
                        .cloned()
                        .ok_or(VoxelError::UnknownDevice(send.receiver))?;
                    let linked = receiver
                        .face(face.opposite())
                        .and_then(|h| h.link(device))
                        .is_some();
                    if !linked {
                        return Err(VoxelError::AdjacencyMismatch {
                            device,
                            neighbor: send.receiver,
                            face,
                        });
                    }
                    transfers.push((
                        stream.clone(),
                        transfer_command(field, epoch, set.clone(), receiver, face, timeout),
                    ));
                }
            }
        }

        halos.commit_epoch(epoch);
        let counts = (packs.len(), transfers.len(), unpacks.len());
        for (stream, command) in packs.into_iter().chain(transfers).chain(unpacks) {
            if let Err(e) = stream.submit(command) {
                halos.poison(&format!("exchange epoch {} not fully submitted: {}", epoch, e));
                return Err(e);
            }
        }

        debug!(
            "Halo exchange '{}' epoch {}: {} packs, {} transfers, {} unpacks",
            field, epoch, counts.0, counts.1, counts.2
        );

        Ok(ExchangeTicket {
            field: field.to_string(),
            epoch,
            halos,
            waits,
        })
    }

    /// Block until every unpack of the exchange has completed.
    ///
    /// On failure the streams are drained and the most specific error is
    /// returned, preferring a [`VoxelError::HaloTransfer`] naming the failed
    /// device pair.
    pub fn wait(&self, ticket: &ExchangeTicket) -> Result<()> {
        for &(device, face) in &ticket.waits {
            let halo = ticket
                .halos
                .set(device)
                .and_then(|s| s.face(face))
                .ok_or(VoxelError::UnknownDevice(device))?;
            if let Err(e) = halo.read_counter.wait(ticket.epoch, self.timeout) {
                return Err(self.resolve_failure(ticket, device, halo, e));
            }
        }
        Ok(())
    }

    /// Exchange `field` and block until it has completed. Returns the epoch.
    pub fn step_halo_exchange(&self, field: &str) -> Result<u64> {
        let ticket = self.submit_exchange(field)?;
        self.wait(&ticket)?;
        Ok(ticket.epoch)
    }

    /// Make `device`'s stream wait until the exchange's unpacks on that
    /// device have completed.
    pub fn submit_gate(&self, ticket: &ExchangeTicket, device: DeviceId) -> Result<()> {
        let stream = self.device(device)?;
        let Some(set) = ticket.halos.set(device).cloned() else {
            return Ok(());
        };
        let epoch = ticket.epoch;
        let timeout = self.timeout;
        let label = format!("halo gate {} {} e{}", ticket.field, device, epoch);
        stream.submit(Command::new(label, move || {
            for halo in set.faces() {
                halo.read_counter.wait(epoch, timeout)?;
            }
            Ok(())
        }))?;
        Ok(())
    }

    fn resolve_failure(
        &self,
        ticket: &ExchangeTicket,
        device: DeviceId,
        halo: &FaceHalo,
        cause: VoxelError,
    ) -> VoxelError {
        warn!(
            "Halo exchange '{}' epoch {} failed at {} {}: {}",
            ticket.field,
            ticket.epoch,
            device,
            halo.face(),
            cause
        );

        let errors: Vec<VoxelError> = self
            .devices
            .iter()
            .filter_map(|d| d.synchronize(self.timeout).err())
            .collect();

        if let Some(pos) = errors
            .iter()
            .position(|e| matches!(e, VoxelError::HaloTransfer { .. }))
        {
            return errors.into_iter().nth(pos).unwrap_or(cause);
        }
        if matches!(cause, VoxelError::Timeout(_)) {
            let sender = halo
                .links()
                .iter()
                .find(|l| l.counter.value() < ticket.epoch)
                .map(|l| l.neighbor)
                .unwrap_or(device);
            return VoxelError::HaloTransfer {
                sender,
                receiver: device,
                face: halo.face().opposite(),
                reason: cause.to_string(),
            };
        }
        errors.into_iter().next().unwrap_or(cause)
    }
}

impl std::fmt::Debug for HaloSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaloSynchronizer")
            .field("manager", &self.manager)
            .field("devices", &self.devices.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn face_of(set: &HaloBufferSet, face: Face) -> Result<&FaceHalo> {
    set.face(face).ok_or_else(|| {
        VoxelError::InvalidConfig(format!("{} has no halo on face {}", set.device(), face))
    })
}

/// Wrap a failure of a halo command, keeping an existing transfer error.
fn transfer_error(sender: DeviceId, receiver: DeviceId, face: Face, err: VoxelError) -> VoxelError {
    match err {
        VoxelError::HaloTransfer { .. } => err,
        other => VoxelError::HaloTransfer {
            sender,
            receiver,
            face,
            reason: other.to_string(),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn pack_command(
    field: &str,
    epoch: u64,
    set: Arc<HaloBufferSet>,
    face: Face,
    first_neighbor: DeviceId,
    block: FieldHandle,
    barrier: Option<StreamBarrier>,
    timeout: Duration,
) -> Command {
    let device = set.device();
    let label = format!("halo pack {} {} {} e{}", field, device, face, epoch);
    let abort_set = set.clone();

    Command::new(label, move || {
        if let Some(barrier) = &barrier {
            barrier.counter.wait(barrier.value, timeout)?;
        }
        let halo = face_of(&set, face)?;
        halo.pack(&block.read())?;
        halo.write_counter.signal(epoch)
    })
    .on_abort(move |err| {
        if let Some(halo) = abort_set.face(face) {
            halo.write_counter.poison(err.to_string());
        }
        transfer_error(device, first_neighbor, face, err)
    })
}

fn transfer_command(
    field: &str,
    epoch: u64,
    source: Arc<HaloBufferSet>,
    receiver: Arc<HaloBufferSet>,
    face: Face,
    timeout: Duration,
) -> Command {
    let sender = source.device();
    let to = receiver.device();
    let label = format!(
        "halo transfer {} {} -> {} {} e{}",
        field, sender, to, face, epoch
    );
    let abort_receiver = receiver.clone();

    Command::new(label, move || {
        let mismatch = move || VoxelError::AdjacencyMismatch {
            device: sender,
            neighbor: to,
            face,
        };
        let src = face_of(&source, face)?;
        let dst = face_of(&receiver, face.opposite())?;
        let send = src.send(to).ok_or_else(mismatch)?;
        let link = dst.link(sender).ok_or_else(mismatch)?;
        src.write_counter.wait(epoch, timeout)?;
        // The receiver must have consumed the previous epoch.
        dst.read_counter.wait(epoch - 1, timeout)?;
        src.send_to(send, dst, link)?;
        link.counter.signal(epoch)
    })
    .on_abort(move |err| {
        if let Some(link) = abort_receiver
            .face(face.opposite())
            .and_then(|h| h.link(sender))
        {
            link.counter.poison(err.to_string());
        }
        transfer_error(sender, to, face, err)
    })
}

fn unpack_command(
    field: &str,
    epoch: u64,
    set: Arc<HaloBufferSet>,
    face: Face,
    block: FieldHandle,
    timeout: Duration,
) -> Command {
    let device = set.device();
    let label = format!("halo unpack {} {} {} e{}", field, device, face, epoch);
    let abort_set = set.clone();

    Command::new(label, move || {
        let halo = face_of(&set, face)?;
        for link in halo.links() {
            link.counter.wait(epoch, timeout).map_err(|e| match e {
                VoxelError::Timeout(_) => VoxelError::HaloTransfer {
                    sender: link.neighbor,
                    receiver: device,
                    face: face.opposite(),
                    reason: e.to_string(),
                },
                other => other,
            })?;
        }
        halo.unpack(&mut block.write())?;
        halo.read_counter.signal(epoch)
    })
    .on_abort(move |err| {
        if let Some(halo) = abort_set.face(face) {
            halo.read_counter.poison(err.to_string());
        }
        err
    })
}
