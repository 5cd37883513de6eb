//! Device command streams.
//!
//! Each compute device executes an independent, in-order command stream.
//! [`DeviceStream`] is the interface the scheduler and the halo protocol
//! submit work through; [`CpuDevice`] implements it with one worker thread
//! per device fed by a `crossbeam` channel.
//!
//! # Failure model
//!
//! The first failing command puts the stream into a fault state. Commands
//! submitted afterwards are not executed; their abort handlers run instead so
//! that counters they would have signalled get poisoned and waiters on other
//! devices fail fast. The fault state persists until [`DeviceStream::clear_fault`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, VoxelError};
use crate::timeline::TimelineCounter;
use crate::types::DeviceId;

type RunFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;
type AbortFn = Box<dyn FnOnce(VoxelError) -> VoxelError + Send + 'static>;

/// A unit of work for a device stream.
pub struct Command {
    label: String,
    run: RunFn,
    on_abort: Option<AbortFn>,
}

impl Command {
    /// Create a new command.
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            run: Box::new(run),
            on_abort: None,
        }
    }

    /// Attach a handler that runs when the command fails or is skipped.
    ///
    /// The handler receives the failure and returns the error recorded as
    /// the stream's fault.
    pub fn on_abort<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(VoxelError) -> VoxelError + Send + 'static,
    {
        self.on_abort = Some(Box::new(handler));
        self
    }

    /// Command label.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("label", &self.label)
            .field("has_abort_handler", &self.on_abort.is_some())
            .finish()
    }
}

/// An independent, in-order command stream of one device.
pub trait DeviceStream: Send + Sync {
    /// Device index.
    fn id(&self) -> DeviceId;

    /// Enqueue a command. Returns its sequence number.
    fn submit(&self, command: Command) -> Result<u64>;

    /// Block until every submitted command has completed.
    ///
    /// Fails with the stream's first error when the stream is faulted, and
    /// with [`VoxelError::DeviceFault`] when the timeout expires.
    fn synchronize(&self, timeout: Duration) -> Result<()>;

    /// Description of the current fault, if any.
    fn fault(&self) -> Option<String>;

    /// Take the first error recorded since the last clear.
    fn take_error(&self) -> Option<VoxelError>;

    /// Leave the fault state so new commands execute again.
    fn clear_fault(&self);
}

struct FaultState {
    reason: String,
    error: Option<VoxelError>,
}

struct InjectedFault {
    pattern: String,
    reason: String,
}

/// State shared between a [`CpuDevice`] and its worker thread.
struct StreamShared {
    id: DeviceId,
    completed: TimelineCounter,
    fault: Mutex<Option<FaultState>>,
    injected: Mutex<Vec<InjectedFault>>,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl StreamShared {
    fn fault_reason(&self) -> Option<String> {
        self.fault.lock().as_ref().map(|f| f.reason.clone())
    }

    fn take_injected(&self, label: &str) -> Option<String> {
        let mut injected = self.injected.lock();
        let pos = injected.iter().position(|f| label.contains(&f.pattern))?;
        Some(injected.remove(pos).reason)
    }

    fn record_fault(&self, error: VoxelError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(FaultState {
                reason: error.to_string(),
                error: Some(error),
            });
        }
    }

    fn execute(&self, command: Command) {
        let Command {
            label,
            run,
            on_abort,
        } = command;

        if let Some(reason) = self.fault_reason() {
            debug!("{} skipping '{}' after fault", self.id, label);
            if let Some(handler) = on_abort {
                let _ = handler(VoxelError::DeviceFault {
                    device: self.id,
                    reason: format!("skipped '{}' after earlier fault: {}", label, reason),
                });
            }
            return;
        }

        let result = match self.take_injected(&label) {
            Some(reason) => Err(VoxelError::DeviceFault {
                device: self.id,
                reason,
            }),
            None => run(),
        };

        match result {
            Ok(()) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let err = match on_abort {
                    Some(handler) => handler(err),
                    None => err,
                };
                warn!("{} command '{}' failed: {}", self.id, label, err);
                self.record_fault(err);
            }
        }
    }
}

enum StreamMessage {
    Execute { seq: u64, command: Command },
    Shutdown,
}

fn run_worker(shared: Arc<StreamShared>, receiver: Receiver<StreamMessage>) {
    debug!("{} worker started", shared.id);
    while let Ok(message) = receiver.recv() {
        match message {
            StreamMessage::Execute { seq, command } => {
                shared.execute(command);
                if let Err(e) = shared.completed.signal(seq) {
                    warn!("{} completion counter rejected {}: {}", shared.id, seq, e);
                }
            }
            StreamMessage::Shutdown => break,
        }
    }
    debug!("{} worker stopped", shared.id);
}

/// CPU device backend.
///
/// Models one device with an independent command stream executing on its
/// own worker thread. Commands run strictly in submission order.
pub struct CpuDevice {
    shared: Arc<StreamShared>,
    sender: Sender<StreamMessage>,
    /// Last sequence number; the lock also orders channel sends.
    submitted: Mutex<u64>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpuDevice {
    /// Create a device and start its worker thread.
    pub fn new(id: DeviceId) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let shared = Arc::new(StreamShared {
            id,
            completed: TimelineCounter::new(format!("{} completed", id)),
            fault: Mutex::new(None),
            injected: Mutex::new(Vec::new()),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker = std::thread::Builder::new()
            .name(format!("voxelflow-device-{}", id.get()))
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_worker(shared, receiver)
            })?;

        info!("Started CPU {}", id);

        Ok(Self {
            shared,
            sender,
            submitted: Mutex::new(0),
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Create `count` devices with ids `0..count`.
    pub fn pool(count: usize) -> Result<Vec<Arc<dyn DeviceStream>>> {
        (0..count)
            .map(|i| Ok(Arc::new(CpuDevice::new(DeviceId::from(i))?) as Arc<dyn DeviceStream>))
            .collect()
    }

    /// Fail the next command whose label contains `pattern`.
    pub fn inject_fault(&self, pattern: impl Into<String>, reason: impl Into<String>) {
        self.shared.injected.lock().push(InjectedFault {
            pattern: pattern.into(),
            reason: reason.into(),
        });
    }

    /// Number of commands executed successfully.
    pub fn executed_commands(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    /// Number of commands that failed.
    pub fn failed_commands(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    /// Check if the stream has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drain the stream and stop the worker thread.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // The worker exits after processing everything queued before this.
        let _ = self.sender.send(StreamMessage::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            handle.join().map_err(|_| VoxelError::DeviceFault {
                device: self.shared.id,
                reason: "worker thread panicked".to_string(),
            })?;
        }

        info!("Shut down CPU {}", self.shared.id);
        Ok(())
    }
}

impl DeviceStream for CpuDevice {
    fn id(&self) -> DeviceId {
        self.shared.id
    }

    fn submit(&self, command: Command) -> Result<u64> {
        if self.is_closed() {
            return Err(VoxelError::StreamClosed(self.shared.id));
        }

        let mut submitted = self.submitted.lock();
        let seq = *submitted + 1;
        self.sender
            .send(StreamMessage::Execute { seq, command })
            .map_err(|_| VoxelError::StreamClosed(self.shared.id))?;
        *submitted = seq;
        Ok(seq)
    }

    fn synchronize(&self, timeout: Duration) -> Result<()> {
        let target = *self.submitted.lock();
        self.shared
            .completed
            .wait(target, timeout)
            .map_err(|e| VoxelError::DeviceFault {
                device: self.shared.id,
                reason: format!("synchronize failed: {}", e),
            })?;

        let mut fault = self.shared.fault.lock();
        match fault.as_mut() {
            Some(state) => Err(state.error.take().unwrap_or_else(|| VoxelError::DeviceFault {
                device: self.shared.id,
                reason: state.reason.clone(),
            })),
            None => Ok(()),
        }
    }

    fn fault(&self) -> Option<String> {
        self.shared.fault_reason()
    }

    fn take_error(&self) -> Option<VoxelError> {
        self.shared
            .fault
            .lock()
            .as_mut()
            .and_then(|state| state.error.take())
    }

    fn clear_fault(&self) {
        if self.shared.fault.lock().take().is_some() {
            debug!("{} fault cleared", self.shared.id);
        }
    }
}

impl Drop for CpuDevice {
    fn drop(&mut self) {
        // Best effort; a panicked worker has already been reported.
        let _ = self.shutdown();
    }
}

impl fmt::Debug for CpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuDevice")
            .field("id", &self.shared.id)
            .field("submitted", &*self.submitted.lock())
            .field("completed", &self.shared.completed.value())
            .field("fault", &self.shared.fault_reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_commands_run_in_order() {
        let device = CpuDevice::new(DeviceId(0)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let log = Arc::clone(&log);
            device
                .submit(Command::new(format!("cmd {}", i), move || {
                    log.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }

        device.synchronize(TIMEOUT).unwrap();
        assert_eq!(*log.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(device.executed_commands(), 50);
    }

    #[test]
    fn test_fault_skips_later_commands() {
        let device = CpuDevice::new(DeviceId(1)).unwrap();
        let aborted = Arc::new(AtomicBool::new(false));
        let ran = Arc::new(AtomicBool::new(false));

        device
            .submit(Command::new("bad", || {
                Err(VoxelError::InvalidConfig("bad input".to_string()))
            }))
            .unwrap();
        device
            .submit(
                Command::new("after", {
                    let ran = Arc::clone(&ran);
                    move || {
                        ran.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .on_abort({
                    let aborted = Arc::clone(&aborted);
                    move |err| {
                        aborted.store(true, Ordering::SeqCst);
                        err
                    }
                }),
            )
            .unwrap();

        let err = device.synchronize(TIMEOUT).unwrap_err();
        assert!(matches!(err, VoxelError::InvalidConfig(_)));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(aborted.load(Ordering::SeqCst));
        assert!(device.fault().is_some());

        device.clear_fault();
        assert!(device.fault().is_none());
        device.submit(Command::new("ok", || Ok(()))).unwrap();
        device.synchronize(TIMEOUT).unwrap();
    }

    #[test]
    fn test_injected_fault_matches_label() {
        let device = CpuDevice::new(DeviceId(2)).unwrap();
        device.inject_fault("transfer", "link down");

        device.submit(Command::new("pack", || Ok(()))).unwrap();
        device
            .submit(Command::new("transfer +X", || Ok(())).on_abort(|err| {
                VoxelError::HaloTransfer {
                    sender: DeviceId(2),
                    receiver: DeviceId(3),
                    face: crate::types::Face::PosX,
                    reason: err.to_string(),
                }
            }))
            .unwrap();

        let err = device.synchronize(TIMEOUT).unwrap_err();
        match err {
            VoxelError::HaloTransfer { reason, .. } => assert!(reason.contains("link down")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.executed_commands(), 1);
        assert_eq!(device.failed_commands(), 1);
    }

    #[test]
    fn test_submit_after_shutdown() {
        let device = CpuDevice::new(DeviceId(3)).unwrap();
        device.submit(Command::new("a", || Ok(()))).unwrap();
        device.shutdown().unwrap();
        assert!(device.is_closed());
        assert!(matches!(
            device.submit(Command::new("b", || Ok(()))),
            Err(VoxelError::StreamClosed(_))
        ));
    }

    #[test]
    fn test_pool() {
        let devices = CpuDevice::pool(3).unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![DeviceId(0), DeviceId(1), DeviceId(2)]);
    }
}
