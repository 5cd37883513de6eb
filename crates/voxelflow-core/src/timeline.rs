//! Monotonic timeline counters.
//!
//! A timeline counter is the host-side model of a GPU timeline semaphore: a
//! producer signals increasing values, consumers block until the counter
//! reaches a target. Waits for values already reached return immediately.
//!
//! A producer that fails can poison the counter. Poisoning wakes all
//! waiters whose target has not been reached with
//! [`VoxelError::CounterPoisoned`], so failures propagate across devices
//! instead of leaving consumers blocked until their timeout.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, VoxelError};

#[derive(Debug, Default)]
struct CounterState {
    value: u64,
    poisoned: Option<String>,
}

/// Strictly monotonic counter with blocking waits.
pub struct TimelineCounter {
    /// Label used in poison and timeout messages.
    label: String,
    state: Mutex<CounterState>,
    reached: Condvar,
}

impl TimelineCounter {
    /// Create a new counter starting at zero.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(CounterState::default()),
            reached: Condvar::new(),
        }
    }

    /// Counter label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.state.lock().value
    }

    /// Check if the counter has been poisoned.
    pub fn is_poisoned(&self) -> bool {
        self.state.lock().poisoned.is_some()
    }

    /// Set the counter to `value`.
    ///
    /// `value` must be strictly greater than the current value.
    pub fn signal(&self, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.poisoned {
            return Err(VoxelError::CounterPoisoned(format!("{}: {}", self.label, reason)));
        }
        if value <= state.value {
            return Err(VoxelError::NonMonotonicSignal {
                current: state.value,
                requested: value,
            });
        }
        state.value = value;
        drop(state);
        self.reached.notify_all();
        Ok(())
    }

    /// Increment the counter by one and return the new value.
    pub fn advance(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.poisoned {
            return Err(VoxelError::CounterPoisoned(format!("{}: {}", self.label, reason)));
        }
        state.value += 1;
        let value = state.value;
        drop(state);
        self.reached.notify_all();
        Ok(value)
    }

    /// Block until the counter reaches `target`.
    ///
    /// Returns immediately when the target has already been reached, even on
    /// a poisoned counter.
    pub fn wait(&self, target: u64, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        loop {
            if state.value >= target {
                return Ok(());
            }
            if let Some(reason) = &state.poisoned {
                return Err(VoxelError::CounterPoisoned(format!("{}: {}", self.label, reason)));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(VoxelError::Timeout(timeout));
            }
            let _ = self.reached.wait_for(&mut state, remaining);
        }
    }

    /// Poison the counter and wake all waiters.
    ///
    /// The first reason is kept; later calls are ignored.
    pub fn poison(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.poisoned.is_none() {
            state.poisoned = Some(reason.into());
        }
        drop(state);
        self.reached.notify_all();
    }
}

impl fmt::Debug for TimelineCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TimelineCounter")
            .field("label", &self.label)
            .field("value", &state.value)
            .field("poisoned", &state.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_must_increase() {
        let counter = TimelineCounter::new("test");
        counter.signal(3).unwrap();
        assert_eq!(counter.value(), 3);

        let err = counter.signal(3).unwrap_err();
        assert!(matches!(
            err,
            VoxelError::NonMonotonicSignal {
                current: 3,
                requested: 3
            }
        ));
        assert!(counter.signal(2).is_err());
        assert_eq!(counter.advance().unwrap(), 4);
    }

    #[test]
    fn test_stale_wait_returns_immediately() {
        let counter = TimelineCounter::new("test");
        counter.signal(5).unwrap();
        counter.wait(2, Duration::ZERO).unwrap();
        counter.wait(5, Duration::ZERO).unwrap();

        counter.poison("boom");
        counter.wait(5, Duration::ZERO).unwrap();
    }

    #[test]
    fn test_wait_times_out() {
        let counter = TimelineCounter::new("test");
        let result = counter.wait(1, Duration::from_millis(10));
        assert!(matches!(result, Err(VoxelError::Timeout(_))));
    }

    #[test]
    fn test_wait_wakes_on_signal() {
        let counter = Arc::new(TimelineCounter::new("test"));
        let waiter = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || counter.wait(2, Duration::from_secs(5)))
        };

        counter.signal(1).unwrap();
        counter.signal(2).unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn test_poison_wakes_waiters() {
        let counter = Arc::new(TimelineCounter::new("halo"));
        let waiter = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || counter.wait(1, Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(10));
        counter.poison("transfer failed");

        let err = waiter.join().unwrap().unwrap_err();
        match err {
            VoxelError::CounterPoisoned(msg) => {
                assert!(msg.contains("halo"));
                assert!(msg.contains("transfer failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(counter.signal(1).is_err());
    }
}
