//! Cross-thread control primitives
//!
//! The consumer steers the capture thread only through these: an atomic
//! control signal, a state cell with a condition variable for blocking waits,
//! and a process-wide registry of devices in use.

use crate::recorder::state::SessionState;
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI8, Ordering};
use std::time::{Duration, Instant};

/// Request from the consumer to the capture loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum ControlSignal {
    /// Keep capturing
    Continue = 1,
    /// Reopen the device without ending the session
    Restart = 0,
    /// End the session
    Close = -1,
}

impl ControlSignal {
    pub fn as_raw(self) -> i8 {
        self as i8
    }

    pub fn from_raw(raw: i8) -> Self {
        match raw {
            1 => ControlSignal::Continue,
            0 => ControlSignal::Restart,
            _ => ControlSignal::Close,
        }
    }
}

/// Atomic cell holding the control signal
///
/// `Close` is sticky: once set, neither a restart request nor the capture
/// loop acknowledging a restart can overwrite it.
#[derive(Debug)]
pub struct ControlCell(AtomicI8);

impl Default for ControlCell {
    fn default() -> Self {
        Self(AtomicI8::new(ControlSignal::Continue.as_raw()))
    }
}

impl ControlCell {
    pub fn load(&self) -> ControlSignal {
        ControlSignal::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn close(&self) {
        self.0.store(ControlSignal::Close.as_raw(), Ordering::Release);
    }

    /// Ask for a device reopen. Returns false if the session is closing.
    pub fn request_restart(&self) -> bool {
        self.transition(ControlSignal::Continue, ControlSignal::Restart)
            || self.load() == ControlSignal::Restart
    }

    /// Acknowledge a pending restart. Returns false if it was replaced by Close.
    pub fn take_restart(&self) -> bool {
        self.transition(ControlSignal::Restart, ControlSignal::Continue)
    }

    fn transition(&self, from: ControlSignal, to: ControlSignal) -> bool {
        self.0
            .compare_exchange(from.as_raw(), to.as_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Session state with blocking waits
#[derive(Debug, Default)]
pub struct StateCell {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl StateCell {
    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!("Session state {} -> {}", *state, next);
            *state = next;
        }
        self.changed.notify_all();
    }

    /// Block until `done(state)` holds or `timeout` passes. Returns the last state seen.
    pub fn wait_until<F>(&self, mut done: F, timeout: Duration) -> SessionState
    where
        F: FnMut(SessionState) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while !done(*state) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }
        *state
    }
}

static ACTIVE_DEVICES: Mutex<BTreeSet<u32>> = parking_lot::const_mutex(BTreeSet::new());

/// Exclusive claim on a device index for the lifetime of one session
#[derive(Debug)]
pub struct DeviceLease {
    index: u32,
}

impl DeviceLease {
    pub fn acquire(index: u32) -> CaptureResult<Self> {
        if !ACTIVE_DEVICES.lock().insert(index) {
            return Err(CaptureError::DeviceBusy(index));
        }
        Ok(Self { index })
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        ACTIVE_DEVICES.lock().remove(&self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_raw_values() {
        assert_eq!(ControlSignal::Continue.as_raw(), 1);
        assert_eq!(ControlSignal::Restart.as_raw(), 0);
        assert_eq!(ControlSignal::Close.as_raw(), -1);
        assert_eq!(ControlSignal::from_raw(0), ControlSignal::Restart);
        assert_eq!(ControlSignal::from_raw(-7), ControlSignal::Close);
    }

    #[test]
    fn test_close_is_sticky() {
        let cell = ControlCell::default();
        assert!(cell.request_restart());
        cell.close();

        assert!(!cell.take_restart());
        assert!(!cell.request_restart());
        assert_eq!(cell.load(), ControlSignal::Close);
    }

    #[test]
    fn test_restart_acknowledged_once() {
        let cell = ControlCell::default();
        assert!(cell.request_restart());
        assert!(cell.request_restart());
        assert!(cell.take_restart());
        assert!(!cell.take_restart());
        assert_eq!(cell.load(), ControlSignal::Continue);
    }

    #[test]
    fn test_wait_wakes_on_state_change() {
        let cell = Arc::new(StateCell::default());
        let writer = Arc::clone(&cell);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer.set(SessionState::Previewing);
        });

        let seen = cell.wait_until(|s| s.is_open(), Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(seen, SessionState::Previewing);
    }

    #[test]
    fn test_wait_times_out_with_current_state() {
        let cell = StateCell::default();
        let start = Instant::now();

        let seen = cell.wait_until(|s| s.is_terminal(), Duration::from_millis(40));

        assert_eq!(seen, SessionState::Idle);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_device_lease_is_exclusive() {
        let lease = DeviceLease::acquire(9_001).unwrap();
        assert!(matches!(
            DeviceLease::acquire(9_001),
            Err(CaptureError::DeviceBusy(9_001))
        ));

        drop(lease);
        DeviceLease::acquire(9_001).unwrap();
    }
}
