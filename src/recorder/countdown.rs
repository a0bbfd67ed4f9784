//! Countdown scheduler
//!
//! A blocking, cancellable countdown meant to run on its own thread. Ticks
//! descend from `seconds` to 1 with one tick interval between them.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag that also wakes a sleeping countdown
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock() = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` unless cancelled first. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// How a countdown ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownOutcome {
    Completed,
    Cancelled,
}

/// Emits one tick per interval, then signals completion
#[derive(Debug, Clone)]
pub struct CountdownScheduler {
    tick: Duration,
    cancel: CancelToken,
}

impl CountdownScheduler {
    /// Scheduler with one-second ticks
    pub fn new(cancel: CancelToken) -> Self {
        Self::with_tick(Duration::from_secs(1), cancel)
    }

    pub fn with_tick(tick: Duration, cancel: CancelToken) -> Self {
        Self { tick, cancel }
    }

    /// Run the countdown on the calling thread
    ///
    /// `on_tick(remaining)` fires for `seconds, seconds - 1, ..., 1`, each
    /// followed by one tick interval. `on_done` fires only if the countdown
    /// was not cancelled.
    pub fn run<T, D>(&self, seconds: i64, mut on_tick: T, on_done: D) -> CountdownOutcome
    where
        T: FnMut(u32),
        D: FnOnce(),
    {
        let mut remaining = seconds;
        while remaining > 0 {
            if self.cancel.is_cancelled() {
                return self.cancelled(remaining);
            }
            on_tick(remaining as u32);
            if self.cancel.wait_timeout(self.tick) {
                return self.cancelled(remaining);
            }
            remaining -= 1;
        }

        if self.cancel.is_cancelled() {
            return self.cancelled(0);
        }
        on_done();
        CountdownOutcome::Completed
    }

    fn cancelled(&self, remaining: i64) -> CountdownOutcome {
        tracing::debug!("Countdown cancelled with {} ticks left", remaining);
        CountdownOutcome::Cancelled
    }
}
