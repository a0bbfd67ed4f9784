//! Session event subscribers
//!
//! Consumers register a [`SessionEvents`] set of handlers. Handlers run
//! synchronously on controller-owned threads (capture or countdown), so they
//! should return quickly. A panicking handler is logged and skipped.

use crate::capture::traits::Frame;
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type Hook = Box<dyn Fn() + Send + Sync>;
type ErrorHook = Box<dyn Fn(&str) + Send + Sync>;
type CountdownHook = Box<dyn Fn(u32) + Send + Sync>;
type FrameHook = Box<dyn Fn(Frame) + Send + Sync>;

/// Handlers for one subscriber. Every handler is optional.
#[derive(Default)]
pub struct SessionEvents {
    on_start: Option<Hook>,
    on_stop: Option<Hook>,
    on_error: Option<ErrorHook>,
    on_countdown: Option<CountdownHook>,
    on_frame_ready: Option<FrameHook>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a countdown finishes and a clip is about to start
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Box::new(f));
        self
    }

    /// Called once the session has released its device
    pub fn on_stop(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_stop = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Called with the seconds left, once per countdown tick
    pub fn on_countdown(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_countdown = Some(Box::new(f));
        self
    }

    /// Called for every captured frame, recording or not
    pub fn on_frame_ready(mut self, f: impl Fn(Frame) + Send + Sync + 'static) -> Self {
        self.on_frame_ready = Some(Box::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.on_start.is_none()
            && self.on_stop.is_none()
            && self.on_error.is_none()
            && self.on_countdown.is_none()
            && self.on_frame_ready.is_none()
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_countdown", &self.on_countdown.is_some())
            .field("on_frame_ready", &self.on_frame_ready.is_some())
            .finish()
    }
}

/// Fan-out to every registered subscriber
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: RwLock<Vec<Arc<SessionEvents>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. A subscriber without handlers is rejected.
    pub fn subscribe(&self, events: SessionEvents) -> CaptureResult<()> {
        if events.is_empty() {
            return Err(CaptureError::InvalidSubscriber);
        }
        tracing::debug!("Adding subscriber: {:?}", events);
        self.subscribers.write().push(Arc::new(events));
        Ok(())
    }

    pub(crate) fn start(&self) {
        self.dispatch("on_start", |s| {
            if let Some(f) = &s.on_start {
                f()
            }
        });
    }

    pub(crate) fn stop(&self) {
        self.dispatch("on_stop", |s| {
            if let Some(f) = &s.on_stop {
                f()
            }
        });
    }

    pub(crate) fn error(&self, message: &str) {
        self.dispatch("on_error", |s| {
            if let Some(f) = &s.on_error {
                f(message)
            }
        });
    }

    pub(crate) fn countdown(&self, seconds_left: u32) {
        self.dispatch("on_countdown", |s| {
            if let Some(f) = &s.on_countdown {
                f(seconds_left)
            }
        });
    }

    pub(crate) fn frame_ready(&self, frame: &Frame) {
        self.dispatch("on_frame_ready", |s| {
            if let Some(f) = &s.on_frame_ready {
                f(frame.clone())
            }
        });
    }

    fn dispatch<F>(&self, hook: &str, call: F)
    where
        F: Fn(&SessionEvents),
    {
        // Snapshot so handlers may subscribe without deadlocking
        let subscribers = self.subscribers.read().clone();
        for subscriber in &subscribers {
            if panic::catch_unwind(AssertUnwindSafe(|| call(subscriber))).is_err() {
                tracing::error!("Subscriber {} handler panicked", hook);
            }
        }
    }
}
