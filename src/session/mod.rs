//! Capture session
//!
//! This module ties capture and recording together:
//! - SessionController, the public start/stop/restart/close surface
//! - CaptureLoop, the thread that owns the device and the recorder
//! - ControlCell/StateCell/DeviceLease for cross-thread coordination
//! - SessionEvents/EventHub for consumer callbacks

pub(crate) mod capture_loop;
pub mod control;
pub mod controller;
pub mod events;

#[cfg(test)]
pub(crate) mod test_support;

pub use control::{ControlSignal, DeviceLease};
pub use controller::SessionController;
pub use events::{EventHub, SessionEvents};
