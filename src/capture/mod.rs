//! Capture devices and frame processing
//!
//! This module provides the device seam, the nokhwa webcam backend and the
//! per-frame transform.

pub mod traits;
pub mod transform;
pub mod webcam;

// Re-export traits
pub use traits::{CameraInfo, CaptureDevice, DeviceOpener, Frame, Resolution};

pub use transform::FrameTransform;
pub use webcam::{list_cameras, WebcamDevice, WebcamOpener};
