//! Capture trait definitions
//!
//! Device-agnostic traits and frame types for capture sources.

use crate::utils::error::CaptureResult;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A captured, transformed frame
///
/// Pixel data sits behind an `Arc` and is never mutated once the frame is
/// built, so clones handed to consumers stay valid while capture continues.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture sequence number within the session (0, 1, 2, ...)
    pub index: u64,

    /// When the frame was read from the device
    pub captured_at: Instant,

    image: Arc<RgbImage>,
}

impl Frame {
    /// Wrap an RGB image as frame `index`
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self {
            index,
            captured_at: Instant::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Frame dimensions as (width, height)
    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The frame pixels
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Packed RGB24 bytes, row-major
    pub fn as_raw(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// An open video capture device
///
/// Implementations are created, read and released on the capture thread
/// only, so they do not need to be `Send`.
pub trait CaptureDevice {
    /// Native frame size reported by the device
    fn frame_size(&self) -> (u32, u32);

    /// Block until the next frame is available
    fn read_frame(&mut self) -> CaptureResult<RgbImage>;

    /// Stop streaming and release the device
    fn release(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Opens capture devices by index
///
/// The opener is shared with the capture thread, which calls it to acquire
/// the device it will own.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, index: u32, target_fps: f64) -> CaptureResult<Box<dyn CaptureDevice>>;
}

/// Information about a camera/webcam
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Device index
    pub index: u32,

    /// Device name
    pub name: String,

    /// Backend-specific description
    pub description: String,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
