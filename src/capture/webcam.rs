//! Webcam capture using nokhwa
//!
//! This module provides the production [`CaptureDevice`]: a nokhwa camera
//! streaming frames that are decoded to RGB on the capture thread.

use crate::capture::traits::{CameraInfo, CaptureDevice, DeviceOpener, Resolution};
use crate::utils::error::{CaptureError, CaptureResult};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

/// Get list of available cameras
pub fn list_cameras() -> Vec<CameraInfo> {
    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => cameras
            .into_iter()
            .enumerate()
            .map(|(position, info)| {
                let index = match info.index() {
                    CameraIndex::Index(i) => *i,
                    CameraIndex::String(_) => position as u32,
                };
                CameraInfo {
                    index,
                    name: info.human_name(),
                    description: info.description().to_string(),
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate cameras: {}", e);
            Vec::new()
        }
    }
}

/// A streaming nokhwa camera
pub struct WebcamDevice {
    camera: Camera,
    index: u32,
    resolution: Resolution,
    streaming: bool,
}

impl WebcamDevice {
    /// Open camera `index` and start its stream
    pub fn open(index: u32, target_fps: f64) -> CaptureResult<Self> {
        let format =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

        let mut camera = Camera::new(CameraIndex::Index(index), format)
            .map_err(|e| CaptureError::DeviceOpen(format!("camera {}: {}", index, e)))?;

        let fps = target_fps.round().max(1.0) as u32;
        if let Err(e) = camera.set_frame_rate(fps) {
            tracing::warn!("Camera {} rejected {}fps, keeping device rate: {}", index, fps, e);
        }

        camera
            .open_stream()
            .map_err(|e| CaptureError::DeviceOpen(format!("camera {} stream: {}", index, e)))?;

        let native = camera.resolution();
        let resolution = Resolution {
            width: native.width(),
            height: native.height(),
        };

        tracing::info!(
            "Webcam {} opened: {} @ {}fps (requested {}fps)",
            index,
            resolution,
            camera.frame_rate(),
            target_fps
        );

        Ok(Self {
            camera,
            index,
            resolution,
            streaming: true,
        })
    }
}

impl CaptureDevice for WebcamDevice {
    fn frame_size(&self) -> (u32, u32) {
        (self.resolution.width, self.resolution.height)
    }

    fn read_frame(&mut self) -> CaptureResult<RgbImage> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| CaptureError::FrameRead(format!("camera {}: {}", self.index, e)))?;

        buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CaptureError::FrameRead(format!("camera {} decode: {}", self.index, e)))
    }

    fn release(&mut self) -> CaptureResult<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.camera.stop_stream().map_err(|e| {
            CaptureError::DeviceRelease(format!("camera {} stop: {}", self.index, e))
        })?;
        tracing::info!("Webcam {} released", self.index);
        Ok(())
    }
}

impl Drop for WebcamDevice {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Error stopping camera stream: {}", e);
        }
    }
}

/// Opens [`WebcamDevice`]s on the calling thread
#[derive(Debug, Default, Clone, Copy)]
pub struct WebcamOpener;

impl DeviceOpener for WebcamOpener {
    fn open(&self, index: u32, target_fps: f64) -> CaptureResult<Box<dyn CaptureDevice>> {
        Ok(Box::new(WebcamDevice::open(index, target_fps)?))
    }
}
