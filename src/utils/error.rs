//! Error types and handling
//!
//! Common error types used across the capture session, recorder and device layers.

use thiserror::Error;

/// Session-wide error type
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Could not open video device: {0}")]
    DeviceOpen(String),

    #[error("Could not release video device: {0}")]
    DeviceRelease(String),

    #[error("Failed to capture image: {0}")]
    FrameRead(String),

    #[error("Could not open output sink: {0}")]
    SinkOpen(String),

    #[error("Failed to write to output sink: {0}")]
    SinkWrite(String),

    #[error("Could not name output file: {0}")]
    Naming(String),

    #[error("Device {0} is already in use by another session")]
    DeviceBusy(u32),

    #[error("A capture session is already active")]
    AlreadyActive,

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Device is not open: {0}")]
    NotOpen(String),

    #[error("Thread error: {0}")]
    Thread(String),

    #[error("Subscriber registers no handlers")]
    InvalidSubscriber,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::DeviceOpen(_) => "DEVICE_OPEN_ERROR",
            CaptureError::DeviceRelease(_) => "DEVICE_RELEASE_ERROR",
            CaptureError::FrameRead(_) => "FRAME_READ_ERROR",
            CaptureError::SinkOpen(_) => "SINK_OPEN_ERROR",
            CaptureError::SinkWrite(_) => "SINK_WRITE_ERROR",
            CaptureError::Naming(_) => "NAMING_ERROR",
            CaptureError::DeviceBusy(_) => "DEVICE_BUSY",
            CaptureError::AlreadyActive => "ALREADY_ACTIVE",
            CaptureError::AlreadyRecording => "ALREADY_RECORDING",
            CaptureError::NotOpen(_) => "NOT_OPEN",
            CaptureError::Thread(_) => "THREAD_ERROR",
            CaptureError::InvalidSubscriber => "INVALID_SUBSCRIBER",
            CaptureError::Io(_) => "IO_ERROR",
        }
    }

    /// Whether the error only affects the current clip and leaves the device running
    pub fn is_recording_error(&self) -> bool {
        matches!(
            self,
            CaptureError::SinkOpen(_) | CaptureError::SinkWrite(_) | CaptureError::Naming(_)
        )
    }
}

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(CaptureError::DeviceBusy(2).code(), "DEVICE_BUSY");
        assert_eq!(CaptureError::DeviceOpen("x".into()).code(), "DEVICE_OPEN_ERROR");
        assert_eq!(
            CaptureError::DeviceRelease("x".into()).code(),
            "DEVICE_RELEASE_ERROR"
        );
        assert!(CaptureError::DeviceBusy(2).to_string().contains('2'));
    }

    #[test]
    fn test_release_failure_is_not_an_open_failure() {
        let error = CaptureError::DeviceRelease("camera 0 stop: busy".into());

        assert!(!matches!(error, CaptureError::DeviceOpen(_)));
        assert!(!error.is_recording_error());
        assert!(error.to_string().starts_with("Could not release"));
    }

    #[test]
    fn test_recording_errors_are_clip_scoped() {
        assert!(CaptureError::SinkWrite("pipe".into()).is_recording_error());
        assert!(CaptureError::Naming("ro".into()).is_recording_error());
        assert!(!CaptureError::FrameRead("eof".into()).is_recording_error());
    }
}
