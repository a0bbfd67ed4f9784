//! Session configuration
//!
//! Capture parameters accepted when a session starts. Callers validate a
//! config with [`SessionConfig::validate`] before handing it to the
//! controller, which trusts it as given.

use crate::capture::transform::FrameTransform;
use crate::recorder::naming::DEFAULT_EXTENSION;
use crate::recorder::sink::FfmpegOptions;
use crate::recorder::state::INFINITE_LOOPS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Parameters for one capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Capture device index
    pub device_index: u32,

    /// Requested frames per second, also the container frame rate
    pub target_fps: f64,

    /// Uniform scale applied to every frame
    pub scale_factor: f64,

    /// Mirror frames horizontally
    pub mirror: bool,

    /// Length of each clip in seconds
    pub clip_duration_secs: f64,

    /// Countdown before each clip in seconds
    pub countdown_secs: u32,

    /// Length of one countdown tick in milliseconds
    pub countdown_tick_ms: u64,

    /// Number of clips: -1 = until closed, 0 = none, N = exactly N
    pub loop_count: i32,

    /// Directory receiving the clips
    pub output_dir: PathBuf,

    /// Container extension
    pub extension: String,

    /// How long start_recording waits for the device to open
    pub ready_timeout_ms: u64,

    /// Encoder settings
    pub ffmpeg: FfmpegOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            target_fps: 16.0,
            scale_factor: 1.0,
            mirror: true,
            clip_duration_secs: 10.0,
            countdown_secs: 0,
            countdown_tick_ms: 1000,
            loop_count: 1,
            output_dir: PathBuf::from("./"),
            extension: DEFAULT_EXTENSION.to_string(),
            ready_timeout_ms: 10_000,
            ffmpeg: FfmpegOptions::default(),
        }
    }
}

impl SessionConfig {
    /// Load a config from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content)?;
        tracing::debug!("Loaded session config from {:?}", path);
        Ok(config)
    }

    /// Check every parameter
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(ConfigError::invalid("targetFps", "must be greater than 0"));
        }
        if !(self.scale_factor.is_finite() && self.scale_factor > 0.0) {
            return Err(ConfigError::invalid("scaleFactor", "must be greater than 0"));
        }
        if !(self.clip_duration_secs.is_finite() && self.clip_duration_secs > 0.0) {
            return Err(ConfigError::invalid(
                "clipDurationSecs",
                "must be greater than 0",
            ));
        }
        if self.loop_count < INFINITE_LOOPS {
            return Err(ConfigError::invalid(
                "loopCount",
                format!("{} (use {} for infinite)", self.loop_count, INFINITE_LOOPS),
            ));
        }
        if self.countdown_tick_ms == 0 {
            return Err(ConfigError::invalid("countdownTickMs", "must be greater than 0"));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::invalid("extension", "must not be empty"));
        }
        if !self.output_dir.is_dir() {
            return Err(ConfigError::invalid(
                "outputDir",
                format!("{} is not a directory", self.output_dir.display()),
            ));
        }
        let readonly = fs::metadata(&self.output_dir)
            .map(|m| m.permissions().readonly())
            .unwrap_or(true);
        if readonly {
            return Err(ConfigError::invalid(
                "outputDir",
                format!("{} is not writable", self.output_dir.display()),
            ));
        }
        Ok(())
    }

    pub fn clip_duration(&self) -> Duration {
        Duration::from_secs_f64(self.clip_duration_secs)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.countdown_tick_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Minimum time between two captured frames
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps)
    }

    pub fn transform(&self) -> FrameTransform {
        FrameTransform::new(self.mirror, self.scale_factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid(dir: &Path) -> SessionConfig {
        SessionConfig {
            output_dir: dir.to_path_buf(),
            ..SessionConfig::default()
        }
    }

    #[test]
    fn test_default_config_validates_in_writable_dir() {
        let dir = tempdir().unwrap();
        valid(dir.path()).validate().unwrap();
    }

    #[test]
    fn test_rejects_non_positive_values() {
        let dir = tempdir().unwrap();

        let mut config = valid(dir.path());
        config.clip_duration_secs = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "clipDurationSecs", .. })
        ));

        let mut config = valid(dir.path());
        config.target_fps = -1.0;
        assert!(config.validate().is_err());

        let mut config = valid(dir.path());
        config.scale_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = valid(dir.path());
        config.loop_count = INFINITE_LOOPS - 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "loopCount", .. })
        ));

        let mut config = valid(dir.path());
        config.loop_count = INFINITE_LOOPS;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_missing_output_dir() {
        let dir = tempdir().unwrap();
        let config = valid(&dir.path().join("nope"));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "outputDir", .. })
        ));
    }

    #[test]
    fn test_load_partial_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loopcam.json");
        fs::write(
            &path,
            r#"{
                "deviceIndex": 2,
                "loopCount": -1,
                "clipDurationSecs": 2.5,
                "ffmpeg": { "preset": "fast" }
            }"#,
        )
        .unwrap();

        let config = SessionConfig::from_json_file(&path).unwrap();

        assert_eq!(config.device_index, 2);
        assert_eq!(config.loop_count, -1);
        assert_eq!(config.clip_duration(), Duration::from_millis(2500));
        assert_eq!(config.ffmpeg.preset, "fast");
        assert_eq!(config.ffmpeg.codec, "libx264");
        assert_eq!(config.extension, "mp4");
        assert_eq!(config.target_fps, 16.0);
    }

    #[test]
    fn test_bad_json_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ deviceIndex: ").unwrap();

        assert!(matches!(
            SessionConfig::from_json_file(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
