//! Clip output sinks
//!
//! A sink receives the frames of exactly one clip. The production sink pipes
//! raw RGB24 frames into an FFmpeg child process that muxes them into the
//! output container.

use crate::capture::traits::Frame;
use crate::utils::error::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Writer for one open clip
pub trait ClipSink: Send {
    /// Append one frame
    fn write_frame(&mut self, frame: &Frame) -> CaptureResult<()>;

    /// Flush and close the output. Returns the number of frames written.
    fn finish(self: Box<Self>) -> CaptureResult<u64>;
}

/// Opens sinks for new clips
pub trait SinkFactory: Send + Sync {
    fn open(&self, path: &Path, fps: f64, size: (u32, u32)) -> CaptureResult<Box<dyn ClipSink>>;
}

/// FFmpeg encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FfmpegOptions {
    /// FFmpeg executable (looked up on PATH when relative)
    pub binary: PathBuf,

    /// Output video codec
    pub codec: String,

    /// Encoder preset
    pub preset: String,

    /// Constant rate factor
    pub crf: u8,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            crf: 18,
        }
    }
}

impl FfmpegOptions {
    /// Arguments for encoding `width`x`height` RGB24 frames at `fps` into `output`
    pub fn args(&self, output: &Path, fps: f64, width: u32, height: u32) -> Vec<String> {
        let gop = ((fps * 2.0).round() as u32).max(1);
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(), // Overwrite the reserved placeholder
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            "rgb24".into(),
            "-video_size".into(),
            format!("{}x{}", width, height),
            "-framerate".into(),
            format!("{}", fps),
            "-i".into(),
            "-".into(),
            // yuv420p needs even dimensions
            "-vf".into(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".into(),
            "-c:v".into(),
            self.codec.clone(),
            "-preset".into(),
            self.preset.clone(),
            "-pix_fmt".into(),
            "yuv420p".into(),
            "-crf".into(),
            self.crf.to_string(),
            "-g".into(),
            gop.to_string(),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().to_string(),
        ]
    }
}

/// Spawns one FFmpeg process per clip
#[derive(Debug, Clone, Default)]
pub struct FfmpegSinkFactory {
    options: FfmpegOptions,
}

impl FfmpegSinkFactory {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, path: &Path, fps: f64, size: (u32, u32)) -> CaptureResult<Box<dyn ClipSink>> {
        Ok(Box::new(FfmpegSink::spawn(&self.options, path, fps, size)?))
    }
}

/// FFmpeg encoder fed through stdin
pub struct FfmpegSink {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    size: (u32, u32),
    frame_count: u64,
}

impl FfmpegSink {
    pub fn spawn(
        options: &FfmpegOptions,
        output: &Path,
        fps: f64,
        (width, height): (u32, u32),
    ) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::SinkOpen(format!(
                "invalid frame size {}x{}",
                width, height
            )));
        }

        let mut process = Command::new(&options.binary)
            .args(options.args(output, fps, width, height))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CaptureError::SinkOpen(format!(
                    "failed to start {}: {}",
                    options.binary.display(),
                    e
                ))
            })?;

        let stdin = process.stdin.take().ok_or_else(|| {
            CaptureError::SinkOpen("failed to capture FFmpeg stdin".to_string())
        })?;

        tracing::info!(
            "Started FFmpeg encoder: {}x{} @ {}fps, codec={}, output: {:?}",
            width,
            height,
            fps,
            options.codec,
            output
        );

        Ok(Self {
            process: Some(process),
            stdin: Some(stdin),
            output: output.to_path_buf(),
            size: (width, height),
            frame_count: 0,
        })
    }

    fn close(&mut self) -> CaptureResult<()> {
        // Closing stdin signals EOF so FFmpeg writes the trailer
        drop(self.stdin.take());

        let Some(process) = self.process.take() else {
            return Ok(());
        };
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::SinkWrite(format!(
                "FFmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl ClipSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> CaptureResult<()> {
        if frame.size() != self.size {
            return Err(CaptureError::SinkWrite(format!(
                "frame is {}x{}, clip is {}x{}",
                frame.width(),
                frame.height(),
                self.size.0,
                self.size.1
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CaptureError::SinkWrite("encoder already closed".to_string()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(|e| CaptureError::SinkWrite(format!("{:?}: {}", self.output, e)))?;
        self.frame_count += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> CaptureResult<u64> {
        self.close()?;
        tracing::info!(
            "FFmpeg finished: {} frames, output: {:?}",
            self.frame_count,
            self.output
        );
        Ok(self.frame_count)
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.process.is_some() {
            if let Err(e) = self.close() {
                tracing::warn!("Failed to finalize {:?}: {}", self.output, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_args_describe_raw_input() {
        let options = FfmpegOptions::default();
        let args = options.args(Path::new("/tmp/output_000.mp4"), 16.0, 640, 480);

        let size = args.iter().position(|a| a == "-video_size").unwrap();
        assert_eq!(args[size + 1], "640x480");
        let rate = args.iter().position(|a| a == "-framerate").unwrap();
        assert_eq!(args[rate + 1], "16");
        let gop = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[gop + 1], "32");
        assert_eq!(args.last().unwrap(), "/tmp/output_000.mp4");
    }

    #[test]
    fn test_missing_binary_is_sink_open_error() {
        let dir = tempdir().unwrap();
        let factory = FfmpegSinkFactory::new(FfmpegOptions {
            binary: dir.path().join("no-such-ffmpeg"),
            ..FfmpegOptions::default()
        });

        let result = factory.open(&dir.path().join("output_000.mp4"), 30.0, (64, 48));

        assert!(matches!(result, Err(CaptureError::SinkOpen(_))));
    }

    #[test]
    fn test_zero_size_is_sink_open_error() {
        let result = FfmpegSink::spawn(
            &FfmpegOptions::default(),
            Path::new("output_000.mp4"),
            30.0,
            (0, 480),
        );

        assert!(matches!(result, Err(CaptureError::SinkOpen(_))));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: FfmpegOptions = serde_json::from_str(r#"{"crf": 23}"#).unwrap();

        assert_eq!(options.crf, 23);
        assert_eq!(options.codec, "libx264");
        assert_eq!(options.binary, PathBuf::from("ffmpeg"));
    }
}
