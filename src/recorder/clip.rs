//! Clip recorder
//!
//! Owns at most one open sink and the loop counter that decides whether
//! another clip follows the current one.

use super::sink::{ClipSink, SinkFactory};
use super::state::RecordingClip;
use crate::capture::traits::Frame;
use crate::utils::error::{CaptureError, CaptureResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of closing (or skipping) a clip
#[derive(Debug)]
pub struct ClipOutcome {
    /// The closed clip, if one was open
    pub clip: Option<RecordingClip>,

    /// Whether another clip should begin
    pub continue_looping: bool,

    /// Error raised while closing the sink
    pub error: Option<CaptureError>,
}

struct OpenClip {
    sink: Box<dyn ClipSink>,
    info: RecordingClip,
    opened: Instant,
}

/// Manages zero or one open sink
pub struct Recorder {
    sinks: Arc<dyn SinkFactory>,
    current: Option<OpenClip>,
    loops_remaining: i32,
}

impl Recorder {
    pub fn new(sinks: Arc<dyn SinkFactory>) -> Self {
        Self {
            sinks,
            current: None,
            loops_remaining: 0,
        }
    }

    /// Reset the loop counter (-1 = infinite)
    pub fn set_loops(&mut self, loops: i32) {
        self.loops_remaining = loops;
    }

    pub fn loops_remaining(&self) -> i32 {
        self.loops_remaining
    }

    /// Whether a clip sink is open
    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    /// Open a sink for a new clip
    pub fn begin_clip(
        &mut self,
        path: PathBuf,
        fps: f64,
        size: (u32, u32),
        duration_target: Duration,
    ) -> CaptureResult<()> {
        if self.current.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let sink = self.sinks.open(&path, fps, size)?;
        tracing::info!(
            "Clip started: {:?} ({}x{} @ {}fps, {:.1}s)",
            path,
            size.0,
            size.1,
            fps,
            duration_target.as_secs_f64()
        );

        self.current = Some(OpenClip {
            sink,
            info: RecordingClip::new(path, duration_target, self.loops_remaining),
            opened: Instant::now(),
        });
        Ok(())
    }

    /// Write `frame` to the open clip. Returns false when no clip is open.
    pub fn feed(&mut self, frame: &Frame) -> CaptureResult<bool> {
        let Some(clip) = self.current.as_mut() else {
            return Ok(false);
        };
        clip.sink.write_frame(frame)?;
        clip.info.frames_written += 1;
        Ok(true)
    }

    /// True once `elapsed` reaches `target`
    pub fn is_clip_due(elapsed: Duration, target: Duration) -> bool {
        elapsed >= target
    }

    /// Whether the open clip has reached its target duration
    pub fn clip_due(&self) -> bool {
        self.current
            .as_ref()
            .map(|c| Self::is_clip_due(c.opened.elapsed(), c.info.duration_target))
            .unwrap_or(false)
    }

    /// Close the open clip (if any) and consume one loop
    pub fn end_clip(&mut self) -> ClipOutcome {
        if self.loops_remaining > 0 {
            self.loops_remaining -= 1;
        }
        let (clip, error) = self.close_current();
        let continue_looping = self.loops_remaining != 0;

        tracing::debug!(
            "Clip cycle ended, {} loops remaining, continue={}",
            self.loops_remaining,
            continue_looping
        );

        ClipOutcome {
            clip,
            continue_looping,
            error,
        }
    }

    /// Close the open clip without touching the loop counter
    pub fn abort_clip(&mut self) -> ClipOutcome {
        let (clip, error) = self.close_current();
        ClipOutcome {
            clip,
            continue_looping: false,
            error,
        }
    }

    fn close_current(&mut self) -> (Option<RecordingClip>, Option<CaptureError>) {
        let Some(OpenClip {
            sink,
            mut info,
            opened,
        }) = self.current.take()
        else {
            return (None, None);
        };

        let error = match sink.finish() {
            Ok(_) => None,
            Err(e) => {
                tracing::error!("Failed to close clip {:?}: {}", info.path, e);
                Some(e)
            }
        };
        info.end(opened.elapsed(), self.loops_remaining);

        tracing::info!(
            "Clip closed: {:?}, {} frames in {:.2}s",
            info.path,
            info.frames_written,
            info.elapsed.as_secs_f64()
        );
        (Some(info), error)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.current.is_some() {
            let _ = self.abort_clip();
        }
    }
}
