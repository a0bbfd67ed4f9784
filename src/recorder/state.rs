//! Recording state management
//!
//! Defines the session state machine and per-clip tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Loop count value meaning "record until closed"
pub const INFINITE_LOOPS: i32 = -1;

/// Current state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// No session started
    #[default]
    Idle,
    /// Acquiring the device
    Opening,
    /// Device open, frames flowing, nothing recorded
    Previewing,
    /// Waiting for the countdown before a clip
    CountingDown,
    /// A clip sink is open
    Recording,
    /// Releasing sink and device
    Stopping,
    /// Session ended normally
    Stopped,
    /// Session ended on a device failure
    Errored,
}

impl SessionState {
    /// Whether the capture thread has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Errored)
    }

    /// Whether the device is open and producing frames
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SessionState::Previewing | SessionState::CountingDown | SessionState::Recording
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Opening => "opening",
            SessionState::Previewing => "previewing",
            SessionState::CountingDown => "counting-down",
            SessionState::Recording => "recording",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// One recorded output file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingClip {
    /// Output file path
    pub path: PathBuf,

    /// Wall-clock time the sink was opened
    pub started_at: DateTime<Utc>,

    /// Wall-clock time the sink was closed
    pub ended_at: Option<DateTime<Utc>>,

    /// Configured clip length
    pub duration_target: Duration,

    /// Actual time between open and close
    pub elapsed: Duration,

    /// Frames handed to the sink
    pub frames_written: u64,

    /// Loop counter after this clip closed (-1 = infinite)
    pub loops_remaining: i32,
}

impl RecordingClip {
    /// Create a clip starting now
    pub fn new(path: PathBuf, duration_target: Duration, loops_remaining: i32) -> Self {
        Self {
            path,
            started_at: Utc::now(),
            ended_at: None,
            duration_target,
            elapsed: Duration::ZERO,
            frames_written: 0,
            loops_remaining,
        }
    }

    /// Mark the clip closed
    pub fn end(&mut self, elapsed: Duration, loops_remaining: i32) {
        self.ended_at = Some(Utc::now());
        self.elapsed = elapsed;
        self.loops_remaining = loops_remaining;
    }
}
