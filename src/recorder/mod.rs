//! Recording system module
//!
//! This module implements the clip recording side of a session:
//! - FileNamer for collision-free sequential output paths
//! - CountdownScheduler for the wait before each clip
//! - ClipSink/SinkFactory for output writers (FFmpeg by default)
//! - Recorder to enforce clip duration and the loop counter

pub mod clip;
pub mod countdown;
pub mod naming;
pub mod sink;
pub mod state;

pub use clip::{ClipOutcome, Recorder};
pub use countdown::{CancelToken, CountdownOutcome, CountdownScheduler};
pub use naming::FileNamer;
pub use sink::{ClipSink, FfmpegOptions, FfmpegSink, FfmpegSinkFactory, SinkFactory};
pub use state::{RecordingClip, SessionState, INFINITE_LOOPS};
