//! Session controller
//!
//! Public entry point: opens the camera on a background capture thread and
//! drives countdown, record and loop cycles on request.

use super::capture_loop::{self, CaptureLoop, ClipRequest, Shared, CAPTURE_THREAD};
use super::control::DeviceLease;
use super::events::{EventHub, SessionEvents};
use crate::capture::traits::{DeviceOpener, Frame};
use crate::capture::webcam::WebcamOpener;
use crate::config::SessionConfig;
use crate::recorder::naming::FileNamer;
use crate::recorder::sink::{FfmpegSinkFactory, SinkFactory};
use crate::recorder::state::{RecordingClip, SessionState};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use uuid::Uuid;

struct ActiveSession {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

/// Controls one camera and its recording loop
///
/// The config is trusted as given; validate it with
/// [`SessionConfig::validate`] first. Dropping the controller closes the
/// camera.
pub struct SessionController {
    config: SessionConfig,
    opener: Arc<dyn DeviceOpener>,
    sinks: Arc<dyn SinkFactory>,
    events: Arc<EventHub>,
    session: Mutex<Option<ActiveSession>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        opener: Arc<dyn DeviceOpener>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            config,
            opener,
            sinks,
            events: Arc::new(EventHub::new()),
            session: Mutex::new(None),
        }
    }

    /// Controller for a local webcam encoding through FFmpeg
    pub fn webcam(config: SessionConfig) -> Self {
        let sinks = Arc::new(FfmpegSinkFactory::new(config.ffmpeg.clone()));
        Self::new(config, Arc::new(WebcamOpener), sinks)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register event handlers. They stay registered across sessions.
    pub fn subscribe(&self, events: SessionEvents) -> CaptureResult<()> {
        self.events.subscribe(events)
    }

    /// Open the device on a new capture thread
    ///
    /// Returns once the thread is spawned. Opening completes asynchronously:
    /// see [`wait_until_open`](Self::wait_until_open) and `on_error`.
    pub fn start_camera(&self) -> CaptureResult<()> {
        let mut session = self.session.lock();
        if let Some(active) = session.as_mut() {
            if !active.shared.state.get().is_terminal() {
                return Err(CaptureError::AlreadyActive);
            }
            if let Some(handle) = active.thread.take() {
                if handle.join().is_err() {
                    tracing::error!("Previous capture thread panicked");
                }
            }
        }

        let index = self.config.device_index;
        let lease = DeviceLease::acquire(index)?;
        let shared = Arc::new(Shared::new(index, Arc::clone(&self.events)));
        shared.state.set(SessionState::Opening);

        // The device is not Send, so the loop is built on its own thread
        let thread_shared = Arc::clone(&shared);
        let config = self.config.clone();
        let opener = Arc::clone(&self.opener);
        let sinks = Arc::clone(&self.sinks);
        let handle = thread::Builder::new()
            .name(CAPTURE_THREAD.to_string())
            .spawn(move || CaptureLoop::new(thread_shared, config, opener, sinks, lease).run())
            .map_err(|e| CaptureError::Thread(format!("failed to spawn capture thread: {}", e)))?;

        tracing::info!("Session {} started on device {}", shared.session_id, index);
        *session = Some(ActiveSession {
            shared,
            thread: Some(handle),
        });
        Ok(())
    }

    /// Begin the countdown for the first clip
    ///
    /// Blocks until the device is open (bounded by the configured ready
    /// timeout). The first output path is reserved before returning, so
    /// naming errors surface here. A loop count of 0 records nothing.
    pub fn start_recording(&self) -> CaptureResult<()> {
        let shared = self
            .shared()
            .ok_or_else(|| CaptureError::NotOpen("camera not started".to_string()))?;

        let state = shared
            .state
            .wait_until(|s| s.is_open() || s.is_terminal(), self.config.ready_timeout());
        if !state.is_open() {
            return Err(CaptureError::NotOpen(format!(
                "device {} is {}",
                shared.device_index, state
            )));
        }

        if self.config.loop_count == 0 {
            tracing::info!("Loop count is 0, nothing to record");
            return Ok(());
        }

        let epoch = shared.begin_recording()?;
        let namer = FileNamer::new(self.config.output_dir.clone(), self.config.extension.clone());
        let path = match namer.next() {
            Ok(path) => path,
            Err(e) => {
                shared.end_recording();
                return Err(e);
            }
        };

        tracing::info!(
            "Recording {} clip(s) of {:.1}s, first: {:?}",
            self.config.loop_count,
            self.config.clip_duration_secs,
            path
        );

        let request = ClipRequest {
            path: Some(path),
            loops: Some(self.config.loop_count),
            epoch,
        };
        capture_loop::spawn_countdown(
            &shared,
            self.config.countdown_secs,
            self.config.countdown_tick(),
            request,
        )
        .map_err(|e| {
            shared.end_recording();
            e
        })
    }

    /// Stop recording but keep the preview running
    pub fn stop_recording(&self) {
        if let Some(shared) = self.shared() {
            if shared.end_recording() {
                tracing::info!("Recording stopped");
            }
        }
    }

    /// Close the current clip and reopen the device on the same thread
    pub fn restart_camera(&self) -> CaptureResult<()> {
        let shared = self
            .shared()
            .filter(|s| !s.state.get().is_terminal())
            .ok_or_else(|| CaptureError::NotOpen("camera not started".to_string()))?;

        if !shared.control.request_restart() {
            return Err(CaptureError::NotOpen("camera is closing".to_string()));
        }
        tracing::info!("Restart requested for device {}", shared.device_index);
        Ok(())
    }

    /// Stop the session and wait for the capture thread to release everything
    ///
    /// Called from an event handler, this only signals: the capture thread
    /// finishes on its own.
    pub fn close_camera(&self) {
        let Some(shared) = self.shared() else {
            return;
        };

        shared.control.close();
        shared.cancel_countdown();

        if capture_loop::on_session_thread() {
            tracing::debug!("close_camera called from a session thread, not joining");
            return;
        }

        let handle = self
            .session
            .lock()
            .as_mut()
            .and_then(|active| active.thread.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
            tracing::info!("Session {} closed", shared.session_id);
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared()
            .map(|s| s.state.get())
            .unwrap_or_default()
    }

    pub fn is_recording(&self) -> bool {
        self.shared()
            .map(|s| s.is_recording_active())
            .unwrap_or(false)
    }

    /// Most recent published frame
    pub fn last_frame(&self) -> Option<Frame> {
        self.shared().and_then(|s| s.last_frame())
    }

    /// Clips closed so far in the current session
    pub fn clips(&self) -> Vec<RecordingClip> {
        self.shared().map(|s| s.clips()).unwrap_or_default()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.shared().map(|s| s.session_id)
    }

    /// Block until the device is open or the session ended. Returns the state seen.
    pub fn wait_until_open(&self, timeout: Duration) -> SessionState {
        self.wait(|s| s.is_open() || s.is_terminal(), timeout)
    }

    /// Block until the session ended. Returns the state seen.
    pub fn wait_until_finished(&self, timeout: Duration) -> SessionState {
        self.wait(|s| s.is_terminal(), timeout)
    }

    fn wait<F>(&self, done: F, timeout: Duration) -> SessionState
    where
        F: FnMut(SessionState) -> bool,
    {
        match self.shared() {
            Some(shared) => shared.state.wait_until(done, timeout),
            None => SessionState::Idle,
        }
    }

    // Never hold the session lock while calling into the capture side
    fn shared(&self) -> Option<Arc<Shared>> {
        self.session
            .lock()
            .as_ref()
            .map(|active| Arc::clone(&active.shared))
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.close_camera();
    }
}
