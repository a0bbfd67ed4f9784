//! Capture thread
//!
//! One thread per session owns the device and the recorder. It reads frames,
//! publishes them, feeds the open clip and reacts to the control signal. The
//! consumer and the countdown thread only talk to it through [`Shared`].

use super::control::{ControlCell, ControlSignal, DeviceLease, StateCell};
use super::events::EventHub;
use crate::capture::traits::{CaptureDevice, DeviceOpener, Frame};
use crate::capture::transform::FrameTransform;
use crate::config::SessionConfig;
use crate::recorder::clip::{ClipOutcome, Recorder};
use crate::recorder::countdown::{CancelToken, CountdownOutcome, CountdownScheduler};
use crate::recorder::naming::{self, FileNamer};
use crate::recorder::sink::SinkFactory;
use crate::recorder::state::{RecordingClip, SessionState};
use crate::utils::error::{CaptureError, CaptureResult};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub(crate) const CAPTURE_THREAD: &str = "loopcam-capture";
pub(crate) const COUNTDOWN_THREAD: &str = "loopcam-countdown";

/// A clip armed by a finished countdown
#[derive(Debug)]
pub(crate) struct ClipRequest {
    /// Path reserved up front, or None to name the clip when it begins
    pub path: Option<PathBuf>,

    /// Loop counter to install, or None to keep the current one
    pub loops: Option<i32>,

    /// Recording epoch the request belongs to
    pub epoch: u64,
}

struct CountdownThread {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// State shared between the controller, the capture thread and the countdown thread
pub(crate) struct Shared {
    pub session_id: Uuid,
    pub device_index: u32,
    pub control: ControlCell,
    pub state: StateCell,
    pub events: Arc<EventHub>,
    recording_active: AtomicBool,
    // Bumped on every start/stop so the capture thread can spot stale clips
    epoch: AtomicU64,
    pending_clip: Mutex<Option<ClipRequest>>,
    countdown: Mutex<Option<CountdownThread>>,
    last_frame: Mutex<Option<Frame>>,
    clips: Mutex<Vec<RecordingClip>>,
}

impl Shared {
    pub(crate) fn new(device_index: u32, events: Arc<EventHub>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            device_index,
            control: ControlCell::default(),
            state: StateCell::default(),
            events,
            recording_active: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            pending_clip: Mutex::new(None),
            countdown: Mutex::new(None),
            last_frame: Mutex::new(None),
            clips: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_recording_active(&self) -> bool {
        self.recording_active.load(Ordering::SeqCst)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Mark recording active and open a new epoch
    pub(crate) fn begin_recording(&self) -> CaptureResult<u64> {
        if self.recording_active.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRecording);
        }
        Ok(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Clear the recording flag and drop any armed clip. Returns whether recording was active.
    pub(crate) fn end_recording(&self) -> bool {
        let was_active = self.recording_active.swap(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_countdown();
        self.discard_pending();
        was_active
    }

    /// Cancel the running countdown and join it (unless called from it)
    pub(crate) fn cancel_countdown(&self) {
        let countdown = self.countdown.lock().take();
        if let Some(CountdownThread { cancel, handle }) = countdown {
            cancel.cancel();
            join_countdown_thread(handle);
        }
    }

    fn join_countdown(&self) {
        let countdown = self.countdown.lock().take();
        if let Some(CountdownThread { handle, .. }) = countdown {
            join_countdown_thread(handle);
        }
    }

    fn arm(&self, request: ClipRequest) {
        *self.pending_clip.lock() = Some(request);
    }

    fn take_pending(&self) -> Option<ClipRequest> {
        self.pending_clip.lock().take()
    }

    fn discard_pending(&self) {
        if let Some(request) = self.take_pending() {
            if let Some(path) = request.path {
                naming::release_placeholder(&path);
            }
        }
    }

    pub(crate) fn last_frame(&self) -> Option<Frame> {
        self.last_frame.lock().clone()
    }

    pub(crate) fn clips(&self) -> Vec<RecordingClip> {
        self.clips.lock().clone()
    }
}

fn join_countdown_thread(handle: JoinHandle<()>) {
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        tracing::error!("Countdown thread panicked");
    }
}

/// Whether the caller runs on a thread owned by a session
pub(crate) fn on_session_thread() -> bool {
    matches!(
        thread::current().name(),
        Some(CAPTURE_THREAD) | Some(COUNTDOWN_THREAD)
    )
}

/// Start the countdown that arms `request`, replacing any running countdown
pub(crate) fn spawn_countdown(
    shared: &Arc<Shared>,
    seconds: u32,
    tick: Duration,
    request: ClipRequest,
) -> CaptureResult<()> {
    shared.cancel_countdown();
    shared.state.set(SessionState::CountingDown);

    let cancel = CancelToken::new();
    let scheduler = CountdownScheduler::with_tick(tick, cancel.clone());
    let reserved = request.path.clone();
    let thread_shared = Arc::clone(shared);

    let spawned = thread::Builder::new()
        .name(COUNTDOWN_THREAD.to_string())
        .spawn(move || {
            let events = Arc::clone(&thread_shared.events);
            let mut request = Some(request);
            let outcome = scheduler.run(
                i64::from(seconds),
                |left| events.countdown(left),
                || {
                    events.start();
                    if let Some(request) = request.take() {
                        thread_shared.arm(request);
                    }
                },
            );
            if outcome == CountdownOutcome::Cancelled {
                if let Some(path) = request.and_then(|r| r.path) {
                    naming::release_placeholder(&path);
                }
            }
        });

    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(path) = reserved {
                naming::release_placeholder(&path);
            }
            return Err(CaptureError::Thread(format!(
                "failed to spawn countdown thread: {}",
                e
            )));
        }
    };

    *shared.countdown.lock() = Some(CountdownThread { cancel, handle });

    // Lost a race with stop_recording
    if !shared.is_recording_active() {
        shared.cancel_countdown();
    }
    Ok(())
}

/// Why the capture loop stopped
#[derive(Debug)]
enum LoopExit {
    /// close_camera was called
    Closed,
    /// The loop counter ran out
    Finished,
    /// The device failed
    Failed(CaptureError),
}

enum FramesEnd {
    Restart,
    Exit(LoopExit),
}

/// The capture thread body
///
/// Built on the capture thread itself since devices are not `Send`. Field
/// order matters: on unwind the recorder (and its sink) drops before
/// the device, and the device before the lease.
pub(crate) struct CaptureLoop {
    recorder: Recorder,
    device: Option<Box<dyn CaptureDevice>>,
    shared: Arc<Shared>,
    config: SessionConfig,
    opener: Arc<dyn DeviceOpener>,
    namer: FileNamer,
    transform: FrameTransform,
    next_index: u64,
    clip_epoch: u64,
    lease: Option<DeviceLease>,
}

impl CaptureLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: SessionConfig,
        opener: Arc<dyn DeviceOpener>,
        sinks: Arc<dyn SinkFactory>,
        lease: DeviceLease,
    ) -> Self {
        Self {
            recorder: Recorder::new(sinks),
            device: None,
            namer: FileNamer::new(config.output_dir.clone(), config.extension.clone()),
            transform: config.transform(),
            shared,
            config,
            opener,
            next_index: 0,
            clip_epoch: 0,
            lease: Some(lease),
        }
    }

    /// Run until closed, exhausted or failed, then release everything
    pub(crate) fn run(mut self) {
        let span = tracing::info_span!(
            "session",
            id = %self.shared.session_id,
            device = self.shared.device_index
        );
        let _entered = span.enter();
        let started = Instant::now();

        let exit = match panic::catch_unwind(AssertUnwindSafe(|| self.run_loop())) {
            Ok(exit) => exit,
            Err(_) => LoopExit::Failed(CaptureError::Thread(
                "capture loop panicked".to_string(),
            )),
        };

        let elapsed = started.elapsed().as_secs_f64();
        tracing::info!(
            "Captured {} frames in {:.2}s ({:.1} fps actual), exit: {:?}",
            self.next_index,
            elapsed,
            self.next_index as f64 / elapsed.max(f64::EPSILON),
            exit
        );

        self.shutdown(exit);
    }

    fn run_loop(&mut self) -> LoopExit {
        loop {
            if self.shared.control.load() == ControlSignal::Close {
                return LoopExit::Closed;
            }

            self.shared.state.set(SessionState::Opening);
            match self
                .opener
                .open(self.shared.device_index, self.config.target_fps)
            {
                Ok(device) => {
                    let (width, height) = device.frame_size();
                    tracing::info!(
                        "Device {} open: {}x{} (target {}fps)",
                        self.shared.device_index,
                        width,
                        height,
                        self.config.target_fps
                    );
                    self.device = Some(device);
                }
                Err(e) => return LoopExit::Failed(e),
            }
            self.shared.state.set(self.resume_state());

            match self.capture_frames() {
                FramesEnd::Restart => {
                    tracing::info!("Reopening device {}", self.shared.device_index);
                    self.release_device();
                }
                FramesEnd::Exit(exit) => return exit,
            }
        }
    }

    fn resume_state(&self) -> SessionState {
        if self.recorder.is_open() {
            SessionState::Recording
        } else if self.shared.is_recording_active() {
            SessionState::CountingDown
        } else {
            SessionState::Previewing
        }
    }

    fn capture_frames(&mut self) -> FramesEnd {
        let interval = self.config.frame_interval();

        loop {
            let tick = Instant::now();

            match self.shared.control.load() {
                ControlSignal::Close => return FramesEnd::Exit(LoopExit::Closed),
                ControlSignal::Restart => {
                    // A failed take means Close replaced the restart
                    if !self.shared.control.take_restart() {
                        continue;
                    }
                    if self.recorder.is_open() {
                        if let Some(exit) = self.finish_clip() {
                            return FramesEnd::Exit(exit);
                        }
                    }
                    return FramesEnd::Restart;
                }
                ControlSignal::Continue => {}
            }

            let read = match self.device.as_mut() {
                Some(device) => device.read_frame(),
                None => Err(CaptureError::NotOpen("device released".to_string())),
            };
            let image = match read {
                Ok(image) => image,
                Err(e) => return FramesEnd::Exit(LoopExit::Failed(e)),
            };

            let frame = Frame::new(self.next_index, self.transform.apply(&image));
            self.next_index += 1;

            *self.shared.last_frame.lock() = Some(frame.clone());
            self.shared.events.frame_ready(&frame);

            if let Some(exit) = self.drive_recording(&frame) {
                return FramesEnd::Exit(exit);
            }

            let spent = tick.elapsed();
            if spent < interval {
                thread::sleep(interval - spent);
            }
        }
    }

    /// Feed `frame` to the recorder, opening and closing clips as needed
    fn drive_recording(&mut self, frame: &Frame) -> Option<LoopExit> {
        let active = self.shared.is_recording_active();

        if self.recorder.is_open() && (!active || self.clip_epoch != self.shared.epoch()) {
            tracing::info!("Recording stopped, closing current clip");
            let outcome = self.recorder.abort_clip();
            self.record_outcome(outcome);
        }

        if !active {
            self.shared.discard_pending();
            if self.shared.state.get() != SessionState::Previewing
                && !self.shared.is_recording_active()
            {
                self.shared.state.set(SessionState::Previewing);
            }
            return None;
        }

        if !self.recorder.is_open() {
            let request = self.shared.take_pending()?;
            if request.epoch != self.shared.epoch() {
                if let Some(path) = request.path {
                    naming::release_placeholder(&path);
                }
                return None;
            }
            self.shared.join_countdown();
            if let Some(exit) = self.begin_clip(request, frame.size()) {
                return Some(exit);
            }
        }

        if !self.recorder.is_open() {
            return None;
        }
        if let Err(e) = self.recorder.feed(frame) {
            self.report(&e);
            return self.finish_clip();
        }
        if self.recorder.clip_due() {
            return self.finish_clip();
        }
        None
    }

    fn begin_clip(&mut self, request: ClipRequest, size: (u32, u32)) -> Option<LoopExit> {
        self.clip_epoch = request.epoch;
        if let Some(loops) = request.loops {
            self.recorder.set_loops(loops);
        }

        let path = match request.path {
            Some(path) => path,
            None => match self.namer.next() {
                Ok(path) => path,
                Err(e) => {
                    self.report(&e);
                    return self.finish_clip();
                }
            },
        };

        match self.recorder.begin_clip(
            path.clone(),
            self.config.target_fps,
            size,
            self.config.clip_duration(),
        ) {
            Ok(()) => {
                self.shared.state.set(SessionState::Recording);
                None
            }
            Err(e) => {
                naming::release_placeholder(&path);
                self.report(&e);
                self.finish_clip()
            }
        }
    }

    /// Close the current clip, consume a loop and arm the next clip if any
    fn finish_clip(&mut self) -> Option<LoopExit> {
        let outcome = self.recorder.end_clip();
        let continue_looping = outcome.continue_looping;
        self.record_outcome(outcome);

        if !continue_looping {
            tracing::info!("Loop count exhausted, ending session");
            self.shared.recording_active.store(false, Ordering::SeqCst);
            return Some(LoopExit::Finished);
        }

        if !self.shared.is_recording_active() {
            self.shared.state.set(SessionState::Previewing);
            return None;
        }
        // A newer start_recording already owns the state
        if self.clip_epoch != self.shared.epoch() {
            return None;
        }

        let request = ClipRequest {
            path: None,
            loops: None,
            epoch: self.clip_epoch,
        };
        if let Err(e) = spawn_countdown(
            &self.shared,
            self.config.countdown_secs,
            self.config.countdown_tick(),
            request,
        ) {
            self.report(&e);
            self.shared.end_recording();
            self.shared.state.set(SessionState::Previewing);
        }
        None
    }

    fn record_outcome(&mut self, outcome: ClipOutcome) {
        if let Some(clip) = outcome.clip {
            self.shared.clips.lock().push(clip);
        }
        if let Some(e) = outcome.error {
            self.report(&e);
        }
    }

    fn report(&self, error: &CaptureError) {
        if error.is_recording_error() {
            tracing::warn!("Clip failed: {} ({})", error, error.code());
        } else {
            tracing::error!("{} ({})", error, error.code());
        }
        self.shared.events.error(&error.to_string());
    }

    fn release_device(&mut self) {
        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.release() {
                tracing::warn!("Error releasing device {}: {}", self.shared.device_index, e);
            }
        }
    }

    /// Release sink, device and lease, then publish the terminal state
    fn shutdown(&mut self, exit: LoopExit) {
        self.shared.state.set(SessionState::Stopping);
        self.shared.recording_active.store(false, Ordering::SeqCst);
        self.shared.cancel_countdown();
        self.shared.discard_pending();

        let outcome = self.recorder.abort_clip();
        self.record_outcome(outcome);
        self.release_device();
        self.lease.take();

        match exit {
            LoopExit::Failed(e) => {
                self.report(&e);
                self.shared.state.set(SessionState::Errored);
            }
            LoopExit::Closed | LoopExit::Finished => {
                self.shared.events.stop();
                self.shared.state.set(SessionState::Stopped);
            }
        }
    }
}
