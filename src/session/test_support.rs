//! In-memory devices, sinks and event recorders for tests

use super::events::SessionEvents;
use crate::capture::traits::{CaptureDevice, DeviceOpener, Frame};
use crate::config::SessionConfig;
use crate::recorder::sink::{ClipSink, SinkFactory};
use crate::utils::error::{CaptureError, CaptureResult};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A frame filled with one colour
pub(crate) fn solid_frame(index: u64, width: u32, height: u32) -> Frame {
    let shade = (index % 256) as u8;
    Frame::new(index, RgbImage::from_pixel(width, height, Rgb([shade, 0, 255 - shade])))
}

static NEXT_DEVICE: AtomicU32 = AtomicU32::new(1_000);

/// A device index no other test uses
pub(crate) fn unique_device() -> u32 {
    NEXT_DEVICE.fetch_add(1, Ordering::SeqCst)
}

/// Short clips, short countdown ticks and a fast frame rate
pub(crate) fn fast_config(output_dir: &Path) -> SessionConfig {
    SessionConfig {
        device_index: unique_device(),
        target_fps: 200.0,
        clip_duration_secs: 0.05,
        countdown_secs: 1,
        countdown_tick_ms: 10,
        loop_count: 1,
        output_dir: output_dir.to_path_buf(),
        ready_timeout_ms: 2_000,
        ..SessionConfig::default()
    }
}

/// Poll `done` until it holds or `timeout` passes
pub(crate) fn eventually(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    done()
}

/// Opens [`FakeDevice`]s that produce solid frames
#[derive(Clone)]
pub(crate) struct FakeOpener {
    size: (u32, u32),
    frame_delay: Duration,
    fail_open: bool,
    fail_release: bool,
    broken: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl FakeOpener {
    pub(crate) fn new() -> Self {
        Self {
            size: (8, 6),
            frame_delay: Duration::from_millis(1),
            fail_open: false,
            fail_release: false,
            broken: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// An opener whose devices never open
    pub(crate) fn failing() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    /// An opener whose devices fail to stop streaming
    pub(crate) fn failing_release() -> Self {
        Self {
            fail_release: true,
            ..Self::new()
        }
    }

    /// Number of successful opens
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of release attempts, failed ones included
    pub(crate) fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Make every following frame read fail
    pub(crate) fn break_reads(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

impl DeviceOpener for FakeOpener {
    fn open(&self, index: u32, _target_fps: f64) -> CaptureResult<Box<dyn CaptureDevice>> {
        if self.fail_open {
            return Err(CaptureError::DeviceOpen(format!("no device at index {}", index)));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDevice {
            size: self.size,
            frame_delay: self.frame_delay,
            fail_release: self.fail_release,
            broken: Arc::clone(&self.broken),
            releases: Arc::clone(&self.releases),
            reads: 0,
        }))
    }
}

pub(crate) struct FakeDevice {
    size: (u32, u32),
    frame_delay: Duration,
    fail_release: bool,
    broken: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
    reads: u64,
}

impl CaptureDevice for FakeDevice {
    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn read_frame(&mut self) -> CaptureResult<RgbImage> {
        thread::sleep(self.frame_delay);
        if self.broken.load(Ordering::SeqCst) {
            return Err(CaptureError::FrameRead("device unplugged".to_string()));
        }
        self.reads += 1;
        Ok(solid_frame(self.reads, self.size.0, self.size.1).image().clone())
    }

    fn release(&mut self) -> CaptureResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail_release {
            return Err(CaptureError::DeviceRelease("stream stuck".to_string()));
        }
        Ok(())
    }
}

/// Writes a text trace of every clip to its real path
///
/// Each file holds a header line, one `frame N` line per frame and a final
/// `END` line once the sink is finished.
#[derive(Default)]
pub(crate) struct MemorySinkFactory {
    fail_open: bool,
    fail_writes_in_clip: Option<usize>,
    opened: AtomicUsize,
    written: Arc<Mutex<Vec<u64>>>,
}

impl MemorySinkFactory {
    /// A factory whose sinks never open
    pub(crate) fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::default()
        }
    }

    /// A factory whose `clip`-th sink (0-based) rejects every write
    pub(crate) fn failing_writes_in_clip(clip: usize) -> Self {
        Self {
            fail_writes_in_clip: Some(clip),
            ..Self::default()
        }
    }

    /// Number of sinks opened so far
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Indices of every frame written, across all clips
    pub(crate) fn written(&self) -> Vec<u64> {
        self.written.lock().clone()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&self, path: &Path, fps: f64, size: (u32, u32)) -> CaptureResult<Box<dyn ClipSink>> {
        if self.fail_open {
            return Err(CaptureError::SinkOpen(format!("cannot open {}", path.display())));
        }
        let ordinal = self.opened.fetch_add(1, Ordering::SeqCst);

        let mut file = File::create(path).map_err(|e| CaptureError::SinkOpen(e.to_string()))?;
        writeln!(file, "clip {}x{} @ {}", size.0, size.1, fps)
            .map_err(|e| CaptureError::SinkOpen(e.to_string()))?;

        Ok(Box::new(MemorySink {
            file,
            frames: 0,
            fail_writes: self.fail_writes_in_clip == Some(ordinal),
            written: Arc::clone(&self.written),
        }))
    }
}

struct MemorySink {
    file: File,
    frames: u64,
    fail_writes: bool,
    written: Arc<Mutex<Vec<u64>>>,
}

impl ClipSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> CaptureResult<()> {
        if self.fail_writes {
            return Err(CaptureError::SinkWrite("encoder went away".to_string()));
        }
        writeln!(self.file, "frame {}", frame.index)
            .map_err(|e| CaptureError::SinkWrite(e.to_string()))?;
        self.frames += 1;
        self.written.lock().push(frame.index);
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> CaptureResult<u64> {
        writeln!(self.file, "END").map_err(|e| CaptureError::SinkWrite(e.to_string()))?;
        Ok(self.frames)
    }
}

/// Events seen by an [`EventLog`] subscriber (frames are logged separately)
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    Start,
    Stop,
    Error(String),
    Countdown(u32),
}

/// Records everything a subscriber receives
#[derive(Default)]
pub(crate) struct EventLog {
    events: Mutex<Vec<Event>>,
    frames: Mutex<Vec<u64>>,
}

impl EventLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A subscriber with every handler wired to this log
    pub(crate) fn subscriber(self: &Arc<Self>) -> SessionEvents {
        let start = Arc::clone(self);
        let stop = Arc::clone(self);
        let error = Arc::clone(self);
        let countdown = Arc::clone(self);
        let frame = Arc::clone(self);
        SessionEvents::new()
            .on_start(move || start.events.lock().push(Event::Start))
            .on_stop(move || stop.events.lock().push(Event::Stop))
            .on_error(move |m| error.events.lock().push(Event::Error(m.to_string())))
            .on_countdown(move |i| countdown.events.lock().push(Event::Countdown(i)))
            .on_frame_ready(move |f| frame.frames.lock().push(f.index))
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn frames(&self) -> Vec<u64> {
        self.frames.lock().clone()
    }

    pub(crate) fn count(&self, wanted: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| wanted(e)).count()
    }

    pub(crate) fn errors(&self) -> usize {
        self.count(|e| matches!(e, Event::Error(_)))
    }
}
