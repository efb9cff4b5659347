//! Synthetic capture source
//!
//! Generates a moving gradient test pattern on a background thread. Used
//! for recording without a camera and throughout the test suite; the number
//! of frames, frames per callback, pacing and bind/start failures are all
//! configurable.

use crate::capture::traits::{
    CaptureError, CaptureFormat, CaptureResult, CaptureSource, FrameCallback, PixelLayout,
};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Shared view of how far a synthetic source has got
#[derive(Clone, Default)]
pub struct CaptureProgress {
    inner: Arc<ProgressInner>,
}

#[derive(Default)]
struct ProgressInner {
    state: Mutex<ProgressState>,
    changed: Condvar,
}

#[derive(Default)]
struct ProgressState {
    frames: u64,
    callbacks: u64,
    finished: bool,
}

impl CaptureProgress {
    /// Frames delivered so far
    pub fn frames(&self) -> u64 {
        self.inner.state.lock().frames
    }

    /// Callback invocations so far
    pub fn callbacks(&self) -> u64 {
        self.inner.state.lock().callbacks
    }

    /// Whether the configured frame count has been delivered
    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().finished
    }

    /// Block until at least `frames` frames were delivered or the source ran
    /// out. Returns false on timeout.
    pub fn wait_for_frames(&self, frames: u64, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.frames < frames && !state.finished {
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return state.frames >= frames;
            }
        }
        state.frames >= frames
    }

    /// Block until the source has delivered everything it was configured for
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.finished {
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return state.finished;
            }
        }
        true
    }

    fn record(&self, frames: u64) {
        let mut state = self.inner.state.lock();
        state.frames += frames;
        state.callbacks += 1;
        self.inner.changed.notify_all();
    }

    fn finish(&self) {
        self.inner.state.lock().finished = true;
        self.inner.changed.notify_all();
    }
}

/// Test-pattern frame source
pub struct SyntheticSource {
    frame_limit: Option<u64>,
    frames_per_callback: usize,
    interval: Option<Duration>,
    bind_failure: Option<CaptureError>,
    start_failure: Option<CaptureError>,
    format: Option<CaptureFormat>,
    running: Arc<AtomicBool>,
    progress: CaptureProgress,
    worker: Option<JoinHandle<()>>,
}

impl SyntheticSource {
    /// Unlimited source delivering one frame per callback as fast as the
    /// consumer accepts them
    pub fn new() -> Self {
        Self {
            frame_limit: None,
            frames_per_callback: 1,
            interval: None,
            bind_failure: None,
            start_failure: None,
            format: None,
            running: Arc::new(AtomicBool::new(false)),
            progress: CaptureProgress::default(),
            worker: None,
        }
    }

    /// Stop after `frames` frames
    pub fn with_frame_count(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    /// Deliver `frames` whole frames per callback
    pub fn with_batch(mut self, frames: usize) -> Self {
        self.frames_per_callback = frames.max(1);
        self
    }

    /// Sleep between callbacks
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Make `bind` fail with `error`
    pub fn failing_bind(mut self, error: CaptureError) -> Self {
        self.bind_failure = Some(error);
        self
    }

    /// Make `start_capture` fail with `error`
    pub fn failing_start(mut self, error: CaptureError) -> Self {
        self.start_failure = Some(error);
        self
    }

    /// Handle for observing delivery from other threads
    pub fn progress(&self) -> CaptureProgress {
        self.progress.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SyntheticSource {
    fn bind(&mut self, format: &CaptureFormat) -> CaptureResult<()> {
        if let Some(error) = &self.bind_failure {
            return Err(error.clone());
        }
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }
        if format.layout != PixelLayout::I420
            || format.width == 0
            || format.height == 0
            || format.width % 2 != 0
            || format.height % 2 != 0
        {
            return Err(CaptureError::FormatRejected(format!(
                "{}x{} {:?}",
                format.width, format.height, format.layout
            )));
        }

        self.format = Some(*format);
        Ok(())
    }

    fn start_capture(&mut self, mut callback: FrameCallback) -> CaptureResult<()> {
        if let Some(error) = &self.start_failure {
            return Err(error.clone());
        }
        let format = self.format.ok_or(CaptureError::NotBound)?;
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        let running = self.running.clone();
        let progress = self.progress.clone();
        let limit = self.frame_limit;
        let batch = self.frames_per_callback;
        let interval = self.interval;

        running.store(true, Ordering::SeqCst);

        let handle = std::thread::Builder::new()
            .name("synthetic-capture".to_string())
            .spawn(move || {
                let frame_size = format.frame_size();
                let mut buffer = Vec::with_capacity(frame_size * batch);
                let mut frame_no: u64 = 0;

                while running.load(Ordering::SeqCst) {
                    let remaining = limit.map(|l| l.saturating_sub(frame_no));
                    let count = match remaining {
                        Some(0) => break,
                        Some(r) => (r as usize).min(batch),
                        None => batch,
                    };

                    buffer.clear();
                    for i in 0..count {
                        write_pattern(&format, frame_no + i as u64, &mut buffer);
                    }

                    callback(&buffer);
                    frame_no += count as u64;
                    progress.record(count as u64);

                    if let Some(interval) = interval {
                        std::thread::sleep(interval);
                    }
                }

                progress.finish();
                tracing::debug!("Synthetic capture thread exiting after {} frames", frame_no);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                CaptureError::Backend(format!("failed to spawn capture thread: {e}"))
            })?;

        self.worker = Some(handle);
        tracing::info!(
            "Synthetic capture started: {}x{} @ {}/{} fps",
            format.width,
            format.height,
            format.fps_numerator,
            format.fps_denominator
        );
        Ok(())
    }

    fn stop_capture(&mut self) -> CaptureResult<()> {
        let handle = self.worker.take().ok_or(CaptureError::NotCapturing)?;
        self.running.store(false, Ordering::SeqCst);
        handle
            .join()
            .map_err(|_| CaptureError::Backend("capture thread panicked".to_string()))?;
        tracing::info!("Synthetic capture stopped");
        Ok(())
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop_capture();
        }
    }
}

/// Append one I420 frame of the moving gradient
pub fn write_pattern(format: &CaptureFormat, frame_no: u64, out: &mut Vec<u8>) {
    let (w, h) = (format.width as usize, format.height as usize);
    let shift = (frame_no * 2) as usize;

    for y in 0..h {
        out.extend((0..w).map(|x| ((x + y + shift) & 0xFF) as u8));
    }
    for _ in 0..h / 2 {
        out.extend((0..w / 2).map(|x| (64 + ((x + shift) & 0x7F)) as u8));
    }
    for y in 0..h / 2 {
        out.extend((0..w / 2).map(|_| (64 + ((y + shift) & 0x7F)) as u8));
    }
}
