//! Recording coordinator
//!
//! Drives one capture source through Start/Stop cycles. Each session owns a
//! frame channel, an encoder, an Ogg muxer, the output file and a dedicated
//! encode thread.

use super::channel::{frame_channel, FrameReader, FrameWriter};
use super::encode::{write_pages, EncodeOutcome, EncodeProgress, EncodeStats, EncodeTask};
use super::state::{RecordingOutput, RecordingSession, RecordingState};
use crate::capture::traits::{CaptureFormat, CaptureSource, FrameCallback, PreviewSink};
use crate::codec::VideoEncoder;
use crate::config::{RecorderConfig, EVENT_CAPACITY};
use crate::mux::{MuxError, StreamMuxer};
use crate::processing::colorspace::{i420_to_rgba, rgba_frame_size};
use crate::utils::error::{RecorderError, RecorderResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::broadcast;

/// Attempts at drawing an unused random stream serial
const SERIAL_ATTEMPTS: usize = 8;

/// Events emitted during recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingEvent {
    /// Recording started
    Started { path: PathBuf },
    /// Recording stopped
    Stopped,
    /// Error occurred on the encode thread
    Error(String),
}

/// State held only while recording
struct ActiveSession {
    session: RecordingSession,
    writer: FrameWriter,
    frames_captured: Arc<AtomicU64>,
    progress: Arc<EncodeProgress>,
    encode_thread: JoinHandle<EncodeOutcome<BufWriter<File>>>,
}

/// Records one capture source into Ogg files
pub struct Recorder {
    config: RecorderConfig,
    source: Box<dyn CaptureSource>,
    active: Option<ActiveSession>,
    event_tx: broadcast::Sender<RecordingEvent>,
}

impl Recorder {
    /// Create a recorder for `source`
    pub fn new(config: RecorderConfig, source: Box<dyn CaptureSource>) -> RecorderResult<Self> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            source,
            active: None,
            event_tx,
        })
    }

    /// Get the current recording state
    pub fn state(&self) -> RecordingState {
        if self.active.is_some() {
            RecordingState::Recording
        } else {
            RecordingState::Idle
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Output file of the current session
    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.session.path.as_path())
    }

    /// Current session metadata
    pub fn session(&self) -> Option<&RecordingSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Milliseconds recorded so far in the current session, 0 when idle
    pub fn duration_ms(&self) -> u64 {
        self.active
            .as_ref()
            .map(|a| a.session.elapsed_ms())
            .unwrap_or(0)
    }

    /// Frames the channel accepted from the source in the current session
    pub fn frames_captured(&self) -> u64 {
        self.active
            .as_ref()
            .map(|a| a.frames_captured.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Subscribe to recording events
    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.event_tx.subscribe()
    }

    /// Start recording. Returns the path of the new output file.
    ///
    /// On failure nothing is left behind: the file is removed, the source is
    /// stopped and the recorder stays idle.
    pub fn start(&mut self, preview: Option<Box<dyn PreviewSink>>) -> RecorderResult<PathBuf> {
        if self.active.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }

        let output_dir = self.config.resolved_output_dir();
        tracing::info!("Starting recording in: {}", output_dir.display());

        let temp = tempfile::Builder::new()
            .prefix("recording-")
            .suffix(".ogg")
            .tempfile_in(&output_dir)?;
        let mut sink = BufWriter::new(temp);

        let mut encoder = VideoEncoder::open(self.config.encoder_config())?;
        let mut muxer = self.open_muxer()?;
        let header_stats = write_headers(&mut encoder, &mut muxer, &mut sink)?;

        let format = self.config.capture_format();
        let (writer, reader) = frame_channel(self.config.channel_capacity());
        let frames_captured = Arc::new(AtomicU64::new(0));

        self.source.bind(&format)?;
        let callback = capture_callback(writer.clone(), format, preview, frames_captured.clone());
        self.source.start_capture(callback)?;

        let (file, path) = match sink
            .into_inner()
            .map_err(|e| e.into_error())
            .and_then(|temp| temp.keep().map_err(|e| e.error))
        {
            Ok(kept) => kept,
            Err(e) => {
                self.abort_capture(reader);
                return Err(e.into());
            }
        };

        let serial = muxer.serial();
        let task = EncodeTask::new(
            encoder,
            muxer,
            BufWriter::new(file),
            reader,
            header_stats,
            self.event_tx.clone(),
        );
        let progress = task.progress();

        // A failed spawn drops the task, and with it the channel's read end
        let encode_thread = match std::thread::Builder::new()
            .name("recorder-encode".to_string())
            .spawn(move || task.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                if let Err(stop_err) = self.source.stop_capture() {
                    tracing::warn!("Failed to stop capture after spawn error: {}", stop_err);
                }
                if let Err(rm_err) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to remove {}: {}", path.display(), rm_err);
                }
                return Err(RecorderError::ThreadSpawnFailed(e.to_string()));
            }
        };

        let session = RecordingSession::new(path.clone(), serial);
        tracing::info!(
            "Recording started: session {}, serial {:#010x}, output {}",
            session.id,
            serial,
            path.display()
        );

        self.active = Some(ActiveSession {
            session,
            writer,
            frames_captured,
            progress,
            encode_thread,
        });
        let _ = self.event_tx.send(RecordingEvent::Started { path: path.clone() });
        Ok(path)
    }

    /// Stop recording and finalise the output file
    pub fn stop(&mut self) -> RecorderResult<RecordingOutput> {
        let active = self.active.take().ok_or(RecorderError::NotRecording)?;
        tracing::info!("Stopping recording");

        // Silence the producer before signalling end-of-stream
        let capture_result = self.source.stop_capture();
        if let Err(e) = &capture_result {
            tracing::warn!("Error stopping capture: {}", e);
        }
        active.writer.close();

        let (frames_encoded, stats, error) = match active.encode_thread.join() {
            Ok(outcome) => finish_session(outcome, &active.session.path),
            Err(_) => {
                // Unwinding dropped the muxer and flushed whatever the sink held
                let stats = active.progress.stats();
                tracing::error!("Encode thread panicked");
                if let Err(e) = truncate_to(&active.session.path, stats.bytes_written) {
                    tracing::error!("Failed to finalise {}: {}", active.session.path.display(), e);
                }
                (
                    active.progress.frames_encoded(),
                    stats,
                    Some(RecorderError::EncodeFailed("encode thread panicked".to_string())),
                )
            }
        };

        let output = RecordingOutput {
            session_id: active.session.id,
            path: active.session.path.clone(),
            frames_captured: active.frames_captured.load(Ordering::Relaxed),
            frames_encoded,
            pages_written: stats.pages_written,
            bytes_written: stats.bytes_written,
            duration_ms: active.session.elapsed_ms(),
            error: error.map(|e| e.to_string()),
        };

        let _ = self.event_tx.send(RecordingEvent::Stopped);
        tracing::info!(
            "Recording stopped. {} frames, {} bytes, duration: {}ms",
            output.frames_encoded,
            output.bytes_written,
            output.duration_ms
        );

        capture_result?;
        Ok(output)
    }

    fn open_muxer(&self) -> RecorderResult<StreamMuxer> {
        if let Some(serial) = self.config.stream_serial {
            return Ok(StreamMuxer::open(serial)?);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match StreamMuxer::open(rand::random::<u32>()) {
                Ok(muxer) => return Ok(muxer),
                Err(MuxError::SerialInUse(serial)) if attempt < SERIAL_ATTEMPTS => {
                    tracing::debug!("Stream serial {:#010x} taken, retrying", serial);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Undo a started capture: release the consumer end first so a blocked
    /// callback returns, then stop the source.
    fn abort_capture(&mut self, reader: FrameReader) {
        drop(reader);
        if let Err(e) = self.source.stop_capture() {
            tracing::warn!("Failed to stop capture during abort: {}", e);
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Error stopping recorder on drop: {}", e);
            }
        }
    }
}

/// Emit the header packets, each header ending its own page run
fn write_headers<W: Write>(
    encoder: &mut VideoEncoder,
    muxer: &mut StreamMuxer,
    sink: &mut W,
) -> RecorderResult<EncodeStats> {
    let mut pages = Vec::new();

    while let Some(packet) = encoder.flush_header()? {
        muxer.submit_packet(&packet)?;
        pages.extend(muxer.drain_pages());
    }
    pages.extend(muxer.force_flush());
    let stats = write_pages(sink, &pages)?;

    tracing::debug!(
        "Wrote {} header pages ({} bytes)",
        stats.pages_written,
        stats.bytes_written
    );
    Ok(stats)
}

/// Close out a session whose encode thread exited normally. Returns the
/// frame count, the final totals and the first error of the session.
fn finish_session(
    outcome: EncodeOutcome<BufWriter<File>>,
    path: &Path,
) -> (u64, EncodeStats, Option<RecorderError>) {
    let EncodeOutcome {
        encoder,
        muxer,
        sink,
        mut stats,
        error,
        sink_failed,
    } = outcome;

    let frames_encoded = encoder.frames_encoded();
    encoder.close();

    let finish_error = finish_file(muxer, sink, sink_failed, &mut stats).err();
    if let Some(e) = &finish_error {
        tracing::error!("Failed to finalise {}: {}", path.display(), e);
    }
    (frames_encoded, stats, error.or(finish_error))
}

/// Flush the muxer's remaining pages, then make the file durable and release
/// the stream serial. After a failed write the file is cut back to the last
/// whole page.
fn finish_file(
    mut muxer: StreamMuxer,
    mut sink: BufWriter<File>,
    sink_failed: bool,
    stats: &mut EncodeStats,
) -> RecorderResult<()> {
    let pages = muxer.force_flush();
    let mut write_error = None;
    if !sink_failed {
        match write_pages(&mut sink, &pages) {
            Ok(batch) => *stats += batch,
            Err(e) => write_error = Some(e),
        }
    }

    // Buffered bytes past a failure are never flushed
    let (file, _unwritten) = sink.into_parts();
    if sink_failed || write_error.is_some() {
        file.set_len(stats.bytes_written)?;
    }
    file.sync_all()?;
    drop(file);

    muxer.close();
    match write_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Cut `path` back to `len` bytes and sync it
fn truncate_to(path: &Path, len: u64) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()
}

/// Producer side: runs on the source's thread for every delivered buffer
fn capture_callback(
    writer: FrameWriter,
    format: CaptureFormat,
    mut preview: Option<Box<dyn PreviewSink>>,
    frames_captured: Arc<AtomicU64>,
) -> FrameCallback {
    let frame_size = format.frame_size();
    let (width, height) = (format.width, format.height);
    let mut rgba = match preview {
        Some(_) => vec![0u8; rgba_frame_size(width, height)],
        None => Vec::new(),
    };
    let mut closed_logged = false;

    Box::new(move |data: &[u8]| {
        match writer.write(data) {
            Ok(written) => {
                frames_captured.fetch_add((written / frame_size) as u64, Ordering::Relaxed);
            }
            Err(e) => {
                if !closed_logged {
                    tracing::warn!("Frame channel rejected capture data: {}", e);
                    closed_logged = true;
                }
            }
        }

        if let Some(sink) = preview.as_mut() {
            for frame in data.chunks_exact(frame_size) {
                let shown = i420_to_rgba(width, height, frame, &mut rgba)
                    .map_err(|e| e.to_string())
                    .and_then(|()| {
                        sink.put_frame(&rgba, width, height)
                            .map_err(|e| e.to_string())
                    });
                if let Err(e) = shown {
                    tracing::debug!("Preview frame dropped: {}", e);
                }
            }
        }
    })
}
