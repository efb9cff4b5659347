//! Encode thread body
//!
//! Pulls whole frames out of the frame channel, encodes them and appends the
//! resulting Ogg pages to the output sink. The encoder, muxer and sink are
//! owned by the task for its lifetime and handed back in [`EncodeOutcome`].

use super::channel::FrameReader;
use super::coordinator::RecordingEvent;
use crate::codec::{Packet, VideoEncoder};
use crate::mux::{Page, StreamMuxer};
use crate::utils::error::RecorderError;
use std::io::Write;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Whole pages committed to the output. `bytes_written` is the offset where
/// the last complete page ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub pages_written: u64,
    pub bytes_written: u64,
}

impl AddAssign for EncodeStats {
    fn add_assign(&mut self, batch: Self) {
        self.pages_written += batch.pages_written;
        self.bytes_written += batch.bytes_written;
    }
}

/// Totals published by the encode thread, readable after it has died
#[derive(Debug, Default)]
pub struct EncodeProgress {
    frames_encoded: AtomicU64,
    pages_written: AtomicU64,
    bytes_written: AtomicU64,
}

impl EncodeProgress {
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded.load(Ordering::Acquire)
    }

    /// Last committed totals
    pub fn stats(&self) -> EncodeStats {
        EncodeStats {
            pages_written: self.pages_written.load(Ordering::Acquire),
            bytes_written: self.bytes_written.load(Ordering::Acquire),
        }
    }

    fn commit(&self, stats: EncodeStats) {
        self.pages_written.store(stats.pages_written, Ordering::Release);
        self.bytes_written.store(stats.bytes_written, Ordering::Release);
    }
}

/// Write `pages` and flush the sink. On `Ok` the whole batch has reached the
/// underlying writer; on `Err` it may hold any prefix of it.
pub fn write_pages<W: Write>(sink: &mut W, pages: &[Page]) -> std::io::Result<EncodeStats> {
    let mut batch = EncodeStats::default();
    for page in pages {
        page.write_to(sink)?;
        batch.pages_written += 1;
        batch.bytes_written += page.len() as u64;
    }
    sink.flush()?;
    Ok(batch)
}

/// Everything the encode thread owned, returned when it exits
pub struct EncodeOutcome<W> {
    pub encoder: VideoEncoder,
    pub muxer: StreamMuxer,
    pub sink: W,
    pub stats: EncodeStats,
    /// First failure, if any
    pub error: Option<RecorderError>,
    /// The sink rejected a write. Bytes past `stats.bytes_written` are not
    /// whole pages and nothing more may be written.
    pub sink_failed: bool,
}

/// Consumer side of a recording session
pub struct EncodeTask<W> {
    encoder: VideoEncoder,
    muxer: StreamMuxer,
    sink: W,
    reader: FrameReader,
    frame_size: usize,
    stats: EncodeStats,
    error: Option<RecorderError>,
    sink_failed: bool,
    events: broadcast::Sender<RecordingEvent>,
    progress: Arc<EncodeProgress>,
}

impl<W: Write> EncodeTask<W> {
    /// `stats` carries the totals for pages already written (the headers)
    pub fn new(
        encoder: VideoEncoder,
        muxer: StreamMuxer,
        sink: W,
        reader: FrameReader,
        stats: EncodeStats,
        events: broadcast::Sender<RecordingEvent>,
    ) -> Self {
        let frame_size = encoder.config().picture_frame_size();
        let progress = Arc::new(EncodeProgress::default());
        progress.commit(stats);
        Self {
            encoder,
            muxer,
            sink,
            reader,
            frame_size,
            stats,
            error: None,
            sink_failed: false,
            events,
            progress,
        }
    }

    /// Shared view of the task's totals
    pub fn progress(&self) -> Arc<EncodeProgress> {
        self.progress.clone()
    }

    /// Run until end-of-stream or the first failure
    pub fn run(mut self) -> EncodeOutcome<W> {
        let mut frame = vec![0u8; self.frame_size];
        // Held back by one so the final packet can be flagged EOS
        let mut held: Option<Packet> = None;

        tracing::debug!("Encode thread started ({} byte frames)", self.frame_size);

        loop {
            match self.reader.read(&mut frame) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    self.fail(e.into());
                    break;
                }
            }

            let encoded = self.encoder.encode(&frame);
            self.progress
                .frames_encoded
                .store(self.encoder.frames_encoded(), Ordering::Release);
            match encoded {
                Ok(Some(packet)) => {
                    if let Some(previous) = held.replace(packet) {
                        self.submit(&previous);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.fail(RecorderError::EncodeFailed(e.to_string()));
                    break;
                }
            }
        }

        // Unblocks a producer still waiting on a full channel
        self.reader.close();

        if let Some(mut last) = held.take() {
            last.eos = true;
            self.submit(&last);
        }

        tracing::debug!(
            "Encode thread finished: {} frames, {} pages, {} bytes",
            self.encoder.frames_encoded(),
            self.stats.pages_written,
            self.stats.bytes_written
        );

        EncodeOutcome {
            encoder: self.encoder,
            muxer: self.muxer,
            sink: self.sink,
            stats: self.stats,
            error: self.error,
            sink_failed: self.sink_failed,
        }
    }

    fn submit(&mut self, packet: &Packet) {
        if let Err(e) = self.muxer.submit_packet(packet) {
            self.fail(e.into());
            return;
        }
        let pages = self.muxer.drain_pages();
        self.commit(&pages);
    }

    fn commit(&mut self, pages: &[Page]) {
        if self.sink_failed || pages.is_empty() {
            return;
        }
        match write_pages(&mut self.sink, pages) {
            Ok(batch) => {
                self.stats += batch;
                self.progress.commit(self.stats);
            }
            Err(e) => {
                self.sink_failed = true;
                self.fail(RecorderError::IoFailed(e));
            }
        }
    }

    fn fail(&mut self, error: RecorderError) {
        tracing::error!("Encode thread error: {}", error);
        if self.error.is_none() {
            let _ = self.events.send(RecordingEvent::Error(error.to_string()));
            self.error = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncoderConfig;
    use crate::recorder::channel::frame_channel;
    use std::io;

    const W: u32 = 32;
    const H: u32 = 16;
    const FRAME: usize = (W * H * 3 / 2) as usize;

    static NEXT_SERIAL: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0xE7C0_0000);

    fn open_pipeline() -> (VideoEncoder, StreamMuxer) {
        let mut encoder = VideoEncoder::open(EncoderConfig::new(W, H, 30, 1)).unwrap();
        while encoder.flush_header().unwrap().is_some() {}
        let serial = NEXT_SERIAL.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        (encoder, StreamMuxer::open(serial).unwrap())
    }

    fn last_page_flags(bytes: &[u8]) -> u8 {
        let start = bytes.windows(4).rposition(|w| w == b"OggS").unwrap();
        bytes[start + 5]
    }

    /// Accepts `limit` bytes then fails every write
    struct FailingSink {
        written: usize,
        limit: usize,
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails its `fail_at`-th write call only
    struct FlakySink {
        data: Vec<u8>,
        calls: usize,
        fail_at: usize,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls == self.fail_at {
                return Err(io::Error::new(io::ErrorKind::Other, "transient"));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Panics once more than `limit` bytes have been written
    struct PanickingSink {
        written: usize,
        limit: usize,
    }

    impl Write for PanickingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written += buf.len();
            assert!(self.written <= self.limit, "sink exploded");
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Count whole pages, or None if `bytes` ends inside a page
    fn whole_pages(bytes: &[u8]) -> Option<u64> {
        let mut pos = 0;
        let mut pages = 0;
        while pos < bytes.len() {
            let header = bytes.get(pos..pos + 27)?;
            assert_eq!(&header[..4], b"OggS");
            let n_segments = header[26] as usize;
            let table = bytes.get(pos + 27..pos + 27 + n_segments)?;
            let body: usize = table.iter().map(|&s| s as usize).sum();
            pos += 27 + n_segments + body;
            pages += 1;
        }
        (pos == bytes.len()).then_some(pages)
    }

    /// Frames that compress badly, so pages fill quickly
    fn noisy_frame(seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        (0..FRAME)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[test]
    fn test_encodes_all_frames_and_marks_eos() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, _) = broadcast::channel(8);
        let task = EncodeTask::new(encoder, muxer, Vec::new(), reader, EncodeStats::default(), events);

        let handle = std::thread::spawn(move || task.run());
        for i in 0..5u8 {
            writer.write(&vec![i * 40; FRAME]).unwrap();
        }
        writer.close();
        let outcome = handle.join().unwrap();

        assert!(outcome.error.is_none());
        assert_eq!(outcome.encoder.frames_encoded(), 5);
        assert_eq!(outcome.stats.bytes_written as usize, outcome.sink.len());
        assert!(outcome.stats.pages_written >= 1);
        assert_ne!(last_page_flags(&outcome.sink) & crate::mux::FLAG_EOS, 0);
    }

    #[test]
    fn test_no_frames_writes_nothing() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, _) = broadcast::channel(8);
        let task = EncodeTask::new(encoder, muxer, Vec::new(), reader, EncodeStats::default(), events);

        writer.close();
        let outcome = task.run();
        assert!(outcome.error.is_none());
        assert!(outcome.sink.is_empty());
        assert!(!outcome.muxer.is_finished());
    }

    #[test]
    fn test_short_read_is_protocol_violation() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, mut rx) = broadcast::channel(8);
        let task = EncodeTask::new(encoder, muxer, Vec::new(), reader, EncodeStats::default(), events);

        let handle = std::thread::spawn(move || task.run());
        writer.write(&vec![7; FRAME]).unwrap();
        writer.write(&vec![7; FRAME / 2]).unwrap();
        writer.close();
        let outcome = handle.join().unwrap();

        assert!(matches!(
            outcome.error,
            Some(RecorderError::ChannelProtocolViolation { expected, received })
                if expected == FRAME && received == FRAME / 2
        ));
        assert_eq!(outcome.encoder.frames_encoded(), 1);
        // The one whole frame is still finalised
        assert_ne!(last_page_flags(&outcome.sink) & crate::mux::FLAG_EOS, 0);
        assert!(matches!(rx.try_recv(), Ok(RecordingEvent::Error(_))));
    }

    #[test]
    fn test_sink_failure_stops_writes_but_drains_channel() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, mut rx) = broadcast::channel(8);
        let sink = FailingSink { written: 0, limit: 10 };
        let task = EncodeTask::new(encoder, muxer, sink, reader, EncodeStats::default(), events);

        let handle = std::thread::spawn(move || task.run());
        for _ in 0..20 {
            writer.write(&vec![90; FRAME]).unwrap();
        }
        writer.close();
        let outcome = handle.join().unwrap();

        assert!(outcome.sink_failed);
        assert!(matches!(outcome.error, Some(RecorderError::IoFailed(_))));
        assert_eq!(outcome.stats.pages_written, 0);
        assert_eq!(outcome.encoder.frames_encoded(), 20);
        assert!(matches!(rx.try_recv(), Ok(RecordingEvent::Error(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_sink_failure_mid_page_keeps_committed_prefix_whole() {
        for fail_at in 2..6 {
            let (encoder, muxer) = open_pipeline();
            let (writer, reader) = frame_channel(FRAME + 128);
            let (events, _) = broadcast::channel(8);
            let sink = io::BufWriter::with_capacity(
                64,
                FlakySink {
                    data: Vec::new(),
                    calls: 0,
                    fail_at,
                },
            );
            let task = EncodeTask::new(encoder, muxer, sink, reader, EncodeStats::default(), events);
            let progress = task.progress();

            let handle = std::thread::spawn(move || task.run());
            for i in 0..60 {
                writer.write(&noisy_frame(i)).unwrap();
            }
            writer.close();
            let outcome = handle.join().unwrap();

            assert!(outcome.sink_failed, "fail_at = {fail_at}");
            assert_eq!(progress.stats(), outcome.stats);
            assert_eq!(progress.frames_encoded(), 60);

            // Unflushed bytes are discarded, then the file is cut at the last whole page
            let (inner, _unwritten) = outcome.sink.into_parts();
            let committed = outcome.stats.bytes_written as usize;
            assert!(inner.data.len() >= committed);
            assert_eq!(
                whole_pages(&inner.data[..committed]),
                Some(outcome.stats.pages_written),
                "fail_at = {fail_at}"
            );
        }
    }

    #[test]
    fn test_progress_survives_panic() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, _) = broadcast::channel(8);
        let sink = PanickingSink {
            written: 0,
            limit: 3 * 4096,
        };
        let task = EncodeTask::new(encoder, muxer, sink, reader, EncodeStats::default(), events);
        let progress = task.progress();

        let handle = std::thread::spawn(move || task.run());
        for i in 0..200 {
            if writer.write(&noisy_frame(i)).is_err() {
                break;
            }
        }
        writer.close();
        assert!(handle.join().is_err());

        let stats = progress.stats();
        assert!(stats.bytes_written <= 3 * 4096);
        assert!(progress.frames_encoded() > 0);
    }

    #[test]
    fn test_reader_closed_on_exit() {
        let (encoder, muxer) = open_pipeline();
        let (writer, reader) = frame_channel(FRAME + 128);
        let (events, _) = broadcast::channel(8);
        let task = EncodeTask::new(encoder, muxer, Vec::new(), reader, EncodeStats::default(), events);

        writer.write(&vec![1; FRAME / 2]).unwrap();
        writer.close();
        let _ = task.run();
        assert!(writer.is_read_closed());
        assert!(writer.write(&[0]).is_err());
    }
}
