//! Shared helpers for recorder integration tests.

#![allow(dead_code)]

use camera_recorder::capture::synthetic::write_pattern;
use camera_recorder::capture::{
    CaptureError, CaptureFormat, CaptureResult, CaptureSource, FrameCallback, PreviewError,
    PreviewSink,
};
use camera_recorder::RecorderConfig;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub const WIDTH: u32 = 32;
pub const HEIGHT: u32 = 16;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camera_recorder=info".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_config(dir: &Path) -> RecorderConfig {
    RecorderConfig {
        width: WIDTH,
        height: HEIGHT,
        output_dir: Some(dir.to_path_buf()),
        ..Default::default()
    }
}

/// One I420 test frame
pub fn frame(format: &CaptureFormat, frame_no: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(format.frame_size());
    write_pattern(format, frame_no, &mut out);
    out
}

pub fn ogg_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "ogg"))
        .collect();
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Manually driven capture source
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualShared {
    format: Mutex<Option<CaptureFormat>>,
    callback: Mutex<Option<FrameCallback>>,
    fail_stop: AtomicBool,
}

/// Capture source whose frames are pushed by the test through a [`ManualHandle`]
pub struct ManualSource {
    shared: Arc<ManualShared>,
}

/// Test-side handle of a [`ManualSource`]
#[derive(Clone)]
pub struct ManualHandle {
    shared: Arc<ManualShared>,
}

impl ManualSource {
    pub fn new() -> (Self, ManualHandle) {
        let shared = Arc::new(ManualShared::default());
        (
            Self {
                shared: shared.clone(),
            },
            ManualHandle { shared },
        )
    }
}

impl ManualHandle {
    /// Deliver `data` to the callback on the calling thread. Returns false
    /// when capture is not running.
    pub fn push(&self, data: &[u8]) -> bool {
        let mut callback = self.shared.callback.lock();
        match callback.as_mut() {
            Some(callback) => {
                callback(data);
                true
            }
            None => false,
        }
    }

    pub fn format(&self) -> Option<CaptureFormat> {
        *self.shared.format.lock()
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.callback.lock().is_some()
    }

    /// Make the next `stop_capture` report an error after it has stopped
    pub fn fail_next_stop(&self) {
        self.shared.fail_stop.store(true, Ordering::SeqCst);
    }
}

impl CaptureSource for ManualSource {
    fn bind(&mut self, format: &CaptureFormat) -> CaptureResult<()> {
        *self.shared.format.lock() = Some(*format);
        Ok(())
    }

    fn start_capture(&mut self, callback: FrameCallback) -> CaptureResult<()> {
        if self.shared.format.lock().is_none() {
            return Err(CaptureError::NotBound);
        }
        let mut slot = self.shared.callback.lock();
        if slot.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }
        *slot = Some(callback);
        Ok(())
    }

    fn stop_capture(&mut self) -> CaptureResult<()> {
        // Waits for an in-flight push to return
        let stopped = self
            .shared
            .callback
            .lock()
            .take()
            .map(|_| ())
            .ok_or(CaptureError::NotCapturing);
        if self.shared.fail_stop.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::Backend("device hung up".to_string()));
        }
        stopped
    }
}

// ---------------------------------------------------------------------------
// Preview sinks
// ---------------------------------------------------------------------------

/// Counts frames, optionally failing every call
pub struct CountingPreview {
    pub frames: Arc<AtomicU64>,
    pub fail: bool,
}

impl PreviewSink for CountingPreview {
    fn put_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), PreviewError> {
        assert_eq!(rgba.len(), (width * height * 4) as usize);
        self.frames.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(PreviewError::Rejected("surface lost".to_string()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Ogg page parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub flags: u8,
    pub granule: i64,
    pub serial: u32,
    pub sequence: u32,
    pub segments: Vec<u8>,
    pub body: Vec<u8>,
}

impl ParsedPage {
    pub fn is_continued(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags & 0x02 != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags & 0x04 != 0
    }

    /// Number of packets that end on this page
    pub fn packets_completed(&self) -> usize {
        self.segments.iter().filter(|&&s| s < 255).count()
    }
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Split a file into pages, checking structure and checksum of each
pub fn parse_pages(bytes: &[u8]) -> Result<Vec<ParsedPage>, String> {
    let mut pages = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < 27 {
            return Err(format!("truncated page header at {pos}"));
        }
        if &rest[..4] != b"OggS" {
            return Err(format!("bad capture pattern at {pos}"));
        }
        if rest[4] != 0 {
            return Err(format!("bad version {} at {pos}", rest[4]));
        }

        let n_segments = rest[26] as usize;
        let header_len = 27 + n_segments;
        if rest.len() < header_len {
            return Err(format!("truncated segment table at {pos}"));
        }
        let segments = rest[27..header_len].to_vec();
        let body_len: usize = segments.iter().map(|&s| s as usize).sum();
        if rest.len() < header_len + body_len {
            return Err(format!("truncated body at {pos}"));
        }

        let mut page = rest[..header_len + body_len].to_vec();
        let stored = u32::from_le_bytes(page[22..26].try_into().unwrap());
        page[22..26].fill(0);
        let computed = crc32(&page);
        if stored != computed {
            return Err(format!(
                "checksum mismatch at {pos}: stored {stored:#010x}, computed {computed:#010x}"
            ));
        }

        pages.push(ParsedPage {
            flags: rest[5],
            granule: i64::from_le_bytes(rest[6..14].try_into().unwrap()),
            serial: u32::from_le_bytes(rest[14..18].try_into().unwrap()),
            sequence: u32::from_le_bytes(rest[18..22].try_into().unwrap()),
            segments,
            body: rest[header_len..header_len + body_len].to_vec(),
        });
        pos += header_len + body_len;
    }

    Ok(pages)
}

/// Reassemble packets, tagging each with the index of the page it starts on
pub fn packets(pages: &[ParsedPage]) -> Vec<(usize, Vec<u8>)> {
    let mut packets = Vec::new();
    let mut current: Option<(usize, Vec<u8>)> = None;

    for (index, page) in pages.iter().enumerate() {
        let mut offset = 0;
        for &segment in &page.segments {
            let chunk = &page.body[offset..offset + segment as usize];
            offset += segment as usize;
            let entry = current.get_or_insert_with(|| (index, Vec::new()));
            entry.1.extend_from_slice(chunk);
            if segment < 255 {
                packets.extend(current.take());
            }
        }
    }
    packets
}

/// Parse a recording and check the stream-level invariants every file must hold
pub fn read_recording(path: &Path) -> Vec<ParsedPage> {
    let bytes = std::fs::read(path).unwrap();
    let pages = parse_pages(&bytes).unwrap();
    assert!(!pages.is_empty(), "recording has no pages");

    let serial = pages[0].serial;
    assert!(pages[0].is_bos());
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(page.serial, serial, "serial changed on page {i}");
        assert_eq!(page.sequence, i as u32, "sequence gap at page {i}");
        assert_eq!(page.is_bos(), i == 0, "BOS flag on page {i}");
        assert!(!page.is_eos() || i == pages.len() - 1, "EOS before last page");
        if page.packets_completed() == 0 {
            assert_eq!(page.granule, -1);
        }
    }
    pages
}
