//! Capture trait definitions
//!
//! Platform-agnostic interfaces between the recorder and its collaborators:
//! a frame source driven by its own thread and a synchronous preview sink.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel layout of delivered frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Planar 4:2:0: full Y plane, then quarter-size U and V planes
    I420,
}

/// Format a capture source is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFormat {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Pixel layout
    pub layout: PixelLayout,

    /// Frame rate numerator
    pub fps_numerator: u32,

    /// Frame rate denominator
    pub fps_denominator: u32,
}

impl CaptureFormat {
    /// Size in bytes of one frame
    pub fn frame_size(&self) -> usize {
        match self.layout {
            PixelLayout::I420 => {
                crate::processing::colorspace::i420_frame_size(self.width, self.height)
            }
        }
    }

    /// Nominal interval between frames
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(
            self.fps_denominator as f64 / self.fps_numerator.max(1) as f64,
        )
    }
}

/// Information about a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraInfo {
    /// Device index
    pub index: u32,

    /// Device name
    pub name: String,

    /// Backend-specific description
    pub description: String,
}

/// Capture errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture format rejected: {0}")]
    FormatRejected(String),

    #[error("Capture source is not bound to a format")]
    NotBound,

    #[error("Capture already running")]
    AlreadyCapturing,

    #[error("Capture not running")]
    NotCapturing,

    #[error("Capture backend error: {0}")]
    Backend(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Invoked on the source's driver thread with one or more whole frames.
///
/// The callback may block; the source must tolerate that.
pub type FrameCallback = Box<dyn FnMut(&[u8]) + Send>;

/// A source of raw video frames
pub trait CaptureSource: Send {
    /// Fix the delivery format. Must precede `start_capture`.
    fn bind(&mut self, format: &CaptureFormat) -> CaptureResult<()>;

    /// Begin delivering frames to `callback` from the source's own thread
    fn start_capture(&mut self, callback: FrameCallback) -> CaptureResult<()>;

    /// Stop delivery. When this returns the callback is no longer running and
    /// will not be invoked again.
    fn stop_capture(&mut self) -> CaptureResult<()>;
}

/// Preview errors
#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("Preview surface unavailable")]
    Unavailable,

    #[error("Preview rejected frame: {0}")]
    Rejected(String),
}

/// Accepts decoded frames for on-screen preview
pub trait PreviewSink: Send {
    /// Present one packed RGBA frame. Called synchronously from the capture thread.
    fn put_frame(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<(), PreviewError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_and_interval() {
        let format = CaptureFormat {
            width: 640,
            height: 480,
            layout: PixelLayout::I420,
            fps_numerator: 30,
            fps_denominator: 1,
        };
        assert_eq!(format.frame_size(), 460_800);
        let interval = format.frame_interval();
        assert!(interval > std::time::Duration::from_millis(33));
        assert!(interval < std::time::Duration::from_millis(34));
    }

    #[test]
    fn test_format_serializes_camel_case() {
        let format = CaptureFormat {
            width: 2,
            height: 2,
            layout: PixelLayout::I420,
            fps_numerator: 1,
            fps_denominator: 1,
        };
        let json = serde_json::to_string(&format).unwrap();
        assert!(json.contains("\"fpsNumerator\":1"));
        assert!(json.contains("\"layout\":\"i420\""));
    }
}
