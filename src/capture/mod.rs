//! Capture sources
//!
//! The recorder talks to cameras only through [`CaptureSource`]. A synthetic
//! test-pattern source is always available; the nokhwa webcam backend is
//! compiled in with the `camera` feature.

pub mod synthetic;
pub mod traits;

#[cfg(feature = "camera")]
pub mod webcam;

pub use synthetic::{CaptureProgress, SyntheticSource};
pub use traits::{
    CameraInfo, CaptureError, CaptureFormat, CaptureResult, CaptureSource, FrameCallback,
    PixelLayout, PreviewError, PreviewSink,
};

#[cfg(feature = "camera")]
pub use webcam::{list_cameras, WebcamSource};
