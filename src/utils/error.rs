//! Error types and handling
//!
//! Crate-wide error type for the recorder. Component errors (channel, codec,
//! muxer, capture, conversion) convert into [`RecorderError`] so setup steps can
//! use `?` throughout.

use crate::capture::traits::CaptureError;
use crate::codec::CodecError;
use crate::mux::MuxError;
use crate::processing::colorspace::ConvertError;
use crate::recorder::channel::ChannelError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Recorder-wide error type
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Capture format rejected: {0}")]
    FormatRejected(String),

    #[error("Encoder initialization failed: {0}")]
    EncoderInitFailed(String),

    #[error("Muxer initialization failed: {0}")]
    MuxInitFailed(String),

    #[error("Frame channel protocol violation: expected {expected} bytes, received {received}")]
    ChannelProtocolViolation { expected: usize, received: usize },

    #[error("Encode failed: {0}")]
    EncodeFailed(String),

    #[error("Mux failed: {0}")]
    MuxFailed(String),

    #[error("IO error: {0}")]
    IoFailed(#[from] std::io::Error),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Capture error: {0}")]
    CaptureFailed(String),

    #[error("Failed to spawn encode thread: {0}")]
    ThreadSpawnFailed(String),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),
}

impl RecorderError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            RecorderError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            RecorderError::FormatRejected(_) => "FORMAT_REJECTED",
            RecorderError::EncoderInitFailed(_) => "ENCODER_INIT_FAILED",
            RecorderError::MuxInitFailed(_) => "MUX_INIT_FAILED",
            RecorderError::ChannelProtocolViolation { .. } => "CHANNEL_PROTOCOL_VIOLATION",
            RecorderError::EncodeFailed(_) => "ENCODE_FAILED",
            RecorderError::MuxFailed(_) => "MUX_FAILED",
            RecorderError::IoFailed(_) => "IO_FAILED",
            RecorderError::AlreadyRecording => "ALREADY_RECORDING",
            RecorderError::NotRecording => "NOT_RECORDING",
            RecorderError::OutOfMemory(_) => "OUT_OF_MEMORY",
            RecorderError::CaptureFailed(_) => "CAPTURE_FAILED",
            RecorderError::ThreadSpawnFailed(_) => "THREAD_SPAWN_FAILED",
            RecorderError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }
}

impl From<CaptureError> for RecorderError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::DeviceUnavailable(msg) => RecorderError::DeviceUnavailable(msg),
            CaptureError::FormatRejected(msg) => RecorderError::FormatRejected(msg),
            other => RecorderError::CaptureFailed(other.to_string()),
        }
    }
}

impl From<CodecError> for RecorderError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::InvalidConfig(msg) => RecorderError::EncoderInitFailed(msg),
            other => RecorderError::EncodeFailed(other.to_string()),
        }
    }
}

impl From<MuxError> for RecorderError {
    fn from(error: MuxError) -> Self {
        match error {
            MuxError::SerialInUse(serial) => {
                RecorderError::MuxInitFailed(format!("stream serial {serial:#010x} already open"))
            }
            other => RecorderError::MuxFailed(other.to_string()),
        }
    }
}

impl From<ChannelError> for RecorderError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::ShortRead { expected, received } => {
                RecorderError::ChannelProtocolViolation { expected, received }
            }
            ChannelError::Closed => {
                RecorderError::CaptureFailed("frame channel closed".to_string())
            }
        }
    }
}

impl From<ConvertError> for RecorderError {
    fn from(error: ConvertError) -> Self {
        RecorderError::InvalidConfig(error.to_string())
    }
}

/// Error response for an embedding layer
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<RecorderError> for ErrorResponse {
    fn from(error: RecorderError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;
