//! Video codec
//!
//! A block-based 4:2:0 video encoder with Theora-style framing: three header
//! packets (identification, comment, setup) followed by one data packet per
//! frame, with Theora granule positions so the stream pages correctly in Ogg.

mod bitwriter;
mod dct;
pub mod encoder;
pub mod tables;

pub use encoder::{ColorSpace, EncoderConfig, VideoEncoder};

use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid encoder configuration: {0}")]
    InvalidConfig(String),

    #[error("Frame size mismatch: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("Header packets must be flushed before encoding frames")]
    HeadersPending,
}

/// One compressed packet, header or data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet payload
    pub data: Vec<u8>,

    /// Granule position (0 for header packets)
    pub granule_pos: i64,

    /// Sequence number of this packet within the stream
    pub packet_no: i64,

    /// First packet of the logical stream
    pub bos: bool,

    /// Last packet of the logical stream
    pub eos: bool,

    /// Data packet that can be decoded without a reference frame
    pub keyframe: bool,
}

impl Packet {
    /// Whether this is one of the header packets
    pub fn is_header(&self) -> bool {
        self.data.first().map(|b| b & 0x80 != 0).unwrap_or(false)
    }
}
