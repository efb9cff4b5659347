//! Ogg multiplexer
//!
//! Wraps codec packets into Ogg pages for a single logical stream.

pub mod crc;
mod stream;

pub use stream::{StreamMuxer, MAX_PAGE_BODY_FILL};

use std::io::Write;
use thiserror::Error;

/// Page capture pattern
pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";

/// Header bytes before the segment table
pub const PAGE_HEADER_SIZE: usize = 27;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// Muxer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    #[error("Stream serial {0:#010x} is already in use")]
    SerialInUse(u32),

    #[error("Packet submitted after end of stream")]
    StreamEnded,
}

/// One Ogg page ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Page header including the segment table
    pub header: Vec<u8>,
    /// Page body
    pub body: Vec<u8>,
}

impl Page {
    /// Total page size in bytes
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write header then body
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.header)?;
        writer.write_all(&self.body)
    }

    pub fn flags(&self) -> u8 {
        self.header[5]
    }

    pub fn is_continued(&self) -> bool {
        self.flags() & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.flags() & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.flags() & FLAG_EOS != 0
    }

    /// Granule position of the last packet completed on this page, -1 if none
    pub fn granule_position(&self) -> i64 {
        i64::from_le_bytes(self.header_field::<8>(6))
    }

    pub fn serial(&self) -> u32 {
        u32::from_le_bytes(self.header_field::<4>(14))
    }

    pub fn sequence(&self) -> u32 {
        u32::from_le_bytes(self.header_field::<4>(18))
    }

    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.header_field::<4>(22))
    }

    /// Lacing values of this page
    pub fn segments(&self) -> &[u8] {
        &self.header[PAGE_HEADER_SIZE..]
    }

    fn header_field<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut field = [0u8; N];
        field.copy_from_slice(&self.header[offset..offset + N]);
        field
    }
}
