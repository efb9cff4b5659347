//! Logical stream state: lacing, page assembly and the open-serial registry.

use super::{crc, MuxError, Page, CAPTURE_PATTERN, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS};
use crate::codec::Packet;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};

/// Body size above which `drain_pages` closes a page
pub const MAX_PAGE_BODY_FILL: usize = 4096;

const MAX_SEGMENTS: usize = 255;

/// Serials of every muxer currently open in this process
static OPEN_SERIALS: Mutex<BTreeSet<u32>> = parking_lot::const_mutex(BTreeSet::new());

#[derive(Debug, Clone, Copy)]
struct Segment {
    len: u8,
    /// Set on the last segment of a packet
    ends_packet: bool,
    granule_pos: i64,
}

/// Ogg page builder for one logical stream
pub struct StreamMuxer {
    serial: u32,
    sequence: u32,
    body: VecDeque<u8>,
    segments: VecDeque<Segment>,
    /// First segment in the buffer continues a packet begun on an earlier page
    continued: bool,
    bos_written: bool,
    eos_submitted: bool,
    eos_written: bool,
    packets_submitted: u64,
    pages_emitted: u64,
}

impl StreamMuxer {
    /// Open a stream with `serial`, reserving it until the muxer is closed
    pub fn open(serial: u32) -> Result<Self, MuxError> {
        if !OPEN_SERIALS.lock().insert(serial) {
            return Err(MuxError::SerialInUse(serial));
        }

        tracing::debug!("Opened Ogg stream with serial {:#010x}", serial);

        Ok(Self {
            serial,
            sequence: 0,
            body: VecDeque::new(),
            segments: VecDeque::new(),
            continued: false,
            bos_written: false,
            eos_submitted: false,
            eos_written: false,
            packets_submitted: 0,
            pages_emitted: 0,
        })
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn packets_submitted(&self) -> u64 {
        self.packets_submitted
    }

    pub fn pages_emitted(&self) -> u64 {
        self.pages_emitted
    }

    /// Whether the EOS page has been produced
    pub fn is_finished(&self) -> bool {
        self.eos_written
    }

    /// Buffer a packet. No pages are produced until `drain_pages` or `force_flush`.
    pub fn submit_packet(&mut self, packet: &Packet) -> Result<(), MuxError> {
        if self.eos_submitted {
            return Err(MuxError::StreamEnded);
        }

        let full = packet.data.len() / 255;
        let tail = packet.data.len() % 255;
        for _ in 0..full {
            self.segments.push_back(Segment {
                len: 255,
                ends_packet: false,
                granule_pos: -1,
            });
        }
        // A packet that is a multiple of 255 bytes ends with a zero-length segment
        self.segments.push_back(Segment {
            len: tail as u8,
            ends_packet: true,
            granule_pos: packet.granule_pos,
        });
        self.body.extend(&packet.data);

        self.packets_submitted += 1;
        if packet.eos {
            self.eos_submitted = true;
        }
        Ok(())
    }

    /// Pages that are complete under the normal paging rules
    pub fn drain_pages(&mut self) -> Vec<Page> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page(false, MAX_PAGE_BODY_FILL) {
            pages.push(page);
        }
        pages
    }

    /// Everything buffered, regardless of fill
    pub fn force_flush(&mut self) -> Vec<Page> {
        let mut pages = Vec::new();
        while let Some(page) = self.next_page(true, usize::MAX) {
            pages.push(page);
        }
        pages
    }

    /// Release the serial
    pub fn close(self) {
        tracing::debug!(
            "Closing Ogg stream {:#010x} after {} packets in {} pages",
            self.serial,
            self.packets_submitted,
            self.pages_emitted
        );
    }

    fn next_page(&mut self, mut force: bool, fill_limit: usize) -> Option<Page> {
        if self.segments.is_empty() {
            return None;
        }

        let max_segments = self.segments.len().min(MAX_SEGMENTS);
        let mut count = 0;
        let mut granule_pos = -1i64;

        if !self.bos_written {
            // The first page carries the first packet alone
            force = true;
            for segment in self.segments.iter().take(max_segments) {
                count += 1;
                if segment.ends_packet {
                    granule_pos = segment.granule_pos;
                    break;
                }
            }
        } else {
            if self.eos_submitted {
                force = true;
            }
            let mut body_len = 0usize;
            for segment in self.segments.iter().take(max_segments) {
                if body_len > fill_limit {
                    force = true;
                    break;
                }
                body_len += segment.len as usize;
                count += 1;
                if segment.ends_packet {
                    granule_pos = segment.granule_pos;
                }
            }
            if count == MAX_SEGMENTS {
                force = true;
            }
        }

        if !force {
            return None;
        }

        let mut flags = 0u8;
        if self.continued {
            flags |= FLAG_CONTINUED;
        }
        if !self.bos_written {
            flags |= FLAG_BOS;
        }
        if self.eos_submitted && count == self.segments.len() {
            flags |= FLAG_EOS;
        }

        let page_segments: Vec<Segment> = self.segments.drain(..count).collect();
        let body_len: usize = page_segments.iter().map(|s| s.len as usize).sum();
        let body: Vec<u8> = self.body.drain(..body_len).collect();

        let mut header = Vec::with_capacity(27 + count);
        header.extend_from_slice(CAPTURE_PATTERN);
        header.push(0);
        header.push(flags);
        header.extend_from_slice(&granule_pos.to_le_bytes());
        header.extend_from_slice(&self.serial.to_le_bytes());
        header.extend_from_slice(&self.sequence.to_le_bytes());
        header.extend_from_slice(&[0; 4]);
        header.push(count as u8);
        header.extend(page_segments.iter().map(|s| s.len));

        let checksum = crc::page_checksum(&header, &body);
        header[22..26].copy_from_slice(&checksum.to_le_bytes());

        tracing::debug!(
            "Ogg page seq {} flags {:#04x}: {} segments, {} body bytes, granule {}",
            self.sequence,
            flags,
            count,
            body.len(),
            granule_pos
        );

        self.continued = page_segments.last().is_some_and(|s| !s.ends_packet);
        self.bos_written = true;
        if flags & FLAG_EOS != 0 {
            self.eos_written = true;
        }
        self.sequence = self.sequence.wrapping_add(1);
        self.pages_emitted += 1;

        Some(Page { header, body })
    }
}

impl Drop for StreamMuxer {
    fn drop(&mut self) {
        OPEN_SERIALS.lock().remove(&self.serial);
    }
}
