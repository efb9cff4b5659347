//! Frame channel
//!
//! Bounded, blocking byte pipe between the capture callback (producer) and the
//! encode thread (consumer). The write end can be closed to signal
//! end-of-stream; the read end can be closed to make further writes fail.
//!
//! Writes block while the buffer is full, which is what throttles the capture
//! driver when encoding falls behind. Reads always ask for a whole frame, so a
//! partial frame left behind by a closed writer shows up as a short read.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the frame channel
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Frame channel closed")]
    Closed,

    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },
}

struct ChannelInner {
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct ChannelState {
    buffer: VecDeque<u8>,
    capacity: usize,
    write_closed: bool,
    read_closed: bool,
    total_written: u64,
    total_read: u64,
}

/// Create a frame channel holding at most `capacity` bytes
pub fn frame_channel(capacity: usize) -> (FrameWriter, FrameReader) {
    let capacity = capacity.max(1);
    let inner = Arc::new(ChannelInner {
        state: Mutex::new(ChannelState {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            write_closed: false,
            read_closed: false,
            total_written: 0,
            total_read: 0,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
    });

    (
        FrameWriter {
            inner: inner.clone(),
        },
        FrameReader { inner },
    )
}

/// Write end of a frame channel.
///
/// Cloning yields another handle to the same write end; closing any handle
/// closes the write end for all of them.
#[derive(Clone)]
pub struct FrameWriter {
    inner: Arc<ChannelInner>,
}

impl FrameWriter {
    /// Write all of `data`, blocking while the channel is full.
    ///
    /// Returns the number of bytes written, which is always `data.len()`.
    pub fn write(&self, data: &[u8]) -> Result<usize, ChannelError> {
        let mut state = self.inner.state.lock();
        let mut written = 0;

        while written < data.len() {
            if state.read_closed || state.write_closed {
                return Err(ChannelError::Closed);
            }

            let space = state.capacity - state.buffer.len();
            if space == 0 {
                self.inner.not_full.wait(&mut state);
                continue;
            }

            let chunk = space.min(data.len() - written);
            state.buffer.extend(&data[written..written + chunk]);
            state.total_written += chunk as u64;
            written += chunk;
            self.inner.not_empty.notify_one();
        }

        if state.read_closed {
            return Err(ChannelError::Closed);
        }
        Ok(written)
    }

    /// Close the write end. Readers drain what is buffered, then see end-of-stream.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if !state.write_closed {
            state.write_closed = true;
            tracing::debug!(
                "Frame channel write end closed ({} bytes buffered)",
                state.buffer.len()
            );
        }
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    /// Whether the read end has gone away
    pub fn is_read_closed(&self) -> bool {
        self.inner.state.lock().read_closed
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.inner.state.lock().buffer.len()
    }

    /// Maximum number of buffered bytes
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    /// Total bytes accepted since creation
    pub fn total_written(&self) -> u64 {
        self.inner.state.lock().total_written
    }
}

/// Read end of a frame channel. Dropping it closes the read end.
pub struct FrameReader {
    inner: Arc<ChannelInner>,
}

impl FrameReader {
    /// Fill `buf` completely.
    ///
    /// Returns `buf.len()` on success and `0` once the write end is closed and
    /// every buffered byte has been consumed. If the write end closes after
    /// only part of `buf` could be filled, the partial bytes are consumed and
    /// [`ChannelError::ShortRead`] is returned.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let mut state = self.inner.state.lock();
        let mut filled = 0;

        while filled < buf.len() {
            if state.read_closed {
                return Err(ChannelError::Closed);
            }

            if state.buffer.is_empty() {
                if state.write_closed {
                    if filled == 0 {
                        return Ok(0);
                    }
                    return Err(ChannelError::ShortRead {
                        expected: buf.len(),
                        received: filled,
                    });
                }
                self.inner.not_empty.wait(&mut state);
                continue;
            }

            let chunk = state.buffer.len().min(buf.len() - filled);
            for (dst, src) in buf[filled..filled + chunk]
                .iter_mut()
                .zip(state.buffer.drain(..chunk))
            {
                *dst = src;
            }
            state.total_read += chunk as u64;
            filled += chunk;
            self.inner.not_full.notify_one();
        }

        Ok(filled)
    }

    /// Close the read end, discarding anything still buffered
    pub fn close(&mut self) {
        let mut state = self.inner.state.lock();
        if !state.read_closed {
            state.read_closed = true;
            let discarded = state.buffer.len();
            state.buffer.clear();
            if discarded > 0 {
                tracing::debug!("Frame channel read end closed, {} bytes discarded", discarded);
            }
        }
        self.inner.not_full.notify_all();
        self.inner.not_empty.notify_all();
    }

    /// Total bytes consumed since creation
    pub fn total_read(&self) -> u64 {
        self.inner.state.lock().total_read
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        self.close();
    }
}
