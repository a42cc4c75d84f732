//! Delimiter framing for the incoming sensor byte stream.
//!
//! The sensor board writes ASCII records terminated by a single delimiter
//! byte (`'!'` by default). Bytes arrive in arbitrary chunk sizes, so the
//! decoder accumulates across chunks and surfaces completed frames one at
//! a time.

use std::collections::VecDeque;
use thiserror::Error;

/// Errors that can occur while framing the byte stream.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("frame exceeded {capacity} bytes before a delimiter, {discarded} bytes discarded")]
    Overflow { capacity: usize, discarded: usize },
}

/// One delimiter-bounded chunk of raw bytes from the sensor stream.
///
/// Ephemeral: decoded to text and dropped as soon as it is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
}

impl RawFrame {
    /// View the frame as text. The sensor speaks ASCII; anything that does
    /// not decode is a malformed frame.
    pub fn as_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }
}

/// Incremental decoder that turns an unbounded byte stream into frames.
///
/// Newly arrived bytes are queued with [`extend`](FrameDecoder::extend) and
/// scanned by [`next_frame`](FrameDecoder::next_frame), which surfaces at
/// most one completed frame per call. Unscanned bytes stay queued, so
/// frames arriving back-to-back in a single chunk are processed across
/// successive poll cycles rather than all at once.
#[derive(Debug)]
pub struct FrameDecoder {
    pending: VecDeque<u8>,
    accum: Vec<u8>,
    capacity: usize,
    delimiter: u8,
    // set after an overflow: discard input until the next delimiter
    resyncing: bool,
}

impl FrameDecoder {
    /// Create a decoder with the given frame capacity and delimiter byte.
    pub fn new(capacity: usize, delimiter: u8) -> Self {
        Self {
            pending: VecDeque::new(),
            accum: Vec::with_capacity(capacity),
            capacity,
            delimiter,
            resyncing: false,
        }
    }

    /// Queue newly arrived bytes. Accepts any chunk size, including empty.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend(chunk.iter().copied());
    }

    /// Number of queued bytes not yet scanned.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Scan queued bytes and surface at most one completed frame.
    ///
    /// Returns `Ok(None)` when the queue is exhausted without completing a
    /// frame; the partial accumulation is kept for the next call. When the
    /// accumulation would exceed the configured capacity the partial frame
    /// is dropped, an [`FrameError::Overflow`] is reported once, and input
    /// is discarded until the next delimiter realigns framing.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>, FrameError> {
        while let Some(b) = self.pending.pop_front() {
            if self.resyncing {
                if b == self.delimiter {
                    self.resyncing = false;
                }
                continue;
            }

            if b == self.delimiter {
                let bytes = std::mem::take(&mut self.accum);
                return Ok(Some(RawFrame { bytes }));
            }

            if self.accum.len() >= self.capacity {
                let discarded = self.accum.len() + 1;
                self.accum.clear();
                self.resyncing = true;
                return Err(FrameError::Overflow {
                    capacity: self.capacity,
                    discarded,
                });
            }
            self.accum.push(b);
        }

        Ok(None)
    }

    /// Drop all queued input and any in-flight partial frame.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.accum.clear();
        self.resyncing = false;
    }
}
