//! Stream assembler
//!
//! Accumulates bytes from a transport and emits complete frames. Bytes may
//! arrive in arbitrary fragments; the sequence of emitted frames only depends
//! on the concatenated input, never on how it was split.
//!
//! Garbage at the head of the buffer (a byte that is not a marker, or a
//! marker followed by an unknown opcode) is skipped up to the next plausible
//! frame start.

use super::codec::{parse_header, Frame, Header, MARKER_LONG, MARKER_SHORT};
use super::descriptor::MessageKind;
use crate::constants::{DEFAULT_MAX_BUFFER, MAX_PAYLOAD_SIZE};
use crate::error::{BridgeError, Result};
use crate::logging::Hex;
use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

/// Incremental frame parser for one connection
pub struct StreamAssembler {
    buffer: BytesMut,
    /// Largest payload a header may declare
    max_payload: usize,
    /// Largest tail retained between feeds
    max_buffer: usize,
    resyncs: u64,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::with_limits(MAX_PAYLOAD_SIZE, DEFAULT_MAX_BUFFER)
    }

    pub fn with_limits(max_payload: usize, max_buffer: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            max_payload,
            max_buffer,
            resyncs: 0,
        }
    }

    /// Feed new data and emit every complete frame through `on_frame`
    ///
    /// Frames found before an overflow are still delivered; the buffer is
    /// then cleared and `BufferOverflow` returned. Clearing also drops any
    /// complete frames queued behind the oversized header, so output after
    /// an overflow depends on how the input was chunked. Callers treat the
    /// overflow as the end of the connection.
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame)) -> Result<()> {
        self.buffer.extend_from_slice(data);

        loop {
            match parse_header(&self.buffer) {
                Header::Incomplete => break,
                Header::Malformed => self.resync(),
                Header::Valid {
                    kind,
                    task_id,
                    header_len,
                    payload_len,
                } => {
                    if payload_len > self.max_payload {
                        self.buffer.clear();
                        return Err(BridgeError::BufferOverflow {
                            size: payload_len,
                            max: self.max_payload,
                        });
                    }
                    let total = header_len + payload_len;
                    if self.buffer.len() < total {
                        break;
                    }
                    self.buffer.advance(header_len);
                    let payload = self.buffer.split_to(payload_len).freeze();
                    trace!("frame {} task={} len={}", kind, task_id, payload_len);
                    on_frame(Frame {
                        kind,
                        task_id,
                        payload,
                    });
                }
            }
        }

        if self.buffer.len() > self.max_buffer {
            let size = self.buffer.len();
            self.buffer.clear();
            return Err(BridgeError::BufferOverflow {
                size,
                max: self.max_buffer,
            });
        }
        Ok(())
    }

    /// Drop leading bytes up to the next plausible frame start
    fn resync(&mut self) {
        self.resyncs += 1;
        let skip = next_frame_start(&self.buffer).unwrap_or(self.buffer.len());
        debug!("resync: skipping {} bytes [{}]", skip, Hex(&self.buffer[..skip]));
        self.buffer.advance(skip);
    }

    /// Discard any partial frame
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes retained waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Number of times garbage had to be skipped
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }
}

/// Index of the first marker after position 0 that is followed by a known
/// opcode or by the end of the buffer
fn next_frame_start(buf: &[u8]) -> Option<usize> {
    (1..buf.len()).find(|&i| {
        let marker = buf[i];
        if marker != MARKER_SHORT && marker != MARKER_LONG {
            return false;
        }
        match buf.get(i + 1) {
            None => true,
            Some(&opcode) => MessageKind::from_opcode(opcode).is_some(),
        }
    })
}
