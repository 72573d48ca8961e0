//! Frame codec
//!
//! Wire format (marker-prefixed generation):
//!
//! ```text
//! short: ┌──────┬────────┬────────┐
//!        │ 0xFA │ opcode │ taskId │
//!        └──────┴────────┴────────┘
//! long:  ┌──────┬────────┬────────┬───────┬───────┬─────────────────┐
//!        │ 0xFB │ opcode │ taskId │ lenLo │ lenHi │ payload (len)   │
//!        └──────┴────────┴────────┴───────┴───────┴─────────────────┘
//! ```
//!
//! A non-empty payload always produces a long frame and an empty one a short
//! frame, which is also how the VM sends. Decoding accepts either marker for
//! any opcode.

use super::descriptor::MessageKind;
use super::value::{decode_text, decode_value, ChunkType, Value};
use crate::constants::MAX_PAYLOAD_SIZE;
use crate::error::{BridgeError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Lead byte of a frame without payload
pub const MARKER_SHORT: u8 = 0xFA;
/// Lead byte of a frame with a length field and payload
pub const MARKER_LONG: u8 = 0xFB;

pub const SHORT_HEADER_SIZE: usize = 3;
pub const LONG_HEADER_SIZE: usize = 5;

/// Chunk type used by plain `storeChunk` requests
pub const DEFAULT_CHUNK_TYPE: ChunkType = ChunkType::Command;

/// One decoded message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub task_id: u8,
    /// Raw payload as carried on the wire (for `storeChunk` this still
    /// starts with the chunk type tag)
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: MessageKind, task_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            task_id,
            payload: payload.into(),
        }
    }

    /// Size of this frame on the wire
    pub fn wire_size(&self) -> usize {
        if self.payload.is_empty() {
            SHORT_HEADER_SIZE
        } else {
            LONG_HEADER_SIZE + self.payload.len()
        }
    }

    /// Payload decoded as a tagged value
    pub fn value(&self) -> Value {
        decode_value(&self.payload)
    }

    /// Payload as text: the string of a string value, otherwise the value
    /// rendered for display
    pub fn text(&self) -> String {
        match self.value() {
            Value::String(s) => s,
            Value::Unknown { .. } => decode_text(&self.payload),
            other => other.to_string(),
        }
    }

    /// Chunk type tag and code body of a `storeChunk` frame
    pub fn chunk(&self) -> Option<(u8, &[u8])> {
        if self.kind != MessageKind::StoreChunk {
            return None;
        }
        self.payload.split_first().map(|(tag, body)| (*tag, body))
    }
}

/// Encode a request by selector name
///
/// # Errors
///
/// - `UnknownSelector` if the selector is not in the descriptor table
/// - `PayloadTooLarge` if the payload does not fit the length field
pub fn encode(selector: &str, task_id: u8, payload: &[u8]) -> Result<Bytes> {
    let kind = MessageKind::from_selector(selector).ok_or_else(|| BridgeError::UnknownSelector {
        selector: selector.to_string(),
    })?;
    encode_kind(kind, task_id, payload)
}

/// Encode a request by kind
///
/// `storeChunk` payloads get the default chunk type tag prepended.
pub fn encode_kind(kind: MessageKind, task_id: u8, payload: &[u8]) -> Result<Bytes> {
    if kind == MessageKind::StoreChunk {
        return encode_chunk(task_id, DEFAULT_CHUNK_TYPE, payload);
    }
    encode_raw(kind, task_id, payload)
}

/// Encode a `storeChunk` frame with an explicit chunk type
pub fn encode_chunk(task_id: u8, chunk_type: ChunkType, code: &[u8]) -> Result<Bytes> {
    let mut payload = Vec::with_capacity(code.len() + 1);
    payload.push(chunk_type as u8);
    payload.extend_from_slice(code);
    encode_raw(MessageKind::StoreChunk, task_id, &payload)
}

/// Encode a frame exactly as given, with no payload rewriting
pub fn encode_raw(kind: MessageKind, task_id: u8, payload: &[u8]) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(LONG_HEADER_SIZE + payload.len());
    encode_into(kind.opcode(), task_id, payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Append one frame to `dst`
pub fn encode_into(opcode: u8, task_id: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(BridgeError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    if payload.is_empty() {
        dst.reserve(SHORT_HEADER_SIZE);
        dst.put_u8(MARKER_SHORT);
        dst.put_u8(opcode);
        dst.put_u8(task_id);
    } else {
        dst.reserve(LONG_HEADER_SIZE + payload.len());
        dst.put_u8(MARKER_LONG);
        dst.put_u8(opcode);
        dst.put_u8(task_id);
        dst.put_u16_le(payload.len() as u16);
        dst.put_slice(payload);
    }
    Ok(())
}

/// Result of inspecting the front of a receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Not enough bytes to tell yet
    Incomplete,
    /// Leading bytes are not a frame start
    Malformed,
    /// A recognised header; the frame needs `header_len + payload_len` bytes
    Valid {
        kind: MessageKind,
        task_id: u8,
        header_len: usize,
        payload_len: usize,
    },
}

/// Inspect the header at the start of `buf` without consuming anything
pub fn parse_header(buf: &[u8]) -> Header {
    let Some(&marker) = buf.first() else {
        return Header::Incomplete;
    };
    if marker != MARKER_SHORT && marker != MARKER_LONG {
        return Header::Malformed;
    }
    let Some(&opcode) = buf.get(1) else {
        return Header::Incomplete;
    };
    let Some(kind) = MessageKind::from_opcode(opcode) else {
        return Header::Malformed;
    };
    if marker == MARKER_SHORT {
        return match buf.get(2) {
            Some(&task_id) => Header::Valid {
                kind,
                task_id,
                header_len: SHORT_HEADER_SIZE,
                payload_len: 0,
            },
            None => Header::Incomplete,
        };
    }
    if buf.len() < LONG_HEADER_SIZE {
        return Header::Incomplete;
    }
    Header::Valid {
        kind,
        task_id: buf[2],
        header_len: LONG_HEADER_SIZE,
        payload_len: usize::from(u16::from_le_bytes([buf[3], buf[4]])),
    }
}

/// True if `buf` starts with a JSON control frame (long marker, opcode 0xFF)
pub fn is_control_frame(buf: &[u8]) -> bool {
    buf.len() >= LONG_HEADER_SIZE
        && buf[0] == MARKER_LONG
        && buf[1] == MessageKind::JsonMessage.opcode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_short_frame() {
        let bytes = encode("startChunk", 7, &[]).unwrap();
        assert_eq!(bytes.as_ref(), &[0xFA, 0x03, 7]);
    }

    #[test]
    fn test_encode_long_frame() {
        let bytes = encode("broadcast", 0, b"go").unwrap();
        assert_eq!(bytes.as_ref(), &[0xFB, 0x1B, 0, 2, 0, b'g', b'o']);
    }

    #[test]
    fn test_encode_length_is_little_endian() {
        let payload = vec![0x55; 0x0102];
        let bytes = encode("broadcast", 1, &payload).unwrap();
        assert_eq!(&bytes[..5], &[0xFB, 0x1B, 1, 0x02, 0x01]);
        assert_eq!(bytes.len(), 5 + 0x0102);
    }

    #[test]
    fn test_encode_store_chunk_prefixes_tag() {
        let bytes = encode("storeChunk", 4, &[0x10, 0x20]).unwrap();
        // tag is counted in the length field
        assert_eq!(bytes.as_ref(), &[0xFB, 0x01, 4, 3, 0, 1, 0x10, 0x20]);
    }

    #[test]
    fn test_encode_store_chunk_empty_code_is_still_long() {
        let bytes = encode("storeChunk", 4, &[]).unwrap();
        assert_eq!(bytes.as_ref(), &[0xFB, 0x01, 4, 1, 0, 1]);
    }

    #[test]
    fn test_encode_chunk_with_type() {
        let bytes = encode_chunk(9, ChunkType::StartHat, &[0xAA]).unwrap();
        assert_eq!(bytes.as_ref(), &[0xFB, 0x01, 9, 2, 0, 4, 0xAA]);
    }

    #[test]
    fn test_encode_unknown_selector() {
        let err = encode("explode", 0, &[]).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownSelector { ref selector } if selector == "explode"));
    }

    #[test]
    fn test_encode_payload_too_large() {
        let payload = vec![0; MAX_PAYLOAD_SIZE + 1];
        let err = encode("broadcast", 0, &payload).unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLarge { .. }));

        // the chunk tag pushes a maximal body over the limit
        let body = vec![0; MAX_PAYLOAD_SIZE];
        assert!(encode("storeChunk", 0, &body).is_err());
    }

    #[test]
    fn test_parse_header_states() {
        assert_eq!(parse_header(&[]), Header::Incomplete);
        assert_eq!(parse_header(&[0xFA]), Header::Incomplete);
        assert_eq!(parse_header(&[0xFA, 0x11]), Header::Incomplete);
        assert_eq!(parse_header(&[0xFB, 0x12, 1, 5]), Header::Incomplete);
        assert_eq!(parse_header(&[0x41]), Header::Malformed);
        assert_eq!(parse_header(&[0xFA, 0x00]), Header::Malformed);
        assert_eq!(
            parse_header(&[0xFA, 0x11, 3]),
            Header::Valid {
                kind: MessageKind::TaskDone,
                task_id: 3,
                header_len: 3,
                payload_len: 0,
            }
        );
        assert_eq!(
            parse_header(&[0xFB, 0x12, 2, 5, 0]),
            Header::Valid {
                kind: MessageKind::TaskReturned,
                task_id: 2,
                header_len: 5,
                payload_len: 5,
            }
        );
    }

    #[test]
    fn test_is_control_frame() {
        assert!(is_control_frame(&[0xFB, 0xFF, 0, 2, 0, b'{', b'}']));
        assert!(!is_control_frame(&[0xFB, 0x14, 0, 2, 0, 2, b'x']));
        assert!(!is_control_frame(&[0xFA, 0xFF, 0]));
    }

    #[test]
    fn test_frame_helpers() {
        let frame = Frame::new(MessageKind::OutputString, 255, vec![2, b'h', b'i']);
        assert_eq!(frame.text(), "hi");
        assert_eq!(frame.wire_size(), 8);

        let chunk = Frame::new(MessageKind::StoreChunk, 1, vec![1, 0xAB]);
        assert_eq!(chunk.chunk(), Some((1, &[0xAB][..])));
        assert_eq!(frame.chunk(), None);

        let short = Frame::new(MessageKind::TaskDone, 3, Bytes::new());
        assert_eq!(short.wire_size(), 3);
    }
}
