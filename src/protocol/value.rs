//! Typed payload values
//!
//! Value payloads start with a one-byte type tag:
//!
//! | tag | type      | body                                          |
//! |-----|-----------|-----------------------------------------------|
//! | 1   | integer   | 4 bytes, little endian, signed                |
//! | 2   | string    | remaining bytes                               |
//! | 3   | boolean   | 1 byte, non-zero is true                      |
//! | 4   | list      | total (u16 LE), count (u8), `count` items     |
//! | 5   | bytearray | total (u16 LE), count (u8), `count` bytes     |
//!
//! Decoding never fails: truncated payloads and unknown tags come back as
//! `Value::Unknown` so newer firmware cannot wedge the IDE.

use std::fmt;

pub const TAG_INTEGER: u8 = 1;
pub const TAG_STRING: u8 = 2;
pub const TAG_BOOLEAN: u8 = 3;
pub const TAG_LIST: u8 = 4;
pub const TAG_BYTE_ARRAY: u8 = 5;

/// A value reported by the board
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i32),
    String(String),
    Boolean(bool),
    /// `total` is the real list size; `items` holds at most the first 32
    /// (sublists and bytearrays inside a list arrive with no elements)
    List { total: u16, items: Vec<Value> },
    /// `bytes` holds at most the first 100 bytes of `total`
    ByteArray { total: u16, bytes: Vec<u8> },
    /// Unsupported or truncated payload
    Unknown { tag: u8 },
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::List { total, items } => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if usize::from(*total) > items.len() {
                    write!(f, ", … ({} items)", total)?;
                }
                f.write_str("]")
            }
            Value::ByteArray { total, bytes } => {
                write!(f, "<bytearray {}:", total)?;
                for b in bytes {
                    write!(f, " {:02x}", b)?;
                }
                f.write_str(">")
            }
            Value::Unknown { tag } => write!(f, "<unknown type {}>", tag),
        }
    }
}

/// Decode a tagged value payload
pub fn decode_value(payload: &[u8]) -> Value {
    let Some((&tag, body)) = payload.split_first() else {
        return Value::Unknown { tag: 0 };
    };
    let mut reader = Reader::new(body);
    let value = match tag {
        TAG_INTEGER => reader.i32().map(Value::Integer),
        TAG_STRING => Some(Value::String(decode_text(body))),
        TAG_BOOLEAN => reader.u8().map(|b| Value::Boolean(b != 0)),
        TAG_LIST => decode_list(&mut reader),
        TAG_BYTE_ARRAY => decode_byte_array(&mut reader),
        _ => None,
    };
    value.unwrap_or(Value::Unknown { tag })
}

/// Encode a value for `setVar`
///
/// The VM only accepts integers, strings and booleans here.
pub fn encode_value(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Integer(n) => {
            let mut out = vec![TAG_INTEGER];
            out.extend_from_slice(&n.to_le_bytes());
            Some(out)
        }
        Value::String(s) => {
            let mut out = vec![TAG_STRING];
            out.extend_from_slice(s.as_bytes());
            Some(out)
        }
        Value::Boolean(b) => Some(vec![TAG_BOOLEAN, u8::from(*b)]),
        _ => None,
    }
}

/// UTF-8 text, falling back to Latin-1 for anything else
pub fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

fn decode_list(reader: &mut Reader<'_>) -> Option<Value> {
    let total = reader.u16()?;
    let count = reader.u8()?;
    let mut items = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let tag = reader.u8()?;
        let item = match tag {
            TAG_INTEGER => Value::Integer(reader.i32()?),
            TAG_STRING => {
                let len = reader.u8()?;
                Value::String(decode_text(reader.take(usize::from(len))?))
            }
            TAG_BOOLEAN => Value::Boolean(reader.u8()? != 0),
            TAG_LIST => {
                let total = reader.u16()?;
                reader.u8()?;
                Value::List {
                    total,
                    items: Vec::new(),
                }
            }
            TAG_BYTE_ARRAY => {
                let total = reader.u16()?;
                reader.u8()?;
                Value::ByteArray {
                    total,
                    bytes: Vec::new(),
                }
            }
            other => Value::Unknown { tag: other },
        };
        items.push(item);
    }
    Some(Value::List { total, items })
}

fn decode_byte_array(reader: &mut Reader<'_>) -> Option<Value> {
    let total = reader.u16()?;
    let count = reader.u8()?;
    let bytes = reader.take(usize::from(count))?.to_vec();
    Some(Value::ByteArray { total, bytes })
}

/// Bounds-checked little-endian cursor
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.buf.len() < n {
            return None;
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

// =============================================================================
// Task errors
// =============================================================================

/// Error report from a failed task: error code + code location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskError {
    pub code: u8,
    pub location: u32,
}

impl TaskError {
    /// Parse a `taskError` payload (`[code, loc0, loc1, loc2, loc3]`)
    ///
    /// Short payloads are tolerated: a missing code reads as "unspecified"
    /// and a missing location as zero.
    pub fn parse(payload: &[u8]) -> Self {
        let code = payload.first().copied().unwrap_or(1);
        let location = match payload.get(1..5) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        };
        Self { code, location }
    }

    pub fn description(&self) -> &'static str {
        error_description(self.code)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (code {}, at {})",
            self.description(),
            self.code,
            self.location
        )
    }
}

/// Human-readable text for a VM error code
pub fn error_description(code: u8) -> &'static str {
    match code {
        0 => "No error",
        1 => "Unspecified error",
        2 => "Unknown chunk index",
        10 => "Insufficient memory to allocate object",
        11 => "Needs a list",
        12 => "Needs a boolean",
        13 => "Needs an integer",
        14 => "Needs a string",
        15 => "Those objects cannot be compared for equality",
        16 => "List size must be a non-negative integer",
        17 => "List index must be an integer",
        18 => "List index out of range",
        19 => "A ByteArray can only store integer values between 0 and 255",
        20 => "Hexadecimal input must between between -1FFFFFFF and 1FFFFFFF",
        21 => "I2C device ID must be between 0 and 127",
        22 => "I2C register must be between 0 and 255",
        23 => "I2C value must be between 0 and 255",
        24 => "Attempt to access an argument outside of a function",
        25 => "for-loop argument must be a positive integer or list",
        26 => "Insufficient stack space",
        27 => "Primitive not implemented in this virtual machine",
        28 => "Not enough arguments passed to primitive",
        29 => "The maximum wait time is 3600000 milliseconds (one hour)",
        30 => "This board does not support WiFi",
        31 => "Division (or modulo) by zero is not defined",
        _ => "Unknown error",
    }
}

// =============================================================================
// Chunk types
// =============================================================================

/// Chunk type tag that prefixes every `storeChunk` payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Command = 1,
    Reporter = 2,
    FunctionHat = 3,
    StartHat = 4,
    WhenConditionHat = 5,
    BroadcastHat = 6,
    ButtonAHat = 7,
    ButtonBHat = 8,
}

impl ChunkType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ChunkType::Command,
            2 => ChunkType::Reporter,
            3 => ChunkType::FunctionHat,
            4 => ChunkType::StartHat,
            5 => ChunkType::WhenConditionHat,
            6 => ChunkType::BroadcastHat,
            7 => ChunkType::ButtonAHat,
            8 => ChunkType::ButtonBHat,
            _ => return None,
        })
    }
}
