//! Error type for the whole crate
//!
//! Framing problems are recovered inside the protocol core and never show
//! up here.

use std::fmt;
use std::path::PathBuf;

/// All bridge errors
#[derive(Debug)]
pub enum BridgeError {
    // === Protocol ===
    /// Selector is not in the descriptor table (or not valid for this direction)
    UnknownSelector { selector: String },
    /// Payload does not fit the 16-bit length field
    PayloadTooLarge { size: usize, max: usize },
    /// Incoming bytes exceeded the assembler bound
    BufferOverflow { size: usize, max: usize },
    /// Malformed JSON control envelope
    ControlProtocol { message: String },

    // === Transport ===
    /// Port identifier does not resolve to an openable device
    PortUnavailable {
        port: String,
        source: std::io::Error,
    },

    // === Network ===
    /// Listen port already taken or not permitted
    WebSocketBind { port: u16, source: std::io::Error },
    /// WebSocket handshake with an IDE failed
    WebSocketAccept {
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// Failed to connect to a bridge as a WebSocket client
    WebSocketConnect {
        url: String,
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    // === Config ===
    /// Reading a file failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Config file is not valid TOML for our schema
    ConfigParse { path: PathBuf, reason: String },
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },

    // === Runtime ===
    Runtime { source: std::io::Error },
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PortUnavailable { source, .. }
            | Self::WebSocketBind { source, .. }
            | Self::Io { source, .. }
            | Self::Runtime { source } => Some(source),
            Self::WebSocketAccept { source } | Self::WebSocketConnect { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownSelector { selector } => write!(f, "Unknown selector: {}", selector),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "Payload too large: {} bytes (max {})", size, max)
            }
            Self::BufferOverflow { size, max } => {
                write!(f, "Receive buffer overflow: {} bytes (max {})", size, max)
            }
            Self::ControlProtocol { message } => write!(f, "Control protocol error: {}", message),
            Self::PortUnavailable { port, source } => {
                write!(f, "Could not find device at {}: {}", port, source)
            }
            Self::WebSocketBind { port, .. } => write!(f, "Cannot bind WebSocket port {}", port),
            Self::WebSocketAccept { .. } => write!(f, "Failed to accept WebSocket connection"),
            Self::WebSocketConnect { url, .. } => write!(f, "Cannot connect to {}", url),
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::ConfigParse { path, reason } => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::Runtime { .. } => write!(f, "Failed to create runtime"),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_port_unavailable_display_and_source() {
        let err = BridgeError::PortUnavailable {
            port: "/dev/ttyACM0".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such device"),
        };
        assert!(err.to_string().contains("/dev/ttyACM0"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_unknown_selector_has_no_source() {
        let err = BridgeError::UnknownSelector {
            selector: "fly".into(),
        };
        assert_eq!(err.to_string(), "Unknown selector: fly");
        assert!(err.source().is_none());
    }
}
