//! JSON control plane
//!
//! IDE and bridge exchange `{"selector": ..., "arguments": [...]}` envelopes
//! inside long frames under opcode 0xFF. These never reach the board.

use super::codec::encode_raw;
use super::descriptor::MessageKind;
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt;

/// Control selectors known to the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSelector {
    GetSerialPortList,
    SerialConnect,
    SerialDisconnect,
    GetSerialPortListResponse,
    SerialConnectResponse,
    SerialDisconnectResponse,
    BoardUnplugged,
    BoardReconnected,
}

impl ControlSelector {
    pub const ALL: [ControlSelector; 8] = [
        Self::GetSerialPortList,
        Self::SerialConnect,
        Self::SerialDisconnect,
        Self::GetSerialPortListResponse,
        Self::SerialConnectResponse,
        Self::SerialDisconnectResponse,
        Self::BoardUnplugged,
        Self::BoardReconnected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetSerialPortList => "getSerialPortList",
            Self::SerialConnect => "serialConnect",
            Self::SerialDisconnect => "serialDisconnect",
            Self::GetSerialPortListResponse => "getSerialPortListResponse",
            Self::SerialConnectResponse => "serialConnectResponse",
            Self::SerialDisconnectResponse => "serialDisconnectResponse",
            Self::BoardUnplugged => "boardUnplugged",
            Self::BoardReconnected => "boardReconnected",
        }
    }

    pub fn parse(selector: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == selector)
    }

    /// True for selectors the IDE sends to the bridge
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::GetSerialPortList | Self::SerialConnect | Self::SerialDisconnect
        )
    }
}

impl fmt::Display for ControlSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub selector: String,
    #[serde(default)]
    pub arguments: Vec<JsonValue>,
}

impl ControlMessage {
    pub fn new(selector: ControlSelector, arguments: Vec<JsonValue>) -> Self {
        Self {
            selector: selector.as_str().to_string(),
            arguments,
        }
    }

    /// Known selector, if any
    pub fn known_selector(&self) -> Option<ControlSelector> {
        ControlSelector::parse(&self.selector)
    }

    /// First argument as a string (port path for connect/disconnect)
    pub fn path_argument(&self) -> Option<&str> {
        self.arguments.first().and_then(JsonValue::as_str)
    }

    /// Parse the payload of a 0xFF frame
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).map_err(|e| BridgeError::ControlProtocol {
            message: e.to_string(),
        })
    }

    /// Encode as a complete 0xFF frame (task id 0)
    pub fn to_frame(&self) -> Result<Bytes> {
        let json = serde_json::to_vec(self).map_err(|e| BridgeError::ControlProtocol {
            message: e.to_string(),
        })?;
        encode_raw(MessageKind::JsonMessage, 0, &json)
    }
}

/// One entry of a `getSerialPortListResponse`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortEntry {
    pub path: String,
    pub display_name: String,
}

// =============================================================================
// Response builders
// =============================================================================

pub fn port_list_response(ports: &[PortEntry]) -> ControlMessage {
    ControlMessage::new(
        ControlSelector::GetSerialPortListResponse,
        vec![json!(ports)],
    )
}

pub fn connect_response(ok: bool, path: &str) -> ControlMessage {
    ControlMessage::new(ControlSelector::SerialConnectResponse, vec![json!(ok), json!(path)])
}

pub fn disconnect_response(ok: bool, path: &str) -> ControlMessage {
    ControlMessage::new(
        ControlSelector::SerialDisconnectResponse,
        vec![json!(ok), json!(path)],
    )
}

pub fn board_unplugged(path: &str) -> ControlMessage {
    ControlMessage::new(ControlSelector::BoardUnplugged, vec![json!(path)])
}

pub fn board_reconnected(path: &str) -> ControlMessage {
    ControlMessage::new(ControlSelector::BoardReconnected, vec![json!(path)])
}
