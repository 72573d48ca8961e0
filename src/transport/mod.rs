//! Byte pipes to the board and to the IDE
//!
//! A transport only moves bytes; finding frames in them is the protocol
//! core's job. The serial transport runs on blocking threads, the WebSocket
//! server on tokio tasks. Both hand back a pair of channels.

pub mod serial;
pub mod websocket;

pub use serial::{list_ports, BoardKind, SerialOpener, SerialTransport};
pub use websocket::WebSocketServer;

use bytes::Bytes;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::PortEntry;

/// Both directions of a running transport
///
/// Dropped channels mean the transport has stopped.
pub struct TransportChannels {
    /// Bytes read from the device or client; `None` once it is gone
    pub rx: mpsc::Receiver<Bytes>,

    /// Bytes to write
    pub tx: mpsc::Sender<Bytes>,
}

/// Something that can be started in the background and talked to through
/// [`TransportChannels`]
///
/// It keeps running until `shutdown` is set or its device fails. Framing
/// and reconnects live in the bridge.
pub trait Transport: Send + 'static {
    /// Start I/O and return the channels
    ///
    /// # Errors
    ///
    /// `PortUnavailable` when the device cannot be opened.
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels>;
}

/// Opens board connections by port name
///
/// The board link goes through this for every (re)connect attempt, so tests
/// can substitute an in-memory board.
pub trait PortOpener: Send + 'static {
    /// Open `port` and start its I/O
    ///
    /// # Errors
    ///
    /// `PortUnavailable` if the port does not resolve to an openable device.
    fn open(&self, port: &str, shutdown: Arc<AtomicBool>) -> Result<TransportChannels>;

    /// Ports offered to the IDE
    fn available_ports(&self) -> Vec<PortEntry>;
}
