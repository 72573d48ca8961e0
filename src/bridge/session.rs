//! Bridge session: relay between the IDE and one board
//!
//! The session handles:
//! - Relaying IDE messages to the board, byte for byte
//! - Relaying board bytes to the IDE, before any decoding
//! - Serving JSON control requests (port list, connect, disconnect)
//! - Notifying the IDE when the board is unplugged or comes back
//! - Statistics and protocol logging
//!
//! Board bytes are also run through a diagnostic assembler purely for
//! logging; a decoding problem there never holds back the relay. A buffer
//! overflow in that assembler is logged and the assembler cleared, but the
//! board stays connected since the IDE does its own decoding.

use super::link::{BoardLink, ConnectOutcome, LinkEvent};
use super::stats::Stats;
use crate::constants::SHUTDOWN_POLL_MS;
use crate::error::Result;
use crate::logging::Hex;
use crate::protocol::codec::{is_control_frame, parse_header, Header};
use crate::protocol::control::{
    board_reconnected, board_unplugged, connect_response, disconnect_response,
    port_list_response,
};
use crate::protocol::{
    ControlMessage, ControlSelector, Frame, MessageKind, StreamAssembler, TaskError,
};
use crate::transport::{PortOpener, TransportChannels};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Session between the IDE (WebSocket client) and the board link
///
/// # Example
///
/// ```ignore
/// let session = BridgeSession::new(ide_channels, link, StreamAssembler::new(), stats);
/// session.run(shutdown).await?;
/// ```
pub struct BridgeSession<O: PortOpener> {
    /// IDE side (WebSocket server channels)
    ide: TransportChannels,
    link: BoardLink<O>,
    /// Decodes board traffic for the log only
    monitor: StreamAssembler,
    stats: Arc<Stats>,
}

impl<O: PortOpener> BridgeSession<O> {
    pub fn new(
        ide: TransportChannels,
        link: BoardLink<O>,
        monitor: StreamAssembler,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            ide,
            link,
            monitor,
            stats,
        }
    }

    /// Run until shutdown or until the IDE transport stops
    ///
    /// The board port is released on return.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            tokio::select! {
                biased;

                _ = tokio::time::sleep(Duration::from_millis(SHUTDOWN_POLL_MS)) => {}

                msg = self.ide.rx.recv() => {
                    match msg {
                        Some(data) => self.handle_ide_message(data),
                        None => break,
                    }
                }

                event = self.link.recv() => self.handle_link_event(event),
            }
        }

        self.link.close();
        info!("Session ended ({})", self.stats.snapshot());
        Ok(())
    }

    // =========================================================================
    // IDE -> board
    // =========================================================================

    fn handle_ide_message(&mut self, data: Bytes) {
        if is_control_frame(&data) {
            self.handle_control_frame(&data);
            return;
        }

        debug!("IDE -> board: {}", describe_outgoing(&data));
        trace!("[{}]", Hex(&data));
        let len = data.len();
        match self.link.send(data) {
            0 => {
                warn!("Board is not connected, dropped {} bytes", len);
                self.stats.add_dropped();
            }
            n => self.stats.add_tx(n),
        }
    }

    fn handle_control_frame(&mut self, data: &[u8]) {
        let payload = match parse_header(data) {
            Header::Valid {
                header_len,
                payload_len,
                ..
            } => &data[header_len..data.len().min(header_len + payload_len)],
            _ => return,
        };
        let message = match ControlMessage::from_payload(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        debug!("IDE control: {} {:?}", message.selector, message.arguments);
        self.stats.add_control();

        let reply = match message.known_selector() {
            Some(ControlSelector::GetSerialPortList) => {
                let ports = self.link.opener().available_ports();
                info!("IDE requested serial port list ({} ports)", ports.len());
                port_list_response(&ports)
            }
            Some(ControlSelector::SerialConnect) => {
                let path = message.path_argument().unwrap_or_default();
                connect_response(self.connect(path), path)
            }
            Some(ControlSelector::SerialDisconnect) => {
                let path = message.path_argument().unwrap_or_default();
                disconnect_response(self.disconnect(path), path)
            }
            Some(other) => {
                warn!("Ignoring {} from IDE", other);
                return;
            }
            None => {
                warn!("Ignoring unknown control selector: {}", message.selector);
                return;
            }
        };
        self.reply(reply);
    }

    fn connect(&mut self, path: &str) -> bool {
        if path.is_empty() {
            warn!("serialConnect without a port");
            return false;
        }
        info!("IDE asked to connect to {}", path);
        match self.link.connect(path) {
            Ok(ConnectOutcome::Connected) => {
                self.monitor.clear();
                true
            }
            Ok(ConnectOutcome::AlreadyOpen) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    fn disconnect(&mut self, path: &str) -> bool {
        info!("IDE asked to disconnect from {}", path);
        if self.link.port() != Some(path) {
            warn!("{} is not connected", path);
            return false;
        }
        self.link.close();
        self.monitor.clear();
        true
    }

    fn reply(&self, message: ControlMessage) {
        let frame = match message.to_frame() {
            Ok(f) => f,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };
        debug!("bridge -> IDE: {} {:?}", message.selector, message.arguments);
        if self.ide.tx.try_send(frame).is_err() {
            warn!("IDE channel full, dropped {}", message.selector);
        }
    }

    // =========================================================================
    // Board -> IDE
    // =========================================================================

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Data(data) => {
                self.stats.add_rx(data.len());
                if self.ide.tx.try_send(data.clone()).is_err() {
                    warn!("IDE channel full, dropped {} board bytes", data.len());
                }
                self.log_board_data(&data);
            }
            LinkEvent::Unplugged(port) => {
                self.monitor.clear();
                self.reply(board_unplugged(&port));
            }
            LinkEvent::Reconnected(port) => {
                self.monitor.clear();
                self.reply(board_reconnected(&port));
            }
        }
    }

    fn log_board_data(&mut self, data: &[u8]) {
        trace!("board -> IDE [{}]", Hex(data));
        let stats = &self.stats;
        let fed = self.monitor.feed(data, |frame| {
            stats.add_frame();
            log_board_frame(&frame);
        });
        if let Err(e) = fed {
            error!("{}", e);
        }
    }
}

fn log_board_frame(frame: &Frame) {
    match frame.kind {
        MessageKind::OutputString => info!("board says: {}", frame.text()),
        MessageKind::TaskError => {
            let err = TaskError::parse(&frame.payload);
            debug!("board -> IDE: taskError task={} {}", frame.task_id, err);
        }
        MessageKind::TaskReturned | MessageKind::VarValue => {
            debug!(
                "board -> IDE: {} task={} {}",
                frame.kind,
                frame.task_id,
                frame.value()
            );
        }
        kind => debug!(
            "board -> IDE: {} task={} len={}",
            kind,
            frame.task_id,
            frame.payload.len()
        ),
    }
}

/// Short description of an IDE message for the log
fn describe_outgoing(data: &[u8]) -> String {
    match parse_header(data) {
        Header::Valid {
            kind,
            task_id,
            payload_len,
            ..
        } => format!("{} task={} len={}", kind, task_id, payload_len),
        _ => format!("{} raw bytes", data.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PortEntry;
    use tokio::sync::mpsc;

    struct NoBoard;

    impl PortOpener for NoBoard {
        fn open(&self, port: &str, _shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
            Err(crate::error::BridgeError::PortUnavailable {
                port: port.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no board"),
            })
        }

        fn available_ports(&self) -> Vec<PortEntry> {
            vec![PortEntry {
                path: "/dev/ttyACM0".into(),
                display_name: "ARM".into(),
            }]
        }
    }

    #[tokio::test]
    async fn test_session_shutdown() {
        let (_ide_in_tx, ide_in_rx) = mpsc::channel(16);
        let (ide_out_tx, _ide_out_rx) = mpsc::channel(16);
        let ide = TransportChannels {
            rx: ide_in_rx,
            tx: ide_out_tx,
        };
        let session = BridgeSession::new(
            ide,
            BoardLink::new(NoBoard),
            StreamAssembler::new(),
            Arc::new(Stats::new()),
        );
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = tokio::spawn(session.run(shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.store(true, Ordering::Relaxed);

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "session did not stop");
    }

    #[tokio::test]
    async fn test_ide_close_ends_session() {
        let (ide_in_tx, ide_in_rx) = mpsc::channel(16);
        let (ide_out_tx, _ide_out_rx) = mpsc::channel(16);
        let session = BridgeSession::new(
            TransportChannels {
                rx: ide_in_rx,
                tx: ide_out_tx,
            },
            BoardLink::new(NoBoard),
            StreamAssembler::new(),
            Arc::new(Stats::new()),
        );
        drop(ide_in_tx);
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            session.run(Arc::new(AtomicBool::new(false))),
        )
        .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_describe_outgoing() {
        assert_eq!(describe_outgoing(&[0xFA, 0x05, 0]), "startAll task=0 len=0");
        assert_eq!(describe_outgoing(&[0x01, 0x02]), "2 raw bytes");
    }
}
