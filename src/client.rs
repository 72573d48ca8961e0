//! IDE-side client for a running bridge
//!
//! Connects to the bridge WebSocket, retrying once a second until it is up
//! and again after every disconnect. Incoming binary messages are assembled
//! into frames and dispatched locally; requests are built by the same
//! dispatcher so its task registry stays in step with the board.

use crate::constants::{CHANNEL_CAPACITY, CLIENT_RETRY_INTERVAL_MS};
use crate::error::{BridgeError, Result};
use crate::protocol::control::ControlSelector;
use crate::protocol::{
    ControlMessage, ControlSink, Frame, MessageKind, ProtocolDispatcher, StreamAssembler,
    TaskError, TaskSink, Value,
};
use bytes::Bytes;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// One live WebSocket connection
struct Connection {
    reader: WsReader,
    writer: mpsc::Sender<Bytes>,
    writer_task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

/// What a call to `step` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    /// A message arrived; carries the number of frames it completed
    Received(usize),
}

pub struct IdeClient<S: TaskSink, C: ControlSink = ()> {
    url: String,
    retry_interval: Duration,
    assembler: StreamAssembler,
    dispatcher: ProtocolDispatcher<S, C>,
    connection: Option<Connection>,
}

impl<S: TaskSink, C: ControlSink> IdeClient<S, C> {
    pub fn new(url: impl Into<String>, dispatcher: ProtocolDispatcher<S, C>) -> Self {
        Self {
            url: url.into(),
            retry_interval: Duration::from_millis(CLIENT_RETRY_INTERVAL_MS),
            assembler: StreamAssembler::new(),
            dispatcher,
            connection: None,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn dispatcher(&self) -> &ProtocolDispatcher<S, C> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut ProtocolDispatcher<S, C> {
        &mut self.dispatcher
    }

    /// Try to connect once
    ///
    /// # Errors
    ///
    /// `WebSocketConnect` if the bridge is not reachable.
    pub async fn connect(&mut self) -> Result<()> {
        let (ws, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| BridgeError::WebSocketConnect {
                    url: self.url.clone(),
                    source: Box::new(e),
                })?;
        let (mut sink, reader) = ws.split();
        let (writer, mut outgoing) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let writer_task = tokio::spawn(async move {
            while let Some(data) = outgoing.recv().await {
                if sink.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.assembler.clear();
        self.connection = Some(Connection {
            reader,
            writer,
            writer_task,
        });
        info!("Connected to bridge at {}", self.url);
        Ok(())
    }

    /// Connect, retrying on the retry interval until it works
    pub async fn connect_with_retry(&mut self) {
        loop {
            match self.connect().await {
                Ok(()) => return,
                Err(e) => {
                    debug!("{}, retrying", e);
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// Wait for the next thing to happen on the connection
    ///
    /// When disconnected this (re)connects first.
    pub async fn step(&mut self) -> ClientEvent {
        let Some(connection) = self.connection.as_mut() else {
            self.connect_with_retry().await;
            return ClientEvent::Connected;
        };
        let message = connection.reader.next().await;
        match message {
            Some(Ok(Message::Binary(data))) => ClientEvent::Received(self.receive(&data)),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                self.disconnect();
                ClientEvent::Disconnected
            }
            Some(Ok(_)) => ClientEvent::Received(0),
        }
    }

    /// Drop the connection and any partial frame
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            warn!("Disconnected from bridge at {}", self.url);
        }
        self.assembler.clear();
    }

    /// Feed bytes from the bridge and dispatch every completed frame
    ///
    /// Returns the number of frames handled.
    pub fn receive(&mut self, data: &[u8]) -> usize {
        let mut frames = Vec::new();
        if let Err(e) = self.assembler.feed(data, |frame| frames.push(frame)) {
            error!("{}", e);
        }
        let count = frames.len();
        for frame in frames {
            let reconnected = is_board_reconnected(&frame);
            if let Err(e) = self.dispatcher.handle(frame) {
                warn!("{}", e);
            }
            if reconnected {
                self.dispatcher.reset_running();
            }
        }
        count
    }

    /// Build a request and send it to the board through the bridge
    ///
    /// Returns the bytes queued, zero when not connected.
    pub fn send_message(&mut self, selector: &str, task_id: u8, payload: &[u8]) -> Result<usize> {
        let bytes = self.dispatcher.build(selector, task_id, payload)?;
        Ok(self.write(bytes))
    }

    /// Send a JSON control request to the bridge itself
    pub fn send_control(&mut self, message: &ControlMessage) -> Result<usize> {
        let bytes = message.to_frame()?;
        Ok(self.write(bytes))
    }

    fn write(&self, bytes: Bytes) -> usize {
        let Some(connection) = &self.connection else {
            return 0;
        };
        let len = bytes.len();
        match connection.writer.try_send(bytes) {
            Ok(()) => len,
            Err(e) => {
                warn!("Dropping {} bytes: {}", len, e);
                0
            }
        }
    }
}

fn is_board_reconnected(frame: &Frame) -> bool {
    frame.kind == MessageKind::JsonMessage
        && ControlMessage::from_payload(&frame.payload)
            .map(|m| m.known_selector() == Some(ControlSelector::BoardReconnected))
            .unwrap_or(false)
}

// =============================================================================
// Monitor sink
// =============================================================================

/// Prints decoded board and bridge traffic, used by `ublocks-bridge monitor`
#[derive(Debug, Default)]
pub struct MonitorSink;

impl TaskSink for MonitorSink {
    type Owner = u8;

    fn task_started(&mut self, _owner: &u8, task_id: u8) {
        info!("task {} started", task_id);
    }

    fn task_done(&mut self, _owner: &u8, task_id: u8) {
        info!("task {} done", task_id);
    }

    fn task_value(&mut self, _owner: &u8, task_id: u8, value: Value) {
        info!("task {} returned {}", task_id, value);
    }

    fn task_error(&mut self, _owner: &u8, task_id: u8, error: TaskError) {
        warn!("task {} failed: {}", task_id, error);
    }

    fn debug_output(&mut self, _task_id: u8, text: String) {
        info!("board says: {}", text);
    }

    fn variable_value(&mut self, var_id: u8, value: Value) {
        info!("variable {} = {}", var_id, value);
    }

    fn version(&mut self, version: String) {
        info!("{}", version_line(&version));
    }

    fn task_reset(&mut self, _owner: &u8, task_id: u8) {
        info!("task {} reset", task_id);
    }

    fn broadcast(&mut self, message: String) {
        info!("broadcast: {}", message);
    }
}

/// The VM sends its version with a leading space
fn version_line(version: &str) -> String {
    format!("VM version: {}", version.trim_start())
}

impl ControlSink for MonitorSink {
    fn on_control(&mut self, selector: ControlSelector, arguments: &[JsonValue]) {
        let args = JsonValue::Array(arguments.to_vec());
        info!("bridge: {} {}", selector, args);
    }
}
