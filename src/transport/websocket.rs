//! WebSocket server transport for the IDE
//!
//! Accepts IDE connections and relays binary messages bidirectionally.
//! One client at a time: a new connection replaces the previous one
//! (last connection wins).
//!
//! ```text
//! IDE ──WebSocket:9999──► ublocks-bridge ──Serial──► Board
//! ```

use super::{Transport, TransportChannels};
use crate::constants::{CHANNEL_CAPACITY, SHUTDOWN_POLL_MS};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Sender of the active client, tagged with its connection id
type ClientSlot = Arc<RwLock<Option<(u64, mpsc::Sender<Bytes>)>>>;

/// WebSocket server for IDE clients
///
/// Binding happens up front so a busy port is reported before anything
/// is spawned.
///
/// # Example
///
/// ```ignore
/// let server = WebSocketServer::bind("0.0.0.0", 9999).await?;
/// let channels = server.spawn(shutdown)?;
/// ```
pub struct WebSocketServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WebSocketServer {
    /// Bind the listening socket
    ///
    /// # Errors
    ///
    /// `WebSocketBind` if the address is in use or not available.
    pub async fn bind(address: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((address, port))
            .await
            .map_err(|e| BridgeError::WebSocketBind { port, source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::WebSocketBind { port, source: e })?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for WebSocketServer {
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        info!("WebSocket server listening on ws://{}", self.local_addr);
        tokio::spawn(run_server(self.listener, in_tx, out_rx, shutdown));

        Ok(TransportChannels {
            rx: in_rx,
            tx: out_tx,
        })
    }
}

async fn run_server(
    listener: TcpListener,
    in_tx: mpsc::Sender<Bytes>,
    mut out_rx: mpsc::Receiver<Bytes>,
    shutdown: Arc<AtomicBool>,
) {
    let client: ClientSlot = Arc::new(RwLock::new(None));
    let next_id = AtomicU64::new(0);
    let poll = Duration::from_millis(SHUTDOWN_POLL_MS);

    // Forward outgoing messages to whichever client is current
    let slot = client.clone();
    let shutdown_fwd = shutdown.clone();
    tokio::spawn(async move {
        while !shutdown_fwd.load(Ordering::Relaxed) {
            match tokio::time::timeout(poll, out_rx.recv()).await {
                Ok(Some(data)) => {
                    let current = slot.read().clone();
                    match current {
                        Some((id, tx)) => {
                            if tx.send(data).await.is_err() {
                                clear_if_current(&slot, id);
                            }
                        }
                        None => debug!("No IDE connected, dropping {} bytes", data.len()),
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
    });

    while !shutdown.load(Ordering::Relaxed) {
        match tokio::time::timeout(poll, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                let (ws_out_tx, ws_out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
                if client.write().replace((id, ws_out_tx)).is_some() {
                    info!("IDE connected from {} (replacing previous client)", addr);
                } else {
                    info!("IDE connected from {}", addr);
                }

                let in_tx = in_tx.clone();
                let shutdown = shutdown.clone();
                let slot = client.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, in_tx, ws_out_rx, shutdown).await {
                        error!("{}", e);
                    }
                    info!("IDE disconnected: {}", addr);
                    clear_if_current(&slot, id);
                });
            }
            Ok(Err(e)) => warn!("Failed to accept connection: {}", e),
            Err(_) => {}
        }
    }
}

/// Forget the client sender unless a newer client already took the slot
fn clear_if_current(slot: &ClientSlot, id: u64) {
    let mut guard = slot.write();
    if matches!(guard.as_ref(), Some((current, _)) if *current == id) {
        *guard = None;
    }
}

async fn handle_client(
    stream: TcpStream,
    in_tx: mpsc::Sender<Bytes>,
    mut out_rx: mpsc::Receiver<Bytes>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| BridgeError::WebSocketAccept {
            source: Box::new(e),
        })?;
    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let poll = Duration::from_millis(SHUTDOWN_POLL_MS);

    // WebSocket -> channel
    let shutdown_rx = shutdown.clone();
    let rx_handle = tokio::spawn(async move {
        while !shutdown_rx.load(Ordering::Relaxed) {
            match tokio::time::timeout(poll, ws_stream.next()).await {
                Ok(Some(Ok(Message::Binary(data)))) => {
                    if in_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) => break,
                Ok(Some(Ok(_))) => {}
                Err(_) => {}
            }
        }
    });

    // channel -> WebSocket
    let tx_handle = tokio::spawn(async move {
        while !shutdown.load(Ordering::Relaxed) {
            match tokio::time::timeout(poll, out_rx.recv()).await {
                Ok(Some(data)) => {
                    if ws_sink.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
        }
        let _ = ws_sink.close().await;
    });

    tokio::select! {
        _ = rx_handle => {}
        _ = tx_handle => {}
    }
    Ok(())
}
