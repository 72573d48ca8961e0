//! Bridge between one IDE (WebSocket) and one board (serial)
//!
//! - **link**: the board connection with reconnect-on-unplug
//! - **session**: the relay loop and the JSON control plane
//! - **instance**: link + assembler + dispatcher for in-process decoding
//! - **stats**: traffic counters
//!
//! Hosts with several boards run one bridge per board, each on its own port.

pub mod instance;
pub mod link;
pub mod session;
pub mod stats;

pub use instance::BridgeInstance;
pub use link::{BoardLink, ConnectOutcome, LinkEvent};
pub use session::BridgeSession;
pub use stats::{Stats, StatsSnapshot};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::StreamAssembler;
use crate::transport::{PortOpener, Transport, WebSocketServer};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::error;

/// Handle to control a running bridge
pub struct Handle {
    shutdown: Arc<AtomicBool>,
    stats: Arc<Stats>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Handle {
    /// Request shutdown; the session closes the board port on its way out
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Address the WebSocket server actually bound
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the session to finish
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Bridge task failed: {}", e);
        }
    }
}

/// Bind the WebSocket server and start the session
///
/// # Errors
///
/// `WebSocketBind` if the listen port is taken.
pub async fn start<O: PortOpener>(config: &Config, opener: O) -> Result<Handle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let stats = Arc::new(Stats::new());

    let server =
        WebSocketServer::bind(&config.bridge.bind_address, config.bridge.listen_port).await?;
    let local_addr = server.local_addr();
    let ide = server.spawn(shutdown.clone())?;

    let link = BoardLink::new(opener).with_reconnect_interval(config.bridge.reconnect_interval());
    let monitor =
        StreamAssembler::with_limits(config.protocol.max_payload, config.protocol.max_buffer);
    let session = BridgeSession::new(ide, link, monitor, stats.clone());

    let session_shutdown = shutdown.clone();
    let task = tokio::spawn(async move {
        if let Err(e) = session.run(session_shutdown).await {
            error!("{}", e);
        }
    });

    Ok(Handle {
        shutdown,
        stats,
        local_addr,
        task,
    })
}
