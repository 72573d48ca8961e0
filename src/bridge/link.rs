//! Board link: the single serial connection of a bridge
//!
//! Owns at most one open port. When the port goes away without being asked
//! to, the link keeps the port name and retries on a fixed interval until
//! the board comes back.
//!
//! ```text
//!            connect              rx closed
//!   Idle ───────────────► Open ───────────────► Reconnecting
//!    ▲                     │  ▲                      │
//!    └──── close() ────────┘  └────── reopened ──────┘
//! ```

use crate::constants::RECONNECT_INTERVAL_MS;
use crate::error::Result;
use crate::transport::{PortOpener, TransportChannels};
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Result of a successful `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new handle was opened
    Connected,
    /// The port was already open; nothing changed
    AlreadyOpen,
}

/// What the link has to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Data(Bytes),
    /// The port closed unexpectedly; reconnect attempts have started
    Unplugged(String),
    /// The port came back after being unplugged
    Reconnected(String),
}

enum LinkState {
    Idle,
    Open {
        port: String,
        channels: TransportChannels,
        shutdown: Arc<AtomicBool>,
    },
    Reconnecting {
        port: String,
        ticker: Interval,
    },
}

pub struct BoardLink<O: PortOpener> {
    opener: O,
    state: LinkState,
    reconnect_interval: Duration,
}

impl<O: PortOpener> BoardLink<O> {
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            state: LinkState::Idle,
            reconnect_interval: Duration::from_millis(RECONNECT_INTERVAL_MS),
        }
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Port currently open or being reconnected
    pub fn port(&self) -> Option<&str> {
        match &self.state {
            LinkState::Idle => None,
            LinkState::Open { port, .. } | LinkState::Reconnecting { port, .. } => Some(port),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open { .. })
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self.state, LinkState::Reconnecting { .. })
    }

    /// Open `port`
    ///
    /// Asking for the port that is already held, open or being reconnected,
    /// is not an error and leaves the reconnect loop running. Asking for
    /// another port closes the current one first.
    ///
    /// # Errors
    ///
    /// `PortUnavailable` from the opener; the link is then idle.
    pub fn connect(&mut self, port: &str) -> Result<ConnectOutcome> {
        match &self.state {
            LinkState::Open { port: current, .. } if current == port => {
                debug!("{} already open", port);
                return Ok(ConnectOutcome::AlreadyOpen);
            }
            LinkState::Reconnecting { port: current, .. } if current == port => {
                debug!("{} still held, reconnect in progress", port);
                return Ok(ConnectOutcome::AlreadyOpen);
            }
            _ => {}
        }
        self.close();

        self.state = self.open_state(port)?;
        info!("Connected to board at {}", port);
        Ok(ConnectOutcome::Connected)
    }

    fn open_state(&self, port: &str) -> Result<LinkState> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let channels = self.opener.open(port, shutdown.clone())?;
        Ok(LinkState::Open {
            port: port.to_string(),
            channels,
            shutdown,
        })
    }

    /// Queue bytes for the board, returning how many were accepted
    ///
    /// Zero when no port is open or the writer is backed up.
    pub fn send(&self, bytes: Bytes) -> usize {
        let LinkState::Open { channels, port, .. } = &self.state else {
            return 0;
        };
        let len = bytes.len();
        match channels.tx.try_send(bytes) {
            Ok(()) => len,
            Err(e) => {
                warn!("{}: dropping {} bytes: {}", port, len, e);
                0
            }
        }
    }

    /// Release the port and stop any reconnect attempts
    ///
    /// Returns the port that was open or being reconnected.
    pub fn close(&mut self) -> Option<String> {
        match std::mem::replace(&mut self.state, LinkState::Idle) {
            LinkState::Idle => None,
            LinkState::Open { port, shutdown, .. } => {
                shutdown.store(true, Ordering::Relaxed);
                info!("Disconnected from {}", port);
                Some(port)
            }
            LinkState::Reconnecting { port, .. } => {
                info!("Stopped reconnecting to {}", port);
                Some(port)
            }
        }
    }

    /// React to the port closing
    ///
    /// An unexpected close starts the reconnect loop and returns the port
    /// being retried; an explicit one just closes.
    pub fn on_close(&mut self, unexpected: bool) -> Option<String> {
        if !unexpected {
            self.close();
            return None;
        }
        let LinkState::Open { port, shutdown, .. } =
            std::mem::replace(&mut self.state, LinkState::Idle)
        else {
            return None;
        };
        shutdown.store(true, Ordering::Relaxed);
        warn!("Board at {} disconnected, reconnecting", port);

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.reconnect_interval,
            self.reconnect_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.state = LinkState::Reconnecting {
            port: port.clone(),
            ticker,
        };
        Some(port)
    }

    /// Wait for the next link event
    ///
    /// Pends forever while idle. Cancel-safe, so it can sit in a `select!`.
    pub async fn recv(&mut self) -> LinkEvent {
        loop {
            match &mut self.state {
                LinkState::Idle => std::future::pending::<()>().await,
                LinkState::Open { channels, .. } => {
                    if let Some(data) = channels.rx.recv().await {
                        return LinkEvent::Data(data);
                    }
                    if let Some(port) = self.on_close(true) {
                        return LinkEvent::Unplugged(port);
                    }
                }
                LinkState::Reconnecting { port, ticker } => {
                    ticker.tick().await;
                    let port = port.clone();
                    match self.open_state(&port) {
                        Ok(state) => {
                            self.state = state;
                            info!("Reconnected to board at {}", port);
                            return LinkEvent::Reconnected(port);
                        }
                        Err(e) => trace!("reconnect attempt failed: {}", e),
                    }
                }
            }
        }
    }
}

impl<O: PortOpener> Drop for BoardLink<O> {
    fn drop(&mut self) {
        if let LinkState::Open { shutdown, .. } = &self.state {
            shutdown.store(true, Ordering::Relaxed);
        }
    }
}
