//! Traffic counters for a bridge session
//!
//! Lock-free atomics so the handle can read them while the session runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    /// Bytes written to the board
    tx_total: AtomicU64,
    /// Bytes received from the board
    rx_total: AtomicU64,
    /// Board frames decoded by the diagnostic assembler
    frames: AtomicU64,
    /// JSON control requests served
    control: AtomicU64,
    /// Client messages that could not reach the board
    dropped: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_control(&self) {
        self.control.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_total.load(Ordering::Relaxed),
            rx_bytes: self.rx_total.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            control_requests: self.control.load(Ordering::Relaxed),
            dropped_writes: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub frames: u64,
    pub control_requests: u64,
    pub dropped_writes: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tx {} B, rx {} B, {} frames, {} control requests, {} dropped writes",
            self.tx_bytes, self.rx_bytes, self.frames, self.control_requests, self.dropped_writes
        )
    }
}
