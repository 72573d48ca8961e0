//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Network
// =============================================================================

/// Default WebSocket port the IDE connects to
pub const DEFAULT_LISTEN_PORT: u16 = 9999;

/// Default bind address for the WebSocket server
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default bridge URL used by the monitor client
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:9999";

// =============================================================================
// Serial
// =============================================================================

/// Baud rate used by the µBlocks VM
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial read timeout (milliseconds)
pub const SERIAL_READ_TIMEOUT_MS: u64 = 10;

/// Serial read buffer size
pub const SERIAL_BUFFER_SIZE: usize = 4096;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Display name for a TTY injected with `--tty`
pub const TTY_DISPLAY_NAME: &str = "Linux TTY Console";

// =============================================================================
// Timing - Reconnection
// =============================================================================

/// Interval between board reconnection attempts (milliseconds)
pub const RECONNECT_INTERVAL_MS: u64 = 100;

/// Interval between IDE client connection attempts (milliseconds)
pub const CLIENT_RETRY_INTERVAL_MS: u64 = 1000;

/// Poll interval used to observe shutdown flags (milliseconds)
pub const SHUTDOWN_POLL_MS: u64 = 100;

// =============================================================================
// Buffers
// =============================================================================

/// Largest payload a frame length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Default bound on bytes retained by a stream assembler
pub const DEFAULT_MAX_BUFFER: usize = 64 * 1024 + 16;

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;
