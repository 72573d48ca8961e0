//! Configuration management
//!
//! Config file is `ublocks-bridge.toml` next to the executable, or any path
//! given with `--config`. Every field has a default, so the file is optional
//! and may list only what it changes. Command-line flags override the file.

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_BIND_ADDRESS, DEFAULT_LISTEN_PORT, DEFAULT_MAX_BUFFER,
    MAX_PAYLOAD_SIZE, RECONNECT_INTERVAL_MS,
};
use crate::error::{BridgeError, Result};
use crate::protocol::codec::LONG_HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Config file name looked up next to the executable
pub const CONFIG_FILE_NAME: &str = "ublocks-bridge.toml";

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub protocol: ProtocolConfig,
}

// =============================================================================
// Bridge
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket port the IDE connects to
    pub listen_port: u16,
    pub bind_address: String,
    /// Serial baud rate for the board
    pub baud_rate: u32,
    /// Extra serial device offered in the port list (e.g. a Linux TTY)
    pub tty: Option<String>,
    /// Delay between reconnect attempts after a board is unplugged
    pub reconnect_interval_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            tty: None,
            reconnect_interval_ms: RECONNECT_INTERVAL_MS,
        }
    }
}

impl BridgeConfig {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

// =============================================================================
// Protocol
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest payload a frame header may declare
    pub max_payload: usize,
    /// Largest partial frame kept between reads
    pub max_buffer: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD_SIZE,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

impl Config {
    /// Parse config text
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| BridgeError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check values that would make the bridge misbehave
    pub fn validate(&self) -> Result<()> {
        if self.bridge.reconnect_interval_ms == 0 {
            return Err(BridgeError::ConfigValidation {
                field: "bridge.reconnect_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.bridge.baud_rate == 0 {
            return Err(BridgeError::ConfigValidation {
                field: "bridge.baud_rate",
                reason: "must be greater than zero".into(),
            });
        }
        if self.protocol.max_payload > MAX_PAYLOAD_SIZE {
            return Err(BridgeError::ConfigValidation {
                field: "protocol.max_payload",
                reason: format!("cannot exceed {}", MAX_PAYLOAD_SIZE),
            });
        }
        let largest_frame = LONG_HEADER_SIZE + self.protocol.max_payload;
        if self.protocol.max_buffer < largest_frame {
            return Err(BridgeError::ConfigValidation {
                field: "protocol.max_buffer",
                reason: format!("must hold one full frame ({} bytes)", largest_frame),
            });
        }
        Ok(())
    }
}

/// Default config location: next to the executable
pub fn default_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().map_err(|e| BridgeError::Io {
        path: PathBuf::from("executable"),
        source: e,
    })?;
    let dir = exe.parent().ok_or_else(|| BridgeError::ConfigValidation {
        field: "exe_path",
        reason: "no parent directory".into(),
    })?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Read a config file
///
/// A missing file is not an error and yields the defaults.
pub fn read(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    let content = fs::read_to_string(path).map_err(|e| BridgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Config::parse(&content, path)
}

/// Load config from `explicit` or the default location
///
/// Anything unreadable or invalid is reported and replaced by defaults.
pub fn load(explicit: Option<&Path>) -> Config {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => match default_path() {
            Ok(p) => p,
            Err(e) => {
                warn!("{}, using defaults", e);
                return Config::default();
            }
        },
    };

    let config = match read(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{}, using defaults", e);
            return Config::default();
        }
    };
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            warn!("{} in {}, using defaults", e, path.display());
            Config::default()
        }
    }
}
