//! Logging setup and helpers
//!
//! All output goes through `tracing`. `RUST_LOG`, when set, takes precedence
//! over the command-line verbosity.

use std::fmt;
use tracing_subscriber::EnvFilter;

/// How much the bridge prints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only (`--silent`)
    Silent,
    #[default]
    Normal,
    /// Every frame in both directions (`--debug`)
    Debug,
}

impl Verbosity {
    pub fn from_flags(debug: bool, silent: bool) -> Self {
        if debug {
            Verbosity::Debug
        } else if silent {
            Verbosity::Silent
        } else {
            Verbosity::Normal
        }
    }

    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Silent => "error",
            Verbosity::Normal => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Initialize tracing output
///
/// Call early in main() before any logging occurs. Calling it twice is
/// harmless.
pub fn init_tracing(verbosity: Verbosity) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.filter()));

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .compact(),
        )
        .with(filter)
        .try_init();
}

/// Displays bytes as space-separated hex, e.g. `fa 11 03`
pub struct Hex<'a>(pub &'a [u8]);

/// Dumps longer than this are cut short
const HEX_DUMP_LIMIT: usize = 64;

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().take(HEX_DUMP_LIMIT).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        if self.0.len() > HEX_DUMP_LIMIT {
            write!(f, " … (+{} bytes)", self.0.len() - HEX_DUMP_LIMIT)?;
        }
        Ok(())
    }
}
