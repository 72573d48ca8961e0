//! Command-line interface definition using clap
//!
//! `--help` takes an optional topic (`--help=protocol`), so clap's built-in
//! help flag is replaced by our own.

use crate::config::Config;
use crate::logging::Verbosity;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// WebSocket-to-serial bridge between a µBlocks IDE and a board running the
/// µBlocks VM
#[derive(Parser, Debug, Default)]
#[command(name = "ublocks-bridge")]
#[command(version, about, long_about = None, disable_help_flag = true)]
pub struct Cli {
    /// Print this message, or information about TOPIC (protocol)
    #[arg(
        short = 'h',
        long = "help",
        value_name = "TOPIC",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "usage"
    )]
    pub help: Option<HelpTopic>,

    /// WebSocket port to listen on (default: 9999)
    #[arg(short, long, value_name = "N")]
    pub port: Option<u16>,

    /// Log every frame in both directions
    #[arg(short, long)]
    pub debug: bool,

    /// Be silent except for errors
    #[arg(short, long)]
    pub silent: bool,

    /// Also offer this serial device (e.g. a Linux TTY) in the port list
    #[arg(short, long, value_name = "PATH")]
    pub tty: Option<String>,

    /// Config file (default: ublocks-bridge.toml next to the executable)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect to a running bridge as an IDE would and print decoded traffic
    Monitor {
        /// Bridge URL
        #[arg(long, value_name = "URL", default_value = crate::constants::DEFAULT_BRIDGE_URL)]
        url: String,

        /// Ask the bridge to open this serial port once connected
        #[arg(long, value_name = "PATH")]
        serial: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelpTopic {
    Usage,
    Protocol,
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.debug, self.silent)
    }

    /// Apply command-line overrides on top of the config file
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.bridge.listen_port = port;
        }
        if let Some(tty) = &self.tty {
            config.bridge.tty = Some(tty.clone());
        }
    }
}

/// Text printed for `--help[=TOPIC]`
pub fn help_text(topic: HelpTopic) -> String {
    match topic {
        HelpTopic::Usage => Cli::command().render_long_help().to_string(),
        HelpTopic::Protocol => crate::protocol::describe(),
    }
}

// =============================================================================
// Tests
// =============================================================================
