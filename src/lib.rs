//! µBlocks bridge library
//!
//! The protocol core (framing, stream assembly, dispatch) lives in
//! [`protocol`] and has no I/O of its own. [`transport`] moves bytes over
//! serial ports and WebSockets, [`bridge`] relays between an IDE and a board,
//! and [`client`] is the IDE end of that relay.

pub mod bridge;
pub mod cli;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use error::{BridgeError, Result};
