//! µBlocks protocol core
//!
//! - **descriptor**: the message table (opcode, selector, direction)
//! - **codec**: frame encoding and header parsing
//! - **value**: typed payload decoding
//! - **assembler**: incremental frame extraction from a byte stream
//! - **control**: JSON control envelopes under opcode 0xFF
//! - **dispatcher**: routing of decoded frames and task bookkeeping
//!
//! Data flows `transport -> StreamAssembler -> ProtocolDispatcher -> sink`
//! inbound and `ProtocolDispatcher::build -> transport` outbound.

pub mod assembler;
pub mod codec;
pub mod control;
pub mod descriptor;
pub mod dispatcher;
pub mod value;

pub use assembler::StreamAssembler;
pub use codec::{encode, Frame};
pub use control::{ControlMessage, ControlSelector, PortEntry};
pub use descriptor::{Direction, MessageDescriptor, MessageKind, PayloadShape, DESCRIPTORS};
pub use dispatcher::{ControlSink, PendingTask, ProtocolDispatcher, TaskSink, TaskState};
pub use value::{ChunkType, TaskError, Value};

/// Plain-text protocol reference generated from the descriptor table
pub fn describe() -> String {
    let mut out = String::from("µBlocks protocol messages\n\n");
    out.push_str("  short frame: [0xFA, opcode, taskId]\n");
    out.push_str("  long frame:  [0xFB, opcode, taskId, lenLo, lenHi, payload...]\n\n");
    for (heading, filter) in [
        ("IDE -> board", Direction::IdeToBoard),
        ("Board -> IDE", Direction::BoardToIde),
        ("Both directions", Direction::Bidirectional),
        ("IDE <-> bridge", Direction::Control),
    ] {
        out.push_str(heading);
        out.push('\n');
        for d in DESCRIPTORS.iter().filter(|d| d.direction == filter) {
            let payload = match d.payload {
                PayloadShape::None => "",
                PayloadShape::Required => " +payload",
                PayloadShape::Optional => " [payload]",
            };
            out.push_str(&format!(
                "  0x{:02X}  {:<16}{:<11}{}\n",
                d.opcode, d.selector, payload, d.description
            ));
        }
        out.push('\n');
    }
    out.push_str("Control selectors (JSON under 0xFF):\n");
    for sel in ControlSelector::ALL {
        out.push_str(&format!("  {}\n", sel));
    }
    out
}
