//! Message descriptor table
//!
//! Every message kind the bridge understands, with its opcode, selector,
//! direction and payload shape. Encoding and decoding both resolve through
//! this table; nothing else in the crate hard-codes an opcode.

use std::fmt;

/// Which side of the link sends a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// IDE -> Board command
    IdeToBoard,
    /// Board -> IDE event
    BoardToIde,
    /// Either side may send it
    Bidirectional,
    /// IDE <-> bridge JSON envelope, never reaches the board
    Control,
}

impl Direction {
    /// True if the IDE may send this message
    pub fn is_outbound(self) -> bool {
        matches!(self, Direction::IdeToBoard | Direction::Bidirectional)
    }

    /// True if the board may send this message
    pub fn is_inbound(self) -> bool {
        matches!(self, Direction::BoardToIde | Direction::Bidirectional)
    }
}

/// Whether a message carries a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    None,
    Required,
    /// Sent both ways, e.g. `getVar` by index (short) or by name (long)
    Optional,
}

/// Static metadata for one message kind
#[derive(Debug, Clone, Copy)]
pub struct MessageDescriptor {
    pub kind: MessageKind,
    pub opcode: u8,
    pub selector: &'static str,
    pub direction: Direction,
    pub payload: PayloadShape,
    pub description: &'static str,
}

macro_rules! message_kinds {
    ($( $variant:ident = $opcode:literal, $selector:literal, $dir:ident, $payload:ident, $desc:literal; )*) => {
        /// Every message kind of the µBlocks protocol
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageKind {
            $( $variant, )*
        }

        /// The descriptor table, in opcode order
        pub const DESCRIPTORS: &[MessageDescriptor] = &[
            $(
                MessageDescriptor {
                    kind: MessageKind::$variant,
                    opcode: $opcode,
                    selector: $selector,
                    direction: Direction::$dir,
                    payload: PayloadShape::$payload,
                    description: $desc,
                },
            )*
        ];

        impl MessageKind {
            /// Wire opcode
            pub const fn opcode(self) -> u8 {
                match self {
                    $( MessageKind::$variant => $opcode, )*
                }
            }

            /// Look up a kind by wire opcode
            pub fn from_opcode(opcode: u8) -> Option<Self> {
                match opcode {
                    $( $opcode => Some(MessageKind::$variant), )*
                    _ => None,
                }
            }

            /// Look up a kind by selector name
            pub fn from_selector(selector: &str) -> Option<Self> {
                match selector {
                    $( $selector => Some(MessageKind::$variant), )*
                    _ => None,
                }
            }
        }
    };
}

message_kinds! {
    StoreChunk     = 0x01, "storeChunk",     Bidirectional, Required, "Store a code chunk";
    DeleteChunk    = 0x02, "deleteChunk",    IdeToBoard,    None,     "Delete a code chunk";
    StartChunk     = 0x03, "startChunk",     IdeToBoard,    None,     "Start a code chunk";
    StopChunk      = 0x04, "stopChunk",      IdeToBoard,    None,     "Stop a code chunk";
    StartAll       = 0x05, "startAll",       IdeToBoard,    None,     "Start all tasks";
    StopAll        = 0x06, "stopAll",        IdeToBoard,    None,     "Stop all tasks";
    GetVar         = 0x07, "getVar",         IdeToBoard,    Optional, "Request a variable value (by index or by name)";
    SetVar         = 0x08, "setVar",         IdeToBoard,    Required, "Set a variable value";
    GetVarNames    = 0x09, "getVarNames",    IdeToBoard,    None,     "Request all variable names";
    ClearVars      = 0x0A, "clearVars",      IdeToBoard,    None,     "Clear all variables";
    GetVersion     = 0x0C, "getVersion",     IdeToBoard,    None,     "Request the VM version";
    GetAllCode     = 0x0D, "getAllCode",     IdeToBoard,    None,     "Request all stored chunks";
    DeleteAllCode  = 0x0E, "deleteAllCode",  IdeToBoard,    None,     "Delete all stored chunks";
    SystemReset    = 0x0F, "systemReset",    IdeToBoard,    None,     "Reset the VM";
    TaskStarted    = 0x10, "taskStarted",    BoardToIde,    None,     "A task has just started running";
    TaskDone       = 0x11, "taskDone",       BoardToIde,    None,     "A task has finished";
    TaskReturned   = 0x12, "taskReturned",   BoardToIde,    Required, "A task returned a value";
    TaskError      = 0x13, "taskError",      BoardToIde,    Required, "An error occurred inside a task";
    OutputString   = 0x14, "outputString",   BoardToIde,    Required, "Debug or say output";
    VarValue       = 0x15, "varValue",       BoardToIde,    Required, "Value of a variable";
    Version        = 0x16, "version",        BoardToIde,    Required, "VM version string";
    Ping           = 0x1A, "ping",           Bidirectional, None,     "Ping / acknowledge";
    Broadcast      = 0x1B, "broadcast",      Bidirectional, Required, "Broadcast a message";
    ChunkAttribute = 0x1C, "chunkAttribute", Bidirectional, Required, "Chunk attribute record";
    VarName        = 0x1D, "varName",        Bidirectional, Required, "Variable name record";
    Extended       = 0x1E, "extended",       Bidirectional, Required, "Extended message";
    JsonMessage    = 0xFF, "jsonMessage",    Control,       Required, "JSON control envelope (IDE <-> bridge)";
}

impl MessageKind {
    /// Full descriptor for this kind
    pub fn descriptor(self) -> &'static MessageDescriptor {
        // Table and enum are generated from the same list, so the
        // discriminant is the table index.
        &DESCRIPTORS[self as usize]
    }

    pub fn selector(self) -> &'static str {
        self.descriptor().selector
    }

    pub fn direction(self) -> Direction {
        self.descriptor().direction
    }

    pub fn payload(self) -> PayloadShape {
        self.descriptor().payload
    }

    /// True for task lifecycle events that are routed by task id
    pub fn is_task_event(self) -> bool {
        matches!(
            self,
            MessageKind::TaskStarted
                | MessageKind::TaskDone
                | MessageKind::TaskReturned
                | MessageKind::TaskError
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}
