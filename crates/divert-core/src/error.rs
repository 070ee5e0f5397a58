//! Error types for divert-core
//!
//! Validation failures are detected locally and never reach the engine.
//! Engine failures always carry the OS error code reported by the call.

use std::fmt;

use thiserror::Error;

use crate::consts::{Layer, Param};

/// OS code reported by a receive on a session whose receive side was shut
/// down and whose queue has drained
pub const ERROR_NO_DATA: u32 = 232;

/// OS code for an overlapped operation that has not finished
pub const ERROR_IO_INCOMPLETE: u32 = 996;

/// OS code for an overlapped operation that was started but not finished
pub const ERROR_IO_PENDING: u32 = 997;

/// Engine operation that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Resolving the engine entry points
    Load,
    /// Opening a session
    Open,
    /// Single packet receive
    Recv,
    /// Batched (and overlapped) receive
    RecvEx,
    /// Single packet send
    Send,
    /// Batched send
    SendEx,
    /// Session shutdown
    Shutdown,
    /// Session close
    Close,
    /// Parameter read
    GetParam,
    /// Parameter write
    SetParam,
    /// Packet boundary parsing
    ParsePacket,
    /// Waiting on an overlapped completion
    Wait,
    /// Cancelling an overlapped operation
    Cancel,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Op::Load => "load",
            Op::Open => "open",
            Op::Recv => "recv",
            Op::RecvEx => "recv_ex",
            Op::Send => "send",
            Op::SendEx => "send_ex",
            Op::Shutdown => "shutdown",
            Op::Close => "close",
            Op::GetParam => "get_param",
            Op::SetParam => "set_param",
            Op::ParsePacket => "parse_packet",
            Op::Wait => "wait",
            Op::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// Main error type for divert operations
#[derive(Error, Debug)]
pub enum Error {
    /// Priority outside the engine's accepted range
    #[error("Invalid priority {priority} (must be {min}..={max})")]
    InvalidPriority {
        /// Requested priority
        priority: i16,
        /// Lowest accepted priority
        min: i16,
        /// Highest accepted priority
        max: i16,
    },

    /// A byte buffer argument was empty
    #[error("Empty buffer passed to {op}")]
    EmptyBuffer {
        /// Operation that rejected the buffer
        op: Op,
    },

    /// Filter string cannot be handed to the engine
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Generic argument validation failure
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// More descriptors than a single exchange can carry
    #[error("Batch of {requested} descriptors exceeds maximum of {max}")]
    BatchTooLarge {
        /// Requested descriptor count
        requested: usize,
        /// Maximum descriptor count
        max: usize,
    },

    /// Descriptor or view does not belong to the expected layer
    #[error("Layer mismatch: expected {expected}, found {found}")]
    LayerMismatch {
        /// Layer required by the session or view
        expected: Layer,
        /// Layer actually carried
        found: Layer,
    },

    /// Parameter cannot be written
    #[error("Parameter {0} is read-only")]
    ReadOnlyParam(Param),

    /// Parameter value outside the engine limits
    #[error("Value {value} for {param} out of range ({min}..={max})")]
    ParamOutOfRange {
        /// Parameter being set
        param: Param,
        /// Rejected value
        value: u64,
        /// Minimum accepted value
        min: u64,
        /// Maximum accepted value
        max: u64,
    },

    /// Logical packet length does not fit the descriptor field
    #[error("Length {0} does not fit in 20 bits")]
    LengthOverflow(u32),

    /// Unknown layer tag
    #[error("Unknown layer tag: {0}")]
    UnknownLayer(u32),

    /// Unknown event tag
    #[error("Unknown event tag: {0}")]
    UnknownEvent(u8),

    /// Handle was already closed
    #[error("Handle is closed")]
    HandleClosed,

    /// Close refused while overlapped receives still own engine buffers
    #[error("{count} overlapped receive(s) still pending")]
    ReceivePending {
        /// Outstanding overlapped receives
        count: usize,
    },

    /// Receive unblocked because the session's receive direction was shut down
    #[error("End of session (os error {code})")]
    EndOfSession {
        /// OS error code reported by the engine
        code: u32,
    },

    /// Engine call failed
    #[error("Engine {op} failed (os error {code})")]
    Engine {
        /// Operation that failed
        op: Op,
        /// OS error code captured right after the call
        code: u32,
    },

    /// Operation not wired to an engine in this build
    #[error("Operation {op} is not supported by this engine")]
    Unsupported {
        /// Unsupported operation
        op: Op,
    },

    /// Packet buffer could not be split into packets
    #[error("Malformed batch at offset {offset}: {message}")]
    MalformedBatch {
        /// Byte offset of the packet that failed to parse
        offset: usize,
        /// Error message
        message: String,
    },

    /// Packet count and descriptor count disagree
    #[error("Batch mismatch: {packets} packets for {descriptors} descriptors")]
    BatchMismatch {
        /// Packets recovered so far
        packets: usize,
        /// Descriptors supplied
        descriptors: usize,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an engine error
    pub fn engine(op: Op, code: u32) -> Self {
        Self::Engine { op, code }
    }

    /// Create a malformed batch error
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::MalformedBatch {
            offset,
            message: message.into(),
        }
    }

    /// OS error code carried by engine-originated errors
    pub fn os_code(&self) -> Option<u32> {
        match self {
            Self::Engine { code, .. } | Self::EndOfSession { code } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error was detected locally before any engine call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidPriority { .. }
                | Self::EmptyBuffer { .. }
                | Self::InvalidFilter(_)
                | Self::InvalidArgument(_)
                | Self::BatchTooLarge { .. }
                | Self::LayerMismatch { .. }
                | Self::ReadOnlyParam(_)
                | Self::ParamOutOfRange { .. }
                | Self::LengthOverflow(_)
        )
    }
}
