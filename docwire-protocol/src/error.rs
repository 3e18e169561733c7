//! Protocol error types.

use crate::header::OpCode;
use docwire_bson::{DecodeError, EncodeError};
use thiserror::Error;

/// Errors raised while framing, encoding or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },

    #[error("message length {0} is smaller than the header")]
    MessageTooSmall(i32),

    #[error("unknown opcode: {0}")]
    UnknownOpCode(i32),

    #[error("unexpected {0} message")]
    UnexpectedOpCode(OpCode),

    #[error("reply declared {declared} documents but carried {actual}")]
    ReplyCountMismatch { declared: i32, actual: usize },

    #[error("{remaining} unread bytes after {op_code} body")]
    TrailingBytes { op_code: OpCode, remaining: usize },

    #[error("document decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("document encode error: {0}")]
    Encode(#[from] EncodeError),
}
