//! # docwire-protocol
//!
//! Wire messages for the document database protocol.
//!
//! This crate provides:
//! - The 16-byte message header and opcode table
//! - Query, GetMore, Insert, Update, Delete and KillCursors request bodies
//! - Reply parsing and encoding
//! - A buffered decoder for partial socket reads

pub mod codec;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;

pub use codec::Decoder;
pub use error::ProtocolError;
pub use flags::{DeleteFlags, InsertFlags, QueryFlags, ReplyFlags, UpdateFlags};
pub use header::{MessageHeader, OpCode};
pub use message::{Delete, GetMore, Insert, KillCursors, Operation, Query, Reply, Update};

/// Size of the message header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Default server port.
pub const DEFAULT_PORT: u16 = 27017;

/// Maximum accepted message size (48 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 48 * 1024 * 1024;
