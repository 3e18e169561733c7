//! Message header and opcodes.
//!
//! Every message starts with a 16-byte little-endian header:
//!
//! ```text
//! +----------------+------------+-------------+---------+
//! | message_length | request_id | response_to | op_code |
//! |   4 bytes      |  4 bytes   |   4 bytes   | 4 bytes |
//! +----------------+------------+-------------+---------+
//! | body: message_length - 16 bytes                      |
//! +------------------------------------------------------+
//! ```

use crate::error::ProtocolError;
use crate::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use std::fmt;

/// Operation codes understood by this implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for OpCode {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Reply),
            2001 => Ok(OpCode::Update),
            2002 => Ok(OpCode::Insert),
            2004 => Ok(OpCode::Query),
            2005 => Ok(OpCode::GetMore),
            2006 => Ok(OpCode::Delete),
            2007 => Ok(OpCode::KillCursors),
            other => Err(ProtocolError::UnknownOpCode(other)),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OpCode::Reply => "REPLY",
            OpCode::Update => "UPDATE",
            OpCode::Insert => "INSERT",
            OpCode::Query => "QUERY",
            OpCode::GetMore => "GET_MORE",
            OpCode::Delete => "DELETE",
            OpCode::KillCursors => "KILL_CURSORS",
        };
        f.write_str(name)
    }
}

/// A parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Total message length, header included.
    pub length: i32,
    pub request_id: i32,
    /// Request id this message answers, zero for requests.
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    /// Parses and validates a header.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let field = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        let length = field(0);
        if length < HEADER_SIZE as i32 {
            return Err(ProtocolError::MessageTooSmall(length));
        }
        if length as u32 > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length as u32,
                max: MAX_MESSAGE_SIZE,
            });
        }

        Ok(Self {
            length,
            request_id: field(4),
            response_to: field(8),
            op_code: OpCode::try_from(field(12))?,
        })
    }

    /// Length of the body following the header.
    pub fn body_len(&self) -> usize {
        self.length as usize - HEADER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(length: i32, request_id: i32, response_to: i32, op: i32) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&length.to_le_bytes());
        out[4..8].copy_from_slice(&request_id.to_le_bytes());
        out[8..12].copy_from_slice(&response_to.to_le_bytes());
        out[12..16].copy_from_slice(&op.to_le_bytes());
        out
    }

    #[test]
    fn test_parse_header() {
        let header = MessageHeader::parse(&header_bytes(36, 7, 3, 1)).unwrap();
        assert_eq!(header.length, 36);
        assert_eq!(header.request_id, 7);
        assert_eq!(header.response_to, 3);
        assert_eq!(header.op_code, OpCode::Reply);
        assert_eq!(header.body_len(), 20);
    }

    #[test]
    fn test_opcode_values() {
        for op in [
            OpCode::Reply,
            OpCode::Update,
            OpCode::Insert,
            OpCode::Query,
            OpCode::GetMore,
            OpCode::Delete,
            OpCode::KillCursors,
        ] {
            assert_eq!(OpCode::try_from(op.code()).unwrap(), op);
        }
        assert_eq!(OpCode::Query.code(), 2004);
        assert!(matches!(
            OpCode::try_from(2013),
            Err(ProtocolError::UnknownOpCode(2013))
        ));
    }

    #[test]
    fn test_header_length_bounds() {
        assert!(matches!(
            MessageHeader::parse(&header_bytes(15, 0, 0, 1)),
            Err(ProtocolError::MessageTooSmall(15))
        ));
        assert!(matches!(
            MessageHeader::parse(&header_bytes(-1, 0, 0, 1)),
            Err(ProtocolError::MessageTooSmall(-1))
        ));
        assert!(matches!(
            MessageHeader::parse(&header_bytes(MAX_MESSAGE_SIZE as i32 + 1, 0, 0, 1)),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
