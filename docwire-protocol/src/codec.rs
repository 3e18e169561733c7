//! Buffered message decoder for partial socket reads.

use crate::error::ProtocolError;
use crate::header::MessageHeader;
use crate::message::{Operation, Reply};
use crate::HEADER_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// Accumulates bytes and yields complete messages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to split the next complete message off the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed. The header is validated as
    /// soon as its 16 bytes are present.
    pub fn decode_message(&mut self) -> Result<Option<(MessageHeader, Bytes)>, ProtocolError> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&self.buffer[..HEADER_SIZE]);
        let header = MessageHeader::parse(&raw)?;

        if self.buffer.len() < header.length as usize {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let body = self.buffer.split_to(header.body_len()).freeze();
        Ok(Some((header, body)))
    }

    /// Attempts to decode the next reply from the buffer.
    pub fn decode_reply(&mut self) -> Result<Option<Reply>, ProtocolError> {
        match self.decode_message()? {
            Some((header, body)) => Ok(Some(Reply::decode(&header, &body)?)),
            None => Ok(None),
        }
    }

    /// Attempts to decode the next request from the buffer.
    pub fn decode_operation(&mut self) -> Result<Option<(MessageHeader, Operation)>, ProtocolError> {
        match self.decode_message()? {
            Some((header, body)) => {
                let operation = Operation::decode(&header, &body)?;
                Ok(Some((header, operation)))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
