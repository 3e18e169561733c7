//! Bounded decoder.
//!
//! Reads never go past the slice the decoder was built over. Nested
//! documents are decoded by a child decoder limited to the declared length,
//! so a corrupt inner length cannot make the parent read beyond its own
//! bounds. Nesting is capped at [`MAX_NESTING_DEPTH`] so hostile input
//! fails with an error instead of exhausting the stack.

use crate::document::Document;
use crate::element::ElementType;
use crate::error::DecodeError;
use crate::oid::ObjectId;
use crate::value::{Binary, BinarySubtype, CodeWithScope, DbPointer, Regex, RegexOptions};
use crate::value::{Timestamp, Value};
use chrono::DateTime;

/// Smallest valid document: length prefix plus terminator.
pub const MIN_DOCUMENT_SIZE: i32 = 5;

/// Deepest level of embedded documents, arrays or scopes accepted below
/// the top-level document.
pub const MAX_NESTING_DEPTH: usize = 100;

/// Cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Absolute offset of `buf[0]`, used in error reports.
    base: usize,
    /// Nesting level of the document being read.
    depth: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            base: 0,
            depth: 0,
        }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                offset: self.offset(),
                needed: n,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_byte(&mut self) -> Result<u8, DecodeError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_int32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_int64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_double(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    /// Reads bytes up to and including the next null, returning them without it.
    pub fn read_cstring_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let start = self.offset();
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(DecodeError::MissingNullTerminator(start))?;
        self.pos += nul + 1;
        Ok(&rest[..nul])
    }

    pub fn read_cstring(&mut self) -> Result<String, DecodeError> {
        let start = self.offset();
        let bytes = self.read_cstring_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// Reads an int32-length-prefixed, null-terminated UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let start = self.offset();
        let length = self.read_int32()?;
        if length < 1 {
            return Err(DecodeError::InvalidLength {
                offset: start,
                length,
            });
        }
        let bytes = self.read_bytes(length as usize)?;
        let body = match bytes.split_last() {
            Some((0, body)) => body,
            _ => return Err(DecodeError::MissingNullTerminator(start)),
        };
        std::str::from_utf8(body)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8(start + 4))
    }

    pub fn read_document(&mut self) -> Result<Document, DecodeError> {
        let mut document = Document::new();
        self.read_elements(|key, value| {
            document.insert(key, value);
        })?;
        Ok(document)
    }

    /// Reads a document and keeps its values in order, ignoring the keys.
    pub fn read_array_document(&mut self) -> Result<Vec<Value>, DecodeError> {
        let mut values = Vec::new();
        self.read_elements(|_, value| values.push(value))?;
        Ok(values)
    }

    /// Reads the payload of an element of the given type.
    pub fn read_value(&mut self, element_type: ElementType) -> Result<Value, DecodeError> {
        let value = match element_type {
            ElementType::Double => Value::Double(self.read_double()?),
            ElementType::String => Value::String(self.read_string()?),
            ElementType::Document => Value::Document(self.read_document()?),
            ElementType::Array => Value::Array(self.read_array_document()?),
            ElementType::Binary => Value::Binary(self.read_binary()?),
            ElementType::Undefined => Value::Undefined,
            ElementType::ObjectId => Value::ObjectId(ObjectId::from_bytes(self.read_array()?)),
            ElementType::Boolean => {
                let offset = self.offset();
                match self.read_byte()? {
                    0 => Value::Boolean(false),
                    1 => Value::Boolean(true),
                    value => return Err(DecodeError::InvalidBoolean { offset, value }),
                }
            }
            ElementType::DateTime => {
                let millis = self.read_int64()?;
                let seconds = millis.div_euclid(1000);
                let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
                let time = DateTime::from_timestamp(seconds, nanos)
                    .ok_or(DecodeError::InvalidDateTime(millis))?;
                Value::DateTime(time)
            }
            ElementType::Null => Value::Null,
            ElementType::Regex => {
                let pattern = self.read_cstring()?;
                let options = RegexOptions::from_letters(self.read_cstring_bytes()?);
                Value::Regex(Regex { pattern, options })
            }
            ElementType::DbPointer => {
                let namespace = self.read_string()?;
                let id = ObjectId::from_bytes(self.read_array()?);
                Value::DbPointer(DbPointer { namespace, id })
            }
            ElementType::Code => Value::Code(self.read_string()?),
            ElementType::Symbol => Value::Symbol(self.read_string()?),
            ElementType::CodeWithScope => Value::CodeWithScope(self.read_code_with_scope()?),
            ElementType::Int32 => Value::Int32(self.read_int32()?),
            ElementType::Timestamp => Value::Timestamp(Timestamp(self.read_array()?)),
            ElementType::Int64 => Value::Int64(self.read_int64()?),
            ElementType::MinKey => Value::MinKey,
            ElementType::MaxKey => Value::MaxKey,
        };
        Ok(value)
    }

    fn read_elements<F>(&mut self, mut on_element: F) -> Result<(), DecodeError>
    where
        F: FnMut(String, Value),
    {
        let start = self.offset();
        if self.depth > MAX_NESTING_DEPTH {
            return Err(DecodeError::TooDeep {
                offset: start,
                limit: MAX_NESTING_DEPTH,
            });
        }
        let length = self.read_int32()?;
        if length < MIN_DOCUMENT_SIZE {
            return Err(DecodeError::InvalidLength {
                offset: start,
                length,
            });
        }
        let body = self.read_bytes(length as usize - 4)?;
        let mut inner = Decoder {
            buf: body,
            pos: 0,
            base: start + 4,
            depth: self.depth + 1,
        };

        loop {
            let code_offset = inner.offset();
            let code = inner.read_byte()?;
            if code == 0 {
                break;
            }
            let element_type = ElementType::try_from(code).map_err(|code| {
                DecodeError::UnknownType {
                    offset: code_offset,
                    code,
                }
            })?;
            let key = inner.read_cstring()?;
            let value = inner.read_value(element_type)?;
            on_element(key, value);
        }

        if !inner.is_empty() {
            return Err(DecodeError::LengthMismatch {
                offset: start,
                declared: length as usize,
                actual: inner.position() + 4,
            });
        }
        Ok(())
    }

    fn read_binary(&mut self) -> Result<Binary, DecodeError> {
        let start = self.offset();
        let mut length = self.read_int32()?;
        if length < 0 {
            return Err(DecodeError::InvalidBinaryLength {
                offset: start,
                length,
            });
        }
        let subtype = BinarySubtype::from(self.read_byte()?);
        if subtype == BinarySubtype::Old {
            // Redundant inner length; the outer one counts it.
            self.read_int32()?;
            length -= 4;
            if length < 0 {
                return Err(DecodeError::InvalidBinaryLength {
                    offset: start,
                    length,
                });
            }
        }
        let bytes = self.read_bytes(length as usize)?.to_vec();
        Ok(Binary { subtype, bytes })
    }

    fn read_code_with_scope(&mut self) -> Result<CodeWithScope, DecodeError> {
        let start = self.offset();
        let before = self.pos;
        let total = self.read_int32()?;
        let code = self.read_string()?;
        let scope = self.read_document()?;
        let actual = self.pos - before;
        if total < 0 || total as usize != actual {
            return Err(DecodeError::LengthMismatch {
                offset: start,
                declared: total.max(0) as usize,
                actual,
            });
        }
        Ok(CodeWithScope { code, scope })
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }
}
