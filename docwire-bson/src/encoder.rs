//! Scope-stack encoder.
//!
//! Every document, array, code-with-scope block and wire message starts with
//! a 32-bit length that is only known once its contents are written. Opening
//! one of those pushes a scope that reserves four bytes; closing it patches
//! the reserved bytes with the scope's byte count and adds that count to the
//! enclosing scope. Scopes nest to any depth.
//!
//! ```text
//! document := int32 total_length, element*, 0x00
//! element  := byte type_code, cstring key, payload
//! ```

use crate::document::Document;
use crate::error::EncodeError;
use crate::value::{Binary, BinarySubtype, Value};

#[derive(Debug)]
struct Scope {
    /// Offset of the reserved length prefix.
    start: usize,
    /// Bytes written inside this scope, including its own prefix.
    length: usize,
}

/// Writes values into a growable buffer, back-patching length prefixes.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    scopes: Vec<Scope>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Opens a length-prefixed document scope.
    pub fn begin_document(&mut self) {
        self.scopes.push(Scope {
            start: self.buf.len(),
            length: 0,
        });
        self.write_raw(&[0; 4]);
    }

    /// Opens a length-prefixed scope that is not null-terminated.
    ///
    /// Used for wire messages and for code-with-scope payloads.
    pub fn begin_message(&mut self) {
        self.begin_document();
    }

    /// Closes the innermost scope opened by [`begin_message`](Self::begin_message).
    pub fn end_message(&mut self) -> Result<(), EncodeError> {
        self.close_scope("end_message")
    }

    /// Writes the trailing null byte and closes the innermost scope.
    pub fn end_document(&mut self) -> Result<(), EncodeError> {
        if self.scopes.is_empty() {
            return Err(EncodeError::NoOpenScope("end_document"));
        }
        self.write_null_byte();
        self.close_scope("end_document")
    }

    /// Takes the encoded bytes, leaving the encoder empty.
    pub fn flush(&mut self) -> Result<Vec<u8>, EncodeError> {
        if !self.scopes.is_empty() {
            return Err(EncodeError::UnclosedScope(self.scopes.len()));
        }
        Ok(std::mem::take(&mut self.buf))
    }

    /// Writes a null-terminated string. Must be UTF-8 without embedded nulls.
    pub fn write_cstring(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let s = std::str::from_utf8(bytes).map_err(|_| EncodeError::InvalidUtf8)?;
        if bytes.contains(&0) {
            return Err(EncodeError::NullInCString(s.to_string()));
        }
        self.write_raw(bytes);
        self.write_null_byte();
        Ok(())
    }

    /// Writes an int32 length (including the terminator), the bytes and a null.
    pub fn write_string(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        std::str::from_utf8(bytes).map_err(|_| EncodeError::InvalidUtf8)?;
        let length = i32::try_from(bytes.len() + 1)
            .map_err(|_| EncodeError::TooLarge(bytes.len() + 1))?;
        self.write_raw(&length.to_le_bytes());
        self.write_raw(bytes);
        self.write_null_byte();
        Ok(())
    }

    pub fn write_int32(&mut self, value: i64) -> Result<(), EncodeError> {
        let v = i32::try_from(value).map_err(|_| EncodeError::IntegerOutOfRange {
            value: i128::from(value),
            bits: 32,
        })?;
        self.write_raw(&v.to_le_bytes());
        Ok(())
    }

    pub fn write_int64(&mut self, value: i128) -> Result<(), EncodeError> {
        let v = i64::try_from(value)
            .map_err(|_| EncodeError::IntegerOutOfRange { value, bits: 64 })?;
        self.write_raw(&v.to_le_bytes());
        Ok(())
    }

    pub fn write_double(&mut self, value: f64) {
        self.write_raw(&value.to_le_bytes());
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.write_raw(&[byte]);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_raw(bytes);
    }

    pub fn write_null_byte(&mut self) {
        self.write_raw(&[0]);
    }

    pub fn write_document(&mut self, document: &Document) -> Result<(), EncodeError> {
        self.begin_document();
        for (key, value) in document.iter() {
            self.write_element(key.as_bytes(), value)?;
        }
        self.end_document()
    }

    /// Arrays are documents keyed "0", "1", "2", ...
    pub fn write_array(&mut self, values: &[Value]) -> Result<(), EncodeError> {
        self.begin_document();
        for (index, value) in values.iter().enumerate() {
            self.write_element(index.to_string().as_bytes(), value)?;
        }
        self.end_document()
    }

    pub fn write_element(&mut self, key: &[u8], value: &Value) -> Result<(), EncodeError> {
        let element_type = value.element_type();
        if element_type.is_deprecated() {
            tracing::warn!(
                key = %String::from_utf8_lossy(key),
                "encoding deprecated {} element",
                element_type
            );
        }
        self.write_byte(element_type.code());
        self.write_cstring(key)?;
        self.write_value(value)
    }

    /// Writes the payload of `value` without a type code or key.
    pub fn write_value(&mut self, value: &Value) -> Result<(), EncodeError> {
        match value {
            Value::Double(v) => self.write_double(*v),
            Value::String(s) | Value::Code(s) | Value::Symbol(s) => {
                self.write_string(s.as_bytes())?
            }
            Value::Document(d) => self.write_document(d)?,
            Value::Array(values) => self.write_array(values)?,
            Value::Binary(binary) => self.write_binary(binary)?,
            Value::Undefined | Value::Null | Value::MinKey | Value::MaxKey => {}
            Value::ObjectId(id) => self.write_bytes(&id.bytes()),
            Value::Boolean(b) => self.write_byte(u8::from(*b)),
            Value::DateTime(time) => self.write_int64(i128::from(time.timestamp_millis()))?,
            Value::Regex(regex) => {
                self.write_cstring(regex.pattern.as_bytes())?;
                self.write_bytes(regex.options.letters().as_bytes());
                self.write_null_byte();
            }
            Value::DbPointer(pointer) => {
                self.write_string(pointer.namespace.as_bytes())?;
                self.write_bytes(&pointer.id.bytes());
            }
            Value::CodeWithScope(code) => {
                self.begin_message();
                self.write_string(code.code.as_bytes())?;
                self.write_document(&code.scope)?;
                self.end_message()?;
            }
            Value::Int32(v) => self.write_int32(i64::from(*v))?,
            Value::Timestamp(ts) => self.write_bytes(&ts.0),
            Value::Int64(v) => self.write_int64(i128::from(*v))?,
        }
        Ok(())
    }

    fn write_binary(&mut self, binary: &Binary) -> Result<(), EncodeError> {
        let length = binary.bytes.len() as i64;
        if binary.subtype == BinarySubtype::Old {
            // The old subtype repeats the payload length inside the payload.
            self.write_int32(length + 4)?;
            self.write_byte(binary.subtype.into());
            self.write_int32(length)?;
        } else {
            self.write_int32(length)?;
            self.write_byte(binary.subtype.into());
        }
        self.write_bytes(&binary.bytes);
        Ok(())
    }

    fn close_scope(&mut self, operation: &'static str) -> Result<(), EncodeError> {
        let scope = self
            .scopes
            .pop()
            .ok_or(EncodeError::NoOpenScope(operation))?;
        let length =
            i32::try_from(scope.length).map_err(|_| EncodeError::TooLarge(scope.length))?;
        self.buf[scope.start..scope.start + 4].copy_from_slice(&length.to_le_bytes());

        if let Some(parent) = self.scopes.last_mut() {
            parent.length += scope.length;
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        if let Some(scope) = self.scopes.last_mut() {
            scope.length += bytes.len();
        }
    }
}
