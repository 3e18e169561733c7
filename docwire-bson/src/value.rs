//! The closed set of values a document can hold.

use crate::document::Document;
use crate::element::ElementType;
use crate::error::EncodeError;
use crate::oid::ObjectId;
use chrono::{DateTime, Utc};

/// A single document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Document),
    /// Elements in index order; the stringified keys only exist on the wire.
    Array(Vec<Value>),
    Binary(Binary),
    /// Deprecated; decoded for compatibility with old data.
    Undefined,
    ObjectId(ObjectId),
    Boolean(bool),
    /// Millisecond resolution on the wire.
    DateTime(DateTime<Utc>),
    Null,
    Regex(Regex),
    /// Deprecated; decoded for compatibility with old data.
    DbPointer(DbPointer),
    Code(String),
    Symbol(String),
    CodeWithScope(CodeWithScope),
    Int32(i32),
    Timestamp(Timestamp),
    Int64(i64),
    MinKey,
    MaxKey,
}

impl Value {
    /// Returns the wire type code of this value.
    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Double(_) => ElementType::Double,
            Value::String(_) => ElementType::String,
            Value::Document(_) => ElementType::Document,
            Value::Array(_) => ElementType::Array,
            Value::Binary(_) => ElementType::Binary,
            Value::Undefined => ElementType::Undefined,
            Value::ObjectId(_) => ElementType::ObjectId,
            Value::Boolean(_) => ElementType::Boolean,
            Value::DateTime(_) => ElementType::DateTime,
            Value::Null => ElementType::Null,
            Value::Regex(_) => ElementType::Regex,
            Value::DbPointer(_) => ElementType::DbPointer,
            Value::Code(_) => ElementType::Code,
            Value::Symbol(_) => ElementType::Symbol,
            Value::CodeWithScope(_) => ElementType::CodeWithScope,
            Value::Int32(_) => ElementType::Int32,
            Value::Timestamp(_) => ElementType::Timestamp,
            Value::Int64(_) => ElementType::Int64,
            Value::MinKey => ElementType::MinKey,
            Value::MaxKey => ElementType::MaxKey,
        }
    }

    /// Picks the narrowest integer representation for `value`.
    ///
    /// Values inside the signed 32-bit range (inclusive) become `Int32`,
    /// values inside the signed 64-bit range become `Int64`, anything else is
    /// rejected.
    pub fn from_integer(value: i128) -> Result<Self, EncodeError> {
        if let Ok(v) = i32::try_from(value) {
            Ok(Value::Int32(v))
        } else if let Ok(v) = i64::try_from(value) {
            Ok(Value::Int64(v))
        } else {
            Err(EncodeError::IntegerOutOfRange { value, bits: 64 })
        }
    }

    /// Numeric view over `Double`, `Int32` and `Int64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view over `Int32` and `Int64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// `Null`, `Undefined` and `false` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Undefined | Value::Boolean(false))
    }
}

/// Binary payload subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinarySubtype {
    Generic,
    Function,
    /// Legacy subtype carrying a redundant inner length prefix on the wire.
    Old,
    Uuid,
    Md5,
    /// User-defined subtypes, 0x80 to 0xFF.
    User(u8),
    Other(u8),
}

impl From<u8> for BinarySubtype {
    fn from(value: u8) -> Self {
        match value {
            0x00 => BinarySubtype::Generic,
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::Old,
            0x03 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            0x80..=0xFF => BinarySubtype::User(value),
            other => BinarySubtype::Other(other),
        }
    }
}

impl From<BinarySubtype> for u8 {
    fn from(subtype: BinarySubtype) -> Self {
        match subtype {
            BinarySubtype::Generic => 0x00,
            BinarySubtype::Function => 0x01,
            BinarySubtype::Old => 0x02,
            BinarySubtype::Uuid => 0x03,
            BinarySubtype::Md5 => 0x05,
            BinarySubtype::User(b) | BinarySubtype::Other(b) => b,
        }
    }
}

/// Binary data with its subtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    pub subtype: BinarySubtype,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(subtype: BinarySubtype, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            subtype,
            bytes: bytes.into(),
        }
    }

    pub fn generic(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(BinarySubtype::Generic, bytes)
    }
}

/// Regular expression option bits.
///
/// `m` and `s` both map to [`RegexOptions::MULTILINE`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegexOptions(u8);

impl RegexOptions {
    pub const IGNORE_CASE: u8 = 1 << 0;
    pub const MULTILINE: u8 = 1 << 1;
    pub const EXTENDED: u8 = 1 << 2;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_ignore_case(mut self) -> Self {
        self.0 |= Self::IGNORE_CASE;
        self
    }

    pub fn with_multiline(mut self) -> Self {
        self.0 |= Self::MULTILINE;
        self
    }

    pub fn with_extended(mut self) -> Self {
        self.0 |= Self::EXTENDED;
        self
    }

    pub fn is_ignore_case(&self) -> bool {
        self.0 & Self::IGNORE_CASE != 0
    }

    pub fn is_multiline(&self) -> bool {
        self.0 & Self::MULTILINE != 0
    }

    pub fn is_extended(&self) -> bool {
        self.0 & Self::EXTENDED != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Parses wire option letters. Unrecognised letters are ignored.
    pub fn from_letters(letters: &[u8]) -> Self {
        letters.iter().fold(Self::new(), |options, letter| match letter {
            b'i' => options.with_ignore_case(),
            b'm' | b's' => options.with_multiline(),
            b'x' => options.with_extended(),
            _ => options,
        })
    }

    /// Wire option letters, in the order they are written.
    pub fn letters(&self) -> String {
        let mut out = String::new();
        if self.is_ignore_case() {
            out.push('i');
        }
        if self.is_multiline() {
            out.push_str("ms");
        }
        if self.is_extended() {
            out.push('x');
        }
        out
    }
}

/// A regular expression as stored on the wire. The pattern is not compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Regex {
    pub pattern: String,
    pub options: RegexOptions,
}

impl Regex {
    pub fn new(pattern: impl Into<String>, options: RegexOptions) -> Self {
        Self {
            pattern: pattern.into(),
            options,
        }
    }
}

/// JavaScript code bundled with a scope document.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeWithScope {
    pub code: String,
    pub scope: Document,
}

/// Legacy reference to a document in another collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPointer {
    pub namespace: String,
    pub id: ObjectId,
}

/// Internal replication timestamp, kept as its raw 8 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp(pub [u8; 8]);

impl Timestamp {
    pub fn new(time: u32, increment: u32) -> Self {
        let raw = (u64::from(time) << 32) | u64::from(increment);
        Self(raw.to_le_bytes())
    }

    /// Seconds since the epoch (high 32 bits).
    pub fn time(&self) -> u32 {
        (u64::from_le_bytes(self.0) >> 32) as u32
    }

    /// Ordinal within the second (low 32 bits).
    pub fn increment(&self) -> u32 {
        u64::from_le_bytes(self.0) as u32
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Value::Document(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Value::ObjectId(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Binary> for Value {
    fn from(v: Binary) -> Self {
        Value::Binary(v)
    }
}

impl From<Regex> for Value {
    fn from(v: Regex) -> Self {
        Value::Regex(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
