//! Element type codes.
//!
//! Every [`Value`](crate::Value) variant owns exactly one type code. The
//! decoder resolves an incoming code through [`ElementType::try_from`]; codes
//! outside this table are rejected rather than skipped.

use std::fmt;

/// Wire discriminator for a document element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ElementType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    /// Deprecated.
    Undefined = 0x06,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    /// Deprecated.
    DbPointer = 0x0C,
    Code = 0x0D,
    Symbol = 0x0E,
    CodeWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    MaxKey = 0x7F,
    MinKey = 0xFF,
}

impl ElementType {
    /// Returns the one-byte code written before the element key.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Returns whether the type is only kept for reading legacy data.
    pub fn is_deprecated(self) -> bool {
        matches!(self, ElementType::Undefined | ElementType::DbPointer)
    }
}

impl TryFrom<u8> for ElementType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(ElementType::Double),
            0x02 => Ok(ElementType::String),
            0x03 => Ok(ElementType::Document),
            0x04 => Ok(ElementType::Array),
            0x05 => Ok(ElementType::Binary),
            0x06 => Ok(ElementType::Undefined),
            0x07 => Ok(ElementType::ObjectId),
            0x08 => Ok(ElementType::Boolean),
            0x09 => Ok(ElementType::DateTime),
            0x0A => Ok(ElementType::Null),
            0x0B => Ok(ElementType::Regex),
            0x0C => Ok(ElementType::DbPointer),
            0x0D => Ok(ElementType::Code),
            0x0E => Ok(ElementType::Symbol),
            0x0F => Ok(ElementType::CodeWithScope),
            0x10 => Ok(ElementType::Int32),
            0x11 => Ok(ElementType::Timestamp),
            0x12 => Ok(ElementType::Int64),
            0x7F => Ok(ElementType::MaxKey),
            0xFF => Ok(ElementType::MinKey),
            other => Err(other),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::Double => "double",
            ElementType::String => "string",
            ElementType::Document => "document",
            ElementType::Array => "array",
            ElementType::Binary => "binary",
            ElementType::Undefined => "undefined",
            ElementType::ObjectId => "objectId",
            ElementType::Boolean => "bool",
            ElementType::DateTime => "date",
            ElementType::Null => "null",
            ElementType::Regex => "regex",
            ElementType::DbPointer => "dbPointer",
            ElementType::Code => "javascript",
            ElementType::Symbol => "symbol",
            ElementType::CodeWithScope => "javascriptWithScope",
            ElementType::Int32 => "int",
            ElementType::Timestamp => "timestamp",
            ElementType::Int64 => "long",
            ElementType::MaxKey => "maxKey",
            ElementType::MinKey => "minKey",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique_and_roundtrip() {
        let mut seen = std::collections::HashSet::new();
        for code in 0..=255u8 {
            if let Ok(ty) = ElementType::try_from(code) {
                assert_eq!(ty.code(), code);
                assert!(seen.insert(ty), "duplicate mapping for {ty}");
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn test_unknown_codes_rejected() {
        assert_eq!(ElementType::try_from(0x00), Err(0x00));
        assert_eq!(ElementType::try_from(0x13), Err(0x13));
        assert_eq!(ElementType::try_from(0x80), Err(0x80));
    }

    #[test]
    fn test_deprecated_types() {
        assert!(ElementType::DbPointer.is_deprecated());
        assert!(ElementType::Undefined.is_deprecated());
        assert!(!ElementType::Symbol.is_deprecated());
        assert!(!ElementType::Code.is_deprecated());
    }
}
