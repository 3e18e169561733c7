//! Codec error types.

use thiserror::Error;

/// Errors raised while decoding malformed binary input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("truncated input at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("invalid document length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: i32 },

    #[error("document at offset {offset} declared {declared} bytes but used {actual}")]
    LengthMismatch {
        offset: usize,
        declared: usize,
        actual: usize,
    },

    #[error("missing null terminator for cstring at offset {0}")]
    MissingNullTerminator(usize),

    #[error("unknown element type code {code:#04x} at offset {offset}")]
    UnknownType { offset: usize, code: u8 },

    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("invalid boolean byte {value:#04x} at offset {offset}")]
    InvalidBoolean { offset: usize, value: u8 },

    #[error("date time {0} ms is outside the representable range")]
    InvalidDateTime(i64),

    #[error("invalid binary length {length} at offset {offset}")]
    InvalidBinaryLength { offset: usize, length: i32 },

    #[error("document at offset {offset} nested deeper than {limit} levels")]
    TooDeep { offset: usize, limit: usize },
}

/// Errors raised while encoding a value that cannot be represented on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    #[error("cstring must not contain a null byte: {0:?}")]
    NullInCString(String),

    #[error("integer {value} does not fit in a {bits}-bit signed integer")]
    IntegerOutOfRange { value: i128, bits: u8 },

    #[error("{0} called with no open scope")]
    NoOpenScope(&'static str),

    #[error("{0} scope(s) still open when flushing")]
    UnclosedScope(usize),

    #[error("encoded length {0} exceeds the 32-bit length prefix")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::UnknownType {
            offset: 4,
            code: 0x42,
        };
        assert!(err.to_string().contains("0x42"));

        let err = DecodeError::Truncated {
            offset: 10,
            needed: 4,
            available: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("need 4"));

        let err = DecodeError::MissingNullTerminator(7);
        assert!(err.to_string().contains("null terminator"));
    }

    #[test]
    fn test_encode_error_display() {
        let err = EncodeError::IntegerOutOfRange {
            value: 1 << 31,
            bits: 32,
        };
        let msg = err.to_string();
        assert!(msg.contains("2147483648"));
        assert!(msg.contains("32-bit"));

        let err = EncodeError::NullInCString("a\0b".to_string());
        assert!(err.to_string().contains("null byte"));
    }
}
