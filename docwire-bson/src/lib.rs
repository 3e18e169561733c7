//! Binary document codec.
//!
//! Documents are ordered key/value maps serialized as length-prefixed,
//! little-endian records:
//!
//! ```text
//! +------------------+-----------------------------+------+
//! | total length i32 | element* (type, key, value) | 0x00 |
//! +------------------+-----------------------------+------+
//! ```
//!
//! [`encode`] and [`decode`] cover the common case. [`Encoder`] and
//! [`Decoder`] expose the low-level reads and writes the wire protocol is
//! built from.

pub mod decoder;
pub mod document;
pub mod element;
pub mod encoder;
pub mod error;
mod json;
pub mod oid;
pub mod value;

pub use decoder::{Decoder, MAX_NESTING_DEPTH};
pub use document::Document;
pub use element::ElementType;
pub use encoder::Encoder;
pub use error::{DecodeError, EncodeError};
pub use oid::{ObjectId, ParseObjectIdError};
pub use value::{
    Binary, BinarySubtype, CodeWithScope, DbPointer, Regex, RegexOptions, Timestamp, Value,
};

/// Encodes a document into a fresh buffer.
pub fn encode(document: &Document) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.write_document(document)?;
    encoder.flush()
}

/// Decodes one document from the front of `buf`.
///
/// Returns the document and the number of bytes it occupied; trailing bytes
/// are left untouched.
pub fn decode(buf: &[u8]) -> Result<(Document, usize), DecodeError> {
    let mut decoder = Decoder::new(buf);
    let document = decoder.read_document()?;
    Ok((document, decoder.position()))
}
