//! Request bodies and replies.
//!
//! Body layouts after the header (all integers little-endian):
//!
//! ```text
//! QUERY        flags i32, ns cstring, skip i32, limit i32, selector doc, [fields doc]
//! GET_MORE     0 i32, ns cstring, limit i32, cursor_id i64
//! INSERT       flags i32, ns cstring, doc*
//! UPDATE       0 i32, ns cstring, flags i32, selector doc, update doc
//! DELETE       0 i32, ns cstring, flags i32, selector doc
//! KILL_CURSORS 0 i32, count i32, cursor_id i64 * count
//! REPLY        flags i32, cursor_id i64, starting_from i32, number_returned i32, doc*
//! ```

use crate::error::ProtocolError;
use crate::flags::{DeleteFlags, InsertFlags, QueryFlags, ReplyFlags, UpdateFlags};
use crate::header::{MessageHeader, OpCode};
use crate::MAX_MESSAGE_SIZE;
use docwire_bson::{Decoder, Document, Encoder};
use std::fmt;

/// A query, or a command when sent to `<db>.$cmd`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub namespace: String,
    pub flags: QueryFlags,
    pub skip: i32,
    /// Negative values ask the server to close the cursor after one batch.
    pub limit: i32,
    pub selector: Document,
    pub fields: Option<Document>,
}

impl Query {
    pub fn new(namespace: impl Into<String>, selector: Document) -> Self {
        Self {
            namespace: namespace.into(),
            flags: QueryFlags::new(),
            skip: 0,
            limit: 0,
            selector,
            fields: None,
        }
    }

    pub fn with_flags(mut self, flags: QueryFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_skip(mut self, skip: i32) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_fields(mut self, fields: Document) -> Self {
        self.fields = Some(fields);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMore {
    pub namespace: String,
    pub limit: i32,
    pub cursor_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub namespace: String,
    pub flags: InsertFlags,
    pub documents: Vec<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub namespace: String,
    pub flags: UpdateFlags,
    pub selector: Document,
    pub update: Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub namespace: String,
    pub flags: DeleteFlags,
    pub selector: Document,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursors {
    pub cursor_ids: Vec<i64>,
}

/// A client request.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Query(Query),
    GetMore(GetMore),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    KillCursors(KillCursors),
}

impl Operation {
    /// Builds a command: a single-batch query against `<database>.$cmd`.
    pub fn command(database: &str, command: Document) -> Self {
        Operation::Query(Query::new(format!("{database}.$cmd"), command).with_limit(-1))
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            Operation::Query(_) => OpCode::Query,
            Operation::GetMore(_) => OpCode::GetMore,
            Operation::Insert(_) => OpCode::Insert,
            Operation::Update(_) => OpCode::Update,
            Operation::Delete(_) => OpCode::Delete,
            Operation::KillCursors(_) => OpCode::KillCursors,
        }
    }

    /// Returns whether the server answers this operation with a Reply.
    pub fn expects_reply(&self) -> bool {
        matches!(self, Operation::Query(_) | Operation::GetMore(_))
    }

    /// Encodes the operation as a standalone message.
    pub fn encode(&self, request_id: i32) -> Result<Vec<u8>, ProtocolError> {
        let mut encoder = Encoder::new();
        self.encode_into(&mut encoder, request_id)?;
        Ok(encoder.flush()?)
    }

    /// Appends the operation as a message to `encoder`, so several messages
    /// can share one buffer.
    pub fn encode_into(&self, encoder: &mut Encoder, request_id: i32) -> Result<(), ProtocolError> {
        let start = encoder.len();
        write_header(encoder, request_id, 0, self.op_code())?;

        match self {
            Operation::Query(q) => {
                encoder.write_int32(q.flags.bits().into())?;
                encoder.write_cstring(q.namespace.as_bytes())?;
                encoder.write_int32(q.skip.into())?;
                encoder.write_int32(q.limit.into())?;
                encoder.write_document(&q.selector)?;
                if let Some(fields) = &q.fields {
                    encoder.write_document(fields)?;
                }
            }
            Operation::GetMore(g) => {
                encoder.write_int32(0)?;
                encoder.write_cstring(g.namespace.as_bytes())?;
                encoder.write_int32(g.limit.into())?;
                encoder.write_int64(g.cursor_id.into())?;
            }
            Operation::Insert(i) => {
                encoder.write_int32(i.flags.bits().into())?;
                encoder.write_cstring(i.namespace.as_bytes())?;
                for document in &i.documents {
                    encoder.write_document(document)?;
                }
            }
            Operation::Update(u) => {
                encoder.write_int32(0)?;
                encoder.write_cstring(u.namespace.as_bytes())?;
                encoder.write_int32(u.flags.bits().into())?;
                encoder.write_document(&u.selector)?;
                encoder.write_document(&u.update)?;
            }
            Operation::Delete(d) => {
                encoder.write_int32(0)?;
                encoder.write_cstring(d.namespace.as_bytes())?;
                encoder.write_int32(d.flags.bits().into())?;
                encoder.write_document(&d.selector)?;
            }
            Operation::KillCursors(k) => {
                encoder.write_int32(0)?;
                encoder.write_int32(k.cursor_ids.len() as i64)?;
                for id in &k.cursor_ids {
                    encoder.write_int64((*id).into())?;
                }
            }
        }

        encoder.end_message()?;
        check_size(encoder.len() - start)
    }

    /// Parses a request body. Used by servers and test doubles.
    pub fn decode(header: &MessageHeader, body: &[u8]) -> Result<Self, ProtocolError> {
        let mut d = Decoder::new(body);
        let operation = match header.op_code {
            OpCode::Query => {
                let flags = QueryFlags::from_bits(d.read_int32()?);
                let namespace = d.read_cstring()?;
                let skip = d.read_int32()?;
                let limit = d.read_int32()?;
                let selector = d.read_document()?;
                let fields = if d.is_empty() {
                    None
                } else {
                    Some(d.read_document()?)
                };
                Operation::Query(Query {
                    namespace,
                    flags,
                    skip,
                    limit,
                    selector,
                    fields,
                })
            }
            OpCode::GetMore => {
                d.read_int32()?;
                Operation::GetMore(GetMore {
                    namespace: d.read_cstring()?,
                    limit: d.read_int32()?,
                    cursor_id: d.read_int64()?,
                })
            }
            OpCode::Insert => {
                let flags = InsertFlags::from_bits(d.read_int32()?);
                let namespace = d.read_cstring()?;
                let mut documents = Vec::new();
                while !d.is_empty() {
                    documents.push(d.read_document()?);
                }
                Operation::Insert(Insert {
                    namespace,
                    flags,
                    documents,
                })
            }
            OpCode::Update => {
                d.read_int32()?;
                Operation::Update(Update {
                    namespace: d.read_cstring()?,
                    flags: UpdateFlags::from_bits(d.read_int32()?),
                    selector: d.read_document()?,
                    update: d.read_document()?,
                })
            }
            OpCode::Delete => {
                d.read_int32()?;
                Operation::Delete(Delete {
                    namespace: d.read_cstring()?,
                    flags: DeleteFlags::from_bits(d.read_int32()?),
                    selector: d.read_document()?,
                })
            }
            OpCode::KillCursors => {
                d.read_int32()?;
                let count = d.read_int32()?.max(0);
                let mut cursor_ids = Vec::new();
                for _ in 0..count {
                    cursor_ids.push(d.read_int64()?);
                }
                Operation::KillCursors(KillCursors { cursor_ids })
            }
            OpCode::Reply => return Err(ProtocolError::UnexpectedOpCode(OpCode::Reply)),
        };

        if !d.is_empty() {
            return Err(ProtocolError::TrailingBytes {
                op_code: header.op_code,
                remaining: d.remaining(),
            });
        }
        Ok(operation)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Query(q) => {
                write!(
                    f,
                    "QUERY ns={} selector={} flags={:#x} skip={} limit={}",
                    q.namespace,
                    q.selector,
                    q.flags.bits(),
                    q.skip,
                    q.limit
                )?;
                if let Some(fields) = &q.fields {
                    write!(f, " fields={fields}")?;
                }
                Ok(())
            }
            Operation::GetMore(g) => write!(
                f,
                "GET_MORE ns={} cursor_id={} limit={}",
                g.namespace, g.cursor_id, g.limit
            ),
            Operation::Insert(i) => write!(
                f,
                "INSERT ns={} documents={} flags={:#x}",
                i.namespace,
                i.documents.len(),
                i.flags.bits()
            ),
            Operation::Update(u) => write!(
                f,
                "UPDATE ns={} selector={} update={} flags={:#x}",
                u.namespace,
                u.selector,
                u.update,
                u.flags.bits()
            ),
            Operation::Delete(d) => write!(
                f,
                "DELETE ns={} selector={} flags={:#x}",
                d.namespace,
                d.selector,
                d.flags.bits()
            ),
            Operation::KillCursors(k) => write!(f, "KILL_CURSORS cursor_ids={:?}", k.cursor_ids),
        }
    }
}

/// A server reply to a Query or GetMore.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    /// Request id this reply answered, as read from its header.
    pub response_to: i32,
    pub flags: ReplyFlags,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            ..Self::default()
        }
    }

    pub fn with_flags(mut self, flags: ReplyFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cursor_id(mut self, cursor_id: i64) -> Self {
        self.cursor_id = cursor_id;
        self
    }

    pub fn first(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub fn into_first(self) -> Option<Document> {
        self.documents.into_iter().next()
    }

    pub fn is_query_failure(&self) -> bool {
        self.flags.is_query_failure()
    }

    /// Encodes the reply as an answer to request `response_to`.
    pub fn encode(&self, response_to: i32) -> Result<Vec<u8>, ProtocolError> {
        let mut encoder = Encoder::new();
        write_header(&mut encoder, 0, response_to, OpCode::Reply)?;
        encoder.write_int32(self.flags.bits().into())?;
        encoder.write_int64(self.cursor_id.into())?;
        encoder.write_int32(self.starting_from.into())?;
        encoder.write_int32(self.documents.len() as i64)?;
        for document in &self.documents {
            encoder.write_document(document)?;
        }
        encoder.end_message()?;
        let bytes = encoder.flush()?;
        check_size(bytes.len())?;
        Ok(bytes)
    }

    pub fn decode(header: &MessageHeader, body: &[u8]) -> Result<Self, ProtocolError> {
        if header.op_code != OpCode::Reply {
            return Err(ProtocolError::UnexpectedOpCode(header.op_code));
        }

        let mut d = Decoder::new(body);
        let flags = ReplyFlags::from_bits(d.read_int32()?);
        let cursor_id = d.read_int64()?;
        let starting_from = d.read_int32()?;
        let number_returned = d.read_int32()?;

        let mut documents = Vec::new();
        while !d.is_empty() {
            documents.push(d.read_document()?);
        }
        if number_returned < 0 || number_returned as usize != documents.len() {
            return Err(ProtocolError::ReplyCountMismatch {
                declared: number_returned,
                actual: documents.len(),
            });
        }

        Ok(Self {
            response_to: header.response_to,
            flags,
            cursor_id,
            starting_from,
            documents,
        })
    }
}

fn write_header(
    encoder: &mut Encoder,
    request_id: i32,
    response_to: i32,
    op_code: OpCode,
) -> Result<(), ProtocolError> {
    encoder.begin_message();
    encoder.write_int32(request_id.into())?;
    encoder.write_int32(response_to.into())?;
    encoder.write_int32(op_code.code().into())?;
    Ok(())
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge {
            size: size.min(u32::MAX as usize) as u32,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HEADER_SIZE;
    use docwire_bson::doc;

    fn split(bytes: &[u8]) -> (MessageHeader, &[u8]) {
        let mut raw = [0u8; HEADER_SIZE];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        let header = MessageHeader::parse(&raw).unwrap();
        assert_eq!(header.length as usize, bytes.len());
        (header, &bytes[HEADER_SIZE..])
    }

    #[test]
    fn test_command_layout() {
        let op = Operation::command("admin", doc! { "ismaster" => 1 });
        let bytes = op.encode(42).unwrap();
        let (header, body) = split(&bytes);

        assert_eq!(header.request_id, 42);
        assert_eq!(header.response_to, 0);
        assert_eq!(header.op_code, OpCode::Query);
        // flags, then the namespace cstring
        assert_eq!(&body[0..4], &[0, 0, 0, 0]);
        assert_eq!(&body[4..15], b"admin.$cmd\0");
        // skip 0, limit -1
        assert_eq!(&body[15..19], &0i32.to_le_bytes());
        assert_eq!(&body[19..23], &(-1i32).to_le_bytes());
    }

    #[test]
    fn test_operations_decode_back() {
        let ops = vec![
            Operation::Query(
                Query::new("db.c", doc! { "a" => 1 })
                    .with_fields(doc! { "a" => 1 })
                    .with_skip(3)
                    .with_flags(QueryFlags::new().with_slave_ok()),
            ),
            Operation::GetMore(GetMore {
                namespace: "db.c".to_string(),
                limit: 10,
                cursor_id: 1 << 40,
            }),
            Operation::Insert(Insert {
                namespace: "db.c".to_string(),
                flags: InsertFlags::new(),
                documents: vec![doc! { "x" => 1 }, doc! { "x" => 2 }],
            }),
            Operation::Update(Update {
                namespace: "db.c".to_string(),
                flags: UpdateFlags::new().with_upsert(),
                selector: doc! { "x" => 1 },
                update: doc! { "$set" => doc! { "y" => 2 } },
            }),
            Operation::Delete(Delete {
                namespace: "db.c".to_string(),
                flags: DeleteFlags::new().with_single_remove(),
                selector: doc! { "x" => 1 },
            }),
            Operation::KillCursors(KillCursors {
                cursor_ids: vec![1, 2, 3],
            }),
        ];

        for op in ops {
            let bytes = op.encode(1).unwrap();
            let (header, body) = split(&bytes);
            assert_eq!(header.op_code, op.op_code());
            assert_eq!(Operation::decode(&header, body).unwrap(), op);
        }
    }

    #[test]
    fn test_expects_reply() {
        assert!(Operation::command("admin", doc! { "ping" => 1 }).expects_reply());
        assert!(Operation::GetMore(GetMore {
            namespace: "d.c".to_string(),
            limit: 0,
            cursor_id: 1
        })
        .expects_reply());
        assert!(!Operation::KillCursors(KillCursors { cursor_ids: vec![] }).expects_reply());
        assert!(!Operation::Insert(Insert {
            namespace: "d.c".to_string(),
            flags: InsertFlags::new(),
            documents: vec![],
        })
        .expects_reply());
    }

    #[test]
    fn test_encode_into_shared_buffer() {
        let mut encoder = Encoder::new();
        let first = Operation::command("admin", doc! { "ping" => 1 });
        let second = Operation::command("admin", doc! { "getlasterror" => 1 });
        first.encode_into(&mut encoder, 1).unwrap();
        second.encode_into(&mut encoder, 2).unwrap();
        let bytes = encoder.flush().unwrap();

        let first_len = first.encode(1).unwrap().len();
        let (header, _) = split(&bytes[..first_len]);
        assert_eq!(header.request_id, 1);
        let (header, _) = split(&bytes[first_len..]);
        assert_eq!(header.request_id, 2);
    }

    #[test]
    fn test_reply_roundtrip() {
        let reply = Reply::new(vec![doc! { "ok" => 1.0 }, doc! { "n" => 2 }])
            .with_cursor_id(99)
            .with_flags(ReplyFlags::new().with_await_capable());
        let bytes = reply.encode(7).unwrap();
        let (header, body) = split(&bytes);
        assert_eq!(header.op_code, OpCode::Reply);
        assert_eq!(header.response_to, 7);

        let decoded = Reply::decode(&header, body).unwrap();
        assert_eq!(decoded.response_to, 7);
        assert_eq!(decoded.cursor_id, 99);
        assert!(decoded.flags.is_await_capable());
        assert_eq!(decoded.documents, reply.documents);
    }

    #[test]
    fn test_reply_count_mismatch() {
        let mut bytes = Reply::new(vec![doc! { "ok" => 1.0 }]).encode(1).unwrap();
        // number_returned follows flags, cursor id and starting_from.
        let at = HEADER_SIZE + 16;
        bytes[at..at + 4].copy_from_slice(&2i32.to_le_bytes());
        let (header, body) = split(&bytes);
        assert!(matches!(
            Reply::decode(&header, body),
            Err(ProtocolError::ReplyCountMismatch {
                declared: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_reply_rejects_other_opcodes() {
        let bytes = Operation::command("admin", doc! { "ping" => 1 }).encode(1).unwrap();
        let (header, body) = split(&bytes);
        assert!(matches!(
            Reply::decode(&header, body),
            Err(ProtocolError::UnexpectedOpCode(OpCode::Query))
        ));
    }

    #[test]
    fn test_display_is_one_line() {
        let op = Operation::command("admin", doc! { "ismaster" => 1 });
        let line = op.to_string();
        assert!(line.starts_with("QUERY ns=admin.$cmd"));
        assert!(line.contains(r#"{"ismaster":1}"#));
        assert!(!line.contains('\n'));
    }
}
