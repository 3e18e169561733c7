//! Connection management.

use crate::error::ClientError;
use docwire_bson::Encoder;
use docwire_protocol::{Decoder, Operation, ProtocolError, Reply};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (16 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// Counters for traffic on a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Socket writes; one per flushed batch.
    pub writes: u64,
    pub messages_sent: u64,
    pub replies_received: u64,
}

impl ConnectionStats {
    pub(crate) fn absorb(&mut self, other: ConnectionStats) {
        self.writes += other.writes;
        self.messages_sent += other.messages_sent;
        self.replies_received += other.replies_received;
    }
}

/// A single TCP stream to one server.
///
/// Every write and every read waits at most `timeout`; an expired deadline is
/// reported as [`ClientError::Connection`], like any socket failure.
pub struct Connection {
    address: String,
    stream: TcpStream,
    decoder: Decoder,
    read_buf: Vec<u8>,
    timeout: Duration,
    next_request_id: i32,
    stats: ConnectionStats,
}

impl Connection {
    /// Opens a connection to `host:port`.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let address = format!("{host}:{port}");
        tracing::debug!("Connecting to {}...", address);

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                tracing::debug!("Connection to {} timed out", address);
                ClientError::Connection(format!("timed out connecting to {address}"))
            })?
            .map_err(|e| {
                tracing::debug!("Connection to {} failed: {}", address, e);
                ClientError::Connection(format!("could not connect to {address}: {e}"))
            })?;

        stream.set_nodelay(true).ok();

        Ok(Self {
            address,
            stream,
            decoder: Decoder::new(),
            read_buf: vec![0u8; DEFAULT_READ_BUFFER_SIZE],
            timeout,
            next_request_id: 1,
            stats: ConnectionStats::default(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Writes all operations with a single socket write.
    ///
    /// Returns the request id assigned to each operation, in order.
    pub async fn write(&mut self, operations: &[Operation]) -> Result<Vec<i32>, ClientError> {
        let mut encoder = Encoder::new();
        let mut request_ids = Vec::with_capacity(operations.len());
        for operation in operations {
            let id = self.next_request_id();
            operation.encode_into(&mut encoder, id)?;
            request_ids.push(id);
        }
        let bytes = encoder.flush().map_err(ProtocolError::from)?;

        tokio::time::timeout(self.timeout, self.stream.write_all(&bytes))
            .await
            .map_err(|_| self.timed_out("write"))?
            .map_err(|e| self.io_failed(e))?;

        self.stats.writes += 1;
        self.stats.messages_sent += operations.len() as u64;
        Ok(request_ids)
    }

    /// Reads the next reply from the stream.
    pub async fn read_reply(&mut self) -> Result<Reply, ClientError> {
        loop {
            if let Some(reply) = self.decoder.decode_reply()? {
                self.stats.replies_received += 1;
                return Ok(reply);
            }

            let n = tokio::time::timeout(self.timeout, self.stream.read(&mut self.read_buf))
                .await
                .map_err(|_| self.timed_out("read"))?
                .map_err(|e| self.io_failed(e))?;

            if n == 0 {
                tracing::debug!("Connection to {} closed by peer", self.address);
                return Err(ClientError::Connection(format!(
                    "connection to {} closed",
                    self.address
                )));
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Reads one reply per operation that expects one and pairs them up.
    ///
    /// Replies must arrive in request order.
    pub async fn receive_replies(
        &mut self,
        operations: &[Operation],
        request_ids: &[i32],
    ) -> Result<Vec<Option<Reply>>, ClientError> {
        let mut replies = Vec::with_capacity(operations.len());
        for (operation, &expected) in operations.iter().zip(request_ids) {
            if !operation.expects_reply() {
                replies.push(None);
                continue;
            }
            let reply = self.read_reply().await?;
            if reply.response_to != expected {
                return Err(ClientError::UnexpectedReply {
                    expected,
                    actual: reply.response_to,
                });
            }
            replies.push(Some(reply));
        }
        Ok(replies)
    }

    fn next_request_id(&mut self) -> i32 {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);
        id
    }

    fn timed_out(&self, what: &str) -> ClientError {
        tracing::debug!("{} on {} timed out", what, self.address);
        ClientError::Connection(format!("{what} on {} timed out", self.address))
    }

    fn io_failed(&self, e: std::io::Error) -> ClientError {
        tracing::debug!("I/O error on {}: {}", self.address, e);
        ClientError::Connection(format!("lost connection to {}: {e}", self.address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_bson::doc;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = Connection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_millis(500),
        );
        let (client, accepted) = tokio::join!(client, listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }

    #[tokio::test]
    async fn test_batch_is_one_write() {
        let (mut conn, mut server) = pair().await;
        let ops = vec![
            Operation::command("admin", doc! { "ping" => 1 }),
            Operation::command("admin", doc! { "getlasterror" => 1 }),
        ];
        let ids = conn.write(&ops).await.unwrap();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(conn.stats().writes, 1);
        assert_eq!(conn.stats().messages_sent, 2);

        let mut decoder = Decoder::new();
        let mut buf = vec![0u8; 4096];
        let mut seen = Vec::new();
        while seen.len() < 2 {
            let n = server.read(&mut buf).await.unwrap();
            decoder.extend(&buf[..n]);
            while let Some((header, _)) = decoder.decode_operation().unwrap() {
                seen.push(header.request_id);
            }
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_replies_paired_in_order() {
        let (mut conn, mut server) = pair().await;
        let ops = vec![
            Operation::command("admin", doc! { "ping" => 1 }),
            Operation::KillCursors(docwire_protocol::KillCursors {
                cursor_ids: vec![7],
            }),
            Operation::command("admin", doc! { "ping" => 2 }),
        ];
        let ids = conn.write(&ops).await.unwrap();

        let mut replies = Reply::new(vec![doc! { "n" => 1 }]).encode(ids[0]).unwrap();
        replies.extend(Reply::new(vec![doc! { "n" => 2 }]).encode(ids[2]).unwrap());
        server.write_all(&replies).await.unwrap();

        let received = conn.receive_replies(&ops, &ids).await.unwrap();
        assert_eq!(received.len(), 3);
        assert!(received[1].is_none());
        let n = |r: &Option<Reply>| r.as_ref().and_then(|r| r.first()).and_then(|d| d.get_i32("n"));
        assert_eq!(n(&received[0]), Some(1));
        assert_eq!(n(&received[2]), Some(2));
        assert_eq!(conn.stats().replies_received, 2);
    }

    #[tokio::test]
    async fn test_mismatched_reply_rejected() {
        let (mut conn, mut server) = pair().await;
        let ops = vec![Operation::command("admin", doc! { "ping" => 1 })];
        let ids = conn.write(&ops).await.unwrap();

        server
            .write_all(&Reply::new(vec![doc! {}]).encode(ids[0] + 100).unwrap())
            .await
            .unwrap();
        let result = conn.receive_replies(&ops, &ids).await;
        assert!(matches!(result, Err(ClientError::UnexpectedReply { .. })));
    }

    #[tokio::test]
    async fn test_read_timeout_is_connection_error() {
        let (mut conn, _server) = pair().await;
        let result = conn.read_reply().await;
        assert!(matches!(result, Err(ClientError::Connection(msg)) if msg.contains("timed out")));
    }

    #[tokio::test]
    async fn test_peer_close_is_connection_error() {
        let (mut conn, server) = pair().await;
        drop(server);
        let result = conn.read_reply().await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
