//! A single server and its role in the replica set.
//!
//! A node is `Unknown` until its first refresh, then primary or secondary
//! (or neither, for arbiters and recovering members). A failed reconnect
//! marks it down; only a later successful connect clears that.

use crate::connection::{Connection, ConnectionStats};
use crate::context::{BoxFuture, CallContext, ContextScope, QueuedOperation, ReplyCallback};
use crate::error::ClientError;
use docwire_bson::{doc, Document, Value};
use docwire_protocol::{
    Delete, DeleteFlags, GetMore, Insert, InsertFlags, KillCursors, Operation, Query, Reply,
    Update, UpdateFlags, DEFAULT_PORT,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-node timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    pub connect_timeout: Duration,
    /// Deadline for each socket write and read.
    pub timeout: Duration,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
        }
    }
}

impl NodeOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Role and health of a node as of its last refresh.
///
/// Kept outside the node's connection lock, so it can be read while the
/// node is busy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub primary: bool,
    pub secondary: bool,
    pub refreshed_at: Option<Instant>,
    pub down_at: Option<Instant>,
}

impl NodeStatus {
    pub fn is_down(&self) -> bool {
        self.down_at.is_some()
    }

    /// Returns whether role information is missing or older than `max_age`.
    pub fn needs_refresh(&self, max_age: Duration) -> bool {
        self.refreshed_at
            .map_or(true, |refreshed| refreshed.elapsed() >= max_age)
    }
}

/// One server, reached through at most one connection.
pub struct Node {
    host: String,
    port: u16,
    address: String,
    options: NodeOptions,
    connection: Option<Connection>,
    /// Traffic of connections that have since been closed.
    closed_stats: ConnectionStats,
    /// Set while a round trip is on the wire. Still set when a new one
    /// starts means the previous caller gave up mid-exchange.
    in_flight: bool,
    status: Arc<RwLock<NodeStatus>>,
    peers: Vec<String>,
    max_bson_object_size: Option<i64>,
}

impl Node {
    /// Creates a node for `host[:port]`. The port defaults to 27017.
    pub fn new(address: &str, options: NodeOptions) -> Result<Self, ClientError> {
        let (host, port) = parse_address(address)?;
        Ok(Self {
            address: format!("{host}:{port}"),
            host,
            port,
            options,
            connection: None,
            closed_stats: ConnectionStats::default(),
            in_flight: false,
            status: Arc::default(),
            peers: Vec::new(),
            max_bson_object_size: None,
        })
    }

    /// Normalized `host:port`.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn options(&self) -> NodeOptions {
        self.options
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// The status cell, updated in place by every refresh.
    pub(crate) fn shared_status(&self) -> Arc<RwLock<NodeStatus>> {
        Arc::clone(&self.status)
    }

    pub fn is_primary(&self) -> bool {
        self.status().primary
    }

    pub fn is_secondary(&self) -> bool {
        self.status().secondary
    }

    pub fn is_down(&self) -> bool {
        self.status().is_down()
    }

    pub fn down_at(&self) -> Option<Instant> {
        self.status().down_at
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        self.status().refreshed_at
    }

    pub fn needs_refresh(&self, max_age: Duration) -> bool {
        self.status().needs_refresh(max_age)
    }

    /// Addresses of the other members, as reported by the last refresh.
    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn max_bson_object_size(&self) -> Option<i64> {
        self.max_bson_object_size
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Traffic counters across every connection this node has opened.
    pub fn connection_stats(&self) -> ConnectionStats {
        let mut stats = self.closed_stats;
        if let Some(connection) = &self.connection {
            stats.absorb(connection.stats());
        }
        stats
    }

    /// Closes the connection. Role information is kept.
    pub fn disconnect(&mut self) {
        self.in_flight = false;
        if let Some(connection) = self.connection.take() {
            tracing::debug!("Disconnecting from {}", self.address);
            self.closed_stats.absorb(connection.stats());
        }
    }

    pub async fn query(&mut self, ctx: &mut CallContext, query: Query) -> Result<Reply, ClientError> {
        let selector = query.selector.clone();
        let callback: ReplyCallback = Box::new(move |reply| check_query(&selector, reply));
        let reply = self
            .process(ctx, Operation::Query(query), Some(callback))
            .await?;
        Ok(reply.unwrap_or_default())
    }

    pub async fn get_more(
        &mut self,
        ctx: &mut CallContext,
        database: &str,
        collection: &str,
        cursor_id: i64,
        limit: i32,
    ) -> Result<Reply, ClientError> {
        let operation = Operation::GetMore(GetMore {
            namespace: namespace(database, collection),
            limit,
            cursor_id,
        });
        let reply = self.process(ctx, operation, None).await?;
        Ok(reply.unwrap_or_default())
    }

    pub async fn insert(
        &mut self,
        ctx: &mut CallContext,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), ClientError> {
        let operation = Operation::Insert(Insert {
            namespace: namespace(database, collection),
            flags: InsertFlags::new(),
            documents,
        });
        self.process(ctx, operation, None).await.map(|_| ())
    }

    pub async fn update(
        &mut self,
        ctx: &mut CallContext,
        database: &str,
        collection: &str,
        selector: Document,
        change: Document,
        flags: UpdateFlags,
    ) -> Result<(), ClientError> {
        let operation = Operation::Update(Update {
            namespace: namespace(database, collection),
            flags,
            selector,
            update: change,
        });
        self.process(ctx, operation, None).await.map(|_| ())
    }

    pub async fn remove(
        &mut self,
        ctx: &mut CallContext,
        database: &str,
        collection: &str,
        selector: Document,
        flags: DeleteFlags,
    ) -> Result<(), ClientError> {
        let operation = Operation::Delete(Delete {
            namespace: namespace(database, collection),
            flags,
            selector,
        });
        self.process(ctx, operation, None).await.map(|_| ())
    }

    pub async fn kill_cursors(
        &mut self,
        ctx: &mut CallContext,
        cursor_ids: Vec<i64>,
    ) -> Result<(), ClientError> {
        let operation = Operation::KillCursors(KillCursors { cursor_ids });
        self.process(ctx, operation, None).await.map(|_| ())
    }

    /// Runs a command and returns its checked result document.
    ///
    /// Inside a pipeline the command is only queued and an empty document is
    /// returned; the checked result comes back from [`pipeline`](Self::pipeline).
    pub async fn command(
        &mut self,
        ctx: &mut CallContext,
        database: &str,
        command: Document,
    ) -> Result<Document, ClientError> {
        let operation = Operation::command(database, command.clone());
        let callback: ReplyCallback = Box::new(move |reply| check_command(&command, reply));
        let reply = self.process(ctx, operation, Some(callback)).await?;
        Ok(reply.and_then(Reply::into_first).unwrap_or_default())
    }

    /// Sends `write` and a `getlasterror` built from `safety` in one round trip,
    /// returning the checked `getlasterror` result.
    pub async fn safe_write(
        &mut self,
        ctx: &mut CallContext,
        write: Operation,
        safety: Document,
    ) -> Result<Document, ClientError> {
        let mut command = doc! { "getlasterror" => 1 };
        command.merge(safety);

        let reply = self
            .pipeline(ctx, move |node, ctx| {
                Box::pin(async move {
                    node.process(ctx, write, None).await?;
                    node.command(ctx, "admin", command).await?;
                    Ok::<(), ClientError>(())
                })
            })
            .await?;
        Ok(reply.and_then(Reply::into_first).unwrap_or_default())
    }

    /// Queues every operation issued by `body` and sends them as one batch
    /// when the outermost pipeline ends.
    ///
    /// Returns the result of the last queued operation's callback. Nested
    /// pipelines return `None` and leave flushing to the outermost one. If
    /// `body` fails, or the returned future is dropped before the flush,
    /// the queue is discarded unsent.
    pub async fn pipeline<F>(
        &mut self,
        ctx: &mut CallContext,
        body: F,
    ) -> Result<Option<Reply>, ClientError>
    where
        F: for<'a> FnOnce(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<(), ClientError>>
            + Send,
    {
        let mut scope = ContextScope::pipeline(ctx);
        let outcome = body(self, &mut *scope).await;
        if !scope.is_outermost_pipeline() {
            return outcome.map(|()| None);
        }
        let queued = std::mem::take(&mut scope.queue);
        drop(scope);

        if let Err(e) = outcome {
            if !queued.is_empty() {
                tracing::debug!(
                    "Discarding {} queued operations for {}",
                    queued.len(),
                    self.address
                );
            }
            return Err(e);
        }
        self.flush(ctx, queued).await
    }

    /// Runs `body` with the primary guard set, so any refresh inside it fails
    /// with [`ClientError::TopologyChanged`] if this node lost its primary role.
    pub async fn ensure_primary<T, F>(
        &mut self,
        ctx: &mut CallContext,
        body: F,
    ) -> Result<T, ClientError>
    where
        F: for<'a> FnOnce(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<T, ClientError>>
            + Send,
        T: Send,
    {
        let mut scope = ContextScope::ensure_primary(ctx);
        let result = body(self, &mut *scope).await;
        result
    }

    /// Runs `body` on a connected node, reconnecting once on connection errors.
    ///
    /// - Not connected: connect (which also refreshes) before running `body`.
    /// - Connection error: disconnect and try connect-and-run once more; a
    ///   second failure marks the node down.
    /// - [`ClientError::TopologyChanged`] is returned as is.
    /// - Any other error disconnects and is returned.
    ///
    /// Calls nested inside another `ensure_connected` run `body` directly.
    pub async fn ensure_connected<T, F>(
        &mut self,
        ctx: &mut CallContext,
        mut body: F,
    ) -> Result<T, ClientError>
    where
        F: for<'a> FnMut(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<T, ClientError>>
            + Send,
        T: Send,
    {
        if ctx.ensure_connected {
            return body(self, ctx).await;
        }

        let mut scope = ContextScope::ensure_connected(ctx);
        let result = self.run_connected(&mut *scope, &mut body).await;
        result
    }

    async fn run_connected<T, F>(
        &mut self,
        ctx: &mut CallContext,
        body: &mut F,
    ) -> Result<T, ClientError>
    where
        F: for<'a> FnMut(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<T, ClientError>>
            + Send,
        T: Send,
    {
        let mut retry_on_failure = true;
        loop {
            let result = match self.connect_if_needed(ctx.ensure_primary).await {
                Ok(()) => body(self, ctx).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_topology_changed() => return Err(e),
                Err(e) if e.is_connection() => {
                    self.disconnect();
                    if retry_on_failure {
                        tracing::debug!("Retrying {} after connection error: {}", self.address, e);
                        retry_on_failure = false;
                        continue;
                    }
                    self.mark_down();
                    return Err(e);
                }
                Err(e) => {
                    self.disconnect();
                    return Err(e);
                }
            }
        }
    }

    /// Re-reads the node's role and peers with an `ismaster` command.
    ///
    /// Bypasses any open pipeline. Under [`ensure_primary`](Self::ensure_primary)
    /// a node that is no longer primary yields [`ClientError::TopologyChanged`].
    pub async fn refresh(&mut self, ctx: &mut CallContext) -> Result<(), ClientError> {
        let command = ismaster();
        let callback: ReplyCallback = {
            let command = command.clone();
            Box::new(move |reply| check_command(&command, reply))
        };
        let queued = QueuedOperation {
            operation: Operation::command("admin", command),
            callback: Some(callback),
        };
        let info = self
            .flush(ctx, vec![queued])
            .await?
            .and_then(Reply::into_first)
            .unwrap_or_default();
        self.apply_status(ctx.ensure_primary, &info)
    }

    async fn process(
        &mut self,
        ctx: &mut CallContext,
        operation: Operation,
        callback: Option<ReplyCallback>,
    ) -> Result<Option<Reply>, ClientError> {
        if ctx.in_pipeline() {
            ctx.queue.push(QueuedOperation {
                operation,
                callback,
            });
            return Ok(None);
        }
        self.flush(ctx, vec![QueuedOperation {
            operation,
            callback,
        }])
        .await
    }

    /// Sends a batch in one round trip, then runs every callback in order.
    ///
    /// Each callback runs exactly once when the round trip succeeds; the
    /// first callback error is returned after all of them ran.
    async fn flush(
        &mut self,
        ctx: &mut CallContext,
        queued: Vec<QueuedOperation>,
    ) -> Result<Option<Reply>, ClientError> {
        if queued.is_empty() {
            return Ok(None);
        }

        let (operations, callbacks): (Vec<Operation>, Vec<Option<ReplyCallback>>) = queued
            .into_iter()
            .map(|q| (q.operation, q.callback))
            .unzip();
        let operations: Arc<[Operation]> = operations.into();

        let started = Instant::now();
        let replies = self
            .ensure_connected(ctx, |node, _ctx| {
                let operations = Arc::clone(&operations);
                Box::pin(async move { node.round_trip(&operations).await })
            })
            .await?;
        log_operations(&self.address, &operations, started.elapsed());

        let mut last = None;
        let mut first_error = None;
        for (reply, callback) in replies.into_iter().zip(callbacks) {
            let result = match callback {
                Some(callback) => callback(reply),
                None => Ok(reply),
            };
            match result {
                Ok(value) => last = value,
                Err(e) => {
                    last = None;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(last),
        }
    }

    async fn round_trip(
        &mut self,
        operations: &[Operation],
    ) -> Result<Vec<Option<Reply>>, ClientError> {
        let connection = self.connection.as_mut().ok_or_else(|| {
            ClientError::Connection(format!("not connected to {}", self.address))
        })?;
        self.in_flight = true;
        let result = async {
            let request_ids = connection.write(operations).await?;
            connection.receive_replies(operations, &request_ids).await
        }
        .await;
        self.in_flight = false;
        result
    }

    async fn connect_if_needed(&mut self, ensure_primary: bool) -> Result<(), ClientError> {
        if self.in_flight {
            // Replies to the abandoned exchange may still arrive.
            tracing::debug!("Dropping connection to {} after an interrupted round trip", self.address);
            self.disconnect();
        }
        if self.is_connected() {
            return Ok(());
        }
        self.connect(ensure_primary).await
    }

    async fn connect(&mut self, ensure_primary: bool) -> Result<(), ClientError> {
        let connection = Connection::connect(
            &self.host,
            self.port,
            self.options.connect_timeout,
            self.options.timeout,
        )
        .await?;
        self.connection = Some(connection);
        self.handshake(ensure_primary).await
    }

    /// Refresh over the fresh connection, outside the retry wrapper.
    async fn handshake(&mut self, ensure_primary: bool) -> Result<(), ClientError> {
        let command = ismaster();
        let operation = Operation::command("admin", command.clone());
        let started = Instant::now();
        let reply = self
            .round_trip(std::slice::from_ref(&operation))
            .await?
            .pop()
            .flatten();
        log_operations(&self.address, std::slice::from_ref(&operation), started.elapsed());

        let info = check_command(&command, reply)?
            .and_then(Reply::into_first)
            .unwrap_or_default();
        self.apply_status(ensure_primary, &info)
    }

    /// Records a successful `ismaster` answer. The node is up again.
    fn apply_status(&mut self, ensure_primary: bool, info: &Document) -> Result<(), ClientError> {
        let status = NodeStatus {
            primary: info.get("ismaster").is_some_and(Value::is_truthy),
            secondary: info.get("secondary").is_some_and(Value::is_truthy),
            refreshed_at: Some(Instant::now()),
            down_at: None,
        };
        *self.status.write() = status;
        self.peers = ["hosts", "passives"]
            .iter()
            .filter_map(|key| info.get_array(key))
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if let Some(size) = info.get_i64("maxBsonObjectSize") {
            self.max_bson_object_size = Some(size);
        }

        tracing::debug!(
            "Refreshed {}: primary={} secondary={} peers={:?}",
            self.address,
            status.primary,
            status.secondary,
            self.peers
        );

        if !status.primary && ensure_primary {
            return Err(ClientError::TopologyChanged(self.address.clone()));
        }
        Ok(())
    }

    fn mark_down(&mut self) {
        tracing::warn!("Node {} is down", self.address);
        self.status.write().down_at = Some(Instant::now());
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .field("status", &self.status())
            .finish()
    }
}

fn ismaster() -> Document {
    doc! { "ismaster" => 1 }
}

fn namespace(database: &str, collection: &str) -> String {
    format!("{database}.{collection}")
}

/// Splits `host[:port]`, accepting bracketed IPv6 hosts.
pub fn parse_address(address: &str) -> Result<(String, u16), ClientError> {
    let invalid = || ClientError::InvalidAddress(address.to_string());
    let address = address.trim();

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if after.is_empty() => (host, None),
            None => return Err(invalid()),
        }
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => DEFAULT_PORT,
    };
    Ok((host.to_string(), port))
}

/// Turns a command reply into a result, raising server-reported failures.
fn check_command(command: &Document, reply: Option<Reply>) -> Result<Option<Reply>, ClientError> {
    let reply = reply.ok_or_else(|| ClientError::MissingReply(command.to_string()))?;

    let details = reply.first().cloned().unwrap_or_default();
    if reply.is_query_failure() {
        return Err(ClientError::QueryFailure {
            command: command.clone(),
            details,
        });
    }
    if command_failed(&details) {
        return Err(ClientError::OperationFailure {
            command: command.clone(),
            details,
        });
    }
    Ok(Some(reply))
}

fn check_query(selector: &Document, reply: Option<Reply>) -> Result<Option<Reply>, ClientError> {
    let reply = reply.ok_or_else(|| ClientError::MissingReply(selector.to_string()))?;
    if reply.is_query_failure() {
        return Err(ClientError::QueryFailure {
            command: selector.clone(),
            details: reply.first().cloned().unwrap_or_default(),
        });
    }
    Ok(Some(reply))
}

/// `ok` must be numerically 1 and no error field may be set.
fn command_failed(result: &Document) -> bool {
    let ok = result.get("ok").and_then(Value::as_f64) == Some(1.0);
    let error_set = ["err", "errmsg", "$err"]
        .iter()
        .any(|key| result.get(key).is_some_and(Value::is_truthy));
    !ok || error_set
}

fn log_operations(address: &str, operations: &[Operation], elapsed: Duration) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let summary: Vec<String> = operations.iter().map(ToString::to_string).collect();
    tracing::debug!(
        "{} {} ({:.1}ms)",
        address,
        summary.join(" | "),
        elapsed.as_secs_f64() * 1000.0
    );
}
