//! In-process mock replica set for integration tests.
//!
//! Each member is a TCP listener on 127.0.0.1 that answers `ismaster`,
//! `ping`, `getlasterror` and a failing `fail` command, never answers
//! `stall`, stores inserted
//! documents per namespace and serves them back to queries. Members can be
//! stopped and restarted on the same port, and promoted or demoted.

#![allow(dead_code)]

use docwire_bson::{doc, Document, Value};
use docwire_protocol::{Decoder, Operation, Query, Reply, ReplyFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

/// Options short enough that failure scenarios finish quickly.
pub fn fast_options() -> docwire_client::ReplicaSetOptions {
    docwire_client::ReplicaSetOptions {
        connect_timeout_ms: 500,
        timeout_ms: 500,
        ..docwire_client::ReplicaSetOptions::default()
    }
}

pub fn fast_node_options() -> docwire_client::NodeOptions {
    fast_options().node_options()
}

/// Returns an address nothing listens on.
pub async fn unused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

#[derive(Default)]
struct MemberState {
    address: String,
    primary: AtomicBool,
    secondary: AtomicBool,
    /// Accept connections and close them without answering.
    hang_up: AtomicBool,
    /// Answer `ismaster` with a command failure.
    fail_ismaster: AtomicBool,
    hosts: Mutex<Vec<String>>,
    accepts: AtomicUsize,
    operations: Mutex<Vec<Operation>>,
    collections: Mutex<HashMap<String, Vec<Document>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One mock server.
pub struct MockMember {
    addr: SocketAddr,
    state: Arc<MemberState>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl MockMember {
    /// Starts a member on a free port.
    pub async fn start() -> Self {
        let listener = bind("127.0.0.1:0".parse().unwrap());
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MemberState {
            address: addr.to_string(),
            hosts: Mutex::new(vec![addr.to_string()]),
            ..MemberState::default()
        });
        let member = Self {
            addr,
            state,
            listener: Mutex::new(None),
        };
        member.serve(listener);
        member
    }

    /// Starts a member that accepts connections and closes them immediately.
    pub async fn start_hanging_up() -> Self {
        let member = Self::start().await;
        member.state.hang_up.store(true, Ordering::SeqCst);
        member
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    pub fn promote(&self) {
        self.state.primary.store(true, Ordering::SeqCst);
        self.state.secondary.store(false, Ordering::SeqCst);
    }

    pub fn demote(&self) {
        self.state.primary.store(false, Ordering::SeqCst);
        self.state.secondary.store(true, Ordering::SeqCst);
    }

    pub fn set_ismaster_failing(&self, failing: bool) {
        self.state.fail_ismaster.store(failing, Ordering::SeqCst);
    }

    /// Sets the `hosts` list reported by `ismaster`.
    pub fn set_hosts(&self, hosts: Vec<String>) {
        *self.state.hosts.lock() = hosts;
    }

    /// Number of accepted connections since start.
    pub fn accepts(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    /// Every operation received, in arrival order.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.operations.lock().clone()
    }

    /// Commands received, by name.
    pub fn commands(&self) -> Vec<String> {
        self.operations()
            .iter()
            .filter_map(|op| match op {
                Operation::Query(q) if q.namespace.ends_with(".$cmd") => {
                    q.selector.first_key().map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }

    pub fn documents(&self, namespace: &str) -> Vec<Document> {
        self.state
            .collections
            .lock()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Closes the listener and every open connection.
    pub async fn stop(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.abort();
            let _ = listener.await;
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.state.tasks.lock());
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
    }

    /// Listens again on the same port.
    pub async fn restart(&self) {
        self.stop().await;
        self.serve(bind(self.addr));
    }

    fn serve(&self, listener: TcpListener) {
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                state.accepts.fetch_add(1, Ordering::SeqCst);
                if state.hang_up.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let conn_state = Arc::clone(&state);
                let handle = tokio::spawn(handle_connection(stream, conn_state));
                state.tasks.lock().push(handle);
            }
        });
        *self.listener.lock() = Some(task);
    }
}

fn bind(addr: SocketAddr) -> TcpListener {
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_reuseaddr(true).unwrap();
    socket.bind(addr).unwrap();
    socket.listen(128).unwrap()
}

async fn handle_connection(mut stream: TcpStream, state: Arc<MemberState>) {
    let mut decoder = Decoder::new();
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);

        let mut out = Vec::new();
        while let Ok(Some((header, operation))) = decoder.decode_operation() {
            state.operations.lock().push(operation.clone());
            if let Some(reply) = respond(&state, &operation) {
                out.extend(reply.encode(header.request_id).unwrap());
            }
        }
        if !out.is_empty() && stream.write_all(&out).await.is_err() {
            return;
        }
    }
}

fn respond(state: &MemberState, operation: &Operation) -> Option<Reply> {
    match operation {
        Operation::Query(query) if query.namespace.ends_with(".$cmd") => {
            if query.selector.first_key() == Some("stall") {
                return None;
            }
            Some(Reply::new(vec![command_result(state, query)]))
        }
        Operation::Query(query) => {
            if query.selector.contains_key("$fail") {
                return Some(
                    Reply::new(vec![doc! { "$err" => "query failed", "code" => 17 }])
                        .with_flags(ReplyFlags::new().with_query_failure()),
                );
            }
            let documents = state
                .collections
                .lock()
                .get(&query.namespace)
                .cloned()
                .unwrap_or_default();
            Some(Reply::new(documents))
        }
        Operation::GetMore(_) => Some(Reply::new(Vec::new())),
        Operation::Insert(insert) => {
            state
                .collections
                .lock()
                .entry(insert.namespace.clone())
                .or_default()
                .extend(insert.documents.iter().cloned());
            None
        }
        _ => None,
    }
}

fn command_result(state: &MemberState, query: &Query) -> Document {
    match query.selector.first_key() {
        Some("ismaster") if state.fail_ismaster.load(Ordering::SeqCst) => {
            doc! { "ok" => 0.0, "errmsg" => "node is recovering", "code" => 13436 }
        }
        Some("ismaster") => {
            let hosts: Vec<Value> = state.hosts.lock().iter().map(|h| Value::from(h.as_str())).collect();
            doc! {
                "ismaster" => state.primary.load(Ordering::SeqCst),
                "secondary" => state.secondary.load(Ordering::SeqCst),
                "hosts" => hosts,
                "me" => state.address.as_str(),
                "maxBsonObjectSize" => 16 * 1024 * 1024,
                "ok" => 1.0,
            }
        }
        Some("getlasterror") => doc! { "ok" => 1.0, "err" => Value::Null, "n" => 0 },
        Some("fail") => doc! { "ok" => 0.0, "errmsg" => "command failed", "code" => 42 },
        _ => doc! { "ok" => 1.0 },
    }
}

/// A primary and its secondaries, each reporting all members as hosts.
pub struct MockReplicaSet {
    pub members: Vec<MockMember>,
}

impl MockReplicaSet {
    /// Starts `size` members; the first is primary.
    pub async fn start(size: usize) -> Self {
        let mut members = Vec::with_capacity(size);
        for _ in 0..size {
            members.push(MockMember::start().await);
        }
        let hosts: Vec<String> = members.iter().map(MockMember::address).collect();
        for (i, member) in members.iter().enumerate() {
            member.set_hosts(hosts.clone());
            if i == 0 {
                member.promote();
            } else {
                member.demote();
            }
        }
        Self { members }
    }

    pub fn primary(&self) -> &MockMember {
        &self.members[0]
    }

    pub fn secondaries(&self) -> &[MockMember] {
        &self.members[1..]
    }

    pub fn addresses(&self) -> Vec<String> {
        self.members.iter().map(MockMember::address).collect()
    }
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
