//! Replica set topology and node selection.
//!
//! The set starts from seed addresses and grows as refreshed nodes report
//! peers it has not seen. Nodes are never removed; a failing node is marked
//! down and skipped until its down interval has passed.

use crate::config::{ClientConfig, ReplicaSetOptions};
use crate::context::{BoxFuture, CallContext};
use crate::error::ClientError;
use crate::node::{Node, NodeStatus};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// A known node. The mutex serializes use of its connection; the status
/// can be read without waiting for it.
pub struct NodeHandle {
    address: String,
    status: Arc<RwLock<NodeStatus>>,
    node: Mutex<Node>,
}

impl NodeHandle {
    fn new(node: Node) -> Arc<Self> {
        Arc::new(Self {
            address: node.address().to_string(),
            status: node.shared_status(),
            node: Mutex::new(node),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Role and health as of the node's last refresh.
    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    /// Waits for exclusive use of the node.
    pub async fn lock(&self) -> MutexGuard<'_, Node> {
        self.node.lock().await
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("address", &self.address)
            .finish()
    }
}

/// A replica set, discovered from its seeds.
pub struct ReplicaSet {
    name: Option<String>,
    options: ReplicaSetOptions,
    nodes: RwLock<Arc<Vec<Arc<NodeHandle>>>>,
}

impl ReplicaSet {
    /// Creates a set from seed addresses. No connection is made until the
    /// first selection or refresh.
    pub fn new<S: AsRef<str>>(seeds: &[S], options: ReplicaSetOptions) -> Result<Self, ClientError> {
        let node_options = options.node_options();
        let mut handles: Vec<Arc<NodeHandle>> = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let node = Node::new(seed.as_ref(), node_options)?;
            if handles.iter().all(|h| h.address != node.address()) {
                handles.push(NodeHandle::new(node));
            }
        }

        Ok(Self {
            name: None,
            options,
            nodes: RwLock::new(Arc::new(handles)),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut set = Self::new(&config.seeds, config.options.clone())?;
        set.name = config.replica_set.clone();
        Ok(set)
    }

    /// Sets the name used in selection errors.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn options(&self) -> &ReplicaSetOptions {
        &self.options
    }

    /// Snapshot of every known node.
    pub fn nodes(&self) -> Vec<Arc<NodeHandle>> {
        self.nodes.read().to_vec()
    }

    /// Refreshes every known node, following newly reported peers.
    ///
    /// Returns the addresses of the nodes that answered.
    pub async fn refresh(&self) -> Vec<String> {
        let refreshed = self.refresh_nodes(self.nodes(), true).await;
        refreshed.iter().map(|h| h.address.clone()).collect()
    }

    /// Addresses of nodes currently believed to be primary.
    pub fn primaries(&self) -> Vec<String> {
        self.addresses_where(|status| status.primary)
    }

    /// Addresses of nodes currently believed to be secondaries.
    pub fn secondaries(&self) -> Vec<String> {
        self.addresses_where(|status| status.secondary)
    }

    /// Runs `body` on the primary.
    ///
    /// The body runs under the node's primary guard. If no primary is known,
    /// or the chosen one is unreachable or has stepped down, the whole set is
    /// refreshed and selection is tried once more.
    pub async fn with_primary<T, F>(&self, ctx: &mut CallContext, mut body: F) -> Result<T, ClientError>
    where
        F: for<'a> FnMut(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<T, ClientError>>
            + Send,
        T: Send,
    {
        for attempt in 0..2 {
            if attempt > 0 {
                tracing::debug!("No usable primary in {}, refreshing", self.describe());
                self.refresh().await;
            }

            for handle in self.available_nodes().await {
                if !handle.status().primary {
                    continue;
                }
                let mut node = handle.lock().await;
                // The role may have changed while waiting for the lock.
                if !node.is_primary() {
                    continue;
                }
                let result = node
                    .ensure_primary(ctx, |node, ctx| body(node, ctx))
                    .await;
                match result {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_connection() || e.is_topology_changed() => {
                        tracing::debug!("Primary {} unusable: {}", handle.address, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(ClientError::Connection(format!(
            "could not connect to any primary node for replica set {}",
            self.describe()
        )))
    }

    /// Runs `body` on a secondary, falling back to the primary.
    ///
    /// Secondaries are tried in random order, then the primary. A candidate
    /// that fails with a connection error is skipped. If every candidate
    /// fails, the set is refreshed and the candidates are tried once more.
    pub async fn with_secondary<T, F>(
        &self,
        ctx: &mut CallContext,
        mut body: F,
    ) -> Result<T, ClientError>
    where
        F: for<'a> FnMut(&'a mut Node, &'a mut CallContext) -> BoxFuture<'a, Result<T, ClientError>>
            + Send,
        T: Send,
    {
        for attempt in 0..2 {
            if attempt > 0 {
                tracing::debug!("No usable secondary in {}, refreshing", self.describe());
                self.refresh().await;
            }

            for handle in self.secondary_candidates().await {
                let mut node = handle.lock().await;
                match body(&mut *node, ctx).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_connection() => {
                        tracing::debug!("Skipping {}: {}", handle.address, e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Err(ClientError::Connection(format!(
            "could not connect to any secondary or primary nodes for replica set {}",
            self.describe()
        )))
    }

    /// Secondaries in random order, then primaries.
    async fn secondary_candidates(&self) -> Vec<Arc<NodeHandle>> {
        let mut secondaries = Vec::new();
        let mut primaries = Vec::new();
        for handle in self.available_nodes().await {
            let status = handle.status();
            if status.secondary {
                secondaries.push(handle);
            } else if status.primary {
                primaries.push(handle);
            }
        }
        secondaries.shuffle(&mut rand::thread_rng());
        secondaries.extend(primaries);
        secondaries
    }

    /// Nodes usable right now, after refreshing those whose information is stale.
    ///
    /// A down node is left out until its down interval has passed, after
    /// which it is refreshed like any node whose role information expired.
    /// A stale node that is busy with another call keeps its last known role.
    async fn available_nodes(&self) -> Vec<Arc<NodeHandle>> {
        let down_interval = self.options.down_interval();
        let refresh_interval = self.options.refresh_interval();

        let mut available = Vec::new();
        let mut stale = Vec::new();
        for handle in self.nodes() {
            let status = handle.status();
            let needs_refresh = match status.down_at {
                Some(down_at) => down_at.elapsed() >= down_interval,
                None => status.needs_refresh(refresh_interval),
            };

            if needs_refresh {
                stale.push(handle);
            } else if !status.is_down() {
                available.push(handle);
            }
        }

        if !stale.is_empty() {
            available.extend(self.refresh_nodes(stale, false).await);
        }
        available
    }

    /// Refreshes `handles` and every newly reported peer, returning the
    /// nodes that answered.
    ///
    /// Unreachable nodes are skipped without stopping the scan. Discovered
    /// nodes are published together once the scan completes. Unless
    /// `wait_for_busy` is set, a node locked by another call is not refreshed
    /// and counts as answering if it was not down.
    async fn refresh_nodes(
        &self,
        handles: Vec<Arc<NodeHandle>>,
        wait_for_busy: bool,
    ) -> Vec<Arc<NodeHandle>> {
        let mut known: HashSet<String> = self.nodes().iter().map(|h| h.address.clone()).collect();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<Arc<NodeHandle>> = handles.into();
        let mut discovered = Vec::new();
        let mut refreshed = Vec::new();

        while let Some(handle) = queue.pop_front() {
            if !visited.insert(handle.address.clone()) {
                continue;
            }

            let guard = if wait_for_busy {
                Some(handle.lock().await)
            } else {
                handle.node.try_lock().ok()
            };
            let Some(mut node) = guard else {
                tracing::debug!("Node {} is busy, keeping its last known role", handle.address);
                if !handle.status().is_down() {
                    refreshed.push(Arc::clone(&handle));
                }
                continue;
            };

            let peers = {
                let mut ctx = CallContext::new();
                match node.refresh(&mut ctx).await {
                    Ok(()) => node.peers().to_vec(),
                    Err(e) if e.is_connection() => {
                        tracing::debug!("Skipping unreachable node {}: {}", handle.address, e);
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!("Skipping node {}: {}", handle.address, e);
                        continue;
                    }
                }
            };
            drop(node);

            for peer in peers {
                let node = match Node::new(&peer, self.options.node_options()) {
                    Ok(node) => node,
                    Err(e) => {
                        tracing::warn!("Ignoring peer reported by {}: {}", handle.address, e);
                        continue;
                    }
                };
                if known.insert(node.address().to_string()) {
                    tracing::info!("Discovered node {} via {}", node.address(), handle.address);
                    let peer_handle = NodeHandle::new(node);
                    discovered.push(Arc::clone(&peer_handle));
                    queue.push_back(peer_handle);
                }
            }
            refreshed.push(Arc::clone(&handle));
        }

        if !discovered.is_empty() {
            self.publish(discovered);
        }
        refreshed
    }

    /// Adds nodes to the known set in one swap, skipping known addresses.
    fn publish(&self, discovered: Vec<Arc<NodeHandle>>) {
        let mut nodes = self.nodes.write();
        let mut next = nodes.to_vec();
        for handle in discovered {
            if next.iter().all(|h| h.address != handle.address) {
                next.push(handle);
            }
        }
        *nodes = Arc::new(next);
    }

    fn addresses_where(&self, predicate: impl Fn(&NodeStatus) -> bool) -> Vec<String> {
        self.nodes()
            .iter()
            .filter(|handle| {
                let status = handle.status();
                !status.is_down() && predicate(&status)
            })
            .map(|handle| handle.address.clone())
            .collect()
    }

    fn describe(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => {
                let seeds: Vec<String> = self.nodes().iter().map(|h| h.address.clone()).collect();
                format!("[{}]", seeds.join(", "))
            }
        }
    }
}

impl fmt::Debug for ReplicaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaSet")
            .field("name", &self.name)
            .field("nodes", &self.nodes())
            .finish()
    }
}
