//! # docwire-client
//!
//! Replica-set aware client for the document database wire protocol.
//!
//! This crate provides:
//! - A TCP connection that sends batches in one write and pairs replies
//! - Nodes that track their role and reconnect once on connection errors
//! - Pipelining of writes with their `getlasterror` acknowledgement
//! - Replica set discovery and primary or secondary selection
//!
//! Call-scoped state (pipeline queue, primary guard, reconnect guard) lives
//! in a [`CallContext`] that each logical call chain passes along.

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod node;
pub mod replica_set;

pub use config::{ClientConfig, ConfigError, ReplicaSetOptions};
pub use connection::{Connection, ConnectionStats};
pub use context::{BoxFuture, CallContext};
pub use error::ClientError;
pub use node::{Node, NodeOptions, NodeStatus};
pub use replica_set::{NodeHandle, ReplicaSet};
