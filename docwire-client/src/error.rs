//! Client error types.

use crate::config::ConfigError;
use docwire_bson::{Document, Value};
use docwire_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A node could not be reached, a socket failed, or an I/O deadline passed.
    #[error("{0}")]
    Connection(String),

    /// A refresh under `ensure_primary` found the node is no longer primary.
    #[error("{0} is no longer the primary node")]
    TopologyChanged(String),

    /// The server reported that a command or write failed.
    #[error("{}", failure_message(.command, .details))]
    OperationFailure { command: Document, details: Document },

    /// The server flagged a query reply as a failure.
    #[error("{}", failure_message(.command, .details))]
    QueryFailure { command: Document, details: Document },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("reply to request {actual} received while waiting for {expected}")]
    UnexpectedReply { expected: i32, actual: i32 },

    #[error("no reply received for {0}")]
    MissingReply(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection(_))
    }

    pub fn is_topology_changed(&self) -> bool {
        matches!(self, ClientError::TopologyChanged(_))
    }

    /// Returns the server's numeric error code, when it sent one.
    pub fn error_code(&self) -> Option<i64> {
        match self {
            ClientError::OperationFailure { details, .. }
            | ClientError::QueryFailure { details, .. } => details.get("code").and_then(|code| {
                code.as_i64()
                    .or_else(|| code.as_f64().map(|f| f as i64))
            }),
            _ => None,
        }
    }

    /// Returns the server's error document for operation and query failures.
    pub fn details(&self) -> Option<&Document> {
        match self {
            ClientError::OperationFailure { details, .. }
            | ClientError::QueryFailure { details, .. } => Some(details),
            _ => None,
        }
    }
}

fn failure_message(command: &Document, details: &Document) -> String {
    let err = ["err", "errmsg", "$err"]
        .iter()
        .filter_map(|key| details.get(key))
        .find(|value| value.is_truthy())
        .cloned()
        .unwrap_or(Value::Null);

    match details.get("code") {
        Some(code) => format!("operation {command} failed with error {code}: {err}"),
        None => format!("operation {command} failed with error {err}"),
    }
}
