use crate::client::NodeAddr;
use crate::scan::NodeFailure;
use std::time::Duration;
use thiserror::Error;

/// Message returned for a composite cursor that fails validation.
pub const INCORRECT_CLUSTER_CURSOR_FORMAT: &str = "Incorrect cluster cursor format";

#[derive(Error, Debug)]
pub enum KeyscopeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{}", INCORRECT_CLUSTER_CURSOR_FORMAT)]
    MalformedCursor(String),

    #[error("Scan failed on node {node}: {message}")]
    NodeScan { node: NodeAddr, message: String },

    #[error("Node {node} did not answer within {after:?}")]
    Timeout { node: NodeAddr, after: Duration },

    /// Every node a request tried failed, whatever the error mode
    #[error(
        "No node could be scanned: {} failed, first error: {}",
        .failures.len(),
        first_message(.failures)
    )]
    AllNodesFailed { failures: Vec<NodeFailure> },

    #[error("Unknown node: {0}")]
    UnknownNode(NodeAddr),

    #[error("{0}")]
    Reply(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KeyscopeError {
    /// Errors caused by caller input rather than by any node.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KeyscopeError::MalformedCursor(_) | KeyscopeError::InvalidArgument(_)
        )
    }

    /// Errors that the orchestrator attributes to a single failed node.
    pub fn is_node_failure(&self) -> bool {
        matches!(
            self,
            KeyscopeError::Io(_)
                | KeyscopeError::Redis(_)
                | KeyscopeError::Protocol(_)
                | KeyscopeError::NodeScan { .. }
                | KeyscopeError::Timeout { .. }
                | KeyscopeError::UnknownNode(_)
                | KeyscopeError::Reply(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, KeyscopeError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, KeyscopeError>;

fn first_message(failures: &[NodeFailure]) -> &str {
    failures.first().map_or("", |f| f.message.as_str())
}
