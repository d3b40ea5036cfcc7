//! Error types for coordination operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during coordination operations.
#[derive(Error, Debug)]
pub enum CoordError {
    /// Acquisition or wait timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// Transient connection failure (connection loss, runtime inconsistency).
    ///
    /// Retryable: the resilient client retries these under the active
    /// backoff strategy before letting them propagate.
    #[error("connection error: {0}")]
    Connection(String),

    /// Session expired or moved; requires a full reconnect with a new identity.
    #[error("session error: {0}")]
    Session(String),

    /// Node-level error reported by the store (caller-visible business logic).
    #[error(transparent)]
    Node(#[from] NodeError),

    /// The client has been shut down; no further operations or reconnects.
    #[error("client has been shut down")]
    Shutdown,

    /// Invalid configuration (malformed path tokens, bad parameters).
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Node-level errors from the coordination store.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The node does not exist.
    #[error("no node: {0}")]
    NoNode(String),

    /// The node already exists.
    #[error("node exists: {0}")]
    NodeExists(String),

    /// The node has children and cannot be deleted.
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// The expected version did not match the node's version.
    #[error("bad version for {0}")]
    BadVersion(String),
}

impl CoordError {
    /// Returns true for session-class errors that warrant reconnect-and-retry.
    pub fn is_session_class(&self) -> bool {
        matches!(self, CoordError::Connection(_) | CoordError::Session(_))
    }

    /// Returns true if this is a `NodeError::NoNode`.
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordError::Node(NodeError::NoNode(_)))
    }

    /// Returns true if this is a `NodeError::NodeExists`.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordError::Node(NodeError::NodeExists(_)))
    }
}

/// Result type for coordination operations.
pub type CoordResult<T> = Result<T, CoordError>;
