//! Cluster-wide error vocabulary shared by every subsystem crate.
//!
//! The kinds here are the ones named in the coordination plane's error
//! handling design: transient/local failures are retried by their owning
//! component and never surface here, but every terminal failure a task,
//! dispatch, claim, or election can produce is one of these variants.

use std::fmt;

use thiserror::Error;

/// Shared error type for the swarm coordination plane.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("node not available: {0}")]
    NodeNotAvailable(String),

    #[error("no healthy nodes for capability {0:?}")]
    NoHealthyNodes(Vec<String>),

    #[error("handoff timed out for task {0}")]
    HandoffTimeout(String),

    #[error("handoff rejected by {node}: {reason}")]
    HandoffRejected { node: String, reason: String },

    #[error("handoff already in progress for task {0}")]
    HandoffInProgress(String),

    #[error("invalid node info: {0}")]
    InvalidNodeInfo(String),

    #[error("discovery is disabled")]
    DiscoveryDisabled,

    #[error("transport closed")]
    TransportClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown task type: {0}")]
    UnknownTaskType(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwarmError>;

impl SwarmError {
    /// True for errors that the coordinator is expected to surface as a
    /// failed [`crate::TaskResult`] rather than propagate as a programmer
    /// error.
    #[must_use]
    pub fn is_task_outcome(&self) -> bool {
        !matches!(self, SwarmError::UnknownTaskType(_))
    }
}

/// Helper used by callers that only have a `Display`-able context and want
/// a timeout error without constructing the string twice.
pub fn timeout_error(context: impl fmt::Display) -> SwarmError {
    SwarmError::Timeout(context.to_string())
}
