//! Transport-level error vocabulary.
//!
//! Reconnect to the broker is indefinite and handled internally by a real
//! adapter; [`TransportError::Closed`] is what callers see while that is
//! in progress, and the core spec requires it be surfaced, never
//! silently swallowed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed or disconnected")]
    Closed,

    #[error("request timed out")]
    Timeout,

    #[error("bucket {0} does not exist and could not be created")]
    BucketUnavailable(String),

    #[error("payload too large ({size} bytes, limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("io error: {0}")]
    Io(String),
}

/// Outcome of a KV `Create`/`Update` CAS operation, modeled as its own
/// type rather than folded into [`TransportError`] because
/// `AlreadyExists`/`ConflictOrNotFound` are expected, routine outcomes
/// callers branch on (election loops, claim races), not failures to log.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("key already exists")]
    AlreadyExists,

    #[error("revision conflict or key not found")]
    ConflictOrNotFound,

    #[error("key not found")]
    NotFound,

    #[error(transparent)]
    Transport(#[from] TransportError),
}
