//! Key-value primitives shared by election, claims, and checkpoint storage.

use bytes::Bytes;
use swarm_types::Revision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Put,
    Delete,
}

/// One entry observed via a `WatchAll` stream, carrying the `Operation`
/// header the core spec calls out (`PUT` or `DEL`).
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    pub value: Bytes,
    pub revision: Revision,
    pub operation: Operation,
}
