//! The broker-agnostic transport adapter: pub/sub, request/reply, and an
//! atomic key-value store with optimistic CAS.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use swarm_types::Revision;

use crate::error::{KvError, TransportError};
use crate::subscription::{Subscription, WatchStream};

/// Safe single-message size limits the core spec calls out: gossip
/// messages should stay under this to avoid broker-side rejection.
pub const MAX_GOSSIP_PAYLOAD_BYTES: usize = 64 * 1024;
/// Session-transfer / task payloads may be larger, up to this limit.
pub const MAX_SESSION_PAYLOAD_BYTES: usize = 128 * 1024;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Fire-and-forget publish to every current subscriber.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Subscribe; every message on `subject` is delivered to this handle.
    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError>;

    /// Subscribe as a member of `group`; each message is delivered to
    /// exactly one group member (queue-group semantics, used for
    /// capability-fanout broadcast tasks).
    async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> Result<Subscription, TransportError>;

    /// Publish and await a single reply delivered via an inbox, bounded
    /// by `timeout`.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Ensure a KV bucket exists with the given entry TTL. Idempotent.
    async fn ensure_bucket(&self, bucket: &str, ttl: Duration) -> Result<(), TransportError>;

    /// Atomic create-if-absent.
    async fn kv_create(&self, bucket: &str, key: &str, value: Bytes) -> Result<Revision, KvError>;

    /// Atomic compare-and-swap update; fails with `ConflictOrNotFound` if
    /// the current revision does not match `expected_revision`.
    async fn kv_update(
        &self,
        bucket: &str,
        key: &str,
        value: Bytes,
        expected_revision: Revision,
    ) -> Result<Revision, KvError>;

    /// Unconditional write.
    async fn kv_put(&self, bucket: &str, key: &str, value: Bytes) -> Result<Revision, TransportError>;

    async fn kv_get(&self, bucket: &str, key: &str) -> Result<(Bytes, Revision), KvError>;

    async fn kv_delete(&self, bucket: &str, key: &str) -> Result<(), TransportError>;

    /// Stream of `Put`/`Delete` events for every key under `prefix`.
    async fn kv_watch_all(&self, bucket: &str, prefix: &str) -> Result<WatchStream, TransportError>;
}
