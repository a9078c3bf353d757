//! An in-process `Transport` implementation used by every other crate's
//! test suite so dispatch/claim/election logic can be exercised without a
//! live broker. Not exported as production transport; mirrors the role
//! `tempfile::TempDir` stand-ins play in the cluster supervisor's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use swarm_types::Revision;
use tokio::sync::{mpsc, oneshot};

use crate::error::{KvError, TransportError};
use crate::kv::{Operation, WatchEvent};
use crate::subscription::{Subscription, WatchStream};
use crate::transport::Transport;

const CHANNEL_CAPACITY: usize = 256;

struct KvValue {
    value: Bytes,
    revision: Revision,
}

#[derive(Default)]
struct Inner {
    subs: HashMap<String, Vec<mpsc::Sender<Bytes>>>,
    queue_groups: HashMap<(String, String), Vec<mpsc::Sender<Bytes>>>,
    queue_cursor: HashMap<(String, String), usize>,
    buckets: HashMap<String, HashMap<String, KvValue>>,
    watchers: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
    responders: HashMap<String, Vec<mpsc::Sender<RequestHandle>>>,
    responder_cursor: HashMap<String, usize>,
}

/// A pending `request()` call, delivered to whichever handler registered
/// via [`MemoryTransport::register_responder`] is picked round-robin.
pub struct RequestHandle {
    payload: Bytes,
    reply_tx: oneshot::Sender<Bytes>,
}

impl RequestHandle {
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn reply(self, data: Bytes) {
        let _ = self.reply_tx.send(data);
    }
}

/// In-memory broker stand-in implementing the full [`Transport`] surface.
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
    next_revision: Arc<AtomicU64>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            next_revision: Arc::new(AtomicU64::new(1)),
        }
    }

    fn alloc_revision(&self) -> Revision {
        Revision(self.next_revision.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a request-reply responder for `subject`, used by tests
    /// that need to exercise [`Transport::request`].
    pub fn register_responder(&self, subject: &str) -> mpsc::Receiver<RequestHandle> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.inner
            .lock()
            .unwrap()
            .responders
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        rx
    }

    fn notify_watchers(inner: &mut Inner, bucket: &str, key: &str, value: &Bytes, revision: Revision, op: Operation) {
        if let Some(watchers) = inner.watchers.get(bucket) {
            for tx in watchers {
                let _ = tx.try_send(WatchEvent {
                    key: key.to_string(),
                    value: value.clone(),
                    revision,
                    operation: op,
                });
            }
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subs.get(subject).cloned() {
            for tx in subs {
                let _ = tx.try_send(payload.clone());
            }
        }
        for ((subj, _group), subs) in inner.queue_groups.clone() {
            if subj != subject || subs.is_empty() {
                continue;
            }
            let cursor = inner
                .queue_cursor
                .entry((subj.clone(), _group.clone()))
                .or_insert(0);
            let idx = *cursor % subs.len();
            *cursor = cursor.wrapping_add(1);
            let _ = subs[idx].try_send(payload.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.inner
            .lock()
            .unwrap()
            .subs
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.inner
            .lock()
            .unwrap()
            .queue_groups
            .entry((subject.to_string(), group.to_string()))
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes, TransportError> {
        let reply_rx = {
            let mut inner = self.inner.lock().unwrap();
            let responders = inner.responders.get(subject).cloned().unwrap_or_default();
            if responders.is_empty() {
                return Err(TransportError::Closed);
            }
            let cursor = inner.responder_cursor.entry(subject.to_string()).or_insert(0);
            let idx = *cursor % responders.len();
            *cursor = cursor.wrapping_add(1);
            let (reply_tx, reply_rx) = oneshot::channel();
            let handle = RequestHandle { payload, reply_tx };
            responders[idx]
                .try_send(handle)
                .map_err(|_| TransportError::Closed)?;
            reply_rx
        };

        tokio::time::timeout(timeout, reply_rx)
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|_| TransportError::Closed)
    }

    async fn ensure_bucket(&self, bucket: &str, _ttl: Duration) -> Result<(), TransportError> {
        self.inner
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn kv_create(&self, bucket: &str, key: &str, value: Bytes) -> Result<Revision, KvError> {
        let revision = self.alloc_revision();
        let mut inner = self.inner.lock().unwrap();
        let bucket_map = inner.buckets.entry(bucket.to_string()).or_default();
        if bucket_map.contains_key(key) {
            return Err(KvError::AlreadyExists);
        }
        bucket_map.insert(
            key.to_string(),
            KvValue {
                value: value.clone(),
                revision,
            },
        );
        Self::notify_watchers(&mut inner, bucket, key, &value, revision, Operation::Put);
        Ok(revision)
    }

    async fn kv_update(
        &self,
        bucket: &str,
        key: &str,
        value: Bytes,
        expected_revision: Revision,
    ) -> Result<Revision, KvError> {
        let revision = self.alloc_revision();
        let mut inner = self.inner.lock().unwrap();
        let bucket_map = inner.buckets.entry(bucket.to_string()).or_default();
        match bucket_map.get(key) {
            Some(existing) if existing.revision == expected_revision => {
                bucket_map.insert(
                    key.to_string(),
                    KvValue {
                        value: value.clone(),
                        revision,
                    },
                );
                Self::notify_watchers(&mut inner, bucket, key, &value, revision, Operation::Put);
                Ok(revision)
            }
            _ => Err(KvError::ConflictOrNotFound),
        }
    }

    async fn kv_put(&self, bucket: &str, key: &str, value: Bytes) -> Result<Revision, TransportError> {
        let revision = self.alloc_revision();
        let mut inner = self.inner.lock().unwrap();
        inner.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            KvValue {
                value: value.clone(),
                revision,
            },
        );
        Self::notify_watchers(&mut inner, bucket, key, &value, revision, Operation::Put);
        Ok(revision)
    }

    async fn kv_get(&self, bucket: &str, key: &str) -> Result<(Bytes, Revision), KvError> {
        let inner = self.inner.lock().unwrap();
        inner
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|v| (v.value.clone(), v.revision))
            .ok_or(KvError::NotFound)
    }

    async fn kv_delete(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner
            .buckets
            .get_mut(bucket)
            .and_then(|b| b.remove(key));
        if removed.is_some() {
            let revision = self.alloc_revision();
            Self::notify_watchers(&mut inner, bucket, key, &Bytes::new(), revision, Operation::Delete);
        }
        Ok(())
    }

    async fn kv_watch_all(&self, bucket: &str, _prefix: &str) -> Result<WatchStream, TransportError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.inner
            .lock()
            .unwrap()
            .watchers
            .entry(bucket.to_string())
            .or_default()
            .push(tx);
        Ok(WatchStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let transport = MemoryTransport::new();
        let mut a = transport.subscribe("x").await.unwrap();
        let mut b = transport.subscribe("x").await.unwrap();
        transport.publish("x", Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Bytes::from_static(b"hi"));
        assert_eq!(b.recv().await.unwrap(), Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn queue_group_delivers_to_exactly_one_member() {
        let transport = MemoryTransport::new();
        let mut a = transport.queue_subscribe("x", "workers").await.unwrap();
        let mut b = transport.queue_subscribe("x", "workers").await.unwrap();
        transport.publish("x", Bytes::from_static(b"one")).await.unwrap();
        transport.publish("x", Bytes::from_static(b"two")).await.unwrap();

        let got_a = a.try_recv();
        let got_b = b.try_recv();
        let total = usize::from(got_a.is_some()) + usize::from(got_b.is_some());
        assert_eq!(total, 2, "two publishes round-robin across two queue members");
    }

    #[tokio::test]
    async fn kv_create_rejects_duplicate() {
        let transport = MemoryTransport::new();
        transport.kv_create("b", "k", Bytes::from_static(b"v1")).await.unwrap();
        let err = transport
            .kv_create("b", "k", Bytes::from_static(b"v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, KvError::AlreadyExists));
    }

    #[tokio::test]
    async fn kv_update_requires_matching_revision() {
        let transport = MemoryTransport::new();
        let rev = transport.kv_create("b", "k", Bytes::from_static(b"v1")).await.unwrap();
        let stale = Revision(rev.0 + 999);
        assert!(matches!(
            transport.kv_update("b", "k", Bytes::from_static(b"v2"), stale).await,
            Err(KvError::ConflictOrNotFound)
        ));
        let new_rev = transport
            .kv_update("b", "k", Bytes::from_static(b"v2"), rev)
            .await
            .unwrap();
        let (val, got_rev) = transport.kv_get("b", "k").await.unwrap();
        assert_eq!(val, Bytes::from_static(b"v2"));
        assert_eq!(got_rev, new_rev);
    }

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let transport = MemoryTransport::new();
        let mut responder = transport.register_responder("svc");
        let server = tokio::spawn(async move {
            let req = responder.recv().await.unwrap();
            assert_eq!(req.payload(), &Bytes::from_static(b"ping"));
            req.reply(Bytes::from_static(b"pong"));
        });
        let reply = transport
            .request("svc", Bytes::from_static(b"ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Bytes::from_static(b"pong"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn request_without_responder_errors() {
        let transport = MemoryTransport::new();
        let result = transport
            .request("nobody-home", Bytes::from_static(b"ping"), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }
}
