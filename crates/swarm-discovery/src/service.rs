//! Discovery / Membership: announce self, track peers, run the periodic
//! suspect/offline health check.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_transport::{subjects, Transport};
use swarm_types::{ClusterView, HmacSigner, NodeId, NodeInfo, SignedEnvelope, Status};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::{DiscoveryError, Result};
use crate::messages::{DiscoveryAnnounce, DiscoveryQuery, ShutdownNotice};

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub gossip_interval: Duration,
    pub node_timeout: Duration,
    pub dead_node_timeout: Duration,
    /// Peers already `Offline` are dropped from the view entirely once
    /// their staleness passes this. `None` keeps dead peers forever.
    pub removal_timeout: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_secs(1),
            node_timeout: Duration::from_secs(5),
            dead_node_timeout: Duration::from_secs(30),
            removal_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Tracks peers and answers discovery queries. Does not itself decide
/// task routing; see `swarm-discovery::selection` for that.
pub struct DiscoveryService {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    config: DiscoveryConfig,
    signer: Option<Arc<HmacSigner>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sign `payload` with `signer` when one is configured, otherwise pass it
/// through unsigned. Gossip authentication is opt-in (spec.md §6): a node
/// with no shared secret configured neither signs nor expects signatures.
fn encode(signer: Option<&HmacSigner>, payload: Vec<u8>) -> serde_json::Result<Vec<u8>> {
    match signer {
        Some(signer) => serde_json::to_vec(&signer.sign(&payload, now_ms())),
        None => Ok(payload),
    }
}

/// Inverse of [`encode`]. When a signer is configured, `bytes` must decode
/// as a [`SignedEnvelope`] with a valid, fresh signature or the message is
/// rejected outright — the inner payload is never parsed otherwise.
fn decode(signer: Option<&HmacSigner>, bytes: &[u8]) -> Option<Vec<u8>> {
    match signer {
        Some(signer) => {
            let envelope: SignedEnvelope = serde_json::from_slice(bytes).ok()?;
            signer.verify(&envelope, now_ms()).ok()?;
            Some(envelope.payload)
        }
        None => Some(bytes.to_vec()),
    }
}

impl DiscoveryService {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, local: NodeInfo, config: DiscoveryConfig) -> Self {
        Self::with_shared_secret(transport, local, config, None)
    }

    /// As [`Self::new`], additionally signing and verifying gossip
    /// messages with an HMAC-SHA256 key derived from `shared_secret`.
    #[must_use]
    pub fn with_shared_secret(
        transport: Arc<dyn Transport>,
        local: NodeInfo,
        config: DiscoveryConfig,
        shared_secret: Option<&str>,
    ) -> Self {
        Self {
            transport,
            view: Arc::new(RwLock::new(ClusterView::new(local))),
            config,
            signer: shared_secret.map(|s| Arc::new(HmacSigner::new(s.as_bytes().to_vec()))),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn view(&self) -> Arc<RwLock<ClusterView>> {
        Arc::clone(&self.view)
    }

    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let announce_sub = self.transport.subscribe(subjects::discovery_announce()).await?;
        let query_sub = self.transport.subscribe(subjects::discovery_query()).await?;
        let local_id = self.view.read().await.local().id.clone();
        let shutdown_sub = self
            .transport
            .subscribe(&subjects::system_shutdown(&local_id))
            .await?;

        self.announce().await?;

        let mut handles = self.tasks.lock().await;
        handles.push(tokio::spawn(Self::announce_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.view),
            self.config.clone(),
            self.signer.clone(),
            Arc::clone(&self.running),
        )));
        handles.push(tokio::spawn(Self::listen_announces(
            Arc::clone(&self.view),
            self.signer.clone(),
            announce_sub,
        )));
        handles.push(tokio::spawn(Self::listen_shutdowns(
            Arc::clone(&self.view),
            shutdown_sub,
        )));
        handles.push(tokio::spawn(Self::listen_queries(query_sub)));
        handles.push(tokio::spawn(Self::health_check_loop(
            Arc::clone(&self.view),
            self.config.clone(),
            Arc::clone(&self.running),
        )));

        info!("discovery service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let local_id = self.view.read().await.local().id.clone();
        let notice = ShutdownNotice {
            node_id: local_id.clone(),
            timestamp: now_ms(),
        };
        let bytes = serde_json::to_vec(&notice)?;
        let _ = self
            .transport
            .publish(&subjects::system_shutdown(&local_id), Bytes::from(bytes))
            .await;

        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        info!("discovery service stopped");
        Ok(())
    }

    pub async fn announce(&self) -> Result<()> {
        let local = self.view.read().await.local().clone();
        let msg = DiscoveryAnnounce {
            node: local,
            timestamp: now_ms(),
        };
        let payload = serde_json::to_vec(&msg)?;
        let bytes = encode(self.signer.as_deref(), payload)?;
        self.transport
            .publish(subjects::discovery_announce(), Bytes::from(bytes))
            .await
            .map_err(DiscoveryError::from)
    }

    async fn announce_loop(
        transport: Arc<dyn Transport>,
        view: Arc<RwLock<ClusterView>>,
        config: DiscoveryConfig,
        signer: Option<Arc<HmacSigner>>,
        running: Arc<AtomicBool>,
    ) {
        let mut tick = interval(config.gossip_interval);
        loop {
            tick.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let local = view.read().await.local().clone();
            let msg = DiscoveryAnnounce {
                node: local,
                timestamp: now_ms(),
            };
            let Ok(payload) = serde_json::to_vec(&msg) else { continue };
            match encode(signer.as_deref(), payload) {
                Ok(bytes) => {
                    if let Err(e) = transport.publish(subjects::discovery_announce(), Bytes::from(bytes)).await {
                        warn!("discovery announce publish failed: {e}");
                    }
                }
                Err(e) => warn!("failed to encode discovery announce: {e}"),
            }
        }
    }

    async fn listen_announces(
        view: Arc<RwLock<ClusterView>>,
        signer: Option<Arc<HmacSigner>>,
        mut sub: swarm_transport::Subscription,
    ) {
        while let Some(bytes) = sub.recv().await {
            let Some(payload) = decode(signer.as_deref(), &bytes) else {
                debug!("dropping unauthenticated discovery announce");
                continue;
            };
            match serde_json::from_slice::<DiscoveryAnnounce>(&payload) {
                Ok(announce) => {
                    view.write().await.upsert_peer(announce.node, announce.timestamp);
                }
                Err(e) => debug!("dropping malformed discovery announce: {e}"),
            }
        }
    }

    async fn listen_shutdowns(view: Arc<RwLock<ClusterView>>, mut sub: swarm_transport::Subscription) {
        while let Some(bytes) = sub.recv().await {
            if let Ok(notice) = serde_json::from_slice::<ShutdownNotice>(&bytes) {
                info!("peer {} announced shutdown", notice.node_id);
                view.write().await.mark_offline(&notice.node_id);
            }
        }
    }

    async fn listen_queries(mut sub: swarm_transport::Subscription) {
        while let Some(bytes) = sub.recv().await {
            if let Ok(query) = serde_json::from_slice::<DiscoveryQuery>(&bytes) {
                debug!("discovery query from {}", query.requester);
            }
        }
    }

    /// `Online -> Suspicious` at `node_timeout`, `Suspicious -> Offline`
    /// at `dead_node_timeout`, and (when `removal_timeout` is set) a dead
    /// peer whose staleness passes it is dropped from the view entirely,
    /// scanning peer age. The local node is never mutated here.
    async fn health_check_loop(view: Arc<RwLock<ClusterView>>, config: DiscoveryConfig, running: Arc<AtomicBool>) {
        let mut tick = interval(config.gossip_interval.max(Duration::from_millis(50)));
        loop {
            tick.tick().await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let now = now_ms();
            let mut guard = view.write().await;
            let local_id = guard.local_node_id.clone();
            let to_offline: Vec<NodeId> = guard
                .iter()
                .filter(|n| n.id != local_id)
                .filter_map(|n| {
                    let age = Duration::from_millis((now - n.last_seen).max(0) as u64);
                    (n.status == Status::Suspicious && age >= config.dead_node_timeout).then(|| n.id.clone())
                })
                .collect();
            let to_suspicious: Vec<NodeId> = guard
                .iter()
                .filter(|n| n.id != local_id)
                .filter_map(|n| {
                    let age = Duration::from_millis((now - n.last_seen).max(0) as u64);
                    (n.status == Status::Online && age >= config.node_timeout).then(|| n.id.clone())
                })
                .collect();
            let to_remove: Vec<NodeId> = config
                .removal_timeout
                .map(|removal_timeout| {
                    guard
                        .iter()
                        .filter(|n| n.id != local_id)
                        .filter_map(|n| {
                            let age = Duration::from_millis((now - n.last_seen).max(0) as u64);
                            (n.status == Status::Offline && age >= removal_timeout).then(|| n.id.clone())
                        })
                        .collect()
                })
                .unwrap_or_default();
            for id in to_offline {
                guard.mark_offline(&id);
            }
            for id in to_suspicious {
                guard.mark_suspicious(&id);
            }
            for id in to_remove {
                guard.remove(&id);
            }
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_transport::MemoryTransport;
    use swarm_types::NodeId;

    fn local_node(id: &str) -> NodeInfo {
        NodeInfo::new(NodeId::new(id), "127.0.0.1", 7946, 4)
    }

    #[tokio::test]
    async fn announce_publishes_to_discovery_subject() {
        let transport = Arc::new(MemoryTransport::new());
        let mut sub = transport.subscribe(subjects::discovery_announce()).await.unwrap();
        let service = DiscoveryService::new(transport.clone(), local_node("n1"), DiscoveryConfig::default());

        service.announce().await.unwrap();

        let bytes = sub.recv().await.unwrap();
        let msg: DiscoveryAnnounce = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(msg.node.id, NodeId::new("n1"));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let transport = Arc::new(MemoryTransport::new());
        let service = DiscoveryService::new(transport, local_node("n1"), DiscoveryConfig::default());
        service.start().await.unwrap();
        service.start().await.unwrap();
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn peer_announce_is_tracked_in_view() {
        let transport = Arc::new(MemoryTransport::new());
        let service = DiscoveryService::new(transport.clone(), local_node("n1"), DiscoveryConfig::default());
        service.start().await.unwrap();

        let peer = local_node("n2");
        let msg = DiscoveryAnnounce {
            node: peer,
            timestamp: now_ms(),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        transport
            .publish(subjects::discovery_announce(), Bytes::from(bytes))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let view = service.view();
        assert!(view.read().await.get(&NodeId::new("n2")).is_some());

        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn signed_announce_is_accepted_by_a_peer_sharing_the_secret() {
        let transport = Arc::new(MemoryTransport::new());
        let service =
            DiscoveryService::with_shared_secret(transport.clone(), local_node("n1"), DiscoveryConfig::default(), Some("top-secret"));
        service.start().await.unwrap();

        let peer = DiscoveryService::with_shared_secret(
            Arc::new(MemoryTransport::new()),
            local_node("n2"),
            DiscoveryConfig::default(),
            Some("top-secret"),
        );
        let envelope = peer
            .signer
            .as_ref()
            .unwrap()
            .sign(&serde_json::to_vec(&DiscoveryAnnounce { node: local_node("n2"), timestamp: now_ms() }).unwrap(), now_ms());
        transport
            .publish(subjects::discovery_announce(), Bytes::from(serde_json::to_vec(&envelope).unwrap()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.view().read().await.get(&NodeId::new("n2")).is_some());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unsigned_announce_is_dropped_when_signing_is_required() {
        let transport = Arc::new(MemoryTransport::new());
        let service =
            DiscoveryService::with_shared_secret(transport.clone(), local_node("n1"), DiscoveryConfig::default(), Some("top-secret"));
        service.start().await.unwrap();

        let msg = DiscoveryAnnounce { node: local_node("n2"), timestamp: now_ms() };
        transport
            .publish(subjects::discovery_announce(), Bytes::from(serde_json::to_vec(&msg).unwrap()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(service.view().read().await.get(&NodeId::new("n2")).is_none());
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn offline_peer_is_removed_once_past_removal_timeout() {
        let transport = Arc::new(MemoryTransport::new());
        let service = DiscoveryService::new(
            transport,
            local_node("n1"),
            DiscoveryConfig {
                gossip_interval: Duration::from_millis(20),
                node_timeout: Duration::from_millis(200),
                dead_node_timeout: Duration::from_millis(400),
                removal_timeout: Some(Duration::from_millis(700)),
            },
        );
        let stale_at = now_ms() - 500;
        service.view().write().await.upsert_peer(local_node("p1"), stale_at);
        service.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(180)).await;
        assert_eq!(
            service.view().read().await.get(&NodeId::new("p1")).map(|n| n.status),
            Some(Status::Offline),
            "peer should be offline after dead_node_timeout elapses"
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(
            service.view().read().await.get(&NodeId::new("p1")).is_none(),
            "peer should be removed once its staleness passes removal_timeout"
        );

        service.stop().await.unwrap();
    }
}
