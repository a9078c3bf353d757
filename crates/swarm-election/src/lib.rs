//! Lease-based leader election: one election per logical partition, KV
//! `Create`/`Update`-with-expected-revision as the only CAS primitives,
//! never wall-clock comparisons for ordering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_transport::{subjects::buckets, KvError, Transport};
use swarm_types::{InstanceId, LeaderLease, NodeId, Partition, Revision};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionEvent {
    BecameLeader,
    LostLeadership,
}

#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub lease_duration: Duration,
    pub election_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(10),
            election_interval: Duration::from_secs(3),
        }
    }
}

struct ElectionState {
    is_leader: AtomicBool,
    last_revision: Mutex<Option<Revision>>,
    current_leader: Mutex<Option<NodeId>>,
    current_expires_at: Mutex<Option<i64>>,
}

/// One participant in the election for a single partition.
pub struct LeaderElection {
    transport: Arc<dyn Transport>,
    partition: Partition,
    node_id: NodeId,
    instance_id: InstanceId,
    config: ElectionConfig,
    state: Arc<ElectionState>,
    events: broadcast::Sender<ElectionEvent>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LeaderElection {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, partition: Partition, node_id: NodeId, config: ElectionConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            transport,
            partition,
            node_id,
            instance_id: InstanceId::new(),
            config,
            state: Arc::new(ElectionState {
                is_leader: AtomicBool::new(false),
                last_revision: Mutex::new(None),
                current_leader: Mutex::new(None),
                current_expires_at: Mutex::new(None),
            }),
            events,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ElectionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.state.is_leader.load(Ordering::SeqCst)
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        if self.is_leader() {
            return Some(self.node_id.clone());
        }
        self.state.current_leader.lock().await.clone()
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), swarm_transport::TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport
            .ensure_bucket(&buckets::election(&self.partition), self.config.lease_duration)
            .await?;

        let watch = self
            .transport
            .kv_watch_all(&buckets::election(&self.partition), "leader.")
            .await?;

        let mut handles = self.tasks.lock().await;
        handles.push(tokio::spawn(Arc::clone(self).election_loop()));
        handles.push(tokio::spawn(Arc::clone(self).watch_loop(watch)));
        Ok(())
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.is_leader() {
            let key = buckets::leader_key(&self.partition);
            let _ = self.transport.kv_delete(&buckets::election(&self.partition), &key).await;
            self.surrender().await;
        }
        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    async fn surrender(&self) {
        let was_leader = self.state.is_leader.swap(false, Ordering::SeqCst);
        *self.state.last_revision.lock().await = None;
        if was_leader {
            let _ = self.events.send(ElectionEvent::LostLeadership);
        }
    }

    async fn become_leader(&self, revision: Revision) {
        *self.state.last_revision.lock().await = Some(revision);
        let already = self.state.is_leader.swap(true, Ordering::SeqCst);
        *self.state.current_leader.lock().await = Some(self.node_id.clone());
        if !already {
            info!(partition = %self.partition, "became leader");
            let _ = self.events.send(ElectionEvent::BecameLeader);
        }
    }

    async fn election_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.election_interval);
        loop {
            tick.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if self.is_leader() {
                self.renew().await;
            } else {
                self.try_acquire().await;
            }
        }
    }

    async fn try_acquire(&self) {
        let bucket = buckets::election(&self.partition);
        let key = buckets::leader_key(&self.partition);
        let now = now_ms();
        match self.transport.kv_get(&bucket, &key).await {
            Err(KvError::NotFound) => {
                let lease = LeaderLease::new(self.node_id.clone(), self.instance_id, now + self.config.lease_duration.as_millis() as i64);
                match self.transport.kv_create(&bucket, &key, Bytes::from(lease.encode())).await {
                    Ok(revision) => self.become_leader(revision).await,
                    Err(KvError::AlreadyExists) => {}
                    Err(e) => warn!("election create failed: {e}"),
                }
            }
            Ok((value, revision)) => {
                let Ok(lease) = LeaderLease::decode(&String::from_utf8_lossy(&value)) else {
                    warn!("unparseable lease entry; leaving it for the next cycle");
                    return;
                };
                if !lease.is_valid(now) {
                    let fresh = LeaderLease::new(
                        self.node_id.clone(),
                        self.instance_id,
                        now + self.config.lease_duration.as_millis() as i64,
                    );
                    match self
                        .transport
                        .kv_update(&bucket, &key, Bytes::from(fresh.encode()), revision)
                        .await
                    {
                        Ok(new_revision) => self.become_leader(new_revision).await,
                        Err(KvError::ConflictOrNotFound) => {}
                        Err(e) => warn!("election takeover failed: {e}"),
                    }
                } else {
                    *self.state.current_leader.lock().await = Some(lease.leader_id.clone());
                    *self.state.current_expires_at.lock().await = Some(lease.expires_at_ms);
                }
            }
            Err(e) => warn!("election read failed: {e}"),
        }
    }

    async fn renew(&self) {
        let bucket = buckets::election(&self.partition);
        let key = buckets::leader_key(&self.partition);
        let now = now_ms();

        let Some(revision) = *self.state.last_revision.lock().await else {
            self.surrender().await;
            return;
        };

        let should_renew = match self.transport.kv_get(&bucket, &key).await {
            Ok((value, _)) => LeaderLease::decode(&String::from_utf8_lossy(&value))
                .map(|lease| lease.expires_at_ms - now < self.config.lease_duration.as_millis() as i64 / 2)
                .unwrap_or(true),
            Err(_) => true,
        };
        if !should_renew {
            return;
        }

        let fresh = LeaderLease::new(self.node_id.clone(), self.instance_id, now + self.config.lease_duration.as_millis() as i64);
        match self.transport.kv_update(&bucket, &key, Bytes::from(fresh.encode()), revision).await {
            Ok(new_revision) => *self.state.last_revision.lock().await = Some(new_revision),
            Err(e) => {
                warn!("lease renewal failed, surrendering leadership: {e}");
                self.surrender().await;
            }
        }
    }

    async fn watch_loop(self: Arc<Self>, mut watch: swarm_transport::WatchStream) {
        while let Some(event) = watch.recv().await {
            match event.operation {
                swarm_transport::Operation::Delete => {
                    debug!("leader key deleted");
                    if self.is_leader() {
                        self.surrender().await;
                    }
                    *self.state.current_leader.lock().await = None;
                }
                swarm_transport::Operation::Put => {
                    let Ok(lease) = LeaderLease::decode(&String::from_utf8_lossy(&event.value)) else {
                        continue;
                    };
                    if lease.leader_id != self.node_id && self.is_leader() {
                        info!("observed a competing leader write; stepping down");
                        self.surrender().await;
                    }
                    *self.state.current_leader.lock().await = Some(lease.leader_id);
                    *self.state.current_expires_at.lock().await = Some(lease.expires_at_ms);
                }
            }
        }
    }
}

/// Listens for `BecameLeader`/`LostLeadership` and flips `NodeInfo.role`
/// accordingly, preserving the prior role in `metadata["original_role"]`.
pub struct RoleSwitcher;

impl RoleSwitcher {
    pub async fn run(
        mut events: broadcast::Receiver<ElectionEvent>,
        view: Arc<tokio::sync::RwLock<swarm_types::ClusterView>>,
    ) {
        while let Ok(event) = events.recv().await {
            let mut guard = view.write().await;
            let local = guard.local_mut();
            match event {
                ElectionEvent::BecameLeader => local.promote_to_coordinator(),
                ElectionEvent::LostLeadership => local.demote_from_coordinator(),
            }
        }
    }
}
