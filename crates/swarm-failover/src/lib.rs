//! Failover: detects dead peers and stalled tasks, and arbitrates which
//! surviving node resumes each one via an atomic claim on shared KV.
//!
//! Claims are the exclusivity primitive (mirrors the create-or-CAS retry
//! idiom in `swarm-election`'s lease acquisition): a claim is a create-if-
//! absent on `PICOCLAW_CLAIMS`, so exactly one node among however many
//! notice the same dead peer or stalled task wins the right to resume it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_lifecycle::{CheckpointStore, TaskLifecycleStore};
use swarm_transport::{subjects::buckets, KvError, Transport};
use swarm_types::{ClaimInfo, ClusterView, EventType, NodeId, Status, SwarmTask, TaskCheckpoint, TaskEvent, TaskId, TaskStatus};
use swarm_worker::Worker;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub check_interval: Duration,
    pub claim_ttl: Duration,
    pub progress_stall_timeout: Duration,
    pub claim_cleanup_interval: Duration,
    /// How long a peer may go unheard-from before its tasks are treated
    /// as orphaned. Distinct from discovery/heartbeat's own suspect/dead
    /// thresholds: this is the point at which *tasks*, not just cluster
    /// membership, are considered abandoned.
    pub heartbeat_timeout: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            claim_ttl: Duration::from_secs(30),
            progress_stall_timeout: Duration::from_secs(120),
            claim_cleanup_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
        }
    }
}

/// Find the original task definition by walking back to the `Created`
/// event, the only place the full `SwarmTask` (prompt, capability,
/// timeout) is durably recorded.
fn original_task_from_history(history: &[TaskEvent]) -> Option<SwarmTask> {
    history
        .iter()
        .find(|e| e.event_type == EventType::Created)
        .and_then(|e| serde_json::from_str(&e.message).ok())
}

pub struct FailoverManager {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    lifecycle: Arc<TaskLifecycleStore>,
    checkpoints: Arc<CheckpointStore>,
    worker: Arc<Worker>,
    local_id: NodeId,
    config: FailoverConfig,
    claims: Arc<RwLock<HashMap<TaskId, ClaimInfo>>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FailoverManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        view: Arc<RwLock<ClusterView>>,
        lifecycle: Arc<TaskLifecycleStore>,
        checkpoints: Arc<CheckpointStore>,
        worker: Arc<Worker>,
        local_id: NodeId,
        config: FailoverConfig,
    ) -> Self {
        Self {
            transport,
            view,
            lifecycle,
            checkpoints,
            worker,
            local_id,
            config,
            claims: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), swarm_transport::TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport.ensure_bucket(buckets::CLAIMS, self.config.claim_ttl).await?;
        let mut handles = self.tasks.lock().await;
        handles.push(tokio::spawn(Arc::clone(self).check_loop()));
        handles.push(tokio::spawn(Arc::clone(self).cleanup_loop()));
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    async fn check_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.check_interval);
        loop {
            tick.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.sweep_dead_peers().await;
            self.sweep_stalled_tasks().await;
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.claim_cleanup_interval);
        loop {
            tick.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.cleanup_expired_claims().await;
        }
    }

    async fn sweep_dead_peers(&self) {
        let now = now_ms();
        let dead_peers: Vec<NodeId> = {
            let view = self.view.read().await;
            view.iter()
                .filter(|n| n.id != self.local_id && n.status != Status::Offline)
                .filter(|n| now - n.last_seen > self.config.heartbeat_timeout.as_millis() as i64)
                .map(|n| n.id.clone())
                .collect()
        };
        for peer in dead_peers {
            match self.lifecycle.get_tasks_by_node(&peer).await {
                Ok(states) => {
                    for state in states {
                        if matches!(state.status, TaskStatus::Assigned | TaskStatus::Running) {
                            self.attempt_recovery(&state.task_id).await;
                        }
                    }
                }
                Err(e) => warn!("failed to enumerate tasks for dead peer {peer}: {e}"),
            }
        }
    }

    async fn sweep_stalled_tasks(&self) {
        let active = match self.lifecycle.get_active_tasks().await {
            Ok(active) => active,
            Err(e) => {
                warn!("failed to list active tasks for stall check: {e}");
                return;
            }
        };
        let now = now_ms();
        for state in active {
            if state.status != TaskStatus::Running {
                continue;
            }
            let history = match self.lifecycle.get_task_history(&state.task_id).await {
                Ok(h) => h,
                Err(e) => {
                    warn!("failed to load history for task {}: {e}", state.task_id);
                    continue;
                }
            };
            let Some(last) = history.last() else { continue };
            if now - last.timestamp > self.config.progress_stall_timeout.as_millis() as i64 {
                self.attempt_recovery(&state.task_id).await;
            }
        }
    }

    async fn attempt_recovery(&self, task_id: &TaskId) {
        let (claimed, checkpoint) = match self.claim_task(task_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("claim attempt for task {task_id} failed: {e}");
                return;
            }
        };
        if !claimed {
            return;
        }

        let history = match self.lifecycle.get_task_history(task_id).await {
            Ok(h) => h,
            Err(e) => {
                warn!("cannot recover task {task_id}: failed to load history: {e}");
                return;
            }
        };
        let Some(mut task) = original_task_from_history(&history) else {
            warn!("cannot recover task {task_id}: no original definition in its history");
            return;
        };
        task.assigned_to = Some(self.local_id.clone());

        if let Err(e) = self
            .lifecycle
            .save_task_status(task_id, EventType::Retry, self.local_id.clone(), TaskStatus::Assigned, "claimed for recovery", now_ms())
            .await
        {
            warn!("failed to record recovery claim for task {task_id}: {e}");
        }

        let checkpoint = match checkpoint {
            Some(cp) => cp,
            None => TaskCheckpoint::new(task_id.clone(), self.local_id.clone(), "none", 0.0, String::new(), now_ms()),
        };
        info!(%task_id, claimed_by = %self.local_id, "recovering task");
        if let Err(rejected) = self.worker.recover_from_checkpoint(task, checkpoint).await {
            warn!("worker intake full, could not resume task {}", rejected.id);
        }
    }

    /// `ClaimTask(task_id) -> (claimed, checkpoint)`: atomic create-if-
    /// absent on the claims bucket; `AlreadyExists` means another node
    /// already won the race. On success, loads whatever checkpoint the
    /// original executor last saved (`NotFound` is fine — it just means
    /// recovery restarts from the original prompt).
    pub async fn claim_task(&self, task_id: &TaskId) -> Result<(bool, Option<TaskCheckpoint>), swarm_transport::TransportError> {
        let claim = ClaimInfo::new(task_id.clone(), self.local_id.clone(), now_ms(), self.config.claim_ttl.as_millis() as i64);
        let key = buckets::claim_key(task_id);
        let payload = serde_json::to_vec(&claim).unwrap_or_default();
        match self.transport.kv_create(buckets::CLAIMS, &key, Bytes::from(payload)).await {
            Ok(_) => {
                self.claims.write().await.insert(task_id.clone(), claim);
                let checkpoint = self.checkpoints.load_checkpoint(task_id).await.unwrap_or_else(|e| {
                    warn!("failed to load checkpoint for claimed task {task_id}: {e}");
                    None
                });
                Ok((true, checkpoint))
            }
            Err(KvError::AlreadyExists) => Ok((false, None)),
            Err(KvError::Transport(e)) => Err(e),
            Err(KvError::ConflictOrNotFound | KvError::NotFound) => Ok((false, None)),
        }
    }

    /// `RenewClaim(task_id)`: unconditional overwrite, since the holder
    /// is already known locally and no other node should be racing it.
    pub async fn renew_claim(&self, task_id: &TaskId) -> Result<(), swarm_transport::TransportError> {
        let mut claims = self.claims.write().await;
        let Some(claim) = claims.get(task_id) else {
            return Ok(());
        };
        let renewed = claim.renewed(now_ms(), self.config.claim_ttl.as_millis() as i64);
        let key = buckets::claim_key(task_id);
        let payload = serde_json::to_vec(&renewed).unwrap_or_default();
        self.transport.kv_put(buckets::CLAIMS, &key, Bytes::from(payload)).await?;
        claims.insert(task_id.clone(), renewed);
        Ok(())
    }

    /// `ReleaseClaim(task_id)`: best-effort delete plus drop the local
    /// record, used once a recovered task reaches a terminal state.
    pub async fn release_claim(&self, task_id: &TaskId) {
        let key = buckets::claim_key(task_id);
        if let Err(e) = self.transport.kv_delete(buckets::CLAIMS, &key).await {
            warn!("failed to delete claim for task {task_id}: {e}");
        }
        self.claims.write().await.remove(task_id);
    }

    async fn cleanup_expired_claims(&self) {
        let now = now_ms();
        let expired: Vec<TaskId> = {
            let claims = self.claims.read().await;
            claims
                .iter()
                .filter(|(_, c)| c.is_expired(now))
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in expired {
            self.release_claim(&id).await;
        }
    }
}
