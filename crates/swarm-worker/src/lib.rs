//! The executor: bounded intake, per-task execution with a progress
//! ticker, and checkpoint-based recovery.
//!
//! Intake is a fixed-capacity channel of depth `2 * max_concurrent`
//! (reject on overflow rather than block the subject listener) drained
//! by `max_concurrent` concurrent executor loops pulling from a single
//! shared receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarm_agent::AgentExecutor;
use swarm_lifecycle::{CheckpointStore, TaskLifecycleStore};
use swarm_transport::{subjects, Transport};
use swarm_types::{
    Capability, ClusterView, EventType, NodeId, SwarmTask, TaskCheckpoint, TaskProgress, TaskResult, TaskStatus,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent: usize,
    pub progress_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            progress_interval: Duration::from_secs(5),
        }
    }
}

pub struct Worker {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    lifecycle: Arc<TaskLifecycleStore>,
    checkpoints: Arc<CheckpointStore>,
    agent: Arc<dyn AgentExecutor>,
    local_id: NodeId,
    capabilities: Vec<Capability>,
    config: WorkerConfig,
    sender: mpsc::Sender<SwarmTask>,
    receiver: Arc<Mutex<mpsc::Receiver<SwarmTask>>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Worker {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        view: Arc<RwLock<ClusterView>>,
        lifecycle: Arc<TaskLifecycleStore>,
        checkpoints: Arc<CheckpointStore>,
        agent: Arc<dyn AgentExecutor>,
        local_id: NodeId,
        capabilities: Vec<Capability>,
        config: WorkerConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(2 * config.max_concurrent.max(1));
        Self {
            transport,
            view,
            lifecycle,
            checkpoints,
            agent,
            local_id,
            capabilities,
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a task for execution, rejecting (not blocking) if the
    /// bounded channel is already full.
    pub fn submit(&self, task: SwarmTask) -> Result<(), SwarmTask> {
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(task)) => Err(task),
            Err(mpsc::error::TrySendError::Closed(task)) => Err(task),
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), swarm_transport::TransportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut handles = self.tasks.lock().await;

        let mut assign_sub = self.transport.subscribe(&subjects::task_assign(&self.local_id)).await?;
        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            while let Some(bytes) = assign_sub.recv().await {
                this.accept_wire_task(&bytes);
            }
        }));

        for cap in &self.capabilities {
            let mut broadcast_sub = self
                .transport
                .queue_subscribe(&subjects::task_broadcast(cap), subjects::WORKERS_QUEUE_GROUP)
                .await?;
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                while let Some(bytes) = broadcast_sub.recv().await {
                    this.accept_wire_task(&bytes);
                }
            }));
        }

        for _ in 0..self.config.max_concurrent.max(1) {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.executor_loop().await }));
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    fn accept_wire_task(&self, bytes: &[u8]) {
        match serde_json::from_slice::<SwarmTask>(bytes) {
            Ok(task) => {
                let task_id = task.id.clone();
                if let Err(rejected) = self.submit(task) {
                    warn!(task_id = %rejected.id, "intake channel full, rejecting task");
                } else {
                    info!(%task_id, "task enqueued");
                }
            }
            Err(e) => warn!("dropping malformed task payload: {e}"),
        }
    }

    async fn executor_loop(self: Arc<Self>) {
        loop {
            let task = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(task) = task else { break };
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            self.run_task(task).await;
        }
    }

    async fn emit(&self, task: &SwarmTask, event_type: EventType, message: impl Into<String>) {
        if let Err(e) = self
            .lifecycle
            .save_task_status(&task.id, event_type, self.local_id.clone(), task.status, message, now_ms())
            .await
        {
            warn!("failed to record lifecycle event for task {}: {e}", task.id);
        }
    }

    async fn run_task(&self, mut task: SwarmTask) {
        {
            let mut view = self.view.write().await;
            view.local_mut().increment_tasks();
        }
        // Reachable from either `Pending` (broadcast/unassigned direct
        // dispatch) or `Assigned` (coordinator-routed); only an
        // already-terminal task would reject this.
        let _ = task.advance(TaskStatus::Running, now_ms());
        self.emit(&task, EventType::Started, "execution started").await;

        let timeout = Duration::from_millis(task.effective_timeout_ms());
        let progress_handle = tokio::spawn(Self::progress_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.lifecycle),
            task.id.clone(),
            self.local_id.clone(),
            timeout,
            self.config.progress_interval,
        ));

        let outcome = tokio::time::timeout(timeout, self.agent.process_direct(&task.prompt, task.id.as_str())).await;
        progress_handle.abort();

        let result = match outcome {
            Ok(Ok(output)) => TaskResult::done(task.id.clone(), self.local_id.clone(), output),
            Ok(Err(error)) => TaskResult::failed(task.id.clone(), self.local_id.clone(), error),
            Err(_) => TaskResult::failed(task.id.clone(), self.local_id.clone(), format!("timeout after {timeout:?}")),
        };

        let _ = task.advance(result.status, now_ms());
        let (event_type, message) = match result.status {
            TaskStatus::Done => (EventType::Completed, result.result.clone().unwrap_or_default()),
            _ => (EventType::Failed, result.error.clone().unwrap_or_default()),
        };
        self.emit(&task, event_type, message).await;

        if let Ok(payload) = serde_json::to_vec(&result) {
            if let Err(e) = self.transport.publish(&subjects::task_result(&task.id), payload.into()).await {
                warn!("failed to publish result for task {}: {e}", task.id);
            }
        }

        {
            let mut view = self.view.write().await;
            view.local_mut().decrement_tasks();
        }
    }

    /// Publishes a `TaskProgress` beacon on every tick and, alongside it,
    /// saves a [`TaskCheckpoint`] and emits `Checkpoint` to the lifecycle
    /// log — the mechanism spec §4.6/§4.10 rely on for a different node
    /// to resume this task from partial progress if this one dies
    /// mid-execution. The agent executor in this workspace has no
    /// incremental-output channel, so the progress message itself (its
    /// best-effort description of how far along the task is) stands in
    /// as the checkpoint's partial result.
    async fn progress_loop(
        transport: Arc<dyn Transport>,
        checkpoints: Arc<CheckpointStore>,
        lifecycle: Arc<TaskLifecycleStore>,
        task_id: swarm_types::TaskId,
        node_id: NodeId,
        timeout: Duration,
        interval: Duration,
    ) {
        let start = tokio::time::Instant::now();
        let mut tick = tokio::time::interval(interval);
        tick.tick().await;
        loop {
            tick.tick().await;
            let elapsed = start.elapsed().as_secs_f64();
            let fraction = (elapsed / timeout.as_secs_f64().max(f64::EPSILON)).clamp(0.1, 0.9);
            let message = if fraction < 1.0 / 3.0 {
                "initializing"
            } else if fraction < 2.0 / 3.0 {
                "processing"
            } else {
                "finalizing"
            };
            let beacon = TaskProgress {
                task_id: task_id.clone(),
                node_id: node_id.clone(),
                progress: fraction,
                message: message.to_string(),
            };
            if let Ok(payload) = serde_json::to_vec(&beacon) {
                let _ = transport.publish(&subjects::task_progress(&task_id), payload.into()).await;
            }

            let checkpoint = TaskCheckpoint::new(task_id.clone(), node_id.clone(), "progress", fraction, message, now_ms());
            if let Err(e) = checkpoints.save_checkpoint(&checkpoint).await {
                warn!("failed to save checkpoint for task {task_id}: {e}");
            }
            if let Err(e) = lifecycle
                .save_task_status(&task_id, EventType::Checkpoint, node_id.clone(), TaskStatus::Running, message, now_ms())
                .await
            {
                warn!("failed to record checkpoint event for task {task_id}: {e}");
            }
        }
    }

    /// Resume a task from a checkpoint: build the recovery prompt, emit
    /// `Retry`, and re-enter the normal execution path.
    pub async fn recover_from_checkpoint(&self, mut task: SwarmTask, checkpoint: TaskCheckpoint) -> Result<(), SwarmTask> {
        task.prompt = checkpoint.recovery_prompt(&task.prompt);
        self.emit(&task, EventType::Retry, "resuming from checkpoint").await;
        self.submit(task)
    }

    pub async fn load_checkpoint(&self, task_id: &swarm_types::TaskId) -> swarm_lifecycle::Result<Option<TaskCheckpoint>> {
        self.checkpoints.load_checkpoint(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_agent::StubAgentExecutor;
    use swarm_transport::MemoryTransport;
    use swarm_types::{NodeInfo, TaskId, TaskType};

    fn view() -> Arc<RwLock<ClusterView>> {
        let node = NodeInfo::new(NodeId::new("w1"), "127.0.0.1", 7947, 4).with_capabilities([Capability::new("code")]);
        Arc::new(RwLock::new(ClusterView::new(node)))
    }

    async fn worker(transport: Arc<dyn Transport>, agent: Arc<dyn AgentExecutor>, max_concurrent: usize) -> Arc<Worker> {
        let lifecycle = Arc::new(TaskLifecycleStore::new(transport.clone()));
        lifecycle.start().await.unwrap();
        let checkpoints = Arc::new(CheckpointStore::new(transport.clone()));
        checkpoints.start().await.unwrap();
        Arc::new(Worker::new(
            transport,
            view(),
            lifecycle,
            checkpoints,
            agent,
            NodeId::new("w1"),
            vec![Capability::new("code")],
            WorkerConfig {
                max_concurrent,
                progress_interval: Duration::from_millis(20),
            },
        ))
    }

    #[tokio::test]
    async fn assigned_task_executes_and_publishes_result() {
        let transport = Arc::new(MemoryTransport::new());
        let agent = Arc::new(StubAgentExecutor::new());
        let w = worker(transport.clone(), agent, 2).await;
        w.start().await.unwrap();

        let mut result_sub = transport.subscribe(&subjects::task_result(&TaskId::new("t1"))).await.unwrap();
        let task = SwarmTask::new(TaskId::new("t1"), TaskType::Direct, "ping", now_ms());
        let payload = serde_json::to_vec(&task).unwrap();
        transport.publish(&subjects::task_assign(&NodeId::new("w1")), payload.into()).await.unwrap();

        let bytes = tokio::time::timeout(Duration::from_secs(1), result_sub.recv()).await.unwrap().unwrap();
        let result: TaskResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(result.status, TaskStatus::Done);
        assert!(result.result.unwrap().contains("ping"));
        w.stop().await;
    }

    #[tokio::test]
    async fn full_intake_channel_rejects_without_blocking() {
        let transport = Arc::new(MemoryTransport::new());
        let agent = Arc::new(StubAgentExecutor::new());
        let w = worker(transport.clone(), agent, 1).await;
        // Capacity is 2 * max_concurrent = 2; fill it without starting any
        // executor loop so nothing drains concurrently.
        w.submit(SwarmTask::new(TaskId::new("a"), TaskType::Direct, "a", now_ms())).unwrap();
        w.submit(SwarmTask::new(TaskId::new("b"), TaskType::Direct, "b", now_ms())).unwrap();
        let rejected = w.submit(SwarmTask::new(TaskId::new("c"), TaskType::Direct, "c", now_ms()));
        assert!(rejected.is_err());
    }

    #[tokio::test]
    async fn timeout_produces_failed_result() {
        let transport = Arc::new(MemoryTransport::new());
        struct Slow;
        #[async_trait::async_trait]
        impl AgentExecutor for Slow {
            async fn process_direct(&self, _prompt: &str, _session_id: &str) -> Result<String, String> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok("late".to_string())
            }
        }
        let w = worker(transport.clone(), Arc::new(Slow), 1).await;
        w.start().await.unwrap();

        let mut result_sub = transport.subscribe(&subjects::task_result(&TaskId::new("slow"))).await.unwrap();
        let mut task = SwarmTask::new(TaskId::new("slow"), TaskType::Direct, "take a while", now_ms());
        task.timeout_ms = 50;
        let payload = serde_json::to_vec(&task).unwrap();
        transport.publish(&subjects::task_assign(&NodeId::new("w1")), payload.into()).await.unwrap();

        let bytes = tokio::time::timeout(Duration::from_secs(1), result_sub.recv()).await.unwrap().unwrap();
        let result: TaskResult = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("timeout"));
        w.stop().await;
    }

    #[tokio::test]
    async fn long_running_task_saves_checkpoints_and_emits_checkpoint_events() {
        let transport = Arc::new(MemoryTransport::new());
        struct Plodding;
        #[async_trait::async_trait]
        impl AgentExecutor for Plodding {
            async fn process_direct(&self, _prompt: &str, _session_id: &str) -> Result<String, String> {
                tokio::time::sleep(Duration::from_millis(60)).await;
                Ok("done".to_string())
            }
        }
        let w = worker(transport.clone(), Arc::new(Plodding), 1).await;
        w.start().await.unwrap();

        let mut result_sub = transport.subscribe(&subjects::task_result(&TaskId::new("p1"))).await.unwrap();
        let task = SwarmTask::new(TaskId::new("p1"), TaskType::Direct, "plod along", now_ms());
        let payload = serde_json::to_vec(&task).unwrap();
        transport.publish(&subjects::task_assign(&NodeId::new("w1")), payload.into()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), result_sub.recv()).await.unwrap().unwrap();

        let saved = w.checkpoints.load_checkpoint(&TaskId::new("p1")).await.unwrap();
        assert!(saved.is_some(), "progress loop should have saved a checkpoint before the task finished");

        let history = w.lifecycle.get_task_history(&TaskId::new("p1")).await.unwrap();
        assert!(history.iter().any(|e| e.event_type == EventType::Checkpoint));
        w.stop().await;
    }

    #[tokio::test]
    async fn recover_from_checkpoint_embeds_partial_result_in_prompt() {
        let transport = Arc::new(MemoryTransport::new());
        let agent = Arc::new(StubAgentExecutor::new());
        let w = worker(transport.clone(), agent, 1).await;
        w.start().await.unwrap();

        let mut result_sub = transport.subscribe(&subjects::task_result(&TaskId::new("r1"))).await.unwrap();
        let task = SwarmTask::new(TaskId::new("r1"), TaskType::Direct, "original prompt", now_ms());
        let checkpoint = TaskCheckpoint::new(TaskId::new("r1"), NodeId::new("w0"), "partial", 0.4, "partial output so far", now_ms());
        w.recover_from_checkpoint(task, checkpoint).await.unwrap();

        let bytes = tokio::time::timeout(Duration::from_secs(1), result_sub.recv()).await.unwrap().unwrap();
        let result: TaskResult = serde_json::from_slice(&bytes).unwrap();
        assert!(result.result.unwrap().contains("partial output so far"));
        w.stop().await;
    }
}
