//! The dispatcher: candidate selection, remote assignment with a bounded
//! wait on the result subject, and local fallback when no peer qualifies.
//!
//! `UnknownTaskType` rejection (the core spec's dispatch step 1) happens
//! at the wire boundary: `TaskType`'s `Deserialize` impl runs
//! [`swarm_types::TaskType::parse`], so a `SwarmTask` decoded off the wire
//! with an unrecognized `type` field never gets constructed at all. By
//! the time `dispatch_task` receives a [`SwarmTask`] here, `task_type` is
//! already one of the closed enum's valid variants — there is nothing
//! left for `dispatch_task` itself to check.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_agent::AgentExecutor;
use swarm_discovery::{select_by_capability, select_least_loaded};
use swarm_lifecycle::TaskLifecycleStore;
use swarm_transport::{subjects, Transport};
use swarm_types::{ClusterView, EventType, NodeId, SwarmTask, TaskResult, TaskStatus, TaskType};
use tokio::sync::RwLock;
use tracing::{info, warn};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Coordinator {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    lifecycle: Arc<TaskLifecycleStore>,
    agent: Arc<dyn AgentExecutor>,
    local_id: NodeId,
    available_load_threshold: f64,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        view: Arc<RwLock<ClusterView>>,
        lifecycle: Arc<TaskLifecycleStore>,
        agent: Arc<dyn AgentExecutor>,
        local_id: NodeId,
        available_load_threshold: f64,
    ) -> Self {
        Self {
            transport,
            view,
            lifecycle,
            agent,
            local_id,
            available_load_threshold,
        }
    }

    async fn emit(&self, task: &SwarmTask, event_type: EventType, node_id: NodeId, message: impl Into<String>) {
        if let Err(e) = self
            .lifecycle
            .save_task_status(&task.id, event_type, node_id, task.status, message, now_ms())
            .await
        {
            warn!("failed to record lifecycle event for task {}: {e}", task.id);
        }
    }

    async fn emit_terminal(&self, task: &mut SwarmTask, result: &TaskResult) {
        let _ = task.advance(result.status, now_ms());
        let (event_type, message) = match result.status {
            TaskStatus::Done => (EventType::Completed, result.result.clone().unwrap_or_default()),
            _ => (EventType::Failed, result.error.clone().unwrap_or_default()),
        };
        self.emit(task, event_type, result.node_id.clone(), message).await;
    }

    async fn fail_dispatch(&self, task: &mut SwarmTask, error: impl Into<String>) -> TaskResult {
        let result = TaskResult::failed(task.id.clone(), self.local_id.clone(), error);
        self.emit_terminal(task, &result).await;
        result
    }

    async fn local_fallback(&self, task: &mut SwarmTask) -> TaskResult {
        let result = match self.agent.process_direct(&task.prompt, task.id.as_str()).await {
            Ok(output) => TaskResult::done(task.id.clone(), self.local_id.clone(), output),
            Err(error) => TaskResult::failed(task.id.clone(), self.local_id.clone(), error),
        };
        self.emit_terminal(task, &result).await;
        result
    }

    /// `DispatchTask(ctx, task) -> TaskResult`, bounded by
    /// `min(ctx_deadline, task.effective_timeout_ms())`.
    pub async fn dispatch_task(&self, mut task: SwarmTask, ctx_deadline: Duration) -> TaskResult {
        // The `Created` event's message carries the task's own JSON
        // encoding rather than free text: it is the only place the full
        // task definition (prompt, capability, timeout) is durably kept,
        // and failover recovery reconstructs a task to resume from it.
        let snapshot = serde_json::to_string(&task).unwrap_or_default();
        self.emit(&task, EventType::Created, self.local_id.clone(), snapshot).await;

        let caps: Vec<_> = task.capability.clone().into_iter().collect();
        let target = {
            let view = self.view.read().await;
            let pool = select_by_capability(&view, &caps, self.available_load_threshold);
            if let Some(assigned) = task.assigned_to.clone() {
                match pool.into_iter().find(|n| n.id == assigned) {
                    Some(node) => Some(node.clone()),
                    None => {
                        return self
                            .fail_dispatch(&mut task, format!("assigned node {assigned} is not an eligible candidate"))
                            .await;
                    }
                }
            } else {
                select_least_loaded(&pool).cloned()
            }
        };

        let Some(target) = target else {
            return self.local_fallback(&mut task).await;
        };

        task.assigned_to = Some(target.id.clone());
        if let Err(e) = task.advance(TaskStatus::Assigned, now_ms()) {
            warn!("could not mark task {} assigned: {e}", task.id);
        }
        self.emit(&task, EventType::Assigned, target.id.clone(), "assigned").await;

        let mut result_sub = match self.transport.subscribe(&subjects::task_result(&task.id)).await {
            Ok(sub) => sub,
            Err(e) => return self.fail_dispatch(&mut task, format!("subscribe failed: {e}")).await,
        };

        let payload = match serde_json::to_vec(&task) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => return self.fail_dispatch(&mut task, format!("encode failed: {e}")).await,
        };
        let publish_result = match task.task_type {
            TaskType::Broadcast => {
                let Some(cap) = task.capability.clone() else {
                    return self.fail_dispatch(&mut task, "broadcast task missing capability").await;
                };
                self.transport.publish(&subjects::task_broadcast(&cap), payload).await
            }
            TaskType::Direct | TaskType::Workflow => self.transport.publish(&subjects::task_assign(&target.id), payload).await,
        };
        if let Err(e) = publish_result {
            return self.fail_dispatch(&mut task, format!("publish failed: {e}")).await;
        }

        let timeout = ctx_deadline.min(Duration::from_millis(task.effective_timeout_ms()));
        match tokio::time::timeout(timeout, result_sub.recv()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<TaskResult>(&bytes) {
                Ok(result) => {
                    self.emit_terminal(&mut task, &result).await;
                    info!(task_id = %task.id, status = ?result.status, "dispatch complete");
                    result
                }
                Err(e) => self.fail_dispatch(&mut task, format!("malformed task result: {e}")).await,
            },
            Ok(None) => self.fail_dispatch(&mut task, "result channel closed before delivery").await,
            Err(_) => self.fail_dispatch(&mut task, format!("timeout: no result within {timeout:?}")).await,
        }
    }
}
