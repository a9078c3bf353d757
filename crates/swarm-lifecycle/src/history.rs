//! `TaskLifecycleStore`: an append-only event stream keyed by task id,
//! layered over the KV primitives (the only persistent ones the transport
//! exposes) using a create-or-CAS-append retry loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use swarm_transport::{subjects::buckets, KvError, Transport};
use swarm_types::{EventType, NodeId, TaskEvent, TaskId, TaskStatus};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{LifecycleError, Result};

/// Status, last known executor, and last message for a task, reconstituted
/// from its event history.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStateView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub assigned_to: Option<NodeId>,
    pub message: String,
}

impl From<&TaskEvent> for TaskStateView {
    fn from(event: &TaskEvent) -> Self {
        Self {
            task_id: event.task_id.clone(),
            status: event.status,
            assigned_to: (!matches!(event.status, TaskStatus::Pending)).then(|| event.node_id.clone()),
            message: event.message.clone(),
        }
    }
}

pub struct TaskLifecycleStore {
    transport: Arc<dyn Transport>,
    known_ids: Arc<RwLock<HashSet<TaskId>>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskLifecycleStore {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            known_ids: Arc::new(RwLock::new(HashSet::new())),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Ensure the bucket exists and start tracking keys observed via the
    /// watch stream (peer-written task ids this process has not directly
    /// appended to).
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transport
            .ensure_bucket(buckets::TASKS, std::time::Duration::from_secs(0))
            .await?;
        let watch = self.transport.kv_watch_all(buckets::TASKS, "").await?;
        let known_ids = Arc::clone(&self.known_ids);
        let running = Arc::clone(&self.running);
        let mut handles = self.tasks.lock().await;
        handles.push(tokio::spawn(async move {
            let mut watch = watch;
            while let Some(event) = watch.recv().await {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                known_ids.write().await.insert(TaskId::new(event.key));
            }
        }));
        Ok(())
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    /// Append a `TaskEvent` snapshotting the task's current status.
    pub async fn save_task_status(
        &self,
        task_id: &TaskId,
        event_type: EventType,
        node_id: NodeId,
        status: TaskStatus,
        message: impl Into<String>,
        timestamp: i64,
    ) -> Result<()> {
        let event = TaskEvent::new(task_id.clone(), event_type, timestamp, node_id, status, message);
        self.append(task_id, event).await?;
        self.known_ids.write().await.insert(task_id.clone());
        Ok(())
    }

    async fn append(&self, task_id: &TaskId, event: TaskEvent) -> Result<()> {
        let key = task_id.to_string();
        loop {
            match self.transport.kv_get(buckets::TASKS, &key).await {
                Ok((bytes, revision)) => {
                    let mut events: Vec<TaskEvent> = serde_json::from_slice(&bytes)?;
                    events.push(event.clone());
                    let payload = serde_json::to_vec(&events)?;
                    match self
                        .transport
                        .kv_update(buckets::TASKS, &key, Bytes::from(payload), revision)
                        .await
                    {
                        Ok(_) => return Ok(()),
                        Err(KvError::ConflictOrNotFound) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(KvError::NotFound) => {
                    let payload = serde_json::to_vec(&vec![event.clone()])?;
                    match self
                        .transport
                        .kv_create(buckets::TASKS, &key, Bytes::from(payload))
                        .await
                    {
                        Ok(_) => return Ok(()),
                        Err(KvError::AlreadyExists) => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(LifecycleError::Kv(e)),
            }
        }
    }

    pub async fn get_task_history(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>> {
        match self.transport.kv_get(buckets::TASKS, &task_id.to_string()).await {
            Ok((bytes, _)) => Ok(serde_json::from_slice(&bytes)?),
            Err(KvError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_latest_task_state(&self, task_id: &TaskId) -> Result<Option<TaskStateView>> {
        let history = self.get_task_history(task_id).await?;
        Ok(history.last().map(TaskStateView::from))
    }

    pub async fn get_active_tasks(&self) -> Result<Vec<TaskStateView>> {
        let ids: Vec<TaskId> = self.known_ids.read().await.iter().cloned().collect();
        let mut active = Vec::new();
        for id in ids {
            if let Some(state) = self.get_latest_task_state(&id).await? {
                if matches!(state.status, TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::Running) {
                    active.push(state);
                }
            }
        }
        Ok(active)
    }

    pub async fn get_tasks_by_node(&self, node_id: &NodeId) -> Result<Vec<TaskStateView>> {
        let ids: Vec<TaskId> = self.known_ids.read().await.iter().cloned().collect();
        let mut matched = Vec::new();
        for id in ids {
            if let Some(state) = self.get_latest_task_state(&id).await? {
                if state.assigned_to.as_ref() == Some(node_id) {
                    matched.push(state);
                }
            }
        }
        Ok(matched)
    }

    pub async fn delete_task_history(&self, task_id: &TaskId) -> Result<()> {
        self.transport.kv_delete(buckets::TASKS, &task_id.to_string()).await?;
        self.known_ids.write().await.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_transport::MemoryTransport;

    fn now() -> i64 {
        1000
    }

    #[tokio::test]
    async fn history_replays_in_append_order() {
        let store = TaskLifecycleStore::new(Arc::new(MemoryTransport::new()));
        let task_id = TaskId::new("t1");
        store
            .save_task_status(&task_id, EventType::Created, NodeId::new("coord"), TaskStatus::Pending, "created", now())
            .await
            .unwrap();
        store
            .save_task_status(&task_id, EventType::Assigned, NodeId::new("w1"), TaskStatus::Assigned, "assigned", now())
            .await
            .unwrap();
        store
            .save_task_status(&task_id, EventType::Completed, NodeId::new("w1"), TaskStatus::Done, "done", now())
            .await
            .unwrap();

        let history = store.get_task_history(&task_id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].event_type, EventType::Created);
        assert_eq!(history[2].status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn latest_state_reflects_last_event() {
        let store = TaskLifecycleStore::new(Arc::new(MemoryTransport::new()));
        let task_id = TaskId::new("t1");
        store
            .save_task_status(&task_id, EventType::Created, NodeId::new("coord"), TaskStatus::Pending, "created", now())
            .await
            .unwrap();
        store
            .save_task_status(&task_id, EventType::Started, NodeId::new("w1"), TaskStatus::Running, "running", now())
            .await
            .unwrap();

        let state = store.get_latest_task_state(&task_id).await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Running);
        assert_eq!(state.assigned_to, Some(NodeId::new("w1")));
    }

    #[tokio::test]
    async fn active_tasks_excludes_terminal_ones() {
        let store = TaskLifecycleStore::new(Arc::new(MemoryTransport::new()));
        let running = TaskId::new("running");
        let done = TaskId::new("done");
        store
            .save_task_status(&running, EventType::Started, NodeId::new("w1"), TaskStatus::Running, "r", now())
            .await
            .unwrap();
        store
            .save_task_status(&done, EventType::Completed, NodeId::new("w2"), TaskStatus::Done, "d", now())
            .await
            .unwrap();

        let active = store.get_active_tasks().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, running);
    }

    #[tokio::test]
    async fn missing_task_history_is_empty_not_error() {
        let store = TaskLifecycleStore::new(Arc::new(MemoryTransport::new()));
        let history = store.get_task_history(&TaskId::new("ghost")).await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn delete_removes_history() {
        let store = TaskLifecycleStore::new(Arc::new(MemoryTransport::new()));
        let task_id = TaskId::new("t1");
        store
            .save_task_status(&task_id, EventType::Created, NodeId::new("coord"), TaskStatus::Pending, "created", now())
            .await
            .unwrap();
        store.delete_task_history(&task_id).await.unwrap();
        assert!(store.get_task_history(&task_id).await.unwrap().is_empty());
    }
}
