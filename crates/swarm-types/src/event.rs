//! Append-only lifecycle events, the single source of truth for task state.

use serde::{Deserialize, Serialize};

use crate::ids::{EventId, NodeId, TaskId};
use crate::task::TaskStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Assigned,
    Started,
    Progress,
    Completed,
    Failed,
    Retry,
    Checkpoint,
}

/// One append-only record in a task's history. Ordered by `timestamp`
/// within a `task_id`; the last event with a terminal `status` is
/// authoritative for [`crate::task::TaskStatus::is_terminal`] purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event_id: EventId,
    pub task_id: TaskId,
    pub event_type: EventType,
    pub timestamp: i64,
    pub node_id: NodeId,
    pub status: TaskStatus,
    pub message: String,
    pub progress: f64,
}

impl TaskEvent {
    #[must_use]
    pub fn new(
        task_id: TaskId,
        event_type: EventType,
        timestamp: i64,
        node_id: NodeId,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            task_id,
            event_type,
            timestamp,
            node_id,
            status,
            message: message.into(),
            progress: 0.0,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped() {
        let ev = TaskEvent::new(
            TaskId::new("t1"),
            EventType::Progress,
            0,
            NodeId::new("n1"),
            TaskStatus::Running,
            "processing",
        )
        .with_progress(1.4);
        assert_eq!(ev.progress, 1.0);
    }

    #[test]
    fn event_json_roundtrip() {
        let ev = TaskEvent::new(
            TaskId::new("t1"),
            EventType::Created,
            10,
            NodeId::new("n1"),
            TaskStatus::Pending,
            "created",
        );
        let json = serde_json::to_string(&ev).unwrap();
        let back: TaskEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, ev.task_id);
        assert_eq!(back.event_type, ev.event_type);
    }
}
