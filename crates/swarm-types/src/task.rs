//! Task descriptions and the forward-only status machine they follow.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::SwarmError;
use crate::ids::{Capability, NodeId, TaskId, WorkflowId};

/// How a task should be routed. `Workflow` is deliberately handled
/// identically to `Direct` by the coordinator today; a dedicated workflow
/// orchestrator is future work, not a behavior this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Direct,
    Broadcast,
    Workflow,
}

impl TaskType {
    pub fn parse(raw: &str) -> Result<Self, SwarmError> {
        match raw {
            "direct" => Ok(Self::Direct),
            "broadcast" => Ok(Self::Broadcast),
            "workflow" => Ok(Self::Workflow),
            other => Err(SwarmError::UnknownTaskType(other.to_string())),
        }
    }
}

/// Routed through [`TaskType::parse`] rather than a derived enum match, so
/// a `SwarmTask` deserialized off the wire with an unrecognized `type`
/// field fails with `UnknownTaskType` instead of a generic serde error.
impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        TaskType::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Forward-only lifecycle status. Ordering matches spec.md's
/// `Pending -> (Assigned) -> Running -> (Done | Failed)` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    /// True if moving from `self` to `next` is a legal forward transition.
    /// `Assigned` may be skipped (direct `Pending -> Running` is allowed,
    /// e.g. under local fallback where no explicit assignment occurs).
    #[must_use]
    pub fn can_advance_to(self, next: TaskStatus) -> bool {
        use TaskStatus::{Assigned, Done, Failed, Pending, Running};
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Running)
                | (Pending, Done)
                | (Pending, Failed)
                | (Assigned, Running)
                | (Assigned, Done)
                | (Assigned, Failed)
                | (Running, Done)
                | (Running, Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

/// A unit of work accepted by the coordination plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTask {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub capability: Option<Capability>,
    pub prompt: String,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    pub assigned_to: Option<NodeId>,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: i32,
    /// Milliseconds. `0` means "unset" and callers must substitute the
    /// default of 10 minutes (see [`crate::DEFAULT_TASK_TIMEOUT_MS`]).
    #[serde(default)]
    pub timeout_ms: u64,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub parent_id: Option<TaskId>,
    pub workflow_id: Option<WorkflowId>,
}

/// Default worker execution timeout when a task's `timeout_ms` is `0`.
pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 10 * 60 * 1000;

impl SwarmTask {
    #[must_use]
    pub fn new(id: TaskId, task_type: TaskType, prompt: impl Into<String>, created_at: i64) -> Self {
        Self {
            id,
            task_type,
            capability: None,
            prompt: prompt.into(),
            context: HashMap::new(),
            assigned_to: None,
            status: TaskStatus::Pending,
            priority: 0,
            timeout_ms: 0,
            created_at,
            completed_at: None,
            parent_id: None,
            workflow_id: None,
        }
    }

    /// The effective timeout, substituting the default when unset.
    #[must_use]
    pub fn effective_timeout_ms(&self) -> u64 {
        if self.timeout_ms == 0 {
            DEFAULT_TASK_TIMEOUT_MS
        } else {
            self.timeout_ms
        }
    }

    /// Attempt a status transition, rejecting anything backward or
    /// skipping a required step.
    pub fn advance(&mut self, next: TaskStatus, now: i64) -> Result<(), SwarmError> {
        if !self.status.can_advance_to(next) {
            return Err(SwarmError::InvalidNodeInfo(format!(
                "illegal task status transition {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// The outcome delivered back to a coordinator on `task.result.<id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl TaskResult {
    #[must_use]
    pub fn done(task_id: TaskId, node_id: NodeId, result: impl Into<String>) -> Self {
        Self {
            task_id,
            node_id,
            status: TaskStatus::Done,
            result: Some(result.into()),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(task_id: TaskId, node_id: NodeId, error: impl Into<String>) -> Self {
        Self {
            task_id,
            node_id,
            status: TaskStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Progress beacon published while a worker executes a task. Not an ack;
/// used purely for staleness detection and UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub node_id: NodeId,
    pub progress: f64,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ordinal(status: TaskStatus) -> u8 {
        match status {
            TaskStatus::Pending => 0,
            TaskStatus::Assigned => 1,
            TaskStatus::Running => 2,
            TaskStatus::Done | TaskStatus::Failed => 3,
        }
    }

    fn arb_status() -> impl Strategy<Value = TaskStatus> {
        prop_oneof![
            Just(TaskStatus::Pending),
            Just(TaskStatus::Assigned),
            Just(TaskStatus::Running),
            Just(TaskStatus::Done),
            Just(TaskStatus::Failed),
        ]
    }

    proptest! {
        #[test]
        fn advance_never_moves_status_backward_or_past_terminal(attempts in prop::collection::vec(arb_status(), 0..16)) {
            let mut t = SwarmTask::new(TaskId::new("t"), TaskType::Direct, "hi", 0);
            for (i, next) in attempts.into_iter().enumerate() {
                let before = t.status;
                let was_terminal = before.is_terminal();
                let result = t.advance(next, i as i64);
                if was_terminal {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(t.status, before);
                } else if result.is_ok() {
                    prop_assert!(ordinal(t.status) >= ordinal(before));
                } else {
                    prop_assert_eq!(t.status, before);
                }
            }
        }
    }

    #[test]
    fn forward_only_transitions() {
        assert!(TaskStatus::Pending.can_advance_to(TaskStatus::Assigned));
        assert!(TaskStatus::Assigned.can_advance_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_advance_to(TaskStatus::Done));
        assert!(!TaskStatus::Running.can_advance_to(TaskStatus::Pending));
        assert!(!TaskStatus::Done.can_advance_to(TaskStatus::Running));
    }

    #[test]
    fn effective_timeout_defaults_to_ten_minutes() {
        let t = SwarmTask::new(TaskId::new("t1"), TaskType::Direct, "hi", 0);
        assert_eq!(t.effective_timeout_ms(), DEFAULT_TASK_TIMEOUT_MS);
    }

    #[test]
    fn advance_rejects_illegal_transition() {
        let mut t = SwarmTask::new(TaskId::new("t1"), TaskType::Direct, "hi", 0);
        t.advance(TaskStatus::Done, 1).unwrap();
        assert!(t.advance(TaskStatus::Running, 2).is_err());
    }

    #[test]
    fn task_type_parse_rejects_unknown() {
        assert!(matches!(
            TaskType::parse("bogus"),
            Err(SwarmError::UnknownTaskType(_))
        ));
    }

    #[test]
    fn swarm_task_deserialization_rejects_unknown_task_type() {
        let raw = r#"{
            "id": "t1",
            "type": "bogus",
            "capability": null,
            "prompt": "hi",
            "assigned_to": null,
            "status": "pending",
            "created_at": 0,
            "completed_at": null,
            "parent_id": null,
            "workflow_id": null
        }"#;
        let err = serde_json::from_str::<SwarmTask>(raw).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
