//! Partial-result snapshots used to resume a task on a different worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{NodeId, TaskId};

/// Exactly one of these is kept per task id; a new checkpoint overwrites
/// the old one. Absence is legal and means "restart from the original
/// prompt".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub checkpoint_id: Uuid,
    pub task_id: TaskId,
    pub node_id: NodeId,
    #[serde(rename = "type")]
    pub checkpoint_type: String,
    pub progress: f64,
    pub partial_result: String,
    pub timestamp: i64,
}

impl TaskCheckpoint {
    #[must_use]
    pub fn new(
        task_id: TaskId,
        node_id: NodeId,
        checkpoint_type: impl Into<String>,
        progress: f64,
        partial_result: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4(),
            task_id,
            node_id,
            checkpoint_type: checkpoint_type.into(),
            progress: progress.clamp(0.0, 1.0),
            partial_result: partial_result.into(),
            timestamp,
        }
    }

    /// Render the recovery prompt a worker executes when resuming from
    /// this checkpoint, per the Worker's `RecoverFromCheckpoint` contract.
    #[must_use]
    pub fn recovery_prompt(&self, original_prompt: &str) -> String {
        format!(
            "Resuming task originally dispatched with prompt:\n{original_prompt}\n\n\
             Partial result so far (from node {}, {:.0}% complete, checkpointed at {}):\n{}\n\n\
             Continue the task from this point.",
            self.node_id, self.progress * 100.0, self.timestamp, self.partial_result
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_prompt_embeds_all_fields() {
        let cp = TaskCheckpoint::new(
            TaskId::new("t1"),
            NodeId::new("n1"),
            "partial",
            0.5,
            "half done",
            123,
        );
        let prompt = cp.recovery_prompt("original");
        assert!(prompt.contains("original"));
        assert!(prompt.contains("half done"));
        assert!(prompt.contains("n1"));
    }

    #[test]
    fn progress_clamped_on_construction() {
        let cp = TaskCheckpoint::new(TaskId::new("t1"), NodeId::new("n1"), "p", 5.0, "x", 0);
        assert_eq!(cp.progress, 1.0);
    }
}
