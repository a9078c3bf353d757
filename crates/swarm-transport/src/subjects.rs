//! Exact subject and KV bucket/key naming, bit-for-bit per the external
//! interface contract. Every caller builds subject strings through these
//! helpers instead of formatting ad hoc so a typo can't silently split
//! the cluster onto two different subjects.

use swarm_types::{Capability, NodeId, Partition, TaskId};

pub fn heartbeat(node: &NodeId) -> String {
    format!("picoclaw.swarm.heartbeat.{node}")
}

pub fn discovery_announce() -> &'static str {
    "picoclaw.swarm.discovery.announce"
}

pub fn discovery_query() -> &'static str {
    "picoclaw.swarm.discovery.query"
}

pub fn task_assign(node: &NodeId) -> String {
    format!("picoclaw.swarm.task.assign.{node}")
}

pub fn task_broadcast(capability: &Capability) -> String {
    format!("picoclaw.swarm.task.broadcast.{capability}")
}

/// Queue group joined by every worker subscribing to a broadcast subject,
/// so fanout delivers to exactly one member.
pub const WORKERS_QUEUE_GROUP: &str = "workers";

pub fn task_result(task: &TaskId) -> String {
    format!("picoclaw.swarm.task.result.{task}")
}

pub fn task_progress(task: &TaskId) -> String {
    format!("picoclaw.swarm.task.progress.{task}")
}

pub fn system_shutdown(node: &NodeId) -> String {
    format!("picoclaw.swarm.system.shutdown.{node}")
}

/// KV bucket names and key helpers.
pub mod buckets {
    use super::{Partition, TaskId};

    pub const TASKS: &str = "PICOCLAW_TASKS";
    pub const CLAIMS: &str = "PICOCLAW_CLAIMS";
    pub const CHECKPOINTS: &str = "PICOCLAW_CHECKPOINTS";

    #[must_use]
    pub fn election(partition: &Partition) -> String {
        format!("PICOCLAW_ELECTION_{partition}")
    }

    #[must_use]
    pub fn claim_key(task: &TaskId) -> String {
        format!("claim_{task}")
    }

    #[must_use]
    pub fn checkpoint_key(task: &TaskId) -> String {
        format!("checkpoint.{task}")
    }

    #[must_use]
    pub fn leader_key(partition: &Partition) -> String {
        format!("leader.{partition}")
    }
}
