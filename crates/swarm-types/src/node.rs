//! Node identity and the mutable state snapshot peers exchange about it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{Capability, NodeId};

/// The role a node currently plays. `Metadata["original_role"]` preserves
/// whatever this was before a promotion to `Coordinator` (see
/// [`crate::node::NodeInfo::promote_to_coordinator`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Coordinator,
    Worker,
    Specialist,
}

/// Liveness classification maintained by discovery/heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Online,
    Busy,
    Suspicious,
    Offline,
}

/// Immutable identity plus mutable state snapshot for one cluster member.
///
/// `0 <= tasks_running <= max_tasks` and `status == Busy` iff
/// `tasks_running == max_tasks` are invariants every mutator below
/// upholds; nothing outside this module should construct a `NodeInfo`
/// with `status`/`tasks_running` set independently of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub address: String,
    pub gateway_port: u16,
    pub role: Role,
    pub capabilities: Vec<Capability>,
    pub status: Status,
    pub load: f64,
    pub tasks_running: u32,
    pub max_tasks: u32,
    pub last_seen: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl NodeInfo {
    #[must_use]
    pub fn new(id: NodeId, address: impl Into<String>, gateway_port: u16, max_tasks: u32) -> Self {
        Self {
            id,
            address: address.into(),
            gateway_port,
            role: Role::Worker,
            capabilities: Vec::new(),
            status: Status::Online,
            load: 0.0,
            tasks_running: 0,
            max_tasks,
            last_seen: 0,
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = caps.into_iter().collect();
        self
    }

    #[must_use]
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.iter().any(|c| c == cap)
    }

    #[must_use]
    pub fn has_all_capabilities(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|c| self.has_capability(c))
    }

    /// Apply the invariant between `status` and `tasks_running`/`max_tasks`.
    /// A node already `Suspicious` or `Offline` is left alone; only the
    /// `Online`/`Busy` toggle is load-derived.
    pub fn sync_busy_status(&mut self) {
        if matches!(self.status, Status::Online | Status::Busy) {
            self.status = if self.tasks_running >= self.max_tasks && self.max_tasks > 0 {
                Status::Busy
            } else {
                Status::Online
            };
        }
    }

    pub fn increment_tasks(&mut self) {
        self.tasks_running = self.tasks_running.saturating_add(1).min(self.max_tasks.max(self.tasks_running));
        self.sync_busy_status();
    }

    pub fn decrement_tasks(&mut self) {
        self.tasks_running = self.tasks_running.saturating_sub(1);
        self.sync_busy_status();
    }

    /// Promote this node to `Coordinator`, remembering the prior role in
    /// `metadata["original_role"]` so [`Self::demote_from_coordinator`] can
    /// restore it.
    pub fn promote_to_coordinator(&mut self) {
        let original = match self.role {
            Role::Coordinator => return,
            Role::Worker => "worker",
            Role::Specialist => "specialist",
        };
        self.metadata
            .insert("original_role".to_string(), original.to_string());
        self.role = Role::Coordinator;
    }

    /// Restore the role recorded before promotion. A missing
    /// `original_role` key means "no original role" and this is a no-op,
    /// per the open question in the core spec about uninitialized
    /// metadata.
    pub fn demote_from_coordinator(&mut self) {
        if let Some(original) = self.metadata.get("original_role") {
            self.role = match original.as_str() {
                "specialist" => Role::Specialist,
                _ => Role::Worker,
            };
        }
    }

    /// Merge a peer-reported snapshot into this replica iff `timestamp` is
    /// newer than `last_seen`. Returns `true` if the merge applied.
    pub fn merge_if_newer(&mut self, incoming: &NodeInfo, timestamp: i64) -> bool {
        if timestamp < self.last_seen {
            return false;
        }
        self.address = incoming.address.clone();
        self.gateway_port = incoming.gateway_port;
        self.role = incoming.role;
        self.capabilities = incoming.capabilities.clone();
        self.status = incoming.status;
        self.load = incoming.load;
        self.tasks_running = incoming.tasks_running;
        self.max_tasks = incoming.max_tasks;
        self.last_seen = timestamp;
        self.metadata = incoming.metadata.clone();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeInfo {
        NodeInfo::new(NodeId::new("n1"), "127.0.0.1", 7946, 4)
    }

    #[test]
    fn busy_iff_full() {
        let mut n = node();
        n.increment_tasks();
        n.increment_tasks();
        n.increment_tasks();
        assert_eq!(n.status, Status::Online);
        n.increment_tasks();
        assert_eq!(n.tasks_running, 4);
        assert_eq!(n.status, Status::Busy);
        n.decrement_tasks();
        assert_eq!(n.status, Status::Online);
    }

    #[test]
    fn promote_then_demote_restores_role() {
        let mut n = node();
        n.role = Role::Specialist;
        n.promote_to_coordinator();
        assert_eq!(n.role, Role::Coordinator);
        assert_eq!(n.metadata.get("original_role").unwrap(), "specialist");
        n.demote_from_coordinator();
        assert_eq!(n.role, Role::Specialist);
    }

    #[test]
    fn demote_without_prior_promotion_is_noop() {
        let mut n = node();
        n.role = Role::Worker;
        n.demote_from_coordinator();
        assert_eq!(n.role, Role::Worker);
    }

    #[test]
    fn merge_rejects_stale_timestamp() {
        let mut n = node();
        n.last_seen = 100;
        let other = node();
        assert!(!n.merge_if_newer(&other, 50));
        assert_eq!(n.last_seen, 100);
        assert!(n.merge_if_newer(&other, 150));
        assert_eq!(n.last_seen, 150);
    }

    #[test]
    fn node_info_json_roundtrip() {
        let n = node().with_capabilities([Capability::new("code")]);
        let json = serde_json::to_string(&n).unwrap();
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, n.id);
        assert_eq!(back.capabilities, n.capabilities);
    }
}
