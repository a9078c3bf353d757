//! A node's local view of cluster membership.

use std::collections::HashMap;

use crate::ids::NodeId;
use crate::node::{NodeInfo, Status};

/// `NodeID -> NodeInfo` plus the local node's identity and a monotonic
/// version counter. The local node's entry is owned by this process; all
/// others are soft replicas built from announce/leave/update events.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub local_node_id: NodeId,
    nodes: HashMap<NodeId, NodeInfo>,
    version: u64,
}

impl ClusterView {
    #[must_use]
    pub fn new(local: NodeInfo) -> Self {
        let local_node_id = local.id.clone();
        let mut nodes = HashMap::new();
        nodes.insert(local_node_id.clone(), local);
        Self {
            local_node_id,
            nodes,
            version: 0,
        }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    #[must_use]
    pub fn local(&self) -> &NodeInfo {
        self.nodes
            .get(&self.local_node_id)
            .expect("local node entry is always present")
    }

    pub fn local_mut(&mut self) -> &mut NodeInfo {
        self.version += 1;
        self.nodes
            .get_mut(&self.local_node_id)
            .expect("local node entry is always present")
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Upsert a peer announce. Never mutates the local node (per the
    /// discovery design: "the local node is never mutated by health
    /// checks" extends to peer-announce handling too).
    pub fn upsert_peer(&mut self, incoming: NodeInfo, timestamp: i64) {
        if incoming.id == self.local_node_id {
            return;
        }
        self.bump();
        match self.nodes.get_mut(&incoming.id) {
            Some(existing) => {
                existing.merge_if_newer(&incoming, timestamp);
            }
            None => {
                let mut incoming = incoming;
                incoming.last_seen = timestamp;
                self.nodes.insert(incoming.id.clone(), incoming);
            }
        }
    }

    pub fn mark_offline(&mut self, id: &NodeId) {
        if *id == self.local_node_id {
            return;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = Status::Offline;
            self.bump();
        }
    }

    /// Apply a heartbeat from a known peer: refresh `last_seen`/`load`/
    /// `tasks_running`/`capabilities`, and if the peer was `Offline` or
    /// `Suspicious`, restore it to the heartbeat's declared status. Stale
    /// (out-of-order) heartbeats are discarded. Returns `false` if the
    /// peer is unknown, local, or the heartbeat is stale.
    pub fn apply_heartbeat(
        &mut self,
        id: &NodeId,
        timestamp: i64,
        load: f64,
        tasks_running: u32,
        capabilities: Vec<crate::ids::Capability>,
        declared_status: Status,
    ) -> bool {
        if *id == self.local_node_id {
            return false;
        }
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        if timestamp < node.last_seen {
            return false;
        }
        node.last_seen = timestamp;
        node.load = load;
        node.tasks_running = tasks_running;
        node.capabilities = capabilities;
        if matches!(node.status, Status::Offline | Status::Suspicious) {
            node.status = declared_status;
        }
        self.bump();
        true
    }

    pub fn mark_suspicious(&mut self, id: &NodeId) {
        if *id == self.local_node_id {
            return;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.status = Status::Suspicious;
            self.bump();
        }
    }

    pub fn remove(&mut self, id: &NodeId) {
        if *id == self.local_node_id {
            return;
        }
        if self.nodes.remove(id).is_some() {
            self.bump();
        }
    }

    #[must_use]
    pub fn active_peers(&self) -> Vec<&NodeInfo> {
        self.nodes
            .values()
            .filter(|n| n.id != self.local_node_id && n.status != Status::Offline)
            .collect()
    }
}
