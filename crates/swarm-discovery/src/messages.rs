//! Wire messages exchanged on the discovery subjects.

use serde::{Deserialize, Serialize};
use swarm_types::{NodeId, NodeInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryAnnounce {
    pub node: NodeInfo,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    pub requester: NodeId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownNotice {
    pub node_id: NodeId,
    pub timestamp: i64,
}
