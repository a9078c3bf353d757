//! The periodic liveness payload nodes publish about themselves.

use serde::{Deserialize, Serialize};

use crate::ids::{Capability, NodeId};
use crate::node::Status;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub node_id: NodeId,
    pub timestamp: i64,
    pub load: f64,
    pub tasks_running: u32,
    pub status: Status,
    pub capabilities: Vec<Capability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_json_roundtrip() {
        let hb = Heartbeat {
            node_id: NodeId::new("n1"),
            timestamp: 10,
            load: 0.5,
            tasks_running: 2,
            status: Status::Online,
            capabilities: vec![Capability::new("code")],
        };
        let json = serde_json::to_string(&hb).unwrap();
        let back: Heartbeat = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_id, hb.node_id);
        assert_eq!(back.load, hb.load);
    }
}
