//! The per-partition leader lease and its wire encoding.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SwarmError;
use crate::ids::{InstanceId, NodeId};

/// Opaque optimistic-CAS token returned by the KV on every write. The only
/// admissible ordering source for leadership changes (never wall clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(pub u64);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-partition KV entry: `"<nodeID>|<instanceID>|<expiresAtMs>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLease {
    pub leader_id: NodeId,
    pub instance_id: InstanceId,
    pub expires_at_ms: i64,
}

impl LeaderLease {
    #[must_use]
    pub fn new(leader_id: NodeId, instance_id: InstanceId, expires_at_ms: i64) -> Self {
        Self {
            leader_id,
            instance_id,
            expires_at_ms,
        }
    }

    #[must_use]
    pub fn is_valid(&self, now_ms: i64) -> bool {
        now_ms <= self.expires_at_ms
    }

    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}|{}|{}", self.leader_id, self.instance_id, self.expires_at_ms)
    }

    pub fn decode(raw: &str) -> Result<Self, SwarmError> {
        let mut parts = raw.splitn(3, '|');
        let leader = parts
            .next()
            .ok_or_else(|| SwarmError::InvalidNodeInfo("missing leader id in lease".into()))?;
        let instance = parts
            .next()
            .ok_or_else(|| SwarmError::InvalidNodeInfo("missing instance id in lease".into()))?;
        let expires = parts
            .next()
            .ok_or_else(|| SwarmError::InvalidNodeInfo("missing expiry in lease".into()))?;

        let instance_id = uuid::Uuid::parse_str(instance)
            .map(InstanceId)
            .map_err(|e| SwarmError::InvalidNodeInfo(format!("bad instance id: {e}")))?;
        let expires_at_ms = expires
            .parse::<i64>()
            .map_err(|e| SwarmError::InvalidNodeInfo(format!("bad expiry: {e}")))?;

        Ok(Self {
            leader_id: NodeId::new(leader),
            instance_id,
            expires_at_ms,
        })
    }
}
