//! Failover claims: a time-bounded exclusive right to execute one task.

use serde::{Deserialize, Serialize};

use crate::ids::{NodeId, TaskId};

/// Created by an atomic create-if-absent on the shared KV. Valid only
/// while `now < expires_at` AND the KV entry still equals this value.
///
/// A claim carries no checkpoint of its own: the checkpoint a claimant
/// should resume from is looked up separately, from the dedicated
/// checkpoint store keyed by `task_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub task_id: TaskId,
    pub claimed_by: NodeId,
    pub claimed_at: i64,
    pub expires_at: i64,
}

impl ClaimInfo {
    #[must_use]
    pub fn new(task_id: TaskId, claimed_by: NodeId, now: i64, ttl_ms: i64) -> Self {
        Self {
            task_id,
            claimed_by,
            claimed_at: now,
            expires_at: now + ttl_ms,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    /// Produce a renewed claim blob with a fresh expiry, keeping identity.
    /// Renewal is a `Put`, not CAS'd: the holder is known locally already.
    #[must_use]
    pub fn renewed(&self, now: i64, ttl_ms: i64) -> Self {
        Self {
            expires_at: now + ttl_ms,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_exclusive() {
        let claim = ClaimInfo::new(TaskId::new("t1"), NodeId::new("n1"), 0, 100);
        assert!(!claim.is_expired(99));
        assert!(claim.is_expired(100));
    }

    #[test]
    fn renewal_advances_expiry_only() {
        let claim = ClaimInfo::new(TaskId::new("t1"), NodeId::new("n1"), 0, 100);
        let renewed = claim.renewed(50, 100);
        assert_eq!(renewed.expires_at, 150);
        assert_eq!(renewed.claimed_at, claim.claimed_at);
        assert_eq!(renewed.claimed_by, claim.claimed_by);
    }
}
