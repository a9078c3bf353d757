//! Layered configuration for `picoclaw-swarm` nodes.
//!
//! Loading precedence, lowest to highest:
//! 1. built-in defaults (this module)
//! 2. `~/.config/picoclaw-swarm/config.toml` (user defaults)
//! 3. `swarm.toml` (git-tracked project config)
//! 4. `swarm.local.toml` (gitignored local overrides)
//! 5. `SWARM_*` environment variables (highest precedence)

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub id: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub capabilities: Vec<String>,
    pub partition: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 7946,
            capabilities: Vec::new(),
            partition: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySection {
    pub gossip_interval_ms: u64,
    pub push_pull_interval_ms: u64,
    pub node_timeout_ms: u64,
    pub dead_node_timeout_ms: u64,
    /// `0` disables removal: a dead peer is kept `Offline` forever.
    pub removal_timeout_ms: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            gossip_interval_ms: 1_000,
            push_pull_interval_ms: 30_000,
            node_timeout_ms: 5_000,
            dead_node_timeout_ms: 30_000,
            removal_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub interval_ms: u64,
    pub suspicious_threshold_ms: u64,
    pub offline_threshold_ms: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            suspicious_threshold_ms: 30_000,
            offline_threshold_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    pub cpu_weight: f64,
    pub memory_weight: f64,
    pub session_weight: f64,
    pub max_memory_bytes: u64,
    pub max_goroutines: u32,
    pub max_sessions: u32,
    pub sample_size: usize,
    pub trend_increasing: f64,
    pub trend_decreasing: f64,
    pub offload_threshold: f64,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            cpu_weight: 0.3,
            memory_weight: 0.3,
            session_weight: 0.4,
            max_memory_bytes: 1024 * 1024 * 1024,
            max_goroutines: 1000,
            max_sessions: 100,
            sample_size: 10,
            trend_increasing: 0.01,
            trend_decreasing: -0.01,
            offload_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffSection {
    pub handoff_load_threshold: f64,
    pub available_load_threshold: f64,
    pub max_handoff_retries: u32,
    pub handoff_retry_delay_ms: u64,
    pub handoff_timeout_ms: u64,
}

impl Default for HandoffSection {
    fn default() -> Self {
        Self {
            handoff_load_threshold: 0.8,
            available_load_threshold: 0.9,
            max_handoff_retries: 3,
            handoff_retry_delay_ms: 5_000,
            handoff_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionSection {
    pub lease_duration_ms: u64,
    pub election_interval_ms: u64,
}

impl Default for ElectionSection {
    fn default() -> Self {
        Self {
            lease_duration_ms: 10_000,
            election_interval_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    pub claim_lock_ttl_ms: u64,
    pub failover_check_interval_ms: u64,
    pub progress_stall_timeout_ms: u64,
    pub claim_cleanup_interval_ms: u64,
}

impl Default for FailoverSection {
    fn default() -> Self {
        Self {
            claim_lock_ttl_ms: 30_000,
            failover_check_interval_ms: 10_000,
            progress_stall_timeout_ms: 120_000,
            claim_cleanup_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub max_concurrent: usize,
    pub progress_tick_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            progress_tick_ms: 5_000,
        }
    }
}

/// Optional HMAC gossip-signing configuration. Absent `shared_secret`
/// means authentication is disabled, per spec.md §6.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub shared_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub node: NodeSection,
    pub discovery: DiscoverySection,
    pub heartbeat: HeartbeatSection,
    pub load: LoadSection,
    pub handoff: HandoffSection,
    pub election: ElectionSection,
    pub failover: FailoverSection,
    pub worker: WorkerSection,
    pub auth: AuthSection,
}

impl SwarmConfig {
    /// Load from the default locations, rooted at the current directory.
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load rooted at a specific project directory.
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    #[must_use]
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.discovery.gossip_interval_ms)
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_millis(self.election.lease_duration_ms)
    }

    #[must_use]
    pub fn election_interval(&self) -> Duration {
        Duration::from_millis(self.election.election_interval_ms)
    }

    #[must_use]
    pub fn claim_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.failover.claim_lock_ttl_ms)
    }

    #[must_use]
    pub fn failover_check_interval(&self) -> Duration {
        Duration::from_millis(self.failover.failover_check_interval_ms)
    }

    #[must_use]
    pub fn progress_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.failover.progress_stall_timeout_ms)
    }

    /// Sanity-checked weight sum; the core spec expects CPU/memory/session
    /// weights to sum to 1.0 but does not mandate rejecting a misconfigured
    /// node outright, so this is advisory.
    #[must_use]
    pub fn load_weights_sum_to_one(&self) -> bool {
        (self.load.cpu_weight + self.load.memory_weight + self.load.session_weight - 1.0).abs() < 1e-6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_table() {
        let cfg = SwarmConfig::default();
        assert_eq!(cfg.node.bind_port, 7946);
        assert_eq!(cfg.discovery.node_timeout_ms, 5_000);
        assert_eq!(cfg.discovery.dead_node_timeout_ms, 30_000);
        assert_eq!(cfg.heartbeat.interval_ms, 10_000);
        assert_eq!(cfg.handoff.available_load_threshold, 0.9);
        assert_eq!(cfg.load.offload_threshold, 0.8);
        assert_eq!(cfg.election.lease_duration_ms, 10_000);
        assert_eq!(cfg.election.election_interval_ms, 3_000);
        assert_eq!(cfg.failover.claim_lock_ttl_ms, 30_000);
        assert_eq!(cfg.failover.progress_stall_timeout_ms, 120_000);
        assert!(cfg.load_weights_sum_to_one());
    }
}
