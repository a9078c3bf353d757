//! Periodic liveness publisher and the peer-side monitor that refreshes
//! `ClusterView` entries and runs its own stalled-heartbeat thresholds.

mod monitor;
mod publisher;

pub use monitor::{HeartbeatMonitor, HeartbeatMonitorConfig};
pub use publisher::HeartbeatPublisher;
