//! Peer discovery, membership tracking, and capability-aware peer
//! selection.

mod error;
mod messages;
mod selection;
mod service;

pub use error::{DiscoveryError, Result};
pub use messages::{DiscoveryAnnounce, DiscoveryQuery, ShutdownNotice};
pub use selection::{select_by_capability, select_least_loaded, select_random};
pub use service::{DiscoveryConfig, DiscoveryService};
