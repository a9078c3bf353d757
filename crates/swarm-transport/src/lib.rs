//! Transport Adapter: publish/subscribe, request/reply, and an atomic
//! key-value store with optimistic CAS, over an unspecified broker.
//!
//! This crate defines the [`Transport`] trait the rest of the
//! coordination plane programs against, the exact subject/bucket naming
//! scheme, and [`MemoryTransport`], an in-process implementation used by
//! every other crate's test suite. A production adapter over a real
//! message broker implements the same trait and is out of scope for this
//! workspace (the core spec treats the broker as an external
//! collaborator).

mod error;
mod kv;
mod memory;
pub mod subjects;
mod subscription;
mod transport;

pub use error::{KvError, TransportError};
pub use kv::{Operation, WatchEvent};
pub use memory::{MemoryTransport, RequestHandle};
pub use subscription::{Subscription, WatchStream};
pub use transport::{Transport, MAX_GOSSIP_PAYLOAD_BYTES, MAX_SESSION_PAYLOAD_BYTES};
