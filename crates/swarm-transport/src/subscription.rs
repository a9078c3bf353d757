//! Handles returned by `subscribe`/`queue_subscribe`/`watch_all`.
//!
//! These wrap a bounded `tokio::mpsc` receiver rather than taking a
//! callback closure: callback-based fan-out is exactly the pattern
//! §9 of the core spec asks implementations to avoid ("prefer a single
//! outgoing event channel per component over open-ended callback
//! lists").

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::kv::WatchEvent;

/// A live subscription to a subject. Dropping it unsubscribes.
pub struct Subscription {
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<Bytes>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` means the publisher side closed
    /// (transport shutting down), distinct from a message never arriving.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Non-blocking poll, used by tests asserting queue-group exclusivity.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }
}

/// A live watch over a KV bucket prefix.
pub struct WatchStream {
    receiver: mpsc::Receiver<WatchEvent>,
}

impl WatchStream {
    #[must_use]
    pub fn new(receiver: mpsc::Receiver<WatchEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.receiver.recv().await
    }
}
