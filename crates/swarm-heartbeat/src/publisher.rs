use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use swarm_transport::{subjects, Transport, TransportError};
use swarm_types::{ClusterView, Heartbeat};
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::warn;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Emits this node's [`Heartbeat`] at a fixed interval.
pub struct HeartbeatPublisher {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    interval: Duration,
}

impl HeartbeatPublisher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, view: Arc<RwLock<ClusterView>>, interval: Duration) -> Self {
        Self { transport, view, interval }
    }

    pub async fn publish_once(&self) -> Result<(), TransportError> {
        let local = self.view.read().await.local().clone();
        let hb = Heartbeat {
            node_id: local.id.clone(),
            timestamp: now_ms(),
            load: local.load,
            tasks_running: local.tasks_running,
            status: local.status,
            capabilities: local.capabilities,
        };
        let bytes = serde_json::to_vec(&hb).expect("Heartbeat always serializes");
        self.transport
            .publish(&subjects::heartbeat(&hb.node_id), Bytes::from(bytes))
            .await
    }

    /// Run the publish loop until `running` is cleared. Intended to be
    /// spawned as its own task.
    pub async fn run(self: Arc<Self>, running: Arc<std::sync::atomic::AtomicBool>) {
        let mut tick = interval(self.interval);
        loop {
            tick.tick().await;
            if !running.load(std::sync::atomic::Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.publish_once().await {
                warn!("heartbeat publish failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_transport::MemoryTransport;
    use swarm_types::{NodeId, NodeInfo};

    #[tokio::test]
    async fn publish_once_emits_current_snapshot() {
        let transport = Arc::new(MemoryTransport::new());
        let node = NodeInfo::new(NodeId::new("n1"), "127.0.0.1", 7946, 4);
        let view = Arc::new(RwLock::new(ClusterView::new(node)));
        let mut sub = transport
            .subscribe(&subjects::heartbeat(&NodeId::new("n1")))
            .await
            .unwrap();
        let publisher = HeartbeatPublisher::new(transport, view, Duration::from_secs(1));

        publisher.publish_once().await.unwrap();

        let bytes = sub.recv().await.unwrap();
        let hb: Heartbeat = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(hb.node_id, NodeId::new("n1"));
    }
}
