use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use swarm_transport::{subjects, Transport};
use swarm_types::{ClusterView, Heartbeat, NodeId};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// How often to scan the cluster view for newly-known peers to
    /// subscribe to (the transport has no subject wildcards, so each
    /// peer's heartbeat subject is subscribed to individually).
    pub rescan_interval: Duration,
    pub suspicious_threshold: Duration,
    pub offline_threshold: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            rescan_interval: Duration::from_secs(1),
            suspicious_threshold: Duration::from_secs(30),
            offline_threshold: Duration::from_secs(60),
        }
    }
}

/// Receives heartbeats and runs an independent stalled-heartbeat
/// suspect/offline checker, distinct from (and in addition to)
/// discovery's own health check.
pub struct HeartbeatMonitor {
    transport: Arc<dyn Transport>,
    view: Arc<RwLock<ClusterView>>,
    config: HeartbeatMonitorConfig,
    subscribed: Mutex<HashSet<NodeId>>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, view: Arc<RwLock<ClusterView>>, config: HeartbeatMonitorConfig) -> Self {
        Self {
            transport,
            view,
            config,
            subscribed: Mutex::new(HashSet::new()),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.tasks.lock().await;
        handles.push(tokio::spawn(Arc::clone(self).rescan_loop()));
        handles.push(tokio::spawn(Arc::clone(self).stale_check_loop()));
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut handles = self.tasks.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    async fn rescan_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.rescan_interval);
        loop {
            tick.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let peer_ids: Vec<NodeId> = {
                let view = self.view.read().await;
                let local = view.local_node_id.clone();
                view.iter().map(|n| n.id.clone()).filter(|id| *id != local).collect()
            };
            let mut subscribed = self.subscribed.lock().await;
            for id in peer_ids {
                if subscribed.insert(id.clone()) {
                    if let Ok(sub) = self.transport.subscribe(&subjects::heartbeat(&id)).await {
                        let mut handles = self.tasks.lock().await;
                        handles.push(tokio::spawn(Self::listen(Arc::clone(&self.view), sub)));
                    } else {
                        subscribed.remove(&id);
                    }
                }
            }
        }
    }

    async fn listen(view: Arc<RwLock<ClusterView>>, mut sub: swarm_transport::Subscription) {
        while let Some(bytes) = sub.recv().await {
            match serde_json::from_slice::<Heartbeat>(&bytes) {
                Ok(hb) => {
                    view.write().await.apply_heartbeat(
                        &hb.node_id,
                        hb.timestamp,
                        hb.load,
                        hb.tasks_running,
                        hb.capabilities,
                        hb.status,
                    );
                }
                Err(e) => debug!("dropping malformed heartbeat: {e}"),
            }
        }
    }

    async fn stale_check_loop(self: Arc<Self>) {
        let mut tick = interval(self.config.rescan_interval);
        loop {
            tick.tick().await;
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let now = now_ms();
            let mut guard = self.view.write().await;
            let local_id = guard.local_node_id.clone();
            let to_offline: Vec<NodeId> = guard
                .iter()
                .filter(|n| n.id != local_id)
                .filter_map(|n| {
                    let age = Duration::from_millis((now - n.last_seen).max(0) as u64);
                    (n.status == swarm_types::Status::Suspicious && age >= self.config.offline_threshold)
                        .then(|| n.id.clone())
                })
                .collect();
            let to_suspicious: Vec<NodeId> = guard
                .iter()
                .filter(|n| n.id != local_id)
                .filter_map(|n| {
                    let age = Duration::from_millis((now - n.last_seen).max(0) as u64);
                    (n.status == swarm_types::Status::Online && age >= self.config.suspicious_threshold)
                        .then(|| n.id.clone())
                })
                .collect();
            for id in to_offline {
                guard.mark_offline(&id);
            }
            for id in to_suspicious {
                guard.mark_suspicious(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_transport::MemoryTransport;
    use swarm_types::{NodeInfo, Status};

    fn node(id: &str) -> NodeInfo {
        NodeInfo::new(NodeId::new(id), "127.0.0.1", 7946, 4)
    }

    #[tokio::test]
    async fn heartbeat_refreshes_known_peer_and_restores_status() {
        let transport = Arc::new(MemoryTransport::new());
        let view = Arc::new(RwLock::new(ClusterView::new(node("local"))));
        view.write().await.upsert_peer(node("p1"), 1);
        view.write().await.mark_offline(&NodeId::new("p1"));

        let monitor = Arc::new(HeartbeatMonitor::new(
            transport.clone(),
            view.clone(),
            HeartbeatMonitorConfig {
                rescan_interval: Duration::from_millis(10),
                ..HeartbeatMonitorConfig::default()
            },
        ));
        monitor.start().await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let hb = Heartbeat {
            node_id: NodeId::new("p1"),
            timestamp: 1000,
            load: 0.4,
            tasks_running: 1,
            status: Status::Online,
            capabilities: vec![],
        };
        let bytes = serde_json::to_vec(&hb).unwrap();
        transport
            .publish(&subjects::heartbeat(&NodeId::new("p1")), bytes.into())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let got = view.read().await.get(&NodeId::new("p1")).cloned().unwrap();
        assert_eq!(got.status, Status::Online);
        assert_eq!(got.load, 0.4);

        monitor.stop().await;
    }
}
