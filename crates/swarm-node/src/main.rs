//! The `swarm-node` daemon: wires discovery, heartbeat, election,
//! dispatch, execution, and failover into one running process.
//!
//! The transport in this workspace is [`swarm_transport::MemoryTransport`]
//! (there is no production broker adapter here, by design: the core spec
//! treats the broker as an external collaborator); a deployment wiring a
//! real broker would swap the one `Arc<dyn Transport>` constructed below.
//! Likewise the agent executor is [`swarm_agent::StubAgentExecutor`] —
//! wiring a real LLM backend is outside this workspace's scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use swarm_agent::StubAgentExecutor;
use swarm_coordinator::Coordinator;
use swarm_discovery::{DiscoveryConfig, DiscoveryService};
use swarm_election::{ElectionConfig, LeaderElection, RoleSwitcher};
use swarm_failover::{FailoverConfig, FailoverManager};
use swarm_heartbeat::{HeartbeatMonitor, HeartbeatMonitorConfig, HeartbeatPublisher};
use swarm_lifecycle::{CheckpointStore, TaskLifecycleStore};
use swarm_load::{LoadCaps, LoadMonitor, LoadObservation, LoadWeights, TrendThresholds};
use swarm_transport::{MemoryTransport, Transport};
use swarm_types::{Capability, NodeId, NodeInfo, Partition};
use swarm_worker::{Worker, WorkerConfig};
use tracing::info;

/// A single coordination-plane node. Run with no arguments to pick up
/// `swarm.toml`/`swarm.local.toml`/`SWARM_*` env overrides from the
/// current directory; see `swarm-config` for the full precedence chain.
#[derive(Parser)]
#[command(name = "swarm-node", author, version, about, long_about = None)]
struct Cli {
    /// Directory to resolve `swarm.toml`/`swarm.local.toml` against.
    /// Defaults to the current directory.
    #[arg(long)]
    project_dir: Option<std::path::PathBuf>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.project_dir {
        Some(dir) => swarm_config::SwarmConfig::load_from_dir(dir).context("failed to load configuration")?,
        None => swarm_config::SwarmConfig::load().context("failed to load configuration")?,
    };

    let node_id = if config.node.id.is_empty() {
        NodeId::new(uuid::Uuid::new_v4().to_string())
    } else {
        NodeId::new(config.node.id.clone())
    };
    let capabilities: Vec<Capability> = config.node.capabilities.iter().map(Capability::new).collect();
    let local = NodeInfo::new(node_id.clone(), config.node.bind_addr.clone(), config.node.bind_port, config.worker.max_concurrent as u32)
        .with_capabilities(capabilities.clone());

    info!(%node_id, address = %config.node.bind_addr, port = config.node.bind_port, "starting node");

    let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());

    let discovery = Arc::new(DiscoveryService::with_shared_secret(
        transport.clone(),
        local,
        DiscoveryConfig {
            gossip_interval: config.gossip_interval(),
            node_timeout: Duration::from_millis(config.discovery.node_timeout_ms),
            dead_node_timeout: Duration::from_millis(config.discovery.dead_node_timeout_ms),
            removal_timeout: (config.discovery.removal_timeout_ms > 0)
                .then(|| Duration::from_millis(config.discovery.removal_timeout_ms)),
        },
        config.auth.shared_secret.as_deref(),
    ));
    discovery.start().await.context("discovery service failed to start")?;
    let view = discovery.view();

    let heartbeat_publisher = Arc::new(HeartbeatPublisher::new(transport.clone(), view.clone(), config.heartbeat_interval()));
    let publisher_running = Arc::new(AtomicBool::new(true));
    tokio::spawn(Arc::clone(&heartbeat_publisher).run(Arc::clone(&publisher_running)));

    let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(
        transport.clone(),
        view.clone(),
        HeartbeatMonitorConfig {
            rescan_interval: Duration::from_secs(1),
            suspicious_threshold: Duration::from_millis(config.heartbeat.suspicious_threshold_ms),
            offline_threshold: Duration::from_millis(config.heartbeat.offline_threshold_ms),
        },
    ));
    heartbeat_monitor.start().await;

    let election = Arc::new(LeaderElection::new(
        transport.clone(),
        Partition::new(config.node.partition.clone()),
        node_id.clone(),
        ElectionConfig {
            lease_duration: config.lease_duration(),
            election_interval: config.election_interval(),
        },
    ));
    election.start().await.context("leader election failed to start")?;
    tokio::spawn(RoleSwitcher::run(election.subscribe(), view.clone()));

    let lifecycle = Arc::new(TaskLifecycleStore::new(transport.clone()));
    lifecycle.start().await.context("lifecycle store failed to start")?;
    let checkpoints = Arc::new(CheckpointStore::new(transport.clone()));
    checkpoints.start().await.context("checkpoint store failed to start")?;

    let agent = Arc::new(StubAgentExecutor::new());

    let coordinator = Arc::new(Coordinator::new(
        transport.clone(),
        view.clone(),
        lifecycle.clone(),
        agent.clone(),
        node_id.clone(),
        config.handoff.available_load_threshold,
    ));

    let worker = Arc::new(Worker::new(
        transport.clone(),
        view.clone(),
        lifecycle.clone(),
        checkpoints.clone(),
        agent.clone(),
        node_id.clone(),
        capabilities,
        WorkerConfig {
            max_concurrent: config.worker.max_concurrent,
            progress_interval: Duration::from_millis(config.worker.progress_tick_ms),
        },
    ));
    worker.start().await.context("worker failed to start")?;

    let failover = Arc::new(FailoverManager::new(
        transport.clone(),
        view.clone(),
        lifecycle.clone(),
        checkpoints.clone(),
        worker.clone(),
        node_id.clone(),
        FailoverConfig {
            check_interval: config.failover_check_interval(),
            claim_ttl: config.claim_lock_ttl(),
            progress_stall_timeout: config.progress_stall_timeout(),
            claim_cleanup_interval: Duration::from_millis(config.failover.claim_cleanup_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat.offline_threshold_ms),
        },
    ));
    failover.start().await.context("failover manager failed to start")?;

    let load_monitor = Arc::new(LoadMonitor::new(
        config.load.sample_size,
        config.load.offload_threshold,
        TrendThresholds {
            increasing: config.load.trend_increasing,
            decreasing: config.load.trend_decreasing,
        },
    ));
    let load_running = Arc::new(AtomicBool::new(true));
    tokio::spawn(run_load_sampler(
        view.clone(),
        load_monitor.clone(),
        LoadCaps {
            max_cpu_cores: 1.0,
            max_memory_bytes: config.load.max_memory_bytes,
            max_goroutines: config.load.max_goroutines,
            max_sessions: config.load.max_sessions,
        },
        LoadWeights {
            cpu: config.load.cpu_weight,
            memory: config.load.memory_weight,
            session: config.load.session_weight,
        },
        Arc::clone(&load_running),
    ));

    info!("node ready, press Ctrl+C to stop");
    wait_for_shutdown().await;
    info!("shutting down");

    publisher_running.store(false, Ordering::SeqCst);
    load_running.store(false, Ordering::SeqCst);
    failover.stop().await;
    worker.stop().await;
    election.stop().await;
    heartbeat_monitor.stop().await;
    lifecycle.stop().await;
    let _ = discovery.stop().await;

    info!("stopped gracefully");
    Ok(())
}

/// Samples this node's own queue depth as a proxy load observation (no
/// real CPU/memory telemetry collector is wired in this workspace) and
/// feeds it into the shared [`LoadMonitor`], publishing the resulting
/// score back onto the node's own `NodeInfo.load`.
async fn run_load_sampler(
    view: Arc<tokio::sync::RwLock<swarm_types::ClusterView>>,
    monitor: Arc<LoadMonitor>,
    caps: LoadCaps,
    weights: LoadWeights,
    running: Arc<AtomicBool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(5));
    loop {
        tick.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let (current, sessions) = {
            let guard = view.read().await;
            let local = guard.local();
            let obs = LoadObservation {
                cpu_cores: 0.0,
                memory_bytes: 0,
                goroutines: 0,
                sessions: local.tasks_running,
            };
            (swarm_load::score(&obs, &caps, &weights), local.tasks_running)
        };
        let offloading = monitor.record(current).await;
        {
            let mut guard = view.write().await;
            guard.local_mut().load = current;
        }
        if offloading {
            tracing::warn!(score = current, sessions, "node load above offload threshold");
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
