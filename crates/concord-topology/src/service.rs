//! Topology service: composition root for ring, store, health and fanout.

use std::collections::HashMap;
use std::sync::Arc;

use concord_core::{LoadInfo, NodeStatus, ShardInfo, TopologyEvent, TopologySnapshot};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TopologyConfig;
use crate::error::TopologyResult;
use crate::fanout::{EventFanout, FanoutStats, SubscribeOptions, Subscription};
use crate::health::{HealthChecker, HealthProbe};
use crate::metrics::{MetricsSnapshot, TopologyMetrics};
use crate::monitor::{LoadMonitor, NodeMetrics};
use crate::ring::{HashRing, RingStats};
use crate::store::MetadataStore;

/// Aggregate health of the cluster, served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    /// `healthy`, `degraded` or `unhealthy`
    pub health: String,
    /// Nodes currently routable
    pub healthy_nodes: usize,
    /// All registered nodes
    pub total_nodes: usize,
    /// Routable share in percent
    pub health_percentage: f64,
}

/// Aggregate statistics, served by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    /// Current store version
    pub version: u64,
    /// Shard count
    pub total_shards: usize,
    /// Ring composition
    pub ring: RingStats,
    /// Fanout occupancy
    pub fanout: FanoutStats,
    /// Service counters
    pub metrics: MetricsSnapshot,
    /// Cluster-wide QPS sum
    pub total_qps: f64,
    /// Mean CPU utilization across nodes
    pub avg_cpu: f64,
}

/// The central topology service (C3). Owns the authoritative state and
/// disseminates it through snapshots and the ordered event stream.
pub struct TopologyService {
    config: TopologyConfig,
    ring: Arc<HashRing>,
    store: Arc<MetadataStore>,
    fanout: Arc<EventFanout>,
    monitor: Arc<LoadMonitor>,
    health: Arc<HealthChecker>,
    metrics: Arc<TopologyMetrics>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TopologyService {
    /// Assemble a service over the given health probe.
    ///
    /// # Errors
    ///
    /// Returns a Configuration error if the config is invalid.
    pub fn new(config: TopologyConfig, probe: Arc<dyn HealthProbe>) -> TopologyResult<Self> {
        config.validate()?;

        let fanout = Arc::new(EventFanout::new(config.fanout.clone()));
        let store = Arc::new(MetadataStore::new(
            config.ring.replication_factor,
            config.snapshot.history,
            fanout.ingest_sender(),
        ));
        let ring = Arc::new(HashRing::new(
            config.ring.virtual_nodes_per_node,
            config.ring.load_balance_threshold,
        ));
        let monitor = Arc::new(LoadMonitor::new(config.health.check_interval));
        let health = Arc::new(HealthChecker::new(
            config.health.clone(),
            probe,
            Arc::clone(&store),
            Arc::clone(&ring),
        ));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            ring,
            store,
            fanout,
            monitor,
            health,
            metrics: Arc::new(TopologyMetrics::new()),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the dispatcher and the periodic health and snapshot tasks.
    pub async fn start(&self) {
        self.fanout.start().await;
        self.metrics.record_start();

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        {
            let health = Arc::clone(&self.health);
            let metrics = Arc::clone(&self.metrics);
            let interval = self.config.health.check_interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    health.run_round().await;
                    metrics.record_health_round();
                }
            }));
        }

        {
            let store = Arc::clone(&self.store);
            let metrics = Arc::clone(&self.metrics);
            let interval = self.config.snapshot.interval;
            let mut shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => break,
                    }
                    store.capture_history_snapshot().await;
                    metrics.record_snapshot();
                }
            }));
        }

        info!("Topology service started");
    }

    /// Stop background tasks and close the fanout.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            let _ = handle.await;
        }
        self.fanout.stop().await;
        info!("Topology service stopped");
    }

    /// Register a node with the cluster and place it on the ring.
    pub async fn register_node(
        &self,
        node_id: &str,
        address: &str,
        weight: f64,
    ) -> TopologyResult<u64> {
        let version = self.store.register_node(node_id, address, HashMap::new()).await?;
        match self.ring.add_node(node_id, address, weight).await {
            Ok(()) => {}
            // Re-registration: the node already owns its ring positions.
            Err(crate::error::TopologyError::NodeAlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        self.metrics.record_node_join();
        Ok(version)
    }

    /// Remove a node from the cluster and the ring.
    pub async fn remove_node(&self, node_id: &str) -> TopologyResult<u64> {
        let version = self.store.remove_node(node_id).await?;
        if let Err(e) = self.ring.remove_node(node_id).await {
            warn!(node_id, error = %e, "Node missing from ring at removal");
        }
        self.monitor.remove_node(node_id).await;
        self.metrics.record_node_leave();
        Ok(version)
    }

    /// Add a shard to the authoritative map.
    pub async fn add_shard(&self, shard: ShardInfo) -> TopologyResult<u64> {
        self.store.add_shard(shard).await
    }

    /// Remove a shard.
    pub async fn remove_shard(&self, shard_id: &str) -> TopologyResult<u64> {
        self.store.remove_shard(shard_id).await
    }

    /// Replace a shard descriptor.
    pub async fn update_shard(&self, shard: ShardInfo) -> TopologyResult<u64> {
        self.store.update_shard(shard).await
    }

    /// Record a node's load report into store, ring and monitor.
    pub async fn record_load(&self, node_id: &str, load: LoadInfo) -> TopologyResult<()> {
        self.store.record_node_load(node_id, load).await?;
        self.ring.update_load(node_id, load).await?;
        self.monitor.record_load(node_id, load).await;
        Ok(())
    }

    /// Point-in-time snapshot of cluster state.
    pub async fn snapshot(&self) -> Arc<TopologySnapshot> {
        self.store.snapshot().await
    }

    /// Current store version.
    pub async fn version(&self) -> u64 {
        self.store.version().await
    }

    /// All shards.
    pub async fn shards(&self) -> Vec<ShardInfo> {
        self.store.shards().await
    }

    /// One shard.
    pub async fn shard(&self, shard_id: &str) -> TopologyResult<ShardInfo> {
        self.store.shard(shard_id).await
    }

    /// All nodes.
    pub async fn nodes(&self) -> Vec<NodeStatus> {
        self.store.nodes().await
    }

    /// One node.
    pub async fn node(&self, node_id: &str) -> TopologyResult<NodeStatus> {
        self.store.node(node_id).await
    }

    /// Aggregate health for monitoring.
    pub async fn health_summary(&self) -> HealthSummary {
        let nodes = self.store.nodes().await;
        let total = nodes.len();
        let healthy = nodes.iter().filter(|n| n.health.is_routable()).count();
        let percentage = if total == 0 { 100.0 } else { healthy as f64 * 100.0 / total as f64 };
        let health = if total == 0 || healthy == total {
            "healthy"
        } else if healthy * 2 >= total {
            "degraded"
        } else {
            "unhealthy"
        };
        HealthSummary {
            health: health.to_string(),
            healthy_nodes: healthy,
            total_nodes: total,
            health_percentage: percentage,
        }
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> ServiceStats {
        let nodes = self.store.nodes().await;
        let total_qps: f64 = nodes.iter().map(|n| n.load.qps).sum();
        let avg_cpu = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.load.cpu).sum::<f64>() / nodes.len() as f64
        };
        ServiceStats {
            version: self.store.version().await,
            total_shards: self.store.shards().await.len(),
            ring: self.ring.stats().await,
            fanout: self.fanout.stats().await,
            metrics: self.metrics.snapshot(),
            total_qps,
            avg_cpu,
        }
    }

    /// Historical events after `since`, capped at `limit`.
    pub async fn events_since(&self, since: u64, limit: usize) -> Vec<TopologyEvent> {
        self.fanout.events_since(since, limit).await
    }

    /// Subscribe to the event stream.
    pub async fn subscribe(&self, options: SubscribeOptions) -> TopologyResult<Subscription> {
        self.fanout.subscribe(options).await
    }

    /// Drop a subscription.
    pub async fn unsubscribe(&self, id: Uuid) -> bool {
        self.fanout.unsubscribe(id).await
    }

    /// One health round, on demand. Tests and admin tooling drive this
    /// directly instead of waiting for the scheduler.
    pub async fn run_health_round(&self) {
        self.health.run_round().await;
        self.metrics.record_health_round();
    }

    /// Per-node monitor metrics.
    pub async fn node_metrics(&self, node_id: &str) -> Option<NodeMetrics> {
        self.monitor.node_metrics(node_id).await
    }

    /// The ring, for the rebalancer's single writer path.
    #[must_use]
    pub fn ring(&self) -> Arc<HashRing> {
        Arc::clone(&self.ring)
    }

    /// The metadata store.
    #[must_use]
    pub fn store(&self) -> Arc<MetadataStore> {
        Arc::clone(&self.store)
    }

    /// The load monitor.
    #[must_use]
    pub fn monitor(&self) -> Arc<LoadMonitor> {
        Arc::clone(&self.monitor)
    }

    /// The service configuration.
    #[must_use]
    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }
}
