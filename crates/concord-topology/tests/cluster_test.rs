//! End-to-end scenarios across the topology service, migrator and the
//! client router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use concord_client::{ClientError, ClientResult, Router, RouterConfig, RoutingRequest,
    RoutingStrategy, TopologySource};
use concord_core::{KeyRange, NodeHealth, ShardInfo, TopologyEvent, TopologyEventType,
    TopologySnapshot};
use concord_topology::config::MigratorConfig;
use concord_topology::engine::MemoryEngine;
use concord_topology::health::HealthProbe;
use concord_topology::migrator::Migrator;
use concord_topology::transfer::{InMemoryTransfer, NetworkTransfer};
use concord_topology::{SubscribeOptions, TopologyConfig, TopologyService};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

/// Probe with scripted per-node outcomes.
struct ScriptedProbe {
    outcomes: Mutex<HashMap<String, bool>>,
}

impl ScriptedProbe {
    fn new() -> Arc<Self> {
        Arc::new(Self { outcomes: Mutex::new(HashMap::new()) })
    }

    async fn set(&self, node_id: &str, ok: bool) {
        self.outcomes.lock().await.insert(node_id.to_string(), ok);
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    async fn probe(&self, node_id: &str, _address: &str) -> bool {
        self.outcomes.lock().await.get(node_id).copied().unwrap_or(true)
    }
}

/// In-process topology source: the router consumes the service directly.
struct ServiceSource {
    service: Arc<TopologyService>,
}

#[async_trait]
impl TopologySource for ServiceSource {
    async fn fetch_snapshot(&self) -> ClientResult<TopologySnapshot> {
        Ok((*self.service.snapshot().await).clone())
    }

    async fn subscribe(
        &self,
        since_version: Option<u64>,
    ) -> ClientResult<mpsc::Receiver<TopologyEvent>> {
        let subscription = self
            .service
            .subscribe(SubscribeOptions {
                client_addr: "in-process".to_string(),
                event_types: None,
                since_version,
                buffer: None,
            })
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(subscription.receiver)
    }
}

async fn boot_cluster(
    probe: Arc<ScriptedProbe>,
    virtual_nodes: u32,
) -> Arc<TopologyService> {
    let config = TopologyConfig::builder()
        .virtual_nodes_per_node(virtual_nodes)
        .replication_factor(3)
        .health_thresholds(3, 2)
        .build()
        .unwrap();
    let service = Arc::new(TopologyService::new(config, probe).unwrap());
    service.start().await;

    for (id, addr) in [
        ("node1", "10.0.0.1:7700"),
        ("node2", "10.0.0.2:7700"),
        ("node3", "10.0.0.3:7700"),
    ] {
        service.register_node(id, addr, 1.0).await.unwrap();
    }
    service
}

async fn router_for(service: &Arc<TopologyService>) -> Arc<Router> {
    let source = Arc::new(ServiceSource { service: Arc::clone(service) });
    let router = Arc::new(Router::new(RouterConfig::with_defaults(), source).unwrap());
    router.start().await.unwrap();
    router
}

#[tokio::test]
async fn test_three_node_cluster_boot() {
    let service = boot_cluster(ScriptedProbe::new(), 200).await;

    let stats = service.stats().await;
    assert_eq!(stats.ring.total_nodes, 3);
    assert_eq!(stats.ring.total_virtual_nodes, 600);
    assert!((stats.ring.total_weight - 3.0).abs() < 1e-9);

    let summary = service.health_summary().await;
    assert_eq!(summary.health, "healthy");
    assert_eq!(summary.total_nodes, 3);

    let snapshot = service.snapshot().await;
    assert_eq!(snapshot.version, 3);
    assert_eq!(snapshot.nodes.len(), 3);

    service.stop().await;
}

#[tokio::test]
async fn test_primary_failover() {
    let probe = ScriptedProbe::new();
    let service = boot_cluster(Arc::clone(&probe), 50).await;
    service
        .add_shard(
            ShardInfo::new("s1", KeyRange::full(), "node1")
                .with_replicas(vec!["node2".into(), "node3".into()]),
        )
        .await
        .unwrap();

    let router = router_for(&service).await;

    // Healthy cluster: writes hit the primary.
    let route = router
        .resolve(RoutingRequest::new(b"user:42".to_vec(), RoutingStrategy::WritePrimary))
        .await
        .unwrap();
    assert_eq!(route.target_node, "node1");

    // Watch for the health transition.
    let mut events = service
        .subscribe(SubscribeOptions {
            client_addr: "test-observer".into(),
            event_types: Some([TopologyEventType::NodeHealthChange].into_iter().collect()),
            since_version: None,
            buffer: None,
        })
        .await
        .unwrap();

    // Three consecutive probe failures mark node1 unhealthy.
    probe.set("node1", false).await;
    for _ in 0..3 {
        service.run_health_round().await;
    }

    let event = tokio::time::timeout(Duration::from_secs(1), events.receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type, TopologyEventType::NodeHealthChange);
    assert_eq!(event.node_id.as_deref(), Some("node1"));
    assert_eq!(event.old_value, Some(serde_json::json!("Healthy")));
    assert_eq!(event.new_value, Some(serde_json::json!("Unhealthy")));
    assert_eq!(service.node("node1").await.unwrap().health, NodeHealth::Unhealthy);

    // Exactly one transition event.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), events.receiver.recv())
            .await
            .is_err()
    );

    // Give the router's subscription a beat to fold the event in.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let write = router
        .resolve(RoutingRequest::new(b"user:43".to_vec(), RoutingStrategy::WritePrimary))
        .await;
    assert!(matches!(write, Err(ClientError::PrimaryUnavailable(ref n)) if n == "node1"));

    let failover = router
        .resolve(RoutingRequest::new(b"user:43".to_vec(), RoutingStrategy::Failover))
        .await
        .unwrap();
    assert!(failover.target_node == "node2" || failover.target_node == "node3");

    router.stop().await;
    service.stop().await;
}

#[tokio::test]
async fn test_migration_reroutes_writes() {
    let service = boot_cluster(ScriptedProbe::new(), 50).await;
    service
        .add_shard(
            ShardInfo::new(
                "s1",
                KeyRange::Bytes { start: "k-0000".into(), end: "k-1000".into() },
                "node1",
            )
            .with_replicas(vec!["node2".into()]),
        )
        .await
        .unwrap();

    // Source node holds 1000 keys; the target starts empty.
    let transfer = Arc::new(InMemoryTransfer::new());
    let source_engine = Arc::new(MemoryEngine::new());
    let target_engine = Arc::new(MemoryEngine::new());
    for i in 0..1000 {
        source_engine.put(format!("k-{i:04}"), format!("value-{i:04}")).await;
    }
    transfer.register_engine("node1", Arc::clone(&source_engine)).await;
    transfer.register_engine("node3", Arc::clone(&target_engine)).await;

    let migrator = Arc::new(Migrator::new(
        MigratorConfig {
            batch_size: 100,
            retry_delay: Duration::from_millis(10),
            ..MigratorConfig::default()
        },
        Arc::clone(&transfer) as Arc<dyn NetworkTransfer>,
        service.store(),
    ));
    migrator.start().await;

    let router = router_for(&service).await;
    let route = router
        .resolve(RoutingRequest::new(b"k-0500".to_vec(), RoutingStrategy::WritePrimary))
        .await
        .unwrap();
    assert_eq!(route.target_node, "node1");

    let task = concord_core::MigrationTask::new(
        "s1",
        "node1",
        "node3",
        KeyRange::Bytes { start: "k-0000".into(), end: "k-1000".into() },
    );
    let task_id = migrator.submit_migration_task(task).await.unwrap();

    // Wait for completion.
    let mut completed = None;
    for _ in 0..200 {
        let t = migrator.get_task(task_id).await.unwrap();
        if t.status.is_terminal() {
            completed = Some(t);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let completed = completed.expect("migration never finished");
    assert_eq!(completed.status, concord_core::MigrationStatus::Completed);
    assert_eq!(completed.progress.processed_keys, 1000);
    assert_eq!(target_engine.len().await, 1000);
    assert_eq!(migrator.stats().await.completed_tasks, 1);

    // The shard now lives on node3 and the router follows.
    let shard = service.shard("s1").await.unwrap();
    assert_eq!(shard.primary_node, "node3");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let route = router
        .resolve(RoutingRequest::new(b"k-0500".to_vec(), RoutingStrategy::WritePrimary))
        .await
        .unwrap();
    assert_eq!(route.target_node, "node3");

    router.stop().await;
    migrator.stop().await;
    service.stop().await;
}

#[tokio::test]
async fn test_event_stream_versions_are_gapless() {
    let service = boot_cluster(ScriptedProbe::new(), 50).await;

    let mut sub = service
        .subscribe(SubscribeOptions {
            client_addr: "gapless".into(),
            event_types: None,
            since_version: Some(0),
            buffer: None,
        })
        .await
        .unwrap();

    service
        .add_shard(ShardInfo::new("s1", KeyRange::full(), "node1"))
        .await
        .unwrap();
    service.store().set_node_health("node2", NodeHealth::Unhealthy).await.unwrap();
    service.store().set_node_health("node2", NodeHealth::Recovering).await.unwrap();

    let mut versions = Vec::new();
    while versions.len() < 6 {
        let event = tokio::time::timeout(Duration::from_secs(1), sub.receiver.recv())
            .await
            .expect("event stream stalled")
            .expect("event stream closed");
        if event.event_type != TopologyEventType::Heartbeat {
            versions.push(event.version);
        }
    }
    assert_eq!(versions, vec![1, 2, 3, 4, 5, 6]);

    // The snapshot is never behind the delivered events.
    let snapshot = service.snapshot().await;
    assert!(snapshot.version >= 6);

    service.stop().await;
}
