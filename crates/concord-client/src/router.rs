//! Key-to-node resolution over a cached topology snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use concord_core::{
    NodeHealth, NodeId, NodeStatus, ShardInfo, ShardState, TopologyEvent, TopologyEventType,
    TopologySnapshot,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::balancer::{build_balancer, Candidate, LoadBalancer};
use crate::breaker::BreakerRegistry;
use crate::cache::{RouteCache, RouteCacheKey};
use crate::config::RouterConfig;
use crate::error::{ClientError, ClientResult};
use crate::source::TopologySource;

/// How a request picks its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutingStrategy {
    /// The shard primary, or fail
    WritePrimary,
    /// A healthy replica, falling back to the primary
    ReadReplica,
    /// The lowest-latency healthy candidate
    ReadNearest,
    /// Load balancer over all healthy candidates
    LoadBalance,
    /// Primary when healthy, otherwise a balanced replica
    Failover,
}

/// One routing request.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    /// Raw key to place
    pub key: Vec<u8>,
    /// Selection strategy
    pub strategy: RoutingStrategy,
    /// Whether the caller only reads
    pub read_only: bool,
    /// Per-request deadline override for refreshes
    pub timeout: Option<Duration>,
}

impl RoutingRequest {
    /// Request with the strategy's natural read-only flag.
    #[must_use]
    pub fn new(key: impl Into<Vec<u8>>, strategy: RoutingStrategy) -> Self {
        Self {
            key: key.into(),
            strategy,
            read_only: matches!(
                strategy,
                RoutingStrategy::ReadReplica | RoutingStrategy::ReadNearest
            ),
            timeout: None,
        }
    }

    /// Override the read-only flag.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// A resolved route.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResult {
    /// Node the caller should dial
    pub target_node: NodeId,
    /// The shard's primary
    pub primary_node: NodeId,
    /// The shard's replicas
    pub replica_nodes: Vec<NodeId>,
    /// Healthy candidates other than the target
    pub backup_nodes: Vec<NodeId>,
    /// Shard the key maps to
    pub shard_info: ShardInfo,
    /// Strategy used
    pub strategy: RoutingStrategy,
    /// Resolution latency in milliseconds
    pub latency_ms: f64,
    /// Whether this came out of the route cache
    pub cached: bool,
}

/// Outcome of a batch resolution: per-key successes and failures.
#[derive(Debug, Default)]
pub struct BatchRoutingResult {
    /// Resolved routes by key
    pub routes: HashMap<Vec<u8>, RoutingResult>,
    /// Failures by key
    pub failures: HashMap<Vec<u8>, ClientError>,
}

/// Smart client router: snapshot cache, circuit breakers, pluggable
/// balancing.
///
/// The router owns its event subscription and its caches; the topology
/// source never holds a reference back (the subscriber is the weak side
/// of the relationship).
pub struct Router {
    config: RouterConfig,
    source: Arc<dyn TopologySource>,
    snapshot: RwLock<Option<TopologySnapshot>>,
    cache: RouteCache,
    breakers: BreakerRegistry,
    balancer: Arc<dyn LoadBalancer>,
    /// Serializes snapshot refreshes
    refresh_gate: Mutex<()>,
    shutdown: watch::Sender<bool>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Build a router over a topology source.
    ///
    /// # Errors
    ///
    /// Returns a Configuration error if the config is invalid.
    pub fn new(config: RouterConfig, source: Arc<dyn TopologySource>) -> ClientResult<Self> {
        config.validate()?;
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            cache: RouteCache::new(config.cache.capacity, config.cache.ttl),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            balancer: build_balancer(config.balancer),
            config,
            source,
            snapshot: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            shutdown,
            event_task: Mutex::new(None),
        })
    }

    /// Fetch the initial snapshot and start the event loop.
    pub async fn start(self: &Arc<Self>) -> ClientResult<()> {
        self.refresh(self.config.request_timeout).await?;

        let mut slot = self.event_task.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let this = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        *slot = Some(tokio::spawn(async move {
            'outer: loop {
                if *shutdown.borrow() {
                    break;
                }
                let since = this.current_version().await;
                let mut events = match this.source.subscribe(Some(since)).await {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "Topology subscription failed; retrying");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                debug!(since, "Topology subscription established");

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break 'outer,
                        next = tokio::time::timeout(
                            this.config.heartbeat_timeout,
                            events.recv(),
                        ) => match next {
                            Ok(Some(event)) => this.apply_event(&event).await,
                            Ok(None) => {
                                warn!("Topology stream closed; resubscribing");
                                break;
                            }
                            Err(_) => {
                                warn!("No heartbeat from topology service; refreshing");
                                if let Err(e) = this.refresh(this.config.request_timeout).await {
                                    warn!(error = %e, "Snapshot refresh failed");
                                }
                                break;
                            }
                        },
                    }
                }
            }
            debug!("Router event loop stopped");
        }));
        info!("Router started");
        Ok(())
    }

    /// Stop the event loop.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.event_task.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Resolve one request to a target node.
    pub async fn resolve(&self, request: RoutingRequest) -> ClientResult<RoutingResult> {
        let started = Instant::now();

        let cache_key = RouteCacheKey {
            key: request.key.clone(),
            strategy: request.strategy,
            read_only: request.read_only,
        };
        if self.config.cache.enabled {
            if let Some(hit) = self.cache.get(&cache_key) {
                return Ok(hit);
            }
        }

        let deadline = request.timeout.unwrap_or(self.config.request_timeout);
        let (shard, nodes) = self.lookup_shard(&request.key, deadline).await?;

        match shard.state {
            ShardState::Offline => {
                return Err(ClientError::ShardUnavailable {
                    shard: shard.id,
                    state: ShardState::Offline.to_string(),
                })
            }
            ShardState::ReadOnly if !request.read_only => {
                return Err(ClientError::ShardUnavailable {
                    shard: shard.id,
                    state: ShardState::ReadOnly.to_string(),
                })
            }
            _ => {}
        }

        let healthy = self.healthy_candidates(&shard, &nodes);
        let target = self.select_target(&request, &shard, &healthy)?;

        let backup_nodes: Vec<NodeId> = healthy
            .iter()
            .map(|c| c.node_id.clone())
            .filter(|id| *id != target)
            .collect();

        let result = RoutingResult {
            target_node: target,
            primary_node: shard.primary_node.clone(),
            replica_nodes: shard.replica_nodes.clone(),
            backup_nodes,
            shard_info: shard,
            strategy: request.strategy,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            cached: false,
        };

        if self.config.cache.enabled {
            self.cache.insert(cache_key, result.clone());
        }
        Ok(result)
    }

    /// Resolve many keys concurrently; failures ride alongside successes.
    pub async fn resolve_batch(&self, requests: Vec<RoutingRequest>) -> BatchRoutingResult {
        let resolutions = requests.into_iter().map(|request| {
            let key = request.key.clone();
            async move { (key, self.resolve(request).await) }
        });

        let mut batch = BatchRoutingResult::default();
        for (key, outcome) in join_all(resolutions).await {
            match outcome {
                Ok(result) => {
                    batch.routes.insert(key, result);
                }
                Err(e) => {
                    batch.failures.insert(key, e);
                }
            }
        }
        batch
    }

    /// Feed a call outcome back into the breaker and balancer for a node.
    pub fn record_outcome(&self, node_id: &str, latency_ms: f64, ok: bool) {
        let breaker = self.breakers.breaker_for(node_id);
        if ok {
            breaker.on_success(latency_ms);
        } else {
            breaker.on_failure();
        }
        self.balancer.update_stats(node_id, latency_ms, ok);
    }

    /// Version of the installed snapshot, 0 before the first refresh.
    pub async fn current_version(&self) -> u64 {
        self.snapshot.read().await.as_ref().map_or(0, |s| s.version)
    }

    /// The per-node breaker registry, for monitoring.
    #[must_use]
    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Cached route count, for monitoring.
    pub fn cached_routes(&self) -> usize {
        self.cache.len()
    }

    /// Force a snapshot refresh, bounded by `deadline`.
    pub async fn refresh(&self, deadline: Duration) -> ClientResult<()> {
        let _gate = self.refresh_gate.lock().await;
        let fresh = tokio::time::timeout(deadline, self.source.fetch_snapshot())
            .await
            .map_err(|_| ClientError::Timeout(deadline))??;

        let mut snapshot = self.snapshot.write().await;
        let stale = snapshot.as_ref().is_some_and(|s| s.version > fresh.version);
        if stale {
            debug!(
                installed = snapshot.as_ref().map_or(0, |s| s.version),
                fetched = fresh.version,
                "Ignoring older snapshot"
            );
            return Ok(());
        }
        debug!(version = fresh.version, "Snapshot installed");
        *snapshot = Some(fresh);
        Ok(())
    }

    /// Find the shard covering `key`, forcing one refresh on a miss.
    async fn lookup_shard(
        &self,
        key: &[u8],
        deadline: Duration,
    ) -> ClientResult<(ShardInfo, HashMap<NodeId, NodeStatus>)> {
        for attempt in 0..2 {
            {
                let snapshot = self.snapshot.read().await;
                if let Some(snapshot) = snapshot.as_ref() {
                    if let Some(shard) = snapshot.shard_for_key(key) {
                        let nodes = shard
                            .all_nodes()
                            .into_iter()
                            .filter_map(|id| {
                                snapshot.nodes.get(&id).map(|n| (id, n.clone()))
                            })
                            .collect();
                        return Ok((shard.clone(), nodes));
                    }
                }
            }
            if attempt == 0 {
                self.refresh(deadline).await?;
            }
        }
        Err(ClientError::NoRoute(String::from_utf8_lossy(key).into_owned()))
    }

    /// Candidates that are routable by health and not short-circuited.
    fn healthy_candidates(
        &self,
        shard: &ShardInfo,
        nodes: &HashMap<NodeId, NodeStatus>,
    ) -> Vec<Candidate> {
        shard
            .all_nodes()
            .into_iter()
            .filter_map(|id| nodes.get(&id))
            .filter(|node| node.health.is_routable())
            .filter(|node| !self.breakers.breaker_for(&node.id).is_blocked())
            .map(|node| Candidate {
                node_id: node.id.clone(),
                weight: 1.0,
                active_connections: node.load.active_connections,
                avg_latency_ms: node.load.avg_latency_ms,
            })
            .collect()
    }

    /// Apply the strategy, then push the pick through the breaker gate.
    fn select_target(
        &self,
        request: &RoutingRequest,
        shard: &ShardInfo,
        healthy: &[Candidate],
    ) -> ClientResult<NodeId> {
        let is_healthy = |id: &NodeId| healthy.iter().any(|c| &c.node_id == id);

        let preferred: Option<NodeId> = match request.strategy {
            RoutingStrategy::WritePrimary => {
                if !is_healthy(&shard.primary_node) {
                    return Err(ClientError::PrimaryUnavailable(shard.primary_node.clone()));
                }
                Some(shard.primary_node.clone())
            }
            RoutingStrategy::ReadReplica => {
                let replicas: Vec<Candidate> = healthy
                    .iter()
                    .filter(|c| c.node_id != shard.primary_node)
                    .cloned()
                    .collect();
                if replicas.is_empty() {
                    // All replicas unhealthy: a healthy primary still serves.
                    is_healthy(&shard.primary_node).then(|| shard.primary_node.clone())
                } else {
                    self.balancer.select(&replicas, &request.key)
                }
            }
            RoutingStrategy::ReadNearest => healthy
                .iter()
                .min_by(|a, b| {
                    a.avg_latency_ms
                        .partial_cmp(&b.avg_latency_ms)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.active_connections.cmp(&b.active_connections))
                        .then_with(|| a.node_id.cmp(&b.node_id))
                })
                .map(|c| c.node_id.clone()),
            RoutingStrategy::LoadBalance => self.balancer.select(healthy, &request.key),
            RoutingStrategy::Failover => {
                if is_healthy(&shard.primary_node) {
                    Some(shard.primary_node.clone())
                } else {
                    let replicas: Vec<Candidate> = healthy
                        .iter()
                        .filter(|c| c.node_id != shard.primary_node)
                        .cloned()
                        .collect();
                    self.balancer.select(&replicas, &request.key)
                }
            }
        };

        let Some(preferred) = preferred else {
            return Err(ClientError::NoHealthyTarget(shard.id.clone()));
        };

        // The breaker is the final gate; on a half-open slot race fall
        // through to the remaining healthy candidates.
        if self.breakers.breaker_for(&preferred).allow_request() {
            return Ok(preferred);
        }
        for candidate in healthy {
            if candidate.node_id != preferred
                && self.breakers.breaker_for(&candidate.node_id).allow_request()
            {
                return Ok(candidate.node_id.clone());
            }
        }
        match request.strategy {
            RoutingStrategy::WritePrimary => {
                Err(ClientError::PrimaryUnavailable(shard.primary_node.clone()))
            }
            _ => Err(ClientError::NoHealthyTarget(shard.id.clone())),
        }
    }

    /// Fold one topology event into the installed snapshot.
    ///
    /// Shard events update the shard entry and evict its routes; node
    /// health changes adjust health while keeping routes; anything
    /// unparseable forces a full refresh.
    pub async fn apply_event(&self, event: &TopologyEvent) {
        let applied = self.try_apply_event(event).await;
        if !applied {
            debug!(event_type = %event.event_type, "Event not applicable; full refresh");
            self.cache.clear();
            if let Err(e) = self.refresh(self.config.request_timeout).await {
                warn!(error = %e, "Snapshot refresh after event failed");
            }
        }
    }

    /// Returns false when the event demands a full refresh.
    async fn try_apply_event(&self, event: &TopologyEvent) -> bool {
        if event.event_type == TopologyEventType::Heartbeat {
            return true;
        }

        let mut guard = self.snapshot.write().await;
        let Some(snapshot) = guard.as_mut() else { return false };
        if event.version <= snapshot.version {
            // Already folded in (or replayed); nothing to do.
            return true;
        }

        let ok = match event.event_type {
            TopologyEventType::NodeHealthChange => {
                match (&event.node_id, &event.new_value) {
                    (Some(node_id), Some(value)) => {
                        match serde_json::from_value::<NodeHealth>(value.clone()) {
                            Ok(health) => {
                                if let Some(node) = snapshot.nodes.get_mut(node_id) {
                                    node.health = health;
                                }
                                // Routes survive health flips; filtering
                                // happens at resolution time.
                                true
                            }
                            Err(_) => false,
                        }
                    }
                    _ => false,
                }
            }
            TopologyEventType::NodeJoin => match &event.new_value {
                Some(value) => match serde_json::from_value::<NodeStatus>(value.clone()) {
                    Ok(node) => {
                        snapshot.nodes.insert(node.id.clone(), node);
                        true
                    }
                    Err(_) => false,
                },
                None => false,
            },
            TopologyEventType::NodeLeave => match &event.node_id {
                Some(node_id) => {
                    snapshot.nodes.remove(node_id);
                    true
                }
                None => false,
            },
            TopologyEventType::ShardAdd
            | TopologyEventType::ShardUpdate
            | TopologyEventType::ShardMigration => match &event.new_value {
                Some(value) => match serde_json::from_value::<ShardInfo>(value.clone()) {
                    Ok(shard) => {
                        self.cache.evict_shard(&shard.id);
                        snapshot.shard_map.insert(shard.id.clone(), shard);
                        true
                    }
                    Err(_) => false,
                },
                None => false,
            },
            TopologyEventType::ShardRemove => match &event.shard_id {
                Some(shard_id) => {
                    self.cache.evict_shard(shard_id);
                    snapshot.shard_map.remove(shard_id);
                    true
                }
                None => false,
            },
            TopologyEventType::ConfigChange | TopologyEventType::Heartbeat => false,
        };

        if ok {
            snapshot.version = event.version;
        }
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use concord_core::{KeyRange, LoadInfo};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Source with a settable snapshot and manual event emission.
    struct StubSource {
        snapshot: RwLock<TopologySnapshot>,
        senders: std::sync::Mutex<Vec<mpsc::Sender<TopologyEvent>>>,
        fetches: AtomicU32,
    }

    impl StubSource {
        fn new(snapshot: TopologySnapshot) -> Arc<Self> {
            Arc::new(Self {
                snapshot: RwLock::new(snapshot),
                senders: std::sync::Mutex::new(Vec::new()),
                fetches: AtomicU32::new(0),
            })
        }

        async fn set_snapshot(&self, snapshot: TopologySnapshot) {
            *self.snapshot.write().await = snapshot;
        }

        async fn emit(&self, event: TopologyEvent) {
            let senders = self.senders.lock().unwrap().clone();
            for sender in senders {
                let _ = sender.send(event.clone()).await;
            }
        }
    }

    #[async_trait]
    impl TopologySource for StubSource {
        async fn fetch_snapshot(&self) -> ClientResult<TopologySnapshot> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.read().await.clone())
        }

        async fn subscribe(
            &self,
            _since_version: Option<u64>,
        ) -> ClientResult<mpsc::Receiver<TopologyEvent>> {
            let (tx, rx) = mpsc::channel(64);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }
    }

    fn node(id: &str, latency_ms: f64, connections: u64) -> NodeStatus {
        let mut status = NodeStatus::new(id, format!("10.0.0.{id}:7700"));
        status.load = LoadInfo {
            avg_latency_ms: latency_ms,
            active_connections: connections,
            ..LoadInfo::default()
        };
        status
    }

    fn snapshot(version: u64) -> TopologySnapshot {
        let mut shards = HashMap::new();
        shards.insert(
            "s1".to_string(),
            ShardInfo::new("s1", KeyRange::full(), "n1")
                .with_replicas(vec!["n2".into(), "n3".into()]),
        );
        let mut nodes = HashMap::new();
        nodes.insert("n1".to_string(), node("n1", 5.0, 3));
        nodes.insert("n2".to_string(), node("n2", 2.0, 7));
        nodes.insert("n3".to_string(), node("n3", 2.0, 1));
        let mut snap = TopologySnapshot::new(version, shards, nodes);
        snap.version = version;
        snap
    }

    fn router_config() -> RouterConfig {
        RouterConfig::with_defaults()
    }

    fn router(source: Arc<StubSource>) -> Router {
        Router::new(router_config(), source).unwrap()
    }

    fn request(strategy: RoutingStrategy) -> RoutingRequest {
        RoutingRequest::new(b"user:42".to_vec(), strategy)
    }

    #[tokio::test]
    async fn test_write_primary_targets_primary() {
        let router = router(StubSource::new(snapshot(1)));
        for _ in 0..10 {
            let result = router.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
            assert_eq!(result.target_node, "n1");
            assert_eq!(result.primary_node, "n1");
            assert_eq!(result.shard_info.id, "s1");
        }
    }

    #[tokio::test]
    async fn test_unhealthy_primary_fails_writes_but_fails_over() {
        let source = StubSource::new(snapshot(1));
        {
            let mut snap = snapshot(2);
            if let Some(n1) = snap.nodes.get_mut("n1") {
                n1.health = NodeHealth::Unhealthy;
            }
            source.set_snapshot(snap).await;
        }
        let router = router(source);

        let write = router.resolve(request(RoutingStrategy::WritePrimary)).await;
        assert!(matches!(write, Err(ClientError::PrimaryUnavailable(ref n)) if n == "n1"));

        let failover =
            router.resolve(request(RoutingStrategy::Failover)).await.unwrap();
        assert!(failover.target_node == "n2" || failover.target_node == "n3");
    }

    #[tokio::test]
    async fn test_read_replica_avoids_primary_until_forced() {
        let source = StubSource::new(snapshot(1));
        let router = router(source.clone());

        let result = router.resolve(request(RoutingStrategy::ReadReplica)).await.unwrap();
        assert_ne!(result.target_node, "n1");

        // With both replicas down, the primary serves reads.
        let mut snap = snapshot(2);
        for id in ["n2", "n3"] {
            if let Some(n) = snap.nodes.get_mut(id) {
                n.health = NodeHealth::Unhealthy;
            }
        }
        source.set_snapshot(snap).await;
        router.refresh(Duration::from_secs(1)).await.unwrap();

        let result = router.resolve(request(RoutingStrategy::ReadReplica)).await.unwrap();
        assert_eq!(result.target_node, "n1");
    }

    #[tokio::test]
    async fn test_read_nearest_tie_breaking() {
        let router = router(StubSource::new(snapshot(1)));
        // n2 and n3 tie on latency (2.0ms); n3 has fewer connections.
        let result = router.resolve(request(RoutingStrategy::ReadNearest)).await.unwrap();
        assert_eq!(result.target_node, "n3");
    }

    #[tokio::test]
    async fn test_all_breakers_open_is_unavailable() {
        let router = router(StubSource::new(snapshot(1)));
        for node in ["n1", "n2", "n3"] {
            let breaker = router.breakers().breaker_for(node);
            for _ in 0..10 {
                breaker.on_failure();
            }
        }

        let result = router.resolve(request(RoutingStrategy::LoadBalance)).await;
        match result {
            Err(e) => assert_eq!(e.kind(), concord_core::ErrorKind::Unavailable),
            Ok(r) => panic!("resolved to {} with every breaker open", r.target_node),
        }
    }

    #[tokio::test]
    async fn test_cache_hit_and_expiry() {
        let mut config = router_config();
        config.cache.ttl = Duration::from_millis(40);
        let router = Router::new(config, StubSource::new(snapshot(1))).unwrap();

        let first = router.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
        assert!(!first.cached);
        let second = router.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
        assert!(second.cached);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let third = router.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
        assert!(!third.cached);
    }

    #[tokio::test]
    async fn test_no_route_for_uncovered_key() {
        let mut snap = snapshot(1);
        snap.shard_map.insert(
            "s1".to_string(),
            ShardInfo::new("s1", KeyRange::Bytes { start: "a".into(), end: "b".into() }, "n1"),
        );
        let source = StubSource::new(snap);
        let router = router(source.clone());
        router.refresh(Duration::from_secs(1)).await.unwrap();
        let fetches_before = source.fetches.load(Ordering::SeqCst);

        let result = router.resolve(request(RoutingStrategy::WritePrimary)).await;
        assert!(matches!(result, Err(ClientError::NoRoute(_))));
        // The miss forced a refresh before giving up.
        assert!(source.fetches.load(Ordering::SeqCst) > fetches_before);
    }

    #[tokio::test]
    async fn test_readonly_shard_rejects_writes() {
        let mut snap = snapshot(1);
        if let Some(shard) = snap.shard_map.get_mut("s1") {
            shard.state = ShardState::ReadOnly;
        }
        let router = router(StubSource::new(snap));

        let write = router.resolve(request(RoutingStrategy::WritePrimary)).await;
        assert!(matches!(write, Err(ClientError::ShardUnavailable { .. })));

        let read = router.resolve(request(RoutingStrategy::ReadReplica)).await;
        assert!(read.is_ok());
    }

    #[tokio::test]
    async fn test_health_event_applies_without_refresh() {
        let source = StubSource::new(snapshot(1));
        let router = Arc::new(router(source.clone()));
        router.start().await.unwrap();
        let fetches_before = source.fetches.load(Ordering::SeqCst);

        let event = TopologyEvent::new(TopologyEventType::NodeHealthChange, 2)
            .with_node("n1")
            .with_change(serde_json::json!("Healthy"), serde_json::json!("Unhealthy"));
        source.emit(event).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = router.resolve(request(RoutingStrategy::Failover)).await.unwrap();
        assert_ne!(result.target_node, "n1");
        assert_eq!(source.fetches.load(Ordering::SeqCst), fetches_before);
        assert_eq!(router.current_version().await, 2);
        router.stop().await;
    }

    #[tokio::test]
    async fn test_shard_migration_event_moves_primary() {
        let source = StubSource::new(snapshot(1));
        let router = Arc::new(router(source.clone()));
        router.start().await.unwrap();

        let mut moved = ShardInfo::new("s1", KeyRange::full(), "n2")
            .with_replicas(vec!["n3".into()]);
        moved.version = 2;
        let event = TopologyEvent::new(TopologyEventType::ShardMigration, 2)
            .with_shard("s1")
            .with_change(serde_json::Value::Null, serde_json::to_value(&moved).unwrap());
        source.emit(event).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let result = router.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
        assert_eq!(result.target_node, "n2");
        router.stop().await;
    }

    #[tokio::test]
    async fn test_config_change_triggers_full_refresh() {
        let source = StubSource::new(snapshot(1));
        let router = Arc::new(router(source.clone()));
        router.start().await.unwrap();
        let fetches_before = source.fetches.load(Ordering::SeqCst);

        source.set_snapshot(snapshot(5)).await;
        source.emit(TopologyEvent::new(TopologyEventType::ConfigChange, 2)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(source.fetches.load(Ordering::SeqCst) > fetches_before);
        assert_eq!(router.current_version().await, 5);
        router.stop().await;
    }

    #[tokio::test]
    async fn test_batch_reports_partial_failure() {
        let mut snap = snapshot(1);
        snap.shard_map.insert(
            "s1".to_string(),
            ShardInfo::new(
                "s1",
                KeyRange::Bytes { start: "a".into(), end: "m".into() },
                "n1",
            )
            .with_replicas(vec!["n2".into()]),
        );
        let router = router(StubSource::new(snap));

        let batch = router
            .resolve_batch(vec![
                RoutingRequest::new(b"apple".to_vec(), RoutingStrategy::WritePrimary),
                RoutingRequest::new(b"zebra".to_vec(), RoutingStrategy::WritePrimary),
            ])
            .await;

        assert_eq!(batch.routes.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert!(batch.routes.contains_key(b"apple".as_slice()));
        assert!(batch.failures.contains_key(b"zebra".as_slice()));
    }

    #[tokio::test]
    async fn test_resolution_is_deterministic_for_write_primary() {
        let router = router(StubSource::new(snapshot(1)));
        let mut config = router_config();
        config.cache.enabled = false;
        let uncached = Router::new(config, StubSource::new(snapshot(1))).unwrap();

        for r in [&router, &uncached] {
            let a = r.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
            let b = r.resolve(request(RoutingStrategy::WritePrimary)).await.unwrap();
            assert_eq!(a.target_node, b.target_node);
        }
    }
}
