//! Authoritative shard and node metadata store.
//!
//! The store is the single writer for cluster state. Every mutation bumps
//! the monotonic version and emits exactly one [`TopologyEvent`] into the
//! fanout ingest channel while the write lock is held, so subscribers see
//! events in strict version order with no gaps.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use concord_core::{
    NodeHealth, NodeId, NodeStatus, ShardId, ShardInfo, ShardState, TopologyEvent,
    TopologyEventType, TopologySnapshot,
};
use concord_core::types::LoadInfo;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{TopologyError, TopologyResult};

/// Internal state of the metadata store.
struct StoreState {
    /// All shards by id
    shards: HashMap<ShardId, ShardInfo>,
    /// All nodes by id
    nodes: HashMap<NodeId, NodeStatus>,
    /// Monotonic version; bumped once per mutation
    version: u64,
    /// Cached snapshot, reused while the version is unchanged
    cached: Option<Arc<TopologySnapshot>>,
    /// Recent snapshots for diff replay, newest last
    history: VecDeque<Arc<TopologySnapshot>>,
}

/// Authoritative mapping of shards and nodes, owner of the version counter.
pub struct MetadataStore {
    /// Replica count ceiling enforced on shard descriptors
    replication_factor: usize,
    /// Snapshots retained for replay
    history_limit: usize,
    /// Fanout ingest; events enqueue under the write lock
    events: mpsc::UnboundedSender<TopologyEvent>,
    /// Guarded state
    state: RwLock<StoreState>,
}

impl MetadataStore {
    /// Create a store that feeds events into `events`.
    #[must_use]
    pub fn new(
        replication_factor: usize,
        history_limit: usize,
        events: mpsc::UnboundedSender<TopologyEvent>,
    ) -> Self {
        Self {
            replication_factor,
            history_limit,
            events,
            state: RwLock::new(StoreState {
                shards: HashMap::new(),
                nodes: HashMap::new(),
                version: 0,
                cached: None,
                history: VecDeque::new(),
            }),
        }
    }

    /// Current store version.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }

    /// Register a node. First registration emits `NodeJoin`; re-registering
    /// the same id at the same address only refreshes `last_seen`, while a
    /// different address is a conflict.
    pub async fn register_node(
        &self,
        node_id: &str,
        address: &str,
        metadata: HashMap<String, String>,
    ) -> TopologyResult<u64> {
        let mut state = self.state.write().await;

        if let Some(existing) = state.nodes.get_mut(node_id) {
            if existing.address == address {
                existing.last_seen = Utc::now();
                return Ok(state.version);
            }
            return Err(TopologyError::AddressConflict {
                node: node_id.to_string(),
                existing: existing.address.clone(),
                proposed: address.to_string(),
            });
        }

        let mut node = NodeStatus::new(node_id, address);
        node.metadata = metadata;
        let node_json = serde_json::to_value(&node)?;
        state.nodes.insert(node_id.to_string(), node);

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::NodeJoin, version)
                .with_node(node_id)
                .with_change(serde_json::Value::Null, node_json),
        );
        info!(node_id, address, version, "Node joined");
        Ok(version)
    }

    /// Remove a node from the cluster. Rejected while shards still
    /// reference it.
    pub async fn remove_node(&self, node_id: &str) -> TopologyResult<u64> {
        let mut state = self.state.write().await;

        let referencing = state
            .shards
            .values()
            .filter(|s| s.primary_node == node_id || s.replica_nodes.iter().any(|r| r == node_id))
            .count();
        if referencing > 0 {
            return Err(TopologyError::NodeInUse {
                node: node_id.to_string(),
                shard_count: referencing,
            });
        }

        let Some(node) = state.nodes.remove(node_id) else {
            return Err(TopologyError::NodeNotFound(node_id.to_string()));
        };

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::NodeLeave, version)
                .with_node(node_id)
                .with_change(serde_json::to_value(&node)?, serde_json::Value::Null),
        );
        info!(node_id, version, "Node left");
        Ok(version)
    }

    /// Transition a node's health. A no-op transition emits nothing and
    /// does not bump the version.
    pub async fn set_node_health(
        &self,
        node_id: &str,
        health: NodeHealth,
    ) -> TopologyResult<Option<u64>> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.get_mut(node_id) else {
            return Err(TopologyError::NodeNotFound(node_id.to_string()));
        };

        let old = node.health;
        if old == health {
            return Ok(None);
        }
        node.health = health;
        node.last_seen = Utc::now();
        let last_seen = node.last_seen.to_rfc3339();

        let version = self.bump(&mut state);
        let mut event = TopologyEvent::new(TopologyEventType::NodeHealthChange, version)
            .with_node(node_id)
            .with_change(
                serde_json::Value::String(old.to_string()),
                serde_json::Value::String(health.to_string()),
            );
        event.metadata.insert("lastSeen".into(), last_seen);
        self.emit(event);

        info!(node_id, old = %old, new = %health, version, "Node health changed");
        Ok(Some(version))
    }

    /// Refresh a node's `last_seen` after a successful probe. No event,
    /// no version bump.
    pub async fn touch_node(&self, node_id: &str) -> TopologyResult<()> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.get_mut(node_id) else {
            return Err(TopologyError::NodeNotFound(node_id.to_string()));
        };
        node.last_seen = Utc::now();
        Ok(())
    }

    /// Record a node's load report. Load is observational state: it lands
    /// in snapshots but does not version the topology or emit events.
    pub async fn record_node_load(&self, node_id: &str, load: LoadInfo) -> TopologyResult<()> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.get_mut(node_id) else {
            return Err(TopologyError::NodeNotFound(node_id.to_string()));
        };
        node.load = load;
        node.last_seen = Utc::now();
        // Load lives outside the config hash, so the cached snapshot only
        // needs refreshing lazily.
        state.cached = None;
        Ok(())
    }

    /// Add a shard. All referenced nodes must be registered.
    pub async fn add_shard(&self, shard: ShardInfo) -> TopologyResult<u64> {
        shard.validate(self.replication_factor).map_err(TopologyError::Config)?;

        let mut state = self.state.write().await;
        if state.shards.contains_key(&shard.id) {
            return Err(TopologyError::ShardAlreadyExists(shard.id));
        }
        for node_id in shard.all_nodes() {
            if !state.nodes.contains_key(&node_id) {
                return Err(TopologyError::NodeNotFound(node_id));
            }
        }

        for node_id in shard.all_nodes() {
            if let Some(node) = state.nodes.get_mut(&node_id) {
                node.shards.push(shard.id.clone());
            }
        }
        let shard_json = serde_json::to_value(&shard)?;
        let shard_id = shard.id.clone();
        state.shards.insert(shard_id.clone(), shard);

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::ShardAdd, version)
                .with_shard(shard_id.clone())
                .with_change(serde_json::Value::Null, shard_json),
        );
        info!(shard_id = %shard_id, version, "Shard added");
        Ok(version)
    }

    /// Remove a shard.
    pub async fn remove_shard(&self, shard_id: &str) -> TopologyResult<u64> {
        let mut state = self.state.write().await;
        let Some(shard) = state.shards.remove(shard_id) else {
            return Err(TopologyError::ShardNotFound(shard_id.to_string()));
        };

        for node in state.nodes.values_mut() {
            node.shards.retain(|s| s != shard_id);
        }

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::ShardRemove, version)
                .with_shard(shard_id)
                .with_change(serde_json::to_value(&shard)?, serde_json::Value::Null),
        );
        info!(shard_id, version, "Shard removed");
        Ok(version)
    }

    /// Replace a shard descriptor. The proposed shard version must be
    /// strictly greater than the one on record.
    pub async fn update_shard(&self, shard: ShardInfo) -> TopologyResult<u64> {
        shard.validate(self.replication_factor).map_err(TopologyError::Config)?;

        let mut state = self.state.write().await;
        let Some(current) = state.shards.get(&shard.id) else {
            return Err(TopologyError::ShardNotFound(shard.id));
        };
        if shard.version <= current.version {
            warn!(
                shard_id = %shard.id,
                current = current.version,
                proposed = shard.version,
                "Rejected shard update with version regression"
            );
            return Err(TopologyError::VersionRegression {
                shard: shard.id,
                current: current.version,
                proposed: shard.version,
            });
        }

        let old_json = serde_json::to_value(current)?;
        let mut shard = shard;
        shard.updated_at = Utc::now();
        let new_json = serde_json::to_value(&shard)?;
        let shard_id = shard.id.clone();

        self.reindex_node_shards(&mut state, &shard_id, &shard);
        state.shards.insert(shard_id.clone(), shard);

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::ShardUpdate, version)
                .with_shard(shard_id)
                .with_change(old_json, new_json),
        );
        Ok(version)
    }

    /// Set a shard's placement state, bumping its version.
    pub async fn set_shard_state(
        &self,
        shard_id: &str,
        shard_state: ShardState,
    ) -> TopologyResult<u64> {
        let mut state = self.state.write().await;
        let Some(shard) = state.shards.get_mut(shard_id) else {
            return Err(TopologyError::ShardNotFound(shard_id.to_string()));
        };

        let old_json = serde_json::to_value(&*shard)?;
        shard.state = shard_state;
        shard.version += 1;
        shard.updated_at = Utc::now();
        let new_json = serde_json::to_value(&*shard)?;

        let version = self.bump(&mut state);
        self.emit(
            TopologyEvent::new(TopologyEventType::ShardUpdate, version)
                .with_shard(shard_id)
                .with_change(old_json, new_json),
        );
        debug!(shard_id, state = %shard_state, version, "Shard state changed");
        Ok(version)
    }

    /// Finish a migration: move the shard from `source` to `target`,
    /// flip a `Migrating` shard back to `Active`, and emit `ShardMigration`.
    pub async fn complete_migration(
        &self,
        shard_id: &str,
        source: &str,
        target: &str,
    ) -> TopologyResult<u64> {
        let mut state = self.state.write().await;
        if !state.nodes.contains_key(target) {
            return Err(TopologyError::NodeNotFound(target.to_string()));
        }
        let Some(shard) = state.shards.get_mut(shard_id) else {
            return Err(TopologyError::ShardNotFound(shard_id.to_string()));
        };

        let old_json = serde_json::to_value(&*shard)?;
        if shard.primary_node == source {
            shard.primary_node = target.to_string();
            shard.replica_nodes.retain(|r| r != target);
        } else if let Some(slot) = shard.replica_nodes.iter_mut().find(|r| *r == source) {
            *slot = target.to_string();
        }
        if shard.state == ShardState::Migrating {
            shard.state = ShardState::Active;
        }
        shard.version += 1;
        shard.updated_at = Utc::now();
        let new_json = serde_json::to_value(&*shard)?;
        let shard_snapshot = shard.clone();

        self.reindex_node_shards(&mut state, shard_id, &shard_snapshot);

        let version = self.bump(&mut state);
        let mut event = TopologyEvent::new(TopologyEventType::ShardMigration, version)
            .with_shard(shard_id)
            .with_change(old_json, new_json);
        event.metadata.insert("sourceNode".into(), source.to_string());
        event.metadata.insert("targetNode".into(), target.to_string());
        self.emit(event);

        info!(shard_id, source, target, version, "Shard migration completed");
        Ok(version)
    }

    /// Record a configuration change; subscribers react with a full refresh.
    pub async fn touch_config(&self, metadata: HashMap<String, String>) -> TopologyResult<u64> {
        let mut state = self.state.write().await;
        let version = self.bump(&mut state);
        let mut event = TopologyEvent::new(TopologyEventType::ConfigChange, version);
        event.metadata = metadata;
        self.emit(event);
        Ok(version)
    }

    /// Produce (or reuse) a point-in-time snapshot.
    ///
    /// The snapshot is rebuilt whenever the version moved or load was
    /// refreshed, so `snapshot.version` is never behind an event the caller
    /// has already observed.
    pub async fn snapshot(&self) -> Arc<TopologySnapshot> {
        {
            let state = self.state.read().await;
            if let Some(cached) = &state.cached {
                if cached.version == state.version {
                    return Arc::clone(cached);
                }
            }
        }

        let mut state = self.state.write().await;
        if let Some(cached) = &state.cached {
            if cached.version == state.version {
                return Arc::clone(cached);
            }
        }
        let snapshot = Arc::new(TopologySnapshot::new(
            state.version,
            state.shards.clone(),
            state.nodes.clone(),
        ));
        state.cached = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Capture a snapshot into the bounded history. Run by the periodic
    /// snapshot task; emits no event.
    pub async fn capture_history_snapshot(&self) -> Arc<TopologySnapshot> {
        let snapshot = self.snapshot().await;
        let mut state = self.state.write().await;
        let duplicate =
            state.history.back().is_some_and(|last| last.version == snapshot.version);
        if !duplicate {
            state.history.push_back(Arc::clone(&snapshot));
            while state.history.len() > self.history_limit {
                state.history.pop_front();
            }
        }
        snapshot
    }

    /// Retained snapshot history, oldest first.
    pub async fn snapshot_history(&self) -> Vec<Arc<TopologySnapshot>> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Fetch one shard.
    pub async fn shard(&self, shard_id: &str) -> TopologyResult<ShardInfo> {
        self.state
            .read()
            .await
            .shards
            .get(shard_id)
            .cloned()
            .ok_or_else(|| TopologyError::ShardNotFound(shard_id.to_string()))
    }

    /// Fetch one node.
    pub async fn node(&self, node_id: &str) -> TopologyResult<NodeStatus> {
        self.state
            .read()
            .await
            .nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))
    }

    /// All shards.
    pub async fn shards(&self) -> Vec<ShardInfo> {
        self.state.read().await.shards.values().cloned().collect()
    }

    /// All nodes.
    pub async fn nodes(&self) -> Vec<NodeStatus> {
        self.state.read().await.nodes.values().cloned().collect()
    }

    /// Bump the version and drop the cached snapshot. Call under the
    /// write lock, once per mutation.
    fn bump(&self, state: &mut StoreState) -> u64 {
        state.version += 1;
        state.cached = None;
        state.version
    }

    /// Enqueue an event to the fanout. The dispatcher owning the receiver
    /// may already be gone during shutdown; that is not an error.
    fn emit(&self, event: TopologyEvent) {
        if self.events.send(event).is_err() {
            debug!("Event fanout closed; dropping event");
        }
    }

    /// Rebuild the per-node shard lists for one shard's membership.
    fn reindex_node_shards(&self, state: &mut StoreState, shard_id: &str, shard: &ShardInfo) {
        let members: Vec<NodeId> = shard.all_nodes();
        for (node_id, node) in &mut state.nodes {
            let should_have = members.iter().any(|m| m == node_id);
            let has = node.shards.iter().any(|s| s == shard_id);
            if should_have && !has {
                node.shards.push(shard_id.to_string());
            } else if !should_have && has {
                node.shards.retain(|s| s != shard_id);
            }
        }
    }
}
