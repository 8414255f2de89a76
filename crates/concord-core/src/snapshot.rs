//! Point-in-time views of cluster state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash;
use crate::types::{NodeId, NodeStatus, ShardId, ShardInfo};

/// An immutable, versioned view of cluster state.
///
/// Produced atomically by the metadata store under its write lock; readers
/// must never mutate one. `config_hash` is a deterministic digest over the
/// canonically-ordered shard and node sets, used by clients to detect that
/// two snapshots describe the same topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    /// Store version at capture time
    pub version: u64,
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// All shards by id
    pub shard_map: HashMap<ShardId, ShardInfo>,
    /// All nodes by id
    pub nodes: HashMap<NodeId, NodeStatus>,
    /// Integrity digest over the shard and node sets
    pub config_hash: String,
}

impl TopologySnapshot {
    /// Build a snapshot, computing the config hash.
    #[must_use]
    pub fn new(
        version: u64,
        shard_map: HashMap<ShardId, ShardInfo>,
        nodes: HashMap<NodeId, NodeStatus>,
    ) -> Self {
        let config_hash = Self::compute_config_hash(&shard_map, &nodes);
        Self { version, timestamp: Utc::now(), shard_map, nodes, config_hash }
    }

    /// Deterministic digest over the serialized shard and node sets.
    ///
    /// Entries are folded in sorted id order so the digest is independent
    /// of map iteration order.
    #[must_use]
    pub fn compute_config_hash(
        shard_map: &HashMap<ShardId, ShardInfo>,
        nodes: &HashMap<NodeId, NodeStatus>,
    ) -> String {
        let mut canon = Vec::new();

        let mut shard_ids: Vec<&ShardId> = shard_map.keys().collect();
        shard_ids.sort();
        for id in shard_ids {
            if let Some(shard) = shard_map.get(id) {
                canon.extend_from_slice(id.as_bytes());
                canon.push(b'=');
                canon.extend_from_slice(shard.primary_node.as_bytes());
                for replica in &shard.replica_nodes {
                    canon.push(b',');
                    canon.extend_from_slice(replica.as_bytes());
                }
                canon.extend_from_slice(shard.state.to_string().as_bytes());
                canon.extend_from_slice(&shard.version.to_be_bytes());
                canon.push(b';');
            }
        }

        let mut node_ids: Vec<&NodeId> = nodes.keys().collect();
        node_ids.sort();
        for id in node_ids {
            if let Some(node) = nodes.get(id) {
                canon.extend_from_slice(id.as_bytes());
                canon.push(b'@');
                canon.extend_from_slice(node.address.as_bytes());
                canon.extend_from_slice(node.health.to_string().as_bytes());
                canon.push(b';');
            }
        }

        hash::digest_hex(&canon)
    }

    /// Find the shard whose range contains `key`, if any.
    #[must_use]
    pub fn shard_for_key(&self, key: &[u8]) -> Option<&ShardInfo> {
        self.shard_map.values().find(|s| s.range.contains_key(key))
    }

    /// Count of nodes currently routable.
    #[must_use]
    pub fn healthy_node_count(&self) -> usize {
        self.nodes.values().filter(|n| n.health.is_routable()).count()
    }
}
