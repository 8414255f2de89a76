//! Shard and node descriptors.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keyrange::KeyRange;

/// Opaque node identifier, globally unique within the cluster.
pub type NodeId = String;

/// Opaque shard identifier.
pub type ShardId = String;

/// Placement state of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShardState {
    /// Shard is serving reads and writes
    Active,
    /// Shard data is being moved to another node
    Migrating,
    /// Shard accepts reads only
    ReadOnly,
    /// Shard is not serving
    Offline,
}

impl std::fmt::Display for ShardState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Migrating => write!(f, "Migrating"),
            Self::ReadOnly => write!(f, "ReadOnly"),
            Self::Offline => write!(f, "Offline"),
        }
    }
}

/// The unit of placement: a key range assigned to a replica group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardInfo {
    /// Shard identifier
    pub id: ShardId,
    /// Key range owned by this shard
    pub range: KeyRange,
    /// Replica accepting writes
    pub primary_node: NodeId,
    /// Read-eligible replicas, primary excluded
    pub replica_nodes: Vec<NodeId>,
    /// Current placement state
    pub state: ShardState,
    /// Monotonic version, bumped on every mutation
    pub version: i64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Free-form shard metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ShardInfo {
    /// Create an active shard with version 1.
    #[must_use]
    pub fn new(id: impl Into<ShardId>, range: KeyRange, primary_node: impl Into<NodeId>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            range,
            primary_node: primary_node.into(),
            replica_nodes: Vec::new(),
            state: ShardState::Active,
            version: 1,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Attach replicas, keeping the primary out of the replica list.
    #[must_use]
    pub fn with_replicas(mut self, replicas: Vec<NodeId>) -> Self {
        self.replica_nodes = replicas.into_iter().filter(|r| *r != self.primary_node).collect();
        self
    }

    /// All nodes hosting the shard, primary first.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::with_capacity(self.replica_nodes.len() + 1);
        nodes.push(self.primary_node.clone());
        nodes.extend(self.replica_nodes.iter().cloned());
        nodes
    }

    /// Check the shard invariants: primary not in replicas, replica count
    /// within the replication factor, non-empty id and range.
    pub fn validate(&self, replication_factor: usize) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("shard id is empty".into());
        }
        if self.range.is_empty() {
            return Err(format!("shard {} has an empty key range", self.id));
        }
        if self.primary_node.is_empty() {
            return Err(format!("shard {} has no primary", self.id));
        }
        if self.replica_nodes.contains(&self.primary_node) {
            return Err(format!(
                "shard {}: primary {} also listed as replica",
                self.id, self.primary_node
            ));
        }
        if self.replica_nodes.len() + 1 > replication_factor {
            return Err(format!(
                "shard {}: {} replicas exceed replication factor {}",
                self.id,
                self.replica_nodes.len() + 1,
                replication_factor
            ));
        }
        Ok(())
    }
}

/// Health of a node as tracked by the topology service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeHealth {
    /// Passing health checks
    Healthy,
    /// Failing health checks
    Unhealthy,
    /// Passing again after being unhealthy, not yet fully trusted
    Recovering,
    /// Unreachable for an extended period
    Unavailable,
}

impl NodeHealth {
    /// Whether a router may send traffic to the node.
    #[must_use]
    pub fn is_routable(self) -> bool {
        matches!(self, Self::Healthy | Self::Recovering)
    }
}

impl std::fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy => write!(f, "Unhealthy"),
            Self::Recovering => write!(f, "Recovering"),
            Self::Unavailable => write!(f, "Unavailable"),
        }
    }
}

/// Load metrics reported by a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadInfo {
    /// CPU utilization in `[0, 1]`
    pub cpu: f64,
    /// Memory utilization in `[0, 1]`
    pub mem: f64,
    /// Disk utilization in `[0, 1]`
    pub disk: f64,
    /// Queries per second
    pub qps: f64,
    /// Average request latency in milliseconds
    pub avg_latency_ms: f64,
    /// Currently open connections
    pub active_connections: u64,
}

/// Membership record for a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Node identifier
    pub id: NodeId,
    /// Address clients and peers dial
    pub address: String,
    /// Current health
    pub health: NodeHealth,
    /// Shards hosted by this node
    #[serde(default)]
    pub shards: Vec<ShardId>,
    /// Latest reported load
    #[serde(default)]
    pub load: LoadInfo,
    /// Last successful contact
    pub last_seen: DateTime<Utc>,
    /// Free-form node metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl NodeStatus {
    /// A freshly registered, healthy node.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            health: NodeHealth::Healthy,
            shards: Vec::new(),
            load: LoadInfo::default(),
            last_seen: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}
