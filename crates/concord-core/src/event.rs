//! Topology change events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, ShardId};

/// Kind of topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyEventType {
    /// A node registered with the cluster
    NodeJoin,
    /// A node left the cluster
    NodeLeave,
    /// A node's health transitioned
    NodeHealthChange,
    /// A shard was created
    ShardAdd,
    /// A shard was removed
    ShardRemove,
    /// A shard's descriptor changed
    ShardUpdate,
    /// A shard finished moving between nodes
    ShardMigration,
    /// Cluster configuration changed; subscribers should refresh
    ConfigChange,
    /// Liveness sentinel emitted by the fanout, version 0
    Heartbeat,
}

impl std::fmt::Display for TopologyEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeJoin => write!(f, "NodeJoin"),
            Self::NodeLeave => write!(f, "NodeLeave"),
            Self::NodeHealthChange => write!(f, "NodeHealthChange"),
            Self::ShardAdd => write!(f, "ShardAdd"),
            Self::ShardRemove => write!(f, "ShardRemove"),
            Self::ShardUpdate => write!(f, "ShardUpdate"),
            Self::ShardMigration => write!(f, "ShardMigration"),
            Self::ConfigChange => write!(f, "ConfigChange"),
            Self::Heartbeat => write!(f, "Heartbeat"),
        }
    }
}

/// One atomic change to cluster state, identified by `version`.
///
/// Events are emitted in strictly increasing version order by the metadata
/// store; subscribers observe that order with no gaps after replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyEvent {
    /// Change kind
    #[serde(rename = "type")]
    pub event_type: TopologyEventType,
    /// Store version this event was assigned
    pub version: u64,
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
    /// Node the event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Shard the event concerns, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<ShardId>,
    /// Previous value for change events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<serde_json::Value>,
    /// New value for change events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_value: Option<serde_json::Value>,
    /// Free-form event metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl TopologyEvent {
    /// Build an event of the given type at the given version.
    #[must_use]
    pub fn new(event_type: TopologyEventType, version: u64) -> Self {
        Self {
            event_type,
            version,
            timestamp: Utc::now(),
            node_id: None,
            shard_id: None,
            old_value: None,
            new_value: None,
            metadata: HashMap::new(),
        }
    }

    /// The fanout liveness sentinel. Never stored in history.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(TopologyEventType::Heartbeat, 0)
    }

    /// Attach the node this event concerns.
    #[must_use]
    pub fn with_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach the shard this event concerns.
    #[must_use]
    pub fn with_shard(mut self, shard_id: impl Into<ShardId>) -> Self {
        self.shard_id = Some(shard_id.into());
        self
    }

    /// Attach old/new values for change events.
    #[must_use]
    pub fn with_change(mut self, old: serde_json::Value, new: serde_json::Value) -> Self {
        self.old_value = Some(old);
        self.new_value = Some(new);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_type_field() {
        let event = TopologyEvent::new(TopologyEventType::NodeJoin, 7).with_node("n1");
        let value = serde_json::to_value(&event).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["type"], "NodeJoin");
        assert_eq!(obj["version"], 7);
        assert_eq!(obj["nodeId"], "n1");
        assert!(!obj.contains_key("shardId"));
    }

    #[test]
    fn test_heartbeat_sentinel() {
        let hb = TopologyEvent::heartbeat();
        assert_eq!(hb.event_type, TopologyEventType::Heartbeat);
        assert_eq!(hb.version, 0);
    }

    #[test]
    fn test_round_trip() {
        let event = TopologyEvent::new(TopologyEventType::NodeHealthChange, 12)
            .with_node("n2")
            .with_change(serde_json::json!("Healthy"), serde_json::json!("Unhealthy"));
        let json = serde_json::to_string(&event).unwrap();
        let back: TopologyEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.event_type, TopologyEventType::NodeHealthChange);
        assert_eq!(back.version, 12);
        assert_eq!(back.old_value, Some(serde_json::json!("Healthy")));
    }
}
