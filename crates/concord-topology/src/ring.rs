//! Consistent-hash ring with virtual nodes and weights.

use std::collections::HashMap;
use std::sync::Arc;

use concord_core::hash;
use concord_core::{LoadInfo, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{TopologyError, TopologyResult};

/// A point on the hash ring owned by a physical node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNode {
    /// Ring position, derived from `"<nodeId>:<vnodeIndex>"`
    pub hash: u64,
    /// Owning physical node
    pub node_id: NodeId,
    /// Index of this vnode within its owner
    pub vnode_index: u32,
}

/// Per-node record held by the ring.
#[derive(Debug, Clone)]
struct PhysicalNode {
    /// Dial address, carried for lookup results
    address: String,
    /// Ring weight; scales the vnode count
    weight: f64,
    /// Vnodes currently generated for this node
    vnode_count: u32,
    /// Latest reported load
    load: LoadInfo,
    /// Whether lookups may return this node
    active: bool,
}

/// Internal state of the ring, guarded by one reader/writer lock.
struct RingState {
    /// Virtual nodes sorted by `(hash, node_id, vnode_index)`
    vnodes: Vec<VirtualNode>,
    /// Physical nodes by id
    nodes: HashMap<NodeId, PhysicalNode>,
    /// Sum of node weights
    total_weight: f64,
}

impl RingState {
    /// Regenerate and splice in the vnodes for one node, keeping the ring
    /// sorted. Deterministic from `(node_id, weight)`.
    fn regenerate_vnodes(&mut self, node_id: &str, base_count: u32, weight: f64) -> u32 {
        self.vnodes.retain(|v| v.node_id != node_id);

        let count = ((f64::from(base_count) * weight).floor() as u32).max(1);
        for index in 0..count {
            self.vnodes.push(VirtualNode {
                hash: hash::vnode_hash(node_id, index),
                node_id: node_id.to_string(),
                vnode_index: index,
            });
        }
        self.vnodes
            .sort_by(|a, b| (a.hash, &a.node_id, a.vnode_index).cmp(&(b.hash, &b.node_id, b.vnode_index)));
        count
    }

    /// Index of the first vnode at or clockwise of `key_hash`.
    fn start_index(&self, key_hash: u64) -> usize {
        let idx = self.vnodes.partition_point(|v| v.hash < key_hash);
        if idx >= self.vnodes.len() {
            0
        } else {
            idx
        }
    }
}

/// Consistent-hash ring mapping keys to ordered replica lists.
///
/// Mutations take the write lock; lookups binary-search under the read
/// lock. The mapping is deterministic from the set of
/// `(node_id, weight)` pairs, so the order nodes were added in does not
/// matter.
pub struct HashRing {
    /// Vnodes per node at weight 1.0
    base_vnodes: u32,
    /// Deviation threshold for the imbalance report
    load_threshold: f64,
    /// Guarded ring state
    state: Arc<RwLock<RingState>>,
}

impl HashRing {
    /// Create an empty ring.
    #[must_use]
    pub fn new(base_vnodes: u32, load_threshold: f64) -> Self {
        debug!(base_vnodes, load_threshold, "Creating hash ring");
        Self {
            base_vnodes,
            load_threshold,
            state: Arc::new(RwLock::new(RingState {
                vnodes: Vec::new(),
                nodes: HashMap::new(),
                total_weight: 0.0,
            })),
        }
    }

    /// Add a physical node with the given ring weight.
    ///
    /// # Errors
    ///
    /// Returns a Conflict error if the node is already on the ring, or a
    /// Configuration error for a non-positive weight.
    pub async fn add_node(&self, node_id: &str, address: &str, weight: f64) -> TopologyResult<()> {
        if weight <= 0.0 || !weight.is_finite() {
            return Err(TopologyError::Config(format!(
                "node {node_id}: ring weight must be positive, got {weight}"
            )));
        }

        let mut state = self.state.write().await;
        if state.nodes.contains_key(node_id) {
            return Err(TopologyError::NodeAlreadyExists(node_id.to_string()));
        }

        let count = state.regenerate_vnodes(node_id, self.base_vnodes, weight);
        state.nodes.insert(
            node_id.to_string(),
            PhysicalNode {
                address: address.to_string(),
                weight,
                vnode_count: count,
                load: LoadInfo::default(),
                active: true,
            },
        );
        state.total_weight += weight;

        info!(
            node_id,
            weight,
            vnodes = count,
            ring_size = state.vnodes.len(),
            "Added node to hash ring"
        );
        Ok(())
    }

    /// Remove a node and all its vnodes.
    pub async fn remove_node(&self, node_id: &str) -> TopologyResult<()> {
        let mut state = self.state.write().await;
        let Some(node) = state.nodes.remove(node_id) else {
            return Err(TopologyError::NodeNotFound(node_id.to_string()));
        };
        state.vnodes.retain(|v| v.node_id != node_id);
        state.total_weight -= node.weight;

        info!(node_id, ring_size = state.vnodes.len(), "Removed node from hash ring");
        Ok(())
    }

    /// Change a node's weight, regenerating its vnodes deterministically.
    /// Other nodes' vnodes are untouched.
    pub async fn update_weight(&self, node_id: &str, weight: f64) -> TopologyResult<()> {
        if weight <= 0.0 || !weight.is_finite() {
            return Err(TopologyError::Config(format!(
                "node {node_id}: ring weight must be positive, got {weight}"
            )));
        }

        let mut state = self.state.write().await;
        let old_weight = match state.nodes.get(node_id) {
            Some(node) => node.weight,
            None => return Err(TopologyError::NodeNotFound(node_id.to_string())),
        };

        let count = state.regenerate_vnodes(node_id, self.base_vnodes, weight);
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.weight = weight;
            node.vnode_count = count;
        }
        state.total_weight += weight - old_weight;

        info!(node_id, old_weight, new_weight = weight, vnodes = count, "Updated ring weight");
        Ok(())
    }

    /// Record a node's latest load. O(1); does not touch ring topology.
    pub async fn update_load(&self, node_id: &str, load: LoadInfo) -> TopologyResult<()> {
        let mut state = self.state.write().await;
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                node.load = load;
                Ok(())
            }
            None => Err(TopologyError::NodeNotFound(node_id.to_string())),
        }
    }

    /// Mark a node routable or not. Inactive nodes are skipped by lookups
    /// but keep their ring positions, so reactivation moves no keys.
    pub async fn set_node_active(&self, node_id: &str, active: bool) -> TopologyResult<()> {
        let mut state = self.state.write().await;
        match state.nodes.get_mut(node_id) {
            Some(node) => {
                if node.active != active {
                    debug!(node_id, active, "Ring node activation changed");
                    node.active = active;
                }
                Ok(())
            }
            None => Err(TopologyError::NodeNotFound(node_id.to_string())),
        }
    }

    /// Map a key to its owning node.
    pub async fn lookup(&self, key: &[u8]) -> TopologyResult<NodeId> {
        let nodes = self.lookup_n(key, 1).await?;
        nodes.into_iter().next().ok_or(TopologyError::EmptyRing)
    }

    /// Map a key to up to `n` distinct active nodes, walking clockwise from
    /// the key's ring position.
    pub async fn lookup_n(&self, key: &[u8], n: usize) -> TopologyResult<Vec<NodeId>> {
        let state = self.state.read().await;
        if state.vnodes.is_empty() {
            return Err(TopologyError::EmptyRing);
        }
        if n == 0 {
            return Ok(Vec::new());
        }

        let start = state.start_index(hash::hash_bytes(key));
        let mut result: Vec<NodeId> = Vec::with_capacity(n);

        for offset in 0..state.vnodes.len() {
            let vnode = &state.vnodes[(start + offset) % state.vnodes.len()];
            if result.iter().any(|id| id == &vnode.node_id) {
                continue;
            }
            let active = state.nodes.get(&vnode.node_id).is_some_and(|p| p.active);
            if !active {
                continue;
            }
            result.push(vnode.node_id.clone());
            if result.len() == n {
                break;
            }
        }

        if result.is_empty() {
            warn!(requested = n, "No active nodes on the ring");
            return Err(TopologyError::EmptyRing);
        }
        Ok(result)
    }

    /// Dial address of a node on the ring.
    pub async fn node_address(&self, node_id: &str) -> TopologyResult<String> {
        let state = self.state.read().await;
        state
            .nodes
            .get(node_id)
            .map(|n| n.address.clone())
            .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))
    }

    /// Current ring weight of a node.
    pub async fn node_weight(&self, node_id: &str) -> TopologyResult<f64> {
        let state = self.state.read().await;
        state
            .nodes
            .get(node_id)
            .map(|n| n.weight)
            .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))
    }

    /// QPS deviation `(qps - avg) / avg` per node, filtered to nodes whose
    /// absolute deviation exceeds the configured threshold.
    pub async fn load_imbalance(&self) -> HashMap<NodeId, f64> {
        let state = self.state.read().await;
        if state.nodes.is_empty() {
            return HashMap::new();
        }

        let avg = state.nodes.values().map(|n| n.load.qps).sum::<f64>() / state.nodes.len() as f64;
        if avg <= 0.0 {
            return HashMap::new();
        }

        state
            .nodes
            .iter()
            .filter_map(|(id, node)| {
                let deviation = (node.load.qps - avg) / avg;
                (deviation.abs() > self.load_threshold).then(|| (id.clone(), deviation))
            })
            .collect()
    }

    /// Ring-level statistics.
    pub async fn stats(&self) -> RingStats {
        let state = self.state.read().await;
        RingStats {
            total_nodes: state.nodes.len(),
            total_virtual_nodes: state.vnodes.len(),
            total_weight: state.total_weight,
            active_nodes: state.nodes.values().filter(|n| n.active).count(),
        }
    }

    /// Node ids currently on the ring.
    pub async fn node_ids(&self) -> Vec<NodeId> {
        let state = self.state.read().await;
        state.nodes.keys().cloned().collect()
    }
}

/// Statistics about ring composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingStats {
    /// Physical nodes on the ring
    pub total_nodes: usize,
    /// Virtual nodes on the ring
    pub total_virtual_nodes: usize,
    /// Sum of node weights
    pub total_weight: f64,
    /// Physical nodes currently routable
    pub active_nodes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn three_node_ring(vnodes: u32) -> HashRing {
        let ring = HashRing::new(vnodes, 0.2);
        ring.add_node("node1", "10.0.0.1:7700", 1.0).await.unwrap();
        ring.add_node("node2", "10.0.0.2:7700", 1.0).await.unwrap();
        ring.add_node("node3", "10.0.0.3:7700", 1.0).await.unwrap();
        ring
    }

    #[tokio::test]
    async fn test_add_remove_nodes() {
        let ring = three_node_ring(150).await;

        assert!(matches!(
            ring.add_node("node1", "10.0.0.1:7700", 1.0).await,
            Err(TopologyError::NodeAlreadyExists(_))
        ));

        ring.remove_node("node2").await.unwrap();
        assert!(matches!(
            ring.remove_node("node2").await,
            Err(TopologyError::NodeNotFound(_))
        ));

        let stats = ring.stats().await;
        assert_eq!(stats.total_nodes, 2);
        assert_eq!(stats.total_virtual_nodes, 300);
    }

    #[tokio::test]
    async fn test_rejects_bad_weight() {
        let ring = HashRing::new(150, 0.2);
        assert!(ring.add_node("node1", "a:1", 0.0).await.is_err());
        assert!(ring.add_node("node1", "a:1", -1.0).await.is_err());
        assert!(ring.add_node("node1", "a:1", f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_is_deterministic() {
        let ring = three_node_ring(150).await;
        let first = ring.lookup(b"some-key").await.unwrap();
        for _ in 0..10 {
            assert_eq!(ring.lookup(b"some-key").await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn test_add_order_does_not_matter() {
        let a = HashRing::new(150, 0.2);
        a.add_node("node1", "a:1", 1.0).await.unwrap();
        a.add_node("node2", "a:2", 1.0).await.unwrap();
        a.add_node("node3", "a:3", 1.0).await.unwrap();

        let b = HashRing::new(150, 0.2);
        b.add_node("node3", "a:3", 1.0).await.unwrap();
        b.add_node("node1", "a:1", 1.0).await.unwrap();
        b.add_node("node2", "a:2", 1.0).await.unwrap();

        for i in 0..200 {
            let key = format!("key-{i}");
            assert_eq!(
                a.lookup(key.as_bytes()).await.unwrap(),
                b.lookup(key.as_bytes()).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_remove_then_add_restores_mapping() {
        let ring = three_node_ring(150).await;
        let mut before = Vec::new();
        for i in 0..100 {
            before.push(ring.lookup(format!("key-{i}").as_bytes()).await.unwrap());
        }

        ring.remove_node("node2").await.unwrap();
        ring.add_node("node2", "10.0.0.2:7700", 1.0).await.unwrap();

        for (i, expected) in before.iter().enumerate() {
            let got = ring.lookup(format!("key-{i}").as_bytes()).await.unwrap();
            assert_eq!(&got, expected);
        }
    }

    #[tokio::test]
    async fn test_three_node_distribution() {
        // 3 nodes at weight 1.0 with 200 vnodes each: 600 ring entries, and
        // 10k keys spread within ±10% of the even share.
        let ring = HashRing::new(200, 0.2);
        ring.add_node("node1", "10.0.0.1:7700", 1.0).await.unwrap();
        ring.add_node("node2", "10.0.0.2:7700", 1.0).await.unwrap();
        ring.add_node("node3", "10.0.0.3:7700", 1.0).await.unwrap();

        let stats = ring.stats().await;
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_virtual_nodes, 600);

        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for i in 0..10_000 {
            let owner = ring.lookup(format!("key-{i}").as_bytes()).await.unwrap();
            *counts.entry(owner).or_default() += 1;
        }
        for (node, count) in &counts {
            assert!(
                (3000..=3666).contains(count),
                "{node} owns {count} keys, outside [3000, 3666]"
            );
        }
    }

    #[tokio::test]
    async fn test_movement_minimality_on_add() {
        let ring = three_node_ring(200).await;
        let mut before = Vec::new();
        for i in 0..10_000 {
            before.push(ring.lookup(format!("key-{i}").as_bytes()).await.unwrap());
        }

        ring.add_node("node4", "10.0.0.4:7700", 1.0).await.unwrap();

        let mut moved = 0usize;
        for (i, owner) in before.iter().enumerate() {
            if &ring.lookup(format!("key-{i}").as_bytes()).await.unwrap() != owner {
                moved += 1;
            }
        }
        // At most 1/(n+1) of keys, with 10% slack.
        assert!(moved as f64 <= 10_000.0 / 4.0 * 1.1, "{moved} keys moved");
    }

    #[tokio::test]
    async fn test_lookup_n_distinct_and_active_only() {
        let ring = three_node_ring(150).await;
        let nodes = ring.lookup_n(b"some-key", 3).await.unwrap();
        assert_eq!(nodes.len(), 3);
        let unique: std::collections::HashSet<_> = nodes.iter().collect();
        assert_eq!(unique.len(), 3);

        // Asking for more than the cluster holds returns what exists.
        let nodes = ring.lookup_n(b"some-key", 10).await.unwrap();
        assert_eq!(nodes.len(), 3);

        // Deactivated nodes disappear from results.
        ring.set_node_active("node1", false).await.unwrap();
        let nodes = ring.lookup_n(b"some-key", 3).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(!nodes.contains(&"node1".to_string()));
    }

    #[tokio::test]
    async fn test_weight_scales_ownership() {
        let ring = HashRing::new(200, 0.2);
        ring.add_node("node1", "a:1", 0.5).await.unwrap();
        ring.add_node("node2", "a:2", 1.0).await.unwrap();
        ring.add_node("node3", "a:3", 1.0).await.unwrap();

        let stats = ring.stats().await;
        assert_eq!(stats.total_virtual_nodes, 100 + 200 + 200);
        assert!((stats.total_weight - 2.5).abs() < 1e-9);

        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for i in 0..10_000 {
            let owner = ring.lookup(format!("key-{i}").as_bytes()).await.unwrap();
            *counts.entry(owner).or_default() += 1;
        }
        let light = counts.get("node1").copied().unwrap_or(0);
        assert!(light < 3000, "half-weight node owns {light} keys");
        assert!(counts.get("node2").copied().unwrap_or(0) > light);
        assert!(counts.get("node3").copied().unwrap_or(0) > light);
    }

    #[tokio::test]
    async fn test_update_weight_only_touches_that_node() {
        let ring = three_node_ring(200).await;
        ring.update_weight("node1", 0.5).await.unwrap();
        let stats = ring.stats().await;
        assert_eq!(stats.total_virtual_nodes, 100 + 200 + 200);

        // Regenerating back to 1.0 restores the original mapping.
        let ring2 = three_node_ring(200).await;
        ring.update_weight("node1", 1.0).await.unwrap();
        for i in 0..200 {
            let key = format!("key-{i}");
            assert_eq!(
                ring.lookup(key.as_bytes()).await.unwrap(),
                ring2.lookup(key.as_bytes()).await.unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_load_imbalance_report() {
        let ring = three_node_ring(150).await;
        let load = |qps: f64| LoadInfo { qps, ..LoadInfo::default() };
        ring.update_load("node1", load(800.0)).await.unwrap();
        ring.update_load("node2", load(200.0)).await.unwrap();
        ring.update_load("node3", load(300.0)).await.unwrap();

        let report = ring.load_imbalance().await;
        // avg ≈ 433; node1 +84%, node2 -54%, node3 -31%: all beyond 20%.
        assert!(report["node1"] > 0.0);
        assert!(report["node2"] < 0.0);
        assert!(report["node3"] < 0.0);

        // Balanced loads produce an empty report.
        for node in ["node1", "node2", "node3"] {
            ring.update_load(node, load(400.0)).await.unwrap();
        }
        assert!(ring.load_imbalance().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_ring_lookup() {
        let ring = HashRing::new(150, 0.2);
        assert!(matches!(ring.lookup(b"key").await, Err(TopologyError::EmptyRing)));
    }
}
