//! Pluggable load balancing over routing candidates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use concord_core::{hash, NodeId};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A selectable node with the stats selection policies care about.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Node id
    pub node_id: NodeId,
    /// Ring weight
    pub weight: f64,
    /// Open connections, from the latest load report
    pub active_connections: u64,
    /// Average latency in milliseconds, from the latest load report
    pub avg_latency_ms: f64,
}

/// Load balancer interface: pick a node, absorb call outcomes.
pub trait LoadBalancer: Send + Sync {
    /// Pick one of the candidates for `key`. `None` iff `candidates` is
    /// empty.
    fn select(&self, candidates: &[Candidate], key: &[u8]) -> Option<NodeId>;

    /// Feed back an observed call outcome. Most policies ignore it.
    fn update_stats(&self, _node_id: &str, _latency_ms: f64, _ok: bool) {}
}

/// Which balancer the router uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalancerKind {
    /// Rotate through candidates
    #[default]
    RoundRobin,
    /// Smooth weighted round-robin over ring weights
    WeightedRoundRobin,
    /// Fewest active connections wins
    LeastConnections,
    /// Uniform random choice
    Random,
    /// Key-affine choice via the pinned hash
    ConsistentHash,
}

/// Build the balancer for a configured kind.
#[must_use]
pub fn build_balancer(kind: BalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        BalancerKind::RoundRobin => Arc::new(RoundRobin::new()),
        BalancerKind::WeightedRoundRobin => Arc::new(WeightedRoundRobin::new()),
        BalancerKind::LeastConnections => Arc::new(LeastConnections),
        BalancerKind::Random => Arc::new(Random),
        BalancerKind::ConsistentHash => Arc::new(ConsistentHash),
    }
}

/// Rotates through candidates with a shared counter.
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    /// New balancer starting at the first candidate.
    #[must_use]
    pub fn new() -> Self {
        Self { counter: AtomicUsize::new(0) }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, candidates: &[Candidate], _key: &[u8]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx].node_id.clone())
    }
}

/// Smooth weighted round-robin: each pick raises every candidate's
/// current weight by its configured weight, takes the max, and lowers the
/// winner by the total. Produces the classic smooth interleaving.
pub struct WeightedRoundRobin {
    current: Mutex<HashMap<NodeId, f64>>,
}

impl WeightedRoundRobin {
    /// New balancer with empty running weights.
    #[must_use]
    pub fn new() -> Self {
        Self { current: Mutex::new(HashMap::new()) }
    }
}

impl Default for WeightedRoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn select(&self, candidates: &[Candidate], _key: &[u8]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let Ok(mut current) = self.current.lock() else { return None };

        let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
        let mut best: Option<(&Candidate, f64)> = None;
        for candidate in candidates {
            let entry = current.entry(candidate.node_id.clone()).or_insert(0.0);
            *entry += candidate.weight.max(0.0);
            let value = *entry;
            match best {
                Some((_, best_value)) if value <= best_value => {}
                _ => best = Some((candidate, value)),
            }
        }

        let (winner, _) = best?;
        if let Some(entry) = current.get_mut(&winner.node_id) {
            *entry -= total;
        }
        Some(winner.node_id.clone())
    }
}

/// Picks the candidate with the fewest active connections; node id breaks
/// ties deterministically.
pub struct LeastConnections;

impl LoadBalancer for LeastConnections {
    fn select(&self, candidates: &[Candidate], _key: &[u8]) -> Option<NodeId> {
        candidates
            .iter()
            .min_by(|a, b| {
                a.active_connections
                    .cmp(&b.active_connections)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
            .map(|c| c.node_id.clone())
    }
}

/// Uniform random choice.
pub struct Random;

impl LoadBalancer for Random {
    fn select(&self, candidates: &[Candidate], _key: &[u8]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].node_id.clone())
    }
}

/// Key-affine choice: hash the key and each candidate with the pinned
/// algorithm and walk clockwise on the implied mini-ring. Deterministic
/// for a fixed candidate set.
pub struct ConsistentHash;

impl LoadBalancer for ConsistentHash {
    fn select(&self, candidates: &[Candidate], key: &[u8]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let key_hash = hash::hash_bytes(key);
        let mut points: Vec<(u64, &NodeId)> =
            candidates.iter().map(|c| (hash::hash_key(&c.node_id), &c.node_id)).collect();
        points.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        let chosen = points
            .iter()
            .find(|(point, _)| *point >= key_hash)
            .or_else(|| points.first())
            .map(|(_, id)| (*id).clone());
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(ids: &[&str]) -> Vec<Candidate> {
        ids.iter()
            .map(|id| Candidate {
                node_id: (*id).to_string(),
                weight: 1.0,
                active_connections: 0,
                avg_latency_ms: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_round_robin_rotates() {
        let balancer = RoundRobin::new();
        let set = candidates(&["n1", "n2", "n3"]);
        let picks: Vec<NodeId> =
            (0..6).filter_map(|_| balancer.select(&set, b"k")).collect();
        assert_eq!(picks, vec!["n1", "n2", "n3", "n1", "n2", "n3"]);
    }

    #[test]
    fn test_empty_candidates() {
        let set: Vec<Candidate> = Vec::new();
        assert!(RoundRobin::new().select(&set, b"k").is_none());
        assert!(Random.select(&set, b"k").is_none());
        assert!(ConsistentHash.select(&set, b"k").is_none());
        assert!(LeastConnections.select(&set, b"k").is_none());
        assert!(WeightedRoundRobin::new().select(&set, b"k").is_none());
    }

    #[test]
    fn test_weighted_round_robin_respects_weights() {
        let balancer = WeightedRoundRobin::new();
        let mut set = candidates(&["n1", "n2"]);
        set[0].weight = 3.0;
        set[1].weight = 1.0;

        let mut counts: HashMap<NodeId, usize> = HashMap::new();
        for _ in 0..40 {
            let pick = balancer.select(&set, b"k").unwrap();
            *counts.entry(pick).or_default() += 1;
        }
        assert_eq!(counts["n1"], 30);
        assert_eq!(counts["n2"], 10);
    }

    #[test]
    fn test_least_connections_prefers_idle() {
        let mut set = candidates(&["n1", "n2", "n3"]);
        set[0].active_connections = 5;
        set[1].active_connections = 1;
        set[2].active_connections = 9;
        assert_eq!(LeastConnections.select(&set, b"k").unwrap(), "n2");

        // Ties break by node id.
        set[0].active_connections = 1;
        assert_eq!(LeastConnections.select(&set, b"k").unwrap(), "n1");
    }

    #[test]
    fn test_consistent_hash_is_sticky() {
        let set = candidates(&["n1", "n2", "n3"]);
        let first = ConsistentHash.select(&set, b"user:42").unwrap();
        for _ in 0..10 {
            assert_eq!(ConsistentHash.select(&set, b"user:42").unwrap(), first);
        }
        // A different key may land elsewhere, but stays deterministic too.
        let other = ConsistentHash.select(&set, b"user:43").unwrap();
        assert_eq!(ConsistentHash.select(&set, b"user:43").unwrap(), other);
    }

    #[test]
    fn test_random_stays_within_set() {
        let set = candidates(&["n1", "n2"]);
        for _ in 0..20 {
            let pick = Random.select(&set, b"k").unwrap();
            assert!(pick == "n1" || pick == "n2");
        }
    }
}
