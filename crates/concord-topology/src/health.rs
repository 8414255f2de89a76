//! Node health checking and the per-node health state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use concord_core::{NodeHealth, NodeId};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::error::TopologyResult;
use crate::ring::HashRing;
use crate::store::MetadataStore;

/// A liveness probe against one node.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe the node at `address`. Implementations bound their own I/O;
    /// the checker additionally enforces the configured timeout.
    async fn probe(&self, node_id: &str, address: &str) -> bool;
}

/// Probe that dials the node's TCP address.
pub struct TcpHealthProbe;

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, _node_id: &str, address: &str) -> bool {
        tokio::net::TcpStream::connect(address).await.is_ok()
    }
}

/// Per-node probe bookkeeping.
#[derive(Debug, Default)]
struct ProbeState {
    /// Consecutive failed probes since the last success or transition
    consecutive_failures: u32,
    /// Consecutive successful probes since the last failure or transition
    consecutive_successes: u32,
    /// When the node entered Unhealthy, for the Unavailable promotion
    unhealthy_since: Option<Instant>,
}

/// Drives the node health state machine off probe results.
///
/// ```text
/// Healthy    --fail ≥ failure_threshold-->    Unhealthy
/// Unhealthy  --success ≥ recovery_threshold--> Recovering
/// Recovering --success ≥ recovery_threshold--> Healthy
/// Recovering --fail ≥ failure_threshold-->    Unhealthy
/// Unhealthy  --unhealthy for unavailable_after--> Unavailable
/// Unavailable --success ≥ recovery_threshold--> Recovering
/// ```
///
/// Transitions go through the metadata store (which emits
/// `NodeHealthChange`) and flip the node's active flag on the ring.
pub struct HealthChecker {
    config: HealthConfig,
    probe: Arc<dyn HealthProbe>,
    store: Arc<MetadataStore>,
    ring: Arc<HashRing>,
    states: Mutex<HashMap<NodeId, ProbeState>>,
}

impl HealthChecker {
    /// Create a checker over the given probe.
    #[must_use]
    pub fn new(
        config: HealthConfig,
        probe: Arc<dyn HealthProbe>,
        store: Arc<MetadataStore>,
        ring: Arc<HashRing>,
    ) -> Self {
        Self { config, probe, store, ring, states: Mutex::new(HashMap::new()) }
    }

    /// Probe every registered node once and apply the results.
    pub async fn run_round(&self) {
        let nodes = self.store.nodes().await;

        let probes = nodes.iter().map(|node| {
            let probe = Arc::clone(&self.probe);
            let timeout = self.config.check_timeout;
            async move {
                let outcome =
                    tokio::time::timeout(timeout, probe.probe(&node.id, &node.address)).await;
                matches!(outcome, Ok(true))
            }
        });
        let results = futures_util::future::join_all(probes).await;

        for (node, ok) in nodes.iter().zip(results) {
            if let Err(e) = self.apply(&node.id, node.health, ok).await {
                warn!(node_id = %node.id, error = %e, "Failed to apply health result");
            }
        }

        // Drop bookkeeping for nodes no longer registered.
        let known: std::collections::HashSet<NodeId> =
            nodes.into_iter().map(|n| n.id).collect();
        self.states.lock().await.retain(|id, _| known.contains(id));
    }

    /// Apply one probe result to one node.
    async fn apply(&self, node_id: &str, current: NodeHealth, ok: bool) -> TopologyResult<()> {
        let next = {
            let mut states = self.states.lock().await;
            let state = states.entry(node_id.to_string()).or_default();

            if ok {
                state.consecutive_successes += 1;
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
                state.consecutive_successes = 0;
            }

            let next = self.next_health(current, state);
            if next.is_some() {
                // A transition starts a fresh observation window.
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                state.unhealthy_since =
                    (next == Some(NodeHealth::Unhealthy)).then(Instant::now);
            }
            next
        };

        if ok {
            self.store.touch_node(node_id).await?;
        }

        if let Some(next) = next {
            debug!(node_id, from = %current, to = %next, "Health transition");
            self.store.set_node_health(node_id, next).await?;
            self.ring.set_node_active(node_id, next.is_routable()).await?;
        }
        Ok(())
    }

    /// Decide the next health state, if the thresholds say so.
    fn next_health(&self, current: NodeHealth, state: &ProbeState) -> Option<NodeHealth> {
        match current {
            NodeHealth::Healthy => (state.consecutive_failures
                >= self.config.failure_threshold)
                .then_some(NodeHealth::Unhealthy),
            NodeHealth::Unhealthy => {
                if state.consecutive_successes >= self.config.recovery_threshold {
                    Some(NodeHealth::Recovering)
                } else if state
                    .unhealthy_since
                    .is_some_and(|since| since.elapsed() >= self.config.unavailable_after)
                {
                    Some(NodeHealth::Unavailable)
                } else {
                    None
                }
            }
            NodeHealth::Recovering => {
                if state.consecutive_successes >= self.config.recovery_threshold {
                    Some(NodeHealth::Healthy)
                } else if state.consecutive_failures >= self.config.failure_threshold {
                    Some(NodeHealth::Unhealthy)
                } else {
                    None
                }
            }
            NodeHealth::Unavailable => (state.consecutive_successes
                >= self.config.recovery_threshold)
                .then_some(NodeHealth::Recovering),
        }
    }
}
