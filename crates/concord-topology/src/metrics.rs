//! Service metrics for monitoring and the stats endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for the topology service, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct TopologyMetrics {
    /// Health check rounds completed
    health_rounds: AtomicU64,
    /// Snapshots captured into history
    snapshots_captured: AtomicU64,
    /// Nodes registered over the service lifetime
    nodes_joined: AtomicU64,
    /// Nodes removed over the service lifetime
    nodes_left: AtomicU64,
    /// Rebalance checks that required action
    rebalances_triggered: AtomicU64,
    /// Service start time (Unix millis)
    start_time_ms: AtomicU64,
}

impl TopologyMetrics {
    /// Create a zeroed metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record service start.
    pub fn record_start(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.start_time_ms.store(now, Ordering::Relaxed);
    }

    /// Record one completed health round.
    pub fn record_health_round(&self) {
        self.health_rounds.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one captured snapshot.
    pub fn record_snapshot(&self) {
        self.snapshots_captured.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node registration.
    pub fn record_node_join(&self) {
        self.nodes_joined.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a node removal.
    pub fn record_node_leave(&self) {
        self.nodes_left.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rebalance that produced a plan.
    pub fn record_rebalance(&self) {
        self.rebalances_triggered.fetch_add(1, Ordering::Relaxed);
    }

    /// Materialize the counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let start = self.start_time_ms.load(Ordering::Relaxed);
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        MetricsSnapshot {
            health_rounds: self.health_rounds.load(Ordering::Relaxed),
            snapshots_captured: self.snapshots_captured.load(Ordering::Relaxed),
            nodes_joined: self.nodes_joined.load(Ordering::Relaxed),
            nodes_left: self.nodes_left.load(Ordering::Relaxed),
            rebalances_triggered: self.rebalances_triggered.load(Ordering::Relaxed),
            uptime_secs: if start == 0 { 0 } else { now.saturating_sub(start) / 1000 },
        }
    }
}

/// Point-in-time view of the service counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Health check rounds completed
    pub health_rounds: u64,
    /// Snapshots captured into history
    pub snapshots_captured: u64,
    /// Nodes registered over the service lifetime
    pub nodes_joined: u64,
    /// Nodes removed over the service lifetime
    pub nodes_left: u64,
    /// Rebalance checks that produced a plan
    pub rebalances_triggered: u64,
    /// Seconds since service start
    pub uptime_secs: u64,
}
