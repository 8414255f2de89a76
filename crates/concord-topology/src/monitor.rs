//! In-process load aggregation across nodes.
//!
//! The monitor keeps exponential moving averages of latency and QPS per
//! node. Window smoothing factors are derived at runtime from
//! `1 - exp(-tick / window)` rather than hard-coded constants, so changing
//! the reporting cadence keeps the windows honest. The monitor aggregates;
//! it never decides rebalancing.

use std::collections::HashMap;
use std::time::Duration;

use concord_core::{LoadInfo, NodeId};
use serde::Serialize;
use tokio::sync::RwLock;

/// Latency EMA smoothing factor applied per sample.
const LATENCY_ALPHA: f64 = 0.1;

/// Aggregated metrics for one node.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    /// Latest raw load report
    pub load: LoadInfo,
    /// EMA of observed request latency in milliseconds
    pub latency_ema_ms: f64,
    /// QPS averaged over a 1-minute window
    pub qps_1m: f64,
    /// QPS averaged over a 5-minute window
    pub qps_5m: f64,
    /// QPS averaged over a 15-minute window
    pub qps_15m: f64,
    /// Requests currently in flight
    pub active_requests: u64,
    /// Latency samples folded into the EMA
    pub samples: u64,
    /// Load reports folded into the windows
    #[serde(skip)]
    load_reports: u64,
}

/// Per-node load aggregator.
pub struct LoadMonitor {
    /// Reporting cadence; sets the window smoothing factors
    tick: Duration,
    entries: RwLock<HashMap<NodeId, NodeMetrics>>,
}

impl LoadMonitor {
    /// Create a monitor expecting load reports every `tick`.
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        Self { tick, entries: RwLock::new(HashMap::new()) }
    }

    /// Smoothing factor for a window of the given length at this cadence.
    #[must_use]
    pub fn window_alpha(&self, window: Duration) -> f64 {
        1.0 - (-self.tick.as_secs_f64() / window.as_secs_f64()).exp()
    }

    /// Fold a node's load report into the windows.
    pub async fn record_load(&self, node_id: &str, load: LoadInfo) {
        let a1 = self.window_alpha(Duration::from_secs(60));
        let a5 = self.window_alpha(Duration::from_secs(300));
        let a15 = self.window_alpha(Duration::from_secs(900));

        let mut entries = self.entries.write().await;
        let entry = entries.entry(node_id.to_string()).or_default();
        if entry.load_reports == 0 {
            entry.qps_1m = load.qps;
            entry.qps_5m = load.qps;
            entry.qps_15m = load.qps;
        } else {
            entry.qps_1m += a1 * (load.qps - entry.qps_1m);
            entry.qps_5m += a5 * (load.qps - entry.qps_5m);
            entry.qps_15m += a15 * (load.qps - entry.qps_15m);
        }
        entry.load_reports += 1;
        entry.load = load;
    }

    /// Fold one request latency sample into the node's EMA.
    pub async fn record_sample(&self, node_id: &str, latency_ms: f64) {
        let mut entries = self.entries.write().await;
        let entry = entries.entry(node_id.to_string()).or_default();
        if entry.samples == 0 {
            entry.latency_ema_ms = latency_ms;
        } else {
            entry.latency_ema_ms += LATENCY_ALPHA * (latency_ms - entry.latency_ema_ms);
        }
        entry.samples += 1;
    }

    /// Note a request starting against a node.
    pub async fn request_started(&self, node_id: &str) {
        let mut entries = self.entries.write().await;
        entries.entry(node_id.to_string()).or_default().active_requests += 1;
    }

    /// Note a request finishing against a node.
    pub async fn request_finished(&self, node_id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(node_id) {
            entry.active_requests = entry.active_requests.saturating_sub(1);
        }
    }

    /// Metrics for one node.
    pub async fn node_metrics(&self, node_id: &str) -> Option<NodeMetrics> {
        self.entries.read().await.get(node_id).cloned()
    }

    /// Metrics for every tracked node.
    pub async fn all_node_metrics(&self) -> HashMap<NodeId, NodeMetrics> {
        self.entries.read().await.clone()
    }

    /// Drop a node's metrics after it leaves the cluster.
    pub async fn remove_node(&self, node_id: &str) {
        self.entries.write().await.remove(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_window_alphas_match_legacy_constants() {
        // The old hand-tuned constants (0.08 / 0.016 / 0.005) came from a
        // 5-second tick; deriving them must land in the same neighborhood.
        let monitor = LoadMonitor::new(Duration::from_secs(5));
        assert!((monitor.window_alpha(Duration::from_secs(60)) - 0.08).abs() < 0.003);
        assert!((monitor.window_alpha(Duration::from_secs(300)) - 0.016).abs() < 0.002);
        assert!((monitor.window_alpha(Duration::from_secs(900)) - 0.005).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_latency_ema() {
        let monitor = LoadMonitor::new(Duration::from_secs(5));
        monitor.record_sample("n1", 10.0).await;
        let first = monitor.node_metrics("n1").await.unwrap().latency_ema_ms;
        assert!((first - 10.0).abs() < f64::EPSILON);

        monitor.record_sample("n1", 20.0).await;
        let second = monitor.node_metrics("n1").await.unwrap().latency_ema_ms;
        // 10 + 0.1 * (20 - 10) = 11
        assert!((second - 11.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_qps_windows_converge_at_different_speeds() {
        let monitor = LoadMonitor::new(Duration::from_secs(5));
        monitor.record_load("n1", LoadInfo { qps: 100.0, ..LoadInfo::default() }).await;
        for _ in 0..20 {
            monitor.record_load("n1", LoadInfo { qps: 200.0, ..LoadInfo::default() }).await;
        }
        let metrics = monitor.node_metrics("n1").await.unwrap();
        // Shorter windows chase the new level faster.
        assert!(metrics.qps_1m > metrics.qps_5m);
        assert!(metrics.qps_5m > metrics.qps_15m);
        assert!(metrics.qps_15m > 100.0);
    }

    #[tokio::test]
    async fn test_active_request_tracking() {
        let monitor = LoadMonitor::new(Duration::from_secs(5));
        monitor.request_started("n1").await;
        monitor.request_started("n1").await;
        monitor.request_finished("n1").await;
        assert_eq!(monitor.node_metrics("n1").await.unwrap().active_requests, 1);
        // Underflow is clamped.
        monitor.request_finished("n1").await;
        monitor.request_finished("n1").await;
        assert_eq!(monitor.node_metrics("n1").await.unwrap().active_requests, 0);
    }
}
