//! Topology service configuration and builder.

use std::time::Duration;

use concord_core::hash::HASH_ALGORITHM;
use serde::{Deserialize, Serialize};

use crate::error::{TopologyError, TopologyResult};

/// Configuration for the topology service and its subsystems.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TopologyConfig {
    /// Hash ring configuration
    pub ring: RingConfig,

    /// Health checking configuration
    pub health: HealthConfig,

    /// Snapshot caching configuration
    pub snapshot: SnapshotConfig,

    /// Event fanout configuration
    pub fanout: FanoutConfig,

    /// Rebalancer configuration
    pub rebalancer: RebalancerConfig,

    /// Migrator configuration
    pub migrator: MigratorConfig,
}

/// Hash ring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RingConfig {
    /// Virtual nodes generated per physical node at weight 1.0
    pub virtual_nodes_per_node: u32,

    /// Load deviation above which a node shows up in the imbalance report
    pub load_balance_threshold: f64,

    /// Ring hash algorithm; pinned, only "sha256" is accepted
    pub hash_algorithm: String,

    /// Replica count per shard, primary included
    pub replication_factor: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            virtual_nodes_per_node: 150,
            load_balance_threshold: 0.2,
            hash_algorithm: HASH_ALGORITHM.to_string(),
            replication_factor: 3,
        }
    }
}

/// Health checking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthConfig {
    /// Interval between health check rounds
    pub check_interval: Duration,

    /// Per-probe timeout
    pub check_timeout: Duration,

    /// Consecutive failures before a node is marked Unhealthy
    pub failure_threshold: u32,

    /// Consecutive successes before an unhealthy node recovers a step
    pub recovery_threshold: u32,

    /// Time spent Unhealthy before a node is marked Unavailable
    pub unavailable_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15),
            check_timeout: Duration::from_secs(3),
            failure_threshold: 3,
            recovery_threshold: 2,
            unavailable_after: Duration::from_secs(120),
        }
    }
}

/// Snapshot caching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotConfig {
    /// How long a cached snapshot stays fresh
    pub interval: Duration,

    /// Number of recent snapshots retained for diff replay
    pub history: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), history: 10 }
    }
}

/// Event fanout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FanoutConfig {
    /// Buffered events per subscriber before it is dropped
    pub subscriber_buffer: usize,

    /// Maximum concurrent subscribers
    pub max_subscribers: usize,

    /// Events retained for replay to late subscribers
    pub max_event_history: usize,

    /// Interval between heartbeat sentinels
    pub heartbeat_interval: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 100,
            max_subscribers: 100,
            max_event_history: 1000,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Rebalancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RebalancerConfig {
    /// Interval between imbalance checks
    pub check_interval: Duration,

    /// `(max - min) / avg` load ratio above which rebalance is required
    pub load_imbalance_threshold: f64,

    /// Minimum time between rebalances
    pub min_rebalance_interval: Duration,

    /// Log plans without executing them
    pub dry_run: bool,

    /// Cap on migrations submitted per plan
    pub max_concurrent_migrations: usize,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            load_imbalance_threshold: 0.2,
            min_rebalance_interval: Duration::from_secs(300),
            dry_run: false,
            max_concurrent_migrations: 2,
        }
    }
}

/// Migrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MigratorConfig {
    /// Maximum entries per batch
    pub batch_size: usize,

    /// Maximum bytes per batch; whichever limit hits first closes the batch
    pub batch_memory_limit: usize,

    /// Worker pool size
    pub concurrent_migrations: usize,

    /// Retries per failed batch
    pub retry_attempts: u32,

    /// Fixed delay between batch retries
    pub retry_delay: Duration,

    /// Pending task queue capacity
    pub queue_capacity: usize,

    /// Interval between progress log lines
    pub progress_report_interval: Duration,

    /// Verify a SHA-256 checksum per batch
    pub enable_checksum: bool,

    /// Delete transferred keys from the target when a task fails
    pub enable_rollback: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_memory_limit: 64 * 1024 * 1024,
            concurrent_migrations: 2,
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            queue_capacity: 64,
            progress_report_interval: Duration::from_secs(5),
            enable_checksum: false,
            enable_rollback: false,
        }
    }
}

impl TopologyConfig {
    /// Create a new builder for topology configuration.
    #[must_use]
    pub fn builder() -> TopologyConfigBuilder {
        TopologyConfigBuilder::default()
    }

    /// Validate the configuration. Bad values are fatal at startup.
    pub fn validate(&self) -> TopologyResult<()> {
        if self.ring.virtual_nodes_per_node == 0 {
            return Err(TopologyError::Config(
                "virtual_nodes_per_node must be greater than 0".into(),
            ));
        }
        if self.ring.hash_algorithm != HASH_ALGORITHM {
            return Err(TopologyError::Config(format!(
                "hash_algorithm is pinned to \"{HASH_ALGORITHM}\", got \"{}\"",
                self.ring.hash_algorithm
            )));
        }
        if self.ring.replication_factor == 0 {
            return Err(TopologyError::Config("replication_factor must be greater than 0".into()));
        }
        if self.ring.load_balance_threshold <= 0.0 {
            return Err(TopologyError::Config("load_balance_threshold must be positive".into()));
        }
        if self.health.failure_threshold == 0 || self.health.recovery_threshold == 0 {
            return Err(TopologyError::Config(
                "health thresholds must be greater than 0".into(),
            ));
        }
        if self.health.check_timeout >= self.health.check_interval {
            return Err(TopologyError::Config(
                "health check timeout must be shorter than the check interval".into(),
            ));
        }
        if self.snapshot.history == 0 {
            return Err(TopologyError::Config("snapshot history must be greater than 0".into()));
        }
        if self.fanout.subscriber_buffer == 0 || self.fanout.max_subscribers == 0 {
            return Err(TopologyError::Config(
                "fanout buffer and subscriber limits must be greater than 0".into(),
            ));
        }
        if self.rebalancer.load_imbalance_threshold <= 0.0 {
            return Err(TopologyError::Config(
                "load_imbalance_threshold must be positive".into(),
            ));
        }
        if self.migrator.batch_size == 0 || self.migrator.batch_memory_limit == 0 {
            return Err(TopologyError::Config("migrator batch limits must be positive".into()));
        }
        if self.migrator.concurrent_migrations == 0 {
            return Err(TopologyError::Config(
                "concurrent_migrations must be greater than 0".into(),
            ));
        }
        if self.migrator.queue_capacity == 0 {
            return Err(TopologyError::Config("queue_capacity must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Builder for topology configuration.
#[derive(Debug, Default)]
pub struct TopologyConfigBuilder {
    config: TopologyConfig,
}

impl TopologyConfigBuilder {
    /// Set the virtual node count per physical node.
    #[must_use]
    pub fn virtual_nodes_per_node(mut self, count: u32) -> Self {
        self.config.ring.virtual_nodes_per_node = count;
        self
    }

    /// Set the replication factor.
    #[must_use]
    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.ring.replication_factor = factor;
        self
    }

    /// Set the health check cadence.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health.check_interval = interval;
        self
    }

    /// Set the health failure/recovery thresholds.
    #[must_use]
    pub fn health_thresholds(mut self, failures: u32, recoveries: u32) -> Self {
        self.config.health.failure_threshold = failures;
        self.config.health.recovery_threshold = recoveries;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.fanout.heartbeat_interval = interval;
        self
    }

    /// Replace the rebalancer configuration.
    #[must_use]
    pub fn rebalancer(mut self, rebalancer: RebalancerConfig) -> Self {
        self.config.rebalancer = rebalancer;
        self
    }

    /// Replace the migrator configuration.
    #[must_use]
    pub fn migrator(mut self, migrator: MigratorConfig) -> Self {
        self.config.migrator = migrator;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns a Configuration error if any value is invalid.
    pub fn build(self) -> TopologyResult<TopologyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TopologyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring.virtual_nodes_per_node, 150);
        assert_eq!(config.migrator.batch_size, 1000);
    }

    #[test]
    fn test_builder() {
        let config = TopologyConfig::builder()
            .virtual_nodes_per_node(200)
            .replication_factor(3)
            .health_thresholds(3, 2)
            .build()
            .unwrap();
        assert_eq!(config.ring.virtual_nodes_per_node, 200);
    }

    #[test]
    fn test_rejects_foreign_hash_algorithm() {
        let mut config = TopologyConfig::default();
        config.ring.hash_algorithm = "murmur3".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_thresholds() {
        let mut config = TopologyConfig::default();
        config.health.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let json = r#"{"ring": {"virtualNodesPerNode": 10}}"#;
        // Config files use snake_case field names; unknown keys are errors.
        assert!(serde_json::from_str::<TopologyConfig>(json).is_err());

        let json = r#"{"ring": {"virtual_nodes_per_node": 10}}"#;
        let config: TopologyConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ring.virtual_nodes_per_node, 10);
    }
}
