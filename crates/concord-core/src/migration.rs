//! Shard migration tasks and progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keyrange::KeyRange;
use crate::types::{NodeId, ShardId};

/// Lifecycle state of a migration task.
///
/// Transitions are one-way (`Pending → Running → Completed | Failed`)
/// except that a pending task may be cancelled before it ever runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStatus {
    /// Queued, not yet picked up by a worker
    Pending,
    /// A worker is streaming batches
    Running,
    /// All keys transferred
    Completed,
    /// Retries exhausted
    Failed,
    /// Cancelled before or during execution
    Cancelled,
}

impl MigrationStatus {
    /// Whether the task can never change state again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Progress counters for a migration, updated after every batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    /// Keys in the source range at task start
    pub total_keys: u64,
    /// Keys applied at the target so far
    pub processed_keys: u64,
    /// Bytes shipped so far
    pub transferred_bytes: u64,
    /// When the first batch started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the counters last moved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Batch currently in flight (1-based)
    pub current_batch: u64,
    /// Batches expected in total
    pub total_batches: u64,
    /// Batch attempts that failed and were retried
    pub error_count: u64,
}

impl MigrationProgress {
    /// Completion percentage in `[0, 100]`.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total_keys == 0 {
            return 100.0;
        }
        (self.processed_keys as f64 / self.total_keys as f64) * 100.0
    }

    /// Transfer rate in bytes per second since `start_time`.
    #[must_use]
    pub fn rate_bytes_per_sec(&self) -> f64 {
        let Some(start) = self.start_time else { return 0.0 };
        let reference = self.last_update.unwrap_or_else(Utc::now);
        let elapsed = (reference - start).num_milliseconds();
        if elapsed <= 0 {
            return 0.0;
        }
        self.transferred_bytes as f64 * 1000.0 / elapsed as f64
    }

    /// Estimated seconds to completion, if the rate is known.
    #[must_use]
    pub fn eta_secs(&self) -> Option<f64> {
        let rate = self.rate_bytes_per_sec();
        if rate <= 0.0 || self.processed_keys == 0 {
            return None;
        }
        let bytes_per_key = self.transferred_bytes as f64 / self.processed_keys as f64;
        let remaining_keys = self.total_keys.saturating_sub(self.processed_keys) as f64;
        Some(remaining_keys * bytes_per_key / rate)
    }
}

/// A shard move from one node to another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationTask {
    /// Task identifier, assigned at submission
    pub id: Uuid,
    /// Shard being moved
    pub shard_id: ShardId,
    /// Node the data leaves
    pub source_node: NodeId,
    /// Node the data lands on
    pub target_node: NodeId,
    /// Key range to transfer
    pub key_range: KeyRange,
    /// Scheduling priority, higher first
    pub priority: i32,
    /// Submission timestamp
    pub created_at: DateTime<Utc>,
    /// When a worker picked the task up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Lifecycle state
    pub status: MigrationStatus,
    /// Progress counters
    pub progress: MigrationProgress,
    /// Failure message for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationTask {
    /// Build a pending task. The id and `created_at` are stamped at
    /// submission by the migrator.
    #[must_use]
    pub fn new(
        shard_id: impl Into<ShardId>,
        source_node: impl Into<NodeId>,
        target_node: impl Into<NodeId>,
        key_range: KeyRange,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            shard_id: shard_id.into(),
            source_node: source_node.into(),
            target_node: target_node.into(),
            key_range,
            priority: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: MigrationStatus::Pending,
            progress: MigrationProgress::default(),
            error: None,
        }
    }

    /// Validate the submission invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.shard_id.is_empty() {
            return Err("migration task has an empty shard id".into());
        }
        if self.source_node.is_empty() || self.target_node.is_empty() {
            return Err(format!("migration task for {} names an empty node", self.shard_id));
        }
        if self.source_node == self.target_node {
            return Err(format!(
                "migration task for {}: source and target are both {}",
                self.shard_id, self.source_node
            ));
        }
        if self.key_range.is_empty() {
            return Err(format!("migration task for {} has an empty key range", self.shard_id));
        }
        Ok(())
    }
}
