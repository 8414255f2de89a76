//! Topology error types and result definitions.

use std::time::Duration;

use concord_core::ErrorKind;
use thiserror::Error;
use uuid::Uuid;

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// Topology-specific errors.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node not found
    #[error("Node {0} not found in cluster")]
    NodeNotFound(String),

    /// Shard not found
    #[error("Shard {0} not found")]
    ShardNotFound(String),

    /// Migration task not found
    #[error("Migration task {0} not found")]
    TaskNotFound(Uuid),

    /// Node already exists
    #[error("Node {0} already exists in cluster")]
    NodeAlreadyExists(String),

    /// Shard already exists
    #[error("Shard {0} already exists")]
    ShardAlreadyExists(String),

    /// A live node re-registered under a different address
    #[error("Node {node} is registered at {existing}, refusing re-registration at {proposed}")]
    AddressConflict {
        /// Node attempting to register
        node: String,
        /// Address currently on record
        existing: String,
        /// Address in the new registration
        proposed: String,
    },

    /// Shard update carried a version at or below the current one
    #[error("Shard {shard} version regression: current {current}, proposed {proposed}")]
    VersionRegression {
        /// Shard being updated
        shard: String,
        /// Version on record
        current: i64,
        /// Version in the rejected update
        proposed: i64,
    },

    /// Node removal blocked by shards still placed on it
    #[error("Node {node} still hosts {shard_count} shard(s)")]
    NodeInUse {
        /// Node being removed
        node: String,
        /// Shards still referencing it
        shard_count: usize,
    },

    /// Ring has no nodes
    #[error("Hash ring is empty")]
    EmptyRing,

    /// Subscriber cap reached
    #[error("Subscriber limit of {0} reached")]
    SubscriberLimit(usize),

    /// Migration queue full
    #[error("Migration queue full ({0} tasks)")]
    QueueFull(usize),

    /// A rebalance plan is already executing
    #[error("A rebalance is already in flight")]
    RebalanceInFlight,

    /// Migration task failed submission validation
    #[error("Invalid migration task: {0}")]
    InvalidTask(String),

    /// Task already reached a terminal state
    #[error("Task {id} is already {status}")]
    TaskTerminal {
        /// Task id
        id: Uuid,
        /// Terminal status it holds
        status: String,
    },

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Network or peer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Service is shutting down
    #[error("Topology service is shut down")]
    ShutDown,

    /// Internal error
    #[error("Internal topology error: {0}")]
    Internal(String),
}

impl TopologyError {
    /// Classify into the shared error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::InvalidTask(_) => ErrorKind::Configuration,
            Self::NodeNotFound(_) | Self::ShardNotFound(_) | Self::TaskNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::NodeAlreadyExists(_)
            | Self::ShardAlreadyExists(_)
            | Self::AddressConflict { .. }
            | Self::VersionRegression { .. }
            | Self::NodeInUse { .. }
            | Self::TaskTerminal { .. } => ErrorKind::Conflict,
            Self::EmptyRing | Self::ShutDown => ErrorKind::Unavailable,
            Self::SubscriberLimit(_) | Self::QueueFull(_) | Self::RebalanceInFlight => {
                ErrorKind::Rejected
            }
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<std::io::Error> for TopologyError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for TopologyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<bincode::Error> for TopologyError {
    fn from(err: bincode::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}
