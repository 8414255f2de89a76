//! Client error types and result definitions.

use std::time::Duration;

use concord_core::ErrorKind;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client-side routing errors.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No shard covers the key
    #[error("No route for key: {0}")]
    NoRoute(String),

    /// WritePrimary strategy found the primary unusable
    #[error("Primary {0} is unavailable for writes")]
    PrimaryUnavailable(String),

    /// No healthy candidate survived filtering
    #[error("No healthy target for shard {0}")]
    NoHealthyTarget(String),

    /// Circuit breaker rejected the target
    #[error("Circuit breaker open for node {0}")]
    BreakerOpen(String),

    /// Shard rejects this operation in its current state
    #[error("Shard {shard} is {state} and rejects this operation")]
    ShardUnavailable {
        /// Shard the key maps to
        shard: String,
        /// Its current placement state
        state: String,
    },

    /// No topology snapshot available yet
    #[error("No topology snapshot available")]
    NoSnapshot,

    /// Operation exceeded its deadline
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Network or peer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("Internal client error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Classify into the shared error taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::NoRoute(_) => ErrorKind::NotFound,
            Self::PrimaryUnavailable(_)
            | Self::NoHealthyTarget(_)
            | Self::NoSnapshot
            | Self::ShardUnavailable { .. } => ErrorKind::Unavailable,
            Self::BreakerOpen(_) => ErrorKind::Rejected,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(Duration::from_secs(0))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ClientError::NoRoute("k".into()).kind(), ErrorKind::NotFound);
        assert_eq!(ClientError::BreakerOpen("n1".into()).kind(), ErrorKind::Rejected);
        assert_eq!(
            ClientError::PrimaryUnavailable("n1".into()).kind(),
            ErrorKind::Unavailable
        );
        assert!(ClientError::Transport("boom".into()).is_retryable());
        assert!(!ClientError::Config("bad".into()).is_retryable());
    }
}
