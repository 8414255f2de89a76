//! Error classification shared across the distribution core.

use serde::{Deserialize, Serialize};

/// Abstract error kinds surfaced at component boundaries.
///
/// Each crate keeps its own concrete error enum; `kind()` on those enums
/// maps into this taxonomy so callers can classify without matching on
/// another crate's variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Invalid thresholds, ratios or intervals; fatal at startup
    Configuration,
    /// Unknown shard, node or task id
    NotFound,
    /// No healthy target for the chosen strategy; retry or fail over
    Unavailable,
    /// Breaker open, queue full or subscriber cap reached; back off
    Rejected,
    /// Deadline exceeded; retried per policy
    Timeout,
    /// Duplicate add/remove or version regression
    Conflict,
    /// Network or peer failure
    Transport,
    /// Invariant violation; the component stops and reports
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "Configuration"),
            Self::NotFound => write!(f, "NotFound"),
            Self::Unavailable => write!(f, "Unavailable"),
            Self::Rejected => write!(f, "Rejected"),
            Self::Timeout => write!(f, "Timeout"),
            Self::Conflict => write!(f, "Conflict"),
            Self::Transport => write!(f, "Transport"),
            Self::Internal => write!(f, "Internal"),
        }
    }
}

/// Whether an operation failing with this kind is worth retrying as-is.
impl ErrorKind {
    /// Timeouts and transport failures are transient; everything else
    /// needs a topology change or operator action first.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Transport | Self::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Transport.is_retryable());
        assert!(!ErrorKind::Configuration.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
    }
}
