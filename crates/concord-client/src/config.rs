//! Router configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::BalancerKind;
use crate::error::{ClientError, ClientResult};

/// Configuration for the client router.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouterConfig {
    /// Load balancer used by replica-selecting strategies
    pub balancer: BalancerKind,

    /// Route cache configuration
    pub cache: RouteCacheConfig,

    /// Per-node circuit breaker configuration
    pub breaker: BreakerConfig,

    /// Retry/backoff policy applied by callers
    pub retry: RetryConfig,

    /// Deadline for snapshot refreshes and resolutions that hit the network
    pub request_timeout: Duration,

    /// Missing heartbeats for this long trigger a resubscribe
    pub heartbeat_timeout: Duration,
}

/// Route cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouteCacheConfig {
    /// Whether resolutions consult the cache at all
    pub enabled: bool,

    /// Cached routes before LRU eviction
    pub capacity: usize,

    /// Time a cached route stays valid
    pub ttl: Duration,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self { enabled: true, capacity: 4096, ttl: Duration::from_secs(30) }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BreakerConfig {
    /// Requests observed before the failure rate is meaningful
    pub min_request_threshold: u64,

    /// Failure rate in `[0, 1]` that opens the breaker
    pub failure_rate_threshold: f64,

    /// Time an open breaker waits before probing
    pub open_timeout: Duration,

    /// Probes admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            min_request_threshold: 10,
            failure_rate_threshold: 0.5,
            open_timeout: Duration::from_secs(60),
            half_open_max_calls: 5,
        }
    }
}

/// Retry/backoff policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    /// First retry delay
    pub base_interval: Duration,

    /// Multiplier applied per attempt
    pub backoff_multiplier: f64,

    /// Ceiling on the delay
    pub max_backoff_interval: Duration,

    /// Add randomized jitter to each delay
    pub jitter: bool,

    /// Attempts after the initial call
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff_interval: Duration::from_secs(10),
            jitter: true,
            max_retries: 3,
        }
    }
}

impl RouterConfig {
    /// Validate the configuration. Bad values are fatal at startup.
    pub fn validate(&self) -> ClientResult<()> {
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ClientError::Config("cache capacity must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.breaker.failure_rate_threshold) {
            return Err(ClientError::Config(
                "failure_rate_threshold must be within [0, 1]".into(),
            ));
        }
        if self.breaker.min_request_threshold == 0 {
            return Err(ClientError::Config(
                "min_request_threshold must be greater than 0".into(),
            ));
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(ClientError::Config(
                "half_open_max_calls must be greater than 0".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ClientError::Config("backoff_multiplier must be at least 1.0".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ClientError::Config("request_timeout must be positive".into()));
        }
        Ok(())
    }
}

impl RouterConfig {
    /// Defaults with sensible network deadlines filled in.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }
}
