//! Per-node circuit breakers.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use concord_core::NodeId;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::config::BreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    /// Requests flow; failures are counted
    Closed,
    /// Requests are short-circuited
    Open,
    /// A bounded number of probes is admitted
    HalfOpen,
}

/// Mutable breaker internals, all behind the breaker's own mutex.
#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u64,
    success_count: u64,
    request_count: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
    /// Probes admitted since entering HalfOpen
    half_open_calls: u32,
    /// Probes succeeded since entering HalfOpen
    half_open_successes: u32,
    /// Moving average of observed latency (α = 0.1)
    latency_ema_ms: f64,
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    /// Current state
    pub state: BreakerState,
    /// Failures in the current window
    pub failure_count: u64,
    /// Successes in the current window
    pub success_count: u64,
    /// Requests in the current window
    pub request_count: u64,
    /// Latency moving average in milliseconds
    pub latency_ema_ms: f64,
}

/// A circuit breaker guarding one node.
///
/// Closed → Open once `request_count ≥ min_request_threshold` and the
/// failure rate reaches the threshold. Open → HalfOpen after
/// `open_timeout` since the last failure; HalfOpen admits
/// `half_open_max_calls` probes, re-opens on any failure, and closes once
/// every probe succeeded.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// New breaker in the Closed state.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                request_count: 0,
                last_failure: None,
                last_success: None,
                half_open_calls: 0,
                half_open_successes: 0,
                latency_ema_ms: 0.0,
            }),
        }
    }

    /// The only gate the router consults. May transition Open → HalfOpen.
    pub fn allow_request(&self) -> bool {
        let Ok(mut inner) = self.inner.lock() else { return false };
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_calls = 1;
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Whether the breaker is currently short-circuiting, without
    /// consuming a half-open probe slot. Used for candidate filtering.
    pub fn is_blocked(&self) -> bool {
        let Ok(inner) = self.inner.lock() else { return true };
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => inner.half_open_calls >= self.config.half_open_max_calls,
            BreakerState::Open => inner
                .last_failure
                .map(|at| at.elapsed() < self.config.open_timeout)
                .unwrap_or(false),
        }
    }

    /// Record a successful call and its latency.
    pub fn on_success(&self, latency_ms: f64) {
        let Ok(mut inner) = self.inner.lock() else { return };
        inner.request_count += 1;
        inner.success_count += 1;
        inner.last_success = Some(Instant::now());
        inner.latency_ema_ms = if inner.latency_ema_ms == 0.0 {
            latency_ms
        } else {
            inner.latency_ema_ms + 0.1 * (latency_ms - inner.latency_ema_ms)
        };

        if inner.state == BreakerState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.half_open_max_calls {
                debug!("Circuit breaker closed after successful probes");
                inner.state = BreakerState::Closed;
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.request_count = 0;
                inner.half_open_calls = 0;
                inner.half_open_successes = 0;
            }
        }
    }

    /// Record a failed call; may open the breaker.
    pub fn on_failure(&self) {
        let Ok(mut inner) = self.inner.lock() else { return };
        inner.request_count += 1;
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            BreakerState::HalfOpen => {
                debug!("Probe failed; circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.half_open_calls = 0;
                inner.half_open_successes = 0;
            }
            BreakerState::Closed => {
                let rate = inner.failure_count as f64 / inner.request_count as f64;
                if inner.request_count >= self.config.min_request_threshold
                    && rate >= self.config.failure_rate_threshold
                {
                    debug!(
                        failures = inner.failure_count,
                        requests = inner.request_count,
                        "Failure rate threshold reached; circuit breaker opened"
                    );
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().map(|inner| inner.state).unwrap_or(BreakerState::Open)
    }

    /// Counter snapshot for monitoring.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let Ok(inner) = self.inner.lock() else {
            return BreakerSnapshot {
                state: BreakerState::Open,
                failure_count: 0,
                success_count: 0,
                request_count: 0,
                latency_ema_ms: 0.0,
            };
        };
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            request_count: inner.request_count,
            latency_ema_ms: inner.latency_ema_ms,
        }
    }
}

/// One breaker per node, created on first use.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<NodeId, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// New empty registry.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self { config, breakers: DashMap::new() }
    }

    /// The breaker for a node, creating it if unseen.
    pub fn breaker_for(&self, node_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    /// States of every tracked breaker.
    pub fn states(&self) -> Vec<(NodeId, BreakerState)> {
        self.breakers.iter().map(|e| (e.key().clone(), e.value().state())).collect()
    }
}
