//! Retry with exponential backoff, applied by callers.
//!
//! The resolver itself never retries; callers wrap their calls with
//! [`with_retry`] so the policy is visible at the call site.

use std::future::Future;

use backon::{BackoffBuilder, ExponentialBuilder, Retryable};
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{ClientError, ClientResult};

/// Build the backoff schedule for a retry config.
#[must_use]
pub fn backoff(config: &RetryConfig) -> ExponentialBuilder {
    let mut builder = ExponentialBuilder::default()
        .with_min_delay(config.base_interval)
        .with_max_delay(config.max_backoff_interval)
        .with_factor(config.backoff_multiplier as f32)
        .with_max_times(config.max_retries as usize);
    if config.jitter {
        builder = builder.with_jitter();
    }
    builder
}

/// Run `op`, retrying retryable errors per the policy.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, op: F) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    op.retry(backoff(config))
        .when(ClientError::is_retryable)
        .notify(|err, delay| {
            debug!(error = %err, delay_ms = delay.as_millis() as u64, "Retrying after error");
        })
        .await
}
