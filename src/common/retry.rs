//! Bounded exponential backoff for calls into the store and cache
//!
//! Only errors for which [`Error::is_retryable`] holds are retried; domain
//! outcomes such as a duplicate vote are returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::common::config::RetryConfig;
use crate::common::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(op = op_name, attempts = attempt, error = %e, "retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Decorator that retries transient failures of a wrapped store or cache.
/// Trait impls live next to the traits they decorate.
pub struct Retry<T> {
    pub(crate) inner: T,
    pub(crate) policy: RetryPolicy,
}

impl<T> Retry<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

/// Shorthand used by tests and backends
pub fn transient(msg: impl Into<String>) -> Error {
    Error::Unavailable(msg.into())
}
