//! Retry utilities for idempotent catalog requests
//!
//! Catalog servers occasionally answer with transient failures (connection
//! resets, 502/503 during a reload). Idempotent requests such as `PUT` uploads
//! and `GET` probes are retried with exponential backoff; everything else is
//! sent once.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom max retries
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// A configuration that never retries
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Create a retry configuration with custom delays
    pub fn with_delays(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponential = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt - 1));
        Duration::from_millis(exponential.min(self.max_delay_ms))
    }
}

/// Execute an operation, retrying errors accepted by `should_retry`
///
/// Returns the first success, the first non-retryable error, or the last
/// error once `max_retries` is exhausted.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis(),
                "Retrying catalog request after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < config.max_retries && should_retry(&e) => {
                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Catalog request failed, will retry"
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
