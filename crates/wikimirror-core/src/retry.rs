//! Bounded retry with exponential backoff for revision sources.
//!
//! Sources render asynchronously and sometimes hand back stale or partial
//! content. Each source reports such a response as
//! [`Error::TransientSource`]; wrapping the call in [`RetryPolicy::run`]
//! retries it and converts an exhausted budget into
//! [`Error::SourceUnavailable`]. Callers above the source never retry.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Attempt budget and backoff schedule for one source operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub delay_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff: f64,
    /// Upper bound for a single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay_ms: 2_000,
            backoff: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps; used by tests and offline sources.
    #[must_use]
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay_ms: 0,
            backoff: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff.max(1.0).powi(exponent);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let millis = (self.delay_ms as f64 * factor).min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(millis)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Only recoverable errors ([`Error::is_recoverable`]) are retried.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SourceUnavailable`] after the last failed attempt, or
    /// the first non-recoverable error unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_recoverable() => {
                    if attempt >= attempts {
                        warn!(
                            operation,
                            attempts,
                            error = %err,
                            "Retry budget exhausted"
                        );
                        return Err(Error::SourceUnavailable {
                            operation: operation.to_string(),
                            attempts,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.delay_after(attempt);
                    debug!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Transient source failure, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                },
                Err(err) => return Err(err),
            }
        }
    }
}
