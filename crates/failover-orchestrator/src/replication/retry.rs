//! Exponential backoff with jitter for transient replication errors

use super::ReplicationError;
use crate::config::RetryConfig;
use crate::error::{FailoverError, FailoverResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// One failed attempt, kept for escalation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub error: String,
    /// Backoff slept after this attempt, 0 for the last one
    pub delay_ms: u64,
}

/// Retry policy shared by every adapter call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before retry number `retry` (0-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let grown =
            self.config.base_delay_ms as f64 * self.config.backoff_multiplier.powi(retry as i32);
        let capped = grown.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff with jitter applied, never above the configured maximum
    pub fn delay(&self, retry: u32) -> Duration {
        let delay = self.base_delay(retry).as_millis() as u64;
        let jitter = if self.config.jitter_factor > 0.0 {
            let jitter_range = (delay as f64 * self.config.jitter_factor) as u64;
            if jitter_range > 0 {
                fastrand::u64(0..=jitter_range)
            } else {
                0
            }
        } else {
            0
        };
        Duration::from_millis((delay + jitter).min(self.config.max_delay_ms))
    }

    /// Run `call` until it succeeds, fails terminally, or the attempt budget runs out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> FailoverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReplicationError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempts = Vec::new();

        for attempt in 1..=max_attempts {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "replication call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_transient() => {
                    let delay = if attempt < max_attempts {
                        self.delay(attempt - 1)
                    } else {
                        Duration::ZERO
                    };
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient replication error"
                    );
                    attempts.push(AttemptRecord {
                        attempt,
                        error: error.to_string(),
                        delay_ms: delay.as_millis() as u64,
                    });
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => {
                    return Err(FailoverError::External {
                        operation: operation.to_string(),
                        source: error,
                    });
                }
            }
        }

        Err(FailoverError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
        })
    }
}
