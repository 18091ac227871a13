//! Timeouts and bounded retries around oracle calls.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::warn;

use lawqa_core::{LawQaError, ResilienceConfig, Result};

/// Per-attempt timeout plus linear backoff between attempts.
///
/// Only transient errors (and timeouts) are retried; anything else is
/// returned immediately. When attempts run out the last failure is wrapped
/// in [`LawQaError::Unavailable`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A single attempt with the given timeout.
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let started = Instant::now();

            let error = match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_transient() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => LawQaError::Timeout {
                    operation: operation.to_string(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                },
            };

            warn!(
                "{} failed (attempt {}/{}): {}",
                operation, attempt, attempts, error
            );
            last_error = Some(error);

            if attempt < attempts && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff * attempt).await;
            }
        }

        Err(LawQaError::Unavailable {
            operation: operation.to_string(),
            attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }
}
