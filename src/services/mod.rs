//! External collaborators: verification keys, schemas, chain state and
//! the request registry.

pub mod blockchain;
pub mod keys;
pub mod schema;
pub mod sessions;
pub mod state;

use std::future::Future;
use std::time::Duration;

/// Failure of one attempt against a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Worth retrying: timeouts, transport errors, 5xx.
    Transient(String),
    Permanent(String),
}

/// Timeout and bounded exponential backoff for network lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Runs `attempt` until it succeeds, fails permanently, or the attempts
    /// are used up. Each attempt is bounded by `timeout`.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.base_delay;
        let mut made = 0;

        loop {
            made += 1;
            let outcome = match tokio::time::timeout(self.timeout, attempt()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Transient(format!("timed out after {:?}", self.timeout))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(FetchError::Permanent(reason)) => return Err(reason),
                Err(FetchError::Transient(reason)) if made >= attempts => {
                    return Err(format!("{} (gave up after {} attempts)", reason, made));
                }
                Err(FetchError::Transient(reason)) => {
                    tracing::warn!(operation, attempt = made, %reason, "Transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}
