//! Timeout plus bounded exponential backoff for remote calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{RagsyncError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,
    pub initial_backoff: Duration,
    /// Ceiling for the doubling delay between attempts
    pub max_backoff: Duration,
    /// Upper bound on a single attempt
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Doubled delay, held at `max_backoff`
    fn next_backoff(&self, delay: Duration) -> Duration {
        delay.saturating_mul(2).min(self.max_backoff)
    }

    /// Run `op`, retrying transient failures.
    ///
    /// An attempt that exceeds `call_timeout` counts as a transient failure.
    /// Non-transient errors are returned immediately.
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut delay = self.initial_backoff.min(self.max_backoff);

        loop {
            let outcome = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(RagsyncError::TransientGateway(format!(
                    "{} timed out after {:?}",
                    op_name, self.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!("{} failed, retry {}/{} in {:?}: {}", op_name, attempt, self.max_retries, delay, e);
                    tokio::time::sleep(delay).await;
                    delay = self.next_backoff(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
