use std::future::Future;
use std::time::Duration;

use super::ProviderError;

/// Bounded retry for transient provider failures.
///
/// Every provider call in the pipeline runs under the same budget: one
/// retry after a fixed pause. Deterministic failures (safety blocks,
/// malformed payloads, bad input) surface immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run `op`, replaying it after a pause while it fails transiently and
    /// attempts remain. `label` identifies the operation in logs.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %error,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
