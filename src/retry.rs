use crate::types::{ObservedError, ParleyError, Result};
use std::future::Future;
use std::time::Duration;

pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(val) => return Ok(val),
                Err(e) if attempts < self.max_attempts && self.is_retryable(&e) => {
                    let delay = self.delay_for(attempts);
                    tracing::warn!(
                        target: "push",
                        "Attempt {} failed: {}. Retrying in {:?} (jittered)...",
                        attempts,
                        e.inner,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exponential backoff with ±25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_delay = self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1));
        let jitter_range = base_delay / 4;
        let jitter = if jitter_range > 0 {
            fastrand::i64(-(jitter_range as i64)..jitter_range as i64)
        } else {
            0
        };
        Duration::from_millis((base_delay as i64 + jitter).max(1) as u64)
    }

    fn is_retryable(&self, err: &ObservedError) -> bool {
        matches!(
            &err.inner,
            ParleyError::Channel(_)
                | ParleyError::WebSocket(_)
                | ParleyError::Network(_)
                | ParleyError::Io(_)
                | ParleyError::Internal(_, _)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_stays_within_jitter() {
        let policy = RetryPolicy::new(3, 1000);
        for _ in 0..20 {
            let first = policy.delay_for(1).as_millis();
            let second = policy.delay_for(2).as_millis();
            assert!((750..=1250).contains(&first), "first delay {}", first);
            assert!((1500..=2500).contains(&second), "second delay {}", second);
        }
    }
}
