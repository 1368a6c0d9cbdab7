use std::time::{Duration, Instant};

use tracing::warn;

use super::EmbeddingGateway;
use crate::config::EmbeddingConfig;
use crate::error::Result;
use crate::metrics;

/// Bounded exponential backoff for embedding calls
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Embed `text`, retrying transient failures with exponential backoff.
///
/// Permanent errors return immediately; the last transient error is returned
/// once attempts run out.
pub async fn embed_with_retry(
    gateway: &dyn EmbeddingGateway,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>> {
    let started = Instant::now();
    let mut attempt = 1;
    loop {
        match gateway.embed(text).await {
            Ok(vector) => {
                metrics::record_embedding(true, started.elapsed());
                return Ok(vector);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    gateway = gateway.name(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    error_type = e.kind(),
                    error_message = %e,
                    "Embedding failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                metrics::record_embedding(false, started.elapsed());
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyEmbedder;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let flaky = FlakyEmbedder::failing_first(2, 4);
        let vector = embed_with_retry(&flaky, "hello", &fast_policy(3)).await.unwrap();
        assert_eq!(vector.len(), 4);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let flaky = FlakyEmbedder::always_failing(4);
        let err = embed_with_retry(&flaky, "hello", &fast_policy(3)).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
        assert_eq!(flaky.calls(), 3);
    }

    #[test]
    fn test_from_config_never_zero_attempts() {
        let config = EmbeddingConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
