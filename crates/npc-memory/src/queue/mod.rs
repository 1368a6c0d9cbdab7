//! Task queue adapters
//!
//! `publish` returns once the queue has accepted the task. Delivery to a
//! worker happens in the background and is retried with backoff while the
//! worker answers "retry" (capacity or transient failure). A message that
//! exhausts its attempts is dropped with an error log, standing in for a
//! dead-letter topic.

mod direct;
mod local;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::task::CorrelationTask;

pub use direct::DirectPushQueue;
pub use local::LocalQueue;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Accept `task` for delivery and return its message id
    async fn publish(&self, task: &CorrelationTask) -> Result<String>;

    fn name(&self) -> &str;
}

/// Result of one delivery attempt as seen by the queue
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    /// Worker acknowledged; stop
    Ack,
    /// Worker asked for redelivery, optionally after a given delay
    Retry {
        reason: String,
        after: Option<Duration>,
    },
}

/// Push-subscription style redelivery schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RedeliveryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RedeliveryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_delivery_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Drive delivery attempts until one is acked or attempts run out.
///
/// Returns the number of attempts made and whether the message was acked.
pub async fn redeliver<F, Fut>(policy: RedeliveryPolicy, message_id: &str, mut attempt: F) -> (u32, bool)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt>,
{
    for n in 1..=policy.max_attempts {
        match attempt(n).await {
            Attempt::Ack => {
                debug!(message_id = %message_id, attempt = n, "Delivery acknowledged");
                return (n, true);
            }
            Attempt::Retry { reason, after } => {
                if n == policy.max_attempts {
                    error!(
                        message_id = %message_id,
                        attempts = n,
                        reason = %reason,
                        "Delivery attempts exhausted; dropping message"
                    );
                    return (n, false);
                }
                let delay = after
                    .map(|d| d.min(policy.max_backoff))
                    .unwrap_or_else(|| policy.backoff(n));
                debug!(
                    message_id = %message_id,
                    attempt = n,
                    reason = %reason,
                    "Redelivering in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    (0, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_redeliver_until_ack() {
        let calls = Arc::new(AtomicU32::new(0));
        let (attempts, acked) = redeliver(fast(), "m1", |n| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Attempt::Retry {
                        reason: "busy".into(),
                        after: None,
                    }
                } else {
                    Attempt::Ack
                }
            }
        })
        .await;

        assert!(acked);
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_redeliver_gives_up() {
        let (attempts, acked) = redeliver(fast(), "m2", |_| async {
            Attempt::Retry {
                reason: "down".into(),
                after: Some(Duration::from_secs(30)),
            }
        })
        .await;
        assert!(!acked);
        assert_eq!(attempts, 4);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RedeliveryPolicy::from_config(&QueueConfig::default());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(5000));
    }
}
