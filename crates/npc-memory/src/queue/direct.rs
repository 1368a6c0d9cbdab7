//! Push delivery over HTTP to a worker's `/pubsub/push` endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Attempt, RedeliveryPolicy, TaskQueue, redeliver};
use crate::config::QueueConfig;
use crate::error::{MemoryError, Result};
use crate::task::{CorrelationTask, PushEnvelope};

/// Per-attempt HTTP timeout; a worker holds the request for the whole task
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DirectPushQueue {
    client: Client,
    endpoint: String,
    subscription: String,
    policy: RedeliveryPolicy,
}

impl DirectPushQueue {
    pub fn new(config: &QueueConfig) -> Result<Self> {
        let endpoint = config
            .push_endpoint
            .clone()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                MemoryError::Config("queue.push_endpoint is required for push delivery".to_string())
            })?;

        let client = Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .map_err(|e| MemoryError::Config(format!("failed to build HTTP client: {e}")))?;

        info!(endpoint = %endpoint, subscription = %config.subscription, "DirectPushQueue initialized");

        Ok(Self {
            client,
            endpoint,
            subscription: config.subscription.clone(),
            policy: RedeliveryPolicy::from_config(config),
        })
    }

    pub fn with_policy(mut self, policy: RedeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn attempt(client: &Client, endpoint: &str, body: &[u8]) -> Attempt {
        let response = match client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return Attempt::Retry {
                    reason: format!("push request failed: {e}"),
                    after: None,
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return Attempt::Ack;
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Attempt::Retry {
                reason: format!("worker returned {status}"),
                after,
            };
        }

        // Other 4xx: the subscription would treat this as a permanent nack
        warn!(endpoint = %endpoint, status = %status, "Worker refused delivery; not redelivering");
        Attempt::Ack
    }
}

#[async_trait]
impl TaskQueue for DirectPushQueue {
    async fn publish(&self, task: &CorrelationTask) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = PushEnvelope::wrap(task, message_id.clone(), Some(self.subscription.clone()))?;
        let body = envelope.to_vec()?;

        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let policy = self.policy;
        let id = message_id.clone();
        let correlation_id = task.correlation_id.clone();

        tokio::spawn(async move {
            let (attempts, acked) = redeliver(policy, &id, |_| {
                let client = client.clone();
                let endpoint = endpoint.clone();
                let body = body.clone();
                async move { Self::attempt(&client, &endpoint, &body).await }
            })
            .await;
            debug!(
                message_id = %id,
                correlation_id = %correlation_id,
                attempts,
                acked,
                "Push delivery finished"
            );
        });

        Ok(message_id)
    }

    fn name(&self) -> &str {
        "direct_push"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_endpoint() {
        let err = DirectPushQueue::new(&QueueConfig::default()).unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
