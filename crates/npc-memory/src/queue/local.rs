//! In-process queue delivering straight to a [`PushWorker`]
//!
//! Used by the single-process `all` role and by tests. Delivery runs on a
//! spawned task with the same redelivery loop as the HTTP adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{Attempt, RedeliveryPolicy, TaskQueue, redeliver};
use crate::error::Result;
use crate::task::{CorrelationTask, PushEnvelope};
use crate::worker::{DeliveryOutcome, PushWorker, RETRY_AFTER_SECS};

#[derive(Debug, Clone)]
pub struct LocalQueue {
    worker: Arc<PushWorker>,
    subscription: String,
    policy: RedeliveryPolicy,
}

impl LocalQueue {
    pub fn new(worker: Arc<PushWorker>, subscription: impl Into<String>, policy: RedeliveryPolicy) -> Self {
        Self {
            worker,
            subscription: subscription.into(),
            policy,
        }
    }
}

fn to_attempt(outcome: DeliveryOutcome) -> Attempt {
    match outcome {
        DeliveryOutcome::Completed { .. } | DeliveryOutcome::Discarded(_) => Attempt::Ack,
        DeliveryOutcome::Rejected => Attempt::Retry {
            reason: "worker at capacity".to_string(),
            after: Some(Duration::from_secs(RETRY_AFTER_SECS)),
        },
        DeliveryOutcome::Retry(reason) => Attempt::Retry {
            reason,
            after: None,
        },
    }
}

#[async_trait]
impl TaskQueue for LocalQueue {
    async fn publish(&self, task: &CorrelationTask) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = PushEnvelope::wrap(task, message_id.clone(), Some(self.subscription.clone()))?;
        let body = Arc::new(envelope.to_vec()?);

        let worker = Arc::clone(&self.worker);
        let policy = self.policy;
        let id = message_id.clone();

        tokio::spawn(async move {
            let (attempts, acked) = redeliver(policy, &id, |_| {
                let worker = Arc::clone(&worker);
                let body = Arc::clone(&body);
                async move { to_attempt(worker.deliver(&body).await) }
            })
            .await;
            debug!(message_id = %id, attempts, acked, "Local delivery finished");
        });

        Ok(message_id)
    }

    fn name(&self) -> &str {
        "local"
    }
}
