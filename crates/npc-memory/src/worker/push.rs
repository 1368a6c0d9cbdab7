//! Delivery handling shared by the HTTP push endpoint and the in-process queue

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::admission::{Admission, AdmissionGate};
use super::executor::{TaskExecutor, TaskState};
use crate::error::{MemoryError, Result};
use crate::metrics::{self, Processed};
use crate::reply::ReplyChannel;
use crate::task::{PushEnvelope, ReplyMessage, ReplyStatus, TaskDecodeError, reply_key};

/// How a delivery ended, from the queue's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// A reply (OK or ERROR) was written; ack
    Completed {
        correlation_id: String,
        status: ReplyStatus,
    },
    /// Nothing could be decoded; ack so the queue stops retrying
    Discarded(String),
    /// At capacity; redeliver later
    Rejected,
    /// Transient failure after admission; redeliver
    Retry(String),
}

/// Admission gate, executor and reply channel for one worker process
pub struct PushWorker {
    gate: AdmissionGate,
    executor: Arc<TaskExecutor>,
    replies: Arc<dyn ReplyChannel>,
    reply_ttl: Duration,
}

impl std::fmt::Debug for PushWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushWorker")
            .field("gate", &self.gate)
            .field("executor", &self.executor)
            .field("replies", &self.replies.name())
            .field("reply_ttl", &self.reply_ttl)
            .finish()
    }
}

impl PushWorker {
    pub fn new(
        gate: AdmissionGate,
        executor: Arc<TaskExecutor>,
        replies: Arc<dyn ReplyChannel>,
        reply_ttl: Duration,
    ) -> Self {
        Self {
            gate,
            executor,
            replies,
            reply_ttl,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Handle one push delivery body.
    ///
    /// Admission is decided before the body is even parsed, so a saturated
    /// worker answers immediately.
    pub async fn deliver(&self, body: &[u8]) -> DeliveryOutcome {
        debug!(
            bytes = body.len(),
            state = TaskState::Received.as_str(),
            "Task state change"
        );
        metrics::record_delivery();

        let _permit = match self.gate.try_acquire() {
            Admission::Permit(permit) => permit,
            Admission::Rejected => {
                debug!(
                    in_flight = self.gate.in_flight(),
                    max_in_flight = self.gate.max_in_flight(),
                    state = TaskState::Rejected.as_str(),
                    "Worker at capacity"
                );
                metrics::record_admission_rejected();
                return DeliveryOutcome::Rejected;
            }
        };

        let task = match PushEnvelope::from_slice(body).and_then(|env| {
            let message_id = env.message.message_id.clone();
            env.decode_task().map(|task| (message_id, task))
        }) {
            Ok((message_id, task)) => {
                debug!(
                    correlation_id = %task.correlation_id,
                    message_id = %message_id,
                    operation = %task.operation,
                    state = TaskState::Admitted.as_str(),
                    "Task state change"
                );
                task
            }
            Err(TaskDecodeError::Discard(reason)) => {
                warn!(reason = %reason, "Discarding undecodable delivery");
                metrics::record_processed(Processed::Discarded);
                return DeliveryOutcome::Discarded(reason);
            }
            Err(TaskDecodeError::Invalid {
                correlation_id,
                reason,
            }) => {
                warn!(
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "Rejecting malformed task"
                );
                metrics::record_processed(Processed::Malformed);
                let reply = ReplyMessage::error(
                    correlation_id.clone(),
                    &MemoryError::MalformedTask(reason),
                );
                return self.send_reply(&correlation_id, reply).await;
            }
        };

        let reply = self.executor.execute(&task).await;
        metrics::record_processed(match reply.status {
            ReplyStatus::Ok => Processed::Success,
            ReplyStatus::Error => Processed::Error,
        });
        self.send_reply(&task.correlation_id, reply).await
    }

    async fn send_reply(&self, correlation_id: &str, reply: ReplyMessage) -> DeliveryOutcome {
        let status = reply.status;
        match self.push_reply(correlation_id, &reply).await {
            Ok(()) => {
                debug!(
                    correlation_id = %correlation_id,
                    status = ?status,
                    state = TaskState::Replied.as_str(),
                    "Task state change"
                );
                DeliveryOutcome::Completed {
                    correlation_id: correlation_id.to_string(),
                    status,
                }
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    error_type = e.kind(),
                    error_message = %e,
                    "Failed to write reply; asking for redelivery"
                );
                DeliveryOutcome::Retry(e.to_string())
            }
        }
    }

    async fn push_reply(&self, correlation_id: &str, reply: &ReplyMessage) -> Result<()> {
        let payload = reply.to_json()?;
        self.replies
            .push(&reply_key(correlation_id), payload, self.reply_ttl)
            .await
    }
}
