//! Client-facing request gateway
//!
//! Turns a blocking-looking call into publish + wait-for-reply. Every call
//! ends in exactly one of: the OK result, the worker's typed error, or
//! [`MemoryError::GatewayTimeout`].

mod server;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::memory::MemoryContext;
use crate::metrics;
use crate::reply::ReplyChannel;
use crate::task::{
    CorrelationTask, IndexPayload, IndexResult, ReplyMessage, SearchPayload, SearchResult,
    TaskPayload,
};
use crate::queue::TaskQueue;
use crate::worker::TaskExecutor;

pub use server::{ApiError, GatewayState, create_gateway_router};

/// Where the gateway sends work
#[derive(Clone)]
pub enum Dispatch {
    /// Execute in this process
    Direct(Arc<TaskExecutor>),
    /// Publish to a queue and wait on the reply channel
    Queued {
        queue: Arc<dyn TaskQueue>,
        replies: Arc<dyn ReplyChannel>,
    },
}

impl std::fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatch::Direct(_) => f.write_str("Direct"),
            Dispatch::Queued { queue, replies } => f
                .debug_struct("Queued")
                .field("queue", &queue.name())
                .field("replies", &replies.name())
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestGateway {
    dispatch: Dispatch,
    timeout: Duration,
}

impl RequestGateway {
    pub fn new(dispatch: Dispatch, timeout: Duration) -> Self {
        Self { dispatch, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    /// Build a task with a fresh correlation id and run it to completion
    pub async fn submit(&self, payload: TaskPayload) -> Result<Value> {
        self.submit_task(CorrelationTask::new(payload)).await
    }

    /// Run a prepared task. Client input errors are caught before publishing.
    pub async fn submit_task(&self, task: CorrelationTask) -> Result<Value> {
        task.validate().map_err(|e| match e {
            MemoryError::MalformedTask(msg) => MemoryError::InvalidInput(msg),
            other => other,
        })?;

        let started = Instant::now();
        debug!(
            correlation_id = %task.correlation_id,
            operation = %task.operation,
            "Submitting task"
        );

        let outcome = match &self.dispatch {
            Dispatch::Direct(executor) => self.run_direct(executor, &task).await,
            Dispatch::Queued { queue, replies } => {
                let queued = self.run_queued(queue.as_ref(), replies.as_ref(), &task, started);
                match tokio::time::timeout(self.timeout, queued).await {
                    Ok(result) => result,
                    Err(_) => Err(self.timed_out(&task)),
                }
            }
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::record_gateway(task.operation.as_str(), label, started.elapsed());
        match &outcome {
            Ok(_) => info!(
                correlation_id = %task.correlation_id,
                operation = %task.operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            ),
            Err(e) => warn!(
                correlation_id = %task.correlation_id,
                operation = %task.operation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error_type = e.kind(),
                error_message = %e,
                "Task did not succeed"
            ),
        }
        outcome
    }

    async fn run_direct(&self, executor: &TaskExecutor, task: &CorrelationTask) -> Result<Value> {
        match tokio::time::timeout(self.timeout, executor.run(task)).await {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(task)),
        }
    }

    async fn run_queued(
        &self,
        queue: &dyn TaskQueue,
        replies: &dyn ReplyChannel,
        task: &CorrelationTask,
        started: Instant,
    ) -> Result<Value> {
        let message_id = queue.publish(task).await?;
        debug!(
            correlation_id = %task.correlation_id,
            message_id = %message_id,
            queue = queue.name(),
            "Task published"
        );

        let remaining = self.timeout.saturating_sub(started.elapsed());
        let raw = replies
            .blocking_pop(&task.reply_key(), remaining)
            .await?
            .ok_or_else(|| self.timed_out(task))?;

        let reply = ReplyMessage::from_json(&raw)?;
        if reply.correlation_id != task.correlation_id {
            return Err(MemoryError::Storage(format!(
                "reply under {} carried correlation id {}",
                task.reply_key(),
                reply.correlation_id
            )));
        }
        reply.into_result()
    }

    fn timed_out(&self, task: &CorrelationTask) -> MemoryError {
        MemoryError::GatewayTimeout {
            correlation_id: task.correlation_id.clone(),
            timeout: self.timeout,
        }
    }

    /// Write one memory; returns the correlation id and the worker's result
    pub async fn write_memory(&self, payload: IndexPayload) -> Result<(String, IndexResult)> {
        let task = CorrelationTask::new(TaskPayload::Index(payload));
        let correlation_id = task.correlation_id.clone();
        let value = self.submit_task(task).await?;
        Ok((correlation_id, serde_json::from_value(value)?))
    }

    pub async fn search(&self, payload: SearchPayload) -> Result<SearchResult> {
        let value = self.submit(TaskPayload::Search(payload)).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Search, then summarize the result into a conversation context
    pub async fn context(&self, payload: SearchPayload) -> Result<MemoryContext> {
        let result = self.search(payload).await?;
        Ok(MemoryContext::from_ranked(result.memories))
    }
}
