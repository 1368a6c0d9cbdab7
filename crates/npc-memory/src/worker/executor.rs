//! Task execution: embedding plus upsert, or embedding plus dual query and fusion

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{CategoryFilterMode, Config};
use crate::embedding::{EmbeddingGateway, RetryPolicy, embed_with_retry};
use crate::error::{MemoryError, Result};
use crate::index::{Hit, SearchFilter, SearchIndex};
use crate::memory::{Memory, normalize_tags};
use crate::metrics;
use crate::ranking::{FusionQuery, FusionRanker, candidate_pool};
use crate::task::{
    CorrelationTask, IndexPayload, IndexResult, ReplyMessage, ReplyStatus, SearchPayload,
    SearchResult, TaskPayload,
};

/// Lifecycle of a delivered task, logged as the `state` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Received,
    Rejected,
    Admitted,
    Executing,
    Completed,
    Failed,
    Replied,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "RECEIVED",
            TaskState::Rejected => "REJECTED",
            TaskState::Admitted => "ADMITTED",
            TaskState::Executing => "EXECUTING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Replied => "REPLIED",
        }
    }
}

/// Runs admitted tasks against the embedding gateway and search index.
///
/// Collaborators are injected at construction; nothing here is global.
pub struct TaskExecutor {
    embedder: Arc<dyn EmbeddingGateway>,
    fallback: Option<Arc<dyn EmbeddingGateway>>,
    index: Arc<dyn SearchIndex>,
    ranker: FusionRanker,
    retry: RetryPolicy,
    arm_timeout: Duration,
    candidate_pool_max: usize,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("embedder", &self.embedder.name())
            .field("fallback", &self.fallback.as_ref().map(|f| f.name().to_string()))
            .field("index", &self.index.name())
            .field("arm_timeout", &self.arm_timeout)
            .finish()
    }
}

impl TaskExecutor {
    pub fn new(
        embedder: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn SearchIndex>,
        ranker: FusionRanker,
    ) -> Self {
        Self {
            embedder,
            fallback: None,
            index,
            ranker,
            retry: RetryPolicy::default(),
            arm_timeout: Duration::from_secs(2),
            candidate_pool_max: 200,
        }
    }

    /// Wire an executor from configuration and already-built collaborators
    pub fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingGateway>,
        fallback: Option<Arc<dyn EmbeddingGateway>>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        let ranker = FusionRanker::new(config.ranking.weights(), config.ranking.category_filter);
        Self::new(embedder, index, ranker)
            .with_fallback(fallback)
            .with_retry(RetryPolicy::from_config(&config.embedding))
            .with_arm_timeout(config.worker.arm_timeout())
            .with_candidate_pool_max(config.worker.candidate_pool_max)
    }

    pub fn with_fallback(mut self, fallback: Option<Arc<dyn EmbeddingGateway>>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_arm_timeout(mut self, timeout: Duration) -> Self {
        self.arm_timeout = timeout;
        self
    }

    pub fn with_candidate_pool_max(mut self, max: usize) -> Self {
        self.candidate_pool_max = max.max(1);
        self
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Execute `task` and build its reply. Failures become ERROR replies.
    pub async fn execute(&self, task: &CorrelationTask) -> ReplyMessage {
        debug!(
            correlation_id = %task.correlation_id,
            operation = %task.operation,
            state = TaskState::Executing.as_str(),
            "Task state change"
        );

        match self.run(task).await {
            Ok(result) => {
                debug!(
                    correlation_id = %task.correlation_id,
                    state = TaskState::Completed.as_str(),
                    "Task state change"
                );
                ReplyMessage {
                    correlation_id: task.correlation_id.clone(),
                    status: ReplyStatus::Ok,
                    result,
                    produced_at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(
                    correlation_id = %task.correlation_id,
                    operation = %task.operation,
                    state = TaskState::Failed.as_str(),
                    error_type = e.kind(),
                    error_message = %e,
                    "Task failed"
                );
                ReplyMessage::error(task.correlation_id.clone(), &e)
            }
        }
    }

    /// Execute `task`, returning the OK body or the typed failure
    pub async fn run(&self, task: &CorrelationTask) -> Result<Value> {
        task.validate()?;
        match &task.payload {
            TaskPayload::Index(payload) => {
                let result = self.index_memory(task, payload).await?;
                Ok(serde_json::to_value(result)?)
            }
            TaskPayload::Search(payload) => {
                let result = self.search(payload).await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }

    /// Embed and upsert under the correlation id. A replay of the same task
    /// writes the same document again.
    pub async fn index_memory(
        &self,
        task: &CorrelationTask,
        payload: &IndexPayload,
    ) -> Result<IndexResult> {
        let (vector, degraded_embedding) =
            match embed_with_retry(self.embedder.as_ref(), &payload.text, &self.retry).await {
                Ok(vector) => (vector, false),
                Err(e) => match &self.fallback {
                    Some(fallback) => {
                        warn!(
                            correlation_id = %task.correlation_id,
                            fallback = fallback.name(),
                            error_type = e.kind(),
                            error_message = %e,
                            "Primary embedding exhausted, indexing with degraded embedding"
                        );
                        metrics::record_embedding_fallback();
                        (fallback.embed(&payload.text).await?, true)
                    }
                    None => return Err(e),
                },
            };

        let memory = Memory {
            id: task.correlation_id.clone(),
            subject_id: payload.subject_id.clone(),
            target_id: payload.target_id.clone(),
            category: payload.category,
            text: payload.text.clone(),
            vector,
            tags: normalize_tags(&payload.tags),
            importance: payload.importance,
            created_at: payload.occurred_at.unwrap_or(task.created_at),
            context: payload.context.clone(),
        };

        self.index.upsert(&memory).await?;
        debug!(
            correlation_id = %task.correlation_id,
            index = self.index.name(),
            degraded_embedding,
            "Memory upserted"
        );

        Ok(IndexResult {
            memory_id: memory.id,
            degraded_embedding,
        })
    }

    /// Dual-arm retrieval fused into the top `payload.top_k`
    pub async fn search(&self, payload: &SearchPayload) -> Result<SearchResult> {
        let query_vector =
            embed_with_retry(self.embedder.as_ref(), &payload.query_text, &self.retry).await?;

        let now = Utc::now();
        let mut filter = SearchFilter::new(&payload.subject_id, &payload.target_id);
        if self.ranker.filter_mode() == CategoryFilterMode::Hard {
            if let Some(ref categories) = payload.category_filter {
                filter = filter.with_categories(categories.clone());
            }
        }
        if let Some(days) = payload.max_age_days {
            filter = filter.within_days(days, now);
        }

        let pool = candidate_pool(payload.top_k, self.candidate_pool_max);
        let (lexical, vector) = tokio::join!(
            tokio::time::timeout(
                self.arm_timeout,
                self.index.lexical_query(&payload.query_text, &filter, pool)
            ),
            tokio::time::timeout(
                self.arm_timeout,
                self.index.vector_query(&query_vector, &filter, pool)
            ),
        );

        let mut degraded_arms = Vec::new();
        let lexical = self.resolve_arm("lexical", lexical, &mut degraded_arms)?;
        let vector = self.resolve_arm("vector", vector, &mut degraded_arms)?;

        if lexical.is_none() && vector.is_none() {
            return Err(MemoryError::UpstreamUnavailable(format!(
                "both search arms timed out after {:?}",
                self.arm_timeout
            )));
        }

        let query = FusionQuery::new(payload.top_k)
            .with_categories(payload.category_filter.as_deref())
            .with_max_age_days(payload.max_age_days)
            .at(now);
        let memories = self.ranker.rank(
            lexical.as_deref().unwrap_or_default(),
            vector.as_deref().unwrap_or_default(),
            &query,
        );

        Ok(SearchResult {
            memories,
            degraded_arms,
        })
    }

    fn resolve_arm(
        &self,
        arm: &'static str,
        outcome: std::result::Result<Result<Vec<Hit>>, tokio::time::error::Elapsed>,
        degraded: &mut Vec<String>,
    ) -> Result<Option<Vec<Hit>>> {
        match outcome {
            Ok(Ok(hits)) => Ok(Some(hits)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    arm,
                    timeout_ms = self.arm_timeout.as_millis() as u64,
                    "Search arm timed out; fusing without it"
                );
                metrics::record_degraded_arm(arm);
                degraded.push(arm.to_string());
                Ok(None)
            }
        }
    }
}
