//! Test utilities - in-process fakes for the pipeline's seams
//!
//! Everything here is deterministic and network-free so unit and integration
//! tests can exercise admission, retries, timeouts and fusion without
//! external services.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::{EmbeddingGateway, StubEmbedder};
use crate::error::{MemoryError, Result};
use crate::index::{Hit, SearchFilter, SearchIndex};
use crate::memory::{Memory, MemoryCategory};
use crate::queue::TaskQueue;
use crate::task::CorrelationTask;

/// Stub embedder that counts how often it is called
#[derive(Debug)]
pub struct CountingEmbedder {
    inner: StubEmbedder,
    calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: StubEmbedder::new(dimension),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Embedder that fails with a transient error for its first `n` calls
#[derive(Debug)]
pub struct FlakyEmbedder {
    inner: StubEmbedder,
    fail_first: usize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing_first(fail_first: usize, dimension: usize) -> Self {
        Self {
            inner: StubEmbedder::new(dimension),
            fail_first,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always_failing(dimension: usize) -> Self {
        Self::failing_first(usize::MAX, dimension)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(MemoryError::UpstreamUnavailable(format!(
                "embedding service unavailable (call {})",
                call + 1
            )));
        }
        Ok(self.inner.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Which search arm a wrapper should interfere with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arm {
    Lexical,
    Vector,
    Both,
}

impl Arm {
    fn covers(self, other: Arm) -> bool {
        self == Arm::Both || self == other
    }
}

/// Wraps an index and delays the chosen arm(s) before answering
pub struct SlowIndex {
    inner: Arc<dyn SearchIndex>,
    arm: Arm,
    delay: Duration,
}

impl SlowIndex {
    pub fn new(inner: Arc<dyn SearchIndex>, arm: Arm, delay: Duration) -> Self {
        Self { inner, arm, delay }
    }

    async fn maybe_sleep(&self, arm: Arm) {
        if self.arm.covers(arm) {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl SearchIndex for SlowIndex {
    async fn upsert(&self, memory: &Memory) -> Result<()> {
        self.inner.upsert(memory).await
    }

    async fn lexical_query(
        &self,
        text: &str,
        filter: &SearchFilter,
        size: usize,
    ) -> Result<Vec<Hit>> {
        self.maybe_sleep(Arm::Lexical).await;
        self.inner.lexical_query(text, filter, size).await
    }

    async fn vector_query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        size: usize,
    ) -> Result<Vec<Hit>> {
        self.maybe_sleep(Arm::Vector).await;
        self.inner.vector_query(vector, filter, size).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Wraps an index and fails the chosen arm(s) with a storage error
pub struct FailingIndex {
    inner: Arc<dyn SearchIndex>,
    arm: Arm,
}

impl FailingIndex {
    pub fn new(inner: Arc<dyn SearchIndex>, arm: Arm) -> Self {
        Self { inner, arm }
    }

    fn check(&self, arm: Arm) -> Result<()> {
        if self.arm.covers(arm) {
            return Err(MemoryError::Storage(format!("{arm:?} arm failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for FailingIndex {
    async fn upsert(&self, memory: &Memory) -> Result<()> {
        self.inner.upsert(memory).await
    }

    async fn lexical_query(
        &self,
        text: &str,
        filter: &SearchFilter,
        size: usize,
    ) -> Result<Vec<Hit>> {
        self.check(Arm::Lexical)?;
        self.inner.lexical_query(text, filter, size).await
    }

    async fn vector_query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        size: usize,
    ) -> Result<Vec<Hit>> {
        self.check(Arm::Vector)?;
        self.inner.vector_query(vector, filter, size).await
    }

    async fn ping(&self) -> Result<()> {
        Err(MemoryError::UpstreamUnavailable("index unreachable".to_string()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Queue that records published tasks and never delivers them
#[derive(Debug, Default)]
pub struct RecordingQueue {
    published: Mutex<Vec<CorrelationTask>>,
}

impl RecordingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<CorrelationTask> {
        self.published
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TaskQueue for RecordingQueue {
    async fn publish(&self, task: &CorrelationTask) -> Result<String> {
        let mut tasks = self
            .published
            .lock()
            .map_err(|_| MemoryError::Storage("recording queue poisoned".to_string()))?;
        tasks.push(task.clone());
        Ok(format!("recorded-{}", tasks.len()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Queue whose publish stalls for `delay` before recording the task
#[derive(Debug)]
pub struct SlowQueue {
    inner: RecordingQueue,
    delay: Duration,
}

impl SlowQueue {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: RecordingQueue::new(),
            delay,
        }
    }

    pub fn published(&self) -> Vec<CorrelationTask> {
        self.inner.published()
    }
}

#[async_trait]
impl TaskQueue for SlowQueue {
    async fn publish(&self, task: &CorrelationTask) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(task).await
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Build a memory with an explicit id and timestamp and no vector
pub fn memory_fixture(
    id: &str,
    category: MemoryCategory,
    text: &str,
    importance: f64,
    created_at: DateTime<Utc>,
) -> Memory {
    Memory {
        id: id.to_string(),
        subject_id: "npc_blacksmith".to_string(),
        target_id: "player_1".to_string(),
        category,
        text: text.to_string(),
        vector: Vec::new(),
        tags: Vec::new(),
        importance,
        created_at,
        context: Default::default(),
    }
}

/// Hit list in the given order, with descending scores
pub fn hits(memories: &[&Memory]) -> Vec<Hit> {
    memories
        .iter()
        .enumerate()
        .map(|(i, m)| Hit {
            id: m.id.clone(),
            score: (memories.len() - i) as f64,
            memory: (*m).clone(),
        })
        .collect()
}
