//! Search index abstraction
//!
//! The index owns memory documents once written. Two adapters ship here: an
//! in-process index for tests and single-node runs, and an Elasticsearch
//! REST adapter.

mod elastic;
mod filter;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{IndexBackend, IndexConfig};
use crate::error::Result;
use crate::memory::Memory;

pub use elastic::ElasticIndex;
pub use filter::SearchFilter;
pub use memory::InMemoryIndex;

/// One ranked hit from a single search arm
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    /// Engine-native relevance; only the order matters to fusion
    pub score: f64,
    pub memory: Memory,
}

/// Storage and retrieval over memory documents
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or overwrite the document stored under `memory.id`
    async fn upsert(&self, memory: &Memory) -> Result<()>;

    /// Full-text relevance over `text`, best first
    async fn lexical_query(&self, text: &str, filter: &SearchFilter, size: usize)
    -> Result<Vec<Hit>>;

    /// Cosine similarity over `vector`, best first
    async fn vector_query(
        &self,
        vector: &[f32],
        filter: &SearchFilter,
        size: usize,
    ) -> Result<Vec<Hit>>;

    /// Readiness check against the backend
    async fn ping(&self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Build the configured index backend
pub async fn build_index(config: &IndexConfig, dimension: usize) -> Result<Arc<dyn SearchIndex>> {
    match config.backend {
        IndexBackend::Memory => Ok(Arc::new(InMemoryIndex::new(dimension))),
        IndexBackend::Elasticsearch => {
            let index = ElasticIndex::new(config, dimension)?;
            index.ensure_index().await?;
            Ok(Arc::new(index))
        }
    }
}
