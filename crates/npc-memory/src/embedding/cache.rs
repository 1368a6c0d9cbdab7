//! Content-hash embedding cache
//!
//! Keys are the SHA-256 of the input text. Entries are immutable once
//! written; two tasks racing on the same text write the same vector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::trace;

use super::EmbeddingGateway;
use crate::error::Result;
use crate::metrics;

#[derive(Debug, Clone)]
struct CacheEntry {
    vector: Arc<Vec<f32>>,
    inserted_at: Instant,
}

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingGateway>,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl std::fmt::Debug for CachedEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedEmbedder")
            .field("inner", &self.inner.name())
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingGateway>, ttl: Duration) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        let fresh = self
            .entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| Arc::clone(&e.vector));
        if fresh.is_none() {
            self.entries
                .remove_if(key, |_, e| e.inserted_at.elapsed() >= self.ttl);
        }
        fresh
    }

    /// Drop every expired entry
    pub fn purge_expired(&self) {
        self.entries
            .retain(|_, e| e.inserted_at.elapsed() < self.ttl);
    }
}

#[async_trait]
impl EmbeddingGateway for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = content_hash(text);
        if let Some(vector) = self.lookup(&key) {
            trace!(key = %key, "Embedding cache hit");
            metrics::record_cache(true);
            return Ok(vector.as_ref().clone());
        }
        metrics::record_cache(false);

        let vector = self.inner.embed(text).await?;
        self.entries.insert(
            key,
            CacheEntry {
                vector: Arc::new(vector.clone()),
                inserted_at: Instant::now(),
            },
        );
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        "cached"
    }
}
