//! Embedding gateways
//!
//! Text goes in, fixed-dimension vectors come out. The primary gateway talks
//! to a remote OpenAI-compatible service; the stub derives vectors from a
//! content hash and doubles as the degraded fallback for indexing.

mod cache;
mod remote;
mod retry;
mod stub;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingConfig, EmbeddingFallback, EmbeddingProvider};
use crate::error::Result;

pub use cache::CachedEmbedder;
pub use remote::RemoteEmbedder;
pub use retry::{RetryPolicy, embed_with_retry};
pub use stub::StubEmbedder;

#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Build the configured primary gateway, cached when `cache_ttl_secs > 0`
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>> {
    let primary: Arc<dyn EmbeddingGateway> = match config.provider {
        EmbeddingProvider::Stub => Arc::new(StubEmbedder::new(config.dimension)),
        EmbeddingProvider::Primary => Arc::new(RemoteEmbedder::new(config)?),
    };

    if config.cache_ttl_secs == 0 {
        return Ok(primary);
    }
    Ok(Arc::new(CachedEmbedder::new(
        primary,
        std::time::Duration::from_secs(config.cache_ttl_secs),
    )))
}

/// Degraded gateway used when the primary is exhausted during indexing
pub fn build_fallback(config: &EmbeddingConfig) -> Option<Arc<dyn EmbeddingGateway>> {
    match config.fallback {
        EmbeddingFallback::Stub => Some(Arc::new(StubEmbedder::new(config.dimension))),
        EmbeddingFallback::None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_stub_embedder_with_cache() {
        let config = EmbeddingConfig {
            dimension: 16,
            ..Default::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.name(), "cached");
        assert_eq!(embedder.dimension(), 16);
        assert_eq!(embedder.embed("hi").await.unwrap().len(), 16);
    }

    #[test]
    fn test_build_fallback() {
        let mut config = EmbeddingConfig::default();
        assert!(build_fallback(&config).is_some());
        config.fallback = EmbeddingFallback::None;
        assert!(build_fallback(&config).is_none());
    }

    #[test]
    fn test_primary_requires_api_url() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::Primary,
            ..Default::default()
        };
        assert!(build_embedder(&config).is_err());
    }
}
