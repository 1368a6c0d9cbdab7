//! Remote embedding gateway using OpenAI-compatible APIs
//!
//! Calls `POST {api_url}/embeddings` with `{model, input}` and reads
//! `data[].embedding`. Retries are left to [`super::embed_with_retry`] so the
//! executor controls backoff and fallback.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::EmbeddingGateway;
use crate::config::EmbeddingConfig;
use crate::error::{MemoryError, Result};

#[derive(Debug)]
pub struct RemoteEmbedder {
    client: Client,
    url: String,
    model: String,
    dimension: usize,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl RemoteEmbedder {
    /// Build a client for `config.api_url`.
    ///
    /// The API key is read from `config.api_key_env` when set; local
    /// OpenAI-compatible servers often need none.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            return Err(MemoryError::Config(
                "embedding.api_url is required for the primary provider".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Config(format!("failed to build HTTP client: {e}")))?;

        let api_key = env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

        info!(
            "RemoteEmbedder initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            url: format!("{}/embeddings", config.api_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimension: config.dimension,
            api_key,
        })
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        debug!(url = %self.url, count = input.len(), "Requesting embeddings");
        let response = builder
            .send()
            .await
            .map_err(|e| MemoryError::UpstreamUnavailable(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, error_text));
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            MemoryError::UpstreamUnavailable(format!("unparseable embedding response: {e}"))
        })?;

        if parsed.data.len() != input.len() {
            return Err(MemoryError::UpstreamUnavailable(format!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                input.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        parsed
            .data
            .into_iter()
            .map(|d| {
                if d.embedding.len() == self.dimension {
                    Ok(d.embedding)
                } else {
                    Err(MemoryError::UpstreamUnavailable(format!(
                        "embedding dimension {} does not match configured {}",
                        d.embedding.len(),
                        self.dimension
                    )))
                }
            })
            .collect()
    }
}

/// 429 and 5xx are transient; any other 4xx is permanent
fn status_error(status: reqwest::StatusCode, body: String) -> MemoryError {
    let message = format!("embedding API returned {status}: {body}");
    if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
        MemoryError::Config(message)
    } else {
        MemoryError::UpstreamUnavailable(message)
    }
}

#[async_trait]
impl EmbeddingGateway for RemoteEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::UpstreamUnavailable("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_error_classification() {
        let unauthorized = status_error(StatusCode::UNAUTHORIZED, "bad key".to_string());
        assert_eq!(unauthorized.kind(), "config");
        assert!(!unauthorized.is_transient());

        assert!(!status_error(StatusCode::NOT_FOUND, String::new()).is_transient());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
    }
}
