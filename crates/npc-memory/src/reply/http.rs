//! HTTP surface over a reply store
//!
//! The gateway hosts its store at `/internal/replies/{key}` so workers in other
//! processes can push replies into it:
//!
//! - `POST /internal/replies/{key}?ttl_ms=N` with the payload as body -> `204`
//! - `GET /internal/replies/{key}?timeout_ms=N` -> `200` with the payload, or `204` when none arrived

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error};
use url::Url;

use super::ReplyChannel;
use crate::error::{MemoryError, Result};

/// Upper bound on a single long-poll wait
pub const MAX_LONG_POLL: Duration = Duration::from_secs(60);

/// Slack added to the HTTP client timeout on top of the long-poll wait
const LONG_POLL_SLACK: Duration = Duration::from_secs(5);

/// Default bound on a single reply push
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct PushParams {
    #[serde(default = "default_ttl_ms")]
    ttl_ms: u64,
}

fn default_ttl_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize)]
struct PopParams {
    #[serde(default)]
    timeout_ms: u64,
}

/// Router exposing `channel` to remote workers
pub fn reply_routes(channel: Arc<dyn ReplyChannel>) -> Router {
    Router::new()
        .route("/internal/replies/{key}", post(push_reply).get(pop_reply))
        .with_state(channel)
}

async fn push_reply(
    State(channel): State<Arc<dyn ReplyChannel>>,
    Path(key): Path<String>,
    Query(params): Query<PushParams>,
    body: String,
) -> Response {
    match channel
        .push(&key, body, Duration::from_millis(params.ttl_ms))
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(key = %key, error_type = e.kind(), error_message = %e, "Reply push failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn pop_reply(
    State(channel): State<Arc<dyn ReplyChannel>>,
    Path(key): Path<String>,
    Query(params): Query<PopParams>,
) -> Response {
    let timeout = Duration::from_millis(params.timeout_ms).min(MAX_LONG_POLL);
    match channel.blocking_pop(&key, timeout).await {
        Ok(Some(payload)) => (StatusCode::OK, payload).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(key = %key, error_type = e.kind(), error_message = %e, "Reply pop failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

/// Client for a reply store hosted by another process
#[derive(Debug, Clone)]
pub struct HttpReplyChannel {
    client: Client,
    base: Url,
    push_timeout: Duration,
}

impl HttpReplyChannel {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| MemoryError::Config(format!("invalid reply store url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(MemoryError::Config(format!(
                "reply store url {base_url} cannot be a base"
            )));
        }
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| MemoryError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base,
            push_timeout: DEFAULT_PUSH_TIMEOUT,
        })
    }

    /// Bound on each push; a stalled store fails the push instead of pinning the caller
    pub fn with_push_timeout(mut self, timeout: Duration) -> Self {
        self.push_timeout = timeout;
        self
    }

    fn key_url(&self, key: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MemoryError::Config("reply store url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["internal", "replies", key]);
        Ok(url)
    }
}

fn unavailable(e: impl std::fmt::Display) -> MemoryError {
    MemoryError::UpstreamUnavailable(format!("reply store: {e}"))
}

#[async_trait]
impl ReplyChannel for HttpReplyChannel {
    async fn push(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let mut url = self.key_url(key)?;
        // Sub-millisecond TTLs round up to 1ms
        let ttl_ms = ttl.as_millis().max(1);
        url.query_pairs_mut()
            .append_pair("ttl_ms", &ttl_ms.to_string());

        let response = self
            .client
            .post(url)
            .timeout(self.push_timeout)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(unavailable)?;

        if !response.status().is_success() {
            return Err(unavailable(format!("push returned {}", response.status())));
        }
        debug!(key = %key, "Reply pushed to remote store");
        Ok(())
    }

    async fn blocking_pop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let timeout = timeout.min(MAX_LONG_POLL);
        let mut url = self.key_url(key)?;
        url.query_pairs_mut()
            .append_pair("timeout_ms", &timeout.as_millis().to_string());

        let response = self
            .client
            .get(url)
            .timeout(timeout + LONG_POLL_SLACK)
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.text().await.map_err(unavailable)?)),
            StatusCode::NO_CONTENT => Ok(None),
            other => Err(unavailable(format!("pop returned {other}"))),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}
