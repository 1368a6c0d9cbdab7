//! Gateway HTTP API
//!
//! - `POST /memories` writes one memory and waits for the worker
//! - `GET /search` runs hybrid retrieval
//! - `GET /context` wraps a search into a dialogue context block
//! - `GET /health`, `GET /ready`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use super::RequestGateway;
use crate::error::MemoryError;
use crate::index::SearchIndex;
use crate::memory::{MemoryCategory, MemoryContext, RankedMemory};
use crate::task::{DEFAULT_IMPORTANCE, DEFAULT_TOP_K, IndexPayload, SearchPayload};

pub const MAX_TOP_K: usize = 50;
pub const MAX_TEXT_CHARS: usize = 2000;
const DEFAULT_CONTEXT_MEMORIES: usize = 10;

/// Error wrapper rendering `{"error": {"type", "message"}}`
#[derive(Debug)]
pub struct ApiError(pub MemoryError);

impl From<MemoryError> for ApiError {
    fn from(e: MemoryError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            MemoryError::InvalidInput(_) | MemoryError::MalformedTask(_) => StatusCode::BAD_REQUEST,
            MemoryError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            MemoryError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            MemoryError::AdmissionRejected => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(
                error_type = self.0.kind(),
                error_message = %self.0,
                status = status.as_u16(),
                "Request failed"
            );
        } else {
            warn!(
                error_type = self.0.kind(),
                error_message = %self.0,
                status = status.as_u16(),
                "Request rejected"
            );
        }

        let body = json!({
            "error": {
                "type": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

fn invalid(msg: impl Into<String>) -> ApiError {
    ApiError(MemoryError::InvalidInput(msg.into()))
}

/// Shared handler state
#[derive(Clone)]
pub struct GatewayState {
    pub gateway: RequestGateway,
    /// Pinged by `/ready` when this process talks to the index itself
    pub index: Option<Arc<dyn SearchIndex>>,
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("gateway", &self.gateway)
            .field("index", &self.index.as_ref().map(|i| i.name()))
            .finish()
    }
}

pub fn create_gateway_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/memories", post(write_memory_handler))
        .route("/search", get(search_handler))
        .route("/context", get(context_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WriteMemoryRequest {
    pub subject_id: String,
    pub target_id: String,
    pub category: MemoryCategory,
    pub text: String,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl WriteMemoryRequest {
    fn into_payload(self) -> Result<IndexPayload, ApiError> {
        require("subject_id", &self.subject_id)?;
        require("target_id", &self.target_id)?;
        require("text", &self.text)?;
        if self.text.chars().count() > MAX_TEXT_CHARS {
            return Err(invalid(format!("text exceeds {MAX_TEXT_CHARS} characters")));
        }
        let importance = self.importance.unwrap_or(DEFAULT_IMPORTANCE);
        if !(0.0..=1.0).contains(&importance) {
            return Err(invalid(format!("importance {importance} outside [0, 1]")));
        }

        Ok(IndexPayload {
            subject_id: self.subject_id,
            target_id: self.target_id,
            category: self.category,
            text: self.text,
            importance,
            tags: self.tags,
            context: self.context,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct WriteMemoryResponse {
    pub correlation_id: String,
    pub memory_id: String,
    pub status: &'static str,
    pub degraded_embedding: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub subject_id: String,
    pub target_id: String,
    pub query_text: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Comma-separated categories
    #[serde(default)]
    pub category_filter: Option<String>,
    #[serde(default)]
    pub max_age_days: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub memories: Vec<RankedMemory>,
    pub total: usize,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded_arms: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContextParams {
    pub subject_id: String,
    pub target_id: String,
    pub query_text: String,
    #[serde(default)]
    pub max_memories: Option<usize>,
}

fn require(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn bounded(field: &str, value: Option<usize>, default: usize) -> Result<usize, ApiError> {
    let value = value.unwrap_or(default);
    if !(1..=MAX_TOP_K).contains(&value) {
        return Err(invalid(format!("{field} must be between 1 and {MAX_TOP_K}")));
    }
    Ok(value)
}

/// Parse `"quest, dialogue"` into categories; blanks are skipped
pub fn parse_category_filter(raw: &str) -> Result<Vec<MemoryCategory>, MemoryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

impl SearchParams {
    fn into_payload(self) -> Result<SearchPayload, ApiError> {
        require("subject_id", &self.subject_id)?;
        require("target_id", &self.target_id)?;
        require("query_text", &self.query_text)?;
        let top_k = bounded("top_k", self.top_k, DEFAULT_TOP_K)?;

        let category_filter = match self.category_filter.as_deref() {
            Some(raw) => Some(parse_category_filter(raw)?).filter(|c| !c.is_empty()),
            None => None,
        };

        if let Some(days) = self.max_age_days {
            if days.is_nan() || days < 0.0 {
                return Err(invalid("max_age_days must be non-negative"));
            }
        }

        Ok(SearchPayload {
            subject_id: self.subject_id,
            target_id: self.target_id,
            query_text: self.query_text,
            top_k,
            category_filter,
            max_age_days: self.max_age_days,
        })
    }
}

async fn write_memory_handler(
    State(state): State<Arc<GatewayState>>,
    request: Result<Json<WriteMemoryRequest>, JsonRejection>,
) -> Result<Json<WriteMemoryResponse>, ApiError> {
    let Json(request) = request.map_err(|e| invalid(e.body_text()))?;
    let payload = request.into_payload()?;

    let (correlation_id, result) = state.gateway.write_memory(payload).await?;
    Ok(Json(WriteMemoryResponse {
        correlation_id,
        memory_id: result.memory_id,
        status: "completed",
        degraded_embedding: result.degraded_embedding,
    }))
}

async fn search_handler(
    State(state): State<Arc<GatewayState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    let Query(params) = params.map_err(|e| invalid(e.body_text()))?;
    let payload = params.into_payload()?;

    let result = state.gateway.search(payload).await?;
    Ok(Json(SearchResponse {
        total: result.memories.len(),
        memories: result.memories,
        elapsed_ms: started.elapsed().as_millis() as u64,
        degraded_arms: result.degraded_arms,
    }))
}

async fn context_handler(
    State(state): State<Arc<GatewayState>>,
    params: Result<Query<ContextParams>, QueryRejection>,
) -> Result<Json<MemoryContext>, ApiError> {
    let Query(params) = params.map_err(|e| invalid(e.body_text()))?;
    require("subject_id", &params.subject_id)?;
    require("target_id", &params.target_id)?;
    require("query_text", &params.query_text)?;
    let max_memories = bounded("max_memories", params.max_memories, DEFAULT_CONTEXT_MEMORIES)?;

    let context = state
        .gateway
        .context(SearchPayload {
            subject_id: params.subject_id,
            target_id: params.target_id,
            query_text: params.query_text,
            top_k: max_memories,
            category_filter: None,
            max_age_days: None,
        })
        .await?;
    Ok(Json(context))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "role": "gateway"}))
}

async fn ready_handler(State(state): State<Arc<GatewayState>>) -> Response {
    let Some(index) = &state.index else {
        return Json(json!({"status": "ready"})).into_response();
    };
    match index.ping().await {
        Ok(()) => Json(json!({"status": "ready", "index": index.name()})).into_response(),
        Err(e) => {
            warn!(error_type = e.kind(), error_message = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not_ready", "index": index.name(), "reason": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(MemoryError::InvalidInput("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(MemoryError::MalformedTask("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(MemoryError::UpstreamUnavailable("x".into())).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError(MemoryError::GatewayTimeout {
                correlation_id: "c".into(),
                timeout: Duration::from_secs(1)
            })
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ApiError(MemoryError::AdmissionRejected).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError(MemoryError::Storage("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_parse_category_filter() {
        assert_eq!(
            parse_category_filter("quest, dialogue,").unwrap(),
            vec![MemoryCategory::Quest, MemoryCategory::Dialogue]
        );
        assert!(parse_category_filter("quest,romance").is_err());
        assert!(parse_category_filter(" , ").unwrap().is_empty());
    }

    #[test]
    fn test_search_params_bounds() {
        let params = SearchParams {
            subject_id: "a".into(),
            target_id: "b".into(),
            query_text: "q".into(),
            top_k: Some(51),
            category_filter: None,
            max_age_days: None,
        };
        assert!(params.into_payload().is_err());

        let params = SearchParams {
            subject_id: "a".into(),
            target_id: "b".into(),
            query_text: "q".into(),
            top_k: None,
            category_filter: Some("gift".into()),
            max_age_days: Some(3.5),
        };
        let payload = params.into_payload().unwrap();
        assert_eq!(payload.top_k, DEFAULT_TOP_K);
        assert_eq!(payload.category_filter, Some(vec![MemoryCategory::Gift]));
    }

    #[test]
    fn test_write_request_defaults_importance() {
        let request: WriteMemoryRequest = serde_json::from_value(json!({
            "subject_id": "npc", "target_id": "p", "category": "gift", "text": "a flower"
        }))
        .unwrap();
        let payload = request.into_payload().unwrap();
        assert_eq!(payload.importance, DEFAULT_IMPORTANCE);
    }
}
