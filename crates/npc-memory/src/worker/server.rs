//! Worker HTTP surface: push endpoint plus liveness and readiness

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::push::{DeliveryOutcome, PushWorker};

/// Seconds suggested to the queue before redelivering a rejected message
pub const RETRY_AFTER_SECS: u64 = 1;

impl IntoResponse for DeliveryOutcome {
    fn into_response(self) -> Response {
        match self {
            DeliveryOutcome::Completed { correlation_id, .. } => (
                StatusCode::OK,
                Json(json!({"status": "ok", "correlation_id": correlation_id})),
            )
                .into_response(),
            DeliveryOutcome::Discarded(_) => StatusCode::NO_CONTENT.into_response(),
            DeliveryOutcome::Rejected => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": {
                        "type": "admission_rejected",
                        "message": "At capacity, retry later"
                    }})),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
                response
            }
            DeliveryOutcome::Retry(reason) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": {"type": "upstream_unavailable", "message": reason}})),
            )
                .into_response(),
        }
    }
}

/// Routes served by a worker process
pub fn create_worker_router(worker: Arc<PushWorker>) -> Router {
    Router::new()
        .route("/pubsub/push", post(push_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(worker)
}

async fn push_handler(State(worker): State<Arc<PushWorker>>, body: Bytes) -> DeliveryOutcome {
    worker.deliver(&body).await
}

async fn health_handler(State(worker): State<Arc<PushWorker>>) -> Json<serde_json::Value> {
    let gate = worker.gate();
    Json(json!({
        "status": "ok",
        "role": "worker",
        "in_flight": gate.in_flight(),
        "max_in_flight": gate.max_in_flight(),
    }))
}

async fn ready_handler(State(worker): State<Arc<PushWorker>>) -> Response {
    let index = worker.executor().index();
    match index.ping().await {
        Ok(()) => Json(json!({"status": "ready", "index": index.name()})).into_response(),
        Err(e) => {
            tracing::warn!(error_type = e.kind(), error_message = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not_ready", "index": index.name(), "reason": e.to_string()})),
            )
                .into_response()
        }
    }
}
