//! Prometheus metrics
//!
//! Call sites record through the `metrics` facade; the binary installs a
//! Prometheus recorder once and both routers expose it at `GET /metrics`.
//! Without an installed recorder every call is a no-op.

use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::get,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

use crate::error::{MemoryError, Result};

pub const CACHE_HITS: &str = "npc_memory_cache_hits_total";
pub const CACHE_MISSES: &str = "npc_memory_cache_misses_total";
pub const EMBEDDING_REQUESTS: &str = "npc_memory_embedding_requests_total";
pub const EMBEDDING_LATENCY: &str = "npc_memory_embedding_latency_seconds";
pub const WORKER_DELIVERIES: &str = "npc_memory_worker_deliveries_total";
pub const ADMISSION_REJECTED: &str = "npc_memory_admission_rejected_total";
pub const WORKER_PROCESSED: &str = "npc_memory_worker_messages_processed_total";
pub const DEGRADED_ARMS: &str = "npc_memory_search_degraded_arms_total";
pub const GATEWAY_REQUESTS: &str = "npc_memory_gateway_requests_total";
pub const GATEWAY_LATENCY: &str = "npc_memory_gateway_latency_seconds";

const EMBEDDING_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const GATEWAY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Processing outcome label for `npc_memory_worker_messages_processed_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Success,
    Error,
    Malformed,
    Discarded,
}

impl Processed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Processed::Success => "success",
            Processed::Error => "error",
            Processed::Malformed => "malformed",
            Processed::Discarded => "discarded",
        }
    }
}

/// Recorder with histogram buckets configured; not installed globally
pub fn build_recorder() -> Result<PrometheusRecorder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(EMBEDDING_LATENCY.to_string()), EMBEDDING_BUCKETS)
        .and_then(|b| {
            b.set_buckets_for_metric(Matcher::Full(GATEWAY_LATENCY.to_string()), GATEWAY_BUCKETS)
        })
        .map(PrometheusBuilder::build_recorder)
        .map_err(|e| MemoryError::Config(format!("invalid metrics buckets: {e}")))
}

/// Install the process-wide recorder and return a handle for rendering
pub fn install() -> Result<PrometheusHandle> {
    let recorder = build_recorder()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|_| MemoryError::Config("metrics recorder already installed".to_string()))?;
    describe();
    Ok(handle)
}

fn describe() {
    describe_counter!(CACHE_HITS, "Embedding cache hits");
    describe_counter!(CACHE_MISSES, "Embedding cache misses");
    describe_counter!(EMBEDDING_REQUESTS, "Embedding requests by status");
    describe_histogram!(EMBEDDING_LATENCY, "Embedding latency including retries");
    describe_counter!(WORKER_DELIVERIES, "Push deliveries received by the worker");
    describe_counter!(ADMISSION_REJECTED, "Deliveries rejected at capacity");
    describe_counter!(WORKER_PROCESSED, "Deliveries processed by outcome");
    describe_counter!(DEGRADED_ARMS, "Search arms dropped after timing out");
    describe_counter!(GATEWAY_REQUESTS, "Gateway requests by operation and outcome");
    describe_histogram!(GATEWAY_LATENCY, "Gateway request latency");
}

/// `GET /metrics` in the Prometheus text format
pub fn metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(handle)
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

pub fn record_cache(hit: bool) {
    if hit {
        counter!(CACHE_HITS).increment(1);
    } else {
        counter!(CACHE_MISSES).increment(1);
    }
}

pub fn record_embedding(success: bool, elapsed: Duration) {
    let status = if success { "success" } else { "error" };
    counter!(EMBEDDING_REQUESTS, "status" => status).increment(1);
    histogram!(EMBEDDING_LATENCY).record(elapsed.as_secs_f64());
}

pub fn record_embedding_fallback() {
    counter!(EMBEDDING_REQUESTS, "status" => "fallback").increment(1);
}

pub fn record_delivery() {
    counter!(WORKER_DELIVERIES).increment(1);
}

pub fn record_admission_rejected() {
    counter!(ADMISSION_REJECTED).increment(1);
}

pub fn record_processed(outcome: Processed) {
    counter!(WORKER_PROCESSED, "status" => outcome.as_str()).increment(1);
}

pub fn record_degraded_arm(arm: &'static str) {
    counter!(DEGRADED_ARMS, "arm" => arm).increment(1);
}

pub fn record_gateway(operation: &'static str, outcome: &'static str, elapsed: Duration) {
    counter!(GATEWAY_REQUESTS, "operation" => operation, "outcome" => outcome).increment(1);
    histogram!(GATEWAY_LATENCY, "operation" => operation).record(elapsed.as_secs_f64());
}
