use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MemoryError, Result};
use crate::ranking::RankingWeights;

/// Main configuration structure, resolved once at process start
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP listener configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Request-reply pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Worker admission and search execution
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Task queue adapter configuration
    #[serde(default)]
    pub queue: QueueConfig,
    /// Embedding gateway configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Search index backend configuration
    #[serde(default)]
    pub index: IndexConfig,
    /// Fusion ranking parameters
    #[serde(default)]
    pub ranking: RankingConfig,
    /// Prometheus exposition
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// How the gateway gets work executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Execute on a local executor inside the gateway process
    Sync,
    /// Publish to the task queue and wait on the reply channel
    AsyncRequestReply,
}

/// Request-reply pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_mode")]
    pub mode: PipelineMode,
    /// How long the gateway blocks waiting for a reply
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// How long an unread reply lives in the reply store
    #[serde(default = "default_reply_ttl_secs")]
    pub reply_ttl_secs: u64,
    /// Base URL of the process hosting the reply store (workers only)
    #[serde(default)]
    pub reply_store_url: Option<String>,
    /// Bound on a single reply push to a remote store
    #[serde(default = "default_reply_push_timeout_ms")]
    pub reply_push_timeout_ms: u64,
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reply_ttl(&self) -> Duration {
        Duration::from_secs(self.reply_ttl_secs)
    }

    pub fn reply_push_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_push_timeout_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: default_pipeline_mode(),
            request_timeout_secs: default_request_timeout_secs(),
            reply_ttl_secs: default_reply_ttl_secs(),
            reply_store_url: None,
            reply_push_timeout_ms: default_reply_push_timeout_ms(),
        }
    }
}

fn default_pipeline_mode() -> PipelineMode {
    PipelineMode::AsyncRequestReply
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_reply_ttl_secs() -> u64 {
    60
}

fn default_reply_push_timeout_ms() -> u64 {
    5000
}

/// Worker admission and search execution
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Maximum concurrently executing tasks per worker process
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Timeout applied to each search arm independently
    #[serde(default = "default_arm_timeout_ms")]
    pub arm_timeout_ms: u64,
    /// Upper bound on hits fetched per search arm
    #[serde(default = "default_candidate_pool_max")]
    pub candidate_pool_max: usize,
}

impl WorkerConfig {
    pub fn arm_timeout(&self) -> Duration {
        Duration::from_millis(self.arm_timeout_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            arm_timeout_ms: default_arm_timeout_ms(),
            candidate_pool_max: default_candidate_pool_max(),
        }
    }
}

fn default_max_in_flight() -> usize {
    4
}

fn default_arm_timeout_ms() -> u64 {
    2000
}

fn default_candidate_pool_max() -> usize {
    200
}

/// Task queue adapter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Worker push endpoint targeted by the direct push adapter
    #[serde(default)]
    pub push_endpoint: Option<String>,
    /// Subscription name stamped on outgoing envelopes
    #[serde(default = "default_subscription")]
    pub subscription: String,
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
    #[serde(default = "default_queue_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_queue_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            push_endpoint: None,
            subscription: default_subscription(),
            max_delivery_attempts: default_max_delivery_attempts(),
            initial_backoff_ms: default_queue_initial_backoff_ms(),
            max_backoff_ms: default_queue_max_backoff_ms(),
        }
    }
}

fn default_subscription() -> String {
    "npc-memory-tasks".to_string()
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_queue_initial_backoff_ms() -> u64 {
    200
}

fn default_queue_max_backoff_ms() -> u64 {
    5000
}

/// Which embedding gateway serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Remote OpenAI-compatible embedding service
    Primary,
    /// Deterministic local stub
    Stub,
}

/// What to do when the primary embedder is exhausted during indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFallback {
    Stub,
    None,
}

/// Embedding gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,
    #[serde(default = "default_embedding_fallback")]
    pub fallback: EmbeddingFallback,
    /// Base URL of the embedding API (e.g. "https://api.openai.com/v1")
    #[serde(default)]
    pub api_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_embedding_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Vector dimension, fixed per deployment
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts before giving up on the primary embedder
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Lifetime of a cached vector; 0 disables the cache
    #[serde(default = "default_embedding_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            fallback: default_embedding_fallback(),
            api_url: String::new(),
            api_key_env: default_embedding_api_key_env(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_embedding_max_retries(),
            initial_backoff_ms: default_embedding_initial_backoff_ms(),
            cache_ttl_secs: default_embedding_cache_ttl_secs(),
        }
    }
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::Stub
}

fn default_embedding_fallback() -> EmbeddingFallback {
    EmbeddingFallback::Stub
}

fn default_embedding_api_key_env() -> String {
    "EMBEDDING_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimension() -> usize {
    1024
}

fn default_embedding_timeout_secs() -> u64 {
    10
}

fn default_embedding_max_retries() -> u32 {
    3
}

fn default_embedding_initial_backoff_ms() -> u64 {
    100
}

fn default_embedding_cache_ttl_secs() -> u64 {
    600
}

/// Search index backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackend {
    Memory,
    Elasticsearch,
}

/// Search index backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_backend")]
    pub backend: IndexBackend,
    /// Elasticsearch base URL
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    /// Environment variable holding an Elasticsearch API key (optional)
    #[serde(default = "default_index_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            url: String::new(),
            index_name: default_index_name(),
            api_key_env: default_index_api_key_env(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_index_backend() -> IndexBackend {
    IndexBackend::Memory
}

fn default_index_name() -> String {
    "npc_memories".to_string()
}

fn default_index_api_key_env() -> String {
    "ES_API_KEY".to_string()
}

fn default_index_timeout_secs() -> u64 {
    10
}

/// Prometheus exposition
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Serve `GET /metrics` on every router
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

/// Whether a category filter excludes or merely penalizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilterMode {
    Soft,
    Hard,
}

/// Fusion ranking parameters
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_decay_lambda")]
    pub decay_lambda: f64,
    #[serde(default = "default_importance_floor")]
    pub importance_floor: f64,
    #[serde(default = "default_category_mismatch_penalty")]
    pub category_mismatch_penalty: f64,
    #[serde(default = "default_arm_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_arm_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_category_filter")]
    pub category_filter: CategoryFilterMode,
}

impl RankingConfig {
    pub fn weights(&self) -> RankingWeights {
        RankingWeights {
            rrf_k: self.rrf_k,
            decay_lambda: self.decay_lambda,
            importance_floor: self.importance_floor,
            category_mismatch_penalty: self.category_mismatch_penalty,
            lexical_weight: self.lexical_weight,
            vector_weight: self.vector_weight,
        }
    }
}

impl RankingConfig {
    /// Reject values that would break the fusion arithmetic
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> {
            Err(MemoryError::Config(format!("ranking.{msg}")))
        };

        if !self.rrf_k.is_finite() || self.rrf_k < 0.0 {
            return invalid(format!("rrf_k must be >= 0, got {}", self.rrf_k));
        }
        if !(0.0..=1.0).contains(&self.importance_floor) {
            return invalid(format!(
                "importance_floor must be within [0, 1], got {}",
                self.importance_floor
            ));
        }
        if !(0.0..=1.0).contains(&self.category_mismatch_penalty) {
            return invalid(format!(
                "category_mismatch_penalty must be within [0, 1], got {}",
                self.category_mismatch_penalty
            ));
        }
        if !self.decay_lambda.is_finite() || self.decay_lambda < 0.0 {
            return invalid(format!(
                "decay_lambda must be >= 0, got {}",
                self.decay_lambda
            ));
        }
        for (name, weight) in [
            ("lexical_weight", self.lexical_weight),
            ("vector_weight", self.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return invalid(format!("{name} must be >= 0, got {weight}"));
            }
        }
        if self.lexical_weight == 0.0 && self.vector_weight == 0.0 {
            return invalid("lexical_weight and vector_weight cannot both be 0".to_string());
        }
        Ok(())
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            decay_lambda: default_decay_lambda(),
            importance_floor: default_importance_floor(),
            category_mismatch_penalty: default_category_mismatch_penalty(),
            lexical_weight: default_arm_weight(),
            vector_weight: default_arm_weight(),
            category_filter: default_category_filter(),
        }
    }
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_decay_lambda() -> f64 {
    0.01
}

fn default_importance_floor() -> f64 {
    0.2
}

fn default_category_mismatch_penalty() -> f64 {
    0.35
}

fn default_arm_weight() -> f64 {
    1.0
}

fn default_category_filter() -> CategoryFilterMode {
    CategoryFilterMode::Soft
}

impl Config {
    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| MemoryError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.worker.max_in_flight == 0 {
            return Err(MemoryError::Config(
                "worker.max_in_flight must be at least 1".to_string(),
            ));
        }
        self.ranking.validate()
    }

    /// Default lookup locations, in priority order
    pub fn default_paths() -> Vec<PathBuf> {
        [
            dirs::home_dir().map(|h| h.join(".npc-memory").join("config.toml")),
            dirs::config_dir().map(|c| c.join("npc-memory").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Load from an explicit path, else the first existing default path,
    /// else built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in Self::default_paths() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(&path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.pipeline.mode, PipelineMode::AsyncRequestReply);
        assert_eq!(config.pipeline.request_timeout_secs, 25);
        assert_eq!(config.pipeline.reply_ttl_secs, 60);
        assert!(config.pipeline.reply_store_url.is_none());
        assert_eq!(config.pipeline.reply_push_timeout(), Duration::from_secs(5));
        assert_eq!(config.worker.max_in_flight, 4);
        assert_eq!(config.worker.arm_timeout_ms, 2000);
        assert_eq!(config.worker.candidate_pool_max, 200);
        assert_eq!(config.queue.max_delivery_attempts, 5);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Stub);
        assert_eq!(config.embedding.fallback, EmbeddingFallback::Stub);
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.index.backend, IndexBackend::Memory);
        assert_eq!(config.index.index_name, "npc_memories");
        assert_eq!(config.ranking.rrf_k, 60.0);
        assert_eq!(config.ranking.category_filter, CategoryFilterMode::Soft);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[server]
listen_addr = "0.0.0.0:9000"

[pipeline]
mode = "sync"
request_timeout_secs = 5
reply_ttl_secs = 30
reply_store_url = "http://gateway:9000"

[worker]
max_in_flight = 16
arm_timeout_ms = 500

[queue]
push_endpoint = "http://worker:9001/pubsub/push"
subscription = "tasks-sub"

[embedding]
provider = "primary"
fallback = "none"
api_url = "https://api.openai.com/v1"
model = "text-embedding-3-large"
dimension = 3072

[index]
backend = "elasticsearch"
url = "http://localhost:9200"
index_name = "memories_v2"

[ranking]
rrf_k = 40.0
decay_lambda = 0.02
lexical_weight = 0.5
vector_weight = 0.5
category_filter = "hard"

[metrics]
enabled = false
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse TOML");

        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.pipeline.mode, PipelineMode::Sync);
        assert_eq!(config.pipeline.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.pipeline.reply_ttl(), Duration::from_secs(30));
        assert_eq!(
            config.pipeline.reply_store_url.as_deref(),
            Some("http://gateway:9000")
        );
        assert_eq!(config.worker.max_in_flight, 16);
        assert_eq!(config.worker.arm_timeout(), Duration::from_millis(500));
        assert_eq!(
            config.queue.push_endpoint.as_deref(),
            Some("http://worker:9001/pubsub/push")
        );
        assert_eq!(config.queue.subscription, "tasks-sub");
        assert_eq!(config.embedding.provider, EmbeddingProvider::Primary);
        assert_eq!(config.embedding.fallback, EmbeddingFallback::None);
        assert_eq!(config.embedding.dimension, 3072);
        assert_eq!(config.index.backend, IndexBackend::Elasticsearch);
        assert_eq!(config.index.index_name, "memories_v2");

        let weights = config.ranking.weights();
        assert_eq!(weights.rrf_k, 40.0);
        assert_eq!(weights.decay_lambda, 0.02);
        assert_eq!(weights.lexical_weight, 0.5);
        assert_eq!(weights.importance_floor, 0.2);
        assert_eq!(config.ranking.category_filter, CategoryFilterMode::Hard);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_toml_partial_deserialization() {
        let toml_str = r#"
[worker]
max_in_flight = 2
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to parse partial TOML");

        assert_eq!(config.worker.max_in_flight, 2);
        assert_eq!(config.worker.arm_timeout_ms, 2000);
        assert_eq!(config.pipeline.mode, PipelineMode::AsyncRequestReply);
        assert_eq!(config.ranking.category_mismatch_penalty, 0.35);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_ranking_validation() {
        let bad_k = RankingConfig {
            rrf_k: -1.0,
            ..Default::default()
        };
        assert_eq!(bad_k.validate().unwrap_err().kind(), "config");

        let bad_floor = RankingConfig {
            importance_floor: 1.5,
            ..Default::default()
        };
        assert!(bad_floor.validate().unwrap_err().to_string().contains("importance_floor"));

        let no_arms = RankingConfig {
            lexical_weight: 0.0,
            vector_weight: 0.0,
            ..Default::default()
        };
        assert!(no_arms.validate().is_err());

        let vector_only = RankingConfig {
            lexical_weight: 0.0,
            ..Default::default()
        };
        assert!(vector_only.validate().is_ok());
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let toml_str = r#"
[pipeline]
mode = "fire_and_forget"
"#;

        let result: std::result::Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }
}
