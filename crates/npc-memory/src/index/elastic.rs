//! Elasticsearch REST adapter
//!
//! Documents are written with `PUT /{index}/_doc/{id}`, so a replayed task
//! overwrites its earlier document. The vector arm uses a `script_score`
//! query over a `dense_vector` field.

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Hit, SearchFilter, SearchIndex};
use crate::config::IndexConfig;
use crate::error::{MemoryError, Result};
use crate::memory::{Memory, MemoryCategory};

const VECTOR_FIELD: &str = "content_vector";

/// Elasticsearch-backed index
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: String,
    index_name: String,
    dimension: usize,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct DocumentRef<'a> {
    subject_id: &'a str,
    target_id: &'a str,
    category: MemoryCategory,
    text: &'a str,
    content_vector: &'a [f32],
    tags: &'a [String],
    importance: f64,
    created_at: DateTime<Utc>,
    context: &'a BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct StoredDocument {
    subject_id: String,
    target_id: String,
    category: MemoryCategory,
    text: String,
    #[serde(default)]
    content_vector: Vec<f32>,
    #[serde(default)]
    tags: Vec<String>,
    importance: f64,
    created_at: DateTime<Utc>,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source")]
    source: StoredDocument,
}

impl RawHit {
    fn into_hit(self) -> Hit {
        let doc = self.source;
        Hit {
            id: self.id.clone(),
            score: self.score.unwrap_or(0.0),
            memory: Memory {
                id: self.id,
                subject_id: doc.subject_id,
                target_id: doc.target_id,
                category: doc.category,
                text: doc.text,
                vector: doc.content_vector,
                tags: doc.tags,
                importance: doc.importance,
                created_at: doc.created_at,
                context: doc.context,
            },
        }
    }
}

fn upstream(context: &str, e: impl std::fmt::Display) -> MemoryError {
    MemoryError::UpstreamUnavailable(format!("elasticsearch {context}: {e}"))
}

impl ElasticIndex {
    /// Create a client for `config.url`. The API key env var is optional.
    pub fn new(config: &IndexConfig, dimension: usize) -> Result<Self> {
        if config.url.trim().is_empty() {
            return Err(MemoryError::Config(
                "index.url is required for the elasticsearch backend".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Config(format!("failed to build HTTP client: {e}")))?;

        let api_key = env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

        info!(
            url = %config.url,
            index = %config.index_name,
            dimension,
            authenticated = api_key.is_some(),
            "ElasticIndex initialized"
        );

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            index_name: config.index_name.clone(),
            dimension,
            api_key,
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("ApiKey {key}")),
            None => builder,
        }
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, self.index_name)
    }

    /// Mapping used when the index does not exist yet
    pub fn mapping(&self) -> Value {
        json!({
            "mappings": {
                "properties": {
                    "subject_id": {"type": "keyword"},
                    "target_id": {"type": "keyword"},
                    "category": {"type": "keyword"},
                    "text": {"type": "text"},
                    VECTOR_FIELD: {
                        "type": "dense_vector",
                        "dims": self.dimension,
                        "index": true,
                        "similarity": "cosine"
                    },
                    "tags": {"type": "keyword"},
                    "importance": {"type": "float"},
                    "created_at": {"type": "date"},
                    "context": {"type": "object", "dynamic": true}
                }
            }
        })
    }

    /// Create the index with the dense-vector mapping unless it already exists
    pub async fn ensure_index(&self) -> Result<()> {
        let url = self.index_url();
        let response = self
            .authorized(self.client.head(&url))
            .send()
            .await
            .map_err(|e| upstream("index lookup", e))?;

        match response.status() {
            s if s.is_success() => {
                debug!(index = %self.index_name, "Index already exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                let response = self
                    .authorized(self.client.put(&url))
                    .json(&self.mapping())
                    .send()
                    .await
                    .map_err(|e| upstream("index create", e))?;
                check_status("index create", response).await?;
                info!(index = %self.index_name, "Created index");
                Ok(())
            }
            other => Err(upstream("index lookup", format!("status {other}"))),
        }
    }

    fn filter_clauses(filter: &SearchFilter) -> Vec<Value> {
        let mut clauses = vec![
            json!({"term": {"subject_id": filter.subject_id}}),
            json!({"term": {"target_id": filter.target_id}}),
        ];
        if let Some(ref categories) = filter.categories {
            let names: Vec<&str> = categories.iter().map(|c| c.as_str()).collect();
            clauses.push(json!({"terms": {"category": names}}));
        }
        if let Some(since) = filter.since {
            clauses.push(json!({"range": {"created_at": {"gte": since.to_rfc3339()}}}));
        }
        clauses
    }

    /// Body for the lexical arm
    pub fn lexical_body(text: &str, filter: &SearchFilter, size: usize) -> Value {
        json!({
            "size": size,
            "_source": {"excludes": [VECTOR_FIELD]},
            "query": {
                "bool": {
                    "must": [{"match": {"text": text}}],
                    "filter": Self::filter_clauses(filter)
                }
            }
        })
    }

    /// Body for the vector arm; the `+ 1.0` keeps scores non-negative
    pub fn vector_body(vector: &[f32], filter: &SearchFilter, size: usize) -> Value {
        json!({
            "size": size,
            "_source": {"excludes": [VECTOR_FIELD]},
            "query": {
                "script_score": {
                    "query": {"bool": {"filter": Self::filter_clauses(filter)}},
                    "script": {
                        "source": format!("cosineSimilarity(params.query_vector, '{VECTOR_FIELD}') + 1.0"),
                        "params": {"query_vector": vector}
                    }
                }
            }
        })
    }

    async fn search(&self, arm: &str, body: Value) -> Result<Vec<Hit>> {
        let url = format!("{}/_search", self.index_url());
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(arm, e))?;
        let response = check_status(arm, response).await?;

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| upstream(arm, format!("unparseable response: {e}")))?;

        Ok(parsed.hits.hits.into_iter().map(RawHit::into_hit).collect())
    }
}

async fn check_status(context: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if status.is_client_error() {
        Err(MemoryError::Storage(format!(
            "elasticsearch {context} returned {status}: {body}"
        )))
    } else {
        Err(upstream(context, format!("returned {status}: {body}")))
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn upsert(&self, memory: &Memory) -> Result<()> {
        if memory.vector.len() != self.dimension {
            return Err(MemoryError::InvalidInput(format!(
                "vector dimension {} does not match index dimension {}",
                memory.vector.len(),
                self.dimension
            )));
        }

        let doc = DocumentRef {
            subject_id: &memory.subject_id,
            target_id: &memory.target_id,
            category: memory.category,
            text: &memory.text,
            content_vector: &memory.vector,
            tags: &memory.tags,
            importance: memory.importance,
            created_at: memory.created_at,
            context: &memory.context,
        };

        let url = format!("{}/_doc/{}", self.index_url(), memory.id);
        let response = self
            .authorized(self.client.put(&url))
            .json(&doc)
            .send()
            .await
            .map_err(|e| upstream("upsert", e))?;
        check_status("upsert", response).await?;

        debug!(id = %memory.id, index = %self.index_name, "Upserted document");
        Ok(())
    }

    async fn lexical_query(&self, text: &str, filter: &SearchFilter, size: usize) -> Result<Vec<Hit>> {
        self.search("lexical query", Self::lexical_body(text, filter, size))
            .await
    }

    async fn vector_query(&self, vector: &[f32], filter: &SearchFilter, size: usize) -> Result<Vec<Hit>> {
        self.search("vector query", Self::vector_body(vector, filter, size))
            .await
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(format!("{}/", self.base_url)))
            .send()
            .await
            .map_err(|e| upstream("ping", e))?;
        check_status("ping", response).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}
