//! Correlation tasks and the messages that carry them
//!
//! A [`CorrelationTask`] is the unit of work published by the gateway and
//! executed by a worker. Its `correlation_id` names the reply key and, for
//! INDEX tasks, the search-index document id.

pub mod envelope;
pub mod reply;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::memory::MemoryCategory;

pub use envelope::{PushEnvelope, PushMessage, TaskDecodeError};
pub use reply::{IndexResult, ReplyFailure, ReplyMessage, ReplyStatus, SearchResult};

/// Default number of memories returned by a search
pub const DEFAULT_TOP_K: usize = 5;

/// Default importance assigned when the client omits one
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Index,
    Search,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Index => "INDEX",
            Operation::Search => "SEARCH",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields of a memory to be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexPayload {
    pub subject_id: String,
    pub target_id: String,
    pub category: MemoryCategory,
    pub text: String,
    #[serde(default = "default_importance")]
    pub importance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// When the remembered event happened; defaults to the task's creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

fn default_importance() -> f64 {
    DEFAULT_IMPORTANCE
}

/// Query parameters for a search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub subject_id: String,
    pub target_id: String,
    pub query_text: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_filter: Option<Vec<MemoryCategory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<f64>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Operation-specific body of a task.
///
/// Untagged: the `operation` field on the task names the variant, and
/// [`CorrelationTask::validate`] rejects a mismatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskPayload {
    Index(IndexPayload),
    Search(SearchPayload),
}

impl TaskPayload {
    pub fn operation(&self) -> Operation {
        match self {
            TaskPayload::Index(_) => Operation::Index,
            TaskPayload::Search(_) => Operation::Search,
        }
    }
}

/// Immutable description of one unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationTask {
    pub correlation_id: String,
    pub operation: Operation,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
}

impl CorrelationTask {
    /// Build a task with a fresh UUID v4 correlation id
    pub fn new(payload: TaskPayload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload)
    }

    /// Build a task under a caller-chosen correlation id (replays, tests)
    pub fn with_id(correlation_id: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            operation: payload.operation(),
            payload,
            created_at: Utc::now(),
        }
    }

    pub fn reply_key(&self) -> String {
        reply_key(&self.correlation_id)
    }

    /// Check the invariants a worker relies on before executing
    pub fn validate(&self) -> Result<()> {
        if self.correlation_id.trim().is_empty() {
            return Err(MemoryError::MalformedTask(
                "correlation_id must not be empty".to_string(),
            ));
        }
        if self.operation != self.payload.operation() {
            return Err(MemoryError::MalformedTask(format!(
                "operation {} does not match a {} payload",
                self.operation,
                self.payload.operation()
            )));
        }

        match &self.payload {
            TaskPayload::Index(p) => {
                require_id("subject_id", &p.subject_id)?;
                require_id("target_id", &p.target_id)?;
                if p.text.trim().is_empty() {
                    return Err(MemoryError::MalformedTask("text must not be empty".into()));
                }
                if !(0.0..=1.0).contains(&p.importance) {
                    return Err(MemoryError::MalformedTask(format!(
                        "importance {} outside [0, 1]",
                        p.importance
                    )));
                }
            }
            TaskPayload::Search(p) => {
                require_id("subject_id", &p.subject_id)?;
                require_id("target_id", &p.target_id)?;
                if p.query_text.trim().is_empty() {
                    return Err(MemoryError::MalformedTask(
                        "query_text must not be empty".into(),
                    ));
                }
                if p.top_k == 0 {
                    return Err(MemoryError::MalformedTask("top_k must be at least 1".into()));
                }
                if let Some(days) = p.max_age_days.filter(|d| d.is_nan() || *d < 0.0) {
                    return Err(MemoryError::MalformedTask(format!(
                        "max_age_days {days} must be non-negative"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn require_id(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MemoryError::MalformedTask(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Reply-channel key for a correlation id
pub fn reply_key(correlation_id: &str) -> String {
    format!("reply:{correlation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_payload() -> IndexPayload {
        IndexPayload {
            subject_id: "npc_guard".to_string(),
            target_id: "player_2".to_string(),
            category: MemoryCategory::Quest,
            text: "Asked me to find the lost ring".to_string(),
            importance: 0.7,
            tags: vec!["trust".to_string()],
            context: BTreeMap::new(),
            occurred_at: None,
        }
    }

    fn search_payload() -> SearchPayload {
        SearchPayload {
            subject_id: "npc_guard".to_string(),
            target_id: "player_2".to_string(),
            query_text: "ring".to_string(),
            top_k: 3,
            category_filter: None,
            max_age_days: None,
        }
    }

    #[test]
    fn test_new_task_has_unique_ids() {
        let a = CorrelationTask::new(TaskPayload::Index(index_payload()));
        let b = CorrelationTask::new(TaskPayload::Index(index_payload()));
        assert_ne!(a.correlation_id, b.correlation_id);
        assert_eq!(a.operation, Operation::Index);
        assert_eq!(a.reply_key(), format!("reply:{}", a.correlation_id));
    }

    #[test]
    fn test_payload_variant_is_recovered_from_json() {
        let task = CorrelationTask::new(TaskPayload::Search(search_payload()));
        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"operation\":\"SEARCH\""));

        let decoded: CorrelationTask = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded.payload, TaskPayload::Search(ref p) if p.top_k == 3));
        decoded.validate().unwrap();
    }

    #[test]
    fn test_defaults_fill_optional_fields() {
        let json = r#"{
            "correlation_id": "c-1",
            "operation": "INDEX",
            "payload": {"subject_id": "a", "target_id": "b", "category": "trade", "text": "sold a sword"},
            "created_at": "2025-01-01T00:00:00Z"
        }"#;
        let task: CorrelationTask = serde_json::from_str(json).unwrap();
        match task.payload {
            TaskPayload::Index(p) => {
                assert_eq!(p.importance, DEFAULT_IMPORTANCE);
                assert!(p.tags.is_empty());
            }
            other => panic!("expected index payload, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_operation_mismatch() {
        let mut task = CorrelationTask::new(TaskPayload::Search(search_payload()));
        task.operation = Operation::Index;
        let err = task.validate().unwrap_err();
        assert_eq!(err.kind(), "malformed_task");
    }

    #[test]
    fn test_validate_rejects_bad_importance_and_empty_text() {
        let mut p = index_payload();
        p.importance = 1.5;
        assert!(CorrelationTask::new(TaskPayload::Index(p)).validate().is_err());

        let mut p = index_payload();
        p.text = "   ".to_string();
        assert!(CorrelationTask::new(TaskPayload::Index(p)).validate().is_err());

        let mut p = index_payload();
        p.importance = f64::NAN;
        assert!(CorrelationTask::new(TaskPayload::Index(p)).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_top_k_and_negative_age() {
        let mut p = search_payload();
        p.top_k = 0;
        assert!(CorrelationTask::new(TaskPayload::Search(p)).validate().is_err());

        let mut p = search_payload();
        p.max_age_days = Some(-1.0);
        assert!(CorrelationTask::new(TaskPayload::Search(p)).validate().is_err());
    }
}
