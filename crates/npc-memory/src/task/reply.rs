//! Reply messages written by workers and consumed by the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MemoryError, Result};
use crate::memory::RankedMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// Outcome of one executed task, stored under `reply:{correlation_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub correlation_id: String,
    pub status: ReplyStatus,
    pub result: Value,
    pub produced_at: DateTime<Utc>,
}

/// Body of an ERROR reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFailure {
    pub kind: String,
    pub message: String,
}

impl From<&MemoryError> for ReplyFailure {
    fn from(err: &MemoryError) -> Self {
        let message = match err {
            MemoryError::MalformedTask(m)
            | MemoryError::UpstreamUnavailable(m)
            | MemoryError::InvalidInput(m)
            | MemoryError::Storage(m)
            | MemoryError::Config(m)
            | MemoryError::Serialization(m) => m.clone(),
            other => other.to_string(),
        };
        Self {
            kind: err.kind().to_string(),
            message,
        }
    }
}

/// OK body for an INDEX task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    pub memory_id: String,
    /// True when the stub embedder stood in for the primary one
    #[serde(default)]
    pub degraded_embedding: bool,
}

/// OK body for a SEARCH task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub memories: Vec<RankedMemory>,
    /// Search arms that timed out and were left out of fusion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_arms: Vec<String>,
}

impl ReplyMessage {
    pub fn ok<T: Serialize>(correlation_id: impl Into<String>, result: &T) -> Result<Self> {
        Ok(Self {
            correlation_id: correlation_id.into(),
            status: ReplyStatus::Ok,
            result: serde_json::to_value(result)?,
            produced_at: Utc::now(),
        })
    }

    pub fn error(correlation_id: impl Into<String>, err: &MemoryError) -> Self {
        let failure = ReplyFailure::from(err);
        Self {
            correlation_id: correlation_id.into(),
            status: ReplyStatus::Error,
            result: serde_json::json!({ "kind": failure.kind, "message": failure.message }),
            produced_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// OK yields the result value; ERROR rebuilds the worker's typed error
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            ReplyStatus::Ok => Ok(self.result),
            ReplyStatus::Error => {
                let failure: ReplyFailure = serde_json::from_value(self.result)
                    .map_err(|e| MemoryError::Serialization(format!("bad error reply: {e}")))?;
                Err(MemoryError::from_kind(&failure.kind, failure.message))
            }
        }
    }

    /// Decode the OK result into a typed body
    pub fn into_typed<T: serde::de::DeserializeOwned>(self) -> Result<T> {
        let value = self.into_result()?;
        Ok(serde_json::from_value(value)?)
    }
}
