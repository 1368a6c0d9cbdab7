//! Push-delivery envelope codec
//!
//! Wire shape of a push subscription delivery:
//! `{"message": {"data": base64(json task), "messageId", "attributes", "publishTime"}, "subscription"}`.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CorrelationTask;
use crate::error::{MemoryError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Base64-encoded JSON task; a missing field is a malformed delivery
    #[serde(default)]
    pub data: Option<String>,
    #[serde(rename = "messageId", alias = "message_id", default)]
    pub message_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(
        rename = "publishTime",
        alias = "publish_time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_time: Option<String>,
}

/// Why a delivery could not be turned into a runnable task
#[derive(Debug, Error)]
pub enum TaskDecodeError {
    /// Nothing identifies a waiting client; ack and drop
    #[error("undecodable delivery: {0}")]
    Discard(String),

    /// A correlation id was recovered, so the client can be told
    #[error("invalid task {correlation_id}: {reason}")]
    Invalid {
        correlation_id: String,
        reason: String,
    },
}

impl PushEnvelope {
    /// Wrap a task for push delivery
    pub fn wrap(
        task: &CorrelationTask,
        message_id: impl Into<String>,
        subscription: Option<String>,
    ) -> Result<Self> {
        let json = serde_json::to_vec(task)?;
        let mut attributes = HashMap::new();
        attributes.insert("operation".to_string(), task.operation.as_str().to_string());
        attributes.insert("correlation_id".to_string(), task.correlation_id.clone());

        Ok(Self {
            message: PushMessage {
                data: Some(STANDARD.encode(json)),
                message_id: message_id.into(),
                attributes,
                publish_time: Some(chrono::Utc::now().to_rfc3339()),
            },
            subscription,
        })
    }

    pub fn from_slice(body: &[u8]) -> std::result::Result<Self, TaskDecodeError> {
        serde_json::from_slice(body)
            .map_err(|e| TaskDecodeError::Discard(format!("envelope is not valid JSON: {e}")))
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(MemoryError::from)
    }

    /// Decode and validate the carried task.
    ///
    /// A payload that parses far enough to expose a `correlation_id` but then
    /// fails is reported as [`TaskDecodeError::Invalid`].
    pub fn decode_task(&self) -> std::result::Result<CorrelationTask, TaskDecodeError> {
        let data = self
            .message
            .data
            .as_deref()
            .ok_or_else(|| TaskDecodeError::Discard("message has no data".to_string()))?;

        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| TaskDecodeError::Discard(format!("data is not base64: {e}")))?;

        let value: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| TaskDecodeError::Discard(format!("data is not JSON: {e}")))?;

        let correlation_id = value
            .get("correlation_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string);

        let invalid = |reason: String| match &correlation_id {
            Some(id) => TaskDecodeError::Invalid {
                correlation_id: id.clone(),
                reason,
            },
            None => TaskDecodeError::Discard(reason),
        };

        let task: CorrelationTask =
            serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
        task.validate().map_err(|e| invalid(e.to_string()))?;
        Ok(task)
    }
}
