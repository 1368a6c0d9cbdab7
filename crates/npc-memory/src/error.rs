//! Error types for the memory pipeline

use std::time::Duration;

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Worker is at capacity; the queue should redeliver with backoff
    #[error("Admission rejected: worker at capacity")]
    AdmissionRejected,

    /// Task or envelope cannot be processed; never retried
    #[error("Malformed task: {0}")]
    MalformedTask(String),

    /// Embedding service or search engine unreachable or failing
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No reply arrived before the gateway deadline
    #[error("Gateway timeout after {timeout:?} (correlation_id={correlation_id})")]
    GatewayTimeout {
        correlation_id: String,
        timeout: Duration,
    },

    /// Client request failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reply store or local index errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MemoryError {
    /// Stable identifier carried in ERROR replies and HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryError::AdmissionRejected => "admission_rejected",
            MemoryError::MalformedTask(_) => "malformed_task",
            MemoryError::UpstreamUnavailable(_) => "upstream_unavailable",
            MemoryError::GatewayTimeout { .. } => "gateway_timeout",
            MemoryError::InvalidInput(_) => "invalid_input",
            MemoryError::Storage(_) => "storage",
            MemoryError::Config(_) => "config",
            MemoryError::Io(_) => "io",
            MemoryError::Serialization(_) => "serialization",
        }
    }

    /// Rebuild an error from a `kind()` string and message received over the wire.
    ///
    /// Unknown kinds collapse to `Storage` so a newer worker cannot crash an older gateway.
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "admission_rejected" => MemoryError::AdmissionRejected,
            "malformed_task" => MemoryError::MalformedTask(message),
            "upstream_unavailable" => MemoryError::UpstreamUnavailable(message),
            "invalid_input" => MemoryError::InvalidInput(message),
            "config" => MemoryError::Config(message),
            "serialization" => MemoryError::Serialization(message),
            _ => MemoryError::Storage(message),
        }
    }

    /// Whether the failure is worth retrying at the transport level
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MemoryError::AdmissionRejected | MemoryError::UpstreamUnavailable(_)
        )
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Serialization(e.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_wire_form() {
        let original = MemoryError::UpstreamUnavailable("es down".to_string());
        let rebuilt = MemoryError::from_kind(original.kind(), "es down".to_string());
        assert!(matches!(rebuilt, MemoryError::UpstreamUnavailable(ref m) if m == "es down"));
    }

    #[test]
    fn test_unknown_kind_falls_back_to_storage() {
        let rebuilt = MemoryError::from_kind("something_new", "boom".to_string());
        assert_eq!(rebuilt.kind(), "storage");
    }

    #[test]
    fn test_transient_classification() {
        assert!(MemoryError::AdmissionRejected.is_transient());
        assert!(MemoryError::UpstreamUnavailable("x".into()).is_transient());
        assert!(!MemoryError::MalformedTask("x".into()).is_transient());
        assert!(
            !MemoryError::GatewayTimeout {
                correlation_id: "c".into(),
                timeout: Duration::from_secs(1)
            }
            .is_transient()
        );
    }
}
