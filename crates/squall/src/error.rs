//! Error types for the squall pipeline orchestrator.

use serde::Serialize;
use snafu::prelude::*;

// Re-export common errors
pub use squall_core::error::{ConfigError, StorageError};
pub use squall_core::Elapsed;

/// Errors returned by the external collaborators (cluster, job, warehouse
/// and message bus services).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServiceError {
    /// The addressed resource does not exist.
    #[snafu(display("{resource} not found"))]
    NotFound { resource: String },

    /// The resource already exists (e.g. a concurrent create won the race).
    #[snafu(display("{resource} already exists"))]
    AlreadyExists { resource: String },

    /// The provider rejected the request or the operation ended in error.
    #[snafu(display("Provider error: {message}"))]
    Provider { message: String },

    /// The request never reached the provider or its response was unreadable.
    #[snafu(display("Transport error: {message}"))]
    Transport { message: String },

    /// Credentials could not be obtained.
    #[snafu(display("Authentication failed: {message}"))]
    Auth { message: String },
}

impl ServiceError {
    /// Check if this error represents a "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }

    /// Check if this error represents an "already exists" condition.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ServiceError::AlreadyExists { .. })
    }

    /// Shorthand for a provider error.
    pub fn provider(message: impl Into<String>) -> Self {
        ServiceError::Provider {
            message: message.into(),
        }
    }
}

/// Errors produced while encoding or decoding a status envelope.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DecodeError {
    /// Payload is not valid UTF-8.
    #[snafu(display("Payload is not valid UTF-8: {source}"))]
    InvalidUtf8 { source: std::str::Utf8Error },

    /// Payload is not a well-formed envelope document.
    #[snafu(display("Malformed envelope: {source}"))]
    MalformedJson { source: serde_json::Error },

    /// A table descriptor has an empty name.
    #[snafu(display("Table at position {index} has an empty name"))]
    EmptyTableName { index: usize },

    /// Column names and types differ in length.
    #[snafu(display("Table '{table}' has {names} column names but {types} column types"))]
    ColumnCountMismatch {
        table: String,
        names: usize,
        types: usize,
    },

    /// A column name appears twice in one table.
    #[snafu(display("Table '{table}' declares column '{column}' more than once"))]
    DuplicateColumn { table: String, column: String },

    /// A column has an empty name or type.
    #[snafu(display("Table '{table}' has a column with an empty name or type"))]
    EmptyColumn { table: String },

    /// A SUCCESS envelope with no tables.
    #[snafu(display("SUCCESS envelope carries no tables"))]
    SuccessWithoutTables,

    /// Push delivery body is not a valid push request.
    #[snafu(display("Invalid push delivery: {source}"))]
    InvalidPush { source: serde_json::Error },

    /// Push delivery data is not valid base64.
    #[snafu(display("Invalid base64 message data: {source}"))]
    InvalidBase64 { source: base64::DecodeError },

    /// Serializing an envelope failed.
    #[snafu(display("Failed to encode envelope: {source}"))]
    Encode { source: serde_json::Error },
}

/// Errors publishing a status envelope.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// The envelope violates its invariants.
    #[snafu(display("Refusing to publish invalid envelope: {source}"))]
    InvalidEnvelope { source: DecodeError },

    /// The bus rejected the message.
    #[snafu(display("Failed to publish to topic '{topic}': {source}"))]
    Publish { topic: String, source: ServiceError },
}

/// Top-level pipeline errors.
///
/// Every failure path of both stages ends in one of these kinds, attached
/// to a structured outcome rather than propagated out of the entry point.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    /// Cluster check, create or delete failed.
    #[snafu(display("Cluster '{cluster}' {operation} failed: {source}"))]
    Provisioning {
        cluster: String,
        operation: &'static str,
        source: ServiceError,
    },

    /// Job submission failed.
    #[snafu(display("Job submission to cluster '{cluster}' failed: {source}"))]
    Submission {
        cluster: String,
        source: ServiceError,
    },

    /// Status envelope could not be decoded.
    #[snafu(display("Failed to decode status envelope: {source}"))]
    Decode { source: DecodeError },

    /// No completion marker under the output prefix.
    #[snafu(display("No completed result set under prefix '{prefix}'"))]
    ArtifactNotFound { prefix: String },

    /// Listing the output prefix failed.
    #[snafu(display("Failed to list prefix '{prefix}': {source}"))]
    Listing {
        prefix: String,
        source: StorageError,
    },

    /// Warehouse load failed for one table.
    #[snafu(display("Load into '{table}' failed: {source}"))]
    Load { table: String, source: ServiceError },

    /// A blocking wait exceeded its deadline.
    #[snafu(display("Timed out: {source}"))]
    Timeout { source: Elapsed },

    /// A SUCCESS batch with nothing to load.
    #[snafu(display("SUCCESS envelope with no tables to load"))]
    EmptySuccess,
}

impl PipelineError {
    /// Stable identifier of the error kind, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Provisioning { .. } => "provisioning",
            PipelineError::Submission { .. } => "submission",
            PipelineError::Decode { .. } => "decode",
            PipelineError::ArtifactNotFound { .. } => "artifact_not_found",
            PipelineError::Listing { .. } => "listing",
            PipelineError::Load { .. } => "load",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::EmptySuccess => "empty_success",
        }
    }

    /// Whether re-invoking the stage may succeed without changing its input.
    ///
    /// Timeouts and transport failures are transient; malformed input and
    /// provider rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Timeout { .. } => true,
            PipelineError::Provisioning { source, .. }
            | PipelineError::Submission { source, .. }
            | PipelineError::Load { source, .. } => {
                matches!(source, ServiceError::Transport { .. })
            }
            PipelineError::Listing { .. } => true,
            PipelineError::Decode { .. }
            | PipelineError::ArtifactNotFound { .. }
            | PipelineError::EmptySuccess => false,
        }
    }
}

/// Serializable view of a [`PipelineError`] for stage outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&PipelineError> for ErrorSummary {
    fn from(error: &PipelineError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl From<Elapsed> for PipelineError {
    fn from(source: Elapsed) -> Self {
        PipelineError::Timeout { source }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(source: DecodeError) -> Self {
        PipelineError::Decode { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_is_distinct_and_retryable() {
        let err = PipelineError::from(Elapsed {
            operation: "cluster delete".to_string(),
            after: Duration::from_secs(600),
        });
        assert_eq!(err.kind(), "timeout");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_is_terminal() {
        let err = PipelineError::from(DecodeError::SuccessWithoutTables);
        assert_eq!(err.kind(), "decode");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_provider_rejection_is_terminal() {
        let err = PipelineError::Load {
            table: "t1".to_string(),
            source: ServiceError::provider("dataset not found"),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("t1"));
    }
}
