//! Error types for the knowledge-graph pipeline.
//!
//! Each stage owns a small error enum; [`PipelineError`] wraps them for
//! callers that drive several stages at once.

use thiserror::Error;

use crate::graph::models::DanglingReference;

/// Errors raised while turning a graph document into a canonical model.
#[derive(Error, Debug)]
pub enum ParseError {
    /// The input is not well-formed markup / JSON.
    #[error("malformed document at {location}: {message}")]
    MalformedDocument { location: String, message: String },

    /// The document is well-formed but lacks the expected node/edge containers.
    #[error("unsupported schema at {location}: {message}")]
    UnsupportedSchema { location: String, message: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    pub(crate) fn malformed(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedDocument {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn schema(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedSchema {
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Failure of a single store transaction.
///
/// The classification decides whether the retry policy may try again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection refused, timeout, 5xx, Neo4j `TransientError` codes.
    #[error("transient store error: {0}")]
    Transient(String),

    /// Malformed query, bad credentials, constraint violations.
    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Permanent(m) => m,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        // A request that cannot be built (bad URL, bad header) fails the same way every time.
        if err.is_builder() {
            StoreError::Permanent(format!("invalid request: {}", err))
        } else if err.is_timeout() || err.is_connect() || err.is_request() {
            StoreError::Transient(err.to_string())
        } else if err.is_decode() {
            StoreError::Permanent(format!("undecodable response: {}", err))
        } else {
            StoreError::Transient(err.to_string())
        }
    }
}

/// Rendering failures. Never affects ingestion or analytics.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("no rendering backend available for '{0}' output")]
    BackendUnavailable(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Input validation failures of the pure analytics / layout stages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("graph has no nodes")]
    EmptyGraph,
}

/// Top-level error for a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{} edge(s) reference missing nodes", .0.len())]
    DanglingReferences(Vec<DanglingReference>),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("run cancelled before all batches were dispatched")]
    CancelledRun,

    /// A report handed to a targeted re-run does not match the current plan.
    #[error("ingestion report does not match the graph: {0}")]
    StaleReport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_classification() {
        assert!(StoreError::Transient("timeout".into()).is_retryable());
        assert!(!StoreError::Permanent("syntax".into()).is_retryable());
        assert_eq!(StoreError::Permanent("syntax".into()).message(), "syntax");
    }

    #[test]
    fn test_unbuildable_request_is_permanent() {
        let err = reqwest::Client::new().get("not a url").build().unwrap_err();
        assert!(err.is_builder());
        assert!(!StoreError::from(err).is_retryable());
    }

    #[test]
    fn test_parse_error_display_carries_location() {
        let err = ParseError::malformed("byte 42", "unexpected end of file");
        assert_eq!(
            err.to_string(),
            "malformed document at byte 42: unexpected end of file"
        );
    }
}
