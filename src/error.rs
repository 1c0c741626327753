//! Error taxonomy for the feedback pipeline.
//!
//! Structural failures ([`PipelineError`]) abort a run. Provider failures
//! ([`ProviderError`]) are per-record: the generator retries or skips them
//! and the batch continues.

use std::path::PathBuf;

/// Fatal errors surfaced to the caller of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("malformed input {source_name}: {reason}")]
    MalformedInput { source_name: String, reason: String },

    #[error("no usable feedback rows in {0}")]
    EmptyInput(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::MalformedInput {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors returned by an [`InsightProvider`](crate::insight::InsightProvider).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Transient failure (network, timeout, rate limit, 5xx). Retry with backoff.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The model answered, but the answer could not be turned into an insight.
    #[error("malformed provider response: {0}")]
    Response(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }
}
