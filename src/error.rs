use thiserror::Error;

/// Failures surfaced by the chunk pipeline.
///
/// Only the retryable kinds are offered to a [`crate::pipeline::RetryPolicy`]; everything else
/// aborts the run immediately.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing credential or unusable configuration. The pipeline never starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model endpoint or alignment service failed at the network/service layer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The model reply could not be turned into a JSON array.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Translated array length differs from the chunk length after alignment.
    #[error("item count mismatch: expected {expected}, got {actual}")]
    AlignmentMismatch { expected: usize, actual: usize },

    /// The alignment reviewer explicitly rejected the translation.
    #[error("translation rejected by alignment service")]
    AlignmentRejected,

    /// Alignment service could not be reached. Never fatal: the caller keeps the unaligned result.
    #[error("alignment service unavailable at {addr}: {reason}")]
    AlignmentServiceUnavailable { addr: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether a fresh attempt at the same chunk can reasonably succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::MalformedResponse(_)
                | Self::AlignmentMismatch { .. }
                | Self::AlignmentRejected
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PipelineError::Transport(format!("request timeout: {err}"))
        } else {
            PipelineError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
