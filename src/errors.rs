//! Pipeline error taxonomy.
//!
//! Every failure is classified by what the caller should do about it:
//!
//! * [`Transient`](PipelineError::Transient) — external hiccup (timeouts,
//!   429s, 5xx); retrying with backoff may succeed.
//! * [`Permanent`](PipelineError::Permanent) — will not succeed on retry
//!   (bad credentials, malformed API response).
//! * [`Validation`](PipelineError::Validation) — the input item is bad
//!   (unsupported mime type, broken file); skip it, keep the batch going.
//! * [`Consistency`](PipelineError::Consistency) — a storage invariant
//!   would be violated; abort the write, nothing is persisted.

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("validation failure: {0}")]
    Validation(String),

    #[error("consistency failure: {0}")]
    Consistency(String),
}

impl PipelineError {
    /// Whether re-running the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Transient(_))
    }

    /// Classify an HTTP error status. Rate limits and server errors are
    /// transient; every other non-success status is permanent.
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            PipelineError::Transient(format!("{context}: HTTP {status}"))
        } else {
            PipelineError::Permanent(format!("{context}: HTTP {status}"))
        }
    }
}

// Network-level failures (connect, timeout, body read) are worth retrying.
impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Transient(format!("http: {err}"))
    }
}

// Connection-level failures can clear up on their own; anything touching
// data or a statement means a write must not be trusted.
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => PipelineError::Transient(format!("database: {err}")),
            other => PipelineError::Consistency(format!("database: {other}")),
        }
    }
}
