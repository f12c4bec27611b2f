//! Failure taxonomy for backend requests

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from a single backend request or an attempt sequence.
///
/// The `Display` text is what ends up in a failed result's `error` column, so
/// each variant spells out its classification for operator triage.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Network/Connection Error: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("bad status from {url}: {status}")]
    BadStatus { url: String, status: StatusCode },

    #[error("invalid JSON from {url}: {source} (Body: {body})")]
    Decode {
        url: String,
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Ollama Header Timeout after {0:?} (model loading?)")]
    LoadTimeout(Duration),

    #[error("Generation Timeout after {0:?} (no completion after first byte)")]
    GenerationTimeout(Duration),

    #[error("stream incomplete or failed to start")]
    StreamIncomplete,

    #[error("Ollama Server Error ({status}): {body}")]
    Server { status: StatusCode, body: String },

    #[error("Ollama API Error: {0}")]
    Api(String),

    /// Placement policy violation; the reason is reported verbatim
    #[error("{0}")]
    GuardAbort(String),

    #[error("attempt cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<EngineError>,
    },
}

impl EngineError {
    /// Transport failures, timeouts and server errors are worth another attempt;
    /// policy aborts and exhausted sequences are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::GuardAbort(_)
                | EngineError::Encode(_)
                | EngineError::RetriesExhausted { .. }
        )
    }

    /// Whether the guard monitor ended this request, directly or as the last retry error
    pub fn is_guard_abort(&self) -> bool {
        match self {
            EngineError::GuardAbort(_) => true,
            EngineError::RetriesExhausted { last, .. } => last.is_guard_abort(),
            _ => false,
        }
    }
}

/// Map a transport error from `reqwest` onto the taxonomy
pub(crate) fn classify_transport(err: reqwest::Error, stream_timeout: Duration) -> EngineError {
    if err.is_timeout() {
        EngineError::GenerationTimeout(stream_timeout)
    } else {
        EngineError::Connection(err)
    }
}
