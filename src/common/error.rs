//! Error types for sync operations
//!
//! The taxonomy distinguishes transient connection failures (retryable)
//! from conditions that are fatal to a single stream's run: an expired
//! resume position, a malformed change, a state-store or sink failure.
//! Per-stream errors never escalate past the owning worker; the
//! controller aggregates them once every stream has terminated.

use thiserror::Error;

/// Errors produced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transient failure talking to the source; retryable with backoff.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend garbage-collected the requested resume position.
    ///
    /// Fatal for the stream. The only remedy is an operator-initiated
    /// reset followed by a fresh backfill; the engine never re-backfills
    /// silently because doing so can skip data nobody opted into
    /// re-reading.
    #[error("resume position expired: {0}")]
    ResumeTokenExpired(String),

    /// A change or row could not be decoded into the payload model.
    #[error("decode error: {0}")]
    Decode(String),

    /// A decoded change could not be normalized into a canonical record.
    #[error("normalize error: {0}")]
    Normalize(String),

    /// Durable state could not be read or written.
    #[error("state store error: {0}")]
    State(String),

    /// The downstream writer rejected a record.
    #[error("sink error: {0}")]
    Sink(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a resume-position-expired error.
    pub fn resume_expired(msg: impl Into<String>) -> Self {
        Self::ResumeTokenExpired(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a normalize error.
    pub fn normalize(msg: impl Into<String>) -> Self {
        Self::Normalize(msg.into())
    }

    /// Create a state store error.
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a sink error.
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error is retriable.
    ///
    /// Returns true for transient errors that may succeed on retry.
    /// An expired resume position is explicitly NOT retriable: retrying
    /// the same open would fail forever.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Connection(_) => true,

            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::TimedOut
                        | ErrorKind::Interrupted
                )
            }

            Self::ResumeTokenExpired(_)
            | Self::Decode(_)
            | Self::Normalize(_)
            | Self::State(_)
            | Self::Sink(_)
            | Self::Config(_)
            | Self::Json(_)
            | Self::Other(_) => false,
        }
    }

    /// Get a metric-safe error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::ResumeTokenExpired(_) => "resume_token_expired",
            Self::Decode(_) => "decode_error",
            Self::Normalize(_) => "normalize_error",
            Self::State(_) => "state_store_error",
            Self::Sink(_) => "sink_error",
            Self::Config(_) => "config_error",
            Self::Json(_) => "json_error",
            Self::Io(_) => "io_error",
            Self::Other(_) => "unknown",
        }
    }
}

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;
