// src/error.rs
//! Typed errors for the ingestion pipeline.
//!
//! Provider errors never escape the orchestrator and store errors never escape
//! the upserter; both exist so callers can log and count them precisely.

use thiserror::Error;

/// A provider could not be queried. Always scoped to one provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("token exchange failed: {0}")]
    Auth(String),

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Auth(_) | Self::Decode(_) | Self::Config(_) => false,
        }
    }
}

/// A write or read against the durable deal store failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Another row already owns the natural key.
    #[error("natural key already stored: {source_name}/{source_id}")]
    Conflict {
        source_name: String,
        source_id: String,
    },

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("encoding stored value: {0}")]
    Encode(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// The job queue refused a submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("ingestion queue is closed")]
    QueueClosed,
}
