//! Error types for the sync daemon
//!
//! Every failure is classified by [`ErrorCategory`]; only transient errors
//! are retried.

use movies_state::StorageError;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index responded {status}: {body}")]
    IndexResponse { status: u16, body: String },

    #[error("State store error: {0}")]
    State(#[from] StorageError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Index schema {path}: {reason}")]
    Schema { path: String, reason: String },

    #[error("Source rows out of order: {0}")]
    Ordering(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EtlError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn index_response(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::IndexResponse {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    /// Decide whether the retry wrapper may try the same call again.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::Database(e) => classify_sqlx(e),
            EtlError::Http(e) => {
                if e.is_builder() {
                    ErrorCategory::Permanent
                } else {
                    ErrorCategory::Transient
                }
            }
            EtlError::IndexResponse { status, .. } => {
                if *status == 429 || (500..600).contains(status) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            EtlError::State(e) => {
                if e.is_transient() {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
            EtlError::Transform(_)
            | EtlError::Schema { .. }
            | EtlError::Ordering(_)
            | EtlError::Serialization(_)
            | EtlError::Checkpoint(_)
            | EtlError::Config(_) => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Row shape problems: the driver returned something the query cannot produce.
/// Anything else (connection, statement, server) is worth another attempt.
fn classify_sqlx(err: &sqlx::Error) -> ErrorCategory {
    match err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Encode(_)
        | sqlx::Error::Configuration(_) => ErrorCategory::Permanent,
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => ErrorCategory::Infrastructure,
        _ => ErrorCategory::Transient,
    }
}

/// Malformed row group; retrying cannot fix it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("film work {id}: required field `{field}` is null")]
    MissingField { id: Uuid, field: &'static str },

    #[error("film work {id}: rows disagree on `{field}`")]
    InconsistentGroup { id: Uuid, field: &'static str },
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., malformed row, bad schema file)
    Permanent,
    /// Infrastructure error - the local runtime itself is broken
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
