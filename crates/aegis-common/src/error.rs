//! Error types and result handling for the Aegis safety core

use thiserror::Error;

/// Result type alias for Aegis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Aegis safety core operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("External call error: {0}")]
    External(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::External(_) | Error::Timeout(_) | Error::Notification(_)
        )
    }

    /// Get error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Storage(_) => "storage",
            Error::Validation(_) => "validation",
            Error::External(_) => "external",
            Error::Parse(_) => "parse",
            Error::Timeout(_) => "timeout",
            Error::Queue(_) => "queue",
            Error::Notification(_) => "notification",
            Error::Serialization(_) => "serialization",
            Error::Database(_) => "database",
            Error::Generic(_) => "generic",
            Error::Internal(_) => "internal",
        }
    }
}
