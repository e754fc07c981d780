//! Error types and result handling for the WiFi topology monitor

use thiserror::Error;

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for monitor operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Ingest error: {0}")]
    Ingest(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Roaming error: {0}")]
    Roaming(String),

    #[error("Quality error: {0}")]
    Quality(String),

    #[error("Anomaly error: {0}")]
    Anomaly(String),

    #[error("Alert error: {0}")]
    Alert(String),

    #[error("Alert suppressed: {0}")]
    Suppressed(String),

    #[error("Realtime error: {0}")]
    Realtime(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Timeout(_) | Error::ResourceExhausted(_) | Error::Storage(_)
        )
    }

    /// Get error category for stats counters
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Ingest(_) => "ingest",
            Error::Session(_) => "session",
            Error::Roaming(_) => "roaming",
            Error::Quality(_) => "quality",
            Error::Anomaly(_) => "anomaly",
            Error::Alert(_) => "alert",
            Error::Suppressed(_) => "suppressed",
            Error::Realtime(_) => "realtime",
            Error::Storage(_) => "storage",
            Error::Transport(_) => "transport",
            Error::InvalidInput(_) => "input",
            Error::ResourceExhausted(_) => "resource",
            Error::Timeout(_) => "timeout",
            Error::Lifecycle(_) => "lifecycle",
            Error::NotFound(_) => "not_found",
            Error::Serialization(_) => "serialization",
            Error::Generic(_) => "generic",
        }
    }
}
