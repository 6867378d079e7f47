use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the plot relay
#[derive(Error, Debug)]
pub enum RelayError {
    // Connection errors
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection to worker at {endpoint} timed out")]
    ConnectTimeout { endpoint: String },

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed by worker")]
    ConnectionClosed,

    #[error("Worker endpoint not published yet")]
    EndpointNotFound,

    // Worker process errors
    #[error("Worker executable not found: {0}")]
    WorkerExecutableMissing(PathBuf),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker process {pid} vanished after respawn")]
    WorkerVanished { pid: u32 },

    #[error("Worker endpoint still unresolved after {attempts} attempts")]
    EndpointUnresolved { attempts: u32 },

    // Session errors
    #[error("Retry budget exhausted after {attempts} failed attempts")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("Plot relay unavailable: {reason}")]
    RelayUnavailable { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Whether this error ends the session instead of being retried
    pub fn is_fatal(&self) -> bool {
        match self {
            RelayError::RetryBudgetExhausted { .. }
            | RelayError::WorkerVanished { .. }
            | RelayError::EndpointUnresolved { .. }
            | RelayError::WorkerExecutableMissing(_)
            | RelayError::SpawnFailed(_)
            | RelayError::RelayUnavailable { .. }
            | RelayError::InvalidConfig(_) => true,

            RelayError::WebSocket(_)
            | RelayError::ConnectTimeout { .. }
            | RelayError::Timeout
            | RelayError::ConnectionClosed
            | RelayError::EndpointNotFound
            | RelayError::InvalidEndpoint(_)
            | RelayError::Serialization(_)
            | RelayError::Io(_) => false,
        }
    }

    /// Check if the session may retry after this error
    pub fn is_transient(&self) -> bool {
        !self.is_fatal()
    }
}

// Convert from WebSocket protocol errors
impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        RelayError::WebSocket(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> Self {
        RelayError::InvalidEndpoint(err.to_string())
    }
}
