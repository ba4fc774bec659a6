//! Error handling for blockforge
//!
//! One error type for the miner, the peer behaviors and the configuration
//! layer, with classification helpers used by the background mining task.

use thiserror::Error;

/// Result type alias for blockforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for blockforge
#[derive(Error, Debug)]
pub enum Error {
    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Block production errors (template building, search bookkeeping)
    #[error("Mining error: {message}")]
    Mining { message: String },

    /// Consensus rejections surfaced by the consensus manager
    #[error("Consensus error: {message}")]
    Consensus { message: String },

    /// Peer connection errors
    #[error("Peer {peer}: {message}")]
    Peer { peer: String, message: String },

    /// Target validation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Cancellation errors for async operations
    #[error("Operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// A hard invariant was broken; the current operation must not continue
    #[error("Invariant violation: {message}")]
    InvariantViolation { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a mining error
    pub fn mining(message: impl Into<String>) -> Self {
        Self::Mining {
            message: message.into(),
        }
    }

    /// Create a consensus error
    pub fn consensus(message: impl Into<String>) -> Self {
        Self::Consensus {
            message: message.into(),
        }
    }

    /// Create a peer error
    pub fn peer(peer: impl ToString, message: impl Into<String>) -> Self {
        Self::Peer {
            peer: peer.to_string(),
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invariant violation error
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether this error comes from a shutdown or stop request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Check if the mining loop may log this error and keep going
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Mining { .. } | Error::Consensus { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Mining { .. } => "mining",
            Error::Consensus { .. } => "consensus",
            Error::Peer { .. } => "peer",
            Error::Target { .. } => "target",
            Error::Cancelled { .. } => "cancelled",
            Error::InvalidState { .. } => "invalid_state",
            Error::InvariantViolation { .. } => "invariant",
        }
    }
}
