//! Hub error types.

use thiserror::Error;

/// Hub error type.
#[derive(Debug, Error)]
pub enum HubError {
    /// Malformed control message from a client.
    #[error("Protocol error: {0}")]
    Protocol(#[from] common::Error),

    /// Connection limit reached; new connections are refused.
    #[error("Connection limit of {0} reached")]
    AtCapacity(usize),

    /// Invalid startup configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
