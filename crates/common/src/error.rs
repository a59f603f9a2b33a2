//! Error types for the shared protocol.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown update type: {0}")]
    UnknownUpdateType(String),

    #[error("Invalid heartbeat policy: {0}")]
    InvalidHeartbeatPolicy(String),
}

pub type Result<T> = std::result::Result<T, Error>;
