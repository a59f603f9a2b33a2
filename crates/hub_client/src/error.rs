//! Error types for the hub client.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame that is not a valid update.
    #[error("Protocol error: {0}")]
    Protocol(#[from] common::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Operation needs an open connection.
    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Terminal: the reconnect budget is spent and the client has stopped.
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
