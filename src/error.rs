//! Error types for stereo-lavalink.

use thiserror::Error;

/// Main error type for the client runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed options or operator misuse, raised before anything is sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// No connected node is available to serve the request.
    #[error("no nodes available")]
    NoNodes,

    /// HTTP request to the node failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The node answered with something we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A node used up every reconnect attempt.
    #[error("node {0} ran out of reconnect tries")]
    ReconnectExhausted(String),

    /// The socket writer is gone.
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
