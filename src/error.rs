//! Unified error types for the real-time client.

use thiserror::Error;

/// Unified error type for the real-time client.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration loaded but failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Streaming (SSE) error.
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// WebSocket connection and message errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// Connection failed.
    #[error("websocket connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed unexpectedly.
    #[error("websocket connection closed: code={code:?}, reason={reason}")]
    ConnectionClosed {
        /// Close code.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },

    /// Message parsing failed.
    #[error("failed to parse websocket message: {0}")]
    ParseError(String),

    /// Send failed.
    #[error("failed to send websocket message: {0}")]
    SendFailed(String),

    /// Tungstenite error.
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Receive-only event stream errors.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The configured stream URL is not a usable http(s) URL.
    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Server answered with a non-success status.
    #[error("stream request returned status {status}")]
    BadStatus {
        /// HTTP status code.
        status: u16,
    },

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, RealtimeError>;
