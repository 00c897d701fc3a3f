//! Error types for browser sessions and CDP communication.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i64, message: String },

    #[error("Connection closed")]
    Closed,

    #[error("Scope cancelled")]
    Cancelled,

    #[error("Timed out waiting for browser")]
    Timeout,

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Invalid CDP response: {0}")]
    InvalidResponse(String),

    #[error("Evaluation failed: {0}")]
    Evaluate(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),
}
