//! Error types for the data channel.

use shardkeep_protocol::CloseCode;

/// Errors produced by the data channel server and client.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed with code {code}: {reason}")]
    Closed { code: u16, reason: String },

    #[error("timed out")]
    Timeout,

    #[error("server already running")]
    AlreadyRunning,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DataChannelError {
    /// The close code the server ended the session with, if that is what
    /// this error reports.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            DataChannelError::Closed { code, .. } => CloseCode::from_code(*code),
            _ => None,
        }
    }
}
