//! WebSocket session error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection attempts exhausted after {attempts} attempt(s)")]
    ConnectExhausted { attempts: u32 },

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Authentication already in progress")]
    AuthInProgress,

    #[error("Authentication timed out after {0:?}")]
    AuthTimeout(std::time::Duration),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Authentication retries exhausted after {attempts} attempt(s)")]
    AuthExhausted { attempts: u32 },

    #[error("Message decode error: {0}")]
    Decode(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("No response for request {request_id} within {after:?}")]
    AckTimeout {
        request_id: String,
        after: std::time::Duration,
    },

    #[error("Request id already in flight: {0}")]
    DuplicateRequestId(String),

    #[error("Shutdown requested")]
    Shutdown,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<qstream_core::CoreError> for WsError {
    fn from(err: qstream_core::CoreError) -> Self {
        Self::Config(err.to_string())
    }
}

impl WsError {
    /// Errors local to a single inbound frame; the receive loop keeps running.
    pub fn is_frame_local(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::UnknownEvent(_))
    }
}

pub type WsResult<T> = Result<T, WsError>;
