//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Credential error: {0}")]
    Credentials(#[from] qstream_core::CoreError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<qstream_ws::WsError>),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] qstream_telemetry::TelemetryError),

    #[error("Session task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<qstream_ws::WsError> for AppError {
    fn from(e: qstream_ws::WsError) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
