//! Error types for the client.

use optimist_core::{ConflictError, TransportError, WriteError};

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to encode output: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Failed to initialize logging: {0}")]
    Telemetry(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
