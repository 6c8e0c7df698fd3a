//! Error types for optimist operations

use crate::CacheKey;
use thiserror::Error;

/// A Fetcher or Writer could not complete its round trip.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Endpoint unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Could not decode response: {reason}")]
    Decode { reason: String },

    #[error("Request timed out")]
    Timeout,
}

/// The server refused the submitted record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Rejected by server: {reason}")]
    Rejected { reason: String },
}

/// Failure of a single Writer call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

/// A mutation was refused because another one is still settling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("Mutation already in progress for key {key}")]
    MutationInProgress { key: CacheKey },
}

/// A fetch completed after its key was suppressed.
///
/// Internal only: the result is discarded and the error is logged, never
/// returned to callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Stale fetch for {key}: ticket generation {ticket_generation}, current {current_generation}")]
pub struct StaleSuppressionError {
    pub key: CacheKey,
    pub ticket_generation: u64,
    pub current_generation: u64,
    pub suppressed: bool,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all optimist errors.
#[derive(Debug, Clone, Error)]
pub enum OptimistError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<WriteError> for OptimistError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Transport(e) => OptimistError::Transport(e),
            WriteError::Validation(e) => OptimistError::Validation(e),
        }
    }
}

/// Result type alias for optimist operations.
pub type OptimistResult<T> = Result<T, OptimistError>;

// =============================================================================
// TESTS
// =============================================================================
