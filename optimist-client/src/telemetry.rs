//! Logging setup.
//!
//! `RUST_LOG` wins over the configured filter. Logs go to stderr so the
//! command output on stdout stays machine readable.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::ClientError;

/// Build the `EnvFilter` for this process.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, ClientError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.filter).map_err(|e| {
            ClientError::Telemetry(format!("invalid filter {:?}: {}", config.filter, e))
        }),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ClientError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    result.map_err(|e| ClientError::Telemetry(format!("failed to init subscriber: {}", e)))?;

    tracing::debug!(format = ?config.format, "logging initialized");
    Ok(())
}
