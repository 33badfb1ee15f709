//! Process-wide log setup.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("A global logger is already installed: {0}")]
    AlreadyInstalled(String),
}

/// Builds the filter. `RUST_LOG` wins over the configured directive.
pub fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(&settings.filter).map_err(|e| LoggingError::InvalidFilter {
            filter: settings.filter.clone(),
            message: e.to_string(),
        })
    })
}

/// Installs the global subscriber and forwards `log` records into it.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(settings)?;

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if settings.json {
        Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true)),
        )
    } else {
        Box::new(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true).compact()),
        )
    };

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;
    tracing_log::LogTracer::init().map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;
    Ok(())
}
