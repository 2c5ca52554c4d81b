use crate::app::config::ConfigError;
use crate::store::StoreError;
use thiserror::Error;

/// Top-level error type for producer-side calls.
///
/// Only API misuse and local store failures surface here. Anything past the
/// enqueue boundary (transport failures, server rejections) is handled by the
/// dispatcher and never reaches the caller.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Initialization error: {0}")]
    Initialization(String),
}

impl TelemetryError {
    pub fn invalid_argument(details: impl Into<String>) -> Self {
        Self::InvalidArgument(details.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
