//! Error types and handling
//!
//! Common error types used across the crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::output::OutputError;
use crate::store::StoreError;
use crate::telemetry::TelemetryError;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl AppError {
    /// Short machine-readable code for status reporting
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Telemetry(_) => "TELEMETRY_ERROR",
            AppError::Output(_) => "OUTPUT_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
