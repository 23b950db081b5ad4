//! Error types for geolog-core

use thiserror::Error;

use crate::api::ApiError;
use crate::sampler::CaptureError;

/// Result type alias using geolog-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in geolog-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sample not found
    #[error("Sample not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Position capture error
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Backend API error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Invalid client configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Map rendering error
    #[error("Map error: {0}")]
    Map(String),
}
