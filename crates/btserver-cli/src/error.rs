//! Error handling for the btserver CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid service configuration: {0}")]
    ServiceConfig(#[from] btserver_core::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
