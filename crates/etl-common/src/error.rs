//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for environment lookups
pub type Result<T> = std::result::Result<T, EnvError>;

/// Failure to read a configuration value from the environment
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Environment variable {0} is not valid unicode")]
    NotUnicode(String),
}
