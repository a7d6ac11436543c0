//! Import error types

use thiserror::Error;

use crate::framework::types::{RecordKey, RunSummary};

/// Result type alias for import operations
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// A row that could not be turned into a reading
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {reason} (input: {raw_input:?})")]
pub struct ParseError {
    pub line: u64,
    pub reason: String,
    pub raw_input: String,
}

impl ParseError {
    pub fn new(line: u64, reason: impl Into<String>, raw_input: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
            raw_input: raw_input.into(),
        }
    }
}

/// Import error taxonomy
///
/// `Parse` and `DuplicateKey` are skippable and normally absorbed at the
/// chunk boundary. Everything else ends the run.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Duplicate key {key}: {message}")]
    DuplicateKey { key: RecordKey, message: String },

    #[error("Sink failure: {0}")]
    SinkFatal(String),

    #[error("Skip limit exceeded: {count} skips, limit is {limit}")]
    SkipLimitExceeded { count: u64, limit: u64 },

    #[error("Failed to open source {path}: {reason}")]
    SourceOpen { path: String, reason: String },

    #[error("Failed to read source: {0}")]
    SourceRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment error: {0}")]
    Env(#[from] etl_common::EnvError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A run that ended in `Failed`, with the partial summary attached
#[derive(Error, Debug)]
#[error("Import run {} failed: {cause}", .summary.run_id)]
pub struct RunFailure {
    pub summary: RunSummary,
    #[source]
    pub cause: ImportError,
}
