//! Import configuration
//!
//! Loaded from the environment (with `.env` support) and overridden by CLI
//! flags in the binary.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use etl_common::env;

use crate::error::{ImportError, ImportResult};
use crate::framework::parser::ColumnMapping;

// ============================================================================
// Defaults
// ============================================================================

/// Records per transactional chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Skips tolerated before the run is failed.
pub const DEFAULT_SKIP_LIMIT: u64 = 10_000;

/// Header lines skipped at the top of the input.
pub const DEFAULT_LINES_TO_SKIP: usize = 1;

pub const DEFAULT_DELIMITER: char = ',';

/// `chrono` format of the timestamp column.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_TABLE: &str = "temperature_data";

pub const DEFAULT_JOB_NAME: &str = "temperature-import";

pub const DEFAULT_INPUT_FILE: &str = "data/input.csv";

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/etl";

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub job: JobConfig,
    pub source: SourceConfig,
    pub database: DatabaseConfig,
}

/// Chunking and skip behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub chunk_size: usize,
    pub skip_limit: u64,
    /// When false a duplicate key fails the run instead of being skipped
    pub skip_duplicates: bool,
    /// When false a malformed row fails the run instead of being skipped
    pub skip_parse_errors: bool,
    /// Target table, optionally schema-qualified
    pub table: String,
}

/// Input file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub input_file: PathBuf,
    pub lines_to_skip: usize,
    pub delimiter: char,
    pub columns: ColumnMapping,
    pub timestamp_format: String,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn from_env() -> ImportResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = ColumnMapping::default();
        let config = Config {
            job: JobConfig {
                name: env::string_or("ETL_JOB_NAME", DEFAULT_JOB_NAME)?,
                chunk_size: env::parse_or("ETL_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
                skip_limit: env::parse_or("ETL_SKIP_LIMIT", DEFAULT_SKIP_LIMIT)?,
                skip_duplicates: env::parse_or("ETL_SKIP_DUPLICATES", true)?,
                skip_parse_errors: env::parse_or("ETL_SKIP_PARSE_ERRORS", true)?,
                table: env::string_or("ETL_TABLE", DEFAULT_TABLE)?,
            },
            source: SourceConfig {
                input_file: PathBuf::from(env::string_or("ETL_INPUT_FILE", DEFAULT_INPUT_FILE)?),
                lines_to_skip: env::parse_or("ETL_LINES_TO_SKIP", DEFAULT_LINES_TO_SKIP)?,
                delimiter: env::parse_or("ETL_DELIMITER", DEFAULT_DELIMITER)?,
                columns: ColumnMapping {
                    name: env::parse_or("ETL_COLUMN_NAME", defaults.name)?,
                    datetime: env::parse_or("ETL_COLUMN_DATETIME", defaults.datetime)?,
                    temp: env::parse_or("ETL_COLUMN_TEMP", defaults.temp)?,
                },
                timestamp_format: env::string_or("ETL_TIMESTAMP_FORMAT", DEFAULT_TIMESTAMP_FORMAT)?,
            },
            database: DatabaseConfig {
                url: env::string_or("DATABASE_URL", DEFAULT_DATABASE_URL)?,
                max_connections: env::parse_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                )?,
                connect_timeout_secs: env::parse_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                )?,
            },
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ImportResult<()> {
        if self.job.chunk_size == 0 {
            return Err(ImportError::Config("chunk_size must be greater than 0".to_string()));
        }

        if self.job.name.trim().is_empty() {
            return Err(ImportError::Config("job name cannot be empty".to_string()));
        }

        validate_table_name(&self.job.table)?;

        if self.source.input_file.as_os_str().is_empty() {
            return Err(ImportError::Config("input file cannot be empty".to_string()));
        }

        self.source.delimiter_byte()?;

        if self.source.timestamp_format.trim().is_empty() {
            return Err(ImportError::Config("timestamp format cannot be empty".to_string()));
        }

        self.source.columns.validate()?;

        if self.database.url.is_empty() {
            return Err(ImportError::Config("database URL cannot be empty".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ImportError::Config(
                "database max_connections must be greater than 0".to_string(),
            ));
        }

        if self.job.skip_limit == 0 {
            tracing::warn!("skip_limit is 0, the first skipped record will fail the run");
        }

        Ok(())
    }
}

impl SourceConfig {
    /// Delimiter as the byte the csv reader expects
    pub fn delimiter_byte(&self) -> ImportResult<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ImportError::Config(format!(
                    "delimiter must be a single ASCII character, got {:?}",
                    self.delimiter
                ))
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            job: JobConfig {
                name: DEFAULT_JOB_NAME.to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                skip_limit: DEFAULT_SKIP_LIMIT,
                skip_duplicates: true,
                skip_parse_errors: true,
                table: DEFAULT_TABLE.to_string(),
            },
            source: SourceConfig {
                input_file: PathBuf::from(DEFAULT_INPUT_FILE),
                lines_to_skip: DEFAULT_LINES_TO_SKIP,
                delimiter: DEFAULT_DELIMITER,
                columns: ColumnMapping::default(),
                timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            },
        }
    }
}

/// Accept `table` or `schema.table` made of plain SQL identifiers
///
/// The table name is interpolated into SQL, so nothing that would need
/// quoting is allowed through.
pub fn validate_table_name(table: &str) -> ImportResult<()> {
    let parts: Vec<&str> = table.split('.').collect();
    let valid = parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                    part.len() <= MAX_IDENTIFIER_LEN
                        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                },
                _ => false,
            }
        });

    if valid {
        Ok(())
    } else {
        Err(ImportError::Config(format!("invalid table name: {table:?}")))
    }
}
