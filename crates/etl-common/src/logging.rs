//! Logging configuration and initialization
//!
//! All workspace binaries install their `tracing` subscriber through
//! [`init_logging`]. Supported:
//!
//! - console, rolling daily file, or both
//! - human readable text or JSON lines
//! - per-module filter directives on top of the base level
//!
//! Use the structured macros with fields rather than `println!`:
//!
//! ```rust
//! use tracing::{info, warn};
//!
//! let (chunk, written) = (3u64, 97u64);
//! info!(chunk, written, "Chunk committed");
//! warn!(line = 17, reason = "bad timestamp", "Skipped malformed row");
//! ```
//!
//! # Example
//!
//! ```no_run
//! use etl_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! let config = LogConfig::builder().level(LogLevel::Debug).build();
//! let _guard = init_logging(&config).unwrap();
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::env;

/// Case-insensitive lookup of `s` in a table of accepted spellings
fn parse_named<T: Copy>(kind: &str, s: &str, names: &[(&str, T)]) -> Result<T> {
    let wanted = s.trim().to_ascii_lowercase();
    names
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, value)| *value)
        .ok_or_else(|| anyhow!("unknown {kind} {s:?}"))
}

/// Minimum severity emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        let level = match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        };
        LevelFilter::from_level(level)
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(
            "log level",
            s,
            &[
                ("trace", Self::Trace),
                ("debug", Self::Debug),
                ("info", Self::Info),
                ("warn", Self::Warn),
                ("warning", Self::Warn),
                ("error", Self::Error),
            ],
        )
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Console,
    File,
    Both,
}

impl LogOutput {
    fn console(self) -> bool {
        self != LogOutput::File
    }

    fn file(self) -> bool {
        self != LogOutput::Console
    }
}

impl FromStr for LogOutput {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named(
            "log output",
            s,
            &[
                ("console", Self::Console),
                ("stdout", Self::Console),
                ("file", Self::File),
                ("both", Self::Both),
            ],
        )
    }
}

/// Line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_named("log format", s, &[("text", Self::Text), ("json", Self::Json)])
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Minimum level to emit
    pub level: LogLevel,
    pub output: LogOutput,
    pub format: LogFormat,
    /// Directory for rolling log files
    pub log_dir: PathBuf,
    /// File prefix, e.g. "etl-ingest" -> "etl-ingest.2024-01-15"
    pub log_file_prefix: String,
    /// Extra directives such as "sqlx=warn,etl_ingest=debug"
    pub filter_directives: Option<String>,
    pub include_location: bool,
    pub include_thread_ids: bool,
    pub include_targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            output: LogOutput::Console,
            format: LogFormat::Text,
            log_dir: PathBuf::from("./logs"),
            log_file_prefix: "etl".to_string(),
            filter_directives: None,
            include_location: false,
            include_thread_ids: false,
            include_targets: true,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay `LOG_*` environment variables on the defaults
    ///
    /// Recognised: `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR`,
    /// `LOG_FILE_PREFIX`, `LOG_FILTER`, `LOG_INCLUDE_LOCATION`,
    /// `LOG_INCLUDE_THREAD_IDS`, `LOG_INCLUDE_TARGETS`.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Overlay `LOG_*` environment variables on this configuration
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(level) = env::parse_opt("LOG_LEVEL")? {
            self.level = level;
        }
        if let Some(output) = env::parse_opt("LOG_OUTPUT")? {
            self.output = output;
        }
        if let Some(format) = env::parse_opt("LOG_FORMAT")? {
            self.format = format;
        }
        if let Some(dir) = env::var_opt("LOG_DIR")? {
            self.log_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env::var_opt("LOG_FILE_PREFIX")? {
            self.log_file_prefix = prefix;
        }
        if let Some(filter) = env::var_opt("LOG_FILTER")? {
            self.filter_directives = Some(filter);
        }
        self.include_location = env::parse_or("LOG_INCLUDE_LOCATION", self.include_location)?;
        self.include_thread_ids = env::parse_or("LOG_INCLUDE_THREAD_IDS", self.include_thread_ids)?;
        self.include_targets = env::parse_or("LOG_INCLUDE_TARGETS", self.include_targets)?;

        Ok(self)
    }

    pub fn builder() -> LogConfigBuilder {
        LogConfigBuilder::default()
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let mut filter =
            EnvFilter::from_default_env().add_directive(LevelFilter::from(self.level).into());

        if let Some(ref directives) = self.filter_directives {
            for directive in directives.split(',').filter(|d| !d.trim().is_empty()) {
                filter = filter.add_directive(
                    directive
                        .trim()
                        .parse()
                        .with_context(|| format!("Failed to parse filter directive {directive:?}"))?,
                );
            }
        }

        Ok(filter)
    }
}

/// Builder for [`LogConfig`]
#[derive(Default)]
pub struct LogConfigBuilder {
    config: LogConfig,
}

impl LogConfigBuilder {
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    pub fn output(mut self, output: LogOutput) -> Self {
        self.config.output = output;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.config.format = format;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.log_file_prefix = prefix.into();
        self
    }

    pub fn filter_directives(mut self, filter: impl Into<String>) -> Self {
        self.config.filter_directives = Some(filter.into());
        self
    }

    pub fn build(self) -> LogConfig {
        self.config
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(config.include_targets)
        .with_thread_ids(config.include_thread_ids)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber described by `config`
///
/// Call once at startup. When file output is enabled the returned guard
/// flushes the background writer on drop, so keep it alive in `main`.
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = config.env_filter()?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if config.output.console() {
        layers.push(fmt_layer(config, std::io::stdout, true));
    }

    if config.output.file() {
        std::fs::create_dir_all(&config.log_dir).context("Failed to create log directory")?;
        let appender = tracing_appender::rolling::daily(&config.log_dir, &config.log_file_prefix);
        let (writer, worker_guard) = tracing_appender::non_blocking(appender);
        layers.push(fmt_layer(config, writer, false));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
