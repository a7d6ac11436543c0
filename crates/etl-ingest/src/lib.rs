//! Temperature import engine
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Imports `name, datetime, temp` readings from delimited text into a
//! relational table, committing in fixed-size chunks and skipping a bounded
//! number of bad rows.
//!
//! # Overview
//!
//! - **Source**: [`framework::CsvRecordSource`] skips header lines and
//!   projects the mapped columns
//! - **Parsing**: [`framework::TemperatureParser`] types each row
//! - **Chunking**: [`framework::ChunkAssembler`] groups items, keeping
//!   malformed rows in place
//! - **Commit**: [`framework::TransactionalSink`] writes a chunk in one
//!   transaction with per-record savepoints
//! - **Skips**: [`framework::SkipPolicy`] tolerates duplicates and parse
//!   errors up to a limit
//! - **Run**: [`framework::RunCoordinator`] drives the loop and reports a
//!   [`framework::RunSummary`]
//!
//! # Example
//!
//! ```no_run
//! use etl_ingest::config::Config;
//! use etl_ingest::framework::{RunCoordinator, SummaryLogger};
//! use etl_ingest::storage::{postgres, PgTemperatureSink};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let pool = postgres::connect(&config.database).await?;
//! let sink = PgTemperatureSink::new(pool, config.job.table.clone())?;
//!
//! let summary = RunCoordinator::from_config(&config, sink)?
//!     .with_listener(Arc::new(SummaryLogger))
//!     .run(&CancellationToken::new())
//!     .await?;
//! println!("{} rows written", summary.total_written);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod framework;
pub mod storage;

pub use config::Config;
pub use error::{ImportError, ImportResult, ParseError, RunFailure};
