//! ETL Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the ETL workspace members:
//!
//! - **Logging**: `tracing` subscriber setup driven by [`logging::LogConfig`]
//! - **Environment**: typed reads of environment variables with proper errors
//!
//! # Example
//!
//! ```no_run
//! use etl_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{EnvError, Result};
