//! Shared helpers for etl-ingest integration tests
//!
//! - [`TestPostgres`]: PostgreSQL 16 in a testcontainer with a ready pool
//! - [`fixture`] / [`write_csv`]: input files for import runs
//! - [`test_config`]: configuration pointing at a given input file

#![allow(dead_code)]

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

use etl_ingest::config::Config;

pub const POSTGRES_TAG: &str = "16-alpine";

/// PostgreSQL test container wrapper
///
/// The container stops when this value is dropped.
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag(POSTGRES_TAG)
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

/// Path of a file under `tests/fixtures`
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Write `contents` to a temporary CSV file
pub fn write_csv(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(contents.as_bytes())
        .expect("Failed to write temp file");
    file.flush().expect("Failed to flush temp file");
    file
}

/// Default configuration reading `input` with the given chunk size
pub fn test_config(input: impl Into<PathBuf>, chunk_size: usize) -> Config {
    let mut config = Config::default();
    config.source.input_file = input.into();
    config.job.chunk_size = chunk_size;
    config.job.name = "integration-test".to_string();
    config
}

/// Initialize test tracing
///
/// Call once at the beginning of a test to see logs.
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,etl_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}
