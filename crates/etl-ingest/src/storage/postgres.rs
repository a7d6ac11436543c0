//! PostgreSQL sink and run history
//!
//! One transaction per chunk; every insert runs inside a savepoint so a
//! unique violation discards only that record.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Error as SqlxError, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{validate_table_name, DatabaseConfig};
use crate::error::ImportResult;
use crate::framework::listener::RunListener;
use crate::framework::sink::{RecordSink, SinkError, SinkTransaction};
use crate::framework::types::{RunContext, RunStatus, RunSummary, TemperatureReading};

const RECORD_SAVEPOINT: &str = "etl_record";

/// Check if the error is a unique constraint violation
pub fn is_unique_violation(error: &SqlxError) -> bool {
    if let SqlxError::Database(db_err) = error {
        return db_err.is_unique_violation();
    }
    false
}

/// Whether the database refused the row itself rather than the connection
/// or transaction failing
fn is_record_rejection(error: &SqlxError) -> bool {
    if let SqlxError::Database(db_err) = error {
        // Class 22 is data exception, class 23 integrity constraint violation
        return db_err
            .code()
            .is_some_and(|code| code.starts_with("22") || code.starts_with("23"));
    }
    false
}

/// Open a pool for the import
pub async fn connect(config: &DatabaseConfig) -> ImportResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Temperature table behind a connection pool
#[derive(Debug, Clone)]
pub struct PgTemperatureSink {
    pool: PgPool,
    table: String,
    insert_sql: Arc<str>,
}

impl PgTemperatureSink {
    pub fn new(pool: PgPool, table: impl Into<String>) -> ImportResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        let insert_sql = format!("INSERT INTO {table} (name, datetime, temp) VALUES ($1, $2, $3)");
        Ok(Self {
            pool,
            table,
            insert_sql: insert_sql.into(),
        })
    }

    /// Create the table with its `(name, datetime)` uniqueness if missing
    pub async fn ensure_schema(&self) -> ImportResult<()> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                datetime TIMESTAMP NOT NULL,
                temp DOUBLE PRECISION NOT NULL,
                UNIQUE (name, datetime)
            )
            "#,
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        info!(table = %self.table, "Ensured temperature table exists");
        Ok(())
    }

    pub async fn count_rows(&self) -> ImportResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// All stored readings ordered by key
    pub async fn fetch_all(&self) -> ImportResult<Vec<TemperatureReading>> {
        let sql = format!(
            "SELECT name, datetime, temp FROM {} ORDER BY name, datetime",
            self.table
        );
        let rows: Vec<(String, NaiveDateTime, f64)> =
            sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(name, datetime, temp)| TemperatureReading::new(name, datetime, temp))
            .collect())
    }
}

#[async_trait]
impl RecordSink for PgTemperatureSink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkError::Fatal(format!("failed to start transaction: {e}")))?;
        Ok(Box::new(PgChunkTransaction {
            tx,
            insert_sql: Arc::clone(&self.insert_sql),
        }))
    }
}

struct PgChunkTransaction {
    tx: Transaction<'static, Postgres>,
    insert_sql: Arc<str>,
}

impl PgChunkTransaction {
    async fn savepoint(&mut self, statement: &str) -> Result<(), SinkError> {
        let sql = format!("{statement} {RECORD_SAVEPOINT}");
        sqlx::query(&sql)
            .execute(&mut *self.tx)
            .await
            .map(|_| ())
            .map_err(|e| SinkError::Fatal(format!("{statement} failed: {e}")))
    }
}

#[async_trait]
impl SinkTransaction for PgChunkTransaction {
    async fn insert(&mut self, reading: &TemperatureReading) -> Result<(), SinkError> {
        self.savepoint("SAVEPOINT").await?;

        let result = sqlx::query(&self.insert_sql)
            .bind(reading.name())
            .bind(reading.datetime())
            .bind(reading.temp())
            .execute(&mut *self.tx)
            .await;

        match result {
            Ok(_) => self.savepoint("RELEASE SAVEPOINT").await,
            Err(e) if is_unique_violation(&e) || is_record_rejection(&e) => {
                self.savepoint("ROLLBACK TO SAVEPOINT").await?;
                self.savepoint("RELEASE SAVEPOINT").await?;
                let key = reading.key();
                let message = e.to_string();
                if is_unique_violation(&e) {
                    Err(SinkError::UniqueViolation { key, message })
                } else {
                    Err(SinkError::Rejected { key, message })
                }
            },
            Err(e) => Err(SinkError::Fatal(format!("insert failed: {e}"))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let this = *self;
        this.tx
            .commit()
            .await
            .map_err(|e| SinkError::Fatal(format!("commit failed: {e}")))
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        let this = *self;
        this.tx
            .rollback()
            .await
            .map_err(|e| SinkError::Fatal(format!("rollback failed: {e}")))
    }
}

/// One row of `import_runs`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub job_name: String,
    pub status: String,
    pub total_read: i64,
    pub total_written: i64,
    pub total_skipped: i64,
    pub duplicates_skipped: i64,
    pub parse_errors_skipped: i64,
    pub chunks_committed: i64,
    pub errors: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Persists run history; its own failures never affect the run
#[derive(Debug, Clone)]
pub struct PgRunRecorder {
    pool: PgPool,
}

impl PgRunRecorder {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> ImportResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS import_runs (
                run_id UUID PRIMARY KEY,
                job_name VARCHAR(255) NOT NULL,
                status VARCHAR(32) NOT NULL,
                total_read BIGINT NOT NULL DEFAULT 0,
                total_written BIGINT NOT NULL DEFAULT 0,
                total_skipped BIGINT NOT NULL DEFAULT 0,
                duplicates_skipped BIGINT NOT NULL DEFAULT 0,
                parse_errors_skipped BIGINT NOT NULL DEFAULT 0,
                chunks_committed BIGINT NOT NULL DEFAULT 0,
                errors JSONB NOT NULL DEFAULT '[]'::jsonb,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch(&self, run_id: Uuid) -> ImportResult<Option<RunRecord>> {
        let record = sqlx::query_as::<_, RunRecord>("SELECT * FROM import_runs WHERE run_id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn insert_started(&self, context: &RunContext) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            INSERT INTO import_runs (run_id, job_name, status, started_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(context.run_id)
        .bind(&context.job_name)
        .bind(RunStatus::Running.as_str())
        .bind(context.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_finished(&self, summary: &RunSummary) -> Result<(), SqlxError> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = $2,
                total_read = $3,
                total_written = $4,
                total_skipped = $5,
                duplicates_skipped = $6,
                parse_errors_skipped = $7,
                chunks_committed = $8,
                errors = $9,
                finished_at = $10
            WHERE run_id = $1
            "#,
        )
        .bind(summary.run_id)
        .bind(summary.status.as_str())
        .bind(to_i64(summary.total_read))
        .bind(to_i64(summary.total_written))
        .bind(to_i64(summary.total_skipped))
        .bind(to_i64(summary.duplicates_skipped))
        .bind(to_i64(summary.parse_errors_skipped))
        .bind(to_i64(summary.chunks_committed))
        .bind(serde_json::json!(summary.errors))
        .bind(summary.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl RunListener for PgRunRecorder {
    async fn on_run_start(&self, context: &RunContext) {
        if let Err(e) = self.insert_started(context).await {
            warn!(run_id = %context.run_id, error = %e, "Failed to record run start");
        }
    }

    async fn on_run_end(&self, summary: &RunSummary) {
        if let Err(e) = self.update_finished(summary).await {
            warn!(run_id = %summary.run_id, error = %e, "Failed to record run end");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_i64_saturates() {
        assert_eq!(to_i64(5), 5);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn test_non_database_errors_are_not_rejections() {
        let err = SqlxError::RowNotFound;
        assert!(!is_unique_violation(&err));
        assert!(!is_record_rejection(&err));
    }

    #[tokio::test]
    async fn test_rejects_unsafe_table_name() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgresql://localhost/etl")
            .unwrap();
        assert!(PgTemperatureSink::new(pool.clone(), "temperature_data").is_ok());
        assert!(PgTemperatureSink::new(pool, "t; DROP TABLE t").is_err());
    }
}
