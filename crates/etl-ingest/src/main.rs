//! Temperature import CLI
//!
//! Usage:
//!   etl-ingest --input data/readings.csv --create-table
//!   etl-ingest --input data/readings.csv --dry-run --summary-json summary.json

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use etl_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use etl_ingest::config::Config;
use etl_ingest::framework::{
    DuplicateCounter, RecordSink, RunCoordinator, RunStatus, RunSummary, SummaryLogger,
};
use etl_ingest::storage::{postgres, MemorySink, PgRunRecorder, PgTemperatureSink};

#[derive(Parser, Debug)]
#[command(name = "etl-ingest")]
#[command(author, version, about = "Chunked, fault-tolerant import of temperature readings", long_about = None)]
struct Cli {
    /// Delimited input file
    #[arg(short, long, env = "ETL_INPUT_FILE")]
    input: Option<PathBuf>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Records per transactional chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Skips tolerated before the run fails
    #[arg(long)]
    skip_limit: Option<u64>,

    /// Header lines to skip
    #[arg(long)]
    lines_to_skip: Option<usize>,

    /// chrono format of the datetime column
    #[arg(long)]
    timestamp_format: Option<String>,

    /// Target table, optionally schema-qualified
    #[arg(long)]
    table: Option<String>,

    /// Create the target table if it does not exist
    #[arg(long)]
    create_table: bool,

    /// Validate the file against an in-memory sink; no database access
    #[arg(long, conflicts_with_all = ["create_table", "record_history"])]
    dry_run: bool,

    /// Persist run history to `import_runs`
    #[arg(long)]
    record_history: bool,

    /// Write the run summary as JSON
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(ref input) = self.input {
            config.source.input_file = input.clone();
        }
        if let Some(ref url) = self.database_url {
            config.database.url = url.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.job.chunk_size = chunk_size;
        }
        if let Some(skip_limit) = self.skip_limit {
            config.job.skip_limit = skip_limit;
        }
        if let Some(lines) = self.lines_to_skip {
            config.source.lines_to_skip = lines;
        }
        if let Some(ref format) = self.timestamp_format {
            config.source.timestamp_format = format.clone();
        }
        if let Some(ref table) = self.table {
            config.job.table = table.clone();
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("etl-ingest")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            None
        },
    };

    match execute(&cli).await {
        Ok(summary) if summary.status == RunStatus::Completed => {},
        Ok(_) => process::exit(130),
        Err(e) => {
            error!(error = %e, "Import failed");
            eprintln!("Error: {e:#}");
            process::exit(1);
        },
    }
}

async fn execute(cli: &Cli) -> Result<RunSummary> {
    let mut config = Config::from_env().context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            ctrl_c.cancel();
        }
    });

    let duplicates = Arc::new(DuplicateCounter::new());

    let result = if cli.dry_run {
        info!(input = %config.source.input_file.display(), "Dry run against in-memory sink");
        run(&config, MemorySink::new(), None, duplicates.clone(), &cancel).await
    } else {
        let pool = postgres::connect(&config.database)
            .await
            .context("Failed to connect to database")?;
        let sink = PgTemperatureSink::new(pool.clone(), config.job.table.clone())?;
        if cli.create_table {
            sink.ensure_schema()
                .await
                .context("Failed to create temperature table")?;
        }

        let recorder = if cli.record_history {
            let recorder = PgRunRecorder::new(pool);
            recorder
                .ensure_schema()
                .await
                .context("Failed to create import_runs table")?;
            Some(Arc::new(recorder))
        } else {
            None
        };

        run(&config, sink, recorder, duplicates.clone(), &cancel).await
    };

    let summary = match result {
        Ok(summary) => summary,
        Err(failure) => {
            write_summary(cli, &failure.summary)?;
            return Err(failure.into());
        },
    };

    info!(duplicates = duplicates.count(), "Duplicate entries skipped");
    write_summary(cli, &summary)?;
    Ok(summary)
}

async fn run<K: RecordSink>(
    config: &Config,
    sink: K,
    recorder: Option<Arc<PgRunRecorder>>,
    duplicates: Arc<DuplicateCounter>,
    cancel: &CancellationToken,
) -> Result<RunSummary, etl_ingest::RunFailure> {
    let coordinator = match RunCoordinator::from_config(config, sink) {
        Ok(coordinator) => coordinator,
        Err(cause) => return Err(not_started(config, cause)),
    };

    let mut coordinator = coordinator
        .with_listener(Arc::new(SummaryLogger))
        .with_listener(duplicates);
    if let Some(recorder) = recorder {
        coordinator = coordinator.with_listener(recorder);
    }

    coordinator.run(cancel).await
}

/// Failure before any chunk was read, such as an unreadable input file
fn not_started(config: &Config, cause: etl_ingest::ImportError) -> etl_ingest::RunFailure {
    let context = etl_ingest::framework::RunContext {
        run_id: uuid::Uuid::new_v4(),
        job_name: config.job.name.clone(),
        started_at: chrono::Utc::now(),
    };
    let mut counters = etl_ingest::framework::RunCounters::default();
    counters.record_fatal(cause.to_string());
    etl_ingest::RunFailure {
        summary: RunSummary::new(&context, RunStatus::Failed, counters),
        cause,
    }
}

fn write_summary(cli: &Cli, summary: &RunSummary) -> Result<()> {
    let Some(ref path) = cli.summary_json else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    info!(path = %path.display(), "Wrote run summary");
    Ok(())
}
