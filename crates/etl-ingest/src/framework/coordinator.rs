//! Run coordinator
//!
//! Drives the assemble -> commit loop for one run:
//! 1. Reset counters and the skip budget, notify listeners
//! 2. Pull a chunk, commit it, fold the report into the counters
//! 3. Stop on exhaustion, cancellation or the first fatal error
//!
//! Chunks are strictly sequential. Cancellation is observed between chunks
//! only, never while a commit is in flight.

use chrono::Utc;
use std::fs::File;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{ImportError, ImportResult, RunFailure};

use super::assembler::ChunkAssembler;
use super::listener::RunListener;
use super::parser::{RecordParser, TemperatureParser};
use super::sink::{RecordSink, TransactionalSink};
use super::skip::SkipPolicy;
use super::source::{CsvRecordSource, RecordSource};
use super::types::{RunContext, RunCounters, RunStatus, RunSummary, SkipOutcome, SkippedItem};

/// Executes exactly one import run
pub struct RunCoordinator<S, P, K> {
    assembler: ChunkAssembler<S, P>,
    sink: TransactionalSink<K>,
    policy: SkipPolicy,
    job_name: String,
    listeners: Vec<Arc<dyn RunListener>>,
}

impl<K: RecordSink> RunCoordinator<CsvRecordSource<File>, TemperatureParser, K> {
    /// Wire a CSV file import from configuration
    ///
    /// Validates `config` and opens the input file, so both failures happen
    /// before the run starts.
    pub fn from_config(config: &Config, sink: K) -> ImportResult<Self> {
        config.validate()?;

        let source = CsvRecordSource::open(&config.source.input_file, &config.source)?;
        let parser = TemperatureParser::new(
            config.source.columns,
            config.source.timestamp_format.clone(),
        );
        let assembler = ChunkAssembler::new(source, parser, config.job.chunk_size)?;
        let policy = SkipPolicy::new(config.job.skip_limit)
            .skip_duplicates(config.job.skip_duplicates)
            .skip_parse_errors(config.job.skip_parse_errors);

        Ok(Self::new(assembler, sink, policy, config.job.name.clone()))
    }
}

impl<S, P, K> RunCoordinator<S, P, K>
where
    S: RecordSource,
    P: RecordParser,
    K: RecordSink,
{
    pub fn new(
        assembler: ChunkAssembler<S, P>,
        sink: K,
        policy: SkipPolicy,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            assembler,
            sink: TransactionalSink::new(sink),
            policy,
            job_name: job_name.into(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RunListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Run to a terminal state
    ///
    /// `Completed` and `Cancelled` return the summary. `Failed` returns it
    /// inside [`RunFailure`] together with the fatal cause.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<RunSummary, RunFailure> {
        let context = RunContext {
            run_id: Uuid::new_v4(),
            job_name: self.job_name.clone(),
            started_at: Utc::now(),
        };
        let mut counters = RunCounters::default();
        self.policy.reset();

        info!(
            run_id = %context.run_id,
            job = %context.job_name,
            chunk_size = self.assembler.chunk_size(),
            skip_limit = self.policy.limit(),
            "Import run started"
        );
        for listener in &self.listeners {
            listener.on_run_start(&context).await;
        }

        let outcome = self.drive(&mut counters, cancel).await;

        match outcome {
            Ok(status) => {
                let summary = RunSummary::new(&context, status, counters);
                if status == RunStatus::Cancelled {
                    warn!(run_id = %summary.run_id, read = summary.total_read, "Import run cancelled");
                }
                self.finish(&summary).await;
                Ok(summary)
            },
            Err(cause) => {
                error!(run_id = %context.run_id, error = %cause, "Import run failed");
                counters.record_fatal(cause.to_string());
                let summary = RunSummary::new(&context, RunStatus::Failed, counters);
                self.finish(&summary).await;
                Err(RunFailure { summary, cause })
            },
        }
    }

    async fn drive(
        &mut self,
        counters: &mut RunCounters,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, ImportError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(RunStatus::Cancelled);
            }

            let Some(chunk) = self.assembler.next_chunk()? else {
                return Ok(RunStatus::Completed);
            };

            let report = self.sink.commit(&chunk, &mut self.policy).await?;
            counters.apply(&report);

            for item in &report.skipped {
                log_skip(item);
                for listener in &self.listeners {
                    listener.on_skip(item).await;
                }
            }
        }
    }

    async fn finish(&self, summary: &RunSummary) {
        info!(
            run_id = %summary.run_id,
            status = %summary.status,
            read = summary.total_read,
            written = summary.total_written,
            skipped = summary.total_skipped,
            duplicates = summary.duplicates_skipped,
            chunks = summary.chunks_committed,
            duration_ms = summary.duration_ms(),
            "Import run finished"
        );
        for listener in &self.listeners {
            listener.on_run_end(summary).await;
        }
    }
}

fn log_skip(item: &SkippedItem) {
    match item.outcome {
        SkipOutcome::SkippedDuplicate => info!(
            chunk = item.chunk,
            line = item.line,
            "Duplicate entry skipped: {}",
            item.key.as_ref().map(ToString::to_string).unwrap_or_default()
        ),
        _ => warn!(
            chunk = item.chunk,
            line = item.line,
            outcome = item.outcome.as_str(),
            "Skipped item: {}",
            item.description
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_TIMESTAMP_FORMAT;
    use crate::framework::listener::DuplicateCounter;
    use crate::framework::parser::ColumnMapping;
    use crate::framework::source::SourceError;
    use crate::framework::types::RawRow;
    use crate::storage::memory::MemorySink;
    use std::collections::VecDeque;

    struct VecSource {
        rows: VecDeque<Result<RawRow, SourceError>>,
    }

    impl RecordSource for VecSource {
        fn next_row(&mut self) -> Result<Option<RawRow>, SourceError> {
            self.rows.pop_front().transpose()
        }
    }

    fn row(line: u64, name: &str, datetime: &str, temp: &str) -> Result<RawRow, SourceError> {
        let fields = vec![name.to_string(), datetime.to_string(), temp.to_string()];
        Ok(RawRow {
            line,
            raw: fields.join(","),
            fields,
        })
    }

    fn unique_rows() -> Vec<Result<RawRow, SourceError>> {
        vec![
            row(2, "Location-A", "2024-01-15 10:00:00", "22.5"),
            row(3, "Location-B", "2024-01-15 10:00:00", "18.3"),
            row(4, "Location-C", "2024-01-15 10:00:00", "25.1"),
            row(5, "Location-A", "2024-01-15 11:00:00", "23.0"),
            row(6, "Location-B", "2024-01-15 11:00:00", "19.1"),
        ]
    }

    fn duplicate_rows() -> Vec<Result<RawRow, SourceError>> {
        vec![
            row(2, "Location-A", "2024-01-15 10:00:00", "22.5"),
            row(3, "Location-B", "2024-01-15 10:00:00", "18.3"),
            row(4, "Location-A", "2024-01-15 10:00:00", "22.7"),
            row(5, "Location-C", "2024-01-15 10:00:00", "25.1"),
            row(6, "Location-B", "2024-01-15 10:00:00", "18.5"),
        ]
    }

    fn coordinator(
        rows: Vec<Result<RawRow, SourceError>>,
        sink: MemorySink,
        chunk_size: usize,
        skip_limit: u64,
    ) -> RunCoordinator<VecSource, TemperatureParser, MemorySink> {
        let assembler = ChunkAssembler::new(
            VecSource { rows: rows.into() },
            TemperatureParser::new(ColumnMapping::default(), DEFAULT_TIMESTAMP_FORMAT),
            chunk_size,
        )
        .unwrap();
        RunCoordinator::new(assembler, sink, SkipPolicy::new(skip_limit), "test-import")
    }

    fn assert_balanced(summary: &RunSummary) {
        assert_eq!(
            summary.total_read,
            summary.total_written + summary.total_skipped,
            "read must equal written + skipped: {summary:?}"
        );
        assert!(summary.duplicates_skipped <= summary.total_skipped);
    }

    #[tokio::test]
    async fn test_unique_rows_all_written() {
        let sink = MemorySink::new();
        let summary = coordinator(unique_rows(), sink.clone(), 100, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_read, 5);
        assert_eq!(summary.total_written, 5);
        assert_eq!(summary.total_skipped, 0);
        assert_eq!(summary.duplicates_skipped, 0);
        assert_eq!(summary.chunks_committed, 1);
        assert_eq!(sink.len(), 5);
        assert_balanced(&summary);
    }

    #[tokio::test]
    async fn test_duplicate_pairs_skipped() {
        let sink = MemorySink::new();
        let counter = Arc::new(DuplicateCounter::new());
        let summary = coordinator(duplicate_rows(), sink.clone(), 100, 10_000)
            .with_listener(counter.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.total_read, 5);
        assert_eq!(summary.total_written, 3);
        assert_eq!(summary.total_skipped, 2);
        assert_eq!(summary.duplicates_skipped, 2);
        assert_eq!(counter.count(), 2);
        assert_eq!(sink.len(), 3);
        assert_balanced(&summary);
    }

    #[tokio::test]
    async fn test_duplicates_across_chunks() {
        let sink = MemorySink::new();
        let summary = coordinator(duplicate_rows(), sink.clone(), 2, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.chunks_committed, 3);
        assert_eq!(summary.total_written, 3);
        assert_eq!(summary.duplicates_skipped, 2);
        assert_balanced(&summary);
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let sink = MemorySink::new();
        coordinator(unique_rows(), sink.clone(), 100, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        let counter = Arc::new(DuplicateCounter::new());
        let second = coordinator(unique_rows(), sink.clone(), 100, 10_000)
            .with_listener(counter.clone())
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.total_written, 0);
        assert_eq!(second.duplicates_skipped, second.total_read);
        assert_eq!(counter.count(), 5);
        assert_eq!(sink.len(), 5);
    }

    #[tokio::test]
    async fn test_one_malformed_row_in_full_chunk() {
        let mut rows: Vec<_> = (0..9)
            .map(|i| row(i + 2, &format!("Station-{i}"), "2024-01-15 10:00:00", "20.0"))
            .collect();
        rows.insert(4, row(99, "Station-X", "not a date", "20.0"));

        let sink = MemorySink::new();
        let summary = coordinator(rows, sink.clone(), 10, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.chunks_committed, 1);
        assert_eq!(summary.total_read, 10);
        assert_eq!(summary.total_written, 9);
        assert_eq!(summary.total_skipped, 1);
        assert_eq!(summary.parse_errors_skipped, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("line 99:"));
        assert_balanced(&summary);
    }

    #[tokio::test]
    async fn test_skip_limit_fails_and_keeps_earlier_chunks() {
        // Chunk 1 has one duplicate, chunk 2 two more; limit 2 trips in chunk 2
        let rows = vec![
            row(2, "A", "2024-01-15 10:00:00", "1.0"),
            row(3, "A", "2024-01-15 10:00:00", "1.0"),
            row(4, "B", "2024-01-15 10:00:00", "1.0"),
            row(5, "B", "2024-01-15 10:00:00", "1.0"),
            row(6, "C", "2024-01-15 10:00:00", "1.0"),
            row(7, "C", "2024-01-15 10:00:00", "1.0"),
        ];
        let sink = MemorySink::new();
        let failure = coordinator(rows, sink.clone(), 3, 2)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.cause, ImportError::SkipLimitExceeded { .. }));
        let summary = &failure.summary;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.chunks_committed, 1);
        assert_eq!(summary.total_read, 3);
        assert_eq!(summary.total_written, 2);
        assert_eq!(summary.total_skipped, 1);
        assert!(summary
            .errors
            .last()
            .is_some_and(|e| e.contains("Skip limit exceeded")));
        assert_eq!(sink.len(), 2);
        assert_balanced(summary);
    }

    #[tokio::test]
    async fn test_fatal_sink_failure_rolls_back_failing_chunk() {
        let sink = MemorySink::new().with_fatal_failure_at(4);
        let failure = coordinator(unique_rows(), sink.clone(), 2, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.cause, ImportError::SinkFatal(_)));
        assert_eq!(failure.summary.status, RunStatus::Failed);
        assert_eq!(failure.summary.chunks_committed, 1);
        assert_eq!(failure.summary.total_written, 2);
        assert_eq!(sink.len(), 2);
        assert_balanced(&failure.summary);
    }

    #[tokio::test]
    async fn test_source_io_failure_is_fatal() {
        let mut rows = unique_rows();
        rows.insert(3, Err(SourceError::Io("read error".to_string())));
        let sink = MemorySink::new();
        let failure = coordinator(rows, sink.clone(), 2, 10_000)
            .run(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(failure.cause, ImportError::SourceRead(_)));
        assert_eq!(failure.summary.total_written, 2);
        assert_balanced(&failure.summary);
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let sink = MemorySink::new();
        let summary = coordinator(unique_rows(), sink.clone(), 2, 10_000)
            .run(&cancel)
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.total_read, 0);
        assert!(sink.is_empty());
    }

    struct CancelAfterFirstChunk(CancellationToken);

    #[async_trait::async_trait]
    impl RunListener for CancelAfterFirstChunk {
        async fn on_skip(&self, _item: &SkippedItem) {
            self.0.cancel();
        }
    }

    #[tokio::test]
    async fn test_cancel_between_chunks_keeps_exact_counters() {
        let cancel = CancellationToken::new();
        let sink = MemorySink::new();
        let summary = coordinator(duplicate_rows(), sink.clone(), 3, 10_000)
            .with_listener(Arc::new(CancelAfterFirstChunk(cancel.clone())))
            .run(&cancel)
            .await
            .unwrap();

        assert_eq!(summary.status, RunStatus::Cancelled);
        assert_eq!(summary.chunks_committed, 1);
        assert_eq!(summary.total_read, 3);
        assert_eq!(summary.total_written, 2);
        assert_eq!(summary.duplicates_skipped, 1);
        assert_eq!(sink.len(), 2);
        assert_balanced(&summary);
    }
}
