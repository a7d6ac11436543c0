//! Run lifecycle hooks

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use super::types::{RunContext, RunStatus, RunSummary, SkipOutcome, SkippedItem};

/// Observer of a single run
///
/// Hooks are for reporting only; nothing a listener does changes the
/// outcome of the run.
#[async_trait]
pub trait RunListener: Send + Sync {
    async fn on_run_start(&self, _context: &RunContext) {}

    /// Called once per skipped item, after its chunk committed
    async fn on_skip(&self, _item: &SkippedItem) {}

    async fn on_run_end(&self, _summary: &RunSummary) {}
}

/// Logs the end-of-run banner
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryLogger;

#[async_trait]
impl RunListener for SummaryLogger {
    async fn on_run_start(&self, context: &RunContext) {
        info!(run_id = %context.run_id, "Starting temperature import job: {}", context.job_name);
    }

    async fn on_run_end(&self, summary: &RunSummary) {
        info!("===========================================");
        info!("       TEMPERATURE IMPORT JOB SUMMARY      ");
        info!("===========================================");
        info!("Status:                    {}", summary.status.as_str().to_uppercase());
        info!("Total records processed:   {}", summary.total_read);
        info!("Records inserted:          {}", summary.total_written);
        info!("Duplicates skipped:        {}", summary.duplicates_skipped);
        info!("Parse errors skipped:      {}", summary.parse_errors_skipped);
        info!("Total skipped:             {}", summary.total_skipped);
        info!("Chunks committed:          {}", summary.chunks_committed);
        info!("Duration:                  {} ms", summary.duration_ms());
        info!("Errors encountered:        {}", summary.errors.len());
        if summary.status == RunStatus::Failed {
            for error in &summary.errors {
                warn!("  - {}", error);
            }
        }
        info!("===========================================");
    }
}

/// Counts duplicate skips; reset at the start of every run
#[derive(Debug, Default)]
pub struct DuplicateCounter {
    count: AtomicU64,
}

impl DuplicateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl RunListener for DuplicateCounter {
    async fn on_run_start(&self, _context: &RunContext) {
        self.reset();
    }

    async fn on_skip(&self, item: &SkippedItem) {
        if item.outcome == SkipOutcome::SkippedDuplicate {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::types::RunCounters;
    use chrono::Utc;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn context() -> RunContext {
        RunContext {
            run_id: Uuid::new_v4(),
            job_name: "test".to_string(),
            started_at: Utc::now(),
        }
    }

    /// Run `on_run_end` for a summary and return what was logged
    async fn logged_banner(status: RunStatus, counters: RunCounters) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::INFO)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let summary = RunSummary::new(&context(), status, counters);
        SummaryLogger.on_run_end(&summary).await;
        captured.text()
    }

    #[tokio::test]
    async fn test_summary_logger_prints_completed_banner() {
        let counters = RunCounters {
            total_read: 5,
            total_written: 3,
            total_skipped: 2,
            duplicates_skipped: 2,
            chunks_committed: 1,
            ..RunCounters::default()
        };
        let output = logged_banner(RunStatus::Completed, counters).await;

        assert!(output.contains("TEMPERATURE IMPORT JOB SUMMARY"));
        assert!(output.contains("Status:                    COMPLETED"));
        assert!(output.contains("Total records processed:   5"));
        assert!(output.contains("Records inserted:          3"));
        assert!(output.contains("Duplicates skipped:        2"));
        assert!(!output.contains("WARN"));
    }

    #[tokio::test]
    async fn test_summary_logger_lists_errors_on_failure() {
        let mut counters = RunCounters::default();
        counters.record_fatal("Sink failure: connection reset");
        let output = logged_banner(RunStatus::Failed, counters).await;

        assert!(output.contains("Status:                    FAILED"));
        assert!(output.contains("Errors encountered:        1"));
        assert!(output.contains("WARN"));
        assert!(output.contains("  - Sink failure: connection reset"));
    }

    fn item(outcome: SkipOutcome) -> SkippedItem {
        SkippedItem {
            chunk: 1,
            line: 2,
            outcome,
            key: None,
            description: "skipped".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_counter_counts_only_duplicates_and_resets() {
        let counter = DuplicateCounter::new();
        counter.on_skip(&item(SkipOutcome::SkippedDuplicate)).await;
        counter.on_skip(&item(SkipOutcome::SkippedParseError)).await;
        counter.on_skip(&item(SkipOutcome::SkippedDuplicate)).await;
        assert_eq!(counter.count(), 2);

        counter.on_run_start(&context()).await;
        assert_eq!(counter.count(), 0);
    }
}
