//! Core types for the import engine

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ParseError;

/// Natural key of a reading; unique in the sink
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub name: String,
    pub datetime: NaiveDateTime,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name='{}', datetime='{}'", self.name, self.datetime)
    }
}

/// A temperature reading extracted from one input row
///
/// Only the mapped columns survive parsing; any other input columns are
/// dropped before a reading exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureReading {
    name: String,
    datetime: NaiveDateTime,
    temp: f64,
}

impl TemperatureReading {
    pub fn new(name: impl Into<String>, datetime: NaiveDateTime, temp: f64) -> Self {
        Self {
            name: name.into(),
            datetime,
            temp,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datetime(&self) -> NaiveDateTime {
        self.datetime
    }

    pub fn temp(&self) -> f64 {
        self.temp
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            name: self.name.clone(),
            datetime: self.datetime,
        }
    }
}

/// One row as delivered by a record source
///
/// `fields` holds only the projected columns, in ascending input-column
/// order. A row shorter than the projection simply has fewer fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line number in the input
    pub line: u64,
    pub fields: Vec<String>,
    /// Full input row, for error reporting
    pub raw: String,
}

/// A slot in a chunk, in source order
#[derive(Debug, Clone)]
pub enum ChunkItem {
    Record {
        line: u64,
        reading: TemperatureReading,
    },
    /// Parse failure kept in place so it is skip-classified at commit time
    Malformed(ParseError),
}

impl ChunkItem {
    pub fn line(&self) -> u64 {
        match self {
            ChunkItem::Record { line, .. } => *line,
            ChunkItem::Malformed(err) => err.line,
        }
    }
}

/// Ordered, bounded batch committed as one transaction
#[derive(Debug, Clone)]
pub struct Chunk {
    number: u64,
    items: Vec<ChunkItem>,
}

impl Chunk {
    pub fn new(number: u64, items: Vec<ChunkItem>) -> Self {
        Self { number, items }
    }

    /// 1-based position of this chunk in the run
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn items(&self) -> &[ChunkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, ChunkItem::Record { .. }))
            .count()
    }
}

/// Per-item result of a chunk commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipOutcome {
    Accepted,
    SkippedDuplicate,
    SkippedParseError,
    FatalError,
}

impl SkipOutcome {
    pub fn as_str(&self) -> &str {
        match self {
            SkipOutcome::Accepted => "accepted",
            SkipOutcome::SkippedDuplicate => "skipped_duplicate",
            SkipOutcome::SkippedParseError => "skipped_parse_error",
            SkipOutcome::FatalError => "fatal_error",
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SkipOutcome::SkippedDuplicate | SkipOutcome::SkippedParseError
        )
    }
}

/// An item left out of the sink for a tolerated reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
    pub chunk: u64,
    pub line: u64,
    pub outcome: SkipOutcome,
    /// Absent when the row never parsed
    pub key: Option<RecordKey>,
    pub description: String,
}

/// Result of one committed chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkReport {
    pub chunk_number: u64,
    /// Items pulled from the source, skipped ones included
    pub read: u64,
    pub written: u64,
    pub skipped: Vec<SkippedItem>,
}

impl ChunkReport {
    pub fn skipped_count(&self) -> u64 {
        self.skipped.len() as u64
    }

    pub fn duplicates(&self) -> u64 {
        self.count_outcome(SkipOutcome::SkippedDuplicate)
    }

    pub fn parse_errors(&self) -> u64 {
        self.count_outcome(SkipOutcome::SkippedParseError)
    }

    fn count_outcome(&self, outcome: SkipOutcome) -> u64 {
        self.skipped.iter().filter(|s| s.outcome == outcome).count() as u64
    }
}

/// Aggregate counters for one run
///
/// Only resolved chunks are applied, so `total_read == total_written +
/// total_skipped` holds between chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub total_read: u64,
    pub total_written: u64,
    pub total_skipped: u64,
    pub duplicates_skipped: u64,
    pub parse_errors_skipped: u64,
    pub chunks_committed: u64,
    pub errors: Vec<String>,
}

impl RunCounters {
    pub fn apply(&mut self, report: &ChunkReport) {
        self.total_read += report.read;
        self.total_written += report.written;
        self.total_skipped += report.skipped_count();
        self.duplicates_skipped += report.duplicates();
        self.parse_errors_skipped += report.parse_errors();
        self.chunks_committed += 1;
        self.errors.extend(
            report
                .skipped
                .iter()
                .map(|s| format!("line {}: {}", s.line, s.description)),
        );
    }

    pub fn record_fatal(&mut self, description: impl Into<String>) {
        self.errors.push(description.into());
    }

    pub fn is_balanced(&self) -> bool {
        self.total_read == self.total_written + self.total_skipped
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a run, handed to listeners at start
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
}

/// Final report of a run, emitted on every terminal transition
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub job_name: String,
    pub status: RunStatus,
    pub total_read: u64,
    pub total_written: u64,
    pub total_skipped: u64,
    pub duplicates_skipped: u64,
    pub parse_errors_skipped: u64,
    pub chunks_committed: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(context: &RunContext, status: RunStatus, counters: RunCounters) -> Self {
        Self {
            run_id: context.run_id,
            job_name: context.job_name.clone(),
            status,
            total_read: counters.total_read,
            total_written: counters.total_written,
            total_skipped: counters.total_skipped,
            duplicates_skipped: counters.duplicates_skipped,
            parse_errors_skipped: counters.parse_errors_skipped,
            chunks_committed: counters.chunks_committed,
            errors: counters.errors,
            started_at: context.started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
