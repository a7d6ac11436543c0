//! Chunked, fault-tolerant import framework
//!
//! Reads rows from a source, commits them in fixed-size transactional chunks
//! and tolerates a bounded number of per-record failures.

pub mod types;
pub mod parser;
pub mod source;
pub mod assembler;
pub mod skip;
pub mod sink;
pub mod listener;
pub mod coordinator;

// Re-export commonly used types
pub use types::{
    Chunk, ChunkItem, ChunkReport, RawRow, RecordKey, RunContext, RunCounters, RunStatus,
    RunSummary, SkipOutcome, SkippedItem, TemperatureReading,
};
pub use parser::{ColumnMapping, RecordParser, TemperatureParser};
pub use source::{CsvRecordSource, RecordSource, SourceError};
pub use assembler::ChunkAssembler;
pub use skip::{Failure, SkipPolicy};
pub use sink::{RecordSink, SinkError, SinkTransaction, TransactionalSink};
pub use listener::{DuplicateCounter, RunListener, SummaryLogger};
pub use coordinator::RunCoordinator;
