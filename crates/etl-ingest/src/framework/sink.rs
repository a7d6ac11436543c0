//! Transactional chunk commit
//!
//! [`RecordSink`] and [`SinkTransaction`] are the narrow storage seam.
//! [`TransactionalSink`] drives one chunk through a single transaction,
//! isolating per-record constraint failures and classifying them through
//! the [`SkipPolicy`].

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::{ImportError, ImportResult};

use super::skip::{Failure, SkipPolicy};
use super::types::{Chunk, ChunkItem, ChunkReport, RecordKey, SkipOutcome, SkippedItem, TemperatureReading};

/// Storage-level failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// Uniqueness constraint on the record key
    #[error("unique violation for {key}: {message}")]
    UniqueViolation { key: RecordKey, message: String },

    /// The record was refused for another reason
    #[error("record {key} rejected: {message}")]
    Rejected { key: RecordKey, message: String },

    /// Connectivity or transaction failure
    #[error("{0}")]
    Fatal(String),
}

/// Storage that can open a transaction per chunk
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError>;
}

/// One open chunk transaction
///
/// A failed `insert` reporting `UniqueViolation` or `Rejected` leaves the
/// transaction usable. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait SinkTransaction: Send {
    async fn insert(&mut self, reading: &TemperatureReading) -> Result<(), SinkError>;

    async fn commit(self: Box<Self>) -> Result<(), SinkError>;

    async fn rollback(self: Box<Self>) -> Result<(), SinkError>;
}

/// Commits whole chunks to a [`RecordSink`]
pub struct TransactionalSink<S> {
    sink: S,
}

impl<S: RecordSink> TransactionalSink<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Persist `chunk` atomically
    ///
    /// Returns a report with one entry per skipped item. Any fatal failure,
    /// including the skip limit tripping inside the chunk, rolls the chunk
    /// back in full and leaves `policy` as it was before the chunk.
    pub async fn commit(&self, chunk: &Chunk, policy: &mut SkipPolicy) -> ImportResult<ChunkReport> {
        let mut tx = self.sink.begin().await.map_err(|e| {
            ImportError::SinkFatal(format!("failed to begin chunk {}: {e}", chunk.number()))
        })?;

        let mut report = ChunkReport {
            chunk_number: chunk.number(),
            read: chunk.len() as u64,
            ..ChunkReport::default()
        };
        let mut skips_recorded = 0u64;

        for item in chunk.items() {
            let failure = match item {
                ChunkItem::Malformed(err) => Failure::Parse(err.clone()),
                ChunkItem::Record { reading, .. } => match tx.insert(reading).await {
                    Ok(()) => {
                        report.written += 1;
                        continue;
                    },
                    Err(SinkError::UniqueViolation { key, message }) => {
                        Failure::Constraint { key, message }
                    },
                    Err(SinkError::Rejected { key, message }) => Failure::Unclassified { key, message },
                    Err(SinkError::Fatal(reason)) => {
                        Self::abort(tx, chunk, policy, skips_recorded).await;
                        return Err(ImportError::SinkFatal(format!(
                            "chunk {} line {}: {reason}",
                            chunk.number(),
                            item.line()
                        )));
                    },
                },
            };

            let outcome = policy.classify(&failure);
            if outcome == SkipOutcome::FatalError {
                Self::abort(tx, chunk, policy, skips_recorded).await;
                return Err(failure.into_error());
            }

            skips_recorded += 1;
            if let Err(err) = policy.record_skip() {
                Self::abort(tx, chunk, policy, skips_recorded).await;
                return Err(err);
            }

            report.skipped.push(SkippedItem {
                chunk: chunk.number(),
                line: item.line(),
                outcome,
                key: failure.key().cloned(),
                description: failure.description(),
            });
        }

        if let Err(e) = tx.commit().await {
            policy.release(skips_recorded);
            return Err(ImportError::SinkFatal(format!(
                "failed to commit chunk {}: {e}",
                chunk.number()
            )));
        }

        debug!(
            chunk = chunk.number(),
            read = report.read,
            written = report.written,
            skipped = report.skipped_count(),
            "Chunk committed"
        );
        Ok(report)
    }

    async fn abort(
        tx: Box<dyn SinkTransaction>,
        chunk: &Chunk,
        policy: &mut SkipPolicy,
        skips_recorded: u64,
    ) {
        policy.release(skips_recorded);
        match tx.rollback().await {
            Ok(()) => warn!(chunk = chunk.number(), "Chunk rolled back"),
            Err(e) => error!(chunk = chunk.number(), error = %e, "Chunk rollback failed"),
        }
    }
}
