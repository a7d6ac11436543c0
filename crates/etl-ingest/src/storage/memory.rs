//! In-memory sink
//!
//! Enforces the same key uniqueness as the database table. Used for dry runs
//! and tests; clones share the same storage.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::framework::sink::{RecordSink, SinkError, SinkTransaction};
use crate::framework::types::{RecordKey, TemperatureReading};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<TemperatureReading>,
    keys: HashSet<RecordKey>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    insert_attempts: Arc<AtomicU64>,
    fail_at: Option<u64>,
    rejected_name: Option<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `n`-th insert attempt (1-based, across all chunks) as fatal
    pub fn with_fatal_failure_at(mut self, n: u64) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Reject every reading with this subject name
    pub fn rejecting_name(mut self, name: impl Into<String>) -> Self {
        self.rejected_name = Some(name.into());
        self
    }

    /// Committed readings, in commit order
    pub fn rows(&self) -> Vec<TemperatureReading> {
        self.lock().rows.clone()
    }

    pub fn keys(&self) -> HashSet<RecordKey> {
        self.lock().keys.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError> {
        Ok(Box::new(MemoryTransaction {
            sink: self.clone(),
            staged: Vec::new(),
            staged_keys: HashSet::new(),
        }))
    }
}

struct MemoryTransaction {
    sink: MemorySink,
    staged: Vec<TemperatureReading>,
    staged_keys: HashSet<RecordKey>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn insert(&mut self, reading: &TemperatureReading) -> Result<(), SinkError> {
        let attempt = self.sink.insert_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.sink.fail_at == Some(attempt) {
            return Err(SinkError::Fatal(format!(
                "injected failure on insert attempt {attempt}"
            )));
        }

        let key = reading.key();
        if self.sink.rejected_name.as_deref() == Some(reading.name()) {
            return Err(SinkError::Rejected {
                key,
                message: "name rejected by sink".to_string(),
            });
        }

        if self.staged_keys.contains(&key) || self.sink.lock().keys.contains(&key) {
            return Err(SinkError::UniqueViolation {
                message: format!("duplicate key value ({key})"),
                key,
            });
        }

        self.staged_keys.insert(key);
        self.staged.push(reading.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let MemoryTransaction {
            sink,
            staged,
            staged_keys,
        } = *self;
        let mut state = sink.lock();
        if let Some(key) = staged_keys.iter().find(|k| state.keys.contains(*k)) {
            return Err(SinkError::Fatal(format!(
                "concurrent commit already wrote ({key})"
            )));
        }
        state.keys.extend(staged_keys);
        state.rows.extend(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        Ok(())
    }
}
