//! Skip classification and the run-scoped skip budget

use crate::error::{ImportError, ParseError};

use super::types::{RecordKey, SkipOutcome};

/// A per-item failure observed while committing a chunk
#[derive(Debug, Clone)]
pub enum Failure {
    Parse(ParseError),
    /// Uniqueness constraint on the record key
    Constraint { key: RecordKey, message: String },
    /// Any other rejection of a single record
    Unclassified { key: RecordKey, message: String },
}

impl Failure {
    pub fn key(&self) -> Option<&RecordKey> {
        match self {
            Failure::Parse(_) => None,
            Failure::Constraint { key, .. } | Failure::Unclassified { key, .. } => Some(key),
        }
    }

    pub fn description(&self) -> String {
        match self {
            Failure::Parse(err) => format!("parse error: {}", err.reason),
            Failure::Constraint { key, .. } => format!("duplicate key ({key})"),
            Failure::Unclassified { key, message } => format!("rejected ({key}): {message}"),
        }
    }

    /// Error to surface when this failure ends the run
    pub fn into_error(self) -> ImportError {
        match self {
            Failure::Parse(err) => ImportError::Parse(err),
            Failure::Constraint { key, message } => ImportError::DuplicateKey { key, message },
            Failure::Unclassified { key, message } => {
                ImportError::SinkFatal(format!("record ({key}) rejected: {message}"))
            },
        }
    }
}

/// Decides which failures are tolerated and how many
#[derive(Debug, Clone)]
pub struct SkipPolicy {
    limit: u64,
    skip_duplicates: bool,
    skip_parse_errors: bool,
    count: u64,
}

impl SkipPolicy {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            skip_duplicates: true,
            skip_parse_errors: true,
            count: 0,
        }
    }

    pub fn skip_duplicates(mut self, enabled: bool) -> Self {
        self.skip_duplicates = enabled;
        self
    }

    pub fn skip_parse_errors(mut self, enabled: bool) -> Self {
        self.skip_parse_errors = enabled;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn skip_count(&self) -> u64 {
        self.count
    }

    pub fn classify(&self, failure: &Failure) -> SkipOutcome {
        match failure {
            Failure::Constraint { .. } if self.skip_duplicates => SkipOutcome::SkippedDuplicate,
            Failure::Parse(_) if self.skip_parse_errors => SkipOutcome::SkippedParseError,
            _ => SkipOutcome::FatalError,
        }
    }

    /// Count one skip; the (limit + 1)-th skip fails
    pub fn record_skip(&mut self) -> Result<u64, ImportError> {
        self.count += 1;
        if self.count > self.limit {
            return Err(ImportError::SkipLimitExceeded {
                count: self.count,
                limit: self.limit,
            });
        }
        Ok(self.count)
    }

    /// Restore the counter after a chunk rollback discarded `n` skips
    pub(crate) fn release(&mut self, n: u64) {
        self.count = self.count.saturating_sub(n);
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

impl Default for SkipPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_SKIP_LIMIT)
    }
}
