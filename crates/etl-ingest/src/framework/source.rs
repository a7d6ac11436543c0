//! Record sources
//!
//! A source is a lazy, forward-only sequence of [`RawRow`]s that exposes
//! only the configured column subset.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{ImportError, ImportResult};

use super::types::RawRow;

/// Failure while pulling the next row
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The row is unusable but the stream can continue
    #[error("malformed row at line {line}: {reason}")]
    Malformed {
        line: u64,
        reason: String,
        raw: String,
    },

    /// The stream itself failed
    #[error("I/O failure reading source: {0}")]
    Io(String),
}

/// Forward-only supplier of raw rows
pub trait RecordSource: Send {
    /// Next row, or `None` once exhausted
    fn next_row(&mut self) -> Result<Option<RawRow>, SourceError>;
}

/// Delimited-text source backed by the `csv` crate
pub struct CsvRecordSource<R: Read> {
    reader: csv::Reader<R>,
    included_fields: Vec<usize>,
    delimiter: char,
    record: csv::ByteRecord,
}

impl CsvRecordSource<File> {
    /// Open `path`; failure here happens before any run starts
    pub fn open(path: &Path, config: &SourceConfig) -> ImportResult<Self> {
        let file = File::open(path).map_err(|e| ImportError::SourceOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Opened input file");
        Self::from_reader(file, config)
    }
}

impl<R: Read> CsvRecordSource<R> {
    pub fn from_reader(input: R, config: &SourceConfig) -> ImportResult<Self> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .delimiter(config.delimiter_byte()?)
            .from_reader(input);

        let mut source = Self {
            reader,
            included_fields: config.columns.included_fields(),
            delimiter: config.delimiter,
            record: csv::ByteRecord::new(),
        };
        source.skip_lines(config.lines_to_skip)?;
        Ok(source)
    }

    fn skip_lines(&mut self, count: usize) -> ImportResult<()> {
        for _ in 0..count {
            let more = self
                .reader
                .read_byte_record(&mut self.record)
                .map_err(|e| ImportError::SourceRead(format!("while skipping header lines: {e}")))?;
            if !more {
                break;
            }
        }
        Ok(())
    }

    /// Current record rendered back as text
    ///
    /// Fields appear trimmed and unquoted, joined by the delimiter, so a
    /// quoted or padded input line does not round-trip byte for byte.
    fn raw_line(&self) -> String {
        let delimiter = self.delimiter.to_string();
        self.record
            .iter()
            .map(String::from_utf8_lossy)
            .collect::<Vec<_>>()
            .join(&delimiter)
    }
}

/// Empty lines are dropped by the csv reader and never reach the caller.
impl<R: Read + Send> RecordSource for CsvRecordSource<R> {
    fn next_row(&mut self) -> Result<Option<RawRow>, SourceError> {
        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                let line = self.record.position().map(|p| p.line()).unwrap_or(0);
                let raw = self.raw_line();

                let mut fields = Vec::with_capacity(self.included_fields.len());
                for &column in &self.included_fields {
                    let Some(bytes) = self.record.get(column) else {
                        break;
                    };
                    let value = std::str::from_utf8(bytes).map_err(|e| SourceError::Malformed {
                        line,
                        reason: format!("column {column} is not valid UTF-8: {e}"),
                        raw: raw.clone(),
                    })?;
                    fields.push(value.to_string());
                }

                Ok(Some(RawRow { line, fields, raw }))
            },
            Err(e) => match e.kind() {
                csv::ErrorKind::Io(_) => Err(SourceError::Io(e.to_string())),
                _ => Err(SourceError::Malformed {
                    line: e.position().map(|p| p.line()).unwrap_or(0),
                    reason: e.to_string(),
                    raw: String::new(),
                }),
            },
        }
    }
}
