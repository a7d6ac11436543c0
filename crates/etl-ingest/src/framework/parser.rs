//! Row parsing
//!
//! Turns a projected [`RawRow`] into a [`TemperatureReading`]. Parsing is
//! pure: no I/O and no state beyond the immutable mapping.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ImportResult, ParseError};

use super::types::{RawRow, TemperatureReading};

/// Input column index of each mapped field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name: usize,
    pub datetime: usize,
    pub temp: usize,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            name: 0,
            datetime: 1,
            temp: 2,
        }
    }
}

impl ColumnMapping {
    /// Input columns a source must expose, ascending
    pub fn included_fields(&self) -> Vec<usize> {
        let mut fields = vec![self.name, self.datetime, self.temp];
        fields.sort_unstable();
        fields
    }

    pub fn validate(&self) -> ImportResult<()> {
        let mut fields = self.included_fields();
        fields.dedup();
        if fields.len() != 3 {
            return Err(ImportError::Config(format!(
                "column mapping must use three distinct columns, got {self:?}"
            )));
        }
        Ok(())
    }

    /// Position of input column `column` inside a projected row
    fn projected_position(&self, column: usize) -> usize {
        self.included_fields()
            .iter()
            .position(|&c| c == column)
            .unwrap_or(column)
    }
}

/// Parser from raw rows to typed readings
pub trait RecordParser: Send + Sync {
    fn parse(&self, row: &RawRow) -> Result<TemperatureReading, ParseError>;
}

/// Parser for `name, datetime, temp` rows
#[derive(Debug, Clone)]
pub struct TemperatureParser {
    name_pos: usize,
    datetime_pos: usize,
    temp_pos: usize,
    timestamp_format: String,
}

impl TemperatureParser {
    pub fn new(mapping: ColumnMapping, timestamp_format: impl Into<String>) -> Self {
        Self {
            name_pos: mapping.projected_position(mapping.name),
            datetime_pos: mapping.projected_position(mapping.datetime),
            temp_pos: mapping.projected_position(mapping.temp),
            timestamp_format: timestamp_format.into(),
        }
    }

    /// Parse `value` so that it must match the format exactly
    ///
    /// chrono alone accepts unpadded fields, collapsed whitespace, signed
    /// years and leap seconds, so the value is formatted back and compared.
    fn parse_datetime(&self, value: &str) -> Result<NaiveDateTime, String> {
        let datetime = NaiveDateTime::parse_from_str(value, &self.timestamp_format)
            .map_err(|e| e.to_string())?;
        if datetime.nanosecond() >= 1_000_000_000 {
            return Err("leap seconds are not accepted".to_string());
        }
        if datetime.format(&self.timestamp_format).to_string() != value {
            return Err("value does not match the format exactly".to_string());
        }
        Ok(datetime)
    }

    fn field<'a>(row: &'a RawRow, pos: usize, field: &str) -> Result<&'a str, ParseError> {
        row.fields
            .get(pos)
            .map(|value| value.trim())
            .ok_or_else(|| {
                ParseError::new(
                    row.line,
                    format!("missing field '{field}' (row has {} mapped fields)", row.fields.len()),
                    row.raw.clone(),
                )
            })
    }
}

impl RecordParser for TemperatureParser {
    fn parse(&self, row: &RawRow) -> Result<TemperatureReading, ParseError> {
        let name = Self::field(row, self.name_pos, "name")?;
        if name.is_empty() {
            return Err(ParseError::new(row.line, "empty name", row.raw.clone()));
        }

        let datetime_raw = Self::field(row, self.datetime_pos, "datetime")?;
        let datetime = self.parse_datetime(datetime_raw).map_err(|reason| {
            ParseError::new(
                row.line,
                format!(
                    "invalid datetime {datetime_raw:?}, expected format {:?}: {reason}",
                    self.timestamp_format
                ),
                row.raw.clone(),
            )
        })?;

        let temp_raw = Self::field(row, self.temp_pos, "temp")?;
        let temp: f64 = temp_raw.parse().map_err(|e| {
            ParseError::new(
                row.line,
                format!("invalid temp {temp_raw:?}: {e}"),
                row.raw.clone(),
            )
        })?;
        if !temp.is_finite() {
            return Err(ParseError::new(
                row.line,
                format!("temp must be finite, got {temp_raw:?}"),
                row.raw.clone(),
            ));
        }

        Ok(TemperatureReading::new(name, datetime, temp))
    }
}
