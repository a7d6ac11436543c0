//! Typed environment variable access
//!
//! Unset variables fall back to a default; set-but-unparseable values are
//! reported instead of being swallowed.

use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{EnvError, Result};

/// Read `key` as a string, `None` when unset.
pub fn var_opt(key: &str) -> Result<Option<String>> {
    match std::env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(EnvError::NotUnicode(key.to_string())),
    }
}

/// Read and parse `key`, `None` when unset.
pub fn parse_opt<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match var_opt(key)? {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| EnvError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Read and parse `key`, falling back to `default` when unset.
pub fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_opt(key)?.unwrap_or(default))
}

/// Read `key` as a string, falling back to `default` when unset.
pub fn string_or(key: &str, default: &str) -> Result<String> {
    Ok(var_opt(key)?.unwrap_or_else(|| default.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_or_uses_default_when_unset() {
        std::env::remove_var("ETL_COMMON_TEST_UNSET");
        assert_eq!(parse_or("ETL_COMMON_TEST_UNSET", 42usize).unwrap(), 42);
    }

    #[test]
    #[serial]
    fn test_parse_or_reads_value() {
        std::env::set_var("ETL_COMMON_TEST_NUM", " 250 ");
        assert_eq!(parse_or("ETL_COMMON_TEST_NUM", 1usize).unwrap(), 250);
        std::env::remove_var("ETL_COMMON_TEST_NUM");
    }

    #[test]
    #[serial]
    fn test_parse_or_rejects_garbage() {
        std::env::set_var("ETL_COMMON_TEST_BAD", "lots");
        let err = parse_or("ETL_COMMON_TEST_BAD", 1usize).unwrap_err();
        assert!(matches!(err, EnvError::InvalidValue { ref key, .. } if key == "ETL_COMMON_TEST_BAD"));
        std::env::remove_var("ETL_COMMON_TEST_BAD");
    }

    #[test]
    #[serial]
    fn test_string_or() {
        std::env::remove_var("ETL_COMMON_TEST_STR");
        assert_eq!(string_or("ETL_COMMON_TEST_STR", "fallback").unwrap(), "fallback");
        std::env::set_var("ETL_COMMON_TEST_STR", "set");
        assert_eq!(string_or("ETL_COMMON_TEST_STR", "fallback").unwrap(), "set");
        std::env::remove_var("ETL_COMMON_TEST_STR");
    }
}
