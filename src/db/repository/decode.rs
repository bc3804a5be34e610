//! Tolerant row decoding at the storage boundary.
//!
//! SQLite column affinity does not stop a foreign writer (older app build,
//! manual repair, sync import) from leaving text in a counter column. Summary
//! rows are decoded field by field: a field that fails to decode falls back
//! to its zero value and is reported, instead of failing the whole read.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Row;

use crate::models::SymptomKind;

/// Result of decoding one stored summary row.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// Every field decoded as stored.
    Clean(T),
    /// Some fields were unreadable and were replaced by their zero value.
    Repaired {
        value: T,
        invalid_fields: Vec<&'static str>,
    },
}

impl<T> Decoded<T> {
    pub fn invalid_fields(&self) -> &[&'static str] {
        match self {
            Decoded::Clean(_) => &[],
            Decoded::Repaired { invalid_fields, .. } => invalid_fields,
        }
    }

    /// Unwrap the value, logging repaired fields for diagnostics.
    pub fn into_value_logged(self, table: &str, key: &str) -> T {
        match self {
            Decoded::Clean(value) => value,
            Decoded::Repaired {
                value,
                invalid_fields,
            } => {
                tracing::warn!(
                    table,
                    key,
                    fields = ?invalid_fields,
                    "Malformed summary fields defaulted to zero"
                );
                value
            }
        }
    }
}

/// Field-by-field reader that records every column it could not decode.
pub(crate) struct FieldReader<'a, 'stmt> {
    row: &'a Row<'stmt>,
    invalid: Vec<&'static str>,
}

impl<'a, 'stmt> FieldReader<'a, 'stmt> {
    pub(crate) fn new(row: &'a Row<'stmt>) -> Self {
        Self {
            row,
            invalid: Vec::new(),
        }
    }

    fn get<T: rusqlite::types::FromSql>(&mut self, column: &'static str) -> Option<T> {
        match self.row.get::<_, Option<T>>(column) {
            Ok(value) => value,
            Err(_) => {
                self.invalid.push(column);
                None
            }
        }
    }

    pub(crate) fn int(&mut self, column: &'static str) -> i64 {
        self.get::<i64>(column).unwrap_or(0)
    }

    pub(crate) fn real(&mut self, column: &'static str) -> f64 {
        self.get::<f64>(column).unwrap_or(0.0)
    }

    pub(crate) fn opt_real(&mut self, column: &'static str) -> Option<f64> {
        self.get::<f64>(column)
    }

    pub(crate) fn flag(&mut self, column: &'static str) -> bool {
        self.int(column) != 0
    }

    pub(crate) fn count(&mut self, column: &'static str) -> u32 {
        let value = self.int(column);
        match u32::try_from(value) {
            Ok(v) => v,
            Err(_) => {
                self.invalid.push(column);
                0
            }
        }
    }

    pub(crate) fn text(&mut self, column: &'static str) -> Option<String> {
        self.get::<String>(column)
    }

    pub(crate) fn date(&mut self, column: &'static str) -> Option<NaiveDate> {
        let raw = self.text(column)?;
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                self.invalid.push(column);
                None
            }
        }
    }

    pub(crate) fn timestamp(&mut self, column: &'static str) -> Option<DateTime<Utc>> {
        let raw = self.text(column)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(_) => {
                self.invalid.push(column);
                None
            }
        }
    }

    pub(crate) fn parsed<T: FromStr>(&mut self, column: &'static str) -> Option<T> {
        let raw = self.text(column)?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.invalid.push(column);
                None
            }
        }
    }

    /// JSON object of symptom kind → score. Unknown kinds or bad scores drop the field.
    pub(crate) fn symptom_scores(&mut self, column: &'static str) -> BTreeMap<SymptomKind, u8> {
        let Some(raw) = self.text(column) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<BTreeMap<SymptomKind, u8>>(&raw) {
            Ok(map) => map,
            Err(_) => {
                self.invalid.push(column);
                BTreeMap::new()
            }
        }
    }

    pub(crate) fn finish<T>(self, value: T) -> Decoded<T> {
        if self.invalid.is_empty() {
            Decoded::Clean(value)
        } else {
            Decoded::Repaired {
                value,
                invalid_fields: self.invalid,
            }
        }
    }
}
