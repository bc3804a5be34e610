//! Error types for the summary engine.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::SymptomKind;

/// Malformed input, rejected before any delta is computed or written.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Score for {kind} must be between 0 and {max}, got {score}")]
    ScoreOutOfRange { kind: SymptomKind, score: u8, max: u8 },

    #[error("Notes must be {max} characters or fewer, got {len}")]
    NotesTooLong { len: usize, max: usize },

    #[error("Fluid volume must be a finite, non-negative number of ml, got {0}")]
    InvalidVolume(f64),

    #[error("Weight must be a finite, positive number of kg, got {0}")]
    InvalidWeight(f64),

    #[error("Scheduled session count out of range: {0}")]
    InvalidSchedule(u32),

    #[error("Edited entry {new} does not match the original entry {old}")]
    IdentityMismatch { old: Uuid, new: Uuid },

    #[error("Change would take {field} below zero or past the scheduled doses")]
    CounterUnderflow { field: &'static str },
}

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to read current summaries: {0}")]
    Read(#[source] DatabaseError),

    #[error("Aggregation write failed: {0}")]
    WriteFailed(#[source] DatabaseError),

    #[error("Invalid range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

impl SummaryError {
    /// Whether the caller may retry the same call unchanged.
    ///
    /// Nothing is committed when these errors surface, so replaying the same
    /// before/after snapshot is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SummaryError::Read(_) | SummaryError::WriteFailed(_))
    }
}
