//! Logged treatment events as received from the logging subsystem.
//!
//! Medication doses and fluid sessions carry their own identity (several per
//! day). Symptom and weight entries are keyed by `(subject, date)`: one per day.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::SymptomKind;

/// A single scheduled medication dose, given or missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationDoseEvent {
    pub id: Uuid,
    pub date: NaiveDate,
    pub medication_name: String,
    pub completed: bool,
    pub notes: Option<String>,
}

/// A subcutaneous fluid therapy session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluidSessionEvent {
    pub id: Uuid,
    pub date: NaiveDate,
    pub volume_ml: f64,
    pub notes: Option<String>,
}

/// One day's symptom check-in. Absent kinds were not scored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymptomScores {
    pub scores: BTreeMap<SymptomKind, u8>,
    pub notes: Option<String>,
}

impl SymptomScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper used by callers assembling a check-in.
    pub fn with(mut self, kind: SymptomKind, score: u8) -> Self {
        self.scores.insert(kind, score);
        self
    }

    pub fn score(&self, kind: SymptomKind) -> Option<u8> {
        self.scores.get(&kind).copied()
    }

    /// Had-symptom flag: the kind was scored above zero.
    pub fn had(&self, kind: SymptomKind) -> bool {
        self.score(kind).is_some_and(|s| s > 0)
    }

    pub fn has_symptoms(&self) -> bool {
        SymptomKind::ALL.iter().any(|k| self.had(*k))
    }

    /// Sum of all logged scores. `None` when nothing was scored.
    pub fn total(&self) -> Option<u32> {
        if self.scores.is_empty() {
            return None;
        }
        Some(self.scores.values().map(|s| u32::from(*s)).sum())
    }

    /// Mean of the logged scores. `None` when nothing was scored.
    pub fn average(&self) -> Option<f64> {
        self.total()
            .map(|total| f64::from(total) / self.scores.len() as f64)
    }
}
