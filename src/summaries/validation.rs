//! Input validation for logged events.
//!
//! Runs before delta computation. Out-of-range values are rejected, never
//! clamped.

use crate::config::SummaryConfig;
use crate::models::{FluidSessionEvent, MedicationDoseEvent, SymptomScores, TreatmentCounters};

use super::delta::SummaryUpdate;
use super::error::ValidationError;

fn validate_notes(notes: &Option<String>, config: &SummaryConfig) -> Result<(), ValidationError> {
    if let Some(ref notes) = notes {
        let len = notes.chars().count();
        if len > config.notes_max_chars {
            return Err(ValidationError::NotesTooLong {
                len,
                max: config.notes_max_chars,
            });
        }
    }
    Ok(())
}

pub fn validate_medication_dose(
    dose: &MedicationDoseEvent,
    config: &SummaryConfig,
) -> Result<(), ValidationError> {
    validate_notes(&dose.notes, config)
}

pub fn validate_fluid_session(
    session: &FluidSessionEvent,
    config: &SummaryConfig,
) -> Result<(), ValidationError> {
    if !session.volume_ml.is_finite() || session.volume_ml < 0.0 {
        return Err(ValidationError::InvalidVolume(session.volume_ml));
    }
    validate_notes(&session.notes, config)
}

pub fn validate_symptom_scores(
    scores: &SymptomScores,
    config: &SummaryConfig,
) -> Result<(), ValidationError> {
    for (kind, score) in &scores.scores {
        if *score > config.symptom_score_max {
            return Err(ValidationError::ScoreOutOfRange {
                kind: *kind,
                score: *score,
                max: config.symptom_score_max,
            });
        }
    }
    validate_notes(&scores.notes, config)
}

pub fn validate_weight(kg: f64) -> Result<(), ValidationError> {
    if !kg.is_finite() || kg <= 0.0 {
        return Err(ValidationError::InvalidWeight(kg));
    }
    Ok(())
}

/// A day cannot plausibly schedule more than this many fluid sessions.
const MAX_SCHEDULED_SESSIONS: u32 = 24;

pub fn validate_schedule(scheduled_sessions: u32) -> Result<(), ValidationError> {
    if scheduled_sessions > MAX_SCHEDULED_SESSIONS {
        return Err(ValidationError::InvalidSchedule(scheduled_sessions));
    }
    Ok(())
}

/// Float noise tolerated when a volume is decremented back to zero.
const VOLUME_EPSILON: f64 = 1e-9;

/// Checks a day's counters after `update` was applied to them.
///
/// Only fields the update touched are checked, so a day repaired from a
/// malformed row still accepts unrelated writes.
pub fn validate_day_counters(
    update: &SummaryUpdate,
    counters: &TreatmentCounters,
) -> Result<(), ValidationError> {
    let ints = [
        ("medication_total_doses", update.doses_delta, counters.medication_total_doses),
        (
            "medication_scheduled_doses",
            update.scheduled_doses_delta,
            counters.medication_scheduled_doses,
        ),
        ("medication_missed_count", update.missed_doses_delta, counters.medication_missed_count),
        ("fluid_session_count", update.fluid_session_delta, counters.fluid_session_count),
        (
            "fluid_scheduled_sessions",
            update.fluid_scheduled_delta,
            counters.fluid_scheduled_sessions,
        ),
    ];
    for (field, delta, value) in ints {
        if delta.is_some() && value < 0 {
            return Err(ValidationError::CounterUnderflow { field });
        }
    }
    if update.fluid_volume_delta.is_some() && counters.fluid_total_volume < -VOLUME_EPSILON {
        return Err(ValidationError::CounterUnderflow {
            field: "fluid_total_volume",
        });
    }
    let doses_touched = update.doses_delta.is_some()
        || update.scheduled_doses_delta.is_some()
        || update.missed_doses_delta.is_some();
    if doses_touched && !counters.doses_consistent() {
        return Err(ValidationError::CounterUnderflow {
            field: "medication_scheduled_doses",
        });
    }
    Ok(())
}
