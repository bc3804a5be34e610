//! Delta computation: the signed change each event transition makes to the
//! summary counters.
//!
//! Every function here is pure and independent of stored totals. Zero deltas
//! are left as `None`; consumers treat `None` as "no change", never as
//! "reset to zero".

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{
    DailySummary, FluidSessionEvent, MedicationDoseEvent, PeriodTotals, SymptomKind,
    SymptomScores, TreatmentCounters,
};

/// Signed increments plus the two absolute day flags, for one transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryUpdate {
    pub doses_delta: Option<i64>,
    pub scheduled_doses_delta: Option<i64>,
    pub missed_doses_delta: Option<i64>,
    pub fluid_volume_delta: Option<f64>,
    pub fluid_session_delta: Option<i64>,
    pub fluid_scheduled_delta: Option<i64>,
    /// Day tally change per symptom kind; kinds without a transition are absent.
    pub symptom_days_delta: BTreeMap<SymptomKind, i64>,
    pub any_symptom_days_delta: Option<i64>,
    pub symptom_score_total_delta: Option<i64>,
    pub fluid_treatment_days_delta: Option<i64>,
    pub treatment_days_delta: Option<i64>,
    pub missed_days_delta: Option<i64>,
    /// Absolute overwrite, not a delta.
    pub fluid_treatment_done: Option<bool>,
    /// Absolute overwrite, not a delta.
    pub overall_treatment_done: Option<bool>,
}

fn non_zero(v: i64) -> Option<i64> {
    (v != 0).then_some(v)
}

fn non_zero_f(v: f64) -> Option<f64> {
    (v != 0.0).then_some(v)
}

fn add(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    non_zero(a.unwrap_or(0) + b.unwrap_or(0))
}

/// +1 / −1 on a boolean transition, `None` when the flag did not change.
pub fn flag_transition(old: bool, new: bool) -> Option<i64> {
    match (old, new) {
        (false, true) => Some(1),
        (true, false) => Some(-1),
        _ => None,
    }
}

impl SummaryUpdate {
    pub fn is_empty(&self) -> bool {
        *self == SummaryUpdate::default()
    }

    /// The inverse increments. Absolute flags are dropped: they are not invertible.
    pub fn negated(&self) -> Self {
        let neg = |v: Option<i64>| v.map(|x| -x);
        Self {
            doses_delta: neg(self.doses_delta),
            scheduled_doses_delta: neg(self.scheduled_doses_delta),
            missed_doses_delta: neg(self.missed_doses_delta),
            fluid_volume_delta: self.fluid_volume_delta.map(|v| -v),
            fluid_session_delta: neg(self.fluid_session_delta),
            fluid_scheduled_delta: neg(self.fluid_scheduled_delta),
            symptom_days_delta: self
                .symptom_days_delta
                .iter()
                .map(|(k, v)| (*k, -v))
                .collect(),
            any_symptom_days_delta: neg(self.any_symptom_days_delta),
            symptom_score_total_delta: neg(self.symptom_score_total_delta),
            fluid_treatment_days_delta: neg(self.fluid_treatment_days_delta),
            treatment_days_delta: neg(self.treatment_days_delta),
            missed_days_delta: neg(self.missed_days_delta),
            fluid_treatment_done: None,
            overall_treatment_done: None,
        }
    }

    /// Combine two updates for the same period. Flags from `other` win.
    pub fn merged(mut self, other: &SummaryUpdate) -> Self {
        self.doses_delta = add(self.doses_delta, other.doses_delta);
        self.scheduled_doses_delta = add(self.scheduled_doses_delta, other.scheduled_doses_delta);
        self.missed_doses_delta = add(self.missed_doses_delta, other.missed_doses_delta);
        self.fluid_volume_delta = non_zero_f(
            self.fluid_volume_delta.unwrap_or(0.0) + other.fluid_volume_delta.unwrap_or(0.0),
        );
        self.fluid_session_delta = add(self.fluid_session_delta, other.fluid_session_delta);
        self.fluid_scheduled_delta = add(self.fluid_scheduled_delta, other.fluid_scheduled_delta);
        for (kind, delta) in &other.symptom_days_delta {
            let total = self.symptom_days_delta.get(kind).copied().unwrap_or(0) + delta;
            if total == 0 {
                self.symptom_days_delta.remove(kind);
            } else {
                self.symptom_days_delta.insert(*kind, total);
            }
        }
        self.any_symptom_days_delta = add(self.any_symptom_days_delta, other.any_symptom_days_delta);
        self.symptom_score_total_delta =
            add(self.symptom_score_total_delta, other.symptom_score_total_delta);
        self.fluid_treatment_days_delta =
            add(self.fluid_treatment_days_delta, other.fluid_treatment_days_delta);
        self.treatment_days_delta = add(self.treatment_days_delta, other.treatment_days_delta);
        self.missed_days_delta = add(self.missed_days_delta, other.missed_days_delta);
        if other.fluid_treatment_done.is_some() {
            self.fluid_treatment_done = other.fluid_treatment_done;
        }
        if other.overall_treatment_done.is_some() {
            self.overall_treatment_done = other.overall_treatment_done;
        }
        self
    }

    /// Apply the counter increments shared by every granularity.
    pub fn apply_to_counters(&self, counters: &mut TreatmentCounters) {
        counters.medication_total_doses += self.doses_delta.unwrap_or(0);
        counters.medication_scheduled_doses += self.scheduled_doses_delta.unwrap_or(0);
        counters.medication_missed_count += self.missed_doses_delta.unwrap_or(0);
        counters.fluid_total_volume += self.fluid_volume_delta.unwrap_or(0.0);
        counters.fluid_session_count += self.fluid_session_delta.unwrap_or(0);
        counters.fluid_scheduled_sessions += self.fluid_scheduled_delta.unwrap_or(0);
        counters.symptom_score_total += self.symptom_score_total_delta.unwrap_or(0);
    }

    /// Apply every increment to an in-memory week or month.
    pub fn apply_to_period(&self, totals: &mut PeriodTotals) {
        self.apply_to_counters(&mut totals.counters);
        totals.fluid_treatment_days += self.fluid_treatment_days_delta.unwrap_or(0);
        totals.overall_treatment_days += self.treatment_days_delta.unwrap_or(0);
        totals.overall_missed_days += self.missed_days_delta.unwrap_or(0);
        for (kind, delta) in &self.symptom_days_delta {
            let days = totals.days_with(*kind) + delta;
            if days == 0 {
                totals.days_with_symptom.remove(kind);
            } else {
                totals.days_with_symptom.insert(*kind, days);
            }
        }
        totals.days_with_any_symptoms += self.any_symptom_days_delta.unwrap_or(0);
    }
}

// ═══════════════════════════════════════════════════════════
// Medication doses
// ═══════════════════════════════════════════════════════════

/// A new dose always adds to the scheduled denominator.
pub fn delta_for_new_medication_dose(completed: bool) -> SummaryUpdate {
    SummaryUpdate {
        doses_delta: non_zero(i64::from(completed)),
        scheduled_doses_delta: Some(1),
        missed_doses_delta: non_zero(i64::from(!completed)),
        ..Default::default()
    }
}

/// The dose already exists: only completed/missed move, scheduled is untouched.
pub fn delta_for_medication_dose_edit(
    old: &MedicationDoseEvent,
    new: &MedicationDoseEvent,
) -> SummaryUpdate {
    let doses = i64::from(new.completed) - i64::from(old.completed);
    SummaryUpdate {
        doses_delta: non_zero(doses),
        missed_doses_delta: non_zero(-doses),
        ..Default::default()
    }
}

pub fn delta_for_medication_dose_delete(old: &MedicationDoseEvent) -> SummaryUpdate {
    SummaryUpdate {
        doses_delta: non_zero(-i64::from(old.completed)),
        scheduled_doses_delta: Some(-1),
        missed_doses_delta: non_zero(-i64::from(!old.completed)),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════
// Fluid sessions
// ═══════════════════════════════════════════════════════════

pub fn delta_for_new_fluid_session(volume_ml: f64) -> SummaryUpdate {
    SummaryUpdate {
        fluid_volume_delta: non_zero_f(volume_ml),
        fluid_session_delta: Some(1),
        fluid_treatment_done: Some(true),
        ..Default::default()
    }
}

/// Session count is unchanged by an edit.
pub fn delta_for_fluid_session_edit(
    old: &FluidSessionEvent,
    new: &FluidSessionEvent,
) -> SummaryUpdate {
    SummaryUpdate {
        fluid_volume_delta: non_zero_f(new.volume_ml - old.volume_ml),
        ..Default::default()
    }
}

/// `fluid_treatment_done` is left to the engine: it depends on the sessions left.
pub fn delta_for_fluid_session_delete(old: &FluidSessionEvent) -> SummaryUpdate {
    SummaryUpdate {
        fluid_volume_delta: non_zero_f(-old.volume_ml),
        fluid_session_delta: Some(-1),
        ..Default::default()
    }
}

pub fn delta_for_fluid_schedule(old_scheduled: i64, new_scheduled: i64) -> SummaryUpdate {
    SummaryUpdate {
        fluid_scheduled_delta: non_zero(new_scheduled - old_scheduled),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════
// Symptoms
// ═══════════════════════════════════════════════════════════

/// Day tallies move only on a had-symptom transition, never on magnitude.
///
/// A missing old total counts as 0; a missing new total subtracts the old one.
pub fn delta_for_symptom_save(old: Option<&SymptomScores>, new: &SymptomScores) -> SummaryUpdate {
    let empty = SymptomScores::default();
    let old = old.unwrap_or(&empty);

    let symptom_days_delta = SymptomKind::ALL
        .iter()
        .filter_map(|kind| flag_transition(old.had(*kind), new.had(*kind)).map(|d| (*kind, d)))
        .collect();

    let old_total = i64::from(old.total().unwrap_or(0));
    let new_total = i64::from(new.total().unwrap_or(0));

    SummaryUpdate {
        symptom_days_delta,
        any_symptom_days_delta: flag_transition(old.has_symptoms(), new.has_symptoms()),
        symptom_score_total_delta: non_zero(new_total - old_total),
        ..Default::default()
    }
}

// ═══════════════════════════════════════════════════════════
// Day flags
// ═══════════════════════════════════════════════════════════

/// Period day tallies implied by a day moving from `old` to `new`.
pub fn delta_for_day_flags(old: &DailySummary, new: &DailySummary) -> SummaryUpdate {
    SummaryUpdate {
        fluid_treatment_days_delta: flag_transition(
            old.fluid_treatment_done,
            new.fluid_treatment_done,
        ),
        treatment_days_delta: flag_transition(
            old.overall_treatment_done,
            new.overall_treatment_done,
        ),
        missed_days_delta: flag_transition(old.treatment_missed(), new.treatment_missed()),
        ..Default::default()
    }
}
