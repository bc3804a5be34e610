//! Daily, weekly and monthly treatment summaries.
//!
//! Daily summaries are the unit of truth. Weekly and monthly summaries are
//! derived aggregates maintained alongside them at write time.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{SymptomKind, WeightTrend};

// ═══════════════════════════════════════════════════════════
// Shared counters
// ═══════════════════════════════════════════════════════════

/// Counters every granularity carries. Period values are sums of day values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreatmentCounters {
    /// Completed medication doses.
    pub medication_total_doses: i64,
    pub medication_scheduled_doses: i64,
    pub medication_missed_count: i64,
    pub fluid_total_volume: f64,
    pub fluid_session_count: i64,
    pub fluid_scheduled_sessions: i64,
    pub symptom_score_total: i64,
}

impl TreatmentCounters {
    /// Completed / scheduled doses. `None` when nothing was scheduled.
    pub fn medication_adherence(&self) -> Option<f64> {
        ratio(self.medication_total_doses, self.medication_scheduled_doses)
    }

    /// Logged / scheduled fluid sessions, capped at 1.0.
    pub fn fluid_adherence(&self) -> Option<f64> {
        ratio(self.fluid_session_count, self.fluid_scheduled_sessions).map(|r| r.min(1.0))
    }

    /// Dose conservation: every scheduled dose is either completed, missed or pending.
    pub fn doses_consistent(&self) -> bool {
        self.medication_total_doses >= 0
            && self.medication_missed_count >= 0
            && self.medication_total_doses <= self.medication_scheduled_doses
            && self.medication_total_doses + self.medication_missed_count
                <= self.medication_scheduled_doses
    }
}

fn ratio(done: i64, scheduled: i64) -> Option<f64> {
    if scheduled <= 0 {
        None
    } else {
        Some(done as f64 / scheduled as f64)
    }
}

// ═══════════════════════════════════════════════════════════
// DailySummary
// ═══════════════════════════════════════════════════════════

/// One subject's day. Created lazily on the first event, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub subject_id: Uuid,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub counters: TreatmentCounters,
    pub fluid_treatment_done: bool,
    pub overall_treatment_done: bool,
    pub overall_streak: u32,
    /// Max score per symptom kind logged for the day.
    pub symptom_scores: BTreeMap<SymptomKind, u8>,
    pub has_symptoms: bool,
    pub symptom_score_average: Option<f64>,
    pub weight_kg: Option<f64>,
    /// `None` for caller-constructed empty days that were never stored.
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DailySummary {
    pub fn empty(subject_id: Uuid, date: NaiveDate) -> Self {
        Self {
            subject_id,
            date,
            counters: TreatmentCounters::default(),
            fluid_treatment_done: false,
            overall_treatment_done: false,
            overall_streak: 0,
            symptom_scores: BTreeMap::new(),
            has_symptoms: false,
            symptom_score_average: None,
            weight_kg: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_stored(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn had(&self, kind: SymptomKind) -> bool {
        self.symptom_scores.get(&kind).is_some_and(|s| *s > 0)
    }

    /// Whether any treatment was scheduled or logged for the day.
    pub fn has_treatment_activity(&self) -> bool {
        self.counters.medication_scheduled_doses > 0
            || self.counters.fluid_scheduled_sessions > 0
            || self.counters.fluid_session_count > 0
    }

    /// Something was scheduled and the day did not complete it.
    pub fn treatment_missed(&self) -> bool {
        let scheduled = self.counters.medication_scheduled_doses > 0
            || self.counters.fluid_scheduled_sessions > 0;
        scheduled && !self.overall_treatment_done
    }

    /// Recompute the absolute day flags from the counters.
    ///
    /// Streak is left untouched except that a day that is not done has no streak.
    pub fn refresh_flags(&mut self) {
        let c = &self.counters;
        self.fluid_treatment_done = c.fluid_session_count > 0;
        let medication_complete = c.medication_total_doses >= c.medication_scheduled_doses;
        let fluid_complete = c.fluid_session_count >= c.fluid_scheduled_sessions;
        self.overall_treatment_done =
            self.has_treatment_activity() && medication_complete && fluid_complete;
        if !self.overall_treatment_done {
            self.overall_streak = 0;
        }
    }

    /// Whether the row records a symptom check-in, whatever its score map holds.
    pub fn has_scored_symptoms(&self) -> bool {
        self.has_symptoms || self.counters.symptom_score_total != 0
    }

    pub fn invariants_hold(&self) -> bool {
        self.counters.doses_consistent() && (self.overall_treatment_done || self.overall_streak == 0)
    }
}

// ═══════════════════════════════════════════════════════════
// Period summaries (week / month)
// ═══════════════════════════════════════════════════════════

/// Body shared by weekly and monthly summaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTotals {
    pub subject_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(flatten)]
    pub counters: TreatmentCounters,
    pub fluid_treatment_days: i64,
    pub overall_treatment_days: i64,
    pub overall_missed_days: i64,
    /// Number of days in the period on which each kind was present.
    pub days_with_symptom: BTreeMap<SymptomKind, i64>,
    pub days_with_any_symptoms: i64,
    /// Highest single-day symptom total in the period.
    pub symptom_score_max: i64,
    pub symptom_score_average: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PeriodTotals {
    pub fn empty(subject_id: Uuid, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            subject_id,
            start_date,
            end_date,
            counters: TreatmentCounters::default(),
            fluid_treatment_days: 0,
            overall_treatment_days: 0,
            overall_missed_days: 0,
            days_with_symptom: BTreeMap::new(),
            days_with_any_symptoms: 0,
            symptom_score_max: 0,
            symptom_score_average: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn days_with(&self, kind: SymptomKind) -> i64 {
        self.days_with_symptom.get(&kind).copied().unwrap_or(0)
    }

    pub fn day_count(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn is_stored(&self) -> bool {
        self.created_at.is_some()
    }

    pub fn invariants_hold(&self) -> bool {
        let days = self.day_count();
        self.counters.doses_consistent()
            && self.overall_treatment_days >= 0
            && self.overall_missed_days >= 0
            && self.overall_treatment_days + self.overall_missed_days <= days
            && self.days_with_any_symptoms <= days
            && self.days_with_symptom.values().all(|d| (0..=days).contains(d))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklySummary {
    #[serde(flatten)]
    pub totals: PeriodTotals,
}

/// Weight trend fields, recomputed from the month's daily weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightStats {
    pub entries_count: i64,
    pub first_kg: Option<f64>,
    pub latest_kg: Option<f64>,
    pub average_kg: Option<f64>,
    pub change_percent: Option<f64>,
    pub trend: Option<WeightTrend>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySummary {
    #[serde(flatten)]
    pub totals: PeriodTotals,
    pub weight: WeightStats,
}

/// A summary at any granularity, as served to chart consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "granularity", rename_all = "snake_case")]
pub enum Summary {
    Day(DailySummary),
    Week(WeeklySummary),
    Month(MonthlySummary),
}

impl Summary {
    pub fn period_start(&self) -> NaiveDate {
        match self {
            Summary::Day(d) => d.date,
            Summary::Week(w) => w.totals.start_date,
            Summary::Month(m) => m.totals.start_date,
        }
    }

    pub fn counters(&self) -> &TreatmentCounters {
        match self {
            Summary::Day(d) => &d.counters,
            Summary::Week(w) => &w.totals.counters,
            Summary::Month(m) => &m.totals.counters,
        }
    }

    pub fn is_stored(&self) -> bool {
        match self {
            Summary::Day(d) => d.is_stored(),
            Summary::Week(w) => w.totals.is_stored(),
            Summary::Month(m) => m.totals.is_stored(),
        }
    }
}
