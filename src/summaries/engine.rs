//! Aggregation engine.
//!
//! Applies one logged-event transition to the day, week and month summaries
//! of a subject. Each call runs in a single `IMMEDIATE` SQLite transaction:
//! current state is read, the write set is built, and everything commits or
//! nothing does.
//!
//! - Day rows are merge-written with absolute values.
//! - Week/month counters only ever receive signed increments.
//! - Week/month symptom max/average and the month weight trend live in
//!   `period_stats` and are set from state read inside the same transaction.

use chrono::{DateTime, Days, NaiveDate, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::SummaryConfig;
use crate::db::{self, CounterDelta, StoredPeriod};
use crate::models::{
    DailySummary, FluidSessionEvent, MedicationDoseEvent, PeriodTotals, SymptomScores,
};

use super::cache::TtlCache;
use super::delta::{
    delta_for_day_flags, delta_for_fluid_schedule, delta_for_fluid_session_delete,
    delta_for_fluid_session_edit, delta_for_medication_dose_delete,
    delta_for_medication_dose_edit, delta_for_new_fluid_session, delta_for_new_medication_dose,
    delta_for_symptom_save, flag_transition, SummaryUpdate,
};
use super::error::{SummaryError, ValidationError};
use super::notify::{ChangeNotifier, SummaryChanged};
use super::period::{Period, PeriodKeys};
use super::streak;
use super::validation;
use super::weight::{self, WeightHistory};

/// The change one logged event makes to one day.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDelta {
    /// Dose or fluid session increments, computed from before/after snapshots.
    Counters(SummaryUpdate),
    /// The day's full symptom check-in. Empty scores clear it.
    ///
    /// `old` is the caller's snapshot; the stored day is authoritative.
    Symptoms {
        old: Option<SymptomScores>,
        new: SymptomScores,
    },
    /// Absolute number of fluid sessions scheduled for the day.
    FluidSchedule { scheduled_sessions: u32 },
    /// The day's weight; `None` clears it.
    Weight { kg: Option<f64> },
}

impl EventDelta {
    fn is_noop(&self) -> bool {
        matches!(self, EventDelta::Counters(update) if update.is_empty())
    }
}

/// Old and new state of the day being written, plus the period update.
struct DayTransition<'a> {
    old: &'a DailySummary,
    new: &'a DailySummary,
    update: &'a SummaryUpdate,
}

impl DayTransition<'_> {
    fn symptoms_changed(&self) -> bool {
        self.old.counters.symptom_score_total != self.new.counters.symptom_score_total
            || self.update.any_symptom_days_delta.is_some()
    }
}

/// What the caller needs to know once the transaction has committed.
struct DayOutcome {
    keys: PeriodKeys,
    weight_changed: bool,
}

pub struct SummaryEngine {
    config: SummaryConfig,
    weight_cache: TtlCache<Uuid, WeightHistory>,
    notifier: ChangeNotifier,
}

impl SummaryEngine {
    pub fn new(config: SummaryConfig) -> Self {
        let weight_cache = TtlCache::new(config.weight_cache_ttl);
        Self {
            config,
            weight_cache,
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn config(&self) -> &SummaryConfig {
        &self.config
    }

    pub fn weight_cache(&self) -> &TtlCache<Uuid, WeightHistory> {
        &self.weight_cache
    }

    /// Receive a notification after every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<SummaryChanged> {
        self.notifier.subscribe()
    }

    // ═══════════════════════════════════════════════════════════
    // Inbound events
    // ═══════════════════════════════════════════════════════════

    /// Apply one day's change atomically across day, week and month.
    pub fn record_event(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
        delta: EventDelta,
    ) -> Result<(), SummaryError> {
        self.apply(conn, subject_id, vec![(date, delta)])
    }

    /// A dose was created (`None → Some`), edited (`Some → Some`) or
    /// deleted (`Some → None`). An edit that moves the dose to another day
    /// is applied as a delete and a create in the same transaction.
    pub fn on_medication_dose_logged(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        old: Option<&MedicationDoseEvent>,
        new: Option<&MedicationDoseEvent>,
    ) -> Result<(), SummaryError> {
        if let Some(new) = new {
            validation::validate_medication_dose(new, &self.config)?;
        }
        let changes = match (old, new) {
            (None, None) => return Ok(()),
            (None, Some(new)) => vec![(
                new.date,
                EventDelta::Counters(delta_for_new_medication_dose(new.completed)),
            )],
            (Some(old), None) => vec![(
                old.date,
                EventDelta::Counters(delta_for_medication_dose_delete(old)),
            )],
            (Some(old), Some(new)) => {
                check_identity(old.id, new.id)?;
                if old.date == new.date {
                    vec![(
                        new.date,
                        EventDelta::Counters(delta_for_medication_dose_edit(old, new)),
                    )]
                } else {
                    vec![
                        (
                            old.date,
                            EventDelta::Counters(delta_for_medication_dose_delete(old)),
                        ),
                        (
                            new.date,
                            EventDelta::Counters(delta_for_new_medication_dose(new.completed)),
                        ),
                    ]
                }
            }
        };
        self.apply(conn, subject_id, changes)
    }

    /// Same lifecycle as [`Self::on_medication_dose_logged`], for fluid sessions.
    pub fn on_fluid_session_logged(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        old: Option<&FluidSessionEvent>,
        new: Option<&FluidSessionEvent>,
    ) -> Result<(), SummaryError> {
        if let Some(new) = new {
            validation::validate_fluid_session(new, &self.config)?;
        }
        let changes = match (old, new) {
            (None, None) => return Ok(()),
            (None, Some(new)) => vec![(
                new.date,
                EventDelta::Counters(delta_for_new_fluid_session(new.volume_ml)),
            )],
            (Some(old), None) => vec![(
                old.date,
                EventDelta::Counters(delta_for_fluid_session_delete(old)),
            )],
            (Some(old), Some(new)) => {
                check_identity(old.id, new.id)?;
                if old.date == new.date {
                    vec![(
                        new.date,
                        EventDelta::Counters(delta_for_fluid_session_edit(old, new)),
                    )]
                } else {
                    vec![
                        (
                            old.date,
                            EventDelta::Counters(delta_for_fluid_session_delete(old)),
                        ),
                        (
                            new.date,
                            EventDelta::Counters(delta_for_new_fluid_session(new.volume_ml)),
                        ),
                    ]
                }
            }
        };
        self.apply(conn, subject_id, changes)
    }

    pub fn on_symptoms_saved(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
        old: Option<&SymptomScores>,
        new: &SymptomScores,
    ) -> Result<(), SummaryError> {
        validation::validate_symptom_scores(new, &self.config)?;
        let delta = EventDelta::Symptoms {
            old: old.cloned(),
            new: new.clone(),
        };
        self.apply(conn, subject_id, vec![(date, delta)])
    }

    pub fn on_fluid_schedule_set(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
        scheduled_sessions: u32,
    ) -> Result<(), SummaryError> {
        validation::validate_schedule(scheduled_sessions)?;
        self.apply(
            conn,
            subject_id,
            vec![(date, EventDelta::FluidSchedule { scheduled_sessions })],
        )
    }

    pub fn on_weight_logged(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
        kg: Option<f64>,
    ) -> Result<(), SummaryError> {
        if let Some(kg) = kg {
            validation::validate_weight(kg)?;
        }
        self.apply(conn, subject_id, vec![(date, EventDelta::Weight { kg })])
    }

    // ═══════════════════════════════════════════════════════════
    // Transaction
    // ═══════════════════════════════════════════════════════════

    fn apply(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        mut changes: Vec<(NaiveDate, EventDelta)>,
    ) -> Result<(), SummaryError> {
        changes.retain(|(_, delta)| !delta.is_noop());
        if changes.is_empty() {
            return Ok(());
        }

        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(|e| SummaryError::WriteFailed(e.into()))?;
        let now = Utc::now();

        let mut outcomes = Vec::with_capacity(changes.len());
        for (date, delta) in &changes {
            outcomes.push(self.apply_day(&tx, subject_id, *date, delta, &now)?);
        }

        tx.commit()
            .map_err(|e| SummaryError::WriteFailed(e.into()))?;

        for outcome in outcomes {
            if outcome.weight_changed {
                self.weight_cache.invalidate(subject_id);
            }
            tracing::info!(
                subject = %subject_id,
                day = %outcome.keys.day.key(),
                "Summaries updated"
            );
            self.notifier
                .notify(SummaryChanged::new(*subject_id, &outcome.keys));
        }
        Ok(())
    }

    fn apply_day(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
        delta: &EventDelta,
        now: &DateTime<Utc>,
    ) -> Result<DayOutcome, SummaryError> {
        let keys = PeriodKeys::for_date(date);

        // Read current state before building the write set.
        let old_day = db::get_daily_summary(conn, subject_id, &date)
            .map_err(SummaryError::Read)?
            .unwrap_or_else(|| DailySummary::empty(*subject_id, date));
        let previous_streak = self.previous_streak(conn, subject_id, date)?;
        let week = read_period(conn, subject_id, &keys.week)?;
        let month = read_period(conn, subject_id, &keys.month)?;

        let mut new_day = old_day.clone();
        let mut weight_changed = false;
        let mut update = match delta {
            EventDelta::Counters(update) => update.clone(),
            EventDelta::Symptoms { old, new } => {
                let stored = stored_symptoms(&old_day);
                if old.as_ref().map(|o| &o.scores) != stored.as_ref().map(|s| &s.scores) {
                    tracing::debug!(
                        subject = %subject_id,
                        day = %keys.day.key(),
                        "Symptom snapshot differs from stored day, using stored state"
                    );
                }
                if stored.is_none() && old_day.has_scored_symptoms() {
                    tracing::warn!(
                        subject = %subject_id,
                        day = %keys.day.key(),
                        "Stored symptom scores unreadable, using stored day totals"
                    );
                }
                new_day.symptom_scores = new.scores.clone();
                new_day.has_symptoms = new.has_symptoms();
                new_day.symptom_score_average = new.average();
                symptom_update(&old_day, stored.as_ref(), new)
            }
            EventDelta::FluidSchedule { scheduled_sessions } => delta_for_fluid_schedule(
                old_day.counters.fluid_scheduled_sessions,
                i64::from(*scheduled_sessions),
            ),
            EventDelta::Weight { kg } => {
                weight_changed = old_day.weight_kg != *kg;
                new_day.weight_kg = *kg;
                SummaryUpdate::default()
            }
        };

        update.apply_to_counters(&mut new_day.counters);
        validation::validate_day_counters(&update, &new_day.counters)?;
        if let EventDelta::Symptoms { new, .. } = delta {
            new_day.counters.symptom_score_total = i64::from(new.total().unwrap_or(0));
        }
        new_day.refresh_flags();
        new_day.overall_streak =
            streak::next_streak(previous_streak, new_day.overall_treatment_done);

        update = update.merged(&delta_for_day_flags(&old_day, &new_day));
        update.fluid_treatment_done = Some(new_day.fluid_treatment_done);
        update.overall_treatment_done = Some(new_day.overall_treatment_done);

        tracing::debug!(
            subject = %subject_id,
            day = %keys.day.key(),
            ?update,
            "Applying summary update"
        );

        db::upsert_daily_summary(conn, &new_day, now).map_err(SummaryError::WriteFailed)?;

        let transition = DayTransition {
            old: &old_day,
            new: &new_day,
            update: &update,
        };
        self.write_period(conn, subject_id, &keys.week, week, &transition, now)?;
        self.write_period(conn, subject_id, &keys.month, month, &transition, now)?;

        if weight_changed {
            self.write_month_weight(conn, subject_id, &keys.month, now)?;
        }

        if new_day.overall_streak != old_day.overall_streak {
            self.propagate_streak(conn, subject_id, &new_day, now)?;
        }

        Ok(DayOutcome {
            keys,
            weight_changed,
        })
    }

    /// Streak of the day before `date`; 0 when it is missing or not done.
    fn previous_streak(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
    ) -> Result<u32, SummaryError> {
        let Some(previous) = date.checked_sub_days(Days::new(1)) else {
            return Ok(0);
        };
        let day = db::get_daily_summary(conn, subject_id, &previous).map_err(SummaryError::Read)?;
        Ok(day
            .filter(|d| d.overall_treatment_done)
            .map_or(0, |d| d.overall_streak))
    }

    fn write_period(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        period: &Period,
        stored: Option<StoredPeriod>,
        transition: &DayTransition<'_>,
        now: &DateTime<Utc>,
    ) -> Result<(), SummaryError> {
        let key = period.key();
        db::seed_period_summary(
            conn,
            subject_id,
            period.granularity,
            &key,
            &period.start,
            &period.end,
            now,
        )
        .map_err(SummaryError::WriteFailed)?;
        db::increment_period_counters(
            conn,
            subject_id,
            period.granularity,
            &key,
            &period_increments(transition.update),
            now,
        )
        .map_err(SummaryError::WriteFailed)?;

        if !transition.symptoms_changed() {
            return Ok(());
        }

        let mut totals = stored
            .map(|s| s.totals)
            .unwrap_or_else(|| PeriodTotals::empty(*subject_id, period.start, period.end));
        transition.update.apply_to_period(&mut totals);

        let score_max =
            self.next_symptom_max(conn, subject_id, period, totals.symptom_score_max, transition)?;
        let score_average = (totals.days_with_any_symptoms > 0).then(|| {
            totals.counters.symptom_score_total as f64 / totals.days_with_any_symptoms as f64
        });
        db::set_period_symptom_stats(
            conn,
            subject_id,
            period.granularity,
            &key,
            score_max,
            score_average,
            now,
        )
        .map_err(SummaryError::WriteFailed)
    }

    /// `max(current, new day total)`, reconciled from the other days when
    /// the day that held the max was lowered.
    fn next_symptom_max(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        period: &Period,
        current_max: i64,
        transition: &DayTransition<'_>,
    ) -> Result<i64, SummaryError> {
        let old_total = transition.old.counters.symptom_score_total;
        let new_total = transition.new.counters.symptom_score_total;
        if new_total >= current_max {
            return Ok(new_total);
        }
        if old_total >= current_max && new_total < old_total {
            let others = db::max_daily_symptom_total(
                conn,
                subject_id,
                &period.start,
                &period.end,
                &transition.new.date,
            )
            .map_err(SummaryError::Read)?;
            return Ok(others.max(new_total));
        }
        Ok(current_max)
    }

    fn write_month_weight(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        month: &Period,
        now: &DateTime<Utc>,
    ) -> Result<(), SummaryError> {
        let weights = db::list_daily_weights(conn, subject_id, &month.start, &month.end)
            .map_err(SummaryError::Read)?;
        let stats = weight::weight_stats(&weights, self.config.weight_stable_threshold_percent);
        db::set_period_weight_stats(conn, subject_id, &month.key(), &stats, now)
            .map_err(SummaryError::WriteFailed)
    }

    /// Re-score later days after a back-dated change moved this day's streak.
    fn propagate_streak(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        day: &DailySummary,
        now: &DateTime<Utc>,
    ) -> Result<(), SummaryError> {
        let limit = self.config.streak_propagation_limit;
        let later = db::list_daily_summaries_after(conn, subject_id, &day.date, limit + 1)
            .map_err(SummaryError::Read)?;
        let changed = streak::propagate_forward(day.date, day.overall_streak, &later, limit);
        for later_day in &changed {
            db::upsert_daily_summary(conn, later_day, now).map_err(SummaryError::WriteFailed)?;
        }
        if !changed.is_empty() {
            tracing::debug!(
                subject = %subject_id,
                from = %day.date,
                count = changed.len(),
                "Propagated streak to later days"
            );
        }
        Ok(())
    }
}

fn check_identity(old: Uuid, new: Uuid) -> Result<(), ValidationError> {
    if old != new {
        return Err(ValidationError::IdentityMismatch { old, new });
    }
    Ok(())
}

fn read_period(
    conn: &Connection,
    subject_id: &Uuid,
    period: &Period,
) -> Result<Option<StoredPeriod>, SummaryError> {
    db::get_period_summary(conn, subject_id, period.granularity, &period.key())
        .map_err(SummaryError::Read)
}

/// The stored day's check-in, `None` when nothing was scored.
fn stored_symptoms(day: &DailySummary) -> Option<SymptomScores> {
    (!day.symptom_scores.is_empty()).then(|| SymptomScores {
        scores: day.symptom_scores.clone(),
        notes: None,
    })
}

/// Symptom delta against the stored day.
///
/// When the stored scores could not be decoded, the day's total and
/// any-symptom columns stand in for them so re-saving does not count the
/// day twice. Per-kind day counts cannot be recovered and only gain.
fn symptom_update(
    old_day: &DailySummary,
    stored: Option<&SymptomScores>,
    new: &SymptomScores,
) -> SummaryUpdate {
    let mut update = delta_for_symptom_save(stored, new);
    if stored.is_none() && old_day.has_scored_symptoms() {
        let new_total = i64::from(new.total().unwrap_or(0));
        update.symptom_score_total_delta =
            Some(new_total - old_day.counters.symptom_score_total).filter(|d| *d != 0);
        update.any_symptom_days_delta =
            flag_transition(old_day.has_symptoms, new.has_symptoms());
    }
    update
}

/// Column increments for a week or month. Absent deltas are left out.
pub fn period_increments(update: &SummaryUpdate) -> Vec<(&'static str, CounterDelta)> {
    let ints = [
        ("medication_total_doses", update.doses_delta),
        ("medication_scheduled_doses", update.scheduled_doses_delta),
        ("medication_missed_count", update.missed_doses_delta),
        ("fluid_session_count", update.fluid_session_delta),
        ("fluid_scheduled_sessions", update.fluid_scheduled_delta),
        ("symptom_score_total", update.symptom_score_total_delta),
        ("fluid_treatment_days", update.fluid_treatment_days_delta),
        ("overall_treatment_days", update.treatment_days_delta),
        ("overall_missed_days", update.missed_days_delta),
        ("days_with_any_symptoms", update.any_symptom_days_delta),
    ];
    let mut increments: Vec<_> = ints
        .into_iter()
        .filter_map(|(column, delta)| delta.map(|d| (column, CounterDelta::Int(d))))
        .collect();
    if let Some(volume) = update.fluid_volume_delta {
        increments.push(("fluid_total_volume", CounterDelta::Real(volume)));
    }
    for (kind, delta) in &update.symptom_days_delta {
        increments.push((db::symptom_days_column(*kind), CounterDelta::Int(*delta)));
    }
    increments
}

impl Default for SummaryEngine {
    fn default() -> Self {
        Self::new(SummaryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;
    use crate::models::{Granularity, SymptomKind, WeightTrend};

    fn setup() -> (Connection, SummaryEngine, Uuid) {
        let conn = open_memory_database().unwrap();
        (conn, SummaryEngine::default(), Uuid::new_v4())
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn dose(day: &str, completed: bool) -> MedicationDoseEvent {
        MedicationDoseEvent {
            id: Uuid::new_v4(),
            date: date(day),
            medication_name: "Benazepril".into(),
            completed,
            notes: None,
        }
    }

    fn session(day: &str, volume_ml: f64) -> FluidSessionEvent {
        FluidSessionEvent {
            id: Uuid::new_v4(),
            date: date(day),
            volume_ml,
            notes: None,
        }
    }

    fn daily(conn: &Connection, subject: &Uuid, day: &str) -> DailySummary {
        db::get_daily_summary(conn, subject, &date(day))
            .unwrap()
            .expect("daily summary stored")
    }

    fn period(conn: &Connection, subject: &Uuid, granularity: Granularity, day: &str) -> StoredPeriod {
        let key = Period::containing(granularity, date(day)).key();
        db::get_period_summary(conn, subject, granularity, &key)
            .unwrap()
            .expect("period summary stored")
    }

    fn week(conn: &Connection, subject: &Uuid, day: &str) -> PeriodTotals {
        period(conn, subject, Granularity::Week, day).totals
    }

    fn month(conn: &Connection, subject: &Uuid, day: &str) -> StoredPeriod {
        period(conn, subject, Granularity::Month, day)
    }

    fn fail_on(conn: &Connection, table: &str) {
        conn.execute_batch(&format!(
            "CREATE TRIGGER fail_{table}_insert BEFORE INSERT ON {table}
             BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;
             CREATE TRIGGER fail_{table}_update BEFORE UPDATE ON {table}
             BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;"
        ))
        .unwrap();
    }

    fn heal(conn: &Connection, table: &str) {
        conn.execute_batch(&format!(
            "DROP TRIGGER fail_{table}_insert; DROP TRIGGER fail_{table}_update;"
        ))
        .unwrap();
    }

    fn row_count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    // ── Fluid sessions ───────────────────────────────────

    #[test]
    fn new_fluid_session_updates_all_granularities() {
        let (conn, engine, subject) = setup();
        let s = session("2025-03-12", 150.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&s)).unwrap();

        let day = daily(&conn, &subject, "2025-03-12");
        assert_eq!(day.counters.fluid_total_volume, 150.0);
        assert_eq!(day.counters.fluid_session_count, 1);
        assert!(day.fluid_treatment_done);
        assert!(day.overall_treatment_done);
        assert_eq!(day.overall_streak, 1);

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.start_date, date("2025-03-10"));
        assert_eq!(w.end_date, date("2025-03-16"));
        assert_eq!(w.counters.fluid_total_volume, 150.0);
        assert_eq!(w.counters.fluid_session_count, 1);
        assert_eq!(w.fluid_treatment_days, 1);
        assert_eq!(w.overall_treatment_days, 1);

        let m = month(&conn, &subject, "2025-03-12");
        assert_eq!(m.totals.start_date, date("2025-03-01"));
        assert_eq!(m.totals.counters.fluid_total_volume, 150.0);
        assert_eq!(m.totals.fluid_treatment_days, 1);
    }

    #[test]
    fn editing_session_volume_keeps_session_count() {
        let (conn, engine, subject) = setup();
        let s = session("2025-03-12", 150.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&s)).unwrap();

        let mut edited = s.clone();
        edited.volume_ml = 100.0;
        engine
            .on_fluid_session_logged(&conn, &subject, Some(&s), Some(&edited))
            .unwrap();

        let day = daily(&conn, &subject, "2025-03-12");
        assert_eq!(day.counters.fluid_total_volume, 100.0);
        assert_eq!(day.counters.fluid_session_count, 1);

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.counters.fluid_total_volume, 100.0);
        assert_eq!(w.counters.fluid_session_count, 1);
        assert_eq!(w.fluid_treatment_days, 1);
    }

    #[test]
    fn create_then_delete_restores_week() {
        let (conn, engine, subject) = setup();
        let first = session("2025-03-11", 80.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&first)).unwrap();
        let before = week(&conn, &subject, "2025-03-11");

        let s = session("2025-03-12", 150.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&s)).unwrap();
        engine.on_fluid_session_logged(&conn, &subject, Some(&s), None).unwrap();

        let after = week(&conn, &subject, "2025-03-11");
        assert_eq!(after.counters, before.counters);
        assert_eq!(after.fluid_treatment_days, before.fluid_treatment_days);
        assert_eq!(after.overall_treatment_days, before.overall_treatment_days);

        // The emptied day is kept, with every field back at zero.
        let day = daily(&conn, &subject, "2025-03-12");
        assert_eq!(day.counters.fluid_session_count, 0);
        assert!(!day.fluid_treatment_done);
        assert_eq!(day.overall_streak, 0);
    }

    #[test]
    fn session_moved_to_another_week() {
        let (conn, engine, subject) = setup();
        let s = session("2025-03-16", 120.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&s)).unwrap();

        let mut moved = s.clone();
        moved.date = date("2025-03-17");
        engine
            .on_fluid_session_logged(&conn, &subject, Some(&s), Some(&moved))
            .unwrap();

        let old_week = week(&conn, &subject, "2025-03-16");
        assert_eq!(old_week.counters.fluid_session_count, 0);
        assert_eq!(old_week.counters.fluid_total_volume, 0.0);
        assert_eq!(old_week.fluid_treatment_days, 0);
        let new_week = week(&conn, &subject, "2025-03-17");
        assert_eq!(new_week.counters.fluid_session_count, 1);
        assert_eq!(new_week.counters.fluid_total_volume, 120.0);
        // Same month: net zero move.
        let m = month(&conn, &subject, "2025-03-16");
        assert_eq!(m.totals.counters.fluid_session_count, 1);
        assert_eq!(m.totals.fluid_treatment_days, 1);
    }

    #[test]
    fn fluid_schedule_gates_overall_done() {
        let (conn, engine, subject) = setup();
        engine.on_fluid_schedule_set(&conn, &subject, date("2025-03-12"), 2).unwrap();
        engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session("2025-03-12", 100.0)))
            .unwrap();

        let day = daily(&conn, &subject, "2025-03-12");
        assert!(day.fluid_treatment_done);
        assert!(!day.overall_treatment_done);
        assert!(day.treatment_missed());
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.counters.fluid_scheduled_sessions, 2);
        assert_eq!(w.overall_missed_days, 1);
        assert_eq!(w.overall_treatment_days, 0);

        engine.on_fluid_schedule_set(&conn, &subject, date("2025-03-12"), 1).unwrap();
        let day = daily(&conn, &subject, "2025-03-12");
        assert!(day.overall_treatment_done);
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.counters.fluid_scheduled_sessions, 1);
        assert_eq!(w.overall_missed_days, 0);
        assert_eq!(w.overall_treatment_days, 1);
    }

    // ── Medication doses ─────────────────────────────────

    #[test]
    fn dose_conservation_at_every_step() {
        let (conn, engine, subject) = setup();
        for (n, completed) in [true, false, true, false, true].into_iter().enumerate() {
            let d = dose("2025-03-12", completed);
            engine.on_medication_dose_logged(&conn, &subject, None, Some(&d)).unwrap();
            let n = n as i64 + 1;

            let day = daily(&conn, &subject, "2025-03-12");
            assert_eq!(day.counters.medication_scheduled_doses, n);
            assert_eq!(
                day.counters.medication_total_doses + day.counters.medication_missed_count,
                n
            );
            assert!(day.invariants_hold());

            let w = week(&conn, &subject, "2025-03-12");
            assert_eq!(w.counters.medication_scheduled_doses, n);
            assert_eq!(
                w.counters.medication_total_doses + w.counters.medication_missed_count,
                n
            );
            assert!(w.invariants_hold());
        }
    }

    #[test]
    fn completing_missed_dose_flips_day_tallies() {
        let (conn, engine, subject) = setup();
        let missed = dose("2025-03-12", false);
        engine.on_medication_dose_logged(&conn, &subject, None, Some(&missed)).unwrap();
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.overall_missed_days, 1);
        assert_eq!(w.overall_treatment_days, 0);

        let mut given = missed.clone();
        given.completed = true;
        engine
            .on_medication_dose_logged(&conn, &subject, Some(&missed), Some(&given))
            .unwrap();

        let day = daily(&conn, &subject, "2025-03-12");
        assert!(day.overall_treatment_done);
        assert_eq!(day.counters.medication_missed_count, 0);
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.overall_missed_days, 0);
        assert_eq!(w.overall_treatment_days, 1);
        assert_eq!(w.counters.medication_scheduled_doses, 1);
    }

    #[test]
    fn identity_mismatch_rejected_without_writes() {
        let (conn, engine, subject) = setup();
        let a = dose("2025-03-12", true);
        let b = dose("2025-03-12", false);
        let err = engine
            .on_medication_dose_logged(&conn, &subject, Some(&a), Some(&b))
            .unwrap_err();
        assert!(matches!(
            err,
            SummaryError::Validation(ValidationError::IdentityMismatch { .. })
        ));
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
    }

    #[test]
    fn none_to_none_is_noop() {
        let (conn, engine, subject) = setup();
        engine.on_medication_dose_logged(&conn, &subject, None, None).unwrap();
        engine.on_fluid_session_logged(&conn, &subject, None, None).unwrap();
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert_eq!(row_count(&conn, "period_summaries"), 0);
    }

    // ── Symptoms ─────────────────────────────────────────

    #[test]
    fn out_of_range_score_rejected_before_write() {
        let (conn, engine, subject) = setup();
        let scores = SymptomScores::new().with(SymptomKind::Vomiting, 11);
        let err = engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap_err();
        assert!(matches!(err, SummaryError::Validation(_)));
        assert!(!err.is_retryable());
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
    }

    #[test]
    fn all_zero_check_in_counts_no_symptom_days() {
        let (conn, engine, subject) = setup();
        let mut zero = SymptomScores::new();
        for kind in SymptomKind::ALL {
            zero = zero.with(kind, 0);
        }
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &zero)
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        assert!(w.days_with_symptom.is_empty());
        assert_eq!(w.days_with_any_symptoms, 0);
        assert_eq!(w.symptom_score_average, None);

        let one = zero.clone().with(SymptomKind::Lethargy, 1);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), Some(&zero), &one)
            .unwrap();
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), Some(&one), &one)
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with(SymptomKind::Lethargy), 1);
        assert_eq!(w.days_with_symptom.len(), 1);
        assert_eq!(w.days_with_any_symptoms, 1);
    }

    #[test]
    fn vomiting_toggled_off_and_on_counts_one_day() {
        let (conn, engine, subject) = setup();
        let day = date("2025-03-12");
        let mut previous: Option<SymptomScores> = None;
        for score in [2, 0, 1] {
            let next = SymptomScores::new().with(SymptomKind::Vomiting, score);
            engine
                .on_symptoms_saved(&conn, &subject, day, previous.as_ref(), &next)
                .unwrap();
            previous = Some(next);
        }

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with(SymptomKind::Vomiting), 1);
        assert_eq!(w.days_with_any_symptoms, 1);
        assert_eq!(w.counters.symptom_score_total, 1);

        let d = daily(&conn, &subject, "2025-03-12");
        assert!(d.had(SymptomKind::Vomiting));
        assert!(d.has_symptoms);
    }

    #[test]
    fn stale_snapshot_does_not_double_count() {
        let (conn, engine, subject) = setup();
        let scores = SymptomScores::new().with(SymptomKind::Diarrhea, 3);
        // The caller retries with the same (stale) `None` snapshot.
        for _ in 0..2 {
            engine
                .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
                .unwrap();
        }
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with(SymptomKind::Diarrhea), 1);
        assert_eq!(w.counters.symptom_score_total, 3);
    }

    #[test]
    fn symptom_max_and_average_follow_days() {
        let (conn, engine, subject) = setup();
        let heavy = SymptomScores::new()
            .with(SymptomKind::Vomiting, 3)
            .with(SymptomKind::Lethargy, 2);
        let light = SymptomScores::new().with(SymptomKind::Diarrhea, 3);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-10"), None, &heavy)
            .unwrap();
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-11"), None, &light)
            .unwrap();

        let w = week(&conn, &subject, "2025-03-10");
        assert_eq!(w.symptom_score_max, 5);
        assert_eq!(w.symptom_score_average, Some(4.0));

        // Lower the day that held the max: reconciled from the other day.
        let lowered = SymptomScores::new().with(SymptomKind::Vomiting, 1);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-10"), Some(&heavy), &lowered)
            .unwrap();
        let w = week(&conn, &subject, "2025-03-10");
        assert_eq!(w.symptom_score_max, 3);
        assert_eq!(w.symptom_score_average, Some(2.0));
        assert_eq!(w.days_with(SymptomKind::Lethargy), 0);
    }

    #[test]
    fn clearing_symptoms_resets_period_stats() {
        let (conn, engine, subject) = setup();
        let scores = SymptomScores::new().with(SymptomKind::Constipation, 4);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap();
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), Some(&scores), &SymptomScores::new())
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.counters.symptom_score_total, 0);
        assert_eq!(w.days_with_any_symptoms, 0);
        assert_eq!(w.symptom_score_max, 0);
        assert_eq!(w.symptom_score_average, None);
        let d = daily(&conn, &subject, "2025-03-12");
        assert!(d.symptom_scores.is_empty());
        assert_eq!(d.symptom_score_average, None);
    }

    // ── Streaks ──────────────────────────────────────────

    fn streaks(conn: &Connection, subject: &Uuid, days: &[&str]) -> Vec<u32> {
        days.iter().map(|d| daily(conn, subject, d).overall_streak).collect()
    }

    #[test]
    fn streak_over_done_missed_done() {
        let (conn, engine, subject) = setup();
        let days = ["2025-03-10", "2025-03-11", "2025-03-12", "2025-03-13"];
        engine.on_fluid_schedule_set(&conn, &subject, date(days[2]), 1).unwrap();
        for day in [days[0], days[1], days[3]] {
            engine
                .on_fluid_session_logged(&conn, &subject, None, Some(&session(day, 100.0)))
                .unwrap();
        }
        assert_eq!(streaks(&conn, &subject, &days), vec![1, 2, 0, 1]);

        // Back-fill the missed day: the later day is carried forward.
        engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session(days[2], 100.0)))
            .unwrap();
        assert_eq!(streaks(&conn, &subject, &days), vec![1, 2, 3, 4]);
        let w = week(&conn, &subject, days[0]);
        assert_eq!(w.overall_treatment_days, 4);
        assert_eq!(w.overall_missed_days, 0);
    }

    #[test]
    fn retroactive_delete_breaks_later_streaks() {
        let (conn, engine, subject) = setup();
        let days = ["2025-03-10", "2025-03-11", "2025-03-12"];
        let first = session(days[0], 100.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&first)).unwrap();
        for day in &days[1..] {
            engine
                .on_fluid_session_logged(&conn, &subject, None, Some(&session(day, 100.0)))
                .unwrap();
        }
        assert_eq!(streaks(&conn, &subject, &days), vec![1, 2, 3]);

        engine.on_fluid_session_logged(&conn, &subject, Some(&first), None).unwrap();
        assert_eq!(streaks(&conn, &subject, &days), vec![0, 1, 2]);
    }

    #[test]
    fn streak_crosses_month_boundary() {
        let (conn, engine, subject) = setup();
        for day in ["2025-02-27", "2025-02-28", "2025-03-01"] {
            engine
                .on_fluid_session_logged(&conn, &subject, None, Some(&session(day, 90.0)))
                .unwrap();
        }
        assert_eq!(daily(&conn, &subject, "2025-03-01").overall_streak, 3);
    }

    // ── Weight ───────────────────────────────────────────

    #[test]
    fn month_weight_trend_recomputed() {
        let (conn, engine, subject) = setup();
        engine.on_weight_logged(&conn, &subject, date("2025-03-01"), Some(5.0)).unwrap();
        engine.on_weight_logged(&conn, &subject, date("2025-03-20"), Some(4.5)).unwrap();

        let m = month(&conn, &subject, "2025-03-01");
        assert_eq!(m.weight.entries_count, 2);
        assert_eq!(m.weight.first_kg, Some(5.0));
        assert_eq!(m.weight.latest_kg, Some(4.5));
        assert_eq!(m.weight.trend, Some(WeightTrend::Decreasing));

        engine.on_weight_logged(&conn, &subject, date("2025-03-20"), None).unwrap();
        let m = month(&conn, &subject, "2025-03-01");
        assert_eq!(m.weight.entries_count, 1);
        assert_eq!(m.weight.trend, None);
        assert_eq!(daily(&conn, &subject, "2025-03-20").weight_kg, None);
    }

    #[test]
    fn invalid_weight_rejected() {
        let (conn, engine, subject) = setup();
        assert!(engine
            .on_weight_logged(&conn, &subject, date("2025-03-01"), Some(-2.0))
            .is_err());
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
    }

    // ── Failure and recovery ─────────────────────────────

    #[test]
    fn failed_stats_write_leaves_no_partial_state() {
        let (conn, engine, subject) = setup();
        fail_on(&conn, "period_stats");
        let scores = SymptomScores::new().with(SymptomKind::Vomiting, 2);
        let err = engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap_err();
        assert!(matches!(err, SummaryError::WriteFailed(_)));
        assert!(err.is_retryable());
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert_eq!(row_count(&conn, "period_summaries"), 0);

        // Retry of the same call applies exactly once.
        heal(&conn, "period_stats");
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap();
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with(SymptomKind::Vomiting), 1);
        assert_eq!(w.symptom_score_max, 2);
    }

    #[test]
    fn failed_counter_write_rolls_back_day() {
        let (conn, engine, subject) = setup();
        let first = session("2025-03-12", 100.0);
        engine.on_fluid_session_logged(&conn, &subject, None, Some(&first)).unwrap();

        fail_on(&conn, "period_summaries");
        let second = session("2025-03-12", 50.0);
        let err = engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&second))
            .unwrap_err();
        assert!(err.is_retryable());
        heal(&conn, "period_summaries");

        let day = daily(&conn, &subject, "2025-03-12");
        assert_eq!(day.counters.fluid_session_count, 1);
        assert_eq!(day.counters.fluid_total_volume, 100.0);
    }

    #[test]
    fn malformed_stored_fields_do_not_block_writes() {
        let (conn, engine, subject) = setup();
        engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session("2025-03-12", 100.0)))
            .unwrap();
        conn.execute_batch(
            "UPDATE period_summaries SET fluid_session_count = 'garbled';
             UPDATE daily_summaries SET symptom_scores = 'not json';",
        )
        .unwrap();

        engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session("2025-03-12", 50.0)))
            .unwrap();
        let scores = SymptomScores::new().with(SymptomKind::Lethargy, 2);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        // Unreadable counter restarts from zero.
        assert_eq!(w.counters.fluid_session_count, 1);
        assert_eq!(w.counters.fluid_total_volume, 150.0);
        assert_eq!(w.days_with(SymptomKind::Lethargy), 1);
        let d = daily(&conn, &subject, "2025-03-12");
        assert_eq!(d.symptom_scores.get(&SymptomKind::Lethargy), Some(&2));
    }

    #[test]
    fn resaving_over_unreadable_scores_counts_day_once() {
        let (conn, engine, subject) = setup();
        let scores = SymptomScores::new().with(SymptomKind::Vomiting, 3);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap();
        conn.execute_batch("UPDATE daily_summaries SET symptom_scores = '{broken';")
            .unwrap();

        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), Some(&scores), &scores)
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with_any_symptoms, 1);
        assert_eq!(w.counters.symptom_score_total, 3);
        let m = month(&conn, &subject, "2025-03-12").totals;
        assert_eq!(m.days_with_any_symptoms, 1);
        assert_eq!(m.counters.symptom_score_total, 3);
        assert_eq!(
            daily(&conn, &subject, "2025-03-12").symptom_scores.get(&SymptomKind::Vomiting),
            Some(&3)
        );
    }

    #[test]
    fn clearing_unreadable_scores_empties_tallies() {
        let (conn, engine, subject) = setup();
        let scores = SymptomScores::new().with(SymptomKind::Lethargy, 4);
        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &scores)
            .unwrap();
        conn.execute_batch("UPDATE daily_summaries SET symptom_scores = 'not json';")
            .unwrap();

        engine
            .on_symptoms_saved(&conn, &subject, date("2025-03-12"), None, &SymptomScores::new())
            .unwrap();

        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.days_with_any_symptoms, 0);
        assert_eq!(w.counters.symptom_score_total, 0);
        assert_eq!(w.symptom_score_average, None);
    }

    // ── Counter underflow ────────────────────────────────

    #[test]
    fn deleting_unrecorded_dose_is_rejected() {
        let (conn, engine, subject) = setup();
        let err = engine
            .on_medication_dose_logged(&conn, &subject, Some(&dose("2025-03-12", true)), None)
            .unwrap_err();
        assert!(matches!(
            err,
            SummaryError::Validation(ValidationError::CounterUnderflow { .. })
        ));
        assert!(!err.is_retryable());
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert_eq!(row_count(&conn, "period_summaries"), 0);
    }

    #[test]
    fn deleting_unrecorded_session_is_rejected() {
        let (conn, engine, subject) = setup();
        let err = engine
            .on_fluid_session_logged(&conn, &subject, Some(&session("2025-03-12", 50.0)), None)
            .unwrap_err();
        assert!(matches!(
            err,
            SummaryError::Validation(ValidationError::CounterUnderflow {
                field: "fluid_session_count"
            })
        ));
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert_eq!(row_count(&conn, "period_summaries"), 0);
    }

    #[test]
    fn completing_a_dose_never_logged_as_missed_is_rejected() {
        let (conn, engine, subject) = setup();
        engine
            .on_medication_dose_logged(&conn, &subject, None, Some(&dose("2025-03-12", true)))
            .unwrap();

        // The caller claims a missed dose that was never stored.
        let missed = dose("2025-03-12", false);
        let mut completed = missed.clone();
        completed.completed = true;
        let err = engine
            .on_medication_dose_logged(&conn, &subject, Some(&missed), Some(&completed))
            .unwrap_err();
        assert!(matches!(err, SummaryError::Validation(_)));

        let day = daily(&conn, &subject, "2025-03-12");
        assert_eq!(day.counters.medication_total_doses, 1);
        assert_eq!(day.counters.medication_missed_count, 0);
        assert!(day.invariants_hold());
    }

    #[test]
    fn moving_unrecorded_session_writes_neither_day() {
        let (conn, engine, subject) = setup();
        let s = session("2025-03-12", 80.0);
        let mut moved = s.clone();
        moved.date = date("2025-03-20");
        assert!(engine
            .on_fluid_session_logged(&conn, &subject, Some(&s), Some(&moved))
            .is_err());
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert_eq!(row_count(&conn, "period_summaries"), 0);
    }

    #[test]
    fn record_event_rejects_negative_counters() {
        let (conn, engine, subject) = setup();
        let mut rx = engine.subscribe();
        let err = engine
            .record_event(
                &conn,
                &subject,
                date("2025-03-12"),
                EventDelta::Counters(delta_for_new_fluid_session(50.0).negated()),
            )
            .unwrap_err();
        assert!(matches!(err, SummaryError::Validation(_)));
        assert_eq!(row_count(&conn, "daily_summaries"), 0);
        assert!(rx.try_recv().is_err());
    }

    // ── Notifications ────────────────────────────────────

    #[test]
    fn commit_notifies_subscribers() {
        let (conn, engine, subject) = setup();
        let mut rx = engine.subscribe();
        engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session("2025-03-12", 100.0)))
            .unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.subject_id, subject);
        assert_eq!(change.day, "2025-03-12");
        assert_eq!(change.week, "2025-W11");
        assert_eq!(change.month, "2025-03");
    }

    #[test]
    fn failed_write_does_not_notify() {
        let (conn, engine, subject) = setup();
        let mut rx = engine.subscribe();
        fail_on(&conn, "daily_summaries");
        assert!(engine
            .on_fluid_session_logged(&conn, &subject, None, Some(&session("2025-03-12", 100.0)))
            .is_err());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn record_event_applies_raw_delta() {
        let (conn, engine, subject) = setup();
        engine
            .record_event(
                &conn,
                &subject,
                date("2025-03-12"),
                EventDelta::Counters(delta_for_new_medication_dose(true)),
            )
            .unwrap();
        let w = week(&conn, &subject, "2025-03-12");
        assert_eq!(w.counters.medication_total_doses, 1);
        assert_eq!(w.overall_treatment_days, 1);
    }

    #[test]
    fn increments_skip_absent_deltas() {
        let update = delta_for_new_medication_dose(true);
        let columns: Vec<_> = period_increments(&update).into_iter().map(|(c, _)| c).collect();
        assert_eq!(columns, vec!["medication_total_doses", "medication_scheduled_doses"]);
        assert!(period_increments(&SummaryUpdate::default()).is_empty());
    }
}
