//! Summary tables: daily rows (absolute merge-writes), period counters
//! (atomic increments) and period stats (conditional sets).

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::decode::{Decoded, FieldReader};
use crate::db::DatabaseError;
use crate::models::{
    DailySummary, Granularity, PeriodTotals, SymptomKind, TreatmentCounters, WeightStats,
};

const DAILY_COLUMNS: &str = "subject_id, day_key, medication_total_doses, medication_scheduled_doses,
     medication_missed_count, fluid_total_volume, fluid_session_count, fluid_scheduled_sessions,
     fluid_treatment_done, overall_treatment_done, overall_streak, symptom_scores, has_symptoms,
     symptom_score_total, symptom_score_average, weight_kg, created_at, updated_at";

const PERIOD_SELECT: &str = "SELECT p.period_key AS period_key, start_date, end_date,
            medication_total_doses, medication_scheduled_doses, medication_missed_count,
            fluid_total_volume, fluid_session_count, fluid_scheduled_sessions,
            symptom_score_total, fluid_treatment_days, overall_treatment_days,
            overall_missed_days, days_with_vomiting, days_with_diarrhea,
            days_with_constipation, days_with_lethargy, days_with_suppressed_appetite,
            days_with_injection_site_reaction, days_with_any_symptoms,
            p.created_at AS created_at, p.updated_at AS updated_at,
            symptom_score_max, symptom_score_average, weight_entries_count,
            weight_first_kg, weight_latest_kg, weight_average_kg,
            weight_change_percent, weight_trend
     FROM period_summaries p
     LEFT JOIN period_stats s
       ON s.subject_id = p.subject_id
      AND s.granularity = p.granularity
      AND s.period_key = p.period_key";

/// Period counter columns that accept increments.
pub const PERIOD_COUNTER_COLUMNS: &[&str] = &[
    "medication_total_doses",
    "medication_scheduled_doses",
    "medication_missed_count",
    "fluid_total_volume",
    "fluid_session_count",
    "fluid_scheduled_sessions",
    "symptom_score_total",
    "fluid_treatment_days",
    "overall_treatment_days",
    "overall_missed_days",
    "days_with_vomiting",
    "days_with_diarrhea",
    "days_with_constipation",
    "days_with_lethargy",
    "days_with_suppressed_appetite",
    "days_with_injection_site_reaction",
    "days_with_any_symptoms",
];

/// Counter column holding the day tally for one symptom kind.
pub fn symptom_days_column(kind: SymptomKind) -> &'static str {
    match kind {
        SymptomKind::Vomiting => "days_with_vomiting",
        SymptomKind::Diarrhea => "days_with_diarrhea",
        SymptomKind::Constipation => "days_with_constipation",
        SymptomKind::Lethargy => "days_with_lethargy",
        SymptomKind::SuppressedAppetite => "days_with_suppressed_appetite",
        SymptomKind::InjectionSiteReaction => "days_with_injection_site_reaction",
    }
}

/// Signed increment for one counter column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CounterDelta {
    Int(i64),
    Real(f64),
}

impl CounterDelta {
    fn to_value(self) -> Value {
        match self {
            CounterDelta::Int(v) => Value::Integer(v),
            CounterDelta::Real(v) => Value::Real(v),
        }
    }
}

/// A week or month row with its stats sub-row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPeriod {
    pub totals: PeriodTotals,
    pub weight: WeightStats,
}

fn day_key(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ═══════════════════════════════════════════════════════════
// Daily summaries
// ═══════════════════════════════════════════════════════════

pub fn get_daily_summary(
    conn: &Connection,
    subject_id: &Uuid,
    date: &NaiveDate,
) -> Result<Option<DailySummary>, DatabaseError> {
    let key = day_key(date);
    let sql = format!(
        "SELECT {DAILY_COLUMNS} FROM daily_summaries WHERE subject_id = ?1 AND day_key = ?2"
    );
    let decoded = conn
        .query_row(&sql, params![subject_id.to_string(), key], |row| {
            Ok(decode_daily(row, *subject_id, Some(*date)))
        })
        .optional()?;
    Ok(decoded
        .flatten()
        .map(|d| d.into_value_logged("daily_summaries", &key)))
}

/// Daily rows for `from..=to`, ascending. Days without a row are not returned.
pub fn list_daily_summaries(
    conn: &Connection,
    subject_id: &Uuid,
    from: &NaiveDate,
    to: &NaiveDate,
    limit: usize,
) -> Result<Vec<DailySummary>, DatabaseError> {
    let sql = format!(
        "SELECT {DAILY_COLUMNS} FROM daily_summaries
         WHERE subject_id = ?1 AND day_key >= ?2 AND day_key <= ?3
         ORDER BY day_key ASC LIMIT ?4"
    );
    query_daily(
        conn,
        &sql,
        params![subject_id.to_string(), day_key(from), day_key(to), limit as i64],
        *subject_id,
    )
}

/// Daily rows strictly after `after`, ascending.
pub fn list_daily_summaries_after(
    conn: &Connection,
    subject_id: &Uuid,
    after: &NaiveDate,
    limit: usize,
) -> Result<Vec<DailySummary>, DatabaseError> {
    let sql = format!(
        "SELECT {DAILY_COLUMNS} FROM daily_summaries
         WHERE subject_id = ?1 AND day_key > ?2
         ORDER BY day_key ASC LIMIT ?3"
    );
    query_daily(
        conn,
        &sql,
        params![subject_id.to_string(), day_key(after), limit as i64],
        *subject_id,
    )
}

fn query_daily(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    subject_id: Uuid,
) -> Result<Vec<DailySummary>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| {
        let key: String = row.get("day_key")?;
        Ok((key, decode_daily(row, subject_id, None)))
    })?;

    let mut days = Vec::new();
    for row in rows {
        let (key, decoded) = row?;
        match decoded {
            Some(d) => days.push(d.into_value_logged("daily_summaries", &key)),
            None => tracing::warn!(key = %key, "Skipping daily summary with unreadable day key"),
        }
    }
    Ok(days)
}

/// Decode one daily row. `None` only when the row's date cannot be determined.
fn decode_daily(
    row: &Row<'_>,
    subject_id: Uuid,
    known_date: Option<NaiveDate>,
) -> Option<Decoded<DailySummary>> {
    let mut r = FieldReader::new(row);
    let date = known_date.or_else(|| r.date("day_key"))?;
    let counters = TreatmentCounters {
        medication_total_doses: r.int("medication_total_doses"),
        medication_scheduled_doses: r.int("medication_scheduled_doses"),
        medication_missed_count: r.int("medication_missed_count"),
        fluid_total_volume: r.real("fluid_total_volume"),
        fluid_session_count: r.int("fluid_session_count"),
        fluid_scheduled_sessions: r.int("fluid_scheduled_sessions"),
        symptom_score_total: r.int("symptom_score_total"),
    };
    let summary = DailySummary {
        subject_id,
        date,
        counters,
        fluid_treatment_done: r.flag("fluid_treatment_done"),
        overall_treatment_done: r.flag("overall_treatment_done"),
        overall_streak: r.count("overall_streak"),
        symptom_scores: r.symptom_scores("symptom_scores"),
        has_symptoms: r.flag("has_symptoms"),
        symptom_score_average: r.opt_real("symptom_score_average"),
        weight_kg: r.opt_real("weight_kg"),
        created_at: r.timestamp("created_at"),
        updated_at: r.timestamp("updated_at"),
    };
    Some(r.finish(summary))
}

/// Merge-write the absolute state of one day. Keeps the original `created_at`.
pub fn upsert_daily_summary(
    conn: &Connection,
    summary: &DailySummary,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let scores = serde_json::to_string(&summary.symptom_scores)
        .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
    let created_at = summary.created_at.unwrap_or(*now).to_rfc3339();
    let c = &summary.counters;
    conn.execute(
        "INSERT INTO daily_summaries (subject_id, day_key, medication_total_doses,
         medication_scheduled_doses, medication_missed_count, fluid_total_volume,
         fluid_session_count, fluid_scheduled_sessions, fluid_treatment_done,
         overall_treatment_done, overall_streak, symptom_scores, has_symptoms,
         symptom_score_total, symptom_score_average, weight_kg, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT (subject_id, day_key) DO UPDATE SET
            medication_total_doses = excluded.medication_total_doses,
            medication_scheduled_doses = excluded.medication_scheduled_doses,
            medication_missed_count = excluded.medication_missed_count,
            fluid_total_volume = excluded.fluid_total_volume,
            fluid_session_count = excluded.fluid_session_count,
            fluid_scheduled_sessions = excluded.fluid_scheduled_sessions,
            fluid_treatment_done = excluded.fluid_treatment_done,
            overall_treatment_done = excluded.overall_treatment_done,
            overall_streak = excluded.overall_streak,
            symptom_scores = excluded.symptom_scores,
            has_symptoms = excluded.has_symptoms,
            symptom_score_total = excluded.symptom_score_total,
            symptom_score_average = excluded.symptom_score_average,
            weight_kg = excluded.weight_kg,
            updated_at = excluded.updated_at",
        params![
            summary.subject_id.to_string(),
            day_key(&summary.date),
            c.medication_total_doses,
            c.medication_scheduled_doses,
            c.medication_missed_count,
            c.fluid_total_volume,
            c.fluid_session_count,
            c.fluid_scheduled_sessions,
            summary.fluid_treatment_done as i32,
            summary.overall_treatment_done as i32,
            summary.overall_streak,
            scores,
            summary.has_symptoms as i32,
            c.symptom_score_total,
            summary.symptom_score_average,
            summary.weight_kg,
            created_at,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Highest daily symptom total in `from..=to`, ignoring `exclude`.
pub fn max_daily_symptom_total(
    conn: &Connection,
    subject_id: &Uuid,
    from: &NaiveDate,
    to: &NaiveDate,
    exclude: &NaiveDate,
) -> Result<i64, DatabaseError> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(symptom_score_total AS INTEGER)) FROM daily_summaries
         WHERE subject_id = ?1 AND day_key >= ?2 AND day_key <= ?3 AND day_key <> ?4",
        params![
            subject_id.to_string(),
            day_key(from),
            day_key(to),
            day_key(exclude)
        ],
        |row| row.get(0),
    )?;
    Ok(max.unwrap_or(0).max(0))
}

/// Logged weights in `from..=to`, ascending by day.
pub fn list_daily_weights(
    conn: &Connection,
    subject_id: &Uuid,
    from: &NaiveDate,
    to: &NaiveDate,
) -> Result<Vec<(NaiveDate, f64)>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT day_key, weight_kg FROM daily_summaries
         WHERE subject_id = ?1 AND day_key >= ?2 AND day_key <= ?3
           AND typeof(weight_kg) IN ('real', 'integer')
         ORDER BY day_key ASC",
    )?;
    let rows = stmt.query_map(
        params![subject_id.to_string(), day_key(from), day_key(to)],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
    )?;

    let mut weights = Vec::new();
    for row in rows {
        let (key, kg) = row?;
        if let Ok(date) = NaiveDate::parse_from_str(&key, "%Y-%m-%d") {
            weights.push((date, kg));
        }
    }
    Ok(weights)
}

// ═══════════════════════════════════════════════════════════
// Period summaries (week / month)
// ═══════════════════════════════════════════════════════════

pub fn get_period_summary(
    conn: &Connection,
    subject_id: &Uuid,
    granularity: Granularity,
    period_key: &str,
) -> Result<Option<StoredPeriod>, DatabaseError> {
    let sql = format!(
        "{PERIOD_SELECT}
         WHERE p.subject_id = ?1 AND p.granularity = ?2 AND p.period_key = ?3"
    );
    let decoded = conn
        .query_row(
            &sql,
            params![subject_id.to_string(), granularity.as_str(), period_key],
            |row| Ok(decode_period(row, *subject_id)),
        )
        .optional()?;
    Ok(decoded
        .flatten()
        .map(|d| d.into_value_logged("period_summaries", period_key)))
}

/// Stored periods with keys in `from_key..=to_key`, ascending.
pub fn list_period_summaries(
    conn: &Connection,
    subject_id: &Uuid,
    granularity: Granularity,
    from_key: &str,
    to_key: &str,
    limit: usize,
) -> Result<Vec<StoredPeriod>, DatabaseError> {
    let sql = format!(
        "{PERIOD_SELECT}
         WHERE p.subject_id = ?1 AND p.granularity = ?2
           AND p.period_key >= ?3 AND p.period_key <= ?4
         ORDER BY p.period_key ASC LIMIT ?5"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            subject_id.to_string(),
            granularity.as_str(),
            from_key,
            to_key,
            limit as i64
        ],
        |row| {
            let key: String = row.get("period_key")?;
            Ok((key, decode_period(row, *subject_id)))
        },
    )?;

    let mut periods = Vec::new();
    for row in rows {
        let (key, decoded) = row?;
        match decoded {
            Some(p) => periods.push(p.into_value_logged("period_summaries", &key)),
            None => tracing::warn!(key = %key, "Skipping period summary with unreadable bounds"),
        }
    }
    Ok(periods)
}

fn decode_period(row: &Row<'_>, subject_id: Uuid) -> Option<Decoded<StoredPeriod>> {
    let mut r = FieldReader::new(row);
    let start_date = r.date("start_date")?;
    let end_date = r.date("end_date")?;

    let counters = TreatmentCounters {
        medication_total_doses: r.int("medication_total_doses"),
        medication_scheduled_doses: r.int("medication_scheduled_doses"),
        medication_missed_count: r.int("medication_missed_count"),
        fluid_total_volume: r.real("fluid_total_volume"),
        fluid_session_count: r.int("fluid_session_count"),
        fluid_scheduled_sessions: r.int("fluid_scheduled_sessions"),
        symptom_score_total: r.int("symptom_score_total"),
    };

    let mut totals = PeriodTotals::empty(subject_id, start_date, end_date);
    totals.counters = counters;
    totals.fluid_treatment_days = r.int("fluid_treatment_days");
    totals.overall_treatment_days = r.int("overall_treatment_days");
    totals.overall_missed_days = r.int("overall_missed_days");
    for kind in SymptomKind::ALL {
        let days = r.int(symptom_days_column(kind));
        if days != 0 {
            totals.days_with_symptom.insert(kind, days);
        }
    }
    totals.days_with_any_symptoms = r.int("days_with_any_symptoms");
    totals.symptom_score_max = r.int("symptom_score_max");
    totals.symptom_score_average = r.opt_real("symptom_score_average");
    totals.created_at = r.timestamp("created_at");
    totals.updated_at = r.timestamp("updated_at");

    let weight = WeightStats {
        entries_count: r.int("weight_entries_count"),
        first_kg: r.opt_real("weight_first_kg"),
        latest_kg: r.opt_real("weight_latest_kg"),
        average_kg: r.opt_real("weight_average_kg"),
        change_percent: r.opt_real("weight_change_percent"),
        trend: r.parsed("weight_trend"),
    };

    Some(r.finish(StoredPeriod { totals, weight }))
}

/// Create the period row with its boundary dates if it does not exist yet.
pub fn seed_period_summary(
    conn: &Connection,
    subject_id: &Uuid,
    granularity: Granularity,
    period_key: &str,
    start_date: &NaiveDate,
    end_date: &NaiveDate,
    now: &DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO period_summaries
         (subject_id, granularity, period_key, start_date, end_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            subject_id.to_string(),
            granularity.as_str(),
            period_key,
            day_key(start_date),
            day_key(end_date),
            now.to_rfc3339(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Apply signed increments to period counters in one statement.
pub fn increment_period_counters(
    conn: &Connection,
    subject_id: &Uuid,
    granularity: Granularity,
    period_key: &str,
    increments: &[(&'static str, CounterDelta)],
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    if increments.is_empty() {
        return Ok(());
    }

    let mut assignments = Vec::with_capacity(increments.len() + 1);
    let mut values: Vec<Value> = vec![
        Value::Text(subject_id.to_string()),
        Value::Text(granularity.as_str().to_string()),
        Value::Text(period_key.to_string()),
    ];
    for (column, delta) in increments {
        if !PERIOD_COUNTER_COLUMNS.contains(column) {
            return Err(DatabaseError::ConstraintViolation(format!(
                "Not a period counter: {column}"
            )));
        }
        values.push(delta.to_value());
        assignments.push(format!(
            "{column} = CAST({column} AS {}) + ?{}",
            match delta {
                CounterDelta::Int(_) => "INTEGER",
                CounterDelta::Real(_) => "REAL",
            },
            values.len()
        ));
    }
    values.push(Value::Text(now.to_rfc3339()));
    assignments.push(format!("updated_at = ?{}", values.len()));

    let sql = format!(
        "UPDATE period_summaries SET {}
         WHERE subject_id = ?1 AND granularity = ?2 AND period_key = ?3",
        assignments.join(", ")
    );
    let updated = conn.execute(&sql, params_from_iter(values))?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: format!("{granularity} summary"),
            id: period_key.to_string(),
        });
    }
    Ok(())
}

/// Overwrite the symptom max/average of a period.
pub fn set_period_symptom_stats(
    conn: &Connection,
    subject_id: &Uuid,
    granularity: Granularity,
    period_key: &str,
    score_max: i64,
    score_average: Option<f64>,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO period_stats
         (subject_id, granularity, period_key, symptom_score_max, symptom_score_average, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (subject_id, granularity, period_key) DO UPDATE SET
            symptom_score_max = excluded.symptom_score_max,
            symptom_score_average = excluded.symptom_score_average,
            updated_at = excluded.updated_at",
        params![
            subject_id.to_string(),
            granularity.as_str(),
            period_key,
            score_max,
            score_average,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Overwrite the weight trend fields of a month.
pub fn set_period_weight_stats(
    conn: &Connection,
    subject_id: &Uuid,
    period_key: &str,
    weight: &WeightStats,
    now: &DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO period_stats
         (subject_id, granularity, period_key, weight_entries_count, weight_first_kg,
          weight_latest_kg, weight_average_kg, weight_change_percent, weight_trend, updated_at)
         VALUES (?1, 'month', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT (subject_id, granularity, period_key) DO UPDATE SET
            weight_entries_count = excluded.weight_entries_count,
            weight_first_kg = excluded.weight_first_kg,
            weight_latest_kg = excluded.weight_latest_kg,
            weight_average_kg = excluded.weight_average_kg,
            weight_change_percent = excluded.weight_change_percent,
            weight_trend = excluded.weight_trend,
            updated_at = excluded.updated_at",
        params![
            subject_id.to_string(),
            period_key,
            weight.entries_count,
            weight.first_kg,
            weight.latest_kg,
            weight.average_kg,
            weight.change_percent,
            weight.trend.map(|t| t.as_str()),
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}
