//! Read layer over pre-aggregated summaries.
//!
//! Cost is bounded by the number of periods requested, never by the number
//! of logged events. Periods with nothing logged come back as empty defaults.

use std::collections::HashMap;

use chrono::{Days, Months, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SummaryConfig;
use crate::db::{self, StoredPeriod};
use crate::models::{
    DailySummary, Granularity, MonthlySummary, PeriodTotals, Summary, SummaryRange,
    WeeklySummary, WeightStats,
};

use super::cache::TtlCache;
use super::engine::SummaryEngine;
use super::error::SummaryError;
use super::period::Period;
use super::weight::{WeightHistory, WeightPoint};

/// One page of summaries, ascending by period start.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryPage {
    pub items: Vec<Summary>,
    /// Start of the first period not returned, when the range was truncated.
    pub next_start: Option<NaiveDate>,
}

/// Read accessors sharing the engine's configuration and weight cache.
pub struct SummaryReader<'a> {
    config: &'a SummaryConfig,
    weight_cache: &'a TtlCache<Uuid, WeightHistory>,
}

impl SummaryEngine {
    pub fn reader(&self) -> SummaryReader<'_> {
        SummaryReader::new(self.config(), self.weight_cache())
    }
}

impl<'a> SummaryReader<'a> {
    pub fn new(config: &'a SummaryConfig, weight_cache: &'a TtlCache<Uuid, WeightHistory>) -> Self {
        Self {
            config,
            weight_cache,
        }
    }

    /// Summaries for every period from the one containing `range.start` to
    /// the one containing `range.end`, capped at the page size.
    pub fn get_summaries(
        &self,
        conn: &Connection,
        range: &SummaryRange,
    ) -> Result<SummaryPage, SummaryError> {
        if range.start > range.end {
            return Err(SummaryError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        let limit = range
            .limit
            .unwrap_or(self.config.max_page_size)
            .clamp(1, self.config.max_page_size.max(1));

        let last = Period::containing(range.granularity, range.end);
        let mut periods = Vec::new();
        let mut cursor = Period::containing(range.granularity, range.start);
        while cursor.start <= last.start && periods.len() < limit {
            periods.push(cursor);
            cursor = cursor.next();
        }
        let next_start = (cursor.start <= last.start).then_some(cursor.start);

        let (Some(first), Some(page_last)) = (periods.first(), periods.last()) else {
            return Ok(SummaryPage {
                items: Vec::new(),
                next_start,
            });
        };
        let subject_id = &range.subject_id;

        let items = match range.granularity {
            Granularity::Day => {
                let mut stored: HashMap<NaiveDate, DailySummary> =
                    db::list_daily_summaries(conn, subject_id, &first.start, &page_last.end, limit)
                        .map_err(SummaryError::Read)?
                        .into_iter()
                        .map(|d| (d.date, d))
                        .collect();
                periods
                    .iter()
                    .map(|p| {
                        Summary::Day(
                            stored
                                .remove(&p.start)
                                .unwrap_or_else(|| DailySummary::empty(*subject_id, p.start)),
                        )
                    })
                    .collect()
            }
            granularity => {
                let mut stored: HashMap<NaiveDate, StoredPeriod> = db::list_period_summaries(
                    conn,
                    subject_id,
                    granularity,
                    &first.key(),
                    &page_last.key(),
                    limit,
                )
                .map_err(SummaryError::Read)?
                .into_iter()
                .map(|p| (p.totals.start_date, p))
                .collect();
                periods
                    .iter()
                    .map(|p| period_summary(*subject_id, p, stored.remove(&p.start)))
                    .collect()
            }
        };

        tracing::debug!(
            subject = %subject_id,
            granularity = %range.granularity,
            count = periods.len(),
            truncated = next_start.is_some(),
            "Served summaries"
        );
        Ok(SummaryPage { items, next_start })
    }

    /// The stored day, or an empty one.
    pub fn get_daily_summary(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
    ) -> Result<DailySummary, SummaryError> {
        Ok(db::get_daily_summary(conn, subject_id, &date)
            .map_err(SummaryError::Read)?
            .unwrap_or_else(|| DailySummary::empty(*subject_id, date)))
    }

    /// The ISO week containing `date`.
    pub fn get_weekly_summary(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
    ) -> Result<WeeklySummary, SummaryError> {
        let period = Period::containing(Granularity::Week, date);
        let stored = read_stored(conn, subject_id, &period)?;
        Ok(WeeklySummary {
            totals: stored
                .map(|s| s.totals)
                .unwrap_or_else(|| PeriodTotals::empty(*subject_id, period.start, period.end)),
        })
    }

    /// The calendar month containing `date`.
    pub fn get_monthly_summary(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        date: NaiveDate,
    ) -> Result<MonthlySummary, SummaryError> {
        let period = Period::containing(Granularity::Month, date);
        let stored = read_stored(conn, subject_id, &period)?;
        Ok(monthly(*subject_id, &period, stored))
    }

    /// Streak shown for `today`. Until today is done, yesterday's streak
    /// still stands.
    pub fn current_streak(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        today: NaiveDate,
    ) -> Result<u32, SummaryError> {
        let day = db::get_daily_summary(conn, subject_id, &today).map_err(SummaryError::Read)?;
        if let Some(day) = day.filter(|d| d.overall_treatment_done) {
            return Ok(day.overall_streak);
        }
        let Some(yesterday) = today.checked_sub_days(Days::new(1)) else {
            return Ok(0);
        };
        let day =
            db::get_daily_summary(conn, subject_id, &yesterday).map_err(SummaryError::Read)?;
        Ok(day
            .filter(|d| d.overall_treatment_done)
            .map_or(0, |d| d.overall_streak))
    }

    /// Monthly weight points for the chart ending at the month of `end`.
    /// Months without weights are left out.
    pub fn get_weight_history(
        &self,
        conn: &Connection,
        subject_id: &Uuid,
        end: NaiveDate,
    ) -> Result<Vec<WeightPoint>, SummaryError> {
        let end_month = Period::containing(Granularity::Month, end);
        if let Some(cached) = self.weight_cache.get(subject_id) {
            if cached.end_month == end_month.start {
                tracing::trace!(subject = %subject_id, "Weight history cache hit");
                return Ok(cached.points);
            }
        }

        let months = self.config.weight_history_months.max(1);
        let first_start = end_month
            .start
            .checked_sub_months(Months::new(months - 1))
            .unwrap_or(end_month.start);
        let first = Period::containing(Granularity::Month, first_start);

        let points: Vec<WeightPoint> = db::list_period_summaries(
            conn,
            subject_id,
            Granularity::Month,
            &first.key(),
            &end_month.key(),
            months as usize,
        )
        .map_err(SummaryError::Read)?
        .into_iter()
        .filter(|p| p.weight.entries_count > 0)
        .map(|p| WeightPoint {
            month_start: p.totals.start_date,
            stats: p.weight,
        })
        .collect();

        self.weight_cache.set(
            *subject_id,
            WeightHistory {
                end_month: end_month.start,
                points: points.clone(),
            },
        );
        Ok(points)
    }
}

fn read_stored(
    conn: &Connection,
    subject_id: &Uuid,
    period: &Period,
) -> Result<Option<StoredPeriod>, SummaryError> {
    db::get_period_summary(conn, subject_id, period.granularity, &period.key())
        .map_err(SummaryError::Read)
}

fn monthly(subject_id: Uuid, period: &Period, stored: Option<StoredPeriod>) -> MonthlySummary {
    match stored {
        Some(s) => MonthlySummary {
            totals: s.totals,
            weight: s.weight,
        },
        None => MonthlySummary {
            totals: PeriodTotals::empty(subject_id, period.start, period.end),
            weight: WeightStats::default(),
        },
    }
}

fn period_summary(subject_id: Uuid, period: &Period, stored: Option<StoredPeriod>) -> Summary {
    match period.granularity {
        Granularity::Month => Summary::Month(monthly(subject_id, period, stored)),
        _ => Summary::Week(WeeklySummary {
            totals: stored
                .map(|s| s.totals)
                .unwrap_or_else(|| PeriodTotals::empty(subject_id, period.start, period.end)),
        }),
    }
}
