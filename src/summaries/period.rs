//! Calendar periods and their storage keys.
//!
//! Keys sort lexicographically in period order within a granularity:
//! day `YYYY-MM-DD`, ISO week `YYYY-Www`, month `YYYY-MM`.

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::models::Granularity;

/// One day, ISO week or calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    /// The period of `granularity` that contains `date`.
    pub fn containing(granularity: Granularity, date: NaiveDate) -> Self {
        match granularity {
            Granularity::Day => Self {
                granularity,
                start: date,
                end: date,
            },
            Granularity::Week => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                let start = date - Days::new(offset);
                Self {
                    granularity,
                    start,
                    end: start + Days::new(6),
                }
            }
            Granularity::Month => {
                let start = date.with_day(1).unwrap_or(date);
                let end = (start + Months::new(1)) - Days::new(1);
                Self {
                    granularity,
                    start,
                    end,
                }
            }
        }
    }

    /// Canonical storage key.
    pub fn key(&self) -> String {
        match self.granularity {
            Granularity::Day => self.start.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let iso = self.start.iso_week();
                format!("{:04}-W{:02}", iso.year(), iso.week())
            }
            Granularity::Month => self.start.format("%Y-%m").to_string(),
        }
    }

    pub fn next(&self) -> Self {
        Self::containing(self.granularity, self.end + Days::new(1))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// The day, week and month a logged event falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodKeys {
    pub day: Period,
    pub week: Period,
    pub month: Period,
}

impl PeriodKeys {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            day: Period::containing(Granularity::Day, date),
            week: Period::containing(Granularity::Week, date),
            month: Period::containing(Granularity::Month, date),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.day.start
    }
}
