use chrono::NaiveDate;
use uuid::Uuid;

use super::enums::Granularity;

/// A date range read over pre-aggregated summaries.
///
/// `start` and `end` may fall anywhere inside their periods; both are
/// normalized to the containing period. `limit` is clamped to the configured
/// page size.
#[derive(Debug, Clone)]
pub struct SummaryRange {
    pub subject_id: Uuid,
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub limit: Option<usize>,
}

impl SummaryRange {
    pub fn new(subject_id: Uuid, granularity: Granularity, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            subject_id,
            granularity,
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}
