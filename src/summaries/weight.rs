//! Monthly weight trend, recomputed from the month's daily weights.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{WeightStats, WeightTrend};

/// Trend fields for one month. `weights` must be ascending by day.
///
/// Change and trend need at least two entries.
pub fn weight_stats(weights: &[(NaiveDate, f64)], stable_threshold_percent: f64) -> WeightStats {
    let (Some((_, first)), Some((_, latest))) = (weights.first(), weights.last()) else {
        return WeightStats::default();
    };
    let count = weights.len();
    let average = weights.iter().map(|(_, kg)| kg).sum::<f64>() / count as f64;

    let change_percent = (count > 1 && *first > 0.0).then(|| (latest - first) / first * 100.0);
    let trend = change_percent.map(|change| classify(change, stable_threshold_percent));

    WeightStats {
        entries_count: count as i64,
        first_kg: Some(*first),
        latest_kg: Some(*latest),
        average_kg: Some(average),
        change_percent,
        trend,
    }
}

pub fn classify(change_percent: f64, stable_threshold_percent: f64) -> WeightTrend {
    if change_percent.abs() < stable_threshold_percent {
        WeightTrend::Stable
    } else if change_percent > 0.0 {
        WeightTrend::Increasing
    } else {
        WeightTrend::Decreasing
    }
}

/// One month on the weight chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightPoint {
    pub month_start: NaiveDate,
    pub stats: WeightStats,
}

/// Weight chart ending at `end_month`, as cached per subject.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightHistory {
    pub end_month: NaiveDate,
    pub points: Vec<WeightPoint>,
}
