//! Consecutive-day adherence streaks.
//!
//! `streak(D) = done(D) ? streak(D - 1) + 1 : 0`. A day with no stored
//! summary is not done.

use chrono::{Days, NaiveDate};

use crate::models::DailySummary;

pub fn next_streak(previous: u32, done: bool) -> u32 {
    if done {
        previous.saturating_add(1)
    } else {
        0
    }
}

/// Streaks for a run of consecutive days, oldest first.
pub fn streaks_for(done: &[bool]) -> Vec<u32> {
    let mut previous = 0;
    done.iter()
        .map(|d| {
            previous = next_streak(previous, *d);
            previous
        })
        .collect()
}

/// Re-score the days after `from` once `from`'s streak has changed.
///
/// `later` holds stored days after `from`, ascending. Walking stops at the
/// first calendar gap (a missing day resets the streak, so nothing beyond it
/// can change), at the first day whose streak is already correct, or after
/// `limit` days. Returns only the days whose streak changed.
pub fn propagate_forward(
    from: NaiveDate,
    from_streak: u32,
    later: &[DailySummary],
    limit: usize,
) -> Vec<DailySummary> {
    let mut changed = Vec::new();
    let mut expected = from;
    let mut previous = from_streak;

    for day in later.iter().take(limit) {
        expected = match expected.checked_add_days(Days::new(1)) {
            Some(d) => d,
            None => break,
        };
        if day.date != expected {
            break;
        }
        let streak = next_streak(previous, day.overall_treatment_done);
        if streak == day.overall_streak {
            break;
        }
        let mut updated = day.clone();
        updated.overall_streak = streak;
        changed.push(updated);
        previous = streak;
    }

    if later.len() > limit && changed.len() == limit {
        tracing::warn!(
            from = %from,
            limit,
            "Streak propagation stopped at limit; later days keep stale streaks"
        );
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn stored(day: u32, done: bool, streak: u32) -> DailySummary {
        let mut d = DailySummary::empty(Uuid::nil(), date(day));
        d.overall_treatment_done = done;
        d.overall_streak = streak;
        d
    }

    #[test]
    fn streak_recurrence() {
        let s = streaks_for(&[true, true, false, true]);
        assert_eq!(s[3], 1);
        assert_eq!(s[1], 2);
        assert_eq!(s[2], 0);
        assert_eq!(s, vec![1, 2, 0, 1]);
    }

    #[test]
    fn not_done_resets() {
        assert_eq!(next_streak(12, false), 0);
        assert_eq!(next_streak(12, true), 13);
        assert_eq!(next_streak(u32::MAX, true), u32::MAX);
    }

    #[test]
    fn backfill_repairs_later_days() {
        // Day 3 was missed, days 4-5 done. Backfilling day 3 as done
        // gives it streak 3 and should carry through 4 and 5.
        let later = vec![stored(4, true, 1), stored(5, true, 2), stored(6, false, 0)];
        let changed = propagate_forward(date(3), 3, &later, 400);
        let streaks: Vec<_> = changed.iter().map(|d| (d.date, d.overall_streak)).collect();
        assert_eq!(streaks, vec![(date(4), 4), (date(5), 5)]);
    }

    #[test]
    fn retroactive_miss_breaks_later_days() {
        let later = vec![stored(4, true, 4), stored(5, true, 5)];
        let changed = propagate_forward(date(3), 0, &later, 400);
        assert_eq!(changed[0].overall_streak, 1);
        assert_eq!(changed[1].overall_streak, 2);
    }

    #[test]
    fn stops_at_gap() {
        let later = vec![stored(4, true, 1), stored(6, true, 1)];
        let changed = propagate_forward(date(3), 2, &later, 400);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].date, date(4));
    }

    #[test]
    fn stops_when_unchanged() {
        let later = vec![stored(4, true, 3), stored(5, true, 99)];
        assert!(propagate_forward(date(3), 2, &later, 400).is_empty());
    }

    #[test]
    fn respects_limit() {
        let later: Vec<_> = (4..=10).map(|d| stored(d, true, 1)).collect();
        let changed = propagate_forward(date(3), 5, &later, 3);
        assert_eq!(changed.len(), 3);
        assert_eq!(changed[2].overall_streak, 8);
    }
}
