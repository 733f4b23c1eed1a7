//! UTC calendar windows: days, ISO weeks starting Monday, months, years.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TimeRange;

/// Number of weekly buckets reported by weekly statistics.
pub const WEEK_BUCKETS: usize = 52;

/// A named window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Day,
    Week,
    Month,
    Year,
}

impl Window {
    /// Start of the window containing `now`.
    #[must_use]
    pub fn start_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let first_day = match self {
            Self::Day => today,
            Self::Week => monday_of(today),
            Self::Month => today - Duration::days(i64::from(today.day0())),
            Self::Year => today - Duration::days(i64::from(today.ordinal0())),
        };
        day_start(first_day)
    }

    /// `[start_at(now), now)`.
    #[must_use]
    pub fn range_at(self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::new(self.start_at(now), now)
    }
}

/// Midnight UTC at the start of `date`.
#[must_use]
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// `[date 00:00, next day 00:00)`.
#[must_use]
pub fn day_range(date: NaiveDate) -> TimeRange {
    let start = day_start(date);
    TimeRange::new(start, start + Duration::days(1))
}

fn monday_of(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Weekly buckets ending at `now`.
///
/// Bucket 0 runs from the most recent Monday 00:00 to `now`; bucket `k`
/// is the full Monday-to-Monday week `k` weeks before that.
#[must_use]
pub fn week_buckets(now: DateTime<Utc>) -> Vec<TimeRange> {
    let monday = Window::Week.start_at(now);
    let mut buckets = Vec::with_capacity(WEEK_BUCKETS);
    buckets.push(TimeRange::new(monday, now));
    for k in 1..WEEK_BUCKETS {
        let weeks = i64::try_from(k).unwrap_or(i64::MAX);
        let stop = monday - Duration::weeks(weeks - 1);
        buckets.push(TimeRange::new(stop - Duration::weeks(1), stop));
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn thursday_noon() -> DateTime<Utc> {
        // 2026-04-09 is a Thursday.
        Utc.with_ymd_and_hms(2026, 4, 9, 12, 30, 0).unwrap()
    }

    #[test]
    fn window_starts() {
        let now = thursday_noon();
        assert_eq!(
            Window::Day.start_at(now),
            Utc.with_ymd_and_hms(2026, 4, 9, 0, 0, 0).unwrap()
        );
        let monday = Window::Week.start_at(now);
        assert_eq!(monday, Utc.with_ymd_and_hms(2026, 4, 6, 0, 0, 0).unwrap());
        assert_eq!(monday.weekday(), Weekday::Mon);
        assert_eq!(
            Window::Month.start_at(now),
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            Window::Year.start_at(now),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn monday_is_its_own_week_start() {
        let monday_morning = Utc.with_ymd_and_hms(2026, 4, 6, 0, 0, 1).unwrap();
        assert_eq!(
            Window::Week.start_at(monday_morning),
            Utc.with_ymd_and_hms(2026, 4, 6, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn week_buckets_tile_backwards_without_gaps() {
        let now = thursday_noon();
        let buckets = week_buckets(now);
        assert_eq!(buckets.len(), WEEK_BUCKETS);
        assert_eq!(buckets[0].stop, now);
        for pair in buckets.windows(2) {
            assert_eq!(pair[1].stop, pair[0].start);
            assert_eq!(pair[1].stop - pair[1].start, Duration::weeks(1));
        }
        assert_eq!(buckets[1].start.weekday(), Weekday::Mon);
    }

    #[test]
    fn day_range_is_24_hours() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let range = day_range(date);
        assert_eq!(range.stop - range.start, Duration::hours(24));
    }
}
