//! Per-user statistics over attributed samples: daily highlights, a lazy
//! series of daily means, 52 weekly buckets, window means, and rankings.

#![allow(missing_docs)]

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::core::errors::{Result, WsError};
use crate::core::pool::map_unordered;
use crate::core::types::{AttributedSample, TimeRange};
use crate::energy::attribution::AttributionEngine;
use crate::energy::calendar::{self, WEEK_BUCKETS, Window};

/// `{max, min, sum, mean}` of one user's attributed samples over a day.
///
/// `sum` and `mean` carry the day's midnight as their timestamp. An empty day
/// yields four zero samples at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Highlights {
    pub max: AttributedSample,
    pub min: AttributedSample,
    pub sum: AttributedSample,
    pub mean: AttributedSample,
}

impl Highlights {
    fn of(day: NaiveDate, mut samples: Vec<AttributedSample>) -> Self {
        let midnight = calendar::day_start(day);
        // Earliest sample wins ties for max and min.
        samples.sort_by_key(|s| s.timestamp);
        let Some(first) = samples.first().copied() else {
            let zero = AttributedSample::zero(midnight);
            return Self {
                max: zero,
                min: zero,
                sum: zero,
                mean: zero,
            };
        };

        let (mut max, mut min, mut sum) = (first, first, 0.0);
        for s in &samples {
            if s.value > max.value {
                max = *s;
            }
            if s.value < min.value {
                min = *s;
            }
            sum += s.value;
        }
        Self {
            max,
            min,
            sum: AttributedSample::new(midnight, sum),
            mean: AttributedSample::new(midnight, mean(samples.iter().map(|s| s.value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyMean {
    pub date: NaiveDate,
    pub mean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllMeans {
    pub year: f64,
    pub month: f64,
    pub week: f64,
    pub today: f64,
}

/// 1-based positions in each ascending list of means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ranks {
    pub year: usize,
    pub month: usize,
    pub week: usize,
    pub day: usize,
    pub total_users: usize,
}

/// Arithmetic mean; 0 for no values.
fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0_u32), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / f64::from(count)
    }
}

pub struct AggregationEngine {
    attribution: AttributionEngine,
    rank_workers: usize,
}

impl AggregationEngine {
    #[must_use]
    pub fn new(attribution: AttributionEngine, rank_workers: usize) -> Self {
        Self {
            attribution,
            rank_workers: rank_workers.max(1),
        }
    }

    #[must_use]
    pub const fn attribution(&self) -> &AttributionEngine {
        &self.attribution
    }

    pub fn daily_highlights(&self, user_id: i64, date: NaiveDate) -> Result<Highlights> {
        self.daily_highlights_at(user_id, date, Utc::now())
    }

    pub fn daily_highlights_at(
        &self,
        user_id: i64,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Highlights> {
        let samples =
            self.attribution
                .consumption_at(user_id, Some(calendar::day_range(date)), now)?;
        Ok(Highlights::of(date, samples))
    }

    /// One mean per calendar day from the user's first interval to today.
    ///
    /// Days are computed as the iterator is pulled. A user who never
    /// connected yields nothing.
    pub fn all_daily_means(&self, user_id: i64) -> Result<DailyMeans<'_>> {
        self.all_daily_means_at(user_id, Utc::now())
    }

    pub fn all_daily_means_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<DailyMeans<'_>> {
        let first = self
            .attribution
            .tracker()
            .earliest_interval_for_user(user_id)?
            .map(|interval| interval.start.date_naive());
        Ok(DailyMeans {
            engine: self,
            user_id,
            next: first,
            last: now.date_naive(),
            now,
        })
    }

    /// Means over the current partial week (index 0) and the 51 full weeks
    /// before it.
    pub fn weekly_buckets(&self, user_id: i64) -> Result<Vec<f64>> {
        self.weekly_buckets_at(user_id, Utc::now())
    }

    pub fn weekly_buckets_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<Vec<f64>> {
        let buckets = calendar::week_buckets(now);
        let oldest = buckets.last().map_or(now, |b| b.start);
        let samples = self
            .attribution
            .consumption_at(user_id, Some(TimeRange::new(oldest, now)), now)?;

        let mut sums = [0.0_f64; WEEK_BUCKETS];
        let mut counts = [0_u32; WEEK_BUCKETS];
        for sample in samples {
            if let Some(i) = buckets.iter().position(|b| b.contains(sample.timestamp)) {
                sums[i] += sample.value;
                counts[i] += 1;
            }
        }
        Ok(sums
            .iter()
            .zip(counts)
            .map(|(&sum, count)| if count == 0 { 0.0 } else { sum / f64::from(count) })
            .collect())
    }

    /// Mean attributed value over the intervals that overlap
    /// `[window start, now)`.
    ///
    /// Week, month and year count every sample of an overlapping interval,
    /// including samples taken before the window opened. The day window is
    /// clipped to the day.
    pub fn window_mean(&self, user_id: i64, window: Window) -> Result<f64> {
        self.window_mean_at(user_id, window, Utc::now())
    }

    pub fn window_mean_at(&self, user_id: i64, window: Window, now: DateTime<Utc>) -> Result<f64> {
        let range = window.range_at(now);
        let samples = match window {
            Window::Day => self.attribution.consumption_at(user_id, Some(range), now)?,
            Window::Week | Window::Month | Window::Year => self
                .attribution
                .consumption_overlapping_at(user_id, range, now)?,
        };
        Ok(mean(samples.iter().map(|s| s.value)))
    }

    pub fn all_means(&self, user_id: i64) -> Result<AllMeans> {
        self.all_means_at(user_id, Utc::now())
    }

    pub fn all_means_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<AllMeans> {
        Ok(AllMeans {
            year: self.window_mean_at(user_id, Window::Year, now)?,
            month: self.window_mean_at(user_id, Window::Month, now)?,
            week: self.window_mean_at(user_id, Window::Week, now)?,
            today: self.window_mean_at(user_id, Window::Day, now)?,
        })
    }

    /// Where `user_id` stands among all known users, lowest mean first.
    ///
    /// Every user's means are computed in parallel. Equal means are ordered
    /// by ascending user id.
    pub fn rank(&self, user_id: i64) -> Result<Ranks> {
        self.rank_at(user_id, Utc::now())
    }

    pub fn rank_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<Ranks> {
        let ids = self.attribution.tracker().user_ids()?;
        if !ids.contains(&user_id) {
            return Err(WsError::UserNotFound { user_id });
        }
        let means = map_unordered(ids, self.rank_workers, |id| {
            self.all_means_at(id, now).map(|m| (id, m))
        })
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        Ok(Ranks {
            year: position(&means, user_id, |m| m.year),
            month: position(&means, user_id, |m| m.month),
            week: position(&means, user_id, |m| m.week),
            day: position(&means, user_id, |m| m.today),
            total_users: means.len(),
        })
    }
}

fn position(means: &[(i64, AllMeans)], user_id: i64, pick: impl Fn(&AllMeans) -> f64) -> usize {
    let mut order: Vec<(f64, i64)> = means.iter().map(|(id, m)| (pick(m), *id)).collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    order
        .iter()
        .position(|&(_, id)| id == user_id)
        .map_or(0, |p| p + 1)
}

/// Lazy per-day means; see [`AggregationEngine::all_daily_means`].
pub struct DailyMeans<'a> {
    engine: &'a AggregationEngine,
    user_id: i64,
    next: Option<NaiveDate>,
    last: NaiveDate,
    now: DateTime<Utc>,
}

impl Iterator for DailyMeans<'_> {
    type Item = Result<DailyMean>;

    fn next(&mut self) -> Option<Self::Item> {
        let date = self.next.filter(|d| *d <= self.last)?;
        self.next = date.succ_opt();
        Some(
            self.engine
                .daily_highlights_at(self.user_id, date, self.now)
                .map(|h| DailyMean {
                    date,
                    mean: h.mean.value,
                }),
        )
    }
}
