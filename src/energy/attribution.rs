//! Fair-share attribution: each raw sample divided by the number of users
//! connected when it was taken.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::errors::{Result, WsError};
use crate::core::pool::map_unordered;
use crate::core::types::{AttributedSample, TimeRange};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::series::{ENERGY, TimeSeriesStore};
use crate::session::Interval;
use crate::session::tracker::IntervalTracker;

/// Workers fetching one user's intervals.
pub const DEFAULT_WORKERS: usize = 5;

/// Resolves a user's intervals and turns raw samples into their share.
#[derive(Clone)]
pub struct AttributionEngine {
    tracker: Arc<IntervalTracker>,
    store: Arc<dyn TimeSeriesStore>,
    workers: usize,
    logger: ActivityLoggerHandle,
}

impl AttributionEngine {
    #[must_use]
    pub fn new(
        tracker: Arc<IntervalTracker>,
        store: Arc<dyn TimeSeriesStore>,
        workers: usize,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            tracker,
            store,
            workers: workers.max(1),
            logger,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<IntervalTracker> {
        &self.tracker
    }

    /// The user's attributed samples, optionally restricted to `window`.
    ///
    /// Order is unspecified.
    pub fn consumption(
        &self,
        user_id: i64,
        window: Option<TimeRange>,
    ) -> Result<Vec<AttributedSample>> {
        self.consumption_at(user_id, window, Utc::now())
    }

    /// Same as [`consumption`](Self::consumption) with an explicit clock; the
    /// current interval ends at `now`.
    ///
    /// Intervals are fetched concurrently. A failed fetch is logged and that
    /// interval contributes nothing; a zero-user interval fails the whole call
    /// before anything is fetched.
    pub fn consumption_at(
        &self,
        user_id: i64,
        window: Option<TimeRange>,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttributedSample>> {
        self.collect(user_id, window, Fetch::Clipped, now)
    }

    /// The user's attributed samples from every interval overlapping
    /// `window`, each fetched over its whole span.
    ///
    /// Samples taken before `window.start` inside an interval that crosses
    /// it are included.
    pub fn consumption_overlapping(
        &self,
        user_id: i64,
        window: TimeRange,
    ) -> Result<Vec<AttributedSample>> {
        self.consumption_overlapping_at(user_id, window, Utc::now())
    }

    pub fn consumption_overlapping_at(
        &self,
        user_id: i64,
        window: TimeRange,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttributedSample>> {
        self.collect(user_id, Some(window), Fetch::WholeInterval, now)
    }

    fn collect(
        &self,
        user_id: i64,
        window: Option<TimeRange>,
        fetch: Fetch,
        now: DateTime<Utc>,
    ) -> Result<Vec<AttributedSample>> {
        let tasks = fetch_ranges(
            &self.tracker.intervals_for_user(user_id)?,
            window,
            fetch,
            now,
        );
        if let Some((bad, _)) = tasks.iter().find(|(i, _)| i.concurrent_users == 0) {
            return Err(WsError::InvariantViolation {
                details: format!(
                    "interval {} of user {user_id} has no connected users",
                    bad.id
                ),
            });
        }

        let fetched = map_unordered(tasks, self.workers, |(interval, range)| {
            self.store
                .query(&ENERGY, range)
                .map(|samples| {
                    let share = f64::from(interval.concurrent_users);
                    samples
                        .into_iter()
                        .map(|s| AttributedSample::new(s.timestamp, s.value / share))
                        .collect::<Vec<_>>()
                })
                .map_err(|err| (interval.id, err))
        });

        let mut out = Vec::new();
        for result in fetched {
            match result {
                Ok(samples) => out.extend(samples),
                Err((interval_id, err)) => {
                    eprintln!("[WS-ATTRIBUTION] skipping interval {interval_id}: {err}");
                    self.logger.send(ActivityEvent::SeriesReadFailed {
                        interval_id,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }
}

/// What span is fetched for an interval that overlaps the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    /// Only the overlap.
    Clipped,
    /// The interval's own range.
    WholeInterval,
}

/// Pair each interval with the span to fetch for it. Intervals that do not
/// overlap `window` are dropped.
fn fetch_ranges(
    intervals: &[Interval],
    window: Option<TimeRange>,
    fetch: Fetch,
    now: DateTime<Utc>,
) -> Vec<(Interval, TimeRange)> {
    intervals
        .iter()
        .filter_map(|interval| {
            let own = interval.range_at(now);
            let range = match window {
                Some(window) => {
                    let overlap = own.intersect(&window)?;
                    match fetch {
                        Fetch::Clipped => overlap,
                        Fetch::WholeInterval => own,
                    }
                }
                None if own.is_empty() => return None,
                None => own,
            };
            Some((*interval, range))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RecoveryPolicy;
    use crate::core::types::Sample;
    use crate::series::SeriesKey;
    use crate::series::store::MemorySeriesStore;
    use crate::session::store::SessionStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 11, 8, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn setup() -> (Arc<IntervalTracker>, Arc<MemorySeriesStore>, AttributionEngine) {
        let tracker = Arc::new(IntervalTracker::new(
            SessionStore::open_in_memory().unwrap(),
            RecoveryPolicy::SharedBoundary,
            ActivityLoggerHandle::detached(),
        ));
        let store = Arc::new(MemorySeriesStore::new());
        let engine = AttributionEngine::new(
            Arc::clone(&tracker),
            store.clone(),
            DEFAULT_WORKERS,
            ActivityLoggerHandle::detached(),
        );
        (tracker, store, engine)
    }

    fn sorted(mut v: Vec<AttributedSample>) -> Vec<AttributedSample> {
        v.sort_by_key(|s| s.timestamp);
        v
    }

    #[test]
    fn sole_user_gets_raw_values() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        store.write(&ENERGY, Sample::new(secs(5), 3.25)).unwrap();

        let got = engine.consumption_at(1, None, secs(60)).unwrap();
        assert_eq!(got, vec![AttributedSample::new(secs(5), 3.25)]);
    }

    #[test]
    fn shared_interval_halves_the_sample() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        tracker.connect_at(2, secs(10)).unwrap();
        store.write(&ENERGY, Sample::new(secs(11), 10.0)).unwrap();

        for user in [1, 2] {
            let got = engine.consumption_at(user, None, secs(60)).unwrap();
            assert_eq!(got, vec![AttributedSample::new(secs(11), 5.0)]);
        }
    }

    #[test]
    fn samples_outside_the_users_links_are_excluded() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        tracker.connect_at(2, secs(10)).unwrap();
        tracker.disconnect_at(2, secs(20)).unwrap();
        for s in [5, 15, 25] {
            store.write(&ENERGY, Sample::new(secs(s), 6.0)).unwrap();
        }

        let got = engine.consumption_at(2, None, secs(60)).unwrap();
        assert_eq!(got, vec![AttributedSample::new(secs(15), 3.0)]);

        let got = sorted(engine.consumption_at(1, None, secs(60)).unwrap());
        let values: Vec<f64> = got.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![6.0, 3.0, 6.0]);
    }

    #[test]
    fn window_clips_samples() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        for s in [1, 2, 3, 4] {
            store.write(&ENERGY, Sample::new(secs(s), 1.0)).unwrap();
        }
        let window = TimeRange::new(secs(2), secs(4));
        let got = sorted(engine.consumption_at(1, Some(window), secs(60)).unwrap());
        let stamps: Vec<_> = got.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![secs(2), secs(3)]);
    }

    #[test]
    fn unknown_user_is_reported() {
        let (_, _, engine) = setup();
        assert!(matches!(
            engine.consumption_at(77, None, t0()),
            Err(WsError::UserNotFound { user_id: 77 })
        ));
    }

    #[test]
    fn zero_user_interval_is_an_invariant_violation() {
        let mut sessions = SessionStore::open_in_memory().unwrap();
        sessions
            .write("test", |rows| {
                rows.upsert_connected_user(1, t0())?;
                let interval = rows.insert_interval(t0(), 0)?;
                rows.insert_link(1, interval.id)?;
                Ok(())
            })
            .unwrap();
        let tracker = Arc::new(IntervalTracker::new(
            sessions,
            RecoveryPolicy::SharedBoundary,
            ActivityLoggerHandle::detached(),
        ));
        let engine = AttributionEngine::new(
            tracker,
            Arc::new(MemorySeriesStore::new()),
            DEFAULT_WORKERS,
            ActivityLoggerHandle::detached(),
        );
        assert!(matches!(
            engine.consumption_at(1, None, secs(30)),
            Err(WsError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn intervals_outside_window_are_not_fetched() {
        let intervals = [Interval {
            id: 4,
            start: t0(),
            stop: Some(secs(10)),
            concurrent_users: 1,
        }];
        let later = TimeRange::new(secs(20), secs(30));
        assert!(fetch_ranges(&intervals, Some(later), Fetch::Clipped, secs(40)).is_empty());
        assert!(fetch_ranges(&intervals, Some(later), Fetch::WholeInterval, secs(40)).is_empty());
        assert_eq!(fetch_ranges(&intervals, None, Fetch::Clipped, secs(40)).len(), 1);
    }

    #[test]
    fn overlapping_fetch_keeps_whole_crossing_interval() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        tracker.connect_at(2, secs(10)).unwrap();
        tracker.disconnect_at(2, secs(20)).unwrap();
        for s in [5, 15, 25] {
            store.write(&ENERGY, Sample::new(secs(s), 6.0)).unwrap();
        }
        let window = TimeRange::new(secs(12), secs(60));

        let clipped = sorted(engine.consumption_at(1, Some(window), secs(60)).unwrap());
        let stamps: Vec<_> = clipped.iter().map(|s| s.timestamp).collect();
        assert_eq!(stamps, vec![secs(15), secs(25)]);

        // [t0, 10s) never reaches the window; [10s, 20s) crosses its start.
        let whole = sorted(
            engine
                .consumption_overlapping_at(1, window, secs(60))
                .unwrap(),
        );
        assert_eq!(
            whole,
            vec![
                AttributedSample::new(secs(15), 3.0),
                AttributedSample::new(secs(25), 6.0),
            ]
        );

        let early = TimeRange::new(secs(8), secs(60));
        let whole = sorted(
            engine
                .consumption_overlapping_at(1, early, secs(60))
                .unwrap(),
        );
        assert_eq!(whole.len(), 3);
        assert_eq!(whole[0], AttributedSample::new(secs(5), 6.0));
    }

    #[test]
    fn read_failures_yield_empty_success() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        store.write(&ENERGY, Sample::new(secs(1), 1.0)).unwrap();
        store.close().unwrap();
        let got = engine.consumption_at(1, None, secs(60)).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn other_series_are_ignored() {
        let (tracker, store, engine) = setup();
        tracker.connect_at(1, t0()).unwrap();
        let power = SeriesKey {
            measurement: "energy",
            field: "power",
        };
        store.write(&power, Sample::new(secs(1), 9.0)).unwrap();
        assert!(engine.consumption_at(1, None, secs(60)).unwrap().is_empty());
    }
}
