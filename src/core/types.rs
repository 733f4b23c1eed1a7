//! Shared value types: samples, attributed samples, half-open time ranges.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, WsError};

/// Raw measurement from the shared energy sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A raw sample divided by the number of users connected when it was taken.
///
/// Derived on the read path and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributedSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl AttributedSample {
    #[must_use]
    pub const fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Zero-valued sample pinned at `timestamp`, used for empty windows.
    #[must_use]
    pub const fn zero(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            value: 0.0,
        }
    }
}

/// Half-open time range `[start, stop)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
}

impl TimeRange {
    #[must_use]
    pub const fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self { start, stop }
    }

    /// True when the range holds no instant at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stop <= self.start
    }

    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.stop
    }

    /// Overlap of two ranges, `None` when they share no instant.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let clipped = Self {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
        };
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// Format a timestamp the way both stores and the log expect it.
///
/// Fixed-width RFC 3339 with microseconds and a `Z` suffix, so lexicographic
/// order equals chronological order.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by [`format_ts`] (any RFC 3339 string is accepted).
pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WsError::Serialization {
            context: "timestamp",
            details: format!("{raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn range_is_half_open() {
        let r = TimeRange::new(at(10, 0), at(11, 0));
        assert!(r.contains(at(10, 0)));
        assert!(r.contains(at(10, 59)));
        assert!(!r.contains(at(11, 0)));
    }

    #[test]
    fn intersect_clips_and_rejects_disjoint() {
        let a = TimeRange::new(at(10, 0), at(12, 0));
        let b = TimeRange::new(at(11, 0), at(13, 0));
        assert_eq!(a.intersect(&b), Some(TimeRange::new(at(11, 0), at(12, 0))));

        let touching = TimeRange::new(at(12, 0), at(13, 0));
        assert_eq!(a.intersect(&touching), None);
    }

    #[test]
    fn formatted_timestamps_sort_chronologically() {
        let early = format_ts(at(9, 5));
        let late = format_ts(at(10, 0));
        assert!(early < late);
        assert_eq!(parse_ts(&early).unwrap(), at(9, 5));
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = parse_ts("yesterday").unwrap_err();
        assert_eq!(err.code(), "WS-2401");
    }
}
