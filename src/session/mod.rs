//! Session bookkeeping: users, the interval partition of time, and the links
//! recording which intervals each user was connected for.

pub mod store;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::TimeRange;

/// A tracked user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub start_session: DateTime<Utc>,
    pub end_session: Option<DateTime<Utc>>,
    /// Last heartbeat, if the user ever sent one.
    pub last_seen: Option<DateTime<Utc>>,
}

/// A maximal span with a constant number of connected users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: i64,
    pub start: DateTime<Utc>,
    /// `None` while this is the current interval.
    pub stop: Option<DateTime<Utc>>,
    pub concurrent_users: u32,
}

impl Interval {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.stop.is_none()
    }

    /// `[start, stop)`, with an open interval ending at `now`.
    #[must_use]
    pub fn range_at(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::new(self.start, self.stop.unwrap_or(now))
    }

    /// Chronological sort key. Ties on `start` (zero-length intervals) are
    /// broken by creation order.
    #[must_use]
    pub const fn chrono_key(&self) -> (DateTime<Utc>, i64) {
        (self.start, self.id)
    }
}

/// One continuous connection of a user, as a run of intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    /// `None` once the user was dissociated from their history.
    pub user_id: Option<i64>,
    pub start_interval_id: i64,
    /// Last interval of the run; `None` while still connected.
    pub end_interval_id: Option<i64>,
}

impl Link {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.end_interval_id.is_none()
    }
}

/// How an administrator removes a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalMode {
    /// Drop the user and every link they own.
    Delete,
    /// Drop the user row; links keep the now-unknown id.
    Forget,
    /// Keep the user; their links lose the user id.
    Dissociate,
}

impl RemovalMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Forget => "forget",
            Self::Dissociate => "dissociate",
        }
    }
}
