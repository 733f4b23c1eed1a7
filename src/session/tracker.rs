//! Interval tracker: the only writer of intervals and links.
//!
//! Every mutation reads the open-link count, closes the current interval and
//! opens the next one inside a single `BEGIN IMMEDIATE` transaction, while a
//! process-wide mutex keeps two connects from ever observing the same count.
//! Activity events are emitted only after the transaction commits.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::core::config::{RecoveryPolicy, SessionConfig};
use crate::core::errors::{Result, WsError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::session::store::{Rows, SessionStore};
use crate::session::{Interval, Link, RemovalMode, User};

/// Result of a connect or disconnect that changed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub user_id: i64,
    /// Interval closed by the transition; `None` for the very first connect.
    pub closed_interval_id: Option<i64>,
    /// The new current interval.
    pub opened: Interval,
    /// The user's link after the transition.
    pub link: Link,
}

/// What startup recovery did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub policy: RecoveryPolicy,
    /// The interval left open by the previous run.
    pub dangling_interval_id: Option<i64>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub links_closed: usize,
    /// Links closed at their user's last heartbeat instead of the dangling interval.
    pub closed_at_last_seen: usize,
    /// The zero-user interval opened after recovery.
    pub fresh_interval_id: Option<i64>,
}

impl RecoveryReport {
    /// True when there was nothing to recover.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.dangling_interval_id.is_none()
    }
}

/// What an admin removal did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub user_id: i64,
    pub mode: RemovalMode,
    pub was_connected: bool,
    /// Links deleted, kept, or dissociated depending on `mode`.
    pub links_affected: usize,
}

pub struct IntervalTracker {
    store: Mutex<SessionStore>,
    policy: RecoveryPolicy,
    logger: ActivityLoggerHandle,
}

impl IntervalTracker {
    #[must_use]
    pub fn new(store: SessionStore, policy: RecoveryPolicy, logger: ActivityLoggerHandle) -> Self {
        Self {
            store: Mutex::new(store),
            policy,
            logger,
        }
    }

    /// Open the configured session database.
    pub fn open(config: &SessionConfig, logger: ActivityLoggerHandle) -> Result<Self> {
        let store = SessionStore::open(&config.db_path)?;
        Ok(Self::new(store, config.recovery_policy, logger))
    }

    #[must_use]
    pub const fn policy(&self) -> RecoveryPolicy {
        self.policy
    }

    // ──────────────────── mutations ────────────────────

    /// Connect `user_id` now. `Ok(None)` when the user is already connected.
    pub fn connect(&self, user_id: i64) -> Result<Option<Transition>> {
        self.connect_at(user_id, Utc::now())
    }

    pub fn connect_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<Option<Transition>> {
        let change = self
            .store
            .lock()
            .write("connect", |rows| connect_in(rows, user_id, now))?;
        if let Some(t) = &change {
            self.log_connect(t);
        }
        Ok(change)
    }

    /// Allocate a fresh user id and connect it.
    pub fn connect_new(&self) -> Result<Transition> {
        self.connect_new_at(Utc::now())
    }

    pub fn connect_new_at(&self, now: DateTime<Utc>) -> Result<Transition> {
        let transition = self.store.lock().write("connect_new", |rows| {
            let user_id = rows.next_user_id()?;
            connect_in(rows, user_id, now)?.ok_or_else(|| WsError::InvariantViolation {
                details: format!("freshly allocated user {user_id} was already connected"),
            })
        })?;
        self.log_connect(&transition);
        Ok(transition)
    }

    /// Disconnect `user_id` now. `Ok(None)` when the user is not connected.
    pub fn disconnect(&self, user_id: i64) -> Result<Option<Transition>> {
        self.disconnect_at(user_id, Utc::now())
    }

    pub fn disconnect_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<Option<Transition>> {
        let change = self
            .store
            .lock()
            .write("disconnect", |rows| disconnect_in(rows, user_id, now))?;
        if let Some(t) = &change {
            self.log_disconnect(t);
        }
        Ok(change)
    }

    /// Record a heartbeat. Returns false when the user is not connected.
    pub fn heartbeat(&self, user_id: i64) -> Result<bool> {
        self.heartbeat_at(user_id, Utc::now())
    }

    pub fn heartbeat_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        self.store.lock().write("heartbeat", |rows| {
            if rows.open_link(user_id)?.is_none() {
                return Ok(false);
            }
            rows.set_last_seen(user_id, now)?;
            Ok(true)
        })
    }

    /// Close whatever an unclean shutdown left open.
    ///
    /// Called once at startup, before any connect is served.
    pub fn recover_on_startup(&self) -> Result<RecoveryReport> {
        self.recover_on_startup_at(Utc::now())
    }

    pub fn recover_on_startup_at(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        let policy = self.policy;
        let report = self
            .store
            .lock()
            .write("recover", |rows| recover_in(rows, policy, now))?;
        if let Some(dangling) = report.dangling_interval_id {
            self.logger.send(ActivityEvent::SessionsRecovered {
                dangling_interval_id: dangling,
                links_closed: report.links_closed as u64,
                policy: policy_label(policy).to_string(),
            });
        }
        Ok(report)
    }

    /// Remove a user, disconnecting them first if needed.
    pub fn remove_user(&self, user_id: i64, mode: RemovalMode) -> Result<RemovalReport> {
        self.remove_user_at(user_id, mode, Utc::now())
    }

    pub fn remove_user_at(
        &self,
        user_id: i64,
        mode: RemovalMode,
        now: DateTime<Utc>,
    ) -> Result<RemovalReport> {
        let (report, disconnect) = self.store.lock().write("remove_user", |rows| {
            if rows.user(user_id)?.is_none() {
                return Err(WsError::UserNotFound { user_id });
            }
            let disconnect = disconnect_in(rows, user_id, now)?;
            let links_affected = match mode {
                RemovalMode::Delete => {
                    let n = rows.delete_links(user_id)?;
                    rows.delete_user(user_id)?;
                    n
                }
                RemovalMode::Forget => {
                    let n = rows.forget_links(user_id)?;
                    rows.delete_user(user_id)?;
                    n
                }
                RemovalMode::Dissociate => rows.dissociate_links(user_id)?,
            };
            let report = RemovalReport {
                user_id,
                mode,
                was_connected: disconnect.is_some(),
                links_affected,
            };
            Ok((report, disconnect))
        })?;

        if let Some(t) = &disconnect {
            self.log_disconnect(t);
        }
        self.logger.send(ActivityEvent::UserRemoved {
            user_id,
            mode: mode.as_str().to_string(),
            was_connected: report.was_connected,
        });
        Ok(report)
    }

    pub fn delete_user(&self, user_id: i64) -> Result<RemovalReport> {
        self.remove_user(user_id, RemovalMode::Delete)
    }

    pub fn forget_user(&self, user_id: i64) -> Result<RemovalReport> {
        self.remove_user(user_id, RemovalMode::Forget)
    }

    pub fn dissociate_user(&self, user_id: i64) -> Result<RemovalReport> {
        self.remove_user(user_id, RemovalMode::Dissociate)
    }

    // ──────────────────── reads ────────────────────

    /// Every interval any of the user's links covers, in chronological order.
    pub fn intervals_for_user(&self, user_id: i64) -> Result<Vec<Interval>> {
        self.store.lock().read(|rows| {
            require_user(rows, user_id)?;
            let mut by_time = BTreeMap::new();
            for link in rows.links_for_user(user_id)? {
                for interval in link_run(rows, &link)? {
                    by_time.insert(interval.chrono_key(), interval);
                }
            }
            Ok(by_time.into_values().collect())
        })
    }

    /// First interval the user was ever connected for.
    pub fn earliest_interval_for_user(&self, user_id: i64) -> Result<Option<Interval>> {
        self.store.lock().read(|rows| {
            require_user(rows, user_id)?;
            let mut earliest: Option<Interval> = None;
            for link in rows.links_for_user(user_id)? {
                let first = rows
                    .interval(link.start_interval_id)?
                    .ok_or(WsError::IntervalNotFound {
                        interval_id: link.start_interval_id,
                    })?;
                if earliest.is_none_or(|e| first.chrono_key() < e.chrono_key()) {
                    earliest = Some(first);
                }
            }
            Ok(earliest)
        })
    }

    pub fn all_intervals(&self) -> Result<Vec<Interval>> {
        self.store.lock().rows().all_intervals()
    }

    pub fn interval_by_id(&self, interval_id: i64) -> Result<Interval> {
        self.store
            .lock()
            .rows()
            .interval(interval_id)?
            .ok_or(WsError::IntervalNotFound { interval_id })
    }

    pub fn current_interval(&self) -> Result<Option<Interval>> {
        self.store.lock().rows().current_interval()
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        self.store.lock().rows().users()
    }

    pub fn get_user(&self, user_id: i64) -> Result<User> {
        self.store.lock().read(|rows| require_user(rows, user_id))
    }

    pub fn user_links(&self, user_id: i64) -> Result<Vec<Link>> {
        self.store.lock().read(|rows| {
            require_user(rows, user_id)?;
            rows.links_for_user(user_id)
        })
    }

    pub fn user_ids(&self) -> Result<Vec<i64>> {
        self.store.lock().rows().user_ids()
    }

    /// Number of users connected right now.
    pub fn connected_count(&self) -> Result<u32> {
        self.store.lock().rows().count_open_links()
    }

    // ──────────────────── logging ────────────────────

    fn log_connect(&self, t: &Transition) {
        self.logger.send(ActivityEvent::UserConnected {
            user_id: t.user_id,
            interval_id: t.opened.id,
            concurrent_users: t.opened.concurrent_users,
        });
    }

    fn log_disconnect(&self, t: &Transition) {
        self.logger.send(ActivityEvent::UserDisconnected {
            user_id: t.user_id,
            interval_id: t.opened.id,
            concurrent_users: t.opened.concurrent_users,
        });
    }
}

/// Snake-case name used in logs and reports.
#[must_use]
pub const fn policy_label(policy: RecoveryPolicy) -> &'static str {
    match policy {
        RecoveryPolicy::SharedBoundary => "shared_boundary",
        RecoveryPolicy::LastSeen => "last_seen",
    }
}

// ──────────────────── transaction bodies ────────────────────

/// Clamp `now` so the partition never runs backwards.
fn clamp(now: DateTime<Utc>, current: Option<&Interval>) -> DateTime<Utc> {
    current.map_or(now, |c| now.max(c.start))
}

fn connect_in(rows: &Rows<'_>, user_id: i64, now: DateTime<Utc>) -> Result<Option<Transition>> {
    if rows.open_link(user_id)?.is_some() {
        return Ok(None);
    }
    let current = rows.current_interval()?;
    let now = clamp(now, current.as_ref());
    let connected = rows.count_open_links()?;

    if let Some(current) = &current {
        rows.close_interval(current.id, now)?;
    }
    let opened = rows.insert_interval(now, connected + 1)?;
    rows.upsert_connected_user(user_id, now)?;
    let link = rows.insert_link(user_id, opened.id)?;

    Ok(Some(Transition {
        user_id,
        closed_interval_id: current.map(|c| c.id),
        opened,
        link,
    }))
}

fn disconnect_in(rows: &Rows<'_>, user_id: i64, now: DateTime<Utc>) -> Result<Option<Transition>> {
    let Some(link) = rows.open_link(user_id)? else {
        return Ok(None);
    };
    let current = rows
        .current_interval()?
        .ok_or_else(|| WsError::InvariantViolation {
            details: format!("user {user_id} holds an open link but no interval is open"),
        })?;
    let now = clamp(now, Some(&current));
    let remaining = rows
        .count_open_links()?
        .checked_sub(1)
        .ok_or_else(|| WsError::InvariantViolation {
            details: "open link count underflow".to_string(),
        })?;

    rows.close_interval(current.id, now)?;
    let opened = rows.insert_interval(now, remaining)?;
    rows.close_link(link.id, current.id)?;
    rows.set_end_session(user_id, now)?;

    Ok(Some(Transition {
        user_id,
        closed_interval_id: Some(current.id),
        opened,
        link: Link {
            end_interval_id: Some(current.id),
            ..link
        },
    }))
}

fn recover_in(rows: &Rows<'_>, policy: RecoveryPolicy, now: DateTime<Utc>) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        policy,
        dangling_interval_id: None,
        recovered_at: None,
        links_closed: 0,
        closed_at_last_seen: 0,
        fresh_interval_id: None,
    };
    let Some(dangling) = rows.current_interval()? else {
        return Ok(report);
    };
    let now = clamp(now, Some(&dangling));
    rows.close_interval(dangling.id, now)?;

    for link in rows.open_links()? {
        let last_seen = match (policy, link.user_id) {
            (RecoveryPolicy::LastSeen, Some(user_id)) => last_seen_boundary(rows, &link, user_id)?,
            _ => None,
        };
        let (end_interval_id, ended_at) = match last_seen {
            Some((interval_id, seen)) => {
                report.closed_at_last_seen += 1;
                (interval_id, seen.min(now))
            }
            None => (dangling.id, now),
        };
        rows.close_link(link.id, end_interval_id)?;
        if let Some(user_id) = link.user_id {
            rows.set_end_session(user_id, ended_at)?;
        }
        report.links_closed += 1;
    }

    let fresh = rows.insert_interval(now, 0)?;
    report.dangling_interval_id = Some(dangling.id);
    report.recovered_at = Some(now);
    report.fresh_interval_id = Some(fresh.id);
    Ok(report)
}

/// Interval holding the user's last heartbeat, if that heartbeat belongs to
/// this link's run.
fn last_seen_boundary(
    rows: &Rows<'_>,
    link: &Link,
    user_id: i64,
) -> Result<Option<(i64, DateTime<Utc>)>> {
    let Some(seen) = rows.user(user_id)?.and_then(|u| u.last_seen) else {
        return Ok(None);
    };
    let Some(first) = rows.interval(link.start_interval_id)? else {
        return Ok(None);
    };
    if seen < first.start {
        return Ok(None);
    }
    Ok(rows.interval_at(seen)?.map(|containing| (containing.id, seen)))
}

fn require_user(rows: &Rows<'_>, user_id: i64) -> Result<User> {
    rows.user(user_id)?.ok_or(WsError::UserNotFound { user_id })
}

fn link_run(rows: &Rows<'_>, link: &Link) -> Result<Vec<Interval>> {
    let first = rows
        .interval(link.start_interval_id)?
        .ok_or(WsError::IntervalNotFound {
            interval_id: link.start_interval_id,
        })?;
    let last = match link.end_interval_id {
        Some(interval_id) => Some(
            rows.interval(interval_id)?
                .ok_or(WsError::IntervalNotFound { interval_id })?,
        ),
        None => None,
    };
    rows.intervals_in_run(&first, last.as_ref())
}
