//! SQLite session store: users, intervals and links.
//!
//! WAL mode, prepared statements, and `BEGIN IMMEDIATE` for every mutation so
//! that writers from any thread or process are serialized by SQLite itself.
//! Timestamps are fixed-width RFC 3339 text, which keeps `ORDER BY start`
//! chronological.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};

use crate::core::errors::{Result, WsError};
use crate::core::types::{format_ts, parse_ts};
use crate::session::{Interval, Link, User};

/// Owned connection to the session database.
pub struct SessionStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// Open (or create) the database at `path`, apply schema and check that
    /// it answers queries.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WsError::io(parent, source))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| WsError::store_unavailable("open", &e))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| WsError::store_unavailable("open", &e))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        apply_pragmas(&conn, path.is_some())
            .and_then(|()| apply_schema(&conn))
            .map_err(|e| retag("open", e))?;
        let store = Self { conn, path };
        store.probe()?;
        Ok(store)
    }

    /// Liveness check: the schema is readable.
    pub fn probe(&self) -> Result<()> {
        self.conn
            .query_row("SELECT COUNT(*) FROM intervals", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|_| ())
            .map_err(|e| WsError::store_unavailable("probe", &e))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }

    /// Read-only access outside any explicit transaction.
    pub fn rows(&self) -> Rows<'_> {
        Rows { conn: &self.conn }
    }

    /// Replace the default lock wait for this connection.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn
            .busy_timeout(timeout)
            .map_err(|e| WsError::store_unavailable("busy_timeout", &e))
    }

    /// Run several queries against one consistent snapshot.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Rows<'_>) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&Rows { conn: &tx })?;
        // Nothing was written; dropping rolls the deferred transaction back.
        drop(tx);
        Ok(value)
    }

    /// Run `f` inside one `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits only if `f` succeeds; otherwise every change is rolled back.
    /// SQL failures come back as [`WsError::StoreUnavailable`] tagged with
    /// `context`; domain errors from `f` pass through untouched.
    pub fn write<T, F>(&mut self, context: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&Rows<'_>) -> Result<T>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| WsError::store_unavailable(context, &e))?;
        let value = f(&Rows { conn: &tx }).map_err(|e| retag(context, e))?;
        tx.commit()
            .map_err(|e| WsError::store_unavailable(context, &e))?;
        Ok(value)
    }
}

fn retag(context: &'static str, err: WsError) -> WsError {
    match err {
        WsError::Sql { details, .. } => WsError::StoreUnavailable { context, details },
        other => other,
    }
}

/// Typed queries over a connection or an open transaction.
pub struct Rows<'c> {
    conn: &'c Connection,
}

const INTERVAL_COLUMNS: &str = "id, start, stop, concurrent_users";
const LINK_COLUMNS: &str = "id, user_id, start_interval_id, end_interval_id";
const USER_COLUMNS: &str = "id, start_session, end_session, last_seen";

type RawInterval = (i64, String, Option<String>, i64);
type RawUser = (i64, String, Option<String>, Option<String>);

impl Rows<'_> {
    // ──────────────────── intervals ────────────────────

    /// The interval with no stop, if any.
    pub fn current_interval(&self) -> Result<Option<Interval>> {
        let raw = self
            .conn
            .prepare_cached(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals WHERE stop IS NULL"
            ))?
            .query_row([], raw_interval)
            .optional()?;
        raw.map(interval_from_raw).transpose()
    }

    pub fn interval(&self, id: i64) -> Result<Option<Interval>> {
        let raw = self
            .conn
            .prepare_cached(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals WHERE id = ?1"
            ))?
            .query_row(params![id], raw_interval)
            .optional()?;
        raw.map(interval_from_raw).transpose()
    }

    /// Every interval in chronological order.
    pub fn all_intervals(&self) -> Result<Vec<Interval>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {INTERVAL_COLUMNS} FROM intervals ORDER BY start, id"
        ))?;
        let raw = stmt
            .query_map([], raw_interval)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(interval_from_raw).collect()
    }

    /// Intervals from `first` through `last` inclusive, by `(start, id)`.
    /// With no `last`, the run extends through the current interval.
    pub fn intervals_in_run(&self, first: &Interval, last: Option<&Interval>) -> Result<Vec<Interval>> {
        let first_start = format_ts(first.start);
        let raw = match last {
            Some(last) => self
                .conn
                .prepare_cached(&format!(
                    "SELECT {INTERVAL_COLUMNS} FROM intervals
                     WHERE (start, id) >= (?1, ?2) AND (start, id) <= (?3, ?4)
                     ORDER BY start, id"
                ))?
                .query_map(
                    params![first_start, first.id, format_ts(last.start), last.id],
                    raw_interval,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => self
                .conn
                .prepare_cached(&format!(
                    "SELECT {INTERVAL_COLUMNS} FROM intervals
                     WHERE (start, id) >= (?1, ?2)
                     ORDER BY start, id"
                ))?
                .query_map(params![first_start, first.id], raw_interval)?
                .collect::<std::result::Result<Vec<_>, _>>()?,
        };
        raw.into_iter().map(interval_from_raw).collect()
    }

    /// The latest interval starting at or before `ts`.
    pub fn interval_at(&self, ts: DateTime<Utc>) -> Result<Option<Interval>> {
        let raw = self
            .conn
            .prepare_cached(&format!(
                "SELECT {INTERVAL_COLUMNS} FROM intervals
                 WHERE start <= ?1 ORDER BY start DESC, id DESC LIMIT 1"
            ))?
            .query_row(params![format_ts(ts)], raw_interval)
            .optional()?;
        raw.map(interval_from_raw).transpose()
    }

    pub fn insert_interval(&self, start: DateTime<Utc>, concurrent_users: u32) -> Result<Interval> {
        self.conn
            .prepare_cached(
                "INSERT INTO intervals (start, stop, concurrent_users) VALUES (?1, NULL, ?2)",
            )?
            .execute(params![format_ts(start), concurrent_users])?;
        Ok(Interval {
            id: self.conn.last_insert_rowid(),
            start,
            stop: None,
            concurrent_users,
        })
    }

    pub fn close_interval(&self, id: i64, stop: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn
            .prepare_cached("UPDATE intervals SET stop = ?1 WHERE id = ?2 AND stop IS NULL")?
            .execute(params![format_ts(stop), id])?;
        if changed == 0 {
            return Err(WsError::InvariantViolation {
                details: format!("interval {id} is not open"),
            });
        }
        Ok(())
    }

    // ──────────────────── links ────────────────────

    pub fn count_open_links(&self) -> Result<u32> {
        let n: i64 = self
            .conn
            .prepare_cached(
                "SELECT COUNT(*) FROM links WHERE end_interval_id IS NULL AND user_id IS NOT NULL",
            )?
            .query_row([], |row| row.get(0))?;
        u32::try_from(n).map_err(|_| WsError::InvariantViolation {
            details: format!("open link count {n} out of range"),
        })
    }

    pub fn open_link(&self, user_id: i64) -> Result<Option<Link>> {
        Ok(self
            .conn
            .prepare_cached(&format!(
                "SELECT {LINK_COLUMNS} FROM links WHERE user_id = ?1 AND end_interval_id IS NULL"
            ))?
            .query_row(params![user_id], link_from_row)
            .optional()?)
    }

    pub fn open_links(&self) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE end_interval_id IS NULL ORDER BY id"
        ))?;
        let links = stmt
            .query_map([], link_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn links_for_user(&self, user_id: i64) -> Result<Vec<Link>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {LINK_COLUMNS} FROM links WHERE user_id = ?1 AND forgotten = 0 ORDER BY id"
        ))?;
        let links = stmt
            .query_map(params![user_id], link_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn insert_link(&self, user_id: i64, start_interval_id: i64) -> Result<Link> {
        self.conn
            .prepare_cached(
                "INSERT INTO links (user_id, start_interval_id, end_interval_id)
                 VALUES (?1, ?2, NULL)",
            )?
            .execute(params![user_id, start_interval_id])?;
        Ok(Link {
            id: self.conn.last_insert_rowid(),
            user_id: Some(user_id),
            start_interval_id,
            end_interval_id: None,
        })
    }

    pub fn close_link(&self, link_id: i64, end_interval_id: i64) -> Result<()> {
        self.conn
            .prepare_cached("UPDATE links SET end_interval_id = ?1 WHERE id = ?2")?
            .execute(params![end_interval_id, link_id])?;
        Ok(())
    }

    pub fn delete_links(&self, user_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("DELETE FROM links WHERE user_id = ?1 AND forgotten = 0")?
            .execute(params![user_id])?)
    }

    /// Hide the user's links from every per-user read while keeping their
    /// id, so a later user with the same id starts with no history.
    pub fn forget_links(&self, user_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("UPDATE links SET forgotten = 1 WHERE user_id = ?1 AND forgotten = 0")?
            .execute(params![user_id])?)
    }

    pub fn dissociate_links(&self, user_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("UPDATE links SET user_id = NULL WHERE user_id = ?1 AND forgotten = 0")?
            .execute(params![user_id])?)
    }

    // ──────────────────── users ────────────────────

    pub fn user(&self, id: i64) -> Result<Option<User>> {
        let raw = self
            .conn
            .prepare_cached(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?
            .query_row(params![id], raw_user)
            .optional()?;
        raw.map(user_from_raw).transpose()
    }

    pub fn users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let raw = stmt
            .query_map([], raw_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        raw.into_iter().map(user_from_raw).collect()
    }

    pub fn user_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare_cached("SELECT id FROM users ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// One past the highest id ever handed out, including ids that only
    /// survive on links of forgotten users.
    pub fn next_user_id(&self) -> Result<i64> {
        Ok(self.conn.prepare_cached(
            "SELECT MAX(
                 COALESCE((SELECT MAX(id) FROM users), 0),
                 COALESCE((SELECT MAX(user_id) FROM links), 0)
             ) + 1",
        )?
        .query_row([], |row| row.get(0))?)
    }

    /// Create the user on first connect; a returning user has its
    /// `end_session` cleared.
    pub fn upsert_connected_user(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn
            .prepare_cached(
                "INSERT INTO users (id, start_session, end_session, last_seen)
                 VALUES (?1, ?2, NULL, NULL)
                 ON CONFLICT(id) DO UPDATE SET end_session = NULL",
            )?
            .execute(params![id, format_ts(now)])?;
        Ok(())
    }

    pub fn set_end_session(&self, id: i64, ts: DateTime<Utc>) -> Result<()> {
        self.conn
            .prepare_cached("UPDATE users SET end_session = ?1 WHERE id = ?2")?
            .execute(params![format_ts(ts), id])?;
        Ok(())
    }

    pub fn set_last_seen(&self, id: i64, ts: DateTime<Utc>) -> Result<()> {
        self.conn
            .prepare_cached("UPDATE users SET last_seen = ?1 WHERE id = ?2")?
            .execute(params![format_ts(ts), id])?;
        Ok(())
    }

    pub fn delete_user(&self, id: i64) -> Result<usize> {
        Ok(self
            .conn
            .prepare_cached("DELETE FROM users WHERE id = ?1")?
            .execute(params![id])?)
    }
}

// ──────────────────── row mapping ────────────────────

fn raw_interval(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawInterval> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn interval_from_raw((id, start, stop, users): RawInterval) -> Result<Interval> {
    let concurrent_users = u32::try_from(users).map_err(|_| WsError::InvariantViolation {
        details: format!("interval {id} has concurrent_users = {users}"),
    })?;
    Ok(Interval {
        id,
        start: parse_ts(&start)?,
        stop: stop.as_deref().map(parse_ts).transpose()?,
        concurrent_users,
    })
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Link> {
    Ok(Link {
        id: row.get(0)?,
        user_id: row.get(1)?,
        start_interval_id: row.get(2)?,
        end_interval_id: row.get(3)?,
    })
}

fn raw_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn user_from_raw((id, start, end, last_seen): RawUser) -> Result<User> {
    Ok(User {
        id,
        start_session: parse_ts(&start)?,
        end_session: end.as_deref().map(parse_ts).transpose()?,
        last_seen: last_seen.as_deref().map(parse_ts).transpose()?,
    })
}

// ──────────────────── schema & pragmas ────────────────────

/// How long a write waits on another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn apply_pragmas(conn: &Connection, on_disk: bool) -> Result<()> {
    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA temp_store = MEMORY;",
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if on_disk {
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            eprintln!("[WS-SESSION] WARNING: requested WAL mode but got '{mode}'");
        }
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            start_session TEXT NOT NULL,
            end_session TEXT,
            last_seen TEXT
        );

        CREATE TABLE IF NOT EXISTS intervals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start TEXT NOT NULL,
            stop TEXT,
            concurrent_users INTEGER NOT NULL CHECK (concurrent_users >= 0)
        );

        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER,
            start_interval_id INTEGER NOT NULL REFERENCES intervals(id),
            end_interval_id INTEGER REFERENCES intervals(id),
            forgotten INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_intervals_start ON intervals(start, id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_intervals_single_open
            ON intervals((stop IS NULL)) WHERE stop IS NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_links_single_open
            ON links(user_id) WHERE end_interval_id IS NULL AND user_id IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_links_user ON links(user_id);",
    )?;
    if !has_column(conn, "links", "forgotten")? {
        conn.execute_batch("ALTER TABLE links ADD COLUMN forgotten INTEGER NOT NULL DEFAULT 0;")?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, h, m, 0).unwrap()
    }

    #[test]
    fn on_disk_store_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(&dir.path().join("nested").join("s.sqlite3")).unwrap();
        assert!(store.is_wal_mode());
        assert!(store.path().is_some());
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sqlite3");
        drop(SessionStore::open(&path).unwrap());
        let store = SessionStore::open(&path).unwrap();
        assert!(store.rows().all_intervals().unwrap().is_empty());
    }

    #[test]
    fn second_open_interval_is_rejected() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let err = store
            .write("test", |rows| {
                rows.insert_interval(at(8, 0), 0)?;
                rows.insert_interval(at(9, 0), 1)?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err.code(), "WS-2101");
        // Whole transaction rolled back.
        assert!(store.rows().current_interval().unwrap().is_none());
    }

    #[test]
    fn second_open_link_for_user_is_rejected() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let result = store.write("test", |rows| {
            let interval = rows.insert_interval(at(8, 0), 1)?;
            rows.upsert_connected_user(1, at(8, 0))?;
            rows.insert_link(1, interval.id)?;
            rows.insert_link(1, interval.id)?;
            Ok(())
        });
        assert!(result.is_err());
        assert!(store.rows().open_links().unwrap().is_empty());
    }

    #[test]
    fn domain_errors_pass_through_write() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let err = store
            .write("test", |_| -> Result<()> { Err(WsError::UserNotFound { user_id: 4 }) })
            .unwrap_err();
        assert!(matches!(err, WsError::UserNotFound { user_id: 4 }));
    }

    #[test]
    fn run_lookup_orders_by_time_then_id() {
        let mut store = SessionStore::open_in_memory().unwrap();
        let (a, c) = store
            .write("test", |rows| {
                let a = rows.insert_interval(at(8, 0), 1)?;
                rows.close_interval(a.id, at(9, 0))?;
                let b = rows.insert_interval(at(9, 0), 2)?;
                // Zero-length interval sharing its start with the next one.
                rows.close_interval(b.id, at(9, 0))?;
                let c = rows.insert_interval(at(9, 0), 1)?;
                Ok((a, c))
            })
            .unwrap();

        let rows = store.rows();
        let run = rows.intervals_in_run(&a, None).unwrap();
        assert_eq!(run.len(), 3);
        assert!(run.windows(2).all(|w| w[0].chrono_key() < w[1].chrono_key()));

        let closed_run = rows.intervals_in_run(&a, Some(&run[1])).unwrap();
        assert_eq!(closed_run.len(), 2);

        let containing = rows.interval_at(at(9, 30)).unwrap().unwrap();
        assert_eq!(containing.id, c.id);
        assert!(rows.interval_at(at(7, 0)).unwrap().is_none());
    }

    #[test]
    fn next_user_id_skips_ids_left_on_links() {
        let mut store = SessionStore::open_in_memory().unwrap();
        store
            .write("test", |rows| {
                let interval = rows.insert_interval(at(8, 0), 1)?;
                rows.upsert_connected_user(5, at(8, 0))?;
                rows.insert_link(5, interval.id)?;
                rows.delete_user(5)?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.rows().next_user_id().unwrap(), 6);
    }

    #[test]
    fn forgotten_links_are_hidden_but_keep_their_id() {
        let mut store = SessionStore::open_in_memory().unwrap();
        store
            .write("test", |rows| {
                let interval = rows.insert_interval(at(8, 0), 1)?;
                rows.upsert_connected_user(5, at(8, 0))?;
                let link = rows.insert_link(5, interval.id)?;
                rows.close_link(link.id, interval.id)?;
                assert_eq!(rows.forget_links(5)?, 1);
                rows.delete_user(5)?;
                Ok(())
            })
            .unwrap();
        let rows = store.rows();
        assert!(rows.links_for_user(5).unwrap().is_empty());
        assert_eq!(rows.next_user_id().unwrap(), 6);
        assert_eq!(rows.delete_links(5).unwrap(), 0);
        assert_eq!(rows.dissociate_links(5).unwrap(), 0);
    }

    #[test]
    fn links_table_without_forgotten_column_is_upgraded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE links (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER,
                    start_interval_id INTEGER NOT NULL,
                    end_interval_id INTEGER
                );
                INSERT INTO links (user_id, start_interval_id) VALUES (3, 1);",
            )
            .unwrap();
        }
        let store = SessionStore::open(&path).unwrap();
        assert_eq!(store.rows().links_for_user(3).unwrap().len(), 1);
    }

    #[test]
    fn returning_user_keeps_first_start() {
        let mut store = SessionStore::open_in_memory().unwrap();
        store
            .write("test", |rows| {
                rows.upsert_connected_user(2, at(8, 0))?;
                rows.set_end_session(2, at(9, 0))?;
                rows.upsert_connected_user(2, at(10, 0))
            })
            .unwrap();
        let user = store.rows().user(2).unwrap().unwrap();
        assert_eq!(user.start_session, at(8, 0));
        assert!(user.end_session.is_none());
    }
}
