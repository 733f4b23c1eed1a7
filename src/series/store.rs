//! Time-series backends: SQLite (WAL) for the daemon, in-memory for tests.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags, params};

use crate::core::config::{SeriesBackend, SeriesConfig};
use crate::core::errors::{Result, WsError};
use crate::core::types::{Sample, TimeRange};
use crate::series::{SeriesKey, TimeSeriesStore};

/// Open the backend selected by `config`.
pub fn open_series_store(config: &SeriesConfig) -> Result<Arc<dyn TimeSeriesStore>> {
    Ok(match config.backend {
        SeriesBackend::Sqlite => Arc::new(SqliteSeriesStore::open(&config.db_path)?),
        SeriesBackend::Memory => Arc::new(MemorySeriesStore::new()),
    })
}

fn closed(context: &'static str) -> WsError {
    WsError::SeriesStore {
        context,
        details: "store is closed".to_string(),
    }
}

fn series_err(context: &'static str, err: &rusqlite::Error) -> WsError {
    WsError::SeriesStore {
        context,
        details: err.to_string(),
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| WsError::SeriesStore {
        context: "decode",
        details: format!("timestamp {micros}us out of range"),
    })
}

// ──────────────────── sqlite ────────────────────

/// Samples in one SQLite table keyed by `(measurement, field, ts)`.
///
/// Timestamps are integer microseconds since the epoch. One connection
/// behind a mutex serves every thread.
pub struct SqliteSeriesStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteSeriesStore {
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
        .map_err(|e| series_err("open", &e))?;
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| series_err("open", &e))?;
        if !mode.eq_ignore_ascii_case("wal") {
            eprintln!("[WS-SERIES] WARNING: requested WAL mode but got '{mode}'");
        }
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| series_err("open", &e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS samples (
                 measurement TEXT NOT NULL,
                 field TEXT NOT NULL,
                 ts INTEGER NOT NULL,
                 value REAL NOT NULL,
                 PRIMARY KEY (measurement, field, ts)
             ) WITHOUT ROWID;",
        )
        .map_err(|e| series_err("schema", &e))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

fn insert(conn: &Connection, key: &SeriesKey, sample: Sample) -> rusqlite::Result<usize> {
    conn.prepare_cached(
        "INSERT OR REPLACE INTO samples (measurement, field, ts, value) VALUES (?1, ?2, ?3, ?4)",
    )?
    .execute(params![
        key.measurement,
        key.field,
        sample.timestamp.timestamp_micros(),
        sample.value
    ])
}

impl TimeSeriesStore for SqliteSeriesStore {
    fn write(&self, key: &SeriesKey, sample: Sample) -> Result<()> {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| closed("write"))?;
        insert(conn, key, sample).map_err(|e| series_err("write", &e))?;
        Ok(())
    }

    fn write_all(&self, key: &SeriesKey, samples: &[Sample]) -> Result<usize> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or_else(|| closed("write"))?;
        let tx = conn.transaction().map_err(|e| series_err("write", &e))?;
        for sample in samples {
            insert(&tx, key, *sample).map_err(|e| series_err("write", &e))?;
        }
        tx.commit().map_err(|e| series_err("write", &e))?;
        Ok(samples.len())
    }

    fn query(&self, key: &SeriesKey, range: TimeRange) -> Result<Vec<Sample>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or_else(|| closed("query"))?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT ts, value FROM samples
                 WHERE measurement = ?1 AND field = ?2 AND ts >= ?3 AND ts < ?4
                 ORDER BY ts",
            )
            .map_err(|e| series_err("query", &e))?;
        let raw = stmt
            .query_map(
                params![
                    key.measurement,
                    key.field,
                    range.start.timestamp_micros(),
                    range.stop.timestamp_micros()
                ],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)),
            )
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| series_err("query", &e))?;
        raw.into_iter()
            .map(|(micros, value)| Ok(Sample::new(from_micros(micros)?, value)))
            .collect()
    }

    fn close(&self) -> Result<()> {
        if let Some(conn) = self.conn.lock().take() {
            conn.close().map_err(|(_, e)| series_err("close", &e))?;
        }
        Ok(())
    }
}

// ──────────────────── memory ────────────────────

type SeriesMap = BTreeMap<(&'static str, &'static str), BTreeMap<i64, f64>>;

/// Ordered in-memory store. Readers share a read lock.
pub struct MemorySeriesStore {
    series: RwLock<Option<SeriesMap>>,
}

impl MemorySeriesStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            series: RwLock::new(Some(BTreeMap::new())),
        }
    }

    /// Number of samples stored under `key`.
    pub fn sample_count(&self, key: &SeriesKey) -> usize {
        self.series
            .read()
            .as_ref()
            .and_then(|map| map.get(&(key.measurement, key.field)))
            .map_or(0, BTreeMap::len)
    }
}

impl Default for MemorySeriesStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSeriesStore for MemorySeriesStore {
    fn write(&self, key: &SeriesKey, sample: Sample) -> Result<()> {
        let mut guard = self.series.write();
        let map = guard.as_mut().ok_or_else(|| closed("write"))?;
        map.entry((key.measurement, key.field))
            .or_default()
            .insert(sample.timestamp.timestamp_micros(), sample.value);
        Ok(())
    }

    fn query(&self, key: &SeriesKey, range: TimeRange) -> Result<Vec<Sample>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let guard = self.series.read();
        let map = guard.as_ref().ok_or_else(|| closed("query"))?;
        let Some(points) = map.get(&(key.measurement, key.field)) else {
            return Ok(Vec::new());
        };
        points
            .range(range.start.timestamp_micros()..range.stop.timestamp_micros())
            .map(|(&micros, &value)| Ok(Sample::new(from_micros(micros)?, value)))
            .collect()
    }

    fn close(&self) -> Result<()> {
        self.series.write().take();
        Ok(())
    }
}
