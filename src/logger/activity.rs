//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Every other thread sends
//! [`ActivityEvent`]s through a bounded crossbeam channel using `try_send()`,
//! so session mutations and the ingestion relay are never blocked by logging
//! back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, WsError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
        uptime_secs: u64,
    },
    UserConnected {
        user_id: i64,
        interval_id: i64,
        concurrent_users: u32,
    },
    UserDisconnected {
        user_id: i64,
        interval_id: i64,
        concurrent_users: u32,
    },
    SessionsRecovered {
        dangling_interval_id: i64,
        links_closed: u64,
        policy: String,
    },
    UserRemoved {
        user_id: i64,
        mode: String,
        was_connected: bool,
    },
    RelayStopped {
        reason: String,
        relayed: u64,
        written: u64,
        write_failures: u64,
    },
    SampleWriteFailed {
        worker: usize,
        timestamp: String,
        code: String,
        message: String,
    },
    SeriesReadFailed {
        interval_id: i64,
        code: String,
        message: String,
    },
    MalformedRow {
        line: u64,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Flush and stop the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Generic error record built from a [`WsError`].
    #[must_use]
    pub fn from_error(err: &WsError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Cheaply-cloneable handle for sending log events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Handle with no logger thread behind it. Every event is discarded.
    #[must_use]
    pub fn detached() -> Self {
        let (tx, _) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send an event. Non-blocking; a full channel drops the event and bumps
    /// the dropped-events counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        // Disconnected is fine during shutdown.
    }

    /// Events dropped because the channel was full and not yet reported.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks only while the
    /// channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the activity logger.
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    #[must_use]
    pub fn new(jsonl: JsonlConfig) -> Self {
        Self {
            jsonl,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread and return a handle to it.
///
/// The thread runs until [`ActivityLoggerHandle::shutdown`] is called or
/// every handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("ws-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl, &dropped))
        .map_err(|e| WsError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl: JsonlConfig, dropped: &AtomicU64) {
    let mut writer = JsonlWriter::open(jsonl);

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.count = Some(lost);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            writer.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        writer.write_entry(&to_log_entry(event));
    }

    writer.flush();
    writer.fsync();
}

fn to_log_entry(event: ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::ServiceStarted {
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::ServiceStart, Severity::Info);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e
        }
        ActivityEvent::ServiceStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::ServiceStop, Severity::Info);
            e.count = Some(uptime_secs);
            e.details = Some(format!("reason={reason} uptime_secs={uptime_secs}"));
            e
        }
        ActivityEvent::UserConnected {
            user_id,
            interval_id,
            concurrent_users,
        } => session_entry(EventType::UserConnect, user_id, interval_id, concurrent_users),
        ActivityEvent::UserDisconnected {
            user_id,
            interval_id,
            concurrent_users,
        } => session_entry(EventType::UserDisconnect, user_id, interval_id, concurrent_users),
        ActivityEvent::SessionsRecovered {
            dangling_interval_id,
            links_closed,
            policy,
        } => {
            let mut e = LogEntry::new(EventType::SessionRecovery, Severity::Warning);
            e.interval_id = Some(dangling_interval_id);
            e.count = Some(links_closed);
            e.details = Some(format!("policy={policy}"));
            e
        }
        ActivityEvent::UserRemoved {
            user_id,
            mode,
            was_connected,
        } => {
            let mut e = LogEntry::new(EventType::UserRemoval, Severity::Info);
            e.user_id = Some(user_id);
            e.details = Some(format!("mode={mode} was_connected={was_connected}"));
            e
        }
        ActivityEvent::RelayStopped {
            reason,
            relayed,
            written,
            write_failures,
        } => {
            let severity = if write_failures > 0 {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::RelayStop, severity);
            e.count = Some(written);
            e.ok = Some(write_failures == 0);
            e.details = Some(format!(
                "reason={reason} relayed={relayed} written={written} write_failures={write_failures}"
            ));
            e
        }
        ActivityEvent::SampleWriteFailed {
            worker,
            timestamp,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::SampleWriteFailure, Severity::Warning);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e.details = Some(format!("worker={worker} sample_ts={timestamp}"));
            e
        }
        ActivityEvent::SeriesReadFailed {
            interval_id,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::SeriesReadFailure, Severity::Warning);
            e.interval_id = Some(interval_id);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        ActivityEvent::MalformedRow { line, details } => {
            let mut e = LogEntry::new(EventType::MalformedRow, Severity::Warning);
            e.count = Some(line);
            e.details = Some(details);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code);
            e.error_message = Some(message);
            e
        }
        // Filtered out by the thread loop.
        ActivityEvent::Shutdown => LogEntry::new(EventType::ServiceStop, Severity::Info),
    }
}

fn session_entry(
    event: EventType,
    user_id: i64,
    interval_id: i64,
    concurrent_users: u32,
) -> LogEntry {
    let mut e = LogEntry::new(event, Severity::Info);
    e.user_id = Some(user_id);
    e.interval_id = Some(interval_id);
    e.concurrent_users = Some(concurrent_users);
    e
}
