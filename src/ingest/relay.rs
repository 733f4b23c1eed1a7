//! Ingestion relay: one thread polls the sample source and fans samples out
//! over a bounded channel to a pool of time-series writers.
//!
//! Shutdown flows downstream by channel closure. When the relay stops it
//! drops its sender; writers drain what is queued and exit; the relay joins
//! them and reports.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use serde::Serialize;

use crate::core::config::IngestConfig;
use crate::core::errors::{Result, WsError};
use crate::core::pool::WorkerPool;
use crate::core::types::{Sample, format_ts};
use crate::ingest::{SampleSource, SourcePoll};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::series::{ENERGY, TimeSeriesStore};

/// Why the relay stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// The source reported it will produce nothing more.
    SourceExhausted,
    /// Too many consecutive polls came back empty.
    EmptyReads,
    /// The source failed with a non-retryable error.
    SourceFailed { code: String, message: String },
    /// Every writer is gone.
    WritersGone,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceExhausted => f.write_str("source_exhausted"),
            Self::EmptyReads => f.write_str("empty_reads"),
            Self::SourceFailed { code, .. } => write!(f, "source_failed({code})"),
            Self::WritersGone => f.write_str("writers_gone"),
        }
    }
}

/// Counters reported when the relay finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayReport {
    pub reason: StopReason,
    pub source: &'static str,
    /// Samples handed to the writers.
    pub relayed: u64,
    pub written: u64,
    pub write_failures: u64,
    /// Empty polls over the whole run, not just the final streak.
    pub empty_reads: u64,
}

/// Relay tuning, usually taken from [`IngestConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub writer_workers: usize,
    pub channel_capacity: usize,
    pub max_empty_reads: u32,
    pub empty_read_backoff: Duration,
}

impl From<&IngestConfig> for RelaySettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            writer_workers: config.writer_workers,
            channel_capacity: config.channel_capacity,
            max_empty_reads: config.max_empty_reads,
            empty_read_backoff: config.empty_read_backoff(),
        }
    }
}

pub struct IngestionRelay;

impl IngestionRelay {
    /// Start the writer pool and the relay thread.
    pub fn spawn(
        source: Box<dyn SampleSource>,
        store: Arc<dyn TimeSeriesStore>,
        settings: RelaySettings,
        logger: ActivityLoggerHandle,
    ) -> Result<RelayHandle> {
        let (tx, rx) = bounded::<Sample>(settings.channel_capacity.max(1));
        let written = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));

        let writer = {
            let written = Arc::clone(&written);
            let failures = Arc::clone(&failures);
            let logger = logger.clone();
            move |worker: usize, sample: Sample| match store.write(&ENERGY, sample) {
                Ok(()) => {
                    written.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    logger.send(ActivityEvent::SampleWriteFailed {
                        worker,
                        timestamp: format_ts(sample.timestamp),
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        };
        let pool = WorkerPool::spawn("ws-writer", settings.writer_workers, &rx, writer)?;
        drop(rx);

        let thread = thread::Builder::new()
            .name("ws-relay".to_string())
            .spawn(move || {
                let name = source.name();
                let mut source = source;
                let (reason, relayed, empty_reads) = relay_loop(&mut *source, &tx, settings, &logger);
                // Closing the channel is the writers' shutdown signal.
                drop(tx);
                pool.join();

                let report = RelayReport {
                    reason,
                    source: name,
                    relayed,
                    written: written.load(Ordering::Relaxed),
                    write_failures: failures.load(Ordering::Relaxed),
                    empty_reads,
                };
                logger.send(ActivityEvent::RelayStopped {
                    reason: report.reason.to_string(),
                    relayed: report.relayed,
                    written: report.written,
                    write_failures: report.write_failures,
                });
                report
            })
            .map_err(|e| WsError::Runtime {
                details: format!("failed to spawn relay thread: {e}"),
            })?;

        Ok(RelayHandle { thread })
    }
}

fn relay_loop(
    source: &mut dyn SampleSource,
    tx: &crossbeam_channel::Sender<Sample>,
    settings: RelaySettings,
    logger: &ActivityLoggerHandle,
) -> (StopReason, u64, u64) {
    let mut relayed = 0_u64;
    let mut empty_reads = 0_u64;
    let mut streak = 0_u32;

    let reason = loop {
        let empty = match source.poll() {
            Ok(SourcePoll::Sample(sample)) => {
                if tx.send(sample).is_err() {
                    break StopReason::WritersGone;
                }
                relayed += 1;
                streak = 0;
                false
            }
            Ok(SourcePoll::Pending) => true,
            Ok(SourcePoll::Exhausted) => break StopReason::SourceExhausted,
            Err(err) if err.is_retryable() => {
                eprintln!("[WS-RELAY] transient {} source error: {err}", source.name());
                true
            }
            Err(err) => {
                logger.send(ActivityEvent::from_error(&err));
                break StopReason::SourceFailed {
                    code: err.code().to_string(),
                    message: err.to_string(),
                };
            }
        };

        if empty {
            streak += 1;
            empty_reads += 1;
            if streak > settings.max_empty_reads {
                break StopReason::EmptyReads;
            }
            thread::sleep(settings.empty_read_backoff);
        }
    };
    (reason, relayed, empty_reads)
}

/// Handle on a running relay.
pub struct RelayHandle {
    thread: thread::JoinHandle<RelayReport>,
}

impl RelayHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the relay and its writers to finish.
    pub fn join(self) -> Result<RelayReport> {
        self.thread.join().map_err(|_| WsError::Runtime {
            details: "relay thread panicked".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TimeRange;
    use crate::ingest::ChannelSampleSource;
    use crate::ingest::synthetic::SyntheticSampleSource;
    use crate::series::SeriesKey;
    use crate::series::store::MemorySeriesStore;
    use chrono::{TimeZone, Utc};

    fn settings() -> RelaySettings {
        RelaySettings {
            writer_workers: 3,
            channel_capacity: 4,
            max_empty_reads: 2,
            empty_read_backoff: Duration::from_millis(1),
        }
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    /// Scripted source: replays fixed poll results, then reports `Pending`.
    struct Scripted(Vec<Result<SourcePoll>>);

    impl SampleSource for Scripted {
        fn poll(&mut self) -> Result<SourcePoll> {
            if self.0.is_empty() {
                Ok(SourcePoll::Pending)
            } else {
                self.0.remove(0)
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[test]
    fn synthetic_source_is_fully_written() {
        let store = Arc::new(MemorySeriesStore::new());
        let source = SyntheticSampleSource::new(start(), 200, 11);
        let handle = IngestionRelay::spawn(
            Box::new(source),
            store.clone(),
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap();
        let report = handle.join().unwrap();

        assert_eq!(report.reason, StopReason::SourceExhausted);
        assert_eq!(report.relayed, 200);
        assert_eq!(report.written, 200);
        assert_eq!(report.write_failures, 0);
        let stored = store
            .query(&ENERGY, TimeRange::new(start(), start() + chrono::Duration::hours(1)))
            .unwrap();
        assert_eq!(stored.len(), 200);
    }

    #[test]
    fn stops_after_too_many_empty_reads() {
        let store = Arc::new(MemorySeriesStore::new());
        let source = Scripted(vec![
            Ok(SourcePoll::Pending),
            Ok(SourcePoll::Sample(Sample::new(start(), 1.0))),
        ]);
        let report = IngestionRelay::spawn(
            Box::new(source),
            store,
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
        .join()
        .unwrap();

        assert_eq!(report.reason, StopReason::EmptyReads);
        assert_eq!(report.written, 1);
        // One before the sample, then max_empty_reads + 1 in the final streak.
        assert_eq!(report.empty_reads, 4);
    }

    #[test]
    fn retryable_errors_count_as_empty_reads() {
        let source = Scripted(vec![
            Err(WsError::ChannelClosed { component: "test" }),
            Ok(SourcePoll::Exhausted),
        ]);
        let report = IngestionRelay::spawn(
            Box::new(source),
            Arc::new(MemorySeriesStore::new()),
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(report.reason, StopReason::SourceExhausted);
        assert_eq!(report.empty_reads, 1);
    }

    #[test]
    fn fatal_source_error_stops_relay() {
        let source = Scripted(vec![Err(WsError::MalformedSample {
            line: 3,
            details: "bad".to_string(),
        })]);
        let report = IngestionRelay::spawn(
            Box::new(source),
            Arc::new(MemorySeriesStore::new()),
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
        .join()
        .unwrap();
        assert!(matches!(report.reason, StopReason::SourceFailed { ref code, .. } if code == "WS-2301"));
    }

    #[test]
    fn write_failures_are_counted_not_fatal() {
        let store = Arc::new(MemorySeriesStore::new());
        store.close().unwrap();
        let (tx, rx) = bounded(8);
        for s in 0..5 {
            tx.send(Sample::new(start() + chrono::Duration::seconds(s), 1.0))
                .unwrap();
        }
        drop(tx);

        let report = IngestionRelay::spawn(
            Box::new(ChannelSampleSource::new(rx)),
            store,
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
        .join()
        .unwrap();
        assert_eq!(report.reason, StopReason::SourceExhausted);
        assert_eq!(report.relayed, 5);
        assert_eq!(report.written, 0);
        assert_eq!(report.write_failures, 5);
    }

    #[test]
    fn writes_land_in_energy_series_only() {
        let store = Arc::new(MemorySeriesStore::new());
        let source = SyntheticSampleSource::new(start(), 3, 1);
        IngestionRelay::spawn(
            Box::new(source),
            store.clone(),
            settings(),
            ActivityLoggerHandle::detached(),
        )
        .unwrap()
        .join()
        .unwrap();
        let other = SeriesKey {
            measurement: "energy",
            field: "power",
        };
        assert_eq!(store.sample_count(&ENERGY), 3);
        assert_eq!(store.sample_count(&other), 0);
    }
}
