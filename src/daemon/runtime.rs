//! Service lifecycle: logger, session store, startup recovery, series store,
//! ingestion relay, then wait for a signal or the relay to finish.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::{Result, WsError};
use crate::daemon::signals::{ShutdownCoordinator, ShutdownReport, ShutdownStep, SignalHandler};
use crate::ingest::open_source;
use crate::ingest::relay::{IngestionRelay, RelayHandle, RelayReport, RelaySettings};
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::series::TimeSeriesStore;
use crate::series::store::open_series_store;
use crate::session::tracker::{IntervalTracker, RecoveryReport};

/// How often the wait loop checks the signal flag and the relay.
const WAIT_TICK: Duration = Duration::from_millis(200);
/// Longest the shutdown waits for a relay that is still polling its source.
const RELAY_GRACE: Duration = Duration::from_secs(5);
/// Budget for the whole shutdown sequence.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitCause {
    Signal,
    RelayFinished,
}

/// Summary of one daemon run.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonOutcome {
    pub cause: ExitCause,
    pub recovery: RecoveryReport,
    /// `None` when no source was configured or the relay was abandoned.
    pub relay: Option<RelayReport>,
    pub shutdown: ShutdownReport,
    pub uptime_secs: u64,
}

/// Run the service until `signals` requests shutdown or the relay stops.
///
/// A session store that cannot be opened or recovered is fatal; the error is
/// logged and returned before anything else starts.
pub fn run(config: &Config, signals: &SignalHandler) -> Result<DaemonOutcome> {
    let started = Instant::now();
    let (logger, logger_join) = spawn_logger(ActivityLoggerConfig::new(JsonlConfig::at(
        config.paths.jsonl_log.clone(),
    )))?;

    let started_up = start_services(config, &logger);
    let (tracker, recovery, series, relay) = match started_up {
        Ok(parts) => parts,
        Err(err) => {
            eprintln!("[WS-DAEMON] startup failed: {err}");
            logger.send(ActivityEvent::from_error(&err));
            logger.shutdown();
            let _ = logger_join.join();
            return Err(err);
        }
    };

    let cause = loop {
        if signals.should_shutdown() {
            eprintln!("[WS-DAEMON] shutdown requested");
            break ExitCause::Signal;
        }
        if relay.as_ref().is_some_and(RelayHandle::is_finished) {
            eprintln!("[WS-DAEMON] relay finished");
            break ExitCause::RelayFinished;
        }
        thread::sleep(WAIT_TICK);
    };

    let uptime_secs = started.elapsed().as_secs();

    let mut relay_report = None;
    let mut steps: Vec<ShutdownStep<'_>> = Vec::new();
    if let Some(handle) = relay {
        let slot = &mut relay_report;
        steps.push((
            "join relay",
            Box::new(move |remaining: Duration| {
                *slot = Some(join_relay(handle, remaining.min(RELAY_GRACE))?);
                Ok(())
            }),
        ));
    }
    steps.push(("close series store", Box::new(|_: Duration| series.close())));
    steps.push((
        "close session store",
        Box::new(move |_: Duration| {
            drop(tracker);
            Ok(())
        }),
    ));
    steps.push((
        "flush logger",
        Box::new(move |_: Duration| {
            logger.send(ActivityEvent::ServiceStopped {
                reason: match cause {
                    ExitCause::Signal => "signal".to_string(),
                    ExitCause::RelayFinished => "relay finished".to_string(),
                },
                uptime_secs,
            });
            logger.shutdown();
            logger_join.join().map_err(|_| WsError::Runtime {
                details: "logger thread panicked".to_string(),
            })
        }),
    ));
    let shutdown = ShutdownCoordinator::new(SHUTDOWN_TIMEOUT).execute(steps);

    eprintln!("[WS-DAEMON] stopped (uptime={uptime_secs}s)");
    Ok(DaemonOutcome {
        cause,
        recovery,
        relay: relay_report,
        shutdown,
        uptime_secs,
    })
}

type Services = (
    IntervalTracker,
    RecoveryReport,
    Arc<dyn TimeSeriesStore>,
    Option<RelayHandle>,
);

fn start_services(config: &Config, logger: &ActivityLoggerHandle) -> Result<Services> {
    let tracker = IntervalTracker::open(&config.session, logger.clone())?;
    let recovery = tracker.recover_on_startup()?;
    if !recovery.is_noop() {
        eprintln!(
            "[WS-DAEMON] recovered {} open link(s) from interval {:?}",
            recovery.links_closed, recovery.dangling_interval_id
        );
    }

    logger.send(ActivityEvent::ServiceStarted {
        version: env!("CARGO_PKG_VERSION").to_string(),
        config_hash: config.stable_hash().unwrap_or_default(),
    });

    let series = open_series_store(&config.series)?;
    let relay = match open_source(&config.ingest, logger)? {
        Some(source) => Some(IngestionRelay::spawn(
            source,
            Arc::clone(&series),
            RelaySettings::from(&config.ingest),
            logger.clone(),
        )?),
        None => None,
    };
    Ok((tracker, recovery, series, relay))
}

/// Wait up to `grace` for the relay; a relay still blocked on its source is
/// left to die with the process.
fn join_relay(handle: RelayHandle, grace: Duration) -> Result<RelayReport> {
    let deadline = Instant::now() + grace;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(WsError::Runtime {
                details: format!("relay still running after {grace:?}, abandoned"),
            });
        }
        thread::sleep(Duration::from_millis(20));
    }
    handle.join()
}
