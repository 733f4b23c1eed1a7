//! Sample sources and the relay that moves their output into the time-series
//! store.

pub mod csv;
pub mod rapl;
pub mod relay;
pub mod synthetic;

use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::core::config::{IngestConfig, SourceKind};
use crate::core::errors::Result;
use crate::core::types::Sample;
use crate::logger::activity::ActivityLoggerHandle;

/// Outcome of one poll of a [`SampleSource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourcePoll {
    Sample(Sample),
    /// Nothing new yet; the caller may poll again later.
    Pending,
    /// The source will never produce another sample.
    Exhausted,
}

/// A producer of timestamped energy samples.
///
/// `poll` may block for a bounded time (a hardware counter waits for its
/// sampling period). Retryable errors are transient; anything else ends the
/// source.
pub trait SampleSource: Send {
    fn poll(&mut self) -> Result<SourcePoll>;

    /// Short label for logs.
    fn name(&self) -> &'static str;
}

/// Adapts a crossbeam receiver into a source. A disconnected channel is
/// exhaustion.
pub struct ChannelSampleSource {
    rx: Receiver<Sample>,
    timeout: Option<Duration>,
}

impl ChannelSampleSource {
    /// Block on the channel until a sample or disconnection.
    #[must_use]
    pub const fn new(rx: Receiver<Sample>) -> Self {
        Self { rx, timeout: None }
    }

    /// Report `Pending` after waiting `timeout` for a sample.
    #[must_use]
    pub const fn with_timeout(rx: Receiver<Sample>, timeout: Duration) -> Self {
        Self {
            rx,
            timeout: Some(timeout),
        }
    }
}

impl SampleSource for ChannelSampleSource {
    fn poll(&mut self) -> Result<SourcePoll> {
        let Some(timeout) = self.timeout else {
            return Ok(self
                .rx
                .recv()
                .map_or(SourcePoll::Exhausted, SourcePoll::Sample));
        };
        Ok(match self.rx.recv_timeout(timeout) {
            Ok(sample) => SourcePoll::Sample(sample),
            Err(RecvTimeoutError::Timeout) => SourcePoll::Pending,
            Err(RecvTimeoutError::Disconnected) => SourcePoll::Exhausted,
        })
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Build the source selected in `config`, or `None` when ingestion is off.
pub fn open_source(
    config: &IngestConfig,
    logger: &ActivityLoggerHandle,
) -> Result<Option<Box<dyn SampleSource>>> {
    Ok(match config.source {
        SourceKind::None => None,
        SourceKind::Csv => Some(Box::new(csv::CsvSampleSource::from_config(
            config,
            logger.clone(),
        )?)),
        SourceKind::Rapl => Some(Box::new(rapl::RaplSampleSource::new(
            &config.rapl_path,
            config.poll_interval(),
        ))),
        SourceKind::Synthetic => Some(Box::new(synthetic::SyntheticSampleSource::new(
            Utc::now(),
            config.synthetic_samples,
            config.synthetic_seed,
        ))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crossbeam_channel::bounded;

    #[test]
    fn channel_source_drains_then_exhausts() {
        let (tx, rx) = bounded(4);
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        tx.send(Sample::new(ts, 1.5)).unwrap();
        drop(tx);

        let mut source = ChannelSampleSource::new(rx);
        assert_eq!(source.poll().unwrap(), SourcePoll::Sample(Sample::new(ts, 1.5)));
        assert_eq!(source.poll().unwrap(), SourcePoll::Exhausted);
    }

    #[test]
    fn channel_source_with_timeout_reports_pending() {
        let (_tx, rx) = bounded::<Sample>(1);
        let mut source = ChannelSampleSource::with_timeout(rx, Duration::from_millis(5));
        assert_eq!(source.poll().unwrap(), SourcePoll::Pending);
    }

    #[test]
    fn source_none_builds_nothing() {
        let config = IngestConfig::default();
        let logger = ActivityLoggerHandle::detached();
        assert!(open_source(&config, &logger).unwrap().is_none());
    }
}
