//! Poll a RAPL cumulative energy counter (`energy_uj`) and emit the energy
//! consumed during each sampling period, in joules.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::core::errors::{Result, WsError};
use crate::core::types::Sample;
use crate::ingest::{SampleSource, SourcePoll};

pub struct RaplSampleSource {
    counter_path: PathBuf,
    /// Sibling `max_energy_range_uj`, read once on first use.
    max_range_path: PathBuf,
    max_range_uj: Option<Option<u64>>,
    interval: Duration,
    previous_uj: Option<u64>,
}

impl RaplSampleSource {
    #[must_use]
    pub fn new(counter_path: &Path, interval: Duration) -> Self {
        let max_range_path = counter_path
            .parent()
            .map_or_else(|| PathBuf::from("max_energy_range_uj"), |dir| {
                dir.join("max_energy_range_uj")
            });
        Self {
            counter_path: counter_path.to_path_buf(),
            max_range_path,
            max_range_uj: None,
            interval,
            previous_uj: None,
        }
    }

    fn read_counter(path: &Path) -> Result<u64> {
        let raw = fs::read_to_string(path).map_err(|source| WsError::io(path, source))?;
        raw.trim().parse::<u64>().map_err(|e| WsError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    fn max_range(&mut self) -> Option<u64> {
        *self
            .max_range_uj
            .get_or_insert_with(|| Self::read_counter(&self.max_range_path).ok())
    }
}

/// Microjoules consumed between two counter readings.
///
/// A smaller `current` means the counter wrapped; without the counter range
/// the delta is unknown.
#[must_use]
pub fn counter_delta(previous: u64, current: u64, max_range: Option<u64>) -> Option<u64> {
    if current >= previous {
        return Some(current - previous);
    }
    max_range.map(|range| range.saturating_sub(previous) + current)
}

impl SampleSource for RaplSampleSource {
    fn poll(&mut self) -> Result<SourcePoll> {
        if self.previous_uj.is_none() {
            self.previous_uj = Some(Self::read_counter(&self.counter_path)?);
        }
        thread::sleep(self.interval);

        let current = Self::read_counter(&self.counter_path)?;
        let Some(previous) = self.previous_uj.replace(current) else {
            return Ok(SourcePoll::Pending);
        };
        let max_range = if current < previous {
            self.max_range()
        } else {
            None
        };
        Ok(match counter_delta(previous, current, max_range) {
            #[allow(clippy::cast_precision_loss)]
            Some(delta_uj) => SourcePoll::Sample(Sample::new(Utc::now(), delta_uj as f64 * 1e-6)),
            None => {
                eprintln!(
                    "[WS-RAPL] counter wrapped ({previous} -> {current}) and {} is unreadable, dropping reading",
                    self.max_range_path.display()
                );
                SourcePoll::Pending
            }
        })
    }

    fn name(&self) -> &'static str {
        "rapl"
    }
}
