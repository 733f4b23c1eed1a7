//! Energy time series: the narrow write/query contract and its backends.

pub mod store;

use crate::core::errors::Result;
use crate::core::types::{Sample, TimeRange};

/// Identifies one series: a measurement and a field within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub measurement: &'static str,
    pub field: &'static str,
}

/// The shared energy-consumption series.
pub const ENERGY: SeriesKey = SeriesKey {
    measurement: "energy",
    field: "energyConsumption",
};

/// Append-only store of timestamped samples.
///
/// Implementations must be safe to share between the ingestion writers and
/// concurrent readers. A second write at an existing timestamp replaces the
/// first. After [`close`](Self::close) every call fails.
pub trait TimeSeriesStore: Send + Sync {
    fn write(&self, key: &SeriesKey, sample: Sample) -> Result<()>;

    /// Write many samples. Returns how many were stored.
    fn write_all(&self, key: &SeriesKey, samples: &[Sample]) -> Result<usize> {
        for sample in samples {
            self.write(key, *sample)?;
        }
        Ok(samples.len())
    }

    /// Samples with `range.start <= ts < range.stop`, in timestamp order.
    fn query(&self, key: &SeriesKey, range: TimeRange) -> Result<Vec<Sample>>;

    fn close(&self) -> Result<()>;
}
