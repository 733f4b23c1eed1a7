//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use wattshare::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, RecoveryPolicy};
pub use crate::core::errors::{Result, WsError};
pub use crate::core::types::{AttributedSample, Sample, TimeRange};

// Sessions
pub use crate::session::store::SessionStore;
pub use crate::session::tracker::{IntervalTracker, RecoveryReport, Transition};
pub use crate::session::{Interval, Link, RemovalMode, User};

// Series
pub use crate::series::store::{MemorySeriesStore, SqliteSeriesStore, open_series_store};
pub use crate::series::{ENERGY, SeriesKey, TimeSeriesStore};

// Ingestion
pub use crate::ingest::relay::{IngestionRelay, RelayReport, RelaySettings};
pub use crate::ingest::{SampleSource, SourcePoll};

// Energy
pub use crate::energy::{
    AggregationEngine, AllMeans, AttributionEngine, DailyMean, Highlights, Ranks, Window,
};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
