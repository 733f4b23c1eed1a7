#![forbid(unsafe_code)]

//! wattshare: per-user energy accountability on a shared host.
//!
//! Three layers:
//! 1. **Sessions**: users connect and disconnect; time is partitioned into
//!    intervals with a constant number of connected users.
//! 2. **Ingestion**: a relay moves energy samples from a CSV log, a RAPL
//!    counter or a synthetic generator into a time-series store.
//! 3. **Attribution**: each sample is divided among the users connected
//!    when it was taken, then summarised per day, week, month and year.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use wattshare::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use wattshare::core::config::Config;
//! use wattshare::session::tracker::IntervalTracker;
//! ```

pub mod prelude;

pub mod core;
#[cfg(feature = "daemon")]
pub mod daemon;
pub mod energy;
pub mod ingest;
pub mod logger;
pub mod series;
pub mod session;
