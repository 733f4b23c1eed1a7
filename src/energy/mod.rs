//! Energy accounting on the read path: fair-share attribution of raw samples
//! and the per-user statistics built on top of it.

pub mod aggregation;
pub mod attribution;
pub mod calendar;

pub use aggregation::{AggregationEngine, AllMeans, DailyMean, Highlights, Ranks};
pub use attribution::AttributionEngine;
pub use calendar::Window;
