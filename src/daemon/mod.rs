//! Long-running service: signal handling and the run loop that owns the
//! stores, the ingestion relay and the activity logger.

pub mod runtime;
pub mod signals;
