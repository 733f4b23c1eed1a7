//! Core types: errors, configuration, shared value types, worker pools.

pub mod config;
pub mod errors;
pub mod pool;
pub mod types;
