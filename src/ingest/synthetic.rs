//! Seeded random-walk source for demos and seeding an empty store.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::types::Sample;
use crate::core::errors::Result;
use crate::ingest::{SampleSource, SourcePoll};

/// One sample per second starting at `start`, `count` samples in total.
pub struct SyntheticSampleSource {
    rng: StdRng,
    next_ts: DateTime<Utc>,
    remaining: u64,
    value: f64,
}

impl SyntheticSampleSource {
    #[must_use]
    pub fn new(start: DateTime<Utc>, count: u64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let value = rng.random::<f64>();
        Self {
            rng,
            next_ts: start,
            remaining: count,
            value,
        }
    }
}

impl Iterator for SyntheticSampleSource {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.value = self.rng.random::<f64>() * self.value * 2.0 + 0.2;
        let sample = Sample::new(self.next_ts, self.value);
        self.next_ts += Duration::seconds(1);
        Some(sample)
    }
}

impl SampleSource for SyntheticSampleSource {
    fn poll(&mut self) -> Result<SourcePoll> {
        Ok(self.next().map_or(SourcePoll::Exhausted, SourcePoll::Sample))
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
