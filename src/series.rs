use serde::{Deserialize, Serialize};

/// One normalized sampler tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementSample {
    pub timestamp_ms: i64,
    pub magnitude: f64,
}

impl MovementSample {
    pub fn new(timestamp_ms: i64, magnitude: f64) -> Self {
        Self {
            timestamp_ms,
            magnitude,
        }
    }
}

/// Append-only movement time series. Insertion order is chronological
/// order; only the sampler task appends, everyone else gets clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementSeries {
    samples: Vec<MovementSample>,
}

impl MovementSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: MovementSample) {
        self.samples.push(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last(&self) -> Option<&MovementSample> {
        self.samples.last()
    }

    pub fn samples(&self) -> &[MovementSample] {
        &self.samples
    }

    /// Highest magnitude seen so far, 0.0 for an empty series
    pub fn peak_magnitude(&self) -> f64 {
        self.samples
            .iter()
            .map(|s| s.magnitude)
            .fold(0.0, f64::max)
    }
}

impl From<Vec<MovementSample>> for MovementSeries {
    fn from(samples: Vec<MovementSample>) -> Self {
        Self { samples }
    }
}
