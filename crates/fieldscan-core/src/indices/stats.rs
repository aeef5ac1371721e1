//! Mean / standard deviation accumulation over index values.
use serde::{Deserialize, Serialize};

/// Population mean and standard deviation of a set of valid index values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub mean: f32,
    pub std: f32,
}

/// Single-pass Welford accumulator in f64.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    /// Sum of squared deviations from the running mean.
    m2: f64,
}

impl RunningStats {
    #[inline]
    pub fn push(&mut self, v: f32) {
        let v = v as f64;
        self.n += 1;
        let delta = v - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (v - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    /// `None` when no value was pushed.
    pub fn finish(&self) -> Option<IndexStats> {
        let mean = self.mean()?;
        let variance = (self.m2 / self.n as f64).max(0.0);
        Some(IndexStats { mean: mean as f32, std: variance.sqrt() as f32 })
    }
}
