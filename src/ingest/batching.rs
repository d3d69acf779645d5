//! Pressure-adaptive batch sizing for the single writer.
//!
//! Sampled after every append: a full result queue means producers are
//! blocked, so flush early with small batches; an empty one means the writer
//! keeps up, so amortize with large transactions. Between the low and medium
//! thresholds the size is left alone to avoid oscillating.

use crate::resource_limits::BatchBounds;

pub const HIGH_PRESSURE: f64 = 0.8;
pub const MEDIUM_PRESSURE: f64 = 0.5;
pub const LOW_PRESSURE: f64 = 0.2;

/// Next target batch size for queue `utilization` (len / capacity).
pub fn next_batch_size(utilization: f64, current: usize, bounds: &BatchBounds) -> usize {
    if utilization >= HIGH_PRESSURE {
        bounds.min
    } else if utilization >= MEDIUM_PRESSURE {
        bounds.default
    } else if utilization <= LOW_PRESSURE {
        bounds.max
    } else {
        bounds.clamp(current)
    }
}

/// Queue fill ratio; an unbounded or zero-capacity queue reads as idle.
pub fn utilization(len: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        return 0.0;
    }
    len as f64 / capacity as f64
}

/// Tracks the current target across samples.
#[derive(Debug, Clone)]
pub struct BatchSizer {
    bounds: BatchBounds,
    current: usize,
}

impl BatchSizer {
    pub fn new(bounds: BatchBounds) -> Self {
        Self {
            current: bounds.default,
            bounds,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Record a utilization sample and return the new target.
    pub fn observe(&mut self, utilization: f64) -> usize {
        self.current = next_batch_size(utilization, self.current, &self.bounds);
        self.current
    }
}
