//! Static resource sizing keyed by CPU count.
//!
//! Queue capacities and the batch-size triple are picked once at startup from
//! a four-tier table. Runtime backpressure is handled separately by the
//! aggregator's batch sizer.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuTier {
    VeryLow,
    Low,
    Medium,
    High,
}

impl CpuTier {
    pub fn for_cpus(cpus: usize) -> Self {
        match cpus {
            0..=2 => CpuTier::VeryLow,
            3..=4 => CpuTier::Low,
            5..=8 => CpuTier::Medium,
            _ => CpuTier::High,
        }
    }
}

/// Inclusive batch-size bounds plus the size used under medium pressure.
/// Invariant: `1 <= min <= default <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchBounds {
    pub min: usize,
    pub default: usize,
    pub max: usize,
}

impl BatchBounds {
    pub fn new(min: usize, default: usize, max: usize) -> Self {
        let min = min.max(1);
        let max = max.max(min);
        Self {
            min,
            default: default.clamp(min, max),
            max,
        }
    }

    /// Replace the default, widening min/max so it stays inside the bounds.
    pub fn with_default(self, default: usize) -> Self {
        let default = default.max(1);
        Self {
            min: self.min.min(default),
            default,
            max: self.max.max(default),
        }
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }
}

/// Capacities for every bounded buffer in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceProfile {
    pub tier: CpuTier,
    pub cpus: usize,
    pub work_queue: usize,
    pub result_queue: usize,
    pub error_buffer: usize,
    pub batch: BatchBounds,
}

impl ResourceProfile {
    /// Profile for the current machine.
    pub fn detect() -> Self {
        Self::for_cpus(num_cpus::get())
    }

    pub fn for_cpus(cpus: usize) -> Self {
        let tier = CpuTier::for_cpus(cpus);
        let (work_queue, result_queue, error_buffer, batch) = match tier {
            CpuTier::VeryLow => (100, 50, 50, BatchBounds::new(50, 100, 200)),
            CpuTier::Low => (500, 200, 100, BatchBounds::new(100, 300, 500)),
            CpuTier::Medium => (1000, 500, 200, BatchBounds::new(200, 500, 1000)),
            CpuTier::High => (2000, 1000, 500, BatchBounds::new(300, 1000, 2000)),
        };

        Self {
            tier,
            cpus,
            work_queue,
            result_queue,
            error_buffer,
            batch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers() {
        assert_eq!(CpuTier::for_cpus(1), CpuTier::VeryLow);
        assert_eq!(CpuTier::for_cpus(2), CpuTier::VeryLow);
        assert_eq!(CpuTier::for_cpus(4), CpuTier::Low);
        assert_eq!(CpuTier::for_cpus(8), CpuTier::Medium);
        assert_eq!(CpuTier::for_cpus(64), CpuTier::High);
    }

    #[test]
    fn test_profiles_grow_with_tier() {
        let small = ResourceProfile::for_cpus(2);
        let large = ResourceProfile::for_cpus(32);
        assert!(small.work_queue < large.work_queue);
        assert!(small.result_queue < large.result_queue);
        assert!(small.batch.max < large.batch.max);
        assert_eq!(large.batch, BatchBounds::new(300, 1000, 2000));
    }

    #[test]
    fn test_batch_bounds_invariants() {
        let b = BatchBounds::new(0, 500, 10);
        assert_eq!(b, BatchBounds { min: 1, default: 10, max: 10 });

        let widened = BatchBounds::new(50, 100, 200).with_default(300);
        assert_eq!(widened, BatchBounds { min: 50, default: 300, max: 300 });

        let narrowed = BatchBounds::new(50, 100, 200).with_default(10);
        assert_eq!(narrowed, BatchBounds { min: 10, default: 10, max: 200 });
        assert_eq!(narrowed.clamp(0), 10);
        assert_eq!(narrowed.clamp(5000), 200);
    }
}
