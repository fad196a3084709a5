//! Resource vectors — the four scalar dimensions Peloton schedules on.
//!
//! Ports are handled separately (they are ranges, not scalars); see the
//! offer and placement crates.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Comparison slack for floating-point resource arithmetic.
pub const EPSILON: f64 = 1e-9;

/// A scalar resource vector: cpu cores, memory, disk (MiB) and gpus.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub mem_mb: f64,
    pub disk_mb: f64,
    pub gpu: f64,
}

impl ResourceVector {
    /// The zero vector.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Convenience constructor for the two dimensions most tests care about.
    pub fn new(cpu: f64, mem_mb: f64) -> Self {
        Self {
            cpu,
            mem_mb,
            ..Self::default()
        }
    }

    pub fn with_disk(mut self, disk_mb: f64) -> Self {
        self.disk_mb = disk_mb;
        self
    }

    pub fn with_gpu(mut self, gpu: f64) -> Self {
        self.gpu = gpu;
        self
    }

    /// True when every dimension is (numerically) zero.
    pub fn is_empty(&self) -> bool {
        self.cpu < EPSILON && self.mem_mb < EPSILON && self.disk_mb < EPSILON && self.gpu < EPSILON
    }

    /// True when `self` fits inside `avail` on every dimension.
    pub fn fits_within(&self, avail: &ResourceVector) -> bool {
        self.cpu <= avail.cpu + EPSILON
            && self.mem_mb <= avail.mem_mb + EPSILON
            && self.disk_mb <= avail.disk_mb + EPSILON
            && self.gpu <= avail.gpu + EPSILON
    }

    /// Per-dimension subtraction, clamped at zero.
    pub fn subtract_clamped(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: (self.cpu - other.cpu).max(0.0),
            mem_mb: (self.mem_mb - other.mem_mb).max(0.0),
            disk_mb: (self.disk_mb - other.disk_mb).max(0.0),
            gpu: (self.gpu - other.gpu).max(0.0),
        }
    }

    /// Per-dimension minimum.
    pub fn min(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu.min(other.cpu),
            mem_mb: self.mem_mb.min(other.mem_mb),
            disk_mb: self.disk_mb.min(other.disk_mb),
            gpu: self.gpu.min(other.gpu),
        }
    }

    /// Per-dimension maximum.
    pub fn max(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu.max(other.cpu),
            mem_mb: self.mem_mb.max(other.mem_mb),
            disk_mb: self.disk_mb.max(other.disk_mb),
            gpu: self.gpu.max(other.gpu),
        }
    }

    pub fn scale(&self, factor: f64) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu * factor,
            mem_mb: self.mem_mb * factor,
            disk_mb: self.disk_mb * factor,
            gpu: self.gpu * factor,
        }
    }

    /// Dominant share of `self` relative to `capacity`: the largest
    /// per-dimension fraction, skipping zero-capacity dimensions.
    pub fn dominant_share(&self, capacity: &ResourceVector) -> f64 {
        let mut share: f64 = 0.0;
        for (used, cap) in [
            (self.cpu, capacity.cpu),
            (self.mem_mb, capacity.mem_mb),
            (self.disk_mb, capacity.disk_mb),
            (self.gpu, capacity.gpu),
        ] {
            if cap > EPSILON {
                share = share.max(used / cap);
            }
        }
        share
    }

    /// Apply `f` pairwise over the dimensions of `self` and `other`.
    pub fn zip_map(&self, other: &ResourceVector, f: impl Fn(f64, f64) -> f64) -> ResourceVector {
        ResourceVector {
            cpu: f(self.cpu, other.cpu),
            mem_mb: f(self.mem_mb, other.mem_mb),
            disk_mb: f(self.disk_mb, other.disk_mb),
            gpu: f(self.gpu, other.gpu),
        }
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;

    fn add(self, rhs: ResourceVector) -> ResourceVector {
        ResourceVector {
            cpu: self.cpu + rhs.cpu,
            mem_mb: self.mem_mb + rhs.mem_mb,
            disk_mb: self.disk_mb + rhs.disk_mb,
            gpu: self.gpu + rhs.gpu,
        }
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        self.cpu += rhs.cpu;
        self.mem_mb += rhs.mem_mb;
        self.disk_mb += rhs.disk_mb;
        self.gpu += rhs.gpu;
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu:{} mem:{} disk:{} gpu:{}",
            self.cpu, self.mem_mb, self.disk_mb, self.gpu
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_within_all_dimensions() {
        let small = ResourceVector::new(2.0, 2048.0);
        let big = ResourceVector::new(4.0, 4096.0);

        assert!(small.fits_within(&big));
        assert!(!big.fits_within(&small));
        assert!(small.fits_within(&small));
    }

    #[test]
    fn fits_within_rejects_single_dimension_overflow() {
        let task = ResourceVector::new(1.0, 8192.0);
        let offer = ResourceVector::new(4.0, 4096.0);
        assert!(!task.fits_within(&offer));
    }

    #[test]
    fn subtract_clamps_at_zero() {
        let a = ResourceVector::new(1.0, 1024.0);
        let b = ResourceVector::new(2.0, 512.0);

        let diff = a.subtract_clamped(&b);
        assert_eq!(diff.cpu, 0.0);
        assert_eq!(diff.mem_mb, 512.0);
    }

    #[test]
    fn add_accumulates() {
        let mut total = ResourceVector::zero();
        total += ResourceVector::new(1.5, 100.0);
        total += ResourceVector::new(0.5, 200.0).with_gpu(1.0);

        assert_eq!(total.cpu, 2.0);
        assert_eq!(total.mem_mb, 300.0);
        assert_eq!(total.gpu, 1.0);
    }

    #[test]
    fn dominant_share_picks_largest_fraction() {
        let capacity = ResourceVector::new(100.0, 1000.0);
        let used = ResourceVector::new(10.0, 500.0);

        // 10% cpu, 50% mem — memory dominates.
        assert!((used.dominant_share(&capacity) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn dominant_share_skips_zero_capacity() {
        let capacity = ResourceVector::new(100.0, 0.0);
        let used = ResourceVector::new(10.0, 500.0);
        assert!((used.dominant_share(&capacity) - 0.1).abs() < EPSILON);
    }

    #[test]
    fn empty_vector() {
        assert!(ResourceVector::zero().is_empty());
        assert!(!ResourceVector::new(0.1, 0.0).is_empty());
    }
}
