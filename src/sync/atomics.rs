//! Relaxed counters behind the allocator statistics.
//!
//! Statistics are read without the collection lock, so they are only
//! eventually consistent with each other.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic event count, e.g. allocations served.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Counter starting at `initial`.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Record one event.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Events recorded so far.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Byte total that moves both ways, e.g. device memory reserved.
#[derive(Debug, Default)]
pub struct AtomicGauge(AtomicU64);

impl AtomicGauge {
    /// Gauge starting at `initial` bytes.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Grow by `bytes`, returning the new total.
    pub fn add(&self, bytes: u64) -> u64 {
        self.0.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    /// Shrink by `bytes`, returning the new total.
    pub fn sub(&self, bytes: u64) -> u64 {
        self.0.fetch_sub(bytes, Ordering::Relaxed) - bytes
    }

    /// Current total.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Raise to `bytes` if below it. Used for high-water marks.
    pub fn update_max(&self, bytes: u64) {
        self.0.fetch_max(bytes, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_tracks_peak() {
        let current = AtomicGauge::default();
        let peak = AtomicGauge::default();
        peak.update_max(current.add(300));
        current.sub(200);
        peak.update_max(current.add(50));
        assert_eq!(current.get(), 150);
        assert_eq!(peak.get(), 300);
    }

    #[test]
    fn test_counter_counts() {
        let frees = AtomicCounter::new(2);
        frees.increment();
        assert_eq!(frees.get(), 3);
    }
}
