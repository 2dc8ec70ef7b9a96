//! Allocation statistics.

use crate::util::size::format_bytes;

/// Aggregated allocator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Live memory blocks across all memory types.
    pub block_count: usize,

    /// Bytes of device memory held by blocks.
    pub reserved_bytes: u64,

    /// Bytes handed out as regions.
    pub used_bytes: u64,

    /// Peak of `reserved_bytes` (high water mark).
    pub peak_reserved_bytes: u64,

    /// Total number of region allocations performed.
    pub allocation_count: u64,

    /// Total number of region frees performed.
    pub free_count: u64,

    /// Number of blocks created.
    pub blocks_created: u64,

    /// Number of blocks released back to the device.
    pub blocks_released: u64,
}

impl AllocatorStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Regions currently allocated.
    pub fn active_allocations(&self) -> u64 {
        self.allocation_count.saturating_sub(self.free_count)
    }

    /// Share of reserved memory not handed out.
    pub fn unused_ratio(&self) -> f64 {
        if self.reserved_bytes == 0 {
            return 0.0;
        }
        (self.reserved_bytes - self.used_bytes) as f64 / self.reserved_bytes as f64
    }
}

impl std::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Allocator Statistics:")?;
        writeln!(f, "  Blocks:          {}", self.block_count)?;
        writeln!(f, "  Reserved:        {}", format_bytes(self.reserved_bytes))?;
        writeln!(f, "  Used:            {}", format_bytes(self.used_bytes))?;
        writeln!(f, "  Peak reserved:   {}", format_bytes(self.peak_reserved_bytes))?;
        writeln!(f, "  Allocations:     {}", self.allocation_count)?;
        writeln!(f, "  Frees:           {}", self.free_count)?;
        writeln!(f, "  Active:          {}", self.active_allocations())?;
        writeln!(
            f,
            "  Blocks created:  {} (released {})",
            self.blocks_created, self.blocks_released
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_and_ratio() {
        let stats = AllocatorStats {
            reserved_bytes: 1000,
            used_bytes: 250,
            allocation_count: 5,
            free_count: 2,
            ..AllocatorStats::new()
        };
        assert_eq!(stats.active_allocations(), 3);
        assert!((stats.unused_ratio() - 0.75).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("Active:          3"));
    }
}
