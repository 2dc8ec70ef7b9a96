//! Offset-ordered free list with best-fit placement and coalescing.
//!
//! Free ranges are indexed twice: by offset (for neighbour merging) and by
//! `(size, offset)` (for best-fit search). Allocated ranges are tracked so a
//! free can be checked against what was actually handed out.

use std::collections::{BTreeMap, BTreeSet};

use crate::util::layout::align_up;

/// Free-list bookkeeping for one contiguous address range `[0, capacity)`.
#[derive(Debug, Clone)]
pub struct FreeList {
    capacity: u64,
    free_by_offset: BTreeMap<u64, u64>,
    free_by_size: BTreeSet<(u64, u64)>,
    allocated: BTreeMap<u64, u64>,
    allocated_bytes: u64,
}

impl FreeList {
    /// A list with the whole range free.
    pub fn new(capacity: u64) -> Self {
        let mut list = Self {
            capacity,
            free_by_offset: BTreeMap::new(),
            free_by_size: BTreeSet::new(),
            allocated: BTreeMap::new(),
            allocated_bytes: 0,
        };
        if capacity > 0 {
            list.insert_free(0, capacity);
        }
        list
    }

    /// Size of the managed range.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes handed out.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Sum of all free ranges.
    pub fn free_bytes(&self) -> u64 {
        self.free_by_offset.values().sum()
    }

    /// Number of live allocations.
    pub fn allocation_count(&self) -> usize {
        self.allocated.len()
    }

    /// Number of disjoint free ranges.
    pub fn free_region_count(&self) -> usize {
        self.free_by_offset.len()
    }

    /// Size of the largest free range.
    pub fn largest_free_region(&self) -> u64 {
        self.free_by_size.iter().next_back().map_or(0, |&(size, _)| size)
    }

    /// Whether nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.allocated.is_empty()
    }

    /// Free ranges as `(offset, size)`, ordered by offset.
    pub fn free_regions(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.free_by_offset.iter().map(|(&offset, &size)| (offset, size))
    }

    /// Whether exactly `[offset, offset + size)` is allocated.
    pub fn contains_allocated(&self, offset: u64, size: u64) -> bool {
        self.allocated.get(&offset) == Some(&size)
    }

    /// Reserve `size` bytes at a multiple of `alignment`, returning the offset.
    ///
    /// Picks the smallest free range the aligned request fits in; ties go to
    /// the lowest offset. The chosen range is split into leading padding,
    /// the allocation and the leftover tail.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<u64> {
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }

        let (start, len, aligned) = self
            .free_by_size
            .range((size, 0)..)
            .find_map(|&(len, start)| {
                let aligned = align_up(start, alignment);
                let fits = aligned
                    .checked_add(size)
                    .map_or(false, |end| end <= start + len);
                fits.then_some((start, len, aligned))
            })?;

        self.remove_free(start, len);
        if aligned > start {
            self.insert_free(start, aligned - start);
        }
        let end = aligned + size;
        if end < start + len {
            self.insert_free(end, start + len - end);
        }

        self.allocated.insert(aligned, size);
        self.allocated_bytes += size;
        Some(aligned)
    }

    /// Return `[offset, offset + size)` and merge it with free neighbours.
    ///
    /// Returns `false` if that exact range is not allocated.
    pub fn free(&mut self, offset: u64, size: u64) -> bool {
        if !self.contains_allocated(offset, size) {
            return false;
        }
        self.allocated.remove(&offset);
        self.allocated_bytes -= size;

        let mut start = offset;
        let mut len = size;

        let previous = self
            .free_by_offset
            .range(..offset)
            .next_back()
            .map(|(&o, &s)| (o, s));
        if let Some((prev_offset, prev_size)) = previous {
            if prev_offset + prev_size == offset {
                self.remove_free(prev_offset, prev_size);
                start = prev_offset;
                len += prev_size;
            }
        }

        if let Some(&next_size) = self.free_by_offset.get(&(offset + size)) {
            self.remove_free(offset + size, next_size);
            len += next_size;
        }

        self.insert_free(start, len);
        true
    }

    fn insert_free(&mut self, offset: u64, size: u64) {
        self.free_by_offset.insert(offset, size);
        self.free_by_size.insert((size, offset));
    }

    fn remove_free(&mut self, offset: u64, size: u64) {
        self.free_by_offset.remove(&offset);
        self.free_by_size.remove(&(size, offset));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_accounting(list: &FreeList) {
        assert_eq!(list.free_bytes() + list.allocated_bytes(), list.capacity());
    }

    #[test]
    fn test_allocate_splits_padding_and_tail() {
        let mut list = FreeList::new(1024);
        assert_eq!(list.allocate(10, 1), Some(0));
        assert_eq!(list.allocate(16, 64), Some(64));
        // [10, 64) padding stays free.
        assert_eq!(list.free_regions().next(), Some((10, 54)));
        assert_accounting(&list);
    }

    #[test]
    fn test_best_fit_prefers_smallest_range() {
        let mut list = FreeList::new(1000);
        let a = list.allocate(100, 1).unwrap();
        let _b = list.allocate(10, 1).unwrap();
        let c = list.allocate(40, 1).unwrap();
        let _d = list.allocate(10, 1).unwrap();
        list.free(a, 100);
        list.free(c, 40);

        // Free ranges: [0,100), [110,150), [160,1000). A 30 byte request
        // lands in the 40 byte hole.
        assert_eq!(list.allocate(30, 1), Some(110));
        assert_accounting(&list);
    }

    #[test]
    fn test_free_coalesces_both_neighbours() {
        let mut list = FreeList::new(300);
        let a = list.allocate(100, 1).unwrap();
        let b = list.allocate(100, 1).unwrap();
        let c = list.allocate(100, 1).unwrap();
        assert_eq!(list.free_region_count(), 0);

        assert!(list.free(a, 100));
        assert!(list.free(c, 100));
        assert_eq!(list.free_region_count(), 2);
        assert!(list.free(b, 100));
        assert_eq!(list.free_region_count(), 1);
        assert_eq!(list.largest_free_region(), 300);
        assert!(list.is_empty());
    }

    #[test]
    fn test_double_free_rejected() {
        let mut list = FreeList::new(64);
        let a = list.allocate(8, 8).unwrap();
        assert!(list.free(a, 8));
        assert!(!list.free(a, 8));
        assert!(!list.free(0, 4));
        assert_accounting(&list);
    }

    #[test]
    fn test_alignment_respected() {
        let mut list = FreeList::new(4096);
        list.allocate(3, 1).unwrap();
        for alignment in [4, 16, 256] {
            let offset = list.allocate(5, alignment).unwrap();
            assert_eq!(offset % alignment, 0);
        }
        assert_accounting(&list);
    }

    #[test]
    fn test_exhaustion() {
        let mut list = FreeList::new(128);
        assert_eq!(list.allocate(128, 1), Some(0));
        assert_eq!(list.allocate(1, 1), None);
        assert_eq!(list.allocate(0, 1), None);
        assert_eq!(list.allocate(1, 3), None);
    }
}
