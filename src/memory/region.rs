//! Byte ranges inside a parent allocation.

use std::fmt;
use std::ptr;
use std::sync::{Arc, Weak};

use crate::error::Result;

/// A byte range `[offset, offset + size)` inside a parent collection `C`.
///
/// Regions are plain values: they do not free themselves. The collection
/// that handed a region out takes it back through [`RegionCollection::free`].
/// The parent is held weakly so a region never keeps device memory alive.
pub struct MemoryRegion<C> {
    parent: Weak<C>,
    offset: u64,
    size: u64,
    alignment: u64,
    stride: u64,
}

impl<C> MemoryRegion<C> {
    pub(crate) fn new(parent: Weak<C>, offset: u64, size: u64, alignment: u64, stride: u64) -> Self {
        Self {
            parent,
            offset,
            size,
            alignment,
            stride,
        }
    }

    /// Parent collection, if it is still alive.
    pub fn parent(&self) -> Option<Arc<C>> {
        self.parent.upgrade()
    }

    /// Offset from the start of the parent.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Size in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Alignment the offset satisfies.
    #[inline]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Size of one element, or 0 when the region is untyped.
    #[inline]
    pub fn stride(&self) -> u64 {
        self.stride
    }

    /// One past the last byte.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Number of whole elements, or 0 when untyped.
    pub fn element_count(&self) -> u64 {
        if self.stride == 0 {
            0
        } else {
            self.size / self.stride
        }
    }

    /// Whether `[offset, offset + len)` relative to the region lies inside it.
    pub fn contains_range(&self, offset: u64, len: u64) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.size)
    }

    /// Whether `other` lies entirely inside this region (same parent).
    pub fn contains(&self, other: &MemoryRegion<C>) -> bool {
        self.same_parent(other) && other.offset >= self.offset && other.end() <= self.end()
    }

    /// Whether the two regions share bytes (same parent).
    pub fn overlaps(&self, other: &MemoryRegion<C>) -> bool {
        self.same_parent(other) && self.offset < other.end() && other.offset < self.end()
    }

    /// Whether `parent` is this region's parent.
    pub fn is_owned_by(&self, parent: &C) -> bool {
        ptr::eq(self.parent.as_ptr(), parent)
    }

    /// Whether both regions come from the same parent.
    pub fn same_parent(&self, other: &MemoryRegion<C>) -> bool {
        Weak::ptr_eq(&self.parent, &other.parent)
    }
}

impl<C> Clone for MemoryRegion<C> {
    fn clone(&self) -> Self {
        Self {
            parent: Weak::clone(&self.parent),
            offset: self.offset,
            size: self.size,
            alignment: self.alignment,
            stride: self.stride,
        }
    }
}

impl<C> PartialEq for MemoryRegion<C> {
    fn eq(&self, other: &Self) -> bool {
        self.same_parent(other)
            && self.offset == other.offset
            && self.size == other.size
            && self.alignment == other.alignment
            && self.stride == other.stride
    }
}

impl<C> Eq for MemoryRegion<C> {}

impl<C> fmt::Debug for MemoryRegion<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("parent", &self.parent.as_ptr())
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("stride", &self.stride)
            .finish()
    }
}

/// Something regions can be carved out of.
pub trait RegionCollection: Sized {
    /// Total bytes managed.
    fn capacity(&self) -> u64;

    /// Allocate `size` bytes at an offset that is a multiple of `alignment`.
    /// `stride` is recorded on the region for typed access.
    fn allocate(self: &Arc<Self>, size: u64, alignment: u64, stride: u64)
        -> Result<MemoryRegion<Self>>;

    /// Return a region. Fails if it was not allocated from this collection.
    fn free(&self, region: &MemoryRegion<Self>) -> Result<()>;

    /// Whether `region` is currently allocated from this collection.
    fn contains_allocated(&self, region: &MemoryRegion<Self>) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Parent;

    #[test]
    fn test_region_arithmetic() {
        let parent = Arc::new(Parent);
        let region = MemoryRegion::new(Arc::downgrade(&parent), 64, 48, 16, 12);
        assert_eq!(region.end(), 112);
        assert_eq!(region.element_count(), 4);
        assert!(region.contains_range(0, 48));
        assert!(!region.contains_range(1, 48));
        assert!(!region.contains_range(u64::MAX, 2));
        assert!(region.is_owned_by(&parent));
    }

    #[test]
    fn test_overlap_requires_same_parent() {
        let a = Arc::new(Parent);
        let b = Arc::new(Parent);
        let first = MemoryRegion::new(Arc::downgrade(&a), 0, 32, 1, 0);
        let second = MemoryRegion::new(Arc::downgrade(&a), 16, 32, 1, 0);
        let elsewhere = MemoryRegion::new(Arc::downgrade(&b), 16, 32, 1, 0);
        assert!(first.overlaps(&second));
        assert!(!first.overlaps(&elsewhere));
        assert!(!first.contains(&second));
        assert!(MemoryRegion::new(Arc::downgrade(&a), 0, 64, 1, 0).contains(&second));
    }

    #[test]
    fn test_parent_is_weak() {
        let parent = Arc::new(Parent);
        let region = MemoryRegion::new(Arc::downgrade(&parent), 0, 1, 1, 0);
        assert!(region.parent().is_some());
        drop(parent);
        assert!(region.parent().is_none());
    }
}
