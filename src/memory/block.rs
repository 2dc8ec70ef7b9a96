//! One native device-memory allocation and its free list.

use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{GraphicsError, Result};
use crate::gpu::traits::NativeDevice;
use crate::gpu::types::{MappedRange, MemoryHandle, MemoryType};
use crate::memory::free_list::FreeList;
use crate::memory::region::{MemoryRegion, RegionCollection};
use crate::sync::mutex::Mutex;
use crate::util::layout::atom_range;

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy)]
struct MappedPtr(NonNull<u8>);

// The pointer is only dereferenced through `MappedMemory`, which upholds the
// one-writer contract per resource.
unsafe impl Send for MappedPtr {}
unsafe impl Sync for MappedPtr {}

struct BlockState {
    free_list: FreeList,
    map_count: u32,
    mapped: Option<MappedPtr>,
}

/// A native memory allocation carved into regions.
///
/// The block stays mapped while any resource inside it is mapped: the first
/// [`map`](Self::map) maps the native memory, the last [`unmap`](Self::unmap)
/// unmaps it.
pub struct MemoryBlock {
    id: u64,
    memory_type: MemoryType,
    memory: MemoryHandle,
    size: u64,
    atom: u64,
    native: Arc<dyn NativeDevice>,
    state: Mutex<BlockState>,
}

impl MemoryBlock {
    pub(crate) fn new(
        native: Arc<dyn NativeDevice>,
        memory_type: MemoryType,
        size: u64,
    ) -> std::result::Result<Self, crate::error::NativeError> {
        let memory = native.allocate_memory(memory_type.index, size)?;
        let atom = native.limits().non_coherent_atom_size.max(1);
        let id = NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "memory block {} created: {} bytes of memory type {}",
            id,
            size,
            memory_type.index
        );
        Ok(Self {
            id,
            memory_type,
            memory,
            size,
            atom,
            native,
            state: Mutex::new(BlockState {
                free_list: FreeList::new(size),
                map_count: 0,
                mapped: None,
            }),
        })
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Memory type of the allocation.
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Native allocation.
    pub fn memory_handle(&self) -> MemoryHandle {
        self.memory
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes handed out as regions.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().free_list.allocated_bytes()
    }

    /// Bytes still free.
    pub fn free_bytes(&self) -> u64 {
        self.state.lock().free_list.free_bytes()
    }

    /// Largest free range.
    pub fn largest_free_region(&self) -> u64 {
        self.state.lock().free_list.largest_free_region()
    }

    /// Number of disjoint free ranges.
    pub fn free_region_count(&self) -> usize {
        self.state.lock().free_list.free_region_count()
    }

    /// Whether no region is allocated.
    pub fn is_empty(&self) -> bool {
        self.state.lock().free_list.is_empty()
    }

    /// Whether the native memory is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.state.lock().map_count > 0
    }

    pub(crate) fn try_allocate(
        self: &Arc<Self>,
        size: u64,
        alignment: u64,
        stride: u64,
    ) -> Option<MemoryRegion<Self>> {
        let offset = self.state.lock().free_list.allocate(size, alignment)?;
        Some(MemoryRegion::new(
            Arc::downgrade(self),
            offset,
            size,
            alignment,
            stride,
        ))
    }

    /// Map the whole block, returning the base pointer.
    pub fn map(&self) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        if let Some(MappedPtr(ptr)) = state.mapped {
            state.map_count += 1;
            return Ok(ptr);
        }
        let ptr = self.native.map_memory(self.memory)?;
        state.mapped = Some(MappedPtr(ptr));
        state.map_count = 1;
        Ok(ptr)
    }

    /// Release one [`map`](Self::map).
    pub fn unmap(&self) {
        let mut state = self.state.lock();
        match state.map_count {
            0 => log::warn!("memory block {} unmapped more often than mapped", self.id),
            1 => {
                state.map_count = 0;
                state.mapped = None;
                self.native.unmap_memory(self.memory);
            }
            _ => state.map_count -= 1,
        }
    }

    /// Make CPU writes to `[offset, offset + len)` visible to the device.
    ///
    /// The range is widened to whole non-coherent atoms. Coherent memory and
    /// empty ranges need no native call.
    pub fn flush(&self, offset: u64, len: u64) -> Result<()> {
        match self.atom_aligned(offset, len) {
            Some(range) => Ok(self.native.flush_mapped_ranges(&[range])?),
            None => Ok(()),
        }
    }

    /// Make device writes to `[offset, offset + len)` visible to the CPU.
    pub fn invalidate(&self, offset: u64, len: u64) -> Result<()> {
        match self.atom_aligned(offset, len) {
            Some(range) => Ok(self.native.invalidate_mapped_ranges(&[range])?),
            None => Ok(()),
        }
    }

    fn atom_aligned(&self, offset: u64, len: u64) -> Option<MappedRange> {
        if len == 0 || !self.memory_type.is_non_coherent() {
            return None;
        }
        let (offset, size) = atom_range(offset, len, self.atom, self.size);
        Some(MappedRange {
            memory: self.memory,
            offset,
            size,
        })
    }
}

impl RegionCollection for MemoryBlock {
    fn capacity(&self) -> u64 {
        self.size
    }

    fn allocate(
        self: &Arc<Self>,
        size: u64,
        alignment: u64,
        stride: u64,
    ) -> Result<MemoryRegion<Self>> {
        self.try_allocate(size, alignment, stride)
            .ok_or(GraphicsError::OutOfMemory {
                requested: size,
                alignment,
                memory_type: self.memory_type.index,
            })
    }

    fn free(&self, region: &MemoryRegion<Self>) -> Result<()> {
        if !region.is_owned_by(self) {
            return Err(GraphicsError::invalid_argument(
                "region",
                "belongs to another memory block",
            ));
        }
        if self
            .state
            .lock()
            .free_list
            .free(region.offset(), region.size())
        {
            Ok(())
        } else {
            Err(GraphicsError::invalid_argument(
                "region",
                format!(
                    "[{}, {}) is not allocated in block {}",
                    region.offset(),
                    region.end(),
                    self.id
                ),
            ))
        }
    }

    fn contains_allocated(&self, region: &MemoryRegion<Self>) -> bool {
        region.is_owned_by(self)
            && self
                .state
                .lock()
                .free_list
                .contains_allocated(region.offset(), region.size())
    }
}

impl Drop for MemoryBlock {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.map_count > 0 {
            self.native.unmap_memory(self.memory);
        }
        self.native.free_memory(self.memory);
        log::debug!("memory block {} released ({} bytes)", self.id, self.size);
    }
}

impl fmt::Debug for MemoryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlock")
            .field("id", &self.id)
            .field("memory_type", &self.memory_type.index)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};

    fn block(memory_type: u32, size: u64) -> (Arc<SoftwareDevice>, Arc<MemoryBlock>) {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let native: Arc<dyn NativeDevice> = device.clone();
        let memory_type = native.memory_types()[memory_type as usize];
        let block = MemoryBlock::new(native, memory_type, size).unwrap();
        (device, Arc::new(block))
    }

    #[test]
    fn test_allocate_and_free() {
        let (_device, block) = block(0, 1024);
        let region = block.allocate(100, 16, 0).unwrap();
        assert!(block.contains_allocated(&region));
        assert_eq!(block.allocated_bytes() + block.free_bytes(), 1024);
        block.free(&region).unwrap();
        assert!(block.free(&region).is_err());
        assert!(block.is_empty());
    }

    #[test]
    fn test_foreign_region_rejected() {
        let (_d1, first) = block(0, 256);
        let (_d2, second) = block(0, 256);
        let region = first.allocate(16, 1, 0).unwrap();
        assert!(matches!(
            second.free(&region),
            Err(GraphicsError::InvalidArgument { .. })
        ));
        assert!(!second.contains_allocated(&region));
    }

    #[test]
    fn test_map_is_reference_counted() {
        let (device, block) = block(1, 256);
        let a = block.map().unwrap();
        let b = block.map().unwrap();
        assert_eq!(a, b);
        assert_eq!(device.call_count("map_memory"), 1);
        block.unmap();
        assert!(block.is_mapped());
        block.unmap();
        assert!(!block.is_mapped());
        assert_eq!(device.call_count("unmap_memory"), 1);
    }

    #[test]
    fn test_flush_rounds_to_atoms() {
        let (device, block) = block(1, 1000);
        block.map().unwrap();
        block.flush(70, 10).unwrap();
        block.flush(990, 5).unwrap();
        block.flush(10, 0).unwrap();
        let ranges = device.flushed_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].offset, ranges[0].size), (64, 64));
        assert_eq!((ranges[1].offset, ranges[1].size), (960, 40));
        block.unmap();
    }

    #[test]
    fn test_invalidate_rounds_to_atoms() {
        let (device, block) = block(2, 1000);
        block.map().unwrap();
        block.invalidate(130, 3).unwrap();
        block.invalidate(900, 100).unwrap();
        block.invalidate(5, 0).unwrap();
        let ranges = device.invalidated_ranges();
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].offset, ranges[0].size), (128, 64));
        assert_eq!((ranges[1].offset, ranges[1].size), (896, 104));
        block.unmap();
    }

    #[test]
    fn test_coherent_memory_skips_flush() {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::coherent()));
        let native: Arc<dyn NativeDevice> = device.clone();
        let memory_type = native.memory_types()[1];
        let block = MemoryBlock::new(native, memory_type, 256).unwrap();
        block.map().unwrap();
        block.flush(0, 256).unwrap();
        block.invalidate(0, 256).unwrap();
        assert_eq!(device.call_count("flush_mapped_ranges"), 0);
        assert_eq!(device.call_count("invalidate_mapped_ranges"), 0);
        block.unmap();
    }

    #[test]
    fn test_drop_frees_native_memory() {
        let (device, block) = block(0, 512);
        assert_eq!(device.live_allocations(), 1);
        drop(block);
        assert_eq!(device.live_allocations(), 0);
    }
}
