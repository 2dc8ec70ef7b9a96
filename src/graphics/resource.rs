//! Buffers and textures bound to allocator regions.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{GraphicsError, Result};
use crate::gpu::types::{
    BufferKind, CpuAccess, NativeResource, ResourceState, TextureDescriptor,
};
use crate::graphics::device::DeviceId;
use crate::graphics::mapping::MappedMemory;
use crate::memory::allocator::MemoryAllocator;
use crate::memory::block::MemoryBlock;
use crate::memory::free_list::FreeList;
use crate::memory::region::{MemoryRegion, RegionCollection};
use crate::sync::lifecycle::{Lifecycle, LifecycleState};
use crate::sync::mutex::Mutex;
use crate::util::layout::is_valid_alignment;

/// Buffer or texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A buffer of the given usage.
    Buffer(BufferKind),
    /// A texture.
    Texture(TextureDescriptor),
}

/// A buffer or texture and the allocator region backing it.
///
/// A resource is itself a [`RegionCollection`]: vertex, index and constant
/// regions are carved out of one buffer with [`allocate`](RegionCollection::allocate).
///
/// Disposal is idempotent and happens at the latest when the last `Arc` is
/// dropped: the native handle is destroyed and the region is returned to the
/// allocator.
pub struct GraphicsResource {
    allocator: Arc<MemoryAllocator>,
    kind: ResourceKind,
    cpu_access: CpuAccess,
    native: NativeResource,
    size: u64,
    block_region: MemoryRegion<MemoryBlock>,
    resting_state: ResourceState,
    sub_allocations: Mutex<FreeList>,
    map_count: AtomicU32,
    lifecycle: LifecycleState,
}

impl GraphicsResource {
    pub(crate) fn new(
        allocator: Arc<MemoryAllocator>,
        kind: ResourceKind,
        cpu_access: CpuAccess,
        native: NativeResource,
        size: u64,
        block_region: MemoryRegion<MemoryBlock>,
        resting_state: ResourceState,
    ) -> Arc<Self> {
        Arc::new(Self {
            allocator,
            kind,
            cpu_access,
            native,
            size,
            block_region,
            resting_state,
            sub_allocations: Mutex::new(FreeList::new(size)),
            map_count: AtomicU32::new(0),
            lifecycle: LifecycleState::new(),
        })
    }

    /// Device the resource was created on.
    pub fn device_id(&self) -> DeviceId {
        self.allocator.device_id()
    }

    /// Buffer or texture.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Usage, if this is a buffer.
    pub fn buffer_kind(&self) -> Option<BufferKind> {
        match self.kind {
            ResourceKind::Buffer(kind) => Some(kind),
            ResourceKind::Texture(_) => None,
        }
    }

    /// Descriptor, if this is a texture.
    pub fn texture_descriptor(&self) -> Option<&TextureDescriptor> {
        match &self.kind {
            ResourceKind::Texture(desc) => Some(desc),
            ResourceKind::Buffer(_) => None,
        }
    }

    /// CPU access kind.
    pub fn cpu_access(&self) -> CpuAccess {
        self.cpu_access
    }

    /// Native handle.
    pub fn native(&self) -> NativeResource {
        self.native
    }

    /// Usable size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Region of the memory block backing the resource.
    pub fn block_region(&self) -> &MemoryRegion<MemoryBlock> {
        &self.block_region
    }

    /// State the resource rests in between uses.
    pub fn resting_state(&self) -> ResourceState {
        self.resting_state
    }

    /// Allocator the resource came from.
    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.allocator
    }

    /// Lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Whether [`dispose`](Self::dispose) has started.
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed_or_disposing()
    }

    pub(crate) fn ensure_alive(&self) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsResource")
    }

    /// Number of live mappings.
    pub fn map_count(&self) -> u32 {
        self.map_count.load(Ordering::Acquire)
    }

    /// Map the whole resource for writing.
    pub fn map(&self) -> Result<MappedMemory<'_>> {
        self.map_internal(0, self.size, false)
    }

    /// Map `[offset, offset + len)` for writing.
    pub fn map_range(&self, offset: u64, len: u64) -> Result<MappedMemory<'_>> {
        self.map_internal(offset, len, false)
    }

    /// Map the bytes `region` describes for writing.
    ///
    /// The region may come from another resource with the same layout, which
    /// lets a staging buffer be filled through the regions of the buffer it
    /// mirrors. Only its bounds are checked against this resource.
    pub fn map_region<C>(&self, region: &MemoryRegion<C>) -> Result<MappedMemory<'_>> {
        self.map_internal(region.offset(), region.size(), false)
    }

    /// Map the whole resource for reading, invalidating it first.
    pub fn map_for_read(&self) -> Result<MappedMemory<'_>> {
        self.map_internal(0, self.size, true)
    }

    /// Map `[offset, offset + len)` for reading, invalidating it first.
    pub fn map_for_read_range(&self, offset: u64, len: u64) -> Result<MappedMemory<'_>> {
        self.map_internal(offset, len, true)
    }

    /// Map the bytes `region` describes for reading, invalidating them first.
    pub fn map_for_read_region<C>(&self, region: &MemoryRegion<C>) -> Result<MappedMemory<'_>> {
        self.map_internal(region.offset(), region.size(), true)
    }

    fn map_internal(&self, offset: u64, len: u64, read: bool) -> Result<MappedMemory<'_>> {
        self.ensure_alive()?;
        if !self.cpu_access.is_cpu_visible() {
            return Err(GraphicsError::invalid_operation(
                "GraphicsResource",
                "map",
                self.cpu_access,
            ));
        }
        let in_bounds = offset.checked_add(len).map_or(false, |end| end <= self.size);
        if !in_bounds {
            return Err(GraphicsError::invalid_argument(
                "range",
                format!(
                    "[{}, {}+{}) exceeds resource size {}",
                    offset, offset, len, self.size
                ),
            ));
        }
        let block = self.block_region.parent().ok_or(GraphicsError::Disposed {
            object: "MemoryBlock",
        })?;

        let base = block.map()?;
        let block_offset = self.block_region.offset() + offset;
        if read {
            if let Err(error) = block.invalidate(block_offset, len) {
                block.unmap();
                return Err(error);
            }
        }
        self.map_count.fetch_add(1, Ordering::AcqRel);
        // SAFETY: the region lies inside the block, which stays mapped until
        // the mapping releases it.
        let ptr = unsafe { base.as_ptr().add(block_offset as usize) };
        Ok(MappedMemory::new(self, block, ptr, block_offset, offset, len))
    }

    pub(crate) fn release_mapping(&self) {
        self.map_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Destroy the native handle and return the memory. Idempotent.
    pub fn dispose(&self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        if self.map_count() > 0 {
            crate::gx_emit!(GX103, "{:?} with {} live mappings", self.native, self.map_count());
        }
        let native = self.allocator.native();
        match self.native {
            NativeResource::Buffer(buffer) => native.destroy_buffer(buffer),
            NativeResource::Image(image) => native.destroy_image(image),
        }
        if let Err(error) = self.allocator.free(&self.block_region) {
            crate::gx_emit!(GX002, "{:?}: {}", self.native, error);
        }
        self.lifecycle.end_dispose();
    }
}

impl RegionCollection for GraphicsResource {
    fn capacity(&self) -> u64 {
        self.size
    }

    fn allocate(
        self: &Arc<Self>,
        size: u64,
        alignment: u64,
        stride: u64,
    ) -> Result<MemoryRegion<Self>> {
        self.ensure_alive()?;
        if size == 0 {
            return Err(GraphicsError::invalid_argument("size", "must be greater than zero"));
        }
        if !is_valid_alignment(alignment) {
            return Err(GraphicsError::invalid_argument(
                "alignment",
                format!("{} is not a power of two", alignment),
            ));
        }
        let offset = self
            .sub_allocations
            .lock()
            .allocate(size, alignment)
            .ok_or_else(|| GraphicsError::OutOfMemory {
                requested: size,
                alignment,
                memory_type: self
                    .block_region
                    .parent()
                    .map_or(u32::MAX, |block| block.memory_type().index),
            })?;
        Ok(MemoryRegion::new(
            Arc::downgrade(self),
            offset,
            size,
            alignment,
            stride,
        ))
    }

    fn free(&self, region: &MemoryRegion<Self>) -> Result<()> {
        if !region.is_owned_by(self) {
            return Err(GraphicsError::invalid_argument(
                "region",
                "belongs to another resource",
            ));
        }
        if self
            .sub_allocations
            .lock()
            .free(region.offset(), region.size())
        {
            Ok(())
        } else {
            Err(GraphicsError::invalid_argument(
                "region",
                format!("[{}, {}) is not allocated", region.offset(), region.end()),
            ))
        }
    }

    fn contains_allocated(&self, region: &MemoryRegion<Self>) -> bool {
        region.is_owned_by(self)
            && self
                .sub_allocations
                .lock()
                .contains_allocated(region.offset(), region.size())
    }
}

impl Drop for GraphicsResource {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GraphicsResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsResource")
            .field("kind", &self.kind)
            .field("cpu_access", &self.cpu_access)
            .field("native", &self.native)
            .field("size", &self.size)
            .field("block_region", &self.block_region)
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::AllocatorConfig;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::util::size::kb;

    fn allocator() -> (Arc<SoftwareDevice>, Arc<MemoryAllocator>) {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let allocator = MemoryAllocator::new(
            DeviceId::next(),
            device.clone(),
            AllocatorConfig::minimal().with_fixed_block_size(kb(64)),
        );
        (device, Arc::new(allocator))
    }

    #[test]
    fn test_gpu_only_cannot_map() {
        let (_device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Vertex, CpuAccess::GpuOnly, 64)
            .unwrap();
        assert!(matches!(
            buffer.map(),
            Err(GraphicsError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_map_out_of_bounds() {
        let (_device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 64)
            .unwrap();
        assert!(matches!(
            buffer.map_range(60, 8),
            Err(GraphicsError::InvalidArgument { .. })
        ));
        assert!(buffer.map_range(u64::MAX, 2).is_err());
    }

    #[test]
    fn test_sub_allocation() {
        let (_device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Vertex, CpuAccess::CpuToGpu, 256)
            .unwrap();
        let vertices = buffer.allocate(96, 16, 12).unwrap();
        let indices = buffer.allocate(12, 4, 2).unwrap();
        assert_eq!(vertices.element_count(), 8);
        assert!(!vertices.overlaps(&indices));
        assert!(buffer.contains_allocated(&indices));
        buffer.free(&indices).unwrap();
        assert!(buffer.free(&indices).is_err());
        assert!(buffer.allocate(512, 1, 0).is_err());
    }

    #[test]
    fn test_sub_allocation_names_bad_argument() {
        let (_device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 256)
            .unwrap();
        assert!(matches!(
            buffer.allocate(0, 4, 0),
            Err(GraphicsError::InvalidArgument { name: "size", .. })
        ));
        assert!(matches!(
            buffer.allocate(16, 24, 0),
            Err(GraphicsError::InvalidArgument { name: "alignment", .. })
        ));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::GpuOnly, 64)
            .unwrap();
        buffer.dispose();
        buffer.dispose();
        assert_eq!(buffer.lifecycle(), Lifecycle::Disposed);
        assert_eq!(device.call_count("destroy_buffer"), 1);
        assert_eq!(allocator.stats().free_count, 1);
        drop(buffer);
        assert_eq!(device.call_count("destroy_buffer"), 1);
    }

    #[test]
    fn test_disposed_resource_rejects_map() {
        let (_device, allocator) = allocator();
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 64)
            .unwrap();
        buffer.dispose();
        assert!(matches!(buffer.map(), Err(GraphicsError::Disposed { .. })));
        assert!(matches!(
            buffer.allocate(8, 1, 0),
            Err(GraphicsError::Disposed { .. })
        ));
    }
}
