//! Device memory allocator: one block collection per memory type.

use std::sync::Arc;

use crate::api::config::AllocatorConfig;
use crate::api::stats::AllocatorStats;
use crate::error::{GraphicsError, Result};
use crate::gpu::traits::NativeDevice;
use crate::gpu::types::{
    BufferDescriptor, BufferKind, CpuAccess, DeviceLimits, MemoryProperties, MemoryRequirements,
    MemoryType, NativeResource, ResourceState, TextureDescriptor, TextureKind,
};
use crate::graphics::device::DeviceId;
use crate::graphics::resource::{GraphicsResource, ResourceKind};
use crate::memory::block::MemoryBlock;
use crate::memory::collection::{AllocatorCounters, MemoryBlockCollection};
use crate::memory::region::MemoryRegion;
use crate::sync::lifecycle::LifecycleState;

/// Routes allocations to the collection of a suitable memory type and
/// creates resources bound to the regions it hands out.
pub struct MemoryAllocator {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    limits: DeviceLimits,
    collections: Vec<MemoryBlockCollection>,
    counters: Arc<AllocatorCounters>,
    config: AllocatorConfig,
    lifecycle: LifecycleState,
}

impl MemoryAllocator {
    /// Create an allocator for the memory types `native` reports.
    pub fn new(device_id: DeviceId, native: Arc<dyn NativeDevice>, config: AllocatorConfig) -> Self {
        let counters = Arc::new(AllocatorCounters::default());
        let collections = native
            .memory_types()
            .into_iter()
            .map(|memory_type| {
                MemoryBlockCollection::new(
                    Arc::clone(&native),
                    memory_type,
                    config.clone(),
                    Arc::clone(&counters),
                )
            })
            .collect();
        Self {
            device_id,
            limits: native.limits(),
            native,
            collections,
            counters,
            config,
            lifecycle: LifecycleState::new(),
        }
    }

    /// Device the allocator belongs to.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Native device.
    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.native
    }

    /// Device limits.
    pub fn limits(&self) -> DeviceLimits {
        self.limits
    }

    /// Configuration.
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Collection serving memory type `index`.
    pub fn collection(&self, index: u32) -> Option<&MemoryBlockCollection> {
        self.collections.get(index as usize)
    }

    /// Best memory type for `cpu_access` among the types allowed by
    /// `type_bits`.
    ///
    /// GPU-exclusive resources prefer device-local memory the CPU cannot see.
    /// Upload resources need host-visible memory and prefer coherent,
    /// uncached types; readback resources prefer cached ones. Ties go to the
    /// lowest index.
    pub fn memory_type_for(&self, cpu_access: CpuAccess, type_bits: u32) -> Option<MemoryType> {
        let mut best: Option<(u32, MemoryType)> = None;
        for collection in &self.collections {
            let memory_type = collection.memory_type();
            if memory_type.index >= 32 || type_bits & (1 << memory_type.index) == 0 {
                continue;
            }
            let Some(score) = score(cpu_access, memory_type.properties) else {
                continue;
            };
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, memory_type));
            }
        }
        best.map(|(_, memory_type)| memory_type)
    }

    /// Allocate a region from memory type `memory_type`.
    pub fn allocate(
        &self,
        memory_type: u32,
        size: u64,
        alignment: u64,
        stride: u64,
    ) -> Result<MemoryRegion<MemoryBlock>> {
        self.lifecycle.ensure_alive("MemoryAllocator")?;
        let collection = self.collection(memory_type).ok_or_else(|| {
            GraphicsError::invalid_argument("memory_type", format!("no memory type {}", memory_type))
        })?;
        collection.allocate(size, alignment, stride)
    }

    /// Allocate a region satisfying `requirements` for `cpu_access`.
    pub fn allocate_for(
        &self,
        cpu_access: CpuAccess,
        requirements: &MemoryRequirements,
    ) -> Result<MemoryRegion<MemoryBlock>> {
        let memory_type = self
            .memory_type_for(cpu_access, requirements.memory_type_bits)
            .ok_or_else(|| {
                GraphicsError::invalid_argument(
                    "cpu_access",
                    format!("no memory type supports {:?}", cpu_access),
                )
            })?;
        self.allocate(
            memory_type.index,
            requirements.size,
            requirements.alignment.max(1),
            0,
        )
    }

    /// Return a region to the collection it came from.
    ///
    /// After [`dispose`](Self::dispose) the block is released as soon as it
    /// is empty.
    pub fn free(&self, region: &MemoryRegion<MemoryBlock>) -> Result<()> {
        let block = region.parent().ok_or_else(|| {
            GraphicsError::invalid_argument("region", "its memory block was already released")
        })?;
        let collection = self.collection(block.memory_type().index).ok_or_else(|| {
            GraphicsError::invalid_argument("region", "belongs to another allocator")
        })?;
        drop(block);
        collection.free_with_policy(region, self.lifecycle.is_disposed_or_disposing())
    }

    /// Create a buffer bound to freshly allocated memory.
    pub fn create_buffer(
        self: &Arc<Self>,
        kind: BufferKind,
        cpu_access: CpuAccess,
        size: u64,
    ) -> Result<Arc<GraphicsResource>> {
        self.lifecycle.ensure_alive("MemoryAllocator")?;
        if size == 0 {
            return Err(GraphicsError::invalid_argument("size", "must be greater than zero"));
        }
        let desc = BufferDescriptor {
            kind,
            cpu_access,
            size,
        };
        let (buffer, mut requirements) = self.native.create_buffer(&desc)?;
        if kind == BufferKind::Constant {
            requirements.alignment = requirements
                .alignment
                .max(self.limits.constant_buffer_alignment);
        }
        let native = NativeResource::Buffer(buffer);
        let region = match self.allocate_for(cpu_access, &requirements) {
            Ok(region) => region,
            Err(error) => {
                self.native.destroy_buffer(buffer);
                return Err(error);
            }
        };
        if let Err(error) = self.bind(native, &region) {
            self.native.destroy_buffer(buffer);
            self.free(&region)?;
            return Err(error);
        }
        log::trace!("created {:?} buffer of {} bytes ({:?})", kind, size, cpu_access);
        Ok(GraphicsResource::new(
            Arc::clone(self),
            ResourceKind::Buffer(kind),
            cpu_access,
            native,
            size,
            region,
            ResourceState::resting_for_buffer(kind, cpu_access),
        ))
    }

    /// Create a texture bound to freshly allocated memory.
    pub fn create_texture(self: &Arc<Self>, desc: TextureDescriptor) -> Result<Arc<GraphicsResource>> {
        self.lifecycle.ensure_alive("MemoryAllocator")?;
        validate_texture(&desc)?;
        let (image, requirements) = self.native.create_image(&desc)?;
        let native = NativeResource::Image(image);
        let region = match self.allocate_for(desc.cpu_access, &requirements) {
            Ok(region) => region,
            Err(error) => {
                self.native.destroy_image(image);
                return Err(error);
            }
        };
        if let Err(error) = self.bind(native, &region) {
            self.native.destroy_image(image);
            self.free(&region)?;
            return Err(error);
        }
        log::trace!(
            "created {:?} texture {}x{}x{} ({:?})",
            desc.format,
            desc.width,
            desc.height,
            desc.depth,
            desc.cpu_access
        );
        Ok(GraphicsResource::new(
            Arc::clone(self),
            ResourceKind::Texture(desc),
            desc.cpu_access,
            native,
            region.size(),
            region,
            ResourceState::resting_for_texture(desc.cpu_access),
        ))
    }

    fn bind(&self, resource: NativeResource, region: &MemoryRegion<MemoryBlock>) -> Result<()> {
        let block = region
            .parent()
            .ok_or_else(|| GraphicsError::invalid_argument("region", "memory block released"))?;
        match resource {
            NativeResource::Buffer(buffer) => {
                self.native
                    .bind_buffer_memory(buffer, block.memory_handle(), region.offset())?
            }
            NativeResource::Image(image) => {
                self.native
                    .bind_image_memory(image, block.memory_handle(), region.offset())?
            }
        }
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            block_count: self.collections.iter().map(|c| c.block_count()).sum(),
            reserved_bytes: self.collections.iter().map(|c| c.reserved_bytes()).sum(),
            used_bytes: self.collections.iter().map(|c| c.used_bytes()).sum(),
            peak_reserved_bytes: self.counters.peak_reserved_bytes.get(),
            allocation_count: self.counters.allocations.get(),
            free_count: self.counters.frees.get(),
            blocks_created: self.counters.blocks_created.get(),
            blocks_released: self.counters.blocks_released.get(),
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed_or_disposing()
    }

    /// Stop serving allocations and release every empty block.
    ///
    /// Blocks that still hold regions are released when those regions are
    /// freed, or when the allocator is dropped. Idempotent.
    pub fn dispose(&self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        let live: usize = self.collections.iter().map(|c| c.release_empty()).sum();
        if live > 0 {
            log::warn!(
                "allocator of device {:?} disposed with {} blocks still in use",
                self.device_id,
                live
            );
        }
        self.lifecycle.end_dispose();
    }
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("device_id", &self.device_id)
            .field("collections", &self.collections)
            .finish_non_exhaustive()
    }
}

fn score(cpu_access: CpuAccess, properties: MemoryProperties) -> Option<u32> {
    let device_local = properties.contains(MemoryProperties::DEVICE_LOCAL);
    let visible = properties.contains(MemoryProperties::HOST_VISIBLE);
    let coherent = properties.contains(MemoryProperties::HOST_COHERENT);
    let cached = properties.contains(MemoryProperties::HOST_CACHED);
    match cpu_access {
        CpuAccess::None | CpuAccess::GpuOnly => {
            Some(u32::from(device_local) * 4 + u32::from(!visible) * 2)
        }
        CpuAccess::CpuToGpu if visible => Some(u32::from(coherent) * 2 + u32::from(!cached)),
        CpuAccess::GpuToCpu if visible => Some(u32::from(cached) * 4 + u32::from(coherent) * 2),
        CpuAccess::CpuToGpu | CpuAccess::GpuToCpu => None,
    }
}

fn validate_texture(desc: &TextureDescriptor) -> Result<()> {
    if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
        return Err(GraphicsError::invalid_argument(
            "desc",
            "texture dimensions must be greater than zero",
        ));
    }
    match desc.kind {
        TextureKind::OneDimensional if desc.height != 1 || desc.depth != 1 => Err(
            GraphicsError::invalid_argument("desc", "1D textures have height and depth 1"),
        ),
        TextureKind::TwoDimensional if desc.depth != 1 => Err(GraphicsError::invalid_argument(
            "desc",
            "2D textures have depth 1",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::gpu::types::TexelFormat;
    use crate::util::size::kb;

    fn allocator(software: SoftwareConfig) -> (Arc<SoftwareDevice>, Arc<MemoryAllocator>) {
        let device = Arc::new(SoftwareDevice::new(software));
        let allocator = MemoryAllocator::new(
            DeviceId::next(),
            device.clone(),
            AllocatorConfig::minimal().with_fixed_block_size(kb(64)),
        );
        (device, Arc::new(allocator))
    }

    #[test]
    fn test_memory_type_selection() {
        let (_device, allocator) = allocator(SoftwareConfig::new());
        assert_eq!(allocator.memory_type_for(CpuAccess::GpuOnly, !0).unwrap().index, 0);
        assert_eq!(allocator.memory_type_for(CpuAccess::None, !0).unwrap().index, 0);
        assert_eq!(allocator.memory_type_for(CpuAccess::CpuToGpu, !0).unwrap().index, 1);
        assert_eq!(allocator.memory_type_for(CpuAccess::GpuToCpu, !0).unwrap().index, 2);
        assert!(allocator.memory_type_for(CpuAccess::CpuToGpu, 0b001).is_none());
    }

    #[test]
    fn test_constant_buffer_alignment() {
        let (_device, allocator) = allocator(SoftwareConfig::new());
        let _first = allocator
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 16)
            .unwrap();
        let constants = allocator
            .create_buffer(BufferKind::Constant, CpuAccess::CpuToGpu, 16)
            .unwrap();
        assert_eq!(constants.block_region().offset() % 256, 0);
    }

    #[test]
    fn test_stats_track_blocks() {
        let (_device, allocator) = allocator(SoftwareConfig::new());
        let buffer = allocator
            .create_buffer(BufferKind::Vertex, CpuAccess::GpuOnly, 1000)
            .unwrap();
        let stats = allocator.stats();
        assert_eq!(stats.block_count, 1);
        assert_eq!(stats.reserved_bytes, kb(64));
        assert_eq!(stats.used_bytes, 1024);
        buffer.dispose();
        let stats = allocator.stats();
        assert_eq!(stats.block_count, 0);
        assert_eq!(stats.free_count, 1);
        assert_eq!(stats.peak_reserved_bytes, kb(64));
    }

    #[test]
    fn test_texture_validation() {
        let (_device, allocator) = allocator(SoftwareConfig::new());
        let mut desc = TextureDescriptor::new_2d(TexelFormat::R8Unorm, 4, 4, CpuAccess::None);
        desc.depth = 2;
        assert!(matches!(
            allocator.create_texture(desc),
            Err(GraphicsError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_dispose_rejects_new_allocations() {
        let (device, allocator) = allocator(SoftwareConfig::new());
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::GpuOnly, 64)
            .unwrap();
        allocator.dispose();
        allocator.dispose();
        assert!(matches!(
            allocator.create_buffer(BufferKind::Default, CpuAccess::GpuOnly, 64),
            Err(GraphicsError::Disposed { .. })
        ));
        assert_eq!(device.live_allocations(), 1);
        buffer.dispose();
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_failed_allocation_destroys_buffer() {
        let (device, allocator) = allocator(SoftwareConfig::new().with_memory_budget(kb(32)));
        let error = allocator
            .create_buffer(BufferKind::Default, CpuAccess::GpuOnly, 64)
            .unwrap_err();
        assert!(matches!(error, GraphicsError::OutOfMemory { .. }));
        assert_eq!(device.live_resources(), 0);
    }
}
