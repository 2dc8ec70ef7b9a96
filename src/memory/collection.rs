//! Ordered blocks of one memory type.

use std::sync::Arc;

use crate::api::config::AllocatorConfig;
use crate::error::{GraphicsError, Result};
use crate::gpu::traits::NativeDevice;
use crate::gpu::types::{DeviceLimits, MemoryType};
use crate::memory::block::MemoryBlock;
use crate::memory::region::{MemoryRegion, RegionCollection};
use crate::sync::atomics::{AtomicCounter, AtomicGauge};
use crate::sync::mutex::Mutex;
use crate::util::layout::{align_up, is_valid_alignment};

/// Counters shared by every collection of one allocator.
#[derive(Debug, Default)]
pub(crate) struct AllocatorCounters {
    pub allocations: AtomicCounter,
    pub frees: AtomicCounter,
    pub blocks_created: AtomicCounter,
    pub blocks_released: AtomicCounter,
    pub reserved_bytes: AtomicGauge,
    pub peak_reserved_bytes: AtomicGauge,
}

/// Blocks of one memory type, scanned in creation order.
///
/// Lock order: the block list, then a block's own state.
pub struct MemoryBlockCollection {
    memory_type: MemoryType,
    native: Arc<dyn NativeDevice>,
    limits: DeviceLimits,
    config: AllocatorConfig,
    blocks: Mutex<Vec<Arc<MemoryBlock>>>,
    counters: Arc<AllocatorCounters>,
}

impl MemoryBlockCollection {
    pub(crate) fn new(
        native: Arc<dyn NativeDevice>,
        memory_type: MemoryType,
        config: AllocatorConfig,
        counters: Arc<AllocatorCounters>,
    ) -> Self {
        let limits = native.limits();
        Self {
            memory_type,
            native,
            limits,
            config,
            blocks: Mutex::new(Vec::new()),
            counters,
        }
    }

    /// Memory type served by this collection.
    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// Live blocks, in creation order.
    pub fn blocks(&self) -> Vec<Arc<MemoryBlock>> {
        self.blocks.lock().clone()
    }

    /// Number of live blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Bytes of device memory held.
    pub fn reserved_bytes(&self) -> u64 {
        self.blocks.lock().iter().map(|block| block.size()).sum()
    }

    /// Bytes handed out as regions.
    pub fn used_bytes(&self) -> u64 {
        self.blocks
            .lock()
            .iter()
            .map(|block| block.allocated_bytes())
            .sum()
    }

    /// Allocate a region, growing the collection if no block has room.
    ///
    /// Existing blocks are tried in creation order; inside a block the
    /// smallest fitting free range wins. A failed native allocation is
    /// reported as-is and never retried with a smaller block.
    pub fn allocate(&self, size: u64, alignment: u64, stride: u64) -> Result<MemoryRegion<MemoryBlock>> {
        if size == 0 {
            return Err(GraphicsError::invalid_argument("size", "must be greater than zero"));
        }
        if !is_valid_alignment(alignment) {
            return Err(GraphicsError::invalid_argument(
                "alignment",
                format!("{} is not a power of two", alignment),
            ));
        }
        let out_of_memory = GraphicsError::OutOfMemory {
            requested: size,
            alignment,
            memory_type: self.memory_type.index,
        };

        let mut blocks = self.blocks.lock();
        for block in blocks.iter() {
            if let Some(region) = block.try_allocate(size, alignment, stride) {
                self.counters.allocations.increment();
                return Ok(region);
            }
        }

        if blocks.len() >= self.config.maximum_blocks_per_collection {
            crate::gx_emit!(
                GX003,
                "memory type {} has {} blocks",
                self.memory_type.index,
                blocks.len()
            );
            return Err(out_of_memory);
        }

        let max_allocation = self.limits.max_memory_allocation_size;
        if size > max_allocation {
            return Err(out_of_memory);
        }
        let preferred = self.config.block_size_policy.block_size(blocks.len());
        let block_size = if size > preferred {
            crate::gx_emit!(
                GX001,
                "request of {} bytes, block size {}",
                size,
                preferred
            );
            align_up(size, alignment).min(max_allocation)
        } else {
            preferred.min(max_allocation)
        };

        let block = match MemoryBlock::new(Arc::clone(&self.native), self.memory_type, block_size) {
            Ok(block) => Arc::new(block),
            Err(error) if error.is_out_of_memory() => {
                log::warn!(
                    "device refused a {} byte block of memory type {}: {}",
                    block_size,
                    self.memory_type.index,
                    error
                );
                return Err(out_of_memory);
            }
            Err(error) => return Err(error.into()),
        };

        self.counters.blocks_created.increment();
        let reserved = self.counters.reserved_bytes.add(block_size);
        self.counters.peak_reserved_bytes.update_max(reserved);
        crate::diagnostics::tracy::plot_reserved_bytes(reserved);

        let region = block.try_allocate(size, alignment, stride);
        blocks.push(block);
        match region {
            Some(region) => {
                self.counters.allocations.increment();
                Ok(region)
            }
            None => {
                crate::gx_emit!(GX901, "fresh block of {} bytes rejected {} bytes", block_size, size);
                Err(out_of_memory)
            }
        }
    }

    /// Return a region to its block.
    ///
    /// With `release_empty_blocks`, a block left empty is released unless
    /// that would drop below `minimum_block_count` or the block is mapped.
    pub fn free(&self, region: &MemoryRegion<MemoryBlock>) -> Result<()> {
        self.free_with_policy(region, false)
    }

    pub(crate) fn free_with_policy(
        &self,
        region: &MemoryRegion<MemoryBlock>,
        force_release: bool,
    ) -> Result<()> {
        let mut blocks = self.blocks.lock();
        let index = blocks
            .iter()
            .position(|block| region.is_owned_by(block))
            .ok_or_else(|| {
                GraphicsError::invalid_argument(
                    "region",
                    format!("not allocated from memory type {}", self.memory_type.index),
                )
            })?;

        blocks[index].free(region)?;
        self.counters.frees.increment();

        let block = &blocks[index];
        let releasable = force_release
            || (self.config.release_empty_blocks
                && blocks.len() > self.config.minimum_block_count);
        if releasable && block.is_empty() && !block.is_mapped() {
            let block = blocks.remove(index);
            self.release_block(&block);
        }
        Ok(())
    }

    /// Release every empty block. Returns how many blocks stay alive.
    pub(crate) fn release_empty(&self) -> usize {
        let mut blocks = self.blocks.lock();
        let (empty, live): (Vec<_>, Vec<_>) = blocks
            .drain(..)
            .partition(|block| block.is_empty() && !block.is_mapped());
        *blocks = live;
        for block in &empty {
            self.release_block(block);
        }
        blocks.len()
    }

    fn release_block(&self, block: &MemoryBlock) {
        self.counters.blocks_released.increment();
        let reserved = self.counters.reserved_bytes.sub(block.size());
        crate::diagnostics::tracy::plot_reserved_bytes(reserved);
        log::debug!(
            "releasing empty memory block {} of memory type {}",
            block.id(),
            self.memory_type.index
        );
    }
}

impl std::fmt::Debug for MemoryBlockCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlockCollection")
            .field("memory_type", &self.memory_type)
            .field("blocks", &self.block_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::util::size::kb;

    fn collection(config: AllocatorConfig) -> (Arc<SoftwareDevice>, MemoryBlockCollection) {
        collection_on(SoftwareConfig::new(), config)
    }

    fn collection_on(
        software: SoftwareConfig,
        config: AllocatorConfig,
    ) -> (Arc<SoftwareDevice>, MemoryBlockCollection) {
        let device = Arc::new(SoftwareDevice::new(software));
        let native: Arc<dyn NativeDevice> = device.clone();
        let memory_type = native.memory_types()[0];
        let collection = MemoryBlockCollection::new(
            native,
            memory_type,
            config,
            Arc::new(AllocatorCounters::default()),
        );
        (device, collection)
    }

    #[test]
    fn test_grows_lazily() {
        let (device, collection) = collection(AllocatorConfig::minimal().with_fixed_block_size(kb(4)));
        assert_eq!(collection.block_count(), 0);
        let a = collection.allocate(kb(3), 256, 0).unwrap();
        let b = collection.allocate(kb(3), 256, 0).unwrap();
        assert_eq!(collection.block_count(), 2);
        assert_eq!(device.live_allocations(), 2);
        assert!(!a.same_parent(&b));
    }

    #[test]
    fn test_first_fit_by_block_order() {
        let (_device, collection) = collection(
            AllocatorConfig::minimal()
                .with_fixed_block_size(kb(4))
                .with_release_empty_blocks(false),
        );
        let a = collection.allocate(kb(4), 1, 0).unwrap();
        let _b = collection.allocate(kb(1), 1, 0).unwrap();
        collection.free(&a).unwrap();
        let c = collection.allocate(kb(1), 1, 0).unwrap();
        assert!(c.same_parent(&a));
    }

    #[test]
    fn test_oversized_request_gets_own_block() {
        let (_device, collection) = collection(AllocatorConfig::minimal().with_fixed_block_size(kb(4)));
        let region = collection.allocate(kb(10), 256, 0).unwrap();
        assert_eq!(region.parent().unwrap().size(), kb(10));
    }

    #[test]
    fn test_max_blocks_reports_out_of_memory() {
        let (_device, collection) = collection(
            AllocatorConfig::minimal()
                .with_fixed_block_size(kb(1))
                .with_maximum_blocks(1),
        );
        collection.allocate(kb(1), 1, 0).unwrap();
        let error = collection.allocate(1, 1, 0).unwrap_err();
        assert!(matches!(error, GraphicsError::OutOfMemory { requested: 1, .. }));
    }

    #[test]
    fn test_device_refusal_is_out_of_memory() {
        let (_device, collection) = collection_on(
            SoftwareConfig::new().with_memory_budget(kb(2)),
            AllocatorConfig::minimal().with_fixed_block_size(kb(4)),
        );
        let error = collection.allocate(16, 1, 0).unwrap_err();
        assert!(matches!(error, GraphicsError::OutOfMemory { .. }));
    }

    #[test]
    fn test_empty_block_released() {
        let (device, collection) = collection(AllocatorConfig::minimal().with_fixed_block_size(kb(4)));
        let region = collection.allocate(64, 1, 0).unwrap();
        collection.free(&region).unwrap();
        assert_eq!(collection.block_count(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_minimum_block_count_kept() {
        let (device, collection) = collection(
            AllocatorConfig::minimal()
                .with_fixed_block_size(kb(4))
                .with_minimum_block_count(1),
        );
        let region = collection.allocate(64, 1, 0).unwrap();
        collection.free(&region).unwrap();
        assert_eq!(collection.block_count(), 1);
        assert_eq!(device.live_allocations(), 1);
    }

    #[test]
    fn test_invalid_arguments() {
        let (_device, collection) = collection(AllocatorConfig::minimal());
        assert!(matches!(
            collection.allocate(0, 1, 0),
            Err(GraphicsError::InvalidArgument { name: "size", .. })
        ));
        assert!(matches!(
            collection.allocate(8, 3, 0),
            Err(GraphicsError::InvalidArgument { name: "alignment", .. })
        ));
    }
}
