//! CPU mappings of resources.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{GraphicsError, Result};
use crate::graphics::resource::GraphicsResource;
use crate::memory::block::MemoryBlock;
use crate::memory::region::MemoryRegion;

/// A mapped range of a resource.
///
/// Finish a mapping with [`unmap`](Self::unmap) after reading, or with one of
/// the `unmap_and_write*` methods after writing: those flush the written
/// bytes (widened to whole non-coherent atoms) before the native unmap.
/// Dropping a mapping unmaps it without flushing and reports `GX101`.
pub struct MappedMemory<'a> {
    resource: &'a GraphicsResource,
    block: Arc<MemoryBlock>,
    ptr: *mut u8,
    block_offset: u64,
    offset: u64,
    len: u64,
    released: bool,
}

// The mapping is a unique view of its bytes; the pointer targets host-visible
// memory that outlives the mapping.
unsafe impl Send for MappedMemory<'_> {}

impl<'a> MappedMemory<'a> {
    pub(crate) fn new(
        resource: &'a GraphicsResource,
        block: Arc<MemoryBlock>,
        ptr: *mut u8,
        block_offset: u64,
        offset: u64,
        len: u64,
    ) -> Self {
        Self {
            resource,
            block,
            ptr,
            block_offset,
            offset,
            len,
            released: false,
        }
    }

    /// Resource being mapped.
    pub fn resource(&self) -> &'a GraphicsResource {
        self.resource
    }

    /// Offset of the mapping inside the resource.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `ptr` points at `len` mapped bytes that stay mapped while
        // `self` is alive.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len as usize) }
    }

    /// The mapped bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        if self.len == 0 {
            return &mut [];
        }
        // SAFETY: as in `as_slice`; `&mut self` makes the view unique.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len as usize) }
    }

    /// View the bytes as `T`s. Fails if the length or alignment does not fit.
    pub fn typed<T: Pod>(&self) -> Result<&[T]> {
        bytemuck::try_cast_slice(self.as_slice())
            .map_err(|error| GraphicsError::invalid_argument("T", format!("{:?}", error)))
    }

    /// View the bytes as mutable `T`s.
    pub fn typed_mut<T: Pod>(&mut self) -> Result<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.as_mut_slice())
            .map_err(|error| GraphicsError::invalid_argument("T", format!("{:?}", error)))
    }

    /// Copy `data` into the mapping at `offset` (relative to the mapping).
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.checked_range(offset, data.len() as u64)?;
        self.as_mut_slice()[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy plain-old-data values into the mapping at `offset`.
    pub fn write_pod<T: Pod>(&mut self, offset: u64, values: &[T]) -> Result<()> {
        self.write(offset, bytemuck::cast_slice(values))
    }

    /// Unmap without flushing.
    pub fn unmap(mut self) {
        self.release();
    }

    /// Flush the whole mapping, then unmap.
    pub fn unmap_and_write(mut self) -> Result<()> {
        let result = self.block.flush(self.block_offset, self.len);
        self.release();
        result
    }

    /// Flush `[offset, offset + len)` relative to the mapping, then unmap.
    pub fn unmap_and_write_range(mut self, offset: u64, len: u64) -> Result<()> {
        let result = self
            .checked_range(offset, len)
            .and_then(|_| self.block.flush(self.block_offset + offset, len));
        self.release();
        result
    }

    /// Flush the bytes `region` describes, then unmap. The region is
    /// relative to the resource and must lie inside the mapping.
    pub fn unmap_and_write_region<C>(self, region: &MemoryRegion<C>) -> Result<()> {
        match region.offset().checked_sub(self.offset) {
            Some(relative) => self.unmap_and_write_range(relative, region.size()),
            None => {
                let error = GraphicsError::invalid_argument(
                    "region",
                    format!(
                        "starts at {} before the mapping at {}",
                        region.offset(),
                        self.offset
                    ),
                );
                self.unmap();
                Err(error)
            }
        }
    }

    fn checked_range(&self, offset: u64, len: u64) -> Result<std::ops::Range<usize>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(offset as usize..end as usize),
            _ => Err(GraphicsError::invalid_argument(
                "range",
                format!("[{}, {}+{}) exceeds mapping of {} bytes", offset, offset, len, self.len),
            )),
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.block.unmap();
        self.resource.release_mapping();
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        if !self.released {
            crate::gx_emit!(
                GX101,
                "{:?} offset {} length {}",
                self.resource.native(),
                self.offset,
                self.len
            );
            self.release();
        }
    }
}

impl fmt::Debug for MappedMemory<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedMemory")
            .field("resource", &self.resource.native())
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::AllocatorConfig;
    use crate::diagnostics::{add_sink, remove_sink, CollectingSink, DiagnosticSink};
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::gpu::types::{BufferKind, CpuAccess};
    use crate::graphics::device::DeviceId;
    use crate::memory::allocator::MemoryAllocator;
    use crate::memory::region::RegionCollection;
    use crate::util::size::kb;

    fn upload_buffer(size: u64) -> (Arc<SoftwareDevice>, Arc<GraphicsResource>) {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let allocator = Arc::new(MemoryAllocator::new(
            DeviceId::next(),
            device.clone(),
            AllocatorConfig::minimal().with_fixed_block_size(kb(64)),
        ));
        let buffer = allocator
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, size)
            .unwrap();
        (device, buffer)
    }

    #[test]
    fn test_unmap_and_write_flushes_atom_range() {
        let (device, buffer) = upload_buffer(512);
        let base = buffer.block_region().offset();
        let mut mapping = buffer.map_range(100, 20).unwrap();
        mapping.write(0, &[7; 20]).unwrap();
        mapping.unmap_and_write().unwrap();

        let ranges = device.flushed_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].offset, base + 64);
        assert_eq!(ranges[0].size, 64);
        assert_eq!(buffer.map_count(), 0);
    }

    #[test]
    fn test_zero_length_skips_flush() {
        let (device, buffer) = upload_buffer(256);
        let mapping = buffer.map_range(16, 0).unwrap();
        mapping.unmap_and_write().unwrap();
        let mapping = buffer.map_for_read_range(16, 0).unwrap();
        mapping.unmap();
        assert_eq!(device.call_count("flush_mapped_ranges"), 0);
        assert_eq!(device.call_count("invalidate_mapped_ranges"), 0);
    }

    #[test]
    fn test_unmap_does_not_flush() {
        let (device, buffer) = upload_buffer(256);
        let mut mapping = buffer.map().unwrap();
        mapping.as_mut_slice().fill(1);
        mapping.unmap();
        assert_eq!(device.call_count("flush_mapped_ranges"), 0);
        assert_eq!(device.call_count("unmap_memory"), 1);
    }

    #[test]
    fn test_typed_views() {
        let (_device, buffer) = upload_buffer(64);
        let mut mapping = buffer.map().unwrap();
        mapping.write_pod(0, &[1.0f32, 2.0, 3.0]).unwrap();
        assert_eq!(&mapping.typed::<f32>().unwrap()[..3], &[1.0, 2.0, 3.0]);
        mapping.typed_mut::<u32>().unwrap()[15] = 9;
        assert!(mapping.write(60, &[0; 8]).is_err());
        mapping.unmap_and_write().unwrap();
    }

    #[test]
    fn test_unmap_and_write_region() {
        let (device, buffer) = upload_buffer(1024);
        let region = buffer.allocate(32, 256, 0).unwrap();
        let _second = buffer.allocate(32, 256, 0).unwrap();
        let second = buffer.allocate(32, 256, 0).unwrap();
        assert_eq!(second.offset(), 512);
        let mapping = buffer.map().unwrap();
        mapping.unmap_and_write_region(&second).unwrap();
        let flushed = device.flushed_ranges();
        assert_eq!(flushed[0].offset, buffer.block_region().offset() + 512);
        assert_eq!(flushed[0].size, 64);

        let mapping = buffer.map_region(&second).unwrap();
        assert!(mapping.unmap_and_write_region(&region).is_err());
        assert_eq!(buffer.map_count(), 0);
    }

    #[test]
    fn test_dropped_mapping_unmaps() {
        let sink = Arc::new(CollectingSink::new());
        let handle: Arc<dyn DiagnosticSink> = sink.clone();
        add_sink(handle.clone());

        let (device, buffer) = upload_buffer(64);
        {
            let _mapping = buffer.map_range(8, 24).unwrap();
            assert_eq!(buffer.map_count(), 1);
        }
        remove_sink(&handle);
        assert_eq!(buffer.map_count(), 0);
        assert_eq!(device.call_count("unmap_memory"), 1);
        let context = format!("{:?} offset 8 length 24", buffer.native());
        assert!(sink.saw("GX101", &context));
    }
}
