//! Integration tests for framegfx, run against the software backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framegfx::gpu::types::{IndexFormat, NativeResource};
use framegfx::util::size::kb;
use framegfx::{
    AllocatorConfig, BufferKind, CpuAccess, DeviceDescriptor, ElementFormat, Extent2d,
    GraphicsContext, GraphicsDevice, GraphicsError, GraphicsSurface, InputElement, InputElementKind, MemoryBlock,
    MemoryBlockCollection, MemoryRegion, OffscreenSurface, PipelineResource, PrimitiveDescriptor,
    RegionCollection, ResourceBindingKind, Result, ShaderKind, ShaderVisibility, SoftwareConfig,
    SoftwareDevice, TexelFormat, TextureDescriptor,
};

fn headless(desc: DeviceDescriptor) -> (Arc<SoftwareDevice>, GraphicsDevice) {
    let native = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
    let device = GraphicsDevice::new(native.clone(), None, desc).unwrap();
    (native, device)
}

fn run_frame(device: &GraphicsDevice, record: impl FnOnce(&mut GraphicsContext) -> Result<()>) {
    let mut context = device.rent_render_context().unwrap();
    context.begin_frame().unwrap();
    record(&mut *context).unwrap();
    context.end_frame().unwrap();
    device.return_render_context(context).unwrap();
    device.present_frame().unwrap();
}

fn assert_accounting(collection: &MemoryBlockCollection, live: &[MemoryRegion<MemoryBlock>]) {
    let blocks = collection.blocks();
    let capacity: u64 = blocks.iter().map(|block| block.size()).sum();
    let free: u64 = blocks.iter().map(|block| block.free_bytes()).sum();
    let allocated: u64 = blocks.iter().map(|block| block.allocated_bytes()).sum();
    assert_eq!(free + allocated, capacity);
    assert_eq!(allocated, live.iter().map(|region| region.size()).sum::<u64>());
    assert_eq!(collection.reserved_bytes(), capacity);
    assert_eq!(collection.used_bytes(), allocated);
}

#[test]
fn test_collection_accounting_under_churn() {
    let config = AllocatorConfig::minimal()
        .with_fixed_block_size(kb(64))
        .with_maximum_blocks(64);
    let (_native, device) = headless(DeviceDescriptor::default().with_allocator(config));
    let collection = device.allocator().collection(0).unwrap();

    let mut live = Vec::new();
    let mut seed = 0x2545_F491_4F6C_DD1Du64;
    for step in 0..1_500 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        if live.is_empty() || seed % 3 != 0 {
            let size = 1 + seed % 4096;
            let alignment = 1u64 << ((seed >> 32) % 9);
            live.push(collection.allocate(size, alignment, 0).unwrap());
        } else {
            let index = (seed >> 16) as usize % live.len();
            let region = live.swap_remove(index);
            collection.free(&region).unwrap();
        }
        if step % 50 == 0 {
            assert_accounting(collection, &live);
        }
    }

    for region in live.drain(..) {
        collection.free(&region).unwrap();
    }
    assert_accounting(collection, &live);
    let stats = device.memory_stats();
    assert_eq!(stats.active_allocations(), 0);
    assert_eq!(stats.used_bytes, 0);
}

#[test]
fn test_adjacent_frees_coalesce() {
    let config = AllocatorConfig::minimal()
        .with_fixed_block_size(1024)
        .with_maximum_blocks(1)
        .with_release_empty_blocks(false);
    let (_native, device) = headless(DeviceDescriptor::default().with_allocator(config));
    let collection = device.allocator().collection(0).unwrap();

    let first = collection.allocate(256, 1, 0).unwrap();
    let second = collection.allocate(256, 1, 0).unwrap();
    let rest = collection.allocate(512, 1, 0).unwrap();
    assert_eq!((first.offset(), second.offset(), rest.offset()), (0, 256, 512));
    let block = first.parent().unwrap();

    collection.free(&first).unwrap();
    collection.free(&second).unwrap();
    assert_eq!(block.free_region_count(), 1);
    assert_eq!(block.largest_free_region(), 512);

    // Larger than either freed region; only the merged span can hold it.
    let merged = collection.allocate(384, 1, 0).unwrap();
    assert_eq!(merged.offset(), 0);
    assert!(merged.same_parent(&rest));
    assert_eq!(collection.block_count(), 1);
}

#[test]
fn test_non_coherent_round_trip_through_gpu_copies() {
    let (native, device) = headless(DeviceDescriptor::default().with_context_count(1));
    let atom = device.allocator().limits().non_coherent_atom_size;
    let upload = device
        .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 1024)
        .unwrap();
    let staging = device
        .create_buffer(BufferKind::Default, CpuAccess::None, 1024)
        .unwrap();
    let readback = device
        .create_buffer(BufferKind::Default, CpuAccess::GpuToCpu, 1024)
        .unwrap();

    // Unaligned on purpose so the flush has to widen the range.
    let _skip = upload.allocate(10, 1, 0).unwrap();
    let region = upload.allocate(100, 1, 0).unwrap();
    assert_eq!(region.offset(), 10);
    let pattern: Vec<u8> = (0..100u8).map(|i| i.wrapping_mul(31) ^ 0x5A).collect();

    let mut mapping = upload.map_region(&region).unwrap();
    mapping.as_mut_slice().copy_from_slice(&pattern);
    mapping.unmap_and_write().unwrap();

    let flushed = native.flushed_ranges();
    assert!(!flushed.is_empty());
    for range in &flushed {
        assert_eq!(range.offset % atom, 0);
    }

    run_frame(&device, |context| {
        context.copy(&staging, &upload)?;
        context.copy(&readback, &staging)
    });

    let mapping = readback
        .map_for_read_range(region.offset(), region.size())
        .unwrap();
    assert_eq!(mapping.as_slice(), &pattern[..]);

    let block_size = readback.block_region().parent().unwrap().size();
    let invalidated = native.invalidated_ranges();
    assert!(!invalidated.is_empty());
    for range in &invalidated {
        let end = range.offset + range.size;
        assert_eq!(range.offset % atom, 0);
        assert!(end % atom == 0 || end == block_size, "range ends at {}", end);
    }
}

#[test]
fn test_region_offsets_honour_alignment() {
    let (_native, device) = headless(DeviceDescriptor::default());
    let collection = device.allocator().collection(0).unwrap();
    let buffer = device
        .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, kb(16))
        .unwrap();

    let mut regions = Vec::new();
    for (i, &alignment) in [4u64, 16, 256].iter().cycle().take(30).enumerate() {
        let size = 1 + (i as u64 * 37) % 200;

        let region = collection.allocate(size, alignment, 0).unwrap();
        assert_eq!(region.offset() % alignment, 0, "block region, alignment {}", alignment);
        regions.push(region);

        let inner = buffer.allocate(size, alignment, 0).unwrap();
        assert_eq!(inner.offset() % alignment, 0, "buffer region, alignment {}", alignment);
    }
    for region in &regions {
        collection.free(region).unwrap();
    }
}

#[test]
fn test_texture_copy_with_unaligned_row_width() {
    let (native, device) = headless(DeviceDescriptor::default().with_context_count(1));
    let (width, height) = (257u32, 3u32);
    let desc = TextureDescriptor::new_2d(TexelFormat::R8G8B8Unorm, width, height, CpuAccess::None);
    let footprint = device.native().copyable_footprint(&desc);
    assert_eq!(footprint.row_size, 771);
    assert_eq!(footprint.row_pitch, 1024);

    let texel_count = (width * height) as usize;
    let texels: Vec<u8> = (0..texel_count * 3).map(|i| (i * 7 % 251) as u8).collect();

    let upload = device
        .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, footprint.total_bytes)
        .unwrap();
    let mut mapping = upload.map().unwrap();
    assert!(footprint.pack(&texels, mapping.as_mut_slice()));
    mapping.unmap_and_write().unwrap();

    let texture = device.create_texture(desc).unwrap();
    let readback = device
        .create_buffer(BufferKind::Default, CpuAccess::GpuToCpu, footprint.total_bytes)
        .unwrap();

    run_frame(&device, |context| {
        context.copy(&texture, &upload)?;
        context.copy(&readback, &texture)
    });

    let NativeResource::Image(image) = texture.native() else {
        panic!("texture without an image");
    };
    assert_eq!(native.read_image(image).unwrap(), texels);

    let mapping = readback.map_for_read().unwrap();
    let pitched = mapping.as_slice();
    for y in 0..height {
        for x in 0..width as usize {
            let naive = (y as usize * width as usize + x) * 3;
            let placed = footprint.row_offset(y, 0) as usize + x * 3;
            assert_eq!(&pitched[placed..placed + 3], &texels[naive..naive + 3], "texel ({x}, {y})");
        }
    }
}

#[test]
fn test_begin_frame_waits_for_slot_fence() {
    let (native, device) = headless(DeviceDescriptor::default().with_context_count(1));

    let mut context = device.rent_render_context().unwrap();
    let fence = context.fence().handle();
    context.begin_frame().unwrap();
    context.end_frame().unwrap();
    device.return_render_context(context).unwrap();

    // The GPU has not finished slot 0 yet.
    native.hold_signals(fence);
    device.present_frame().unwrap();

    let released = Arc::new(AtomicBool::new(false));
    let releaser = {
        let native = Arc::clone(&native);
        let released = Arc::clone(&released);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            released.store(true, Ordering::SeqCst);
            native.release_signals(fence);
        })
    };

    let mut context = device.rent_render_context().unwrap();
    assert_eq!(context.index(), 0);
    assert!(!context.fence().is_signalled().unwrap());
    context.begin_frame().unwrap();
    assert!(released.load(Ordering::SeqCst));

    context.end_frame().unwrap();
    device.return_render_context(context).unwrap();
    device.present_frame().unwrap();
    releaser.join().unwrap();
}

#[test]
fn test_double_dispose_returns_region_once() {
    let config = AllocatorConfig::minimal()
        .with_fixed_block_size(kb(64))
        .with_release_empty_blocks(false);
    let (native, device) = headless(DeviceDescriptor::default().with_allocator(config));

    let first = device
        .create_buffer(BufferKind::Default, CpuAccess::None, 4096)
        .unwrap();
    let offset = first.block_region().offset();
    let size = first.block_region().size();
    let block = first.block_region().parent().unwrap().id();
    let before = device.memory_stats();

    first.dispose();
    first.dispose();
    assert!(first.is_disposed());
    let after = device.memory_stats();
    assert_eq!(after.free_count, before.free_count + 1);
    assert_eq!(after.used_bytes, before.used_bytes - size);
    assert!(matches!(first.map(), Err(GraphicsError::Disposed { .. })));
    drop(first);
    assert_eq!(device.memory_stats().free_count, after.free_count);

    let second = device
        .create_buffer(BufferKind::Default, CpuAccess::None, 4096)
        .unwrap();
    assert_eq!(second.block_region().offset(), offset);
    assert_eq!(second.block_region().parent().unwrap().id(), block);
    assert_eq!(native.live_resources(), 1);
}

#[test]
fn test_indexed_draw_with_constant_buffer() {
    let native = Arc::new(SoftwareDevice::new(
        SoftwareConfig::new().with_presentation(2, 3),
    ));
    let surface: Arc<dyn GraphicsSurface> = Arc::new(OffscreenSurface::new(Extent2d::new(8, 8)));
    let device =
        GraphicsDevice::new(native.clone(), Some(surface), DeviceDescriptor::default()).unwrap();

    let vertices = device
        .create_buffer(BufferKind::Vertex, CpuAccess::CpuToGpu, 256)
        .unwrap();
    let indices = device
        .create_buffer(BufferKind::Index, CpuAccess::CpuToGpu, 256)
        .unwrap();
    let constants = device
        .create_buffer(BufferKind::Constant, CpuAccess::CpuToGpu, kb(1))
        .unwrap();

    let vertex_region = vertices.allocate(48, 4, 12).unwrap();
    let index_region = indices.allocate(12, 2, 2).unwrap();
    let constant_region = constants.allocate(64, 256, 0).unwrap();
    let mut mapping = indices.map_region(&index_region).unwrap();
    mapping.write_pod(0, &[0u16, 1, 2, 2, 1, 3]).unwrap();
    mapping.unmap_and_write().unwrap();

    let signature = device
        .create_pipeline_signature(
            &[InputElement {
                kind: InputElementKind::Position,
                format: ElementFormat::Float3,
            }],
            &[PipelineResource {
                kind: ResourceBindingKind::ConstantBuffer,
                visibility: ShaderVisibility::Vertex,
            }],
        )
        .unwrap();
    let vs = device.create_shader(ShaderKind::Vertex, &[1, 2, 3, 4], "main").unwrap();
    let ps = device.create_shader(ShaderKind::Pixel, &[5, 6, 7, 8], "main").unwrap();
    let pipeline = device
        .create_pipeline(&signature, Some(&vs), Some(&ps))
        .unwrap();
    let primitive = device
        .create_primitive(
            PrimitiveDescriptor::new(pipeline, vertex_region, 12)
                .with_indices(index_region, 2)
                .with_inputs(vec![constant_region]),
        )
        .unwrap();
    assert_eq!(primitive.vertex_count(), 4);
    assert_eq!(primitive.index_count(), 6);

    for _ in 0..3 {
        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        context.begin_drawing([0.1, 0.2, 0.3, 1.0]).unwrap();
        context.draw(&primitive).unwrap();
        context.end_drawing().unwrap();
        context.end_frame().unwrap();
        device.return_render_context(context).unwrap();
        device.present_frame().unwrap();
    }

    let draws: Vec<_> = native
        .take_executed_commands()
        .into_iter()
        .filter_map(|command| match command {
            framegfx::gpu::types::Command::Draw(draw) => Some(draw),
            _ => None,
        })
        .collect();
    assert_eq!(draws.len(), 3);
    let index = draws[0].index_buffer.unwrap();
    assert_eq!(index.format, IndexFormat::U16);
    assert_eq!(index.count, 6);
    assert!(draws[0].binding_set.is_some());

    device.dispose();
    assert!(matches!(
        device.rent_render_context(),
        Err(GraphicsError::Disposed { .. })
    ));
}
