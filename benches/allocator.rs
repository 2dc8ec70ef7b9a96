use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use framegfx::memory::FreeList;
use framegfx::util::size::{kb, mb};
use framegfx::{
    AllocatorConfig, BufferKind, CpuAccess, DeviceDescriptor, GraphicsDevice, RegionCollection,
    SoftwareConfig, SoftwareDevice,
};
use std::sync::Arc;

fn headless(config: AllocatorConfig) -> GraphicsDevice {
    let native = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
    GraphicsDevice::new(native, None, DeviceDescriptor::default().with_allocator(config))
        .expect("software device")
}

// =============================================================================
// FREE LIST
// =============================================================================

fn bench_free_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("free_list");

    for &size in &[64u64, 1024, 16 * 1024] {
        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::new("allocate_free", size), &size, |b, &size| {
            let mut list = FreeList::new(mb(64));
            b.iter(|| {
                let offset = list.allocate(black_box(size), 256).expect("capacity");
                list.free(offset, size);
            });
        });
    }

    // Fragmented list: every other slot taken, so best fit has to scan.
    group.bench_function("fragmented_best_fit", |b| {
        let mut list = FreeList::new(mb(4));
        let mut held = Vec::new();
        while let Some(offset) = list.allocate(kb(1), 1) {
            held.push(offset);
        }
        for offset in held.iter().step_by(2) {
            list.free(*offset, kb(1));
        }
        b.iter(|| {
            let offset = list.allocate(black_box(512), 1).expect("free slot");
            list.free(offset, 512);
        });
    });

    group.finish();
}

// =============================================================================
// BLOCK COLLECTION
// =============================================================================

fn bench_collection_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection_churn");

    group.bench_function("mixed_sizes", |b| {
        let device = headless(
            AllocatorConfig::minimal()
                .with_fixed_block_size(mb(1))
                .with_maximum_blocks(64)
                .with_release_empty_blocks(false),
        );
        let collection = device.allocator().collection(0).expect("memory type 0");
        let mut seed = 0x9E37_79B9_7F4A_7C15u64;
        let mut live = Vec::with_capacity(256);
        b.iter(|| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            if live.len() < 256 && seed % 3 != 0 {
                let size = 16 + seed % kb(8);
                live.push(collection.allocate(size, 16, 0).expect("allocate"));
            } else if !live.is_empty() {
                let region = live.swap_remove((seed >> 20) as usize % live.len());
                collection.free(&region).expect("free");
            }
        });
    });

    group.bench_function("block_growth", |b| {
        b.iter(|| {
            let device = headless(
                AllocatorConfig::minimal()
                    .with_fixed_block_size(kb(64))
                    .with_maximum_blocks(32),
            );
            let collection = device.allocator().collection(0).expect("memory type 0");
            let regions: Vec<_> = (0..64)
                .map(|_| collection.allocate(kb(16), 256, 0).expect("allocate"))
                .collect();
            black_box(collection.block_count());
            for region in &regions {
                collection.free(region).expect("free");
            }
        });
    });

    group.finish();
}

// =============================================================================
// MAPPING
// =============================================================================

fn bench_map_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_write");
    let device = headless(AllocatorConfig::default());

    for &size in &[256u64, kb(64)] {
        let buffer = device
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, size)
            .expect("upload buffer");
        let region = buffer.allocate(size, 1, 0).expect("region");
        group.throughput(Throughput::Bytes(size));
        group.bench_with_input(BenchmarkId::new("unmap_and_write", size), &size, |b, _| {
            b.iter(|| {
                let mut mapping = buffer.map_region(&region).expect("map");
                mapping.as_mut_slice().fill(black_box(0xAB));
                mapping.unmap_and_write().expect("flush");
            });
        });
    }

    group.finish();
}

// =============================================================================
// FRAME LOOP
// =============================================================================

fn bench_frame_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_loop");
    let device = headless(AllocatorConfig::default());
    let upload = device
        .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, kb(4))
        .expect("upload buffer");
    let target = device
        .create_buffer(BufferKind::Default, CpuAccess::None, kb(4))
        .expect("target buffer");

    group.bench_function("empty_frame", |b| {
        b.iter(|| {
            let mut context = device.rent_render_context().expect("rent");
            context.begin_frame().expect("begin");
            context.end_frame().expect("end");
            device.return_render_context(context).expect("return");
            device.present_frame().expect("present");
        });
    });

    group.bench_function("copy_frame", |b| {
        b.iter(|| {
            let mut context = device.rent_render_context().expect("rent");
            context.begin_frame().expect("begin");
            context.copy(&target, &upload).expect("copy");
            context.end_frame().expect("end");
            device.return_render_context(context).expect("return");
            device.present_frame().expect("present");
        });
    });

    group.finish();
}

criterion_group!(allocation, bench_free_list, bench_collection_churn);
criterion_group!(frames, bench_map_write, bench_frame_loop);
criterion_main!(allocation, frames);
