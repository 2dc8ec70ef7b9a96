//! In-process software backend.
//!
//! Implements every [`NativeDevice`] call on host memory so the object model
//! can run without a GPU. Non-coherent memory keeps a separate host copy and
//! device copy: writes through a mapping reach the device only when flushed,
//! and device writes become visible to the mapping only when invalidated. A
//! missing flush or invalidate therefore shows up as stale data, and a flush
//! range that is not atom aligned is rejected the way a validation layer
//! would reject it.
//!
//! Command lists execute when submitted. Fences are value based; signals can
//! be held back per fence to emulate a GPU that has not finished yet.

use std::alloc::{self, Layout};
use std::collections::{HashMap, HashSet};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{NativeError, NativeErrorKind};
use crate::gpu::traits::{NativeAdapter, NativeDevice, NativeResult};
use crate::gpu::types::*;
use crate::sync::mutex::{Condvar, Mutex, MutexGuard};
use crate::util::layout::align_up;
use crate::util::size::{gb, mb};

const HOST_ALIGNMENT: usize = 256;

/// Configuration of the software backend.
#[derive(Debug, Clone)]
pub struct SoftwareConfig {
    /// Adapter name reported by [`AdapterInfo`].
    pub name: String,
    /// Memory types, index order.
    pub memory_types: Vec<MemoryType>,
    /// Flush/invalidate granularity for non-coherent memory.
    pub non_coherent_atom_size: u64,
    /// Largest single allocation.
    pub max_memory_allocation_size: u64,
    /// Alignment of constant-buffer regions.
    pub constant_buffer_alignment: u64,
    /// Row pitch alignment of copyable footprints.
    pub row_pitch_alignment: u64,
    /// Alignment and size granularity of buffer/image memory requirements.
    pub resource_alignment: u64,
    /// Total bytes of device memory that may be allocated, if limited.
    pub memory_budget: Option<u64>,
    /// Presentation support; `None` makes the device headless.
    pub presentation: Option<PresentationCapabilities>,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareConfig {
    /// Default configuration: device-local, non-coherent upload and cached
    /// readback memory, 64 byte atoms, 256 byte pitch alignment, headless.
    pub fn new() -> Self {
        Self {
            name: "framegfx software device".to_string(),
            memory_types: vec![
                MemoryType {
                    index: 0,
                    properties: MemoryProperties::DEVICE_LOCAL,
                    heap_size: gb(4),
                },
                MemoryType {
                    index: 1,
                    properties: MemoryProperties::HOST_VISIBLE,
                    heap_size: gb(1),
                },
                MemoryType {
                    index: 2,
                    properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_CACHED,
                    heap_size: gb(1),
                },
            ],
            non_coherent_atom_size: 64,
            max_memory_allocation_size: gb(1),
            constant_buffer_alignment: 256,
            row_pitch_alignment: 256,
            resource_alignment: 256,
            memory_budget: None,
            presentation: None,
        }
    }

    /// Every host-visible type is coherent.
    pub fn coherent() -> Self {
        let mut config = Self::new();
        for memory_type in &mut config.memory_types {
            if memory_type.is_host_visible() {
                memory_type.properties |= MemoryProperties::HOST_COHERENT;
            }
        }
        config
    }

    /// Limit the total device memory.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Set the non-coherent atom size.
    pub fn with_atom_size(mut self, bytes: u64) -> Self {
        self.non_coherent_atom_size = bytes;
        self
    }

    /// Set the largest single allocation.
    pub fn with_max_allocation_size(mut self, bytes: u64) -> Self {
        self.max_memory_allocation_size = bytes;
        self
    }

    /// Enable presentation with a swapchain image count range.
    pub fn with_presentation(mut self, min_image_count: u32, max_image_count: u32) -> Self {
        self.presentation = Some(PresentationCapabilities {
            min_image_count,
            max_image_count,
            formats: vec![TexelFormat::B8G8R8A8Unorm, TexelFormat::R8G8B8A8Unorm],
        });
        self
    }
}

/// Zeroed host allocation addressed through raw pointers only, so mapped
/// pointers handed to the object model stay valid while the device copies
/// into and out of the same bytes.
struct HostBytes {
    ptr: NonNull<u8>,
    layout: Layout,
    len: u64,
}

// The bytes are plain data; access is serialized by the device state lock or
// by the mapping contract.
unsafe impl Send for HostBytes {}
unsafe impl Sync for HostBytes {}

impl HostBytes {
    fn zeroed(len: u64) -> Option<Self> {
        let size = usize::try_from(len.max(1)).ok()?;
        let layout = Layout::from_size_align(size, HOST_ALIGNMENT).ok()?;
        // SAFETY: layout has a non-zero size.
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })?;
        Some(Self { ptr, layout, len })
    }

    fn in_bounds(&self, offset: u64, len: u64) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.len)
    }

    fn read(&self, offset: u64, out: &mut [u8]) {
        debug_assert!(self.in_bounds(offset, out.len() as u64));
        // SAFETY: bounds checked by callers; destination is a distinct slice.
        unsafe {
            ptr::copy_nonoverlapping(
                self.ptr.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    fn write(&self, offset: u64, data: &[u8]) {
        debug_assert!(self.in_bounds(offset, data.len() as u64));
        // SAFETY: bounds checked by callers; source is a distinct slice.
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.as_ptr().add(offset as usize),
                data.len(),
            );
        }
    }

    fn copy_from(&self, dst_offset: u64, src: &HostBytes, src_offset: u64, len: u64) {
        debug_assert!(self.in_bounds(dst_offset, len) && src.in_bounds(src_offset, len));
        // SAFETY: both ranges are in bounds; `copy` tolerates overlap when
        // source and destination are the same allocation.
        unsafe {
            ptr::copy(
                src.ptr.as_ptr().add(src_offset as usize),
                self.ptr.as_ptr().add(dst_offset as usize),
                len as usize,
            );
        }
    }
}

impl Drop for HostBytes {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

struct Allocation {
    memory_type: MemoryType,
    device: HostBytes,
    /// CPU-side copy for non-coherent memory.
    host: Option<HostBytes>,
    mapped: bool,
}

impl Allocation {
    fn size(&self) -> u64 {
        self.device.len
    }
}

struct BufferState {
    desc: BufferDescriptor,
    binding: Option<(MemoryHandle, u64)>,
    state: ResourceState,
}

enum ImageStorage {
    Unbound,
    Bound(MemoryHandle, u64),
    Owned(HostBytes),
}

struct ImageState {
    desc: TextureDescriptor,
    storage: ImageStorage,
    state: ResourceState,
}

impl ImageState {
    fn byte_len(&self) -> u64 {
        self.desc.row_size() * u64::from(self.desc.height.max(1)) * u64::from(self.desc.depth.max(1))
    }
}

struct CommandListState {
    allocator: CommandAllocatorHandle,
    recording: bool,
    commands: Vec<Command>,
}

struct SwapchainState {
    desc: SwapchainDescriptor,
    images: Vec<ImageHandle>,
    next_image: u32,
}

struct ViewState {
    image: ImageHandle,
    render_pass: RenderPassHandle,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    calls: HashMap<&'static str, u64>,

    memory: HashMap<MemoryHandle, Allocation>,
    allocated_bytes: u64,
    buffers: HashMap<BufferHandle, BufferState>,
    images: HashMap<ImageHandle, ImageState>,

    fences: HashMap<FenceHandle, u64>,
    held_fences: HashSet<FenceHandle>,
    held_signals: Vec<(FenceHandle, u64)>,

    command_allocators: HashMap<CommandAllocatorHandle, Vec<CommandListHandle>>,
    command_lists: HashMap<CommandListHandle, CommandListState>,

    swapchains: HashMap<SwapchainHandle, SwapchainState>,
    surface_extent: Option<Extent2d>,
    render_passes: HashMap<RenderPassHandle, TexelFormat>,
    views: HashMap<RenderTargetViewHandle, ViewState>,
    shaders: HashSet<ShaderHandle>,
    signatures: HashSet<SignatureHandle>,
    pipelines: HashSet<PipelineHandle>,
    binding_sets: HashSet<BindingSetHandle>,

    flushed: Vec<MappedRange>,
    invalidated: Vec<MappedRange>,
    executed: Vec<Command>,
}

impl State {
    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn apply_signal(&mut self, fence: FenceHandle, value: u64) {
        if let Some(completed) = self.fences.get_mut(&fence) {
            *completed = (*completed).max(value);
        }
    }

    fn buffer_location(&self, buffer: BufferHandle, api: &'static str) -> NativeResult<(MemoryHandle, u64, u64)> {
        let state = self.buffers.get(&buffer).ok_or_else(|| invalid(api))?;
        let (memory, offset) = state.binding.ok_or_else(|| invalid(api))?;
        Ok((memory, offset, state.desc.size))
    }

    fn image_bytes(&self, image: ImageHandle, api: &'static str) -> NativeResult<(&HostBytes, u64, u64)> {
        let state = self.images.get(&image).ok_or_else(|| invalid(api))?;
        let len = state.byte_len();
        match &state.storage {
            ImageStorage::Unbound => Err(invalid(api)),
            ImageStorage::Bound(memory, offset) => {
                let allocation = self.memory.get(memory).ok_or_else(|| invalid(api))?;
                Ok((&allocation.device, *offset, len))
            }
            ImageStorage::Owned(bytes) => Ok((bytes, 0, len)),
        }
    }

    fn resource_state_mut(&mut self, resource: NativeResource) -> Option<&mut ResourceState> {
        match resource {
            NativeResource::Buffer(handle) => self.buffers.get_mut(&handle).map(|b| &mut b.state),
            NativeResource::Image(handle) => self.images.get_mut(&handle).map(|i| &mut i.state),
        }
    }

    fn validate_range(&self, range: &MappedRange, atom: u64, api: &'static str) -> NativeResult<()> {
        let allocation = self.memory.get(&range.memory).ok_or_else(|| invalid(api))?;
        if !allocation.mapped {
            return Err(invalid(api));
        }
        let end = range.offset.checked_add(range.size).ok_or_else(|| invalid(api))?;
        let aligned_end = end % atom == 0 || end == allocation.size();
        if range.offset % atom != 0 || !aligned_end || end > allocation.size() {
            return Err(invalid(api));
        }
        Ok(())
    }

    fn execute(&mut self, command: &Command) -> NativeResult<()> {
        const API: &str = "submit";
        match command {
            Command::Barrier(barriers) => {
                for barrier in barriers {
                    let state = self
                        .resource_state_mut(barrier.resource)
                        .ok_or_else(|| invalid(API))?;
                    if *state != barrier.before {
                        log::error!(
                            "barrier on {:?} expects {:?} but resource is in {:?}",
                            barrier.resource,
                            barrier.before,
                            state
                        );
                        return Err(invalid(API));
                    }
                    *state = barrier.after;
                }
            }
            Command::BeginRenderPass {
                render_pass,
                target,
                clear_color,
                ..
            } => {
                let view = self.views.get(target).ok_or_else(|| invalid(API))?;
                if view.render_pass != *render_pass {
                    return Err(invalid(API));
                }
                let image = view.image;
                let state = self.images.get(&image).ok_or_else(|| invalid(API))?;
                if state.state != ResourceState::RenderTarget {
                    return Err(invalid(API));
                }
                let texel = encode_clear_color(state.desc.format, *clear_color);
                let (bytes, offset, len) = self.image_bytes(image, API)?;
                let mut fill = Vec::with_capacity(len as usize);
                while (fill.len() as u64) < len {
                    fill.extend_from_slice(&texel);
                }
                bytes.write(offset, &fill[..len as usize]);
            }
            Command::SetViewport(_) | Command::SetScissor(_) | Command::EndRenderPass => {}
            Command::CopyBuffer {
                destination,
                source,
                size,
            } => {
                let (dst_memory, dst_offset, dst_size) = self.buffer_location(*destination, API)?;
                let (src_memory, src_offset, src_size) = self.buffer_location(*source, API)?;
                if *size > dst_size || *size > src_size {
                    return Err(invalid(API));
                }
                let dst = &self.memory.get(&dst_memory).ok_or_else(|| invalid(API))?.device;
                let src = &self.memory.get(&src_memory).ok_or_else(|| invalid(API))?.device;
                dst.copy_from(dst_offset, src, src_offset, *size);
            }
            Command::CopyBufferToImage {
                destination,
                destination_state,
                source,
                footprint,
                ..
            } => {
                let image = self.images.get(destination).ok_or_else(|| invalid(API))?;
                if image.state != *destination_state {
                    return Err(invalid(API));
                }
                let (src_memory, src_offset, src_size) = self.buffer_location(*source, API)?;
                if footprint.offset + footprint.total_bytes > src_size {
                    return Err(invalid(API));
                }
                let src = &self.memory.get(&src_memory).ok_or_else(|| invalid(API))?.device;
                let (dst, dst_offset, _) = self.image_bytes(*destination, API)?;
                for slice in 0..footprint.depth {
                    for row in 0..footprint.rows {
                        let tight = (u64::from(slice) * u64::from(footprint.rows) + u64::from(row))
                            * footprint.row_size;
                        dst.copy_from(
                            dst_offset + tight,
                            src,
                            src_offset + footprint.row_offset(row, slice),
                            footprint.row_size,
                        );
                    }
                }
            }
            Command::CopyImageToBuffer {
                destination,
                source,
                source_state,
                footprint,
                ..
            } => {
                let image = self.images.get(source).ok_or_else(|| invalid(API))?;
                if image.state != *source_state {
                    return Err(invalid(API));
                }
                let (dst_memory, dst_offset, dst_size) = self.buffer_location(*destination, API)?;
                if footprint.offset + footprint.total_bytes > dst_size {
                    return Err(invalid(API));
                }
                let dst = &self.memory.get(&dst_memory).ok_or_else(|| invalid(API))?.device;
                let (src, src_offset, _) = self.image_bytes(*source, API)?;
                for slice in 0..footprint.depth {
                    for row in 0..footprint.rows {
                        let tight = (u64::from(slice) * u64::from(footprint.rows) + u64::from(row))
                            * footprint.row_size;
                        dst.copy_from(
                            dst_offset + footprint.row_offset(row, slice),
                            src,
                            src_offset + tight,
                            footprint.row_size,
                        );
                    }
                }
            }
            Command::Draw(draw) => {
                if !self.pipelines.contains(&draw.pipeline)
                    || !self.signatures.contains(&draw.signature)
                    || !self.buffers.contains_key(&draw.vertex_buffer.buffer)
                {
                    return Err(invalid(API));
                }
                if let Some(set) = draw.binding_set {
                    if !self.binding_sets.contains(&set) {
                        return Err(invalid(API));
                    }
                }
                if let Some(index) = draw.index_buffer {
                    if !self.buffers.contains_key(&index.buffer) {
                        return Err(invalid(API));
                    }
                }
            }
        }
        Ok(())
    }
}

fn native_error(api: &'static str, kind: NativeErrorKind) -> NativeError {
    let code = match kind {
        NativeErrorKind::OutOfHostMemory => -1,
        NativeErrorKind::OutOfDeviceMemory => -2,
        NativeErrorKind::DeviceLost => -4,
        NativeErrorKind::SwapchainOutOfDate => -1_000_001_004,
        NativeErrorKind::Timeout => 2,
        NativeErrorKind::Other => -13,
    };
    NativeError::new(api, code, kind)
}

fn invalid(api: &'static str) -> NativeError {
    native_error(api, NativeErrorKind::Other)
}

fn encode_clear_color(format: TexelFormat, color: [f32; 4]) -> Vec<u8> {
    let unorm = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let [r, g, b, a] = color;
    match format {
        TexelFormat::R8Unorm => vec![unorm(r)],
        TexelFormat::R8G8Unorm => vec![unorm(r), unorm(g)],
        TexelFormat::R8G8B8Unorm => vec![unorm(r), unorm(g), unorm(b)],
        TexelFormat::R8G8B8A8Unorm => vec![unorm(r), unorm(g), unorm(b), unorm(a)],
        TexelFormat::B8G8R8A8Unorm => vec![unorm(b), unorm(g), unorm(r), unorm(a)],
        TexelFormat::R32Float => r.to_le_bytes().to_vec(),
        TexelFormat::R32G32B32A32Float => color.iter().flat_map(|c| c.to_le_bytes()).collect(),
    }
}

/// A software device.
pub struct SoftwareDevice {
    config: SoftwareConfig,
    state: Mutex<State>,
    fence_signalled: Condvar,
}

impl SoftwareDevice {
    /// Create a device.
    pub fn new(config: SoftwareConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
            fence_signalled: Condvar::new(),
        }
    }

    /// Configuration the device was created with.
    pub fn config(&self) -> &SoftwareConfig {
        &self.config
    }

    fn lock(&self, call: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_insert(0) += 1;
        state
    }

    /// Number of times the named native call was made.
    pub fn call_count(&self, call: &str) -> u64 {
        self.state.lock().calls.get(call).copied().unwrap_or(0)
    }

    /// Every range flushed so far.
    pub fn flushed_ranges(&self) -> Vec<MappedRange> {
        self.state.lock().flushed.clone()
    }

    /// Every range invalidated so far.
    pub fn invalidated_ranges(&self) -> Vec<MappedRange> {
        self.state.lock().invalidated.clone()
    }

    /// Drain the log of executed commands.
    pub fn take_executed_commands(&self) -> Vec<Command> {
        std::mem::take(&mut self.state.lock().executed)
    }

    /// Bytes of device memory currently allocated.
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated_bytes
    }

    /// Number of live device-memory allocations.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    /// Number of live buffers and images.
    pub fn live_resources(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len() + state.images.len()
    }

    /// Number of live fences.
    pub fn live_fences(&self) -> usize {
        self.state.lock().fences.len()
    }

    /// Current state of a buffer or image.
    pub fn resource_state(&self, resource: NativeResource) -> Option<ResourceState> {
        let mut state = self.state.lock();
        state.resource_state_mut(resource).copied()
    }

    /// Read the device copy of an allocation, bypassing any mapping.
    pub fn read_device_memory(&self, memory: MemoryHandle, offset: u64, len: u64) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let allocation = state.memory.get(&memory)?;
        if !allocation.device.in_bounds(offset, len) {
            return None;
        }
        let mut out = vec![0; len as usize];
        allocation.device.read(offset, &mut out);
        Some(out)
    }

    /// Tightly packed texels of an image.
    pub fn read_image(&self, image: ImageHandle) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let (bytes, offset, len) = state.image_bytes(image, "read_image").ok()?;
        let mut out = vec![0; len as usize];
        bytes.read(offset, &mut out);
        Some(out)
    }

    /// Hold back signals of `fence` until released.
    pub fn hold_signals(&self, fence: FenceHandle) {
        self.state.lock().held_fences.insert(fence);
    }

    /// Apply held signals of `fence` and stop holding it.
    pub fn release_signals(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        state.held_fences.remove(&fence);
        let held = std::mem::take(&mut state.held_signals);
        for (held_fence, value) in held {
            if held_fence == fence {
                state.apply_signal(held_fence, value);
            } else {
                state.held_signals.push((held_fence, value));
            }
        }
        drop(state);
        self.fence_signalled.notify_all();
    }

    /// Emulate a window resize: swapchains of another size report out of date.
    pub fn set_surface_extent(&self, extent: Extent2d) {
        self.state.lock().surface_extent = Some(extent);
    }

    fn signal_locked(&self, state: &mut State, fence: FenceHandle, value: u64) {
        if state.held_fences.contains(&fence) {
            state.held_signals.push((fence, value));
        } else {
            state.apply_signal(fence, value);
            self.fence_signalled.notify_all();
        }
    }

    fn swapchain_out_of_date(state: &State, swapchain: &SwapchainState) -> bool {
        state
            .surface_extent
            .map_or(false, |extent| extent != swapchain.desc.extent)
    }
}

impl NativeDevice for SoftwareDevice {
    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.config.name.clone(),
            backend: BackendKind::Software,
            vendor_id: 0,
            device_id: 0,
        }
    }

    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            non_coherent_atom_size: self.config.non_coherent_atom_size,
            max_memory_allocation_size: self.config.max_memory_allocation_size,
            constant_buffer_alignment: self.config.constant_buffer_alignment,
        }
    }

    fn memory_types(&self) -> Vec<MemoryType> {
        self.config.memory_types.clone()
    }

    fn allocate_memory(&self, memory_type: u32, size: u64) -> NativeResult<MemoryHandle> {
        const API: &str = "allocate_memory";
        let mut state = self.lock(API);
        let memory_type = *self
            .config
            .memory_types
            .get(memory_type as usize)
            .ok_or_else(|| invalid(API))?;
        let over_budget = self
            .config
            .memory_budget
            .map_or(false, |budget| state.allocated_bytes + size > budget);
        if size == 0 || size > self.config.max_memory_allocation_size || over_budget {
            return Err(native_error(API, NativeErrorKind::OutOfDeviceMemory));
        }
        let device =
            HostBytes::zeroed(size).ok_or_else(|| native_error(API, NativeErrorKind::OutOfHostMemory))?;
        let host = if memory_type.is_non_coherent() {
            Some(
                HostBytes::zeroed(size)
                    .ok_or_else(|| native_error(API, NativeErrorKind::OutOfHostMemory))?,
            )
        } else {
            None
        };
        let handle = MemoryHandle(state.next_handle());
        state.memory.insert(
            handle,
            Allocation {
                memory_type,
                device,
                host,
                mapped: false,
            },
        );
        state.allocated_bytes += size;
        Ok(handle)
    }

    fn free_memory(&self, memory: MemoryHandle) {
        let mut state = self.lock("free_memory");
        if let Some(allocation) = state.memory.remove(&memory) {
            if allocation.mapped {
                log::warn!("memory {:?} freed while mapped", memory);
            }
            state.allocated_bytes -= allocation.size();
        }
    }

    fn map_memory(&self, memory: MemoryHandle) -> NativeResult<NonNull<u8>> {
        const API: &str = "map_memory";
        let mut state = self.lock(API);
        let allocation = state.memory.get_mut(&memory).ok_or_else(|| invalid(API))?;
        if allocation.mapped || !allocation.memory_type.is_host_visible() {
            return Err(invalid(API));
        }
        allocation.mapped = true;
        Ok(allocation.host.as_ref().unwrap_or(&allocation.device).ptr)
    }

    fn unmap_memory(&self, memory: MemoryHandle) {
        let mut state = self.lock("unmap_memory");
        if let Some(allocation) = state.memory.get_mut(&memory) {
            allocation.mapped = false;
        }
    }

    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()> {
        const API: &str = "flush_mapped_ranges";
        let mut state = self.lock(API);
        for range in ranges {
            state.validate_range(range, self.config.non_coherent_atom_size, API)?;
        }
        for range in ranges {
            if let Some(allocation) = state.memory.get(&range.memory) {
                if let Some(host) = &allocation.host {
                    allocation
                        .device
                        .copy_from(range.offset, host, range.offset, range.size);
                }
            }
        }
        state.flushed.extend_from_slice(ranges);
        Ok(())
    }

    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()> {
        const API: &str = "invalidate_mapped_ranges";
        let mut state = self.lock(API);
        for range in ranges {
            state.validate_range(range, self.config.non_coherent_atom_size, API)?;
        }
        for range in ranges {
            if let Some(allocation) = state.memory.get(&range.memory) {
                if let Some(host) = &allocation.host {
                    host.copy_from(range.offset, &allocation.device, range.offset, range.size);
                }
            }
        }
        state.invalidated.extend_from_slice(ranges);
        Ok(())
    }

    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
    ) -> NativeResult<(BufferHandle, MemoryRequirements)> {
        const API: &str = "create_buffer";
        let mut state = self.lock(API);
        if desc.size == 0 {
            return Err(invalid(API));
        }
        let handle = BufferHandle(state.next_handle());
        state.buffers.insert(
            handle,
            BufferState {
                desc: *desc,
                binding: None,
                state: ResourceState::resting_for_buffer(desc.kind, desc.cpu_access),
            },
        );
        let requirements = MemoryRequirements {
            size: align_up(desc.size, self.config.resource_alignment),
            alignment: self.config.resource_alignment,
            memory_type_bits: all_types_mask(self.config.memory_types.len()),
        };
        Ok((handle, requirements))
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()> {
        const API: &str = "bind_buffer_memory";
        let mut state = self.lock(API);
        let fits = state
            .memory
            .get(&memory)
            .map_or(false, |allocation| allocation.device.in_bounds(offset, 1));
        let entry = state.buffers.get_mut(&buffer).ok_or_else(|| invalid(API))?;
        if !fits || entry.binding.is_some() {
            return Err(invalid(API));
        }
        entry.binding = Some((memory, offset));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.lock("destroy_buffer").buffers.remove(&buffer);
    }

    fn create_image(
        &self,
        desc: &TextureDescriptor,
    ) -> NativeResult<(ImageHandle, MemoryRequirements)> {
        const API: &str = "create_image";
        let mut state = self.lock(API);
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(invalid(API));
        }
        let image = ImageState {
            desc: *desc,
            storage: ImageStorage::Unbound,
            state: ResourceState::resting_for_texture(desc.cpu_access),
        };
        let requirements = MemoryRequirements {
            size: align_up(image.byte_len(), self.config.resource_alignment),
            alignment: self.config.resource_alignment,
            memory_type_bits: all_types_mask(self.config.memory_types.len()),
        };
        let handle = ImageHandle(state.next_handle());
        state.images.insert(handle, image);
        Ok((handle, requirements))
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()> {
        const API: &str = "bind_image_memory";
        let mut state = self.lock(API);
        let allocation_size = state.memory.get(&memory).map(Allocation::size);
        let entry = state.images.get_mut(&image).ok_or_else(|| invalid(API))?;
        let fits = allocation_size.map_or(false, |size| offset + entry.byte_len() <= size);
        if !fits || !matches!(entry.storage, ImageStorage::Unbound) {
            return Err(invalid(API));
        }
        entry.storage = ImageStorage::Bound(memory, offset);
        Ok(())
    }

    fn destroy_image(&self, image: ImageHandle) {
        self.lock("destroy_image").images.remove(&image);
    }

    fn copyable_footprint(&self, desc: &TextureDescriptor) -> CopyableFootprint {
        CopyableFootprint::for_texture(desc, self.config.row_pitch_alignment)
    }

    fn create_fence(&self, _signaled: bool) -> NativeResult<FenceHandle> {
        let mut state = self.lock("create_fence");
        let handle = FenceHandle(state.next_handle());
        state.fences.insert(handle, 0);
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.lock("destroy_fence");
        state.fences.remove(&fence);
        state.held_fences.remove(&fence);
        state.held_signals.retain(|(held, _)| *held != fence);
        drop(state);
        self.fence_signalled.notify_all();
    }

    fn signal_fence(&self, fence: FenceHandle, value: u64) -> NativeResult<()> {
        const API: &str = "signal_fence";
        let mut state = self.lock(API);
        if !state.fences.contains_key(&fence) {
            return Err(invalid(API));
        }
        self.signal_locked(&mut state, fence, value);
        Ok(())
    }

    fn wait_fence(
        &self,
        fence: FenceHandle,
        value: u64,
        timeout: Option<Duration>,
    ) -> NativeResult<bool> {
        const API: &str = "wait_fence";
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock(API);
        loop {
            let completed = *state.fences.get(&fence).ok_or_else(|| invalid(API))?;
            if completed >= value {
                return Ok(true);
            }
            match deadline {
                None => state = self.fence_signalled.wait(state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    state = self.fence_signalled.wait_for(state, deadline - now).0;
                }
            }
        }
    }

    fn fence_completed_value(&self, fence: FenceHandle) -> NativeResult<u64> {
        const API: &str = "fence_completed_value";
        let state = self.lock(API);
        state.fences.get(&fence).copied().ok_or_else(|| invalid(API))
    }

    fn reset_fence(&self, fence: FenceHandle) -> NativeResult<()> {
        const API: &str = "reset_fence";
        let state = self.lock(API);
        if state.fences.contains_key(&fence) {
            Ok(())
        } else {
            Err(invalid(API))
        }
    }

    fn wait_idle(&self) -> NativeResult<()> {
        // Work executes at submit; only held signals can be outstanding.
        let mut state = self.lock("wait_idle");
        state.held_fences.clear();
        for (fence, value) in std::mem::take(&mut state.held_signals) {
            state.apply_signal(fence, value);
        }
        drop(state);
        self.fence_signalled.notify_all();
        Ok(())
    }

    fn create_command_allocator(&self) -> NativeResult<CommandAllocatorHandle> {
        let mut state = self.lock("create_command_allocator");
        let handle = CommandAllocatorHandle(state.next_handle());
        state.command_allocators.insert(handle, Vec::new());
        Ok(handle)
    }

    fn destroy_command_allocator(&self, allocator: CommandAllocatorHandle) {
        let mut state = self.lock("destroy_command_allocator");
        if let Some(lists) = state.command_allocators.remove(&allocator) {
            for list in lists {
                state.command_lists.remove(&list);
            }
        }
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorHandle) -> NativeResult<()> {
        const API: &str = "reset_command_allocator";
        let state = self.lock(API);
        let lists = state
            .command_allocators
            .get(&allocator)
            .ok_or_else(|| invalid(API))?;
        let recording = lists
            .iter()
            .any(|list| state.command_lists.get(list).map_or(false, |l| l.recording));
        if recording {
            return Err(invalid(API));
        }
        Ok(())
    }

    fn create_command_list(
        &self,
        allocator: CommandAllocatorHandle,
    ) -> NativeResult<CommandListHandle> {
        const API: &str = "create_command_list";
        let mut state = self.lock(API);
        let handle = CommandListHandle(state.next_handle());
        state
            .command_allocators
            .get_mut(&allocator)
            .ok_or_else(|| invalid(API))?
            .push(handle);
        state.command_lists.insert(
            handle,
            CommandListState {
                allocator,
                recording: false,
                commands: Vec::new(),
            },
        );
        Ok(handle)
    }

    fn destroy_command_list(&self, allocator: CommandAllocatorHandle, list: CommandListHandle) {
        let mut state = self.lock("destroy_command_list");
        if let Some(lists) = state.command_allocators.get_mut(&allocator) {
            lists.retain(|l| *l != list);
        }
        state.command_lists.remove(&list);
    }

    fn begin_command_list(&self, list: CommandListHandle) -> NativeResult<()> {
        const API: &str = "begin_command_list";
        let mut state = self.lock(API);
        let entry = state.command_lists.get_mut(&list).ok_or_else(|| invalid(API))?;
        if entry.recording {
            return Err(invalid(API));
        }
        entry.recording = true;
        entry.commands.clear();
        Ok(())
    }

    fn record(&self, list: CommandListHandle, command: &Command) -> NativeResult<()> {
        const API: &str = "record";
        let mut state = self.lock(API);
        let entry = state.command_lists.get_mut(&list).ok_or_else(|| invalid(API))?;
        if !entry.recording {
            return Err(invalid(API));
        }
        entry.commands.push(command.clone());
        Ok(())
    }

    fn close_command_list(&self, list: CommandListHandle) -> NativeResult<()> {
        const API: &str = "close_command_list";
        let mut state = self.lock(API);
        let entry = state.command_lists.get_mut(&list).ok_or_else(|| invalid(API))?;
        if !entry.recording {
            return Err(invalid(API));
        }
        entry.recording = false;
        Ok(())
    }

    fn submit(&self, list: CommandListHandle) -> NativeResult<()> {
        const API: &str = "submit";
        let mut state = self.lock(API);
        let entry = state.command_lists.get(&list).ok_or_else(|| invalid(API))?;
        if entry.recording || !state.command_allocators.contains_key(&entry.allocator) {
            return Err(invalid(API));
        }
        let commands = entry.commands.clone();
        for command in &commands {
            state.execute(command)?;
        }
        state.executed.extend(commands);
        Ok(())
    }

    fn presentation_capabilities(&self) -> Option<PresentationCapabilities> {
        self.config.presentation.clone()
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDescriptor,
    ) -> NativeResult<(SwapchainHandle, u32)> {
        const API: &str = "create_swapchain";
        let caps = self.config.presentation.as_ref().ok_or_else(|| invalid(API))?;
        let image_count = desc
            .image_count
            .clamp(caps.min_image_count, caps.max_image_count);
        if !caps.formats.contains(&desc.format) || desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(invalid(API));
        }
        let mut state = self.lock(API);
        let texture = TextureDescriptor::new_2d(
            desc.format,
            desc.extent.width,
            desc.extent.height,
            CpuAccess::None,
        );
        let mut images = Vec::with_capacity(image_count as usize);
        for _ in 0..image_count {
            let mut image = ImageState {
                desc: texture,
                storage: ImageStorage::Unbound,
                state: ResourceState::Present,
            };
            let bytes = HostBytes::zeroed(image.byte_len())
                .ok_or_else(|| native_error(API, NativeErrorKind::OutOfHostMemory))?;
            image.storage = ImageStorage::Owned(bytes);
            let handle = ImageHandle(state.next_handle());
            state.images.insert(handle, image);
            images.push(handle);
        }
        let handle = SwapchainHandle(state.next_handle());
        state.swapchains.insert(
            handle,
            SwapchainState {
                desc: *desc,
                images,
                next_image: 0,
            },
        );
        Ok((handle, image_count))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.lock("destroy_swapchain");
        if let Some(removed) = state.swapchains.remove(&swapchain) {
            for image in removed.images {
                state.images.remove(&image);
            }
        }
    }

    fn swapchain_image(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<ImageHandle> {
        const API: &str = "swapchain_image";
        let state = self.lock(API);
        state
            .swapchains
            .get(&swapchain)
            .and_then(|sc| sc.images.get(index as usize).copied())
            .ok_or_else(|| invalid(API))
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        fence: FenceHandle,
        value: u64,
    ) -> NativeResult<u32> {
        const API: &str = "acquire_next_image";
        let mut state = self.lock(API);
        let entry = state.swapchains.get(&swapchain).ok_or_else(|| invalid(API))?;
        if Self::swapchain_out_of_date(&state, entry) {
            return Err(native_error(API, NativeErrorKind::SwapchainOutOfDate));
        }
        let index = entry.next_image;
        let count = entry.images.len() as u32;
        if let Some(entry) = state.swapchains.get_mut(&swapchain) {
            entry.next_image = (index + 1) % count;
        }
        self.signal_locked(&mut state, fence, value);
        Ok(index)
    }

    fn present(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<()> {
        const API: &str = "present";
        let state = self.lock(API);
        let entry = state.swapchains.get(&swapchain).ok_or_else(|| invalid(API))?;
        if Self::swapchain_out_of_date(&state, entry) {
            return Err(native_error(API, NativeErrorKind::SwapchainOutOfDate));
        }
        let image = entry.images.get(index as usize).ok_or_else(|| invalid(API))?;
        let in_present = state
            .images
            .get(image)
            .map_or(false, |image| image.state == ResourceState::Present);
        if !in_present {
            return Err(invalid(API));
        }
        Ok(())
    }

    fn create_render_pass(&self, format: TexelFormat) -> NativeResult<RenderPassHandle> {
        let mut state = self.lock("create_render_pass");
        let handle = RenderPassHandle(state.next_handle());
        state.render_passes.insert(handle, format);
        Ok(handle)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.lock("destroy_render_pass")
            .render_passes
            .remove(&render_pass);
    }

    fn create_render_target_view(
        &self,
        image: ImageHandle,
        format: TexelFormat,
        extent: Extent2d,
        render_pass: RenderPassHandle,
    ) -> NativeResult<RenderTargetViewHandle> {
        const API: &str = "create_render_target_view";
        let mut state = self.lock(API);
        let image_desc = state.images.get(&image).ok_or_else(|| invalid(API))?.desc;
        let pass_format = *state.render_passes.get(&render_pass).ok_or_else(|| invalid(API))?;
        if image_desc.format != format
            || pass_format != format
            || image_desc.width != extent.width
            || image_desc.height != extent.height
        {
            return Err(invalid(API));
        }
        let handle = RenderTargetViewHandle(state.next_handle());
        state.views.insert(handle, ViewState { image, render_pass });
        Ok(handle)
    }

    fn destroy_render_target_view(&self, view: RenderTargetViewHandle) {
        self.lock("destroy_render_target_view").views.remove(&view);
    }

    fn create_shader(
        &self,
        _kind: ShaderKind,
        bytecode: &[u8],
        entry_point: &str,
    ) -> NativeResult<ShaderHandle> {
        const API: &str = "create_shader";
        let mut state = self.lock(API);
        if bytecode.is_empty() || entry_point.is_empty() {
            return Err(invalid(API));
        }
        let handle = ShaderHandle(state.next_handle());
        state.shaders.insert(handle);
        Ok(handle)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.lock("destroy_shader").shaders.remove(&shader);
    }

    fn create_signature(
        &self,
        _inputs: &[InputElement],
        _resources: &[PipelineResource],
    ) -> NativeResult<SignatureHandle> {
        let mut state = self.lock("create_signature");
        let handle = SignatureHandle(state.next_handle());
        state.signatures.insert(handle);
        Ok(handle)
    }

    fn destroy_signature(&self, signature: SignatureHandle) {
        self.lock("destroy_signature").signatures.remove(&signature);
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        _inputs: &[InputElement],
    ) -> NativeResult<PipelineHandle> {
        const API: &str = "create_pipeline";
        let mut state = self.lock(API);
        let shaders_live = [desc.vertex_shader, desc.pixel_shader]
            .iter()
            .flatten()
            .all(|shader| state.shaders.contains(shader));
        if !shaders_live
            || !state.signatures.contains(&desc.signature)
            || !state.render_passes.contains_key(&desc.render_pass)
        {
            return Err(invalid(API));
        }
        let handle = PipelineHandle(state.next_handle());
        state.pipelines.insert(handle);
        Ok(handle)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.lock("destroy_pipeline").pipelines.remove(&pipeline);
    }

    fn create_binding_set(
        &self,
        signature: SignatureHandle,
        resources: &[BindingResource],
    ) -> NativeResult<BindingSetHandle> {
        const API: &str = "create_binding_set";
        let mut state = self.lock(API);
        let resources_live = resources.iter().all(|resource| match resource {
            BindingResource::ConstantBuffer { buffer, .. } => state.buffers.contains_key(buffer),
            BindingResource::Texture { image, .. } => state.images.contains_key(image),
        });
        if !resources_live || !state.signatures.contains(&signature) {
            return Err(invalid(API));
        }
        let handle = BindingSetHandle(state.next_handle());
        state.binding_sets.insert(handle);
        Ok(handle)
    }

    fn destroy_binding_set(&self, set: BindingSetHandle) {
        self.lock("destroy_binding_set").binding_sets.remove(&set);
    }
}

fn all_types_mask(count: usize) -> u32 {
    if count >= 32 {
        u32::MAX
    } else {
        (1u32 << count) - 1
    }
}

/// Adapter that creates [`SoftwareDevice`]s.
#[derive(Debug, Clone, Default)]
pub struct SoftwareAdapter {
    config: SoftwareConfig,
}

impl SoftwareAdapter {
    /// Create an adapter.
    pub fn new(config: SoftwareConfig) -> Self {
        Self { config }
    }

    /// Create a device, keeping the concrete type for inspection.
    pub fn create_software_device(&self) -> Arc<SoftwareDevice> {
        log::debug!("creating software device `{}`", self.config.name);
        Arc::new(SoftwareDevice::new(self.config.clone()))
    }
}

impl NativeAdapter for SoftwareAdapter {
    fn info(&self) -> AdapterInfo {
        AdapterInfo {
            name: self.config.name.clone(),
            backend: BackendKind::Software,
            vendor_id: 0,
            device_id: 0,
        }
    }

    fn create_device(&self) -> NativeResult<Arc<dyn NativeDevice>> {
        Ok(self.create_software_device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload_memory(device: &SoftwareDevice, size: u64) -> MemoryHandle {
        device.allocate_memory(1, size).unwrap()
    }

    #[test]
    fn test_non_coherent_write_needs_flush() {
        let device = SoftwareDevice::new(SoftwareConfig::new());
        let memory = upload_memory(&device, 256);
        let ptr = device.map_memory(memory).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0xAB, 128) };

        assert_eq!(device.read_device_memory(memory, 0, 4).unwrap(), vec![0; 4]);
        device
            .flush_mapped_ranges(&[MappedRange {
                memory,
                offset: 0,
                size: 128,
            }])
            .unwrap();
        assert_eq!(device.read_device_memory(memory, 0, 4).unwrap(), vec![0xAB; 4]);
        device.unmap_memory(memory);
    }

    #[test]
    fn test_unaligned_flush_rejected() {
        let device = SoftwareDevice::new(SoftwareConfig::new());
        let memory = upload_memory(&device, 256);
        device.map_memory(memory).unwrap();
        let error = device
            .flush_mapped_ranges(&[MappedRange {
                memory,
                offset: 3,
                size: 10,
            }])
            .unwrap_err();
        assert_eq!(error.kind, NativeErrorKind::Other);
    }

    #[test]
    fn test_flush_to_allocation_end_allowed() {
        let device = SoftwareDevice::new(SoftwareConfig::new());
        let memory = upload_memory(&device, 100);
        device.map_memory(memory).unwrap();
        device
            .flush_mapped_ranges(&[MappedRange {
                memory,
                offset: 64,
                size: 36,
            }])
            .unwrap();
    }

    #[test]
    fn test_memory_budget() {
        let device = SoftwareDevice::new(SoftwareConfig::new().with_memory_budget(1024));
        let first = device.allocate_memory(0, 1024).unwrap();
        let error = device.allocate_memory(0, 1).unwrap_err();
        assert!(error.is_out_of_memory());
        device.free_memory(first);
        assert_eq!(device.allocated_bytes(), 0);
        device.allocate_memory(0, 512).unwrap();
    }

    #[test]
    fn test_device_local_cannot_map() {
        let device = SoftwareDevice::new(SoftwareConfig::new());
        let memory = device.allocate_memory(0, 256).unwrap();
        assert!(device.map_memory(memory).is_err());
    }

    #[test]
    fn test_held_signal_blocks_wait() {
        let device = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let fence = device.create_fence(false).unwrap();
        device.hold_signals(fence);
        device.signal_fence(fence, 1).unwrap();
        assert!(!device
            .wait_fence(fence, 1, Some(Duration::from_millis(5)))
            .unwrap());

        let remote = Arc::clone(&device);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.release_signals(fence);
        });
        assert!(device.wait_fence(fence, 1, None).unwrap());
        handle.join().unwrap();
        assert_eq!(device.fence_completed_value(fence).unwrap(), 1);
    }

    #[test]
    fn test_barrier_state_mismatch_fails_submit() {
        let device = SoftwareDevice::new(SoftwareConfig::new());
        let (buffer, _) = device
            .create_buffer(&BufferDescriptor {
                kind: BufferKind::Vertex,
                cpu_access: CpuAccess::GpuOnly,
                size: 64,
            })
            .unwrap();
        let allocator = device.create_command_allocator().unwrap();
        let list = device.create_command_list(allocator).unwrap();
        device.begin_command_list(list).unwrap();
        device
            .record(
                list,
                &Command::Barrier(vec![ResourceBarrier {
                    resource: NativeResource::Buffer(buffer),
                    before: ResourceState::Common,
                    after: ResourceState::CopyDest,
                }]),
            )
            .unwrap();
        device.close_command_list(list).unwrap();
        assert!(device.submit(list).is_err());
    }

    #[test]
    fn test_swapchain_round_robin_and_out_of_date() {
        let device = SoftwareDevice::new(SoftwareConfig::new().with_presentation(2, 3));
        let fence = device.create_fence(false).unwrap();
        let (swapchain, count) = device
            .create_swapchain(&SwapchainDescriptor {
                extent: Extent2d::new(4, 4),
                format: TexelFormat::B8G8R8A8Unorm,
                image_count: 5,
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(device.acquire_next_image(swapchain, fence, 1).unwrap(), 0);
        assert_eq!(device.acquire_next_image(swapchain, fence, 2).unwrap(), 1);
        assert_eq!(device.fence_completed_value(fence).unwrap(), 2);

        device.set_surface_extent(Extent2d::new(8, 8));
        let error = device.present(swapchain, 0).unwrap_err();
        assert_eq!(error.kind, NativeErrorKind::SwapchainOutOfDate);
    }

    #[test]
    fn test_encode_clear_color() {
        assert_eq!(
            encode_clear_color(TexelFormat::B8G8R8A8Unorm, [1.0, 0.0, 0.5, 1.0]),
            vec![128, 0, 255, 255]
        );
        assert_eq!(encode_clear_color(TexelFormat::R8Unorm, [2.0, 0.0, 0.0, 0.0]), vec![255]);
    }
}
