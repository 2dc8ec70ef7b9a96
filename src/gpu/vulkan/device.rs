//! [`NativeDevice`] on a Vulkan logical device.

use std::collections::HashMap;
use std::ffi::CString;
use std::io::Cursor;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ash::extensions::khr;
use ash::vk::{self, Handle};

use super::conv::{self, native_error, unknown_handle};
use super::{VulkanInstance, VulkanSurface};
use crate::gpu::traits::{NativeDevice, NativeResult};
use crate::gpu::types::*;
use crate::sync::mutex::{Condvar, Mutex};

/// Per-image data the barrier encoder needs.
pub(super) struct ImageInfo {
    /// Linear images are only ever used in the general layout.
    pub linear: bool,
    /// Layout before the first transition; taken by the first barrier.
    pub initial: Option<vk::ImageLayout>,
}

impl ImageInfo {
    pub fn layout(&self, state: ResourceState) -> vk::ImageLayout {
        if self.linear {
            vk::ImageLayout::GENERAL
        } else {
            conv::map_state(state).layout
        }
    }
}

struct Signature {
    set_layout: vk::DescriptorSetLayout,
    resources: Vec<PipelineResource>,
}

struct BindingSet {
    pool: vk::DescriptorPool,
    views: Vec<vk::ImageView>,
}

/// Objects that carry data beyond their raw handle.
#[derive(Default)]
pub(super) struct Objects {
    pub images: HashMap<vk::Image, ImageInfo>,
    swapchains: HashMap<SwapchainHandle, Vec<vk::Image>>,
    render_targets: HashMap<RenderTargetViewHandle, vk::ImageView>,
    shaders: HashMap<ShaderHandle, CString>,
    signatures: HashMap<SignatureHandle, Signature>,
    binding_sets: HashMap<BindingSetHandle, BindingSet>,
}

/// Binary fences driven with monotonically increasing values.
struct FenceState {
    raw: vk::Fence,
    /// Highest value whose signal has been queued.
    submitted: u64,
    /// Highest value observed as reached.
    completed: u64,
}

/// A Vulkan logical device with a single graphics queue.
pub struct VulkanDevice {
    pub(super) raw: ash::Device,
    // Destroyed after the device.
    _instance: Arc<VulkanInstance>,
    physical: vk::PhysicalDevice,
    queue_family: u32,
    info: AdapterInfo,
    limits: DeviceLimits,
    memory_types: Vec<MemoryType>,
    row_pitch_alignment: u64,
    queue: Mutex<vk::Queue>,
    surface: Option<Arc<VulkanSurface>>,
    swapchain_loader: Option<khr::Swapchain>,
    sampler: vk::Sampler,
    pub(super) objects: Mutex<Objects>,
    fences: Mutex<HashMap<FenceHandle, FenceState>>,
    fence_submitted: Condvar,
}

impl VulkanDevice {
    pub(super) fn new(
        instance: Arc<VulkanInstance>,
        physical: vk::PhysicalDevice,
        queue_family: u32,
        info: AdapterInfo,
        surface: Option<Arc<VulkanSurface>>,
        raw: ash::Device,
    ) -> NativeResult<Self> {
        let mut maintenance3 = vk::PhysicalDeviceMaintenance3Properties::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut maintenance3)
            .build();
        unsafe {
            instance
                .raw
                .get_physical_device_properties2(physical, &mut properties2)
        };
        let limits = properties2.properties.limits;
        let memory_properties =
            unsafe { instance.raw.get_physical_device_memory_properties(physical) };
        let memory_types = memory_properties.memory_types
            [..memory_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .map(|(index, memory_type)| MemoryType {
                index: index as u32,
                properties: conv::map_memory_properties(memory_type.property_flags),
                heap_size: memory_properties.memory_heaps[memory_type.heap_index as usize].size,
            })
            .collect();

        let queue = unsafe { raw.get_device_queue(queue_family, 0) };
        let swapchain_loader = surface
            .as_ref()
            .map(|_| khr::Swapchain::new(&instance.raw, &raw));

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = match unsafe { raw.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(native_error("create_sampler", e));
            }
        };

        Ok(Self {
            raw,
            _instance: instance,
            physical,
            queue_family,
            info,
            limits: DeviceLimits {
                non_coherent_atom_size: limits.non_coherent_atom_size,
                max_memory_allocation_size: maintenance3.max_memory_allocation_size,
                constant_buffer_alignment: limits.min_uniform_buffer_offset_alignment,
            },
            memory_types,
            row_pitch_alignment: limits.optimal_buffer_copy_row_pitch_alignment,
            queue: Mutex::new(queue),
            surface,
            swapchain_loader,
            sampler,
            objects: Mutex::new(Objects::default()),
            fences: Mutex::new(HashMap::new()),
            fence_submitted: Condvar::new(),
        })
    }

    fn surface(&self, api: &'static str) -> NativeResult<(&VulkanSurface, &khr::Swapchain)> {
        match (&self.surface, &self.swapchain_loader) {
            (Some(surface), Some(loader)) => Ok((surface.as_ref(), loader)),
            _ => Err(native_error(api, vk::Result::ERROR_SURFACE_LOST_KHR)),
        }
    }

    fn create_view(
        &self,
        image: vk::Image,
        view_type: vk::ImageViewType,
        format: TexelFormat,
    ) -> NativeResult<vk::ImageView> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(conv::map_texel_format(format))
            .subresource_range(conv::color_subresource_range());
        unsafe { self.raw.create_image_view(&info, None) }
            .map_err(|e| native_error("create_image_view", e))
    }

    fn destroy_binding_objects(&self, set: BindingSet) {
        unsafe {
            for view in set.views {
                self.raw.destroy_image_view(view, None);
            }
            self.raw.destroy_descriptor_pool(set.pool, None);
        }
    }
}

impl NativeDevice for VulkanDevice {
    fn adapter_info(&self) -> AdapterInfo {
        self.info.clone()
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn memory_types(&self) -> Vec<MemoryType> {
        self.memory_types.clone()
    }

    fn allocate_memory(&self, memory_type: u32, size: u64) -> NativeResult<MemoryHandle> {
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);
        let memory = unsafe { self.raw.allocate_memory(&info, None) }
            .map_err(|e| native_error("allocate_memory", e))?;
        Ok(MemoryHandle(memory.as_raw()))
    }

    fn free_memory(&self, memory: MemoryHandle) {
        unsafe { self.raw.free_memory(vk::DeviceMemory::from_raw(memory.0), None) };
    }

    fn map_memory(&self, memory: MemoryHandle) -> NativeResult<NonNull<u8>> {
        const API: &str = "map_memory";
        let ptr = unsafe {
            self.raw.map_memory(
                vk::DeviceMemory::from_raw(memory.0),
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )
        }
        .map_err(|e| native_error(API, e))?;
        NonNull::new(ptr.cast::<u8>()).ok_or_else(|| native_error(API, vk::Result::ERROR_MEMORY_MAP_FAILED))
    }

    fn unmap_memory(&self, memory: MemoryHandle) {
        unsafe { self.raw.unmap_memory(vk::DeviceMemory::from_raw(memory.0)) };
    }

    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()> {
        let ranges = map_ranges(ranges);
        unsafe { self.raw.flush_mapped_memory_ranges(&ranges) }
            .map_err(|e| native_error("flush_mapped_memory_ranges", e))
    }

    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()> {
        let ranges = map_ranges(ranges);
        unsafe { self.raw.invalidate_mapped_memory_ranges(&ranges) }
            .map_err(|e| native_error("invalidate_mapped_memory_ranges", e))
    }

    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
    ) -> NativeResult<(BufferHandle, MemoryRequirements)> {
        let info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(conv::map_buffer_usage(desc.kind))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.raw.create_buffer(&info, None) }
            .map_err(|e| native_error("create_buffer", e))?;
        let requirements = unsafe { self.raw.get_buffer_memory_requirements(buffer) };
        Ok((BufferHandle(buffer.as_raw()), map_requirements(requirements)))
    }

    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()> {
        unsafe {
            self.raw.bind_buffer_memory(
                vk::Buffer::from_raw(buffer.0),
                vk::DeviceMemory::from_raw(memory.0),
                offset,
            )
        }
        .map_err(|e| native_error("bind_buffer_memory", e))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        unsafe { self.raw.destroy_buffer(vk::Buffer::from_raw(buffer.0), None) };
    }

    fn create_image(
        &self,
        desc: &TextureDescriptor,
    ) -> NativeResult<(ImageHandle, MemoryRequirements)> {
        let (image_type, _) = conv::map_texture_kind(desc.kind);
        let linear = desc.cpu_access.is_cpu_visible();
        let initial = if linear {
            vk::ImageLayout::PREINITIALIZED
        } else {
            vk::ImageLayout::UNDEFINED
        };
        let info = vk::ImageCreateInfo::builder()
            .image_type(image_type)
            .format(conv::map_texel_format(desc.format))
            .extent(conv::map_extent_3d(desc.extent()))
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(conv::map_tiling(desc.cpu_access))
            .usage(
                vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::SAMPLED,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(initial);
        let image = unsafe { self.raw.create_image(&info, None) }
            .map_err(|e| native_error("create_image", e))?;
        let requirements = unsafe { self.raw.get_image_memory_requirements(image) };
        self.objects.lock().images.insert(
            image,
            ImageInfo {
                linear,
                initial: Some(initial),
            },
        );
        Ok((ImageHandle(image.as_raw()), map_requirements(requirements)))
    }

    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()> {
        unsafe {
            self.raw.bind_image_memory(
                vk::Image::from_raw(image.0),
                vk::DeviceMemory::from_raw(memory.0),
                offset,
            )
        }
        .map_err(|e| native_error("bind_image_memory", e))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let raw = vk::Image::from_raw(image.0);
        self.objects.lock().images.remove(&raw);
        unsafe { self.raw.destroy_image(raw, None) };
    }

    fn copyable_footprint(&self, desc: &TextureDescriptor) -> CopyableFootprint {
        conv::copyable_footprint(desc, self.row_pitch_alignment)
    }

    fn create_fence(&self, signaled: bool) -> NativeResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        let raw = unsafe { self.raw.create_fence(&info, None) }
            .map_err(|e| native_error("create_fence", e))?;
        let handle = FenceHandle(raw.as_raw());
        self.fences.lock().insert(
            handle,
            FenceState {
                raw,
                submitted: 0,
                completed: 0,
            },
        );
        Ok(handle)
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        if let Some(state) = self.fences.lock().remove(&fence) {
            unsafe { self.raw.destroy_fence(state.raw, None) };
        }
    }

    fn signal_fence(&self, fence: FenceHandle, value: u64) -> NativeResult<()> {
        const API: &str = "signal_fence";
        let mut fences = self.fences.lock();
        let state = fences.get_mut(&fence).ok_or_else(|| unknown_handle(API))?;
        // A binary fence may only be queued once per reset.
        if value <= state.submitted {
            return Ok(());
        }
        {
            let queue = self.queue.lock();
            unsafe { self.raw.queue_submit(*queue, &[], state.raw) }
                .map_err(|e| native_error(API, e))?;
        }
        state.submitted = value;
        drop(fences);
        self.fence_submitted.notify_all();
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
        let mut fences = self.fences.lock();
        let (raw, target) = loop {
            let state = fences.get(&fence).ok_or_else(|| unknown_handle(API))?;
            if state.completed >= value {
                return Ok(true);
            }
            if state.submitted >= value {
                break (state.raw, state.submitted);
            }
            // Nothing queued yet; wait for another thread to queue the signal.
            match deadline {
                None => fences = self.fence_submitted.wait(fences),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    fences = self.fence_submitted.wait_for(fences, deadline - now).0;
                }
            }
        };
        drop(fences);

        let timeout_ns = deadline.map_or(u64::MAX, |deadline| {
            deadline.saturating_duration_since(Instant::now()).as_nanos() as u64
        });
        match unsafe { self.raw.wait_for_fences(&[raw], true, timeout_ns) } {
            Ok(()) => {
                if let Some(state) = self.fences.lock().get_mut(&fence) {
                    state.completed = state.completed.max(target);
                }
                Ok(true)
            }
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(native_error(API, e)),
        }
    }

    fn fence_completed_value(&self, fence: FenceHandle) -> NativeResult<u64> {
        const API: &str = "fence_completed_value";
        let mut fences = self.fences.lock();
        let state = fences.get_mut(&fence).ok_or_else(|| unknown_handle(API))?;
        if state.completed < state.submitted
            && unsafe { self.raw.get_fence_status(state.raw) }.map_err(|e| native_error(API, e))?
        {
            state.completed = state.submitted;
        }
        Ok(state.completed)
    }

    fn reset_fence(&self, fence: FenceHandle) -> NativeResult<()> {
        const API: &str = "reset_fence";
        let fences = self.fences.lock();
        let state = fences.get(&fence).ok_or_else(|| unknown_handle(API))?;
        unsafe { self.raw.reset_fences(&[state.raw]) }.map_err(|e| native_error(API, e))
    }

    fn wait_idle(&self) -> NativeResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.raw.device_wait_idle() }.map_err(|e| native_error("device_wait_idle", e))
    }

    fn create_command_allocator(&self) -> NativeResult<CommandAllocatorHandle> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.queue_family);
        let pool = unsafe { self.raw.create_command_pool(&info, None) }
            .map_err(|e| native_error("create_command_pool", e))?;
        Ok(CommandAllocatorHandle(pool.as_raw()))
    }

    fn destroy_command_allocator(&self, allocator: CommandAllocatorHandle) {
        unsafe {
            self.raw
                .destroy_command_pool(vk::CommandPool::from_raw(allocator.0), None)
        };
    }

    fn reset_command_allocator(&self, allocator: CommandAllocatorHandle) -> NativeResult<()> {
        unsafe {
            self.raw.reset_command_pool(
                vk::CommandPool::from_raw(allocator.0),
                vk::CommandPoolResetFlags::empty(),
            )
        }
        .map_err(|e| native_error("reset_command_pool", e))
    }

    fn create_command_list(
        &self,
        allocator: CommandAllocatorHandle,
    ) -> NativeResult<CommandListHandle> {
        const API: &str = "allocate_command_buffers";
        let info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(vk::CommandPool::from_raw(allocator.0))
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let list = unsafe { self.raw.allocate_command_buffers(&info) }
            .map_err(|e| native_error(API, e))?
            .pop()
            .ok_or_else(|| unknown_handle(API))?;
        Ok(CommandListHandle(list.as_raw()))
    }

    fn destroy_command_list(&self, allocator: CommandAllocatorHandle, list: CommandListHandle) {
        unsafe {
            self.raw.free_command_buffers(
                vk::CommandPool::from_raw(allocator.0),
                &[vk::CommandBuffer::from_raw(list.0)],
            )
        };
    }

    fn begin_command_list(&self, list: CommandListHandle) -> NativeResult<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.raw
                .begin_command_buffer(vk::CommandBuffer::from_raw(list.0), &info)
        }
        .map_err(|e| native_error("begin_command_buffer", e))
    }

    fn record(&self, list: CommandListHandle, command: &Command) -> NativeResult<()> {
        let mut objects = self.objects.lock();
        self.encode(&mut objects, vk::CommandBuffer::from_raw(list.0), command)
    }

    fn close_command_list(&self, list: CommandListHandle) -> NativeResult<()> {
        unsafe { self.raw.end_command_buffer(vk::CommandBuffer::from_raw(list.0)) }
            .map_err(|e| native_error("end_command_buffer", e))
    }

    fn submit(&self, list: CommandListHandle) -> NativeResult<()> {
        let buffers = [vk::CommandBuffer::from_raw(list.0)];
        let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
        let queue = self.queue.lock();
        unsafe { self.raw.queue_submit(*queue, &[submit], vk::Fence::null()) }
            .map_err(|e| native_error("queue_submit", e))
    }

    fn presentation_capabilities(&self) -> Option<PresentationCapabilities> {
        let surface = self.surface.as_ref()?;
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(self.physical, surface.raw)
        };
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(self.physical, surface.raw)
        };
        match (capabilities, formats) {
            (Ok(capabilities), Ok(formats)) => Some(PresentationCapabilities {
                min_image_count: capabilities.min_image_count,
                max_image_count: match capabilities.max_image_count {
                    0 => u32::MAX,
                    max => max,
                },
                formats: formats
                    .iter()
                    .filter(|format| format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
                    .filter_map(|format| conv::map_vk_format(format.format))
                    .collect(),
            }),
            (Err(e), _) | (_, Err(e)) => {
                log::warn!("surface query failed: {e}");
                None
            }
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDescriptor,
    ) -> NativeResult<(SwapchainHandle, u32)> {
        const API: &str = "create_swapchain";
        let (surface, loader) = self.surface(API)?;
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(self.physical, surface.raw)
        }
        .map_err(|e| native_error(API, e))?;

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.raw)
            .min_image_count(desc.image_count)
            .image_format(conv::map_texel_format(desc.format))
            .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .image_extent(conv::map_extent_2d(desc.extent))
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);
        let swapchain = unsafe { loader.create_swapchain(&info, None) }
            .map_err(|e| native_error(API, e))?;
        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(native_error("get_swapchain_images", e));
            }
        };

        let handle = SwapchainHandle(swapchain.as_raw());
        let count = images.len() as u32;
        let mut objects = self.objects.lock();
        for image in &images {
            objects.images.insert(
                *image,
                ImageInfo {
                    linear: false,
                    initial: Some(vk::ImageLayout::UNDEFINED),
                },
            );
        }
        objects.swapchains.insert(handle, images);
        log::debug!(
            "created swapchain {}x{} with {count} images",
            desc.extent.width,
            desc.extent.height
        );
        Ok((handle, count))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let Some(loader) = self.swapchain_loader.as_ref() else {
            return;
        };
        let mut objects = self.objects.lock();
        if let Some(images) = objects.swapchains.remove(&swapchain) {
            for image in images {
                objects.images.remove(&image);
            }
        }
        drop(objects);
        unsafe { loader.destroy_swapchain(vk::SwapchainKHR::from_raw(swapchain.0), None) };
    }

    fn swapchain_image(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<ImageHandle> {
        self.objects
            .lock()
            .swapchains
            .get(&swapchain)
            .and_then(|images| images.get(index as usize))
            .map(|image| ImageHandle(image.as_raw()))
            .ok_or_else(|| unknown_handle("swapchain_image"))
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        fence: FenceHandle,
        value: u64,
    ) -> NativeResult<u32> {
        const API: &str = "acquire_next_image";
        let (_, loader) = self.surface(API)?;
        let mut fences = self.fences.lock();
        let state = fences.get_mut(&fence).ok_or_else(|| unknown_handle(API))?;
        let (index, suboptimal) = unsafe {
            loader.acquire_next_image(
                vk::SwapchainKHR::from_raw(swapchain.0),
                u64::MAX,
                vk::Semaphore::null(),
                state.raw,
            )
        }
        .map_err(|e| native_error(API, e))?;
        if suboptimal {
            log::debug!("acquired suboptimal swapchain image {index}");
        }
        state.submitted = state.submitted.max(value);
        drop(fences);
        self.fence_submitted.notify_all();
        Ok(index)
    }

    fn present(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<()> {
        const API: &str = "queue_present";
        let (_, loader) = self.surface(API)?;
        let swapchains = [vk::SwapchainKHR::from_raw(swapchain.0)];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&indices);
        let queue = self.queue.lock();
        unsafe { loader.queue_present(*queue, &info) }
            .map(|_suboptimal| ())
            .map_err(|e| native_error(API, e))
    }

    fn create_render_pass(&self, format: TexelFormat) -> NativeResult<RenderPassHandle> {
        let attachments = [vk::AttachmentDescription::builder()
            .format(conv::map_texel_format(format))
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()];
        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let subpasses = [vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build()];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);
        let render_pass = unsafe { self.raw.create_render_pass(&info, None) }
            .map_err(|e| native_error("create_render_pass", e))?;
        Ok(RenderPassHandle(render_pass.as_raw()))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe {
            self.raw
                .destroy_render_pass(vk::RenderPass::from_raw(render_pass.0), None)
        };
    }

    fn create_render_target_view(
        &self,
        image: ImageHandle,
        format: TexelFormat,
        extent: Extent2d,
        render_pass: RenderPassHandle,
    ) -> NativeResult<RenderTargetViewHandle> {
        let view = self.create_view(
            vk::Image::from_raw(image.0),
            vk::ImageViewType::TYPE_2D,
            format,
        )?;
        let attachments = [view];
        let info = vk::FramebufferCreateInfo::builder()
            .render_pass(vk::RenderPass::from_raw(render_pass.0))
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = match unsafe { self.raw.create_framebuffer(&info, None) } {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                unsafe { self.raw.destroy_image_view(view, None) };
                return Err(native_error("create_framebuffer", e));
            }
        };
        let handle = RenderTargetViewHandle(framebuffer.as_raw());
        self.objects.lock().render_targets.insert(handle, view);
        Ok(handle)
    }

    fn destroy_render_target_view(&self, view: RenderTargetViewHandle) {
        let image_view = self.objects.lock().render_targets.remove(&view);
        unsafe {
            self.raw
                .destroy_framebuffer(vk::Framebuffer::from_raw(view.0), None);
            if let Some(image_view) = image_view {
                self.raw.destroy_image_view(image_view, None);
            }
        }
    }

    fn create_shader(
        &self,
        _kind: ShaderKind,
        bytecode: &[u8],
        entry_point: &str,
    ) -> NativeResult<ShaderHandle> {
        const API: &str = "create_shader_module";
        let code = ash::util::read_spv(&mut Cursor::new(bytecode))
            .map_err(|_| native_error(API, vk::Result::ERROR_INVALID_SHADER_NV))?;
        let entry_point = CString::new(entry_point)
            .map_err(|_| native_error(API, vk::Result::ERROR_INITIALIZATION_FAILED))?;
        let info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { self.raw.create_shader_module(&info, None) }
            .map_err(|e| native_error(API, e))?;
        let handle = ShaderHandle(module.as_raw());
        self.objects.lock().shaders.insert(handle, entry_point);
        Ok(handle)
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.objects.lock().shaders.remove(&shader);
        unsafe {
            self.raw
                .destroy_shader_module(vk::ShaderModule::from_raw(shader.0), None)
        };
    }

    fn create_signature(
        &self,
        _inputs: &[InputElement],
        resources: &[PipelineResource],
    ) -> NativeResult<SignatureHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = resources
            .iter()
            .enumerate()
            .map(|(binding, resource)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding as u32)
                    .descriptor_type(conv::map_binding_kind(resource.kind))
                    .descriptor_count(1)
                    .stage_flags(conv::map_shader_visibility(resource.visibility))
                    .build()
            })
            .collect();
        let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let set_layout = unsafe { self.raw.create_descriptor_set_layout(&set_layout_info, None) }
            .map_err(|e| native_error("create_descriptor_set_layout", e))?;

        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = match unsafe { self.raw.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { self.raw.destroy_descriptor_set_layout(set_layout, None) };
                return Err(native_error("create_pipeline_layout", e));
            }
        };
        let handle = SignatureHandle(layout.as_raw());
        self.objects.lock().signatures.insert(
            handle,
            Signature {
                set_layout,
                resources: resources.to_vec(),
            },
        );
        Ok(handle)
    }

    fn destroy_signature(&self, signature: SignatureHandle) {
        let removed = self.objects.lock().signatures.remove(&signature);
        unsafe {
            self.raw
                .destroy_pipeline_layout(vk::PipelineLayout::from_raw(signature.0), None);
            if let Some(removed) = removed {
                self.raw.destroy_descriptor_set_layout(removed.set_layout, None);
            }
        }
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        inputs: &[InputElement],
    ) -> NativeResult<PipelineHandle> {
        const API: &str = "create_graphics_pipelines";
        let objects = self.objects.lock();
        let mut stages = Vec::with_capacity(2);
        for (shader, stage) in [
            (desc.vertex_shader, vk::ShaderStageFlags::VERTEX),
            (desc.pixel_shader, vk::ShaderStageFlags::FRAGMENT),
        ] {
            let Some(shader) = shader else {
                continue;
            };
            let entry_point = objects.shaders.get(&shader).ok_or_else(|| unknown_handle(API))?;
            stages.push(
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage)
                    .module(vk::ShaderModule::from_raw(shader.0))
                    .name(entry_point)
                    .build(),
            );
        }

        let mut offset = 0;
        let attributes: Vec<vk::VertexInputAttributeDescription> = inputs
            .iter()
            .enumerate()
            .map(|(location, element)| {
                let attribute = vk::VertexInputAttributeDescription {
                    location: location as u32,
                    binding: 0,
                    format: conv::map_element_format(element.format),
                    offset,
                };
                offset += element.format.size();
                attribute
            })
            .collect();
        let binding = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: offset,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_bindings: &[vk::VertexInputBindingDescription] =
            if inputs.is_empty() { &[] } else { &binding };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(vertex_bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .build()];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(vk::PipelineLayout::from_raw(desc.signature.0))
            .render_pass(vk::RenderPass::from_raw(desc.render_pass.0))
            .subpass(0)
            .build();
        let pipeline = unsafe {
            self.raw
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        }
        .map_err(|(_, e)| native_error(API, e))?
        .pop()
        .ok_or_else(|| unknown_handle(API))?;
        Ok(PipelineHandle(pipeline.as_raw()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe { self.raw.destroy_pipeline(vk::Pipeline::from_raw(pipeline.0), None) };
    }

    fn create_binding_set(
        &self,
        signature: SignatureHandle,
        resources: &[BindingResource],
    ) -> NativeResult<BindingSetHandle> {
        const API: &str = "create_binding_set";
        let mut objects = self.objects.lock();
        let layout = objects.signatures.get(&signature).ok_or_else(|| unknown_handle(API))?;
        if layout.resources.len() != resources.len() {
            return Err(native_error(API, vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        let set_layouts = [layout.set_layout];

        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for slot in &layout.resources {
            let ty = conv::map_binding_kind(slot.kind);
            match pool_sizes.iter_mut().find(|size| size.ty == ty) {
                Some(size) => size.descriptor_count += 1,
                None => pool_sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: 1,
                }),
            }
        }
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = unsafe { self.raw.create_descriptor_pool(&pool_info, None) }
            .map_err(|e| native_error("create_descriptor_pool", e))?;
        let mut binding = BindingSet {
            pool,
            views: Vec::new(),
        };

        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = match unsafe { self.raw.allocate_descriptor_sets(&allocate_info) } {
            Ok(mut sets) => sets.pop(),
            Err(e) => {
                self.destroy_binding_objects(binding);
                return Err(native_error("allocate_descriptor_sets", e));
            }
        };
        let Some(set) = set else {
            self.destroy_binding_objects(binding);
            return Err(unknown_handle("allocate_descriptor_sets"));
        };

        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for resource in resources {
            match *resource {
                BindingResource::ConstantBuffer {
                    buffer,
                    offset,
                    size,
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: vk::Buffer::from_raw(buffer.0),
                    offset,
                    range: size,
                }),
                BindingResource::Texture { image, format } => {
                    let view = match self.create_view(
                        vk::Image::from_raw(image.0),
                        vk::ImageViewType::TYPE_2D,
                        format,
                    ) {
                        Ok(view) => view,
                        Err(e) => {
                            self.destroy_binding_objects(binding);
                            return Err(e);
                        }
                    };
                    binding.views.push(view);
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: self.sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                }
            }
        }

        let (mut next_buffer, mut next_image) = (0, 0);
        let writes: Vec<vk::WriteDescriptorSet> = resources
            .iter()
            .enumerate()
            .map(|(index, resource)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(index as u32);
                match resource {
                    BindingResource::ConstantBuffer { .. } => {
                        next_buffer += 1;
                        write
                            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                            .buffer_info(&buffer_infos[next_buffer - 1..next_buffer])
                            .build()
                    }
                    BindingResource::Texture { .. } => {
                        next_image += 1;
                        write
                            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                            .image_info(&image_infos[next_image - 1..next_image])
                            .build()
                    }
                }
            })
            .collect();
        unsafe { self.raw.update_descriptor_sets(&writes, &[]) };

        let handle = BindingSetHandle(set.as_raw());
        objects.binding_sets.insert(handle, binding);
        Ok(handle)
    }

    fn destroy_binding_set(&self, set: BindingSetHandle) {
        if let Some(binding) = self.objects.lock().binding_sets.remove(&set) {
            self.destroy_binding_objects(binding);
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.raw.device_wait_idle() {
                log::warn!("device_wait_idle failed while dropping the device: {e}");
            }
            for (_, state) in self.fences.lock().drain() {
                self.raw.destroy_fence(state.raw, None);
            }
            self.raw.destroy_sampler(self.sampler, None);
            self.raw.destroy_device(None);
        }
        log::debug!("destroyed vulkan device on {}", self.info.name);
    }
}

fn map_ranges(ranges: &[MappedRange]) -> Vec<vk::MappedMemoryRange> {
    ranges
        .iter()
        .map(|range| {
            vk::MappedMemoryRange::builder()
                .memory(vk::DeviceMemory::from_raw(range.memory.0))
                .offset(range.offset)
                .size(range.size)
                .build()
        })
        .collect()
}

fn map_requirements(requirements: vk::MemoryRequirements) -> MemoryRequirements {
    MemoryRequirements {
        size: requirements.size,
        alignment: requirements.alignment,
        memory_type_bits: requirements.memory_type_bits,
    }
}
