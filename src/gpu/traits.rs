//! Native backend interface.
//!
//! The object model (allocator, resources, contexts, device) is written once
//! against [`NativeDevice`]. A backend only translates these calls to its API;
//! it owns no policy. All methods take `&self`: backends synchronize
//! internally, and the object model serializes calls where the native API
//! demands it (one command list per context, one queue per device).

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use crate::error::NativeError;
use crate::gpu::types::*;

/// Result of a native call.
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// A logical device as seen by a backend.
pub trait NativeDevice: Send + Sync {
    /// Adapter this device was created from.
    fn adapter_info(&self) -> AdapterInfo;

    /// Limits the object model relies on.
    fn limits(&self) -> DeviceLimits;

    /// Available memory types, indexed by [`MemoryType::index`].
    fn memory_types(&self) -> Vec<MemoryType>;

    // Memory

    /// Allocate `size` bytes from memory type `memory_type`.
    fn allocate_memory(&self, memory_type: u32, size: u64) -> NativeResult<MemoryHandle>;

    /// Release an allocation. Must not be mapped.
    fn free_memory(&self, memory: MemoryHandle);

    /// Map a whole allocation. Only valid for host-visible memory.
    fn map_memory(&self, memory: MemoryHandle) -> NativeResult<NonNull<u8>>;

    /// Unmap a previously mapped allocation.
    fn unmap_memory(&self, memory: MemoryHandle);

    /// Make CPU writes visible to the device. Ranges must be atom aligned or
    /// end at the allocation end.
    fn flush_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()>;

    /// Make device writes visible to the CPU. Same range rules as flushing.
    fn invalidate_mapped_ranges(&self, ranges: &[MappedRange]) -> NativeResult<()>;

    // Resources

    /// Create an unbound buffer.
    fn create_buffer(
        &self,
        desc: &BufferDescriptor,
    ) -> NativeResult<(BufferHandle, MemoryRequirements)>;

    /// Bind memory to a buffer.
    fn bind_buffer_memory(
        &self,
        buffer: BufferHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()>;

    /// Destroy a buffer.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create an unbound image.
    fn create_image(&self, desc: &TextureDescriptor)
        -> NativeResult<(ImageHandle, MemoryRequirements)>;

    /// Bind memory to an image.
    fn bind_image_memory(
        &self,
        image: ImageHandle,
        memory: MemoryHandle,
        offset: u64,
    ) -> NativeResult<()>;

    /// Destroy an image.
    fn destroy_image(&self, image: ImageHandle);

    /// Layout a buffer must use to exchange data with a texture of `desc`.
    fn copyable_footprint(&self, desc: &TextureDescriptor) -> CopyableFootprint;

    // Fences

    /// Create a fence. A signalled fence starts with completed value 0 and
    /// pending value 0; an unsignalled one waits for value 1.
    fn create_fence(&self, signaled: bool) -> NativeResult<FenceHandle>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);

    /// Queue a signal of `value` after all previously submitted work.
    fn signal_fence(&self, fence: FenceHandle, value: u64) -> NativeResult<()>;

    /// Block until the fence reaches `value`. `None` waits forever.
    /// Returns `false` on timeout.
    fn wait_fence(
        &self,
        fence: FenceHandle,
        value: u64,
        timeout: Option<Duration>,
    ) -> NativeResult<bool>;

    /// Highest value the fence has reached.
    fn fence_completed_value(&self, fence: FenceHandle) -> NativeResult<u64>;

    /// Return a fence to the unsignalled state. Backends with timeline
    /// fences may treat this as a no-op.
    fn reset_fence(&self, fence: FenceHandle) -> NativeResult<()>;

    /// Block until the queue is idle.
    fn wait_idle(&self) -> NativeResult<()>;

    // Commands

    /// Create a command allocator.
    fn create_command_allocator(&self) -> NativeResult<CommandAllocatorHandle>;

    /// Destroy a command allocator and every list it owns.
    fn destroy_command_allocator(&self, allocator: CommandAllocatorHandle);

    /// Recycle all memory of lists allocated from `allocator`.
    fn reset_command_allocator(&self, allocator: CommandAllocatorHandle) -> NativeResult<()>;

    /// Create a command list in the closed state.
    fn create_command_list(
        &self,
        allocator: CommandAllocatorHandle,
    ) -> NativeResult<CommandListHandle>;

    /// Destroy a command list.
    fn destroy_command_list(&self, allocator: CommandAllocatorHandle, list: CommandListHandle);

    /// Open a list for recording, discarding previous contents.
    fn begin_command_list(&self, list: CommandListHandle) -> NativeResult<()>;

    /// Record one command.
    fn record(&self, list: CommandListHandle, command: &Command) -> NativeResult<()>;

    /// Close a list.
    fn close_command_list(&self, list: CommandListHandle) -> NativeResult<()>;

    /// Submit a closed list to the queue.
    fn submit(&self, list: CommandListHandle) -> NativeResult<()>;

    // Presentation

    /// Presentation support, or `None` for a headless device.
    fn presentation_capabilities(&self) -> Option<PresentationCapabilities>;

    /// Create a swapchain. Returns the handle and the actual image count.
    fn create_swapchain(&self, desc: &SwapchainDescriptor)
        -> NativeResult<(SwapchainHandle, u32)>;

    /// Destroy a swapchain.
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// The `index`th swapchain image.
    fn swapchain_image(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<ImageHandle>;

    /// Acquire the next image; `fence` reaches `value` once it is usable.
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        fence: FenceHandle,
        value: u64,
    ) -> NativeResult<u32>;

    /// Present image `index`.
    fn present(&self, swapchain: SwapchainHandle, index: u32) -> NativeResult<()>;

    // Rendering state

    /// Create a single-colour-attachment render pass that clears on load.
    fn create_render_pass(&self, format: TexelFormat) -> NativeResult<RenderPassHandle>;

    /// Destroy a render pass.
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a view of `image` usable as the target of `render_pass`.
    fn create_render_target_view(
        &self,
        image: ImageHandle,
        format: TexelFormat,
        extent: Extent2d,
        render_pass: RenderPassHandle,
    ) -> NativeResult<RenderTargetViewHandle>;

    /// Destroy a render-target view.
    fn destroy_render_target_view(&self, view: RenderTargetViewHandle);

    /// Create a shader module from backend bytecode.
    fn create_shader(
        &self,
        kind: ShaderKind,
        bytecode: &[u8],
        entry_point: &str,
    ) -> NativeResult<ShaderHandle>;

    /// Destroy a shader module.
    fn destroy_shader(&self, shader: ShaderHandle);

    /// Create a pipeline signature.
    fn create_signature(
        &self,
        inputs: &[InputElement],
        resources: &[PipelineResource],
    ) -> NativeResult<SignatureHandle>;

    /// Destroy a pipeline signature.
    fn destroy_signature(&self, signature: SignatureHandle);

    /// Create a graphics pipeline.
    fn create_pipeline(
        &self,
        desc: &PipelineDescriptor,
        inputs: &[InputElement],
    ) -> NativeResult<PipelineHandle>;

    /// Destroy a pipeline.
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    /// Bind resources for draws using `signature`.
    fn create_binding_set(
        &self,
        signature: SignatureHandle,
        resources: &[BindingResource],
    ) -> NativeResult<BindingSetHandle>;

    /// Destroy a binding set.
    fn destroy_binding_set(&self, set: BindingSetHandle);
}

/// A physical adapter that can create devices.
pub trait NativeAdapter: Send + Sync {
    /// Adapter description.
    fn info(&self) -> AdapterInfo;

    /// Create a logical device.
    fn create_device(&self) -> NativeResult<Arc<dyn NativeDevice>>;
}
