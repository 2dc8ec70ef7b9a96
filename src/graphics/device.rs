//! The graphics device: context pool, presentation and object factories.
//!
//! # Frame flow
//!
//! ```text
//! rent_render_context ─► begin_frame ─► copy / begin_drawing ─► draw ─► end_drawing
//!                                                                           │
//! present_frame ◄─ drop / return_render_context ◄───────────── end_frame ◄──┘
//! ```
//!
//! `present_frame` presents the current slot, signals its context fence,
//! acquires the next swapchain image and moves the slot index to it. Surface
//! size changes may be reported from any thread; they are queued and applied
//! by the next present or an explicit [`GraphicsDevice::resize`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use crate::api::config::DeviceDescriptor;
use crate::api::stats::AllocatorStats;
use crate::error::{GraphicsError, NativeError, NativeErrorKind, Result};
use crate::gpu::traits::{NativeDevice, NativeResult};
use crate::gpu::types::{
    AdapterInfo, BufferKind, CpuAccess, Extent2d, InputElement, PipelineDescriptor,
    PipelineResource, ShaderKind, SwapchainDescriptor, SwapchainHandle, TexelFormat,
    TextureDescriptor,
};
use crate::graphics::context::GraphicsContext;
use crate::graphics::fence::GraphicsFence;
use crate::graphics::pipeline::{
    GraphicsPipeline, GraphicsPipelineSignature, GraphicsRenderPass, GraphicsShader,
};
use crate::graphics::primitive::{GraphicsPrimitive, PrimitiveDescriptor};
use crate::graphics::resource::GraphicsResource;
use crate::graphics::surface::GraphicsSurface;
use crate::memory::allocator::MemoryAllocator;
use crate::sync::lifecycle::{Lifecycle, LifecycleState};
use crate::sync::mutex::{Mutex, MutexGuard};
use crate::util::lazy::ValueLazy;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a device. Every object records the device it was created on,
/// and factories reject objects of other devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(u64);

impl DeviceId {
    pub(crate) fn next() -> Self {
        Self(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Swapchain state of a device with a surface.
pub(crate) struct Presentation {
    pub(crate) surface: Arc<dyn GraphicsSurface>,
    pub(crate) format: TexelFormat,
    pub(crate) extent: Extent2d,
    pub(crate) image_count: u32,
    swapchain: ValueLazy<SwapchainHandle>,
    present_fence: GraphicsFence,
}

impl Presentation {
    pub(crate) fn swapchain(&self) -> Option<SwapchainHandle> {
        self.swapchain.get().copied()
    }

    /// Ask for the next image; the present fence reaches its value once the
    /// image is usable.
    fn request_image(&self, native: &dyn NativeDevice) -> NativeResult<u32> {
        let swapchain = self.swapchain().ok_or_else(|| {
            NativeError::new("acquire_next_image", 0, NativeErrorKind::Other)
        })?;
        native.acquire_next_image(
            swapchain,
            self.present_fence.handle(),
            self.present_fence.signal_value(),
        )
    }

    fn wait_for_image(&self) -> Result<()> {
        self.present_fence.wait()?;
        self.present_fence.reset()
    }

    /// Acquire the next image and wait until it is usable.
    fn acquire(&self, native: &dyn NativeDevice) -> Result<u32> {
        let index = self.request_image(native)?;
        self.wait_for_image()?;
        Ok(index)
    }
}

/// State shared between the device and its contexts.
pub(crate) struct DeviceShared {
    pub(crate) id: DeviceId,
    pub(crate) native: Arc<dyn NativeDevice>,
    pub(crate) allocator: Arc<MemoryAllocator>,
    pub(crate) render_target_format: TexelFormat,
    pub(crate) presentation: Option<Mutex<Presentation>>,
    render_pass: Mutex<ValueLazy<Arc<GraphicsRenderPass>>>,
}

impl DeviceShared {
    /// Render pass targeting the swapchain format, created on first use.
    pub(crate) fn render_pass(&self) -> Result<Arc<GraphicsRenderPass>> {
        let mut lazy = self.render_pass.lock();
        let pass = lazy.get_or_try_init(|| -> Result<_> {
            let handle = self.native.create_render_pass(self.render_target_format)?;
            Ok(Arc::new(GraphicsRenderPass::new(
                self.id,
                Arc::clone(&self.native),
                handle,
                self.render_target_format,
            )))
        })?;
        Ok(Arc::clone(pass))
    }

    /// Queue a signal of `fence`'s current value.
    pub(crate) fn signal(&self, fence: &GraphicsFence) -> Result<()> {
        if fence.device_id() != self.id {
            return Err(GraphicsError::invalid_argument(
                "fence",
                "belongs to a different device",
            ));
        }
        fence.ensure_alive()?;
        self.native
            .signal_fence(fence.handle(), fence.signal_value())?;
        Ok(())
    }
}

/// Exclusive lease on the render context of the current swapchain slot.
///
/// Dereferences to [`GraphicsContext`]. Dropping the lease returns the
/// context; a lease dropped in the middle of a frame discards the recorded
/// commands and reports `GX201`.
pub struct RenderContext<'a> {
    device_id: DeviceId,
    guard: MutexGuard<'a, GraphicsContext>,
}

impl RenderContext<'_> {
    /// Device the context belongs to.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl Deref for RenderContext<'_> {
    type Target = GraphicsContext;

    fn deref(&self) -> &GraphicsContext {
        &self.guard
    }
}

impl DerefMut for RenderContext<'_> {
    fn deref_mut(&mut self) -> &mut GraphicsContext {
        &mut self.guard
    }
}

impl Drop for RenderContext<'_> {
    fn drop(&mut self) {
        self.guard.abandon();
    }
}

impl fmt::Debug for RenderContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RenderContext").field(&*self.guard).finish()
    }
}

/// A logical device with one render context per swapchain slot.
///
/// # Example
///
/// ```rust,ignore
/// let adapter = GraphicsAdapter::software(SoftwareConfig::new());
/// let device = adapter.create_device(None, DeviceDescriptor::default())?;
///
/// let upload = device.create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 256)?;
/// let target = device.create_buffer(BufferKind::Default, CpuAccess::None, 256)?;
///
/// let mut context = device.rent_render_context()?;
/// context.begin_frame()?;
/// context.copy(&target, &upload)?;
/// context.end_frame()?;
/// device.return_render_context(context)?;
/// device.present_frame()?;
/// ```
pub struct GraphicsDevice {
    shared: Arc<DeviceShared>,
    contexts: Box<[Mutex<GraphicsContext>]>,
    context_index: AtomicUsize,
    pending_resizes: SegQueue<Extent2d>,
    lifecycle: LifecycleState,
}

impl GraphicsDevice {
    /// Create a device over `native`. With a `surface`, a swapchain of
    /// `desc.context_count` images is created and its first image acquired.
    pub fn new(
        native: Arc<dyn NativeDevice>,
        surface: Option<Arc<dyn GraphicsSurface>>,
        desc: DeviceDescriptor,
    ) -> Result<Self> {
        if desc.context_count == 0 {
            return Err(GraphicsError::invalid_argument(
                "context_count",
                "must be greater than zero",
            ));
        }
        crate::diagnostics::init_from_env();
        let id = DeviceId::next();
        let allocator = Arc::new(MemoryAllocator::new(
            id,
            Arc::clone(&native),
            desc.allocator.clone(),
        ));

        let mut first_index = 0;
        let (presentation, render_target_format) = match surface {
            Some(surface) => {
                let (presentation, index) = Self::create_presentation(id, &native, surface, &desc)?;
                first_index = index;
                let format = presentation.format;
                (Some(Mutex::new(presentation)), format)
            }
            None => (None, desc.render_target_format),
        };

        let shared = Arc::new(DeviceShared {
            id,
            native,
            allocator,
            render_target_format,
            presentation,
            render_pass: Mutex::new(ValueLazy::new()),
        });
        let contexts = (0..desc.context_count as usize)
            .map(|index| GraphicsContext::new(index, Arc::clone(&shared)).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?
            .into_boxed_slice();

        let info = shared.native.adapter_info();
        log::debug!(
            "created device {:?} on {} ({:?}) with {} contexts",
            id,
            info.name,
            info.backend,
            desc.context_count
        );

        Ok(Self {
            shared,
            contexts,
            context_index: AtomicUsize::new(first_index),
            pending_resizes: SegQueue::new(),
            lifecycle: LifecycleState::new(),
        })
    }

    fn create_presentation(
        id: DeviceId,
        native: &Arc<dyn NativeDevice>,
        surface: Arc<dyn GraphicsSurface>,
        desc: &DeviceDescriptor,
    ) -> Result<(Presentation, usize)> {
        let caps = native.presentation_capabilities().ok_or_else(|| {
            GraphicsError::invalid_argument("surface", "the device cannot present")
        })?;
        if desc.context_count < caps.min_image_count || desc.context_count > caps.max_image_count {
            return Err(GraphicsError::invalid_argument(
                "context_count",
                format!(
                    "{} is outside the supported swapchain range {}..={}",
                    desc.context_count, caps.min_image_count, caps.max_image_count
                ),
            ));
        }
        let format = if caps.formats.contains(&desc.render_target_format) {
            desc.render_target_format
        } else {
            *caps.formats.first().ok_or_else(|| {
                GraphicsError::invalid_argument("surface", "no supported swapchain format")
            })?
        };
        let extent = surface.extent();
        if extent.width == 0 || extent.height == 0 {
            return Err(GraphicsError::invalid_argument(
                "surface",
                format!("{}x{} is not a drawable size", extent.width, extent.height),
            ));
        }

        let present_fence = GraphicsFence::new(id, Arc::clone(native), false)?;
        let mut presentation = Presentation {
            surface,
            format,
            extent,
            image_count: desc.context_count,
            swapchain: ValueLazy::new(),
            present_fence,
        };
        Self::create_swapchain(native.as_ref(), &mut presentation)?;
        let index = presentation.acquire(native.as_ref())?;
        Ok((presentation, index as usize))
    }

    fn create_swapchain(native: &dyn NativeDevice, presentation: &mut Presentation) -> Result<()> {
        let (swapchain, count) = native.create_swapchain(&SwapchainDescriptor {
            extent: presentation.extent,
            format: presentation.format,
            image_count: presentation.image_count,
        })?;
        if let Err(error) = check_image_count(presentation.image_count, count) {
            native.destroy_swapchain(swapchain);
            return Err(error);
        }
        presentation.swapchain = ValueLazy::Created(swapchain);
        log::debug!(
            "created {}x{} {:?} swapchain with {} images",
            presentation.extent.width,
            presentation.extent.height,
            presentation.format,
            count
        );
        Ok(())
    }

    /// Device identity.
    pub fn id(&self) -> DeviceId {
        self.shared.id
    }

    /// Adapter description.
    pub fn adapter_info(&self) -> AdapterInfo {
        self.shared.native.adapter_info()
    }

    /// Native backend.
    pub fn native(&self) -> &Arc<dyn NativeDevice> {
        &self.shared.native
    }

    /// Memory allocator.
    pub fn allocator(&self) -> &Arc<MemoryAllocator> {
        &self.shared.allocator
    }

    /// Allocator statistics.
    pub fn memory_stats(&self) -> AllocatorStats {
        self.shared.allocator.stats()
    }

    /// Number of render contexts.
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }

    /// Slot the next rented context records for.
    pub fn current_context_index(&self) -> usize {
        self.context_index.load(Ordering::Acquire)
    }

    /// Format of render targets and the device render pass.
    pub fn render_target_format(&self) -> TexelFormat {
        self.shared.render_target_format
    }

    /// Current swapchain size, or `None` without a surface.
    pub fn swapchain_extent(&self) -> Option<Extent2d> {
        self.shared
            .presentation
            .as_ref()
            .map(|presentation| presentation.lock().extent)
    }

    /// Lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    /// Whether [`dispose`](Self::dispose) has started.
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed_or_disposing()
    }

    fn ensure_alive(&self) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsDevice")
    }

    /// Create a fence, optionally already signalled.
    pub fn create_fence(&self, signalled: bool) -> Result<Arc<GraphicsFence>> {
        self.ensure_alive()?;
        Ok(Arc::new(GraphicsFence::new(
            self.shared.id,
            Arc::clone(&self.shared.native),
            signalled,
        )?))
    }

    /// Create a buffer.
    pub fn create_buffer(
        &self,
        kind: BufferKind,
        cpu_access: CpuAccess,
        size: u64,
    ) -> Result<Arc<GraphicsResource>> {
        self.ensure_alive()?;
        self.shared.allocator.create_buffer(kind, cpu_access, size)
    }

    /// Create a texture.
    pub fn create_texture(&self, desc: TextureDescriptor) -> Result<Arc<GraphicsResource>> {
        self.ensure_alive()?;
        self.shared.allocator.create_texture(desc)
    }

    /// Create a shader from backend bytecode.
    pub fn create_shader(
        &self,
        kind: ShaderKind,
        bytecode: &[u8],
        entry_point: &str,
    ) -> Result<Arc<GraphicsShader>> {
        self.ensure_alive()?;
        if bytecode.is_empty() {
            return Err(GraphicsError::invalid_argument("bytecode", "is empty"));
        }
        if entry_point.is_empty() {
            return Err(GraphicsError::invalid_argument("entry_point", "is empty"));
        }
        let handle = self.shared.native.create_shader(kind, bytecode, entry_point)?;
        Ok(Arc::new(GraphicsShader::new(
            self.shared.id,
            Arc::clone(&self.shared.native),
            handle,
            kind,
            entry_point.to_owned(),
        )))
    }

    /// Create a pipeline signature from a vertex layout and resource slots.
    pub fn create_pipeline_signature(
        &self,
        inputs: &[InputElement],
        resources: &[PipelineResource],
    ) -> Result<Arc<GraphicsPipelineSignature>> {
        self.ensure_alive()?;
        let handle = self.shared.native.create_signature(inputs, resources)?;
        Ok(Arc::new(GraphicsPipelineSignature::new(
            self.shared.id,
            Arc::clone(&self.shared.native),
            handle,
            inputs.to_vec(),
            resources.to_vec(),
        )))
    }

    /// Create a single-attachment render pass for `format`.
    pub fn create_render_pass(&self, format: TexelFormat) -> Result<Arc<GraphicsRenderPass>> {
        self.ensure_alive()?;
        let handle = self.shared.native.create_render_pass(format)?;
        Ok(Arc::new(GraphicsRenderPass::new(
            self.shared.id,
            Arc::clone(&self.shared.native),
            handle,
            format,
        )))
    }

    /// Create a pipeline rendering into the device's render targets.
    pub fn create_pipeline(
        &self,
        signature: &Arc<GraphicsPipelineSignature>,
        vertex_shader: Option<&Arc<GraphicsShader>>,
        pixel_shader: Option<&Arc<GraphicsShader>>,
    ) -> Result<Arc<GraphicsPipeline>> {
        self.ensure_alive()?;
        if signature.device_id() != self.shared.id {
            return Err(GraphicsError::invalid_argument(
                "signature",
                "belongs to a different device",
            ));
        }
        for (name, shader, kind) in [
            ("vertex_shader", vertex_shader, ShaderKind::Vertex),
            ("pixel_shader", pixel_shader, ShaderKind::Pixel),
        ] {
            if let Some(shader) = shader {
                if shader.device_id() != self.shared.id {
                    return Err(GraphicsError::invalid_argument(
                        name,
                        "belongs to a different device",
                    ));
                }
                if shader.kind() != kind {
                    return Err(GraphicsError::invalid_argument(
                        name,
                        format!("is a {:?} shader", shader.kind()),
                    ));
                }
            }
        }

        let render_pass = self.shared.render_pass()?;
        let handle = self.shared.native.create_pipeline(
            &PipelineDescriptor {
                signature: signature.handle(),
                render_pass: render_pass.handle(),
                vertex_shader: vertex_shader.map(|shader| shader.handle()),
                pixel_shader: pixel_shader.map(|shader| shader.handle()),
            },
            signature.inputs(),
        )?;
        Ok(Arc::new(GraphicsPipeline::new(
            Arc::clone(&self.shared.native),
            handle,
            Arc::clone(signature),
            vertex_shader.cloned(),
            pixel_shader.cloned(),
            render_pass,
        )))
    }

    /// Create a primitive. Every referenced object must belong to this device.
    pub fn create_primitive(&self, desc: PrimitiveDescriptor) -> Result<Arc<GraphicsPrimitive>> {
        self.ensure_alive()?;
        Ok(Arc::new(GraphicsPrimitive::new(
            self.shared.id,
            Arc::clone(&self.shared.native),
            desc,
        )?))
    }

    /// Rent the context of the current swapchain slot.
    ///
    /// Fails with `InvalidOperation` if that context is already rented.
    pub fn rent_render_context(&self) -> Result<RenderContext<'_>> {
        self.ensure_alive()?;
        let index = self.current_context_index();
        let guard = self.contexts[index].try_lock().ok_or_else(|| {
            rented("rent_render_context", index)
        })?;
        Ok(RenderContext {
            device_id: self.shared.id,
            guard,
        })
    }

    /// Return a rented context. Rejects contexts of other devices.
    pub fn return_render_context(&self, context: RenderContext<'_>) -> Result<()> {
        if context.device_id != self.shared.id {
            return Err(GraphicsError::invalid_argument(
                "context",
                "belongs to a different device",
            ));
        }
        drop(context);
        Ok(())
    }

    /// Queue a signal of `fence`'s current value after all submitted work.
    pub fn signal(&self, fence: &GraphicsFence) -> Result<()> {
        self.ensure_alive()?;
        self.shared.signal(fence)
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_for_idle(&self) -> Result<()> {
        self.ensure_alive()?;
        self.shared.native.wait_idle()?;
        Ok(())
    }

    /// Record a surface size change. Safe to call from any thread; the new
    /// size is applied by the next present or [`resize`](Self::resize).
    pub fn on_surface_size_changed(&self, extent: Extent2d) {
        log::trace!("surface resized to {}x{}", extent.width, extent.height);
        self.pending_resizes.push(extent);
    }

    /// Present the current slot and advance to the next one.
    ///
    /// The current context must not be rented or mid-frame. A swapchain that
    /// reports out of date while a resize is queued is recreated once and the
    /// frame is dropped; otherwise the failure is returned.
    pub fn present_frame(&self) -> Result<()> {
        self.ensure_alive()?;
        let index = self.current_context_index();
        let mut context = self.contexts[index].try_lock().ok_or_else(|| {
            rented("present_frame", index)
        })?;
        context.finish_present()?;

        let native = self.shared.native.as_ref();
        let presented = match &self.shared.presentation {
            Some(presentation) => {
                let presentation = presentation.lock();
                match presentation.swapchain() {
                    Some(swapchain) => native.present(swapchain, index as u32),
                    None => Ok(()),
                }
            }
            None => Ok(()),
        };
        self.shared.signal(context.fence())?;
        drop(context);

        if let Err(error) = presented {
            return self.recover_stale(error);
        }

        let next = match &self.shared.presentation {
            Some(presentation) => {
                let presentation = presentation.lock();
                match presentation.request_image(native) {
                    Ok(next) => {
                        presentation.wait_for_image()?;
                        next as usize
                    }
                    Err(error) => {
                        drop(presentation);
                        return self.recover_stale(error);
                    }
                }
            }
            None => (index + 1) % self.contexts.len(),
        };
        self.context_index.store(next, Ordering::Release);

        if !self.pending_resizes.is_empty() {
            self.resize()?;
        }
        crate::diagnostics::tracy::frame_mark();
        log::trace!("presented slot {}, next slot {}", index, next);
        Ok(())
    }

    fn recover_stale(&self, error: NativeError) -> Result<()> {
        if error.kind == NativeErrorKind::SwapchainOutOfDate && !self.pending_resizes.is_empty() {
            crate::gx_emit!(GX202, "{}", error);
            return self.resize();
        }
        Err(error.into())
    }

    /// Apply queued surface size changes: wait for the device, then recreate
    /// the swapchain and every context's render target. The slot index moves
    /// to the first acquired image.
    ///
    /// Fails with `InvalidOperation` while any context is rented.
    pub fn resize(&self) -> Result<()> {
        self.ensure_alive()?;
        let mut contexts = Vec::with_capacity(self.contexts.len());
        for (index, context) in self.contexts.iter().enumerate() {
            contexts.push(context.try_lock().ok_or_else(|| {
                rented("resize", index)
            })?);
        }

        let mut latest = None;
        while let Some(extent) = self.pending_resizes.pop() {
            latest = Some(extent);
        }
        let presentation = match &self.shared.presentation {
            Some(presentation) => presentation,
            None => return Ok(()),
        };

        let native = self.shared.native.as_ref();
        native.wait_idle()?;
        for context in contexts.iter_mut() {
            context.reset_render_target();
        }

        let mut presentation = presentation.lock();
        let extent = latest.unwrap_or_else(|| presentation.surface.extent());
        if extent.width == 0 || extent.height == 0 {
            log::debug!("skipping resize to an empty surface");
            return Ok(());
        }
        if let Some(swapchain) = presentation.swapchain.reset() {
            native.destroy_swapchain(swapchain);
        }
        presentation.extent = extent;
        Self::create_swapchain(native, &mut presentation)?;
        let index = presentation.acquire(native)?;
        self.context_index.store(index as usize, Ordering::Release);
        log::debug!(
            "device {:?} resized to {}x{}",
            self.shared.id,
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Release every native object the device owns. Idempotent.
    ///
    /// Order: wait idle, contexts, swapchain and present fence, allocator.
    /// Resources still alive keep their blocks until they are dropped.
    pub fn dispose(&self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        if let Err(error) = self.shared.native.wait_idle() {
            crate::gx_emit!(GX102, "wait_idle before disposal: {}", error);
        }
        for (index, context) in self.contexts.iter().enumerate() {
            match context.try_lock() {
                Some(mut context) => context.dispose(),
                None => crate::gx_emit!(GX203, "context {}", index),
            }
        }
        if let Some(presentation) = &self.shared.presentation {
            let mut presentation = presentation.lock();
            if let Some(swapchain) = presentation.swapchain.reset() {
                self.shared.native.destroy_swapchain(swapchain);
            }
            presentation.present_fence.dispose();
        }
        self.shared.render_pass.lock().reset();
        self.shared.allocator.dispose();
        self.lifecycle.end_dispose();
        log::debug!("disposed device {:?}", self.shared.id);
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("id", &self.shared.id)
            .field("contexts", &self.contexts.len())
            .field("context_index", &self.current_context_index())
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

/// One render context per swapchain image; a swapchain of another size
/// cannot be used.
fn check_image_count(requested: u32, created: u32) -> Result<()> {
    if created == requested {
        return Ok(());
    }
    Err(GraphicsError::InvalidOperation {
        object: "GraphicsDevice",
        operation: "create_swapchain",
        state: format!("the swapchain has {} images for {} contexts", created, requested),
    })
}

fn rented(operation: &'static str, index: usize) -> GraphicsError {
    GraphicsError::InvalidOperation {
        object: "GraphicsDevice",
        operation,
        state: format!("context {} is rented", index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::gpu::types::{
        Command, ElementFormat, InputElementKind, NativeResource, ResourceState,
    };
    use crate::graphics::surface::OffscreenSurface;
    use crate::memory::region::RegionCollection;

    fn headless(count: u32) -> (Arc<SoftwareDevice>, GraphicsDevice) {
        let native = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let device = GraphicsDevice::new(
            native.clone(),
            None,
            DeviceDescriptor::default().with_context_count(count),
        )
        .unwrap();
        (native, device)
    }

    fn presenting(extent: Extent2d) -> (Arc<SoftwareDevice>, Arc<OffscreenSurface>, GraphicsDevice) {
        let native = Arc::new(SoftwareDevice::new(
            SoftwareConfig::new().with_presentation(2, 3),
        ));
        let surface = Arc::new(OffscreenSurface::new(extent));
        let device = GraphicsDevice::new(
            native.clone(),
            Some(surface.clone()),
            DeviceDescriptor::default(),
        )
        .unwrap();
        (native, surface, device)
    }

    #[test]
    fn test_headless_slots_round_robin() {
        let (_native, device) = headless(3);
        let mut seen = Vec::new();
        for _ in 0..4 {
            let mut context = device.rent_render_context().unwrap();
            seen.push(context.index());
            context.begin_frame().unwrap();
            context.end_frame().unwrap();
            device.return_render_context(context).unwrap();
            device.present_frame().unwrap();
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_context_lease_is_exclusive() {
        let (_native, device) = headless(2);
        let context = device.rent_render_context().unwrap();
        assert!(matches!(
            device.rent_render_context(),
            Err(GraphicsError::InvalidOperation { operation: "rent_render_context", .. })
        ));
        assert!(matches!(
            device.present_frame(),
            Err(GraphicsError::InvalidOperation { operation: "present_frame", .. })
        ));
        assert!(matches!(
            device.resize(),
            Err(GraphicsError::InvalidOperation { operation: "resize", .. })
        ));
        drop(context);
        device.present_frame().unwrap();
    }

    #[test]
    fn test_return_rejects_foreign_context() {
        let (_a, first) = headless(1);
        let (_b, second) = headless(1);
        let context = second.rent_render_context().unwrap();
        assert!(matches!(
            first.return_render_context(context),
            Err(GraphicsError::InvalidArgument { name: "context", .. })
        ));
        assert!(second.rent_render_context().is_ok());
    }

    #[test]
    fn test_signal_rejects_foreign_fence() {
        let (_a, first) = headless(1);
        let (_b, second) = headless(1);
        let fence = second.create_fence(false).unwrap();
        assert!(first.signal(&fence).is_err());
        second.signal(&fence).unwrap();
        fence.wait().unwrap();
    }

    #[test]
    fn test_context_count_must_fit_swapchain() {
        let native = Arc::new(SoftwareDevice::new(
            SoftwareConfig::new().with_presentation(2, 3),
        ));
        let surface = Arc::new(OffscreenSurface::new(Extent2d::new(4, 4)));
        let result = GraphicsDevice::new(
            native,
            Some(surface),
            DeviceDescriptor::default().with_context_count(4),
        );
        assert!(matches!(
            result,
            Err(GraphicsError::InvalidArgument { name: "context_count", .. })
        ));
    }

    #[test]
    fn test_headless_native_rejects_surface() {
        let native = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let surface = Arc::new(OffscreenSurface::new(Extent2d::new(4, 4)));
        let result = GraphicsDevice::new(native, Some(surface), DeviceDescriptor::default());
        assert!(matches!(
            result,
            Err(GraphicsError::InvalidArgument { name: "surface", .. })
        ));
    }

    #[test]
    fn test_unsupported_format_falls_back() {
        let native = Arc::new(SoftwareDevice::new(
            SoftwareConfig::new().with_presentation(2, 3),
        ));
        let surface = Arc::new(OffscreenSurface::new(Extent2d::new(4, 4)));
        let device = GraphicsDevice::new(
            native,
            Some(surface),
            DeviceDescriptor::default().with_render_target_format(TexelFormat::R8Unorm),
        )
        .unwrap();
        assert_eq!(device.render_target_format(), TexelFormat::B8G8R8A8Unorm);
    }

    #[test]
    fn test_draw_frame_clears_and_presents() {
        let (native, _surface, device) = presenting(Extent2d::new(4, 4));
        let vertices = device
            .create_buffer(BufferKind::Vertex, CpuAccess::CpuToGpu, 256)
            .unwrap();
        let region = vertices.allocate(36, 4, 12).unwrap();
        let signature = device
            .create_pipeline_signature(
                &[InputElement {
                    kind: InputElementKind::Position,
                    format: ElementFormat::Float3,
                }],
                &[],
            )
            .unwrap();
        let vs = device.create_shader(ShaderKind::Vertex, &[1, 2, 3], "main").unwrap();
        let ps = device.create_shader(ShaderKind::Pixel, &[4, 5, 6], "main").unwrap();
        let pipeline = device
            .create_pipeline(&signature, Some(&vs), Some(&ps))
            .unwrap();
        let primitive = device
            .create_primitive(PrimitiveDescriptor::new(pipeline, region, 12))
            .unwrap();

        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        context.begin_drawing([0.0, 0.0, 1.0, 1.0]).unwrap();
        context.draw(&primitive).unwrap();
        context.end_drawing().unwrap();
        context.end_frame().unwrap();
        drop(context);
        device.present_frame().unwrap();
        assert_eq!(device.current_context_index(), 1);

        let commands = native.take_executed_commands();
        let draw = commands
            .iter()
            .find_map(|command| match command {
                Command::Draw(draw) => Some(*draw),
                _ => None,
            })
            .unwrap();
        assert_eq!(draw.vertex_count, 3);
        assert!(draw.index_buffer.is_none());
        let image = commands
            .iter()
            .find_map(|command| match command {
                Command::Barrier(barriers) => match barriers[0].resource {
                    NativeResource::Image(image) => Some(image),
                    NativeResource::Buffer(_) => None,
                },
                _ => None,
            })
            .unwrap();
        assert_eq!(
            native.resource_state(NativeResource::Image(image)),
            Some(ResourceState::Present)
        );
        // B8G8R8A8: blue first.
        assert_eq!(&native.read_image(image).unwrap()[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_swapchain_image_count_must_match_contexts() {
        check_image_count(3, 3).unwrap();
        assert!(matches!(
            check_image_count(2, 3),
            Err(GraphicsError::InvalidOperation { operation: "create_swapchain", .. })
        ));
    }

    #[test]
    fn test_pipeline_rejects_wrong_shader_stage() {
        let (_native, device) = headless(1);
        let signature = device.create_pipeline_signature(&[], &[]).unwrap();
        let ps = device.create_shader(ShaderKind::Pixel, &[1], "main").unwrap();
        assert!(matches!(
            device.create_pipeline(&signature, Some(&ps), None),
            Err(GraphicsError::InvalidArgument { name: "vertex_shader", .. })
        ));
    }

    #[test]
    fn test_stale_swapchain_recreated_when_resize_pending() {
        let (native, surface, device) = presenting(Extent2d::new(4, 4));
        let resized = Extent2d::new(8, 6);
        surface.set_extent(resized);
        native.set_surface_extent(resized);
        device.on_surface_size_changed(resized);

        device.present_frame().unwrap();
        assert_eq!(device.swapchain_extent(), Some(resized));
        assert_eq!(device.current_context_index(), 0);

        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        context.begin_drawing([0.0; 4]).unwrap();
        context.end_drawing().unwrap();
        context.end_frame().unwrap();
        drop(context);
        device.present_frame().unwrap();
    }

    #[test]
    fn test_stale_swapchain_without_resize_fails() {
        let (native, _surface, device) = presenting(Extent2d::new(4, 4));
        native.set_surface_extent(Extent2d::new(5, 5));
        assert!(matches!(
            device.present_frame(),
            Err(GraphicsError::NativeCallFailure { api: "present", .. })
        ));
    }

    #[test]
    fn test_explicit_resize_uses_surface_size() {
        let (native, surface, device) = presenting(Extent2d::new(4, 4));
        surface.set_extent(Extent2d::new(16, 9));
        native.set_surface_extent(Extent2d::new(16, 9));
        device.resize().unwrap();
        assert_eq!(device.swapchain_extent(), Some(Extent2d::new(16, 9)));
        device.present_frame().unwrap();
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (native, _surface, device) = presenting(Extent2d::new(4, 4));
        let buffer = device
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 64)
            .unwrap();
        assert_eq!(device.lifecycle(), Lifecycle::Initialized);
        device.dispose();
        assert_eq!(device.lifecycle(), Lifecycle::Disposed);
        device.dispose();
        assert_eq!(device.lifecycle(), Lifecycle::Disposed);
        assert!(device.is_disposed());
        assert!(format!("{:?}", device).contains("Disposed"));
        assert_eq!(native.live_fences(), 0);
        assert!(matches!(
            device.create_fence(true),
            Err(GraphicsError::Disposed { object: "GraphicsDevice" })
        ));
        assert!(matches!(
            device.rent_render_context(),
            Err(GraphicsError::Disposed { .. })
        ));
        drop(buffer);
        assert_eq!(native.live_allocations(), 0);
    }
}
