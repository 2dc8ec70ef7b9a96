//! Per-slot command recording.
//!
//! A context moves through `Idle -> Recording -> (Drawing -> Recording) ->
//! Submitted -> Idle`. The device hands one out per frame through
//! [`GraphicsDevice::rent_render_context`](crate::GraphicsDevice::rent_render_context),
//! and [`GraphicsDevice::present_frame`](crate::GraphicsDevice::present_frame)
//! returns it to `Idle`.

use std::fmt;
use std::sync::Arc;

use crate::error::{GraphicsError, Result};
use crate::gpu::types::{
    Command, CommandAllocatorHandle, CommandListHandle, Extent2d, ImageHandle, NativeResource,
    ResourceBarrier, ResourceState, RenderTargetViewHandle, ScissorRect, Viewport,
};
use crate::graphics::device::{DeviceId, DeviceShared};
use crate::graphics::fence::GraphicsFence;
use crate::graphics::pipeline::GraphicsRenderPass;
use crate::graphics::primitive::GraphicsPrimitive;
use crate::graphics::resource::GraphicsResource;
use crate::sync::lifecycle::LifecycleState;
use crate::util::lazy::ValueLazy;

/// Where a context is in its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Ready for [`begin_frame`](GraphicsContext::begin_frame).
    Idle,
    /// Recording commands outside a render pass.
    Recording,
    /// Recording inside the render pass of the slot's render target.
    Drawing,
    /// Submitted and executed; waiting for the frame to be presented.
    Submitted,
}

struct RenderTarget {
    image: ImageHandle,
    view: RenderTargetViewHandle,
    extent: Extent2d,
    render_pass: Arc<GraphicsRenderPass>,
}

/// Records commands for one swapchain slot.
///
/// `fence` guards reuse of the slot across frames; `execute_fence` makes
/// [`end_frame`](Self::end_frame) wait for the submitted work.
pub struct GraphicsContext {
    index: usize,
    device: Arc<DeviceShared>,
    fence: GraphicsFence,
    execute_fence: GraphicsFence,
    command_allocator: ValueLazy<CommandAllocatorHandle>,
    command_list: ValueLazy<CommandListHandle>,
    render_target: ValueLazy<RenderTarget>,
    state: ContextState,
    lifecycle: LifecycleState,
}

impl GraphicsContext {
    pub(crate) fn new(index: usize, device: Arc<DeviceShared>) -> Result<Self> {
        let fence = GraphicsFence::new(device.id, Arc::clone(&device.native), true)?;
        let execute_fence = GraphicsFence::new(device.id, Arc::clone(&device.native), false)?;
        Ok(Self {
            index,
            device,
            fence,
            execute_fence,
            command_allocator: ValueLazy::new(),
            command_list: ValueLazy::new(),
            render_target: ValueLazy::new(),
            state: ContextState::Idle,
            lifecycle: LifecycleState::new(),
        })
    }

    /// Swapchain slot this context records for.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Device the context belongs to.
    pub fn device_id(&self) -> DeviceId {
        self.device.id
    }

    /// Current state.
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Fence signalled when the slot's frame has been presented.
    pub fn fence(&self) -> &GraphicsFence {
        &self.fence
    }

    /// Fence signalled when submitted work has executed.
    pub fn execute_fence(&self) -> &GraphicsFence {
        &self.execute_fence
    }

    /// Whether [`dispose`](Self::dispose) has started.
    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed_or_disposing()
    }

    /// Start a frame.
    ///
    /// Blocks until the previous use of this slot has been presented, then
    /// resets the command allocator and opens the command list.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.expect_state("begin_frame", ContextState::Idle)?;
        self.fence.wait()?;
        self.fence.reset()?;
        if let Err(error) = self.open_list() {
            // Leave the slot usable for the next attempt.
            if let Err(signal_error) = self.device.signal(&self.fence) {
                log::warn!("re-signalling context {} failed: {}", self.index, signal_error);
            }
            return Err(error);
        }
        self.state = ContextState::Recording;
        log::trace!("context {} began a frame", self.index);
        Ok(())
    }

    /// Begin rendering into the slot's swapchain image, clearing it to
    /// `clear_color`. Viewport and scissor cover the whole image.
    pub fn begin_drawing(&mut self, clear_color: [f32; 4]) -> Result<()> {
        self.expect_state("begin_drawing", ContextState::Recording)?;
        let (image, view, extent, render_pass) = {
            let target = self.render_target()?;
            (
                target.image,
                target.view,
                target.extent,
                target.render_pass.handle(),
            )
        };

        self.record(Command::Barrier(vec![ResourceBarrier {
            resource: NativeResource::Image(image),
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        }]))?;
        self.record(Command::BeginRenderPass {
            render_pass,
            target: view,
            extent,
            clear_color,
        })?;
        self.record(Command::SetViewport(Viewport::covering(extent)))?;
        self.record(Command::SetScissor(ScissorRect::covering(extent)))?;
        self.state = ContextState::Drawing;
        Ok(())
    }

    /// Draw `primitive`.
    pub fn draw(&mut self, primitive: &GraphicsPrimitive) -> Result<()> {
        self.expect_state("draw", ContextState::Drawing)?;
        if primitive.device_id() != self.device.id {
            return Err(GraphicsError::invalid_argument(
                "primitive",
                "belongs to a different device",
            ));
        }
        let command = primitive.draw_command()?;
        self.record(Command::Draw(command))
    }

    /// End the render pass and return the image to the present state.
    pub fn end_drawing(&mut self) -> Result<()> {
        self.expect_state("end_drawing", ContextState::Drawing)?;
        let image = match self.render_target.get() {
            Some(target) => target.image,
            None => return Err(self.wrong_state("end_drawing")),
        };
        self.record(Command::EndRenderPass)?;
        self.record(Command::Barrier(vec![ResourceBarrier {
            resource: NativeResource::Image(image),
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        }]))?;
        self.state = ContextState::Recording;
        Ok(())
    }

    /// Close and submit the command list, then wait for it to execute.
    pub fn end_frame(&mut self) -> Result<()> {
        self.expect_state("end_frame", ContextState::Recording)?;
        let list = self.list("end_frame")?;
        let native = &self.device.native;
        native.close_command_list(list)?;
        native.submit(list)?;
        self.device.signal(&self.execute_fence)?;
        self.execute_fence.wait()?;
        self.execute_fence.reset()?;
        self.state = ContextState::Submitted;
        log::trace!("context {} submitted its frame", self.index);
        Ok(())
    }

    /// Copy `source` into `destination`.
    ///
    /// Supported pairs are buffer to buffer, buffer to texture and texture to
    /// buffer. Texture data in buffers uses the device's copyable footprint,
    /// so rows are padded to the backend's row pitch. Only GPU-exclusive
    /// resources are transitioned; they are returned to their resting state
    /// after the copy.
    pub fn copy(&mut self, destination: &GraphicsResource, source: &GraphicsResource) -> Result<()> {
        self.expect_state("copy", ContextState::Recording)?;
        destination.ensure_alive()?;
        source.ensure_alive()?;
        if destination.device_id() != self.device.id {
            return Err(GraphicsError::invalid_argument(
                "destination",
                "belongs to a different device",
            ));
        }
        if source.device_id() != self.device.id {
            return Err(GraphicsError::invalid_argument(
                "source",
                "belongs to a different device",
            ));
        }
        if std::ptr::eq(destination, source) {
            return Err(GraphicsError::invalid_argument(
                "source",
                "cannot copy a resource onto itself",
            ));
        }

        let native = &self.device.native;
        let command = match (destination.native(), source.native()) {
            (NativeResource::Buffer(dst), NativeResource::Buffer(src)) => {
                if source.size() > destination.size() {
                    return Err(GraphicsError::invalid_argument(
                        "destination",
                        format!(
                            "{} bytes cannot hold the {} byte source",
                            destination.size(),
                            source.size()
                        ),
                    ));
                }
                Command::CopyBuffer {
                    destination: dst,
                    source: src,
                    size: source.size(),
                }
            }
            (NativeResource::Image(dst), NativeResource::Buffer(src)) => {
                let desc = texture_of(destination, "destination")?;
                let footprint = native.copyable_footprint(desc);
                if footprint.offset + footprint.total_bytes > source.size() {
                    return Err(GraphicsError::invalid_argument(
                        "source",
                        format!(
                            "{} bytes is smaller than the {} byte texture footprint",
                            source.size(),
                            footprint.total_bytes
                        ),
                    ));
                }
                Command::CopyBufferToImage {
                    destination: dst,
                    destination_state: copy_state(destination, ResourceState::CopyDest),
                    source: src,
                    format: desc.format,
                    extent: desc.extent(),
                    footprint,
                }
            }
            (NativeResource::Buffer(dst), NativeResource::Image(src)) => {
                let desc = texture_of(source, "source")?;
                let footprint = native.copyable_footprint(desc);
                if footprint.offset + footprint.total_bytes > destination.size() {
                    return Err(GraphicsError::invalid_argument(
                        "destination",
                        format!(
                            "{} bytes is smaller than the {} byte texture footprint",
                            destination.size(),
                            footprint.total_bytes
                        ),
                    ));
                }
                Command::CopyImageToBuffer {
                    destination: dst,
                    source: src,
                    source_state: copy_state(source, ResourceState::CopySource),
                    format: desc.format,
                    extent: desc.extent(),
                    footprint,
                }
            }
            (NativeResource::Image(_), NativeResource::Image(_)) => {
                return Err(GraphicsError::invalid_argument(
                    "source",
                    "texture to texture copies are not supported",
                ))
            }
        };

        let barriers: Vec<ResourceBarrier> = [
            transition(destination, ResourceState::CopyDest),
            transition(source, ResourceState::CopySource),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !barriers.is_empty() {
            self.record(Command::Barrier(barriers.clone()))?;
        }
        self.record(command)?;
        if !barriers.is_empty() {
            let restore = barriers
                .iter()
                .map(|barrier| ResourceBarrier {
                    resource: barrier.resource,
                    before: barrier.after,
                    after: barrier.before,
                })
                .collect();
            self.record(Command::Barrier(restore))?;
        }
        Ok(())
    }

    /// Move a submitted (or untouched) context back to `Idle` after its
    /// fence was signalled by presentation.
    pub(crate) fn finish_present(&mut self) -> Result<()> {
        match self.state {
            ContextState::Submitted | ContextState::Idle => {
                self.state = ContextState::Idle;
                Ok(())
            }
            ContextState::Recording | ContextState::Drawing => {
                Err(self.wrong_state("present_frame"))
            }
        }
    }

    /// Drop an unfinished recording when a lease ends mid-frame.
    pub(crate) fn abandon(&mut self) {
        if !matches!(self.state, ContextState::Recording | ContextState::Drawing) {
            return;
        }
        crate::gx_emit!(GX201, "context {} in {:?}", self.index, self.state);
        if let Some(list) = self.command_list.get() {
            if let Err(error) = self.device.native.close_command_list(*list) {
                log::warn!("closing abandoned command list failed: {}", error);
            }
        }
        if let Err(error) = self.device.signal(&self.fence) {
            log::warn!("signalling abandoned context {} failed: {}", self.index, error);
        }
        self.state = ContextState::Idle;
    }

    /// Release the render-target view; it is recreated on next use.
    pub(crate) fn reset_render_target(&mut self) {
        if let Some(target) = self.render_target.reset() {
            self.device.native.destroy_render_target_view(target.view);
        }
    }

    /// Destroy the native objects. Idempotent.
    pub fn dispose(&mut self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        self.reset_render_target();
        let native = Arc::clone(&self.device.native);
        if let Some(allocator) = self.command_allocator.reset() {
            if let Some(list) = self.command_list.reset() {
                native.destroy_command_list(allocator, list);
            }
            native.destroy_command_allocator(allocator);
        }
        self.fence.dispose();
        self.execute_fence.dispose();
        self.lifecycle.end_dispose();
    }

    fn render_target(&mut self) -> Result<&RenderTarget> {
        let device = &self.device;
        let index = self.index;
        self.render_target.get_or_try_init(|| {
            let presentation = device.presentation.as_ref().ok_or_else(|| {
                no_target("the device has no surface")
            })?;
            let presentation = presentation.lock();
            let swapchain = presentation.swapchain().ok_or_else(|| {
                no_target("the swapchain is not created")
            })?;
            let render_pass = device.render_pass()?;
            let image = device.native.swapchain_image(swapchain, index as u32)?;
            let view = device.native.create_render_target_view(
                image,
                presentation.format,
                presentation.extent,
                render_pass.handle(),
            )?;
            log::debug!(
                "context {} created a {}x{} render target",
                index,
                presentation.extent.width,
                presentation.extent.height
            );
            Ok(RenderTarget {
                image,
                view,
                extent: presentation.extent,
                render_pass,
            })
        })
    }

    fn open_list(&mut self) -> Result<()> {
        let native = &self.device.native;
        let allocator = *self
            .command_allocator
            .get_or_try_init(|| native.create_command_allocator())?;
        native.reset_command_allocator(allocator)?;
        let list = *self
            .command_list
            .get_or_try_init(|| native.create_command_list(allocator))?;
        native.begin_command_list(list)?;
        Ok(())
    }

    fn list(&self, operation: &'static str) -> Result<CommandListHandle> {
        self.command_list
            .get()
            .copied()
            .ok_or_else(|| self.wrong_state(operation))
    }

    fn record(&self, command: Command) -> Result<()> {
        let list = self.list("record")?;
        self.device.native.record(list, &command)?;
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, expected: ContextState) -> Result<()> {
        self.lifecycle.ensure_alive("GraphicsContext")?;
        if self.state == expected {
            Ok(())
        } else {
            Err(self.wrong_state(operation))
        }
    }

    fn wrong_state(&self, operation: &'static str) -> GraphicsError {
        GraphicsError::invalid_operation("GraphicsContext", operation, self.state)
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for GraphicsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsContext")
            .field("index", &self.index)
            .field("state", &self.state)
            .field("fence", &self.fence)
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

fn texture_of<'a>(
    resource: &'a GraphicsResource,
    name: &'static str,
) -> Result<&'a crate::gpu::types::TextureDescriptor> {
    resource
        .texture_descriptor()
        .ok_or_else(|| GraphicsError::invalid_argument(name, "image handle without a texture descriptor"))
}

/// State `resource` is in while it takes part in a copy as `state`.
fn copy_state(resource: &GraphicsResource, state: ResourceState) -> ResourceState {
    if resource.cpu_access().is_gpu_exclusive() {
        state
    } else {
        resource.resting_state()
    }
}

fn transition(resource: &GraphicsResource, state: ResourceState) -> Option<ResourceBarrier> {
    let resting = resource.resting_state();
    (resource.cpu_access().is_gpu_exclusive() && resting != state).then(|| ResourceBarrier {
        resource: resource.native(),
        before: resting,
        after: state,
    })
}

fn no_target(reason: &str) -> GraphicsError {
    GraphicsError::InvalidOperation {
        object: "GraphicsContext",
        operation: "begin_drawing",
        state: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::config::DeviceDescriptor;
    use crate::gpu::software::{SoftwareConfig, SoftwareDevice};
    use crate::gpu::types::{BufferKind, CpuAccess, TexelFormat, TextureDescriptor};
    use crate::graphics::device::GraphicsDevice;

    fn headless() -> (Arc<SoftwareDevice>, GraphicsDevice) {
        let native = Arc::new(SoftwareDevice::new(SoftwareConfig::new()));
        let device = GraphicsDevice::new(
            native.clone(),
            None,
            DeviceDescriptor::default().with_context_count(1),
        )
        .unwrap();
        (native, device)
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let (_native, device) = headless();
        let mut context = device.rent_render_context().unwrap();
        assert!(matches!(
            context.end_frame(),
            Err(GraphicsError::InvalidOperation { operation: "end_frame", .. })
        ));
        context.begin_frame().unwrap();
        assert_eq!(context.state(), ContextState::Recording);
        assert!(context.begin_frame().is_err());
        assert!(context.end_drawing().is_err());
        context.end_frame().unwrap();
        assert_eq!(context.state(), ContextState::Submitted);
        assert!(context.begin_frame().is_err());
    }

    #[test]
    fn test_begin_drawing_needs_surface() {
        let (_native, device) = headless();
        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        assert!(matches!(
            context.begin_drawing([0.0; 4]),
            Err(GraphicsError::InvalidOperation { operation: "begin_drawing", .. })
        ));
        context.end_frame().unwrap();
    }

    #[test]
    fn test_copy_transitions_gpu_exclusive_side_only() {
        let (native, device) = headless();
        let upload = device
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 256)
            .unwrap();
        let target = device
            .create_buffer(BufferKind::Default, CpuAccess::None, 256)
            .unwrap();

        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        context.copy(&target, &upload).unwrap();
        context.end_frame().unwrap();

        let commands = native.take_executed_commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(
            commands[0],
            Command::Barrier(vec![ResourceBarrier {
                resource: target.native(),
                before: ResourceState::Common,
                after: ResourceState::CopyDest,
            }])
        );
        assert!(matches!(commands[1], Command::CopyBuffer { size: 256, .. }));
        assert_eq!(
            commands[2],
            Command::Barrier(vec![ResourceBarrier {
                resource: target.native(),
                before: ResourceState::CopyDest,
                after: ResourceState::Common,
            }])
        );
        assert_eq!(
            native.resource_state(target.native()),
            Some(ResourceState::Common)
        );
    }

    #[test]
    fn test_copy_between_cpu_visible_buffers_has_no_barriers() {
        let (native, device) = headless();
        let upload = device
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 128)
            .unwrap();
        let readback = device
            .create_buffer(BufferKind::Default, CpuAccess::GpuToCpu, 128)
            .unwrap();

        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        context.copy(&readback, &upload).unwrap();
        context.end_frame().unwrap();

        let commands = native.take_executed_commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::CopyBuffer { .. }));
    }

    #[test]
    fn test_copy_validates_sizes() {
        let (_native, device) = headless();
        let large = device
            .create_buffer(BufferKind::Default, CpuAccess::CpuToGpu, 512)
            .unwrap();
        let small = device
            .create_buffer(BufferKind::Default, CpuAccess::None, 256)
            .unwrap();
        let texture = device
            .create_texture(TextureDescriptor::new_2d(
                TexelFormat::R8G8B8A8Unorm,
                16,
                16,
                CpuAccess::None,
            ))
            .unwrap();

        let mut context = device.rent_render_context().unwrap();
        context.begin_frame().unwrap();
        assert!(matches!(
            context.copy(&small, &large),
            Err(GraphicsError::InvalidArgument { name: "destination", .. })
        ));
        assert!(matches!(
            context.copy(&texture, &small),
            Err(GraphicsError::InvalidArgument { name: "source", .. })
        ));
        assert!(context.copy(&large, &large).is_err());
        context.end_frame().unwrap();
    }

    #[test]
    fn test_abandoned_frame_keeps_slot_usable() {
        let (native, device) = headless();
        {
            let mut context = device.rent_render_context().unwrap();
            context.begin_frame().unwrap();
        }
        device.present_frame().unwrap();

        let mut context = device.rent_render_context().unwrap();
        assert_eq!(context.state(), ContextState::Idle);
        context.begin_frame().unwrap();
        context.end_frame().unwrap();
        assert!(native.take_executed_commands().is_empty());
    }
}
