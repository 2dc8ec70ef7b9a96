//! Shaders, pipeline signatures, render passes and pipelines.
//!
//! Each wrapper owns one native object and destroys it on drop. Pipelines
//! keep their signature, shaders and render pass alive through `Arc`s so a
//! recorded draw never refers to a destroyed object.

use std::fmt;
use std::sync::Arc;

use crate::gpu::traits::NativeDevice;
use crate::gpu::types::{
    InputElement, PipelineHandle, PipelineResource, RenderPassHandle, ShaderHandle, ShaderKind,
    SignatureHandle, TexelFormat,
};
use crate::graphics::device::DeviceId;

/// A compiled shader module.
pub struct GraphicsShader {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    handle: ShaderHandle,
    kind: ShaderKind,
    entry_point: String,
}

impl GraphicsShader {
    pub(crate) fn new(
        device_id: DeviceId,
        native: Arc<dyn NativeDevice>,
        handle: ShaderHandle,
        kind: ShaderKind,
        entry_point: String,
    ) -> Self {
        Self {
            device_id,
            native,
            handle,
            kind,
            entry_point,
        }
    }

    /// Device the shader was created on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Native handle.
    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    /// Stage the shader runs in.
    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Name of the entry function.
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl Drop for GraphicsShader {
    fn drop(&mut self) {
        self.native.destroy_shader(self.handle);
    }
}

impl fmt::Debug for GraphicsShader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsShader")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

/// Vertex layout plus the resource slots a pipeline binds.
pub struct GraphicsPipelineSignature {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    handle: SignatureHandle,
    inputs: Vec<InputElement>,
    resources: Vec<PipelineResource>,
}

impl GraphicsPipelineSignature {
    pub(crate) fn new(
        device_id: DeviceId,
        native: Arc<dyn NativeDevice>,
        handle: SignatureHandle,
        inputs: Vec<InputElement>,
        resources: Vec<PipelineResource>,
    ) -> Self {
        Self {
            device_id,
            native,
            handle,
            inputs,
            resources,
        }
    }

    /// Device the signature was created on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Native handle.
    pub fn handle(&self) -> SignatureHandle {
        self.handle
    }

    /// Vertex input elements, packed in order.
    pub fn inputs(&self) -> &[InputElement] {
        &self.inputs
    }

    /// Resource slots, in binding order.
    pub fn resources(&self) -> &[PipelineResource] {
        &self.resources
    }

    /// Bytes per vertex implied by the input layout.
    pub fn vertex_stride(&self) -> u32 {
        self.inputs.iter().map(|input| input.format.size()).sum()
    }
}

impl Drop for GraphicsPipelineSignature {
    fn drop(&mut self) {
        self.native.destroy_signature(self.handle);
    }
}

impl fmt::Debug for GraphicsPipelineSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipelineSignature")
            .field("handle", &self.handle)
            .field("inputs", &self.inputs)
            .field("resources", &self.resources)
            .finish()
    }
}

/// A single-attachment render pass that clears its target on load.
pub struct GraphicsRenderPass {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    handle: RenderPassHandle,
    format: TexelFormat,
}

impl GraphicsRenderPass {
    pub(crate) fn new(
        device_id: DeviceId,
        native: Arc<dyn NativeDevice>,
        handle: RenderPassHandle,
        format: TexelFormat,
    ) -> Self {
        Self {
            device_id,
            native,
            handle,
            format,
        }
    }

    /// Device the render pass was created on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Native handle.
    pub fn handle(&self) -> RenderPassHandle {
        self.handle
    }

    /// Format of the colour attachment.
    pub fn format(&self) -> TexelFormat {
        self.format
    }
}

impl Drop for GraphicsRenderPass {
    fn drop(&mut self) {
        self.native.destroy_render_pass(self.handle);
    }
}

impl fmt::Debug for GraphicsRenderPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsRenderPass")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .finish()
    }
}

/// A graphics pipeline.
pub struct GraphicsPipeline {
    native: Arc<dyn NativeDevice>,
    handle: PipelineHandle,
    signature: Arc<GraphicsPipelineSignature>,
    vertex_shader: Option<Arc<GraphicsShader>>,
    pixel_shader: Option<Arc<GraphicsShader>>,
    render_pass: Arc<GraphicsRenderPass>,
}

impl GraphicsPipeline {
    pub(crate) fn new(
        native: Arc<dyn NativeDevice>,
        handle: PipelineHandle,
        signature: Arc<GraphicsPipelineSignature>,
        vertex_shader: Option<Arc<GraphicsShader>>,
        pixel_shader: Option<Arc<GraphicsShader>>,
        render_pass: Arc<GraphicsRenderPass>,
    ) -> Self {
        Self {
            native,
            handle,
            signature,
            vertex_shader,
            pixel_shader,
            render_pass,
        }
    }

    /// Device the pipeline was created on.
    pub fn device_id(&self) -> DeviceId {
        self.signature.device_id()
    }

    /// Native handle.
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    /// Signature the pipeline was built against.
    pub fn signature(&self) -> &Arc<GraphicsPipelineSignature> {
        &self.signature
    }

    /// Vertex stage, if any.
    pub fn vertex_shader(&self) -> Option<&Arc<GraphicsShader>> {
        self.vertex_shader.as_ref()
    }

    /// Pixel stage, if any.
    pub fn pixel_shader(&self) -> Option<&Arc<GraphicsShader>> {
        self.pixel_shader.as_ref()
    }

    /// Render pass the pipeline renders into.
    pub fn render_pass(&self) -> &Arc<GraphicsRenderPass> {
        &self.render_pass
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.native.destroy_pipeline(self.handle);
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("handle", &self.handle)
            .field("signature", &self.signature.handle())
            .field("render_pass", &self.render_pass.handle())
            .finish()
    }
}
