//! Renderable primitives.

use std::fmt;
use std::sync::Arc;

use crate::error::{GraphicsError, Result};
use crate::gpu::traits::NativeDevice;
use crate::gpu::types::{
    BindingResource, BindingSetHandle, BufferKind, DrawCommand, IndexBufferBinding, IndexFormat,
    NativeResource, ResourceBindingKind, VertexBufferBinding,
};
use crate::graphics::device::DeviceId;
use crate::graphics::pipeline::GraphicsPipeline;
use crate::graphics::resource::{GraphicsResource, ResourceKind};
use crate::memory::region::{MemoryRegion, RegionCollection};

/// Inputs of [`GraphicsDevice::create_primitive`](crate::GraphicsDevice::create_primitive).
#[derive(Debug, Clone)]
pub struct PrimitiveDescriptor {
    /// Pipeline the primitive is drawn with.
    pub pipeline: Arc<GraphicsPipeline>,
    /// Region of a vertex buffer holding the vertices.
    pub vertex_region: MemoryRegion<GraphicsResource>,
    /// Bytes per vertex.
    pub vertex_stride: u32,
    /// Region of an index buffer, for indexed draws.
    pub index_region: Option<MemoryRegion<GraphicsResource>>,
    /// Bytes per index: 2 or 4.
    pub index_stride: u32,
    /// One region per resource slot of the pipeline signature. Buffer
    /// regions bind as constant buffers, texture regions as textures.
    pub input_regions: Vec<MemoryRegion<GraphicsResource>>,
}

impl PrimitiveDescriptor {
    /// Non-indexed primitive without resource inputs.
    pub fn new(
        pipeline: Arc<GraphicsPipeline>,
        vertex_region: MemoryRegion<GraphicsResource>,
        vertex_stride: u32,
    ) -> Self {
        Self {
            pipeline,
            vertex_region,
            vertex_stride,
            index_region: None,
            index_stride: 0,
            input_regions: Vec::new(),
        }
    }

    /// Draw indexed from `region` with `stride` bytes per index.
    pub fn with_indices(mut self, region: MemoryRegion<GraphicsResource>, stride: u32) -> Self {
        self.index_region = Some(region);
        self.index_stride = stride;
        self
    }

    /// Bind `regions` to the signature's resource slots.
    pub fn with_inputs(mut self, regions: Vec<MemoryRegion<GraphicsResource>>) -> Self {
        self.input_regions = regions;
        self
    }
}

struct IndexData {
    buffer: Arc<GraphicsResource>,
    region: MemoryRegion<GraphicsResource>,
    format: IndexFormat,
    stride: u32,
    count: u32,
}

/// The smallest drawable unit: a pipeline plus the regions it reads.
///
/// Immutable after creation. The primitive keeps the parent resources of
/// its regions alive but does not free the regions; they belong to whoever
/// allocated them.
pub struct GraphicsPrimitive {
    device_id: DeviceId,
    native: Arc<dyn NativeDevice>,
    pipeline: Arc<GraphicsPipeline>,
    vertex_buffer: Arc<GraphicsResource>,
    vertex_region: MemoryRegion<GraphicsResource>,
    vertex_stride: u32,
    vertex_count: u32,
    index: Option<IndexData>,
    inputs: Vec<(Arc<GraphicsResource>, MemoryRegion<GraphicsResource>)>,
    binding_set: Option<BindingSetHandle>,
}

impl GraphicsPrimitive {
    /// Validate `desc` against `device_id` and create the binding set.
    pub(crate) fn new(
        device_id: DeviceId,
        native: Arc<dyn NativeDevice>,
        desc: PrimitiveDescriptor,
    ) -> Result<Self> {
        if desc.pipeline.device_id() != device_id {
            return Err(foreign("pipeline"));
        }

        let vertex_buffer = owned_parent(&desc.vertex_region, device_id, "vertex_region")?;
        if vertex_buffer.buffer_kind() != Some(BufferKind::Vertex) {
            return Err(GraphicsError::invalid_argument(
                "vertex_region",
                format!("parent is {:?}, not a vertex buffer", vertex_buffer.kind()),
            ));
        }
        if desc.vertex_stride == 0 {
            return Err(GraphicsError::invalid_argument(
                "vertex_stride",
                "must be greater than zero",
            ));
        }
        let vertex_count = element_count(&desc.vertex_region, desc.vertex_stride, "vertex_region")?;

        let index = match desc.index_region {
            Some(region) => {
                let buffer = owned_parent(&region, device_id, "index_region")?;
                if buffer.buffer_kind() != Some(BufferKind::Index) {
                    return Err(GraphicsError::invalid_argument(
                        "index_region",
                        format!("parent is {:?}, not an index buffer", buffer.kind()),
                    ));
                }
                let format = IndexFormat::from_stride(desc.index_stride).ok_or_else(|| {
                    GraphicsError::invalid_argument(
                        "index_stride",
                        format!("{} is neither 2 nor 4", desc.index_stride),
                    )
                })?;
                let count = element_count(&region, desc.index_stride, "index_region")?;
                Some(IndexData {
                    buffer,
                    region,
                    format,
                    stride: desc.index_stride,
                    count,
                })
            }
            None => None,
        };

        let slots = desc.pipeline.signature().resources();
        if slots.len() != desc.input_regions.len() {
            return Err(GraphicsError::invalid_argument(
                "input_regions",
                format!(
                    "signature has {} resource slots, {} regions given",
                    slots.len(),
                    desc.input_regions.len()
                ),
            ));
        }

        let mut inputs = Vec::with_capacity(desc.input_regions.len());
        let mut bindings = Vec::with_capacity(desc.input_regions.len());
        for (region, slot) in desc.input_regions.into_iter().zip(slots) {
            let resource = owned_parent(&region, device_id, "input_regions")?;
            let binding = match (resource.native(), resource.kind()) {
                (NativeResource::Buffer(buffer), ResourceKind::Buffer(_)) => {
                    BindingResource::ConstantBuffer {
                        buffer,
                        offset: region.offset(),
                        size: region.size(),
                    }
                }
                (NativeResource::Image(image), ResourceKind::Texture(texture)) => {
                    BindingResource::Texture {
                        image,
                        format: texture.format,
                    }
                }
                _ => {
                    return Err(GraphicsError::invalid_argument(
                        "input_regions",
                        "resource kind does not match its native handle",
                    ))
                }
            };
            let expected = match binding {
                BindingResource::ConstantBuffer { .. } => ResourceBindingKind::ConstantBuffer,
                BindingResource::Texture { .. } => ResourceBindingKind::Texture,
            };
            if slot.kind != expected {
                return Err(GraphicsError::invalid_argument(
                    "input_regions",
                    format!("{:?} bound to a {:?} slot", expected, slot.kind),
                ));
            }
            bindings.push(binding);
            inputs.push((resource, region));
        }

        let binding_set = if bindings.is_empty() {
            None
        } else {
            Some(native.create_binding_set(desc.pipeline.signature().handle(), &bindings)?)
        };

        Ok(Self {
            device_id,
            native,
            pipeline: desc.pipeline,
            vertex_buffer,
            vertex_region: desc.vertex_region,
            vertex_stride: desc.vertex_stride,
            vertex_count,
            index,
            inputs,
            binding_set,
        })
    }

    /// Device the primitive was created on.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Pipeline used to draw the primitive.
    pub fn pipeline(&self) -> &Arc<GraphicsPipeline> {
        &self.pipeline
    }

    /// Region holding the vertices.
    pub fn vertex_region(&self) -> &MemoryRegion<GraphicsResource> {
        &self.vertex_region
    }

    /// Bytes per vertex.
    pub fn vertex_stride(&self) -> u32 {
        self.vertex_stride
    }

    /// Number of vertices drawn.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Region holding the indices, if indexed.
    pub fn index_region(&self) -> Option<&MemoryRegion<GraphicsResource>> {
        self.index.as_ref().map(|index| &index.region)
    }

    /// Bytes per index, or 0 when not indexed.
    pub fn index_stride(&self) -> u32 {
        self.index.as_ref().map_or(0, |index| index.stride)
    }

    /// Number of indices drawn, or 0 when not indexed.
    pub fn index_count(&self) -> u32 {
        self.index.as_ref().map_or(0, |index| index.count)
    }

    /// Regions bound to the signature's resource slots.
    pub fn input_regions(&self) -> impl Iterator<Item = &MemoryRegion<GraphicsResource>> {
        self.inputs.iter().map(|(_, region)| region)
    }

    /// The draw a context records for this primitive.
    pub(crate) fn draw_command(&self) -> Result<DrawCommand> {
        self.vertex_buffer.ensure_alive()?;
        let vertex_buffer = match self.vertex_buffer.native() {
            NativeResource::Buffer(buffer) => buffer,
            NativeResource::Image(_) => {
                return Err(GraphicsError::invalid_argument("vertex_region", "not a buffer"))
            }
        };
        let index_buffer = match &self.index {
            Some(index) => {
                index.buffer.ensure_alive()?;
                match index.buffer.native() {
                    NativeResource::Buffer(buffer) => Some(IndexBufferBinding {
                        buffer,
                        offset: index.region.offset(),
                        format: index.format,
                        count: self.index_count(),
                    }),
                    NativeResource::Image(_) => {
                        return Err(GraphicsError::invalid_argument("index_region", "not a buffer"))
                    }
                }
            }
            None => None,
        };
        for (resource, _) in &self.inputs {
            resource.ensure_alive()?;
        }

        Ok(DrawCommand {
            pipeline: self.pipeline.handle(),
            signature: self.pipeline.signature().handle(),
            binding_set: self.binding_set,
            vertex_buffer: VertexBufferBinding {
                buffer: vertex_buffer,
                offset: self.vertex_region.offset(),
                stride: self.vertex_stride,
            },
            vertex_count: self.vertex_count(),
            index_buffer,
        })
    }
}

impl Drop for GraphicsPrimitive {
    fn drop(&mut self) {
        if let Some(set) = self.binding_set.take() {
            self.native.destroy_binding_set(set);
        }
    }
}

impl fmt::Debug for GraphicsPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPrimitive")
            .field("pipeline", &self.pipeline.handle())
            .field("vertex_region", &self.vertex_region)
            .field("vertex_stride", &self.vertex_stride)
            .field("index_count", &self.index_count())
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

fn foreign(name: &'static str) -> GraphicsError {
    GraphicsError::invalid_argument(name, "belongs to a different device")
}

/// Whole elements of `stride` bytes in `region`. Draw counts are 32-bit.
fn element_count(
    region: &MemoryRegion<GraphicsResource>,
    stride: u32,
    name: &'static str,
) -> Result<u32> {
    let count = region.size() / u64::from(stride);
    u32::try_from(count).map_err(|_| {
        GraphicsError::invalid_argument(name, format!("{} elements exceed a 32-bit draw count", count))
    })
}

/// The live parent of `region`, checked to belong to `device_id`.
fn owned_parent(
    region: &MemoryRegion<GraphicsResource>,
    device_id: DeviceId,
    name: &'static str,
) -> Result<Arc<GraphicsResource>> {
    let parent = region
        .parent()
        .ok_or_else(|| GraphicsError::invalid_argument(name, "parent resource was dropped"))?;
    parent.ensure_alive()?;
    if parent.device_id() != device_id {
        return Err(foreign(name));
    }
    if !parent.contains_allocated(region) {
        return Err(GraphicsError::invalid_argument(name, "region is not allocated"));
    }
    Ok(parent)
}
