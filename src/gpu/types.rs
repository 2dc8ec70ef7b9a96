//! Backend-neutral descriptors, handles and recorded commands.
//!
//! These types cross the boundary between the object model and a native
//! backend. Handles are opaque `u64`s; each backend decides what they mean
//! (a Vulkan handle's raw value, a key into a table, ...).

use bitflags::bitflags;

macro_rules! native_handles {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

native_handles! {
    /// A native device-memory allocation.
    MemoryHandle;
    /// A native buffer.
    BufferHandle;
    /// A native image.
    ImageHandle;
    /// A native fence.
    FenceHandle;
    /// A native command allocator (command pool).
    CommandAllocatorHandle;
    /// A native command list (command buffer).
    CommandListHandle;
    /// A native swapchain.
    SwapchainHandle;
    /// A render-target view bound to a render pass.
    RenderTargetViewHandle;
    /// A native render pass.
    RenderPassHandle;
    /// A native shader module.
    ShaderHandle;
    /// A native pipeline signature (root signature / pipeline layout).
    SignatureHandle;
    /// A native pipeline.
    PipelineHandle;
    /// A native set of resource bindings for one draw.
    BindingSetHandle;
}

/// Which backend family a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process software emulation.
    Software,
    /// Vulkan.
    Vulkan,
}

/// Information about the physical adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Human readable adapter name.
    pub name: String,
    /// Backend family.
    pub backend: BackendKind,
    /// PCI vendor id, or 0.
    pub vendor_id: u32,
    /// PCI device id, or 0.
    pub device_id: u32,
}

bitflags! {
    /// Properties of a native memory type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryProperties: u32 {
        /// Fastest for GPU access.
        const DEVICE_LOCAL = 1 << 0;
        /// Can be mapped by the CPU.
        const HOST_VISIBLE = 1 << 1;
        /// CPU writes/reads need no explicit flush/invalidate.
        const HOST_COHERENT = 1 << 2;
        /// CPU reads are cached.
        const HOST_CACHED = 1 << 3;
    }
}

/// One native memory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryType {
    /// Index used by the native API.
    pub index: u32,
    /// Properties.
    pub properties: MemoryProperties,
    /// Size of the heap backing this type.
    pub heap_size: u64,
}

impl MemoryType {
    /// Whether the CPU can map this memory.
    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(MemoryProperties::HOST_VISIBLE)
    }

    /// Whether mapped writes/reads need explicit flush/invalidate.
    pub fn is_non_coherent(&self) -> bool {
        self.is_host_visible() && !self.properties.contains(MemoryProperties::HOST_COHERENT)
    }
}

/// Device limits the object model depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Granularity of flush/invalidate ranges on non-coherent memory.
    pub non_coherent_atom_size: u64,
    /// Largest single device-memory allocation.
    pub max_memory_allocation_size: u64,
    /// Required alignment of constant-buffer regions.
    pub constant_buffer_alignment: u64,
}

/// Size and placement requirements of a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Bytes to reserve.
    pub size: u64,
    /// Required alignment of the binding offset.
    pub alignment: u64,
    /// Bit `i` set means memory type `i` is acceptable.
    pub memory_type_bits: u32,
}

/// How the CPU may access a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuAccess {
    /// GPU-exclusive, never mapped.
    None,
    /// GPU-exclusive, placed in device-local memory.
    GpuOnly,
    /// Upload: the CPU writes, the GPU reads.
    CpuToGpu,
    /// Readback: the GPU writes, the CPU reads.
    GpuToCpu,
}

impl CpuAccess {
    /// Whether the resource can be mapped.
    pub fn is_cpu_visible(&self) -> bool {
        matches!(self, Self::CpuToGpu | Self::GpuToCpu)
    }

    /// Whether the resource is only touched by the GPU.
    pub fn is_gpu_exclusive(&self) -> bool {
        !self.is_cpu_visible()
    }
}

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// General purpose (staging, readback).
    Default,
    /// Vertex data.
    Vertex,
    /// Index data.
    Index,
    /// Shader constants.
    Constant,
}

/// Parameters for creating a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Usage.
    pub kind: BufferKind,
    /// CPU access.
    pub cpu_access: CpuAccess,
    /// Size in bytes.
    pub size: u64,
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Width only.
    OneDimensional,
    /// Width and height.
    TwoDimensional,
    /// Width, height and depth.
    ThreeDimensional,
}

/// Texel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    /// One 8-bit channel.
    R8Unorm,
    /// Two 8-bit channels.
    R8G8Unorm,
    /// Three 8-bit channels, no padding.
    R8G8B8Unorm,
    /// Four 8-bit channels.
    R8G8B8A8Unorm,
    /// Four 8-bit channels, blue first (typical swapchain format).
    B8G8R8A8Unorm,
    /// One 32-bit float channel.
    R32Float,
    /// Four 32-bit float channels.
    R32G32B32A32Float,
}

impl TexelFormat {
    /// Bytes per texel.
    pub const fn bytes_per_texel(&self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R8G8Unorm => 2,
            Self::R8G8B8Unorm => 3,
            Self::R8G8B8A8Unorm | Self::B8G8R8A8Unorm | Self::R32Float => 4,
            Self::R32G32B32A32Float => 16,
        }
    }
}

/// Parameters for creating a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Dimensionality.
    pub kind: TextureKind,
    /// CPU access.
    pub cpu_access: CpuAccess,
    /// Texel format.
    pub format: TexelFormat,
    /// Width in texels.
    pub width: u32,
    /// Height in texels (1 for 1D).
    pub height: u32,
    /// Depth in texels (1 for 1D/2D).
    pub depth: u16,
}

impl TextureDescriptor {
    /// A 2D texture.
    pub fn new_2d(format: TexelFormat, width: u32, height: u32, cpu_access: CpuAccess) -> Self {
        Self {
            kind: TextureKind::TwoDimensional,
            cpu_access,
            format,
            width,
            height,
            depth: 1,
        }
    }

    /// A 3D texture.
    pub fn new_3d(
        format: TexelFormat,
        width: u32,
        height: u32,
        depth: u16,
        cpu_access: CpuAccess,
    ) -> Self {
        Self {
            kind: TextureKind::ThreeDimensional,
            cpu_access,
            format,
            width,
            height,
            depth,
        }
    }

    /// Tightly packed bytes per row.
    pub fn row_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.format.bytes_per_texel())
    }

    /// Extent of the whole texture.
    pub fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth: u32::from(self.depth),
        }
    }
}

/// Layout of a texture's data inside a buffer, as required by the backend
/// for buffer/texture copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyableFootprint {
    /// Offset of the first row inside the buffer.
    pub offset: u64,
    /// Distance in bytes between the starts of consecutive rows.
    pub row_pitch: u64,
    /// Meaningful bytes in each row.
    pub row_size: u64,
    /// Rows per depth slice.
    pub rows: u32,
    /// Depth slices.
    pub depth: u32,
    /// Bytes the buffer must provide, starting at `offset`.
    pub total_bytes: u64,
}

impl CopyableFootprint {
    /// Compute a footprint for `desc` with rows aligned to `pitch_alignment`.
    pub fn for_texture(desc: &TextureDescriptor, pitch_alignment: u64) -> Self {
        let row_size = desc.row_size();
        let row_pitch = crate::util::layout::align_up(row_size, pitch_alignment.max(1));
        let rows = desc.height.max(1);
        let depth = u32::from(desc.depth.max(1));
        let row_count = u64::from(rows) * u64::from(depth);
        Self {
            offset: 0,
            row_pitch,
            row_size,
            rows,
            depth,
            total_bytes: row_pitch * (row_count - 1) + row_size,
        }
    }

    /// Byte offset of `row` in depth slice `slice`, relative to the buffer start.
    pub fn row_offset(&self, row: u32, slice: u32) -> u64 {
        let index = u64::from(slice) * u64::from(self.rows) + u64::from(row);
        self.offset + index * self.row_pitch
    }

    /// Copy tightly packed texel rows from `linear` into `pitched`, laid out
    /// with this footprint.
    ///
    /// Returns `false` if either slice is too small.
    pub fn pack(&self, linear: &[u8], pitched: &mut [u8]) -> bool {
        let row = self.row_size as usize;
        if (linear.len() as u64) < self.row_size * u64::from(self.rows) * u64::from(self.depth)
            || (pitched.len() as u64) < self.offset + self.total_bytes
        {
            return false;
        }
        for slice in 0..self.depth {
            for y in 0..self.rows {
                let src = (slice as usize * self.rows as usize + y as usize) * row;
                let dst = self.row_offset(y, slice) as usize;
                pitched[dst..dst + row].copy_from_slice(&linear[src..src + row]);
            }
        }
        true
    }

    /// Inverse of [`pack`](Self::pack).
    pub fn unpack(&self, pitched: &[u8], linear: &mut [u8]) -> bool {
        let row = self.row_size as usize;
        if (linear.len() as u64) < self.row_size * u64::from(self.rows) * u64::from(self.depth)
            || (pitched.len() as u64) < self.offset + self.total_bytes
        {
            return false;
        }
        for slice in 0..self.depth {
            for y in 0..self.rows {
                let dst = (slice as usize * self.rows as usize + y as usize) * row;
                let src = self.row_offset(y, slice) as usize;
                linear[dst..dst + row].copy_from_slice(&pitched[src..src + row]);
            }
        }
        true
    }
}

/// Resource states used for barriers. Names follow the D3D12 states; the
/// Vulkan backend translates them to image layouts and access masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// No particular use.
    Common,
    /// Readable by every stage; required for upload memory.
    GenericRead,
    /// Bound as vertex or constant buffer.
    VertexAndConstantBuffer,
    /// Bound as index buffer.
    IndexBuffer,
    /// Sampled from pixel shaders.
    PixelShaderResource,
    /// Copy source.
    CopySource,
    /// Copy destination.
    CopyDest,
    /// Colour attachment.
    RenderTarget,
    /// Ready for presentation.
    Present,
}

impl ResourceState {
    /// State a buffer rests in between copies.
    pub fn resting_for_buffer(kind: BufferKind, cpu_access: CpuAccess) -> Self {
        match cpu_access {
            CpuAccess::CpuToGpu => Self::GenericRead,
            CpuAccess::GpuToCpu => Self::CopyDest,
            CpuAccess::None | CpuAccess::GpuOnly => match kind {
                BufferKind::Vertex | BufferKind::Constant => Self::VertexAndConstantBuffer,
                BufferKind::Index => Self::IndexBuffer,
                BufferKind::Default => Self::Common,
            },
        }
    }

    /// State a texture rests in between copies.
    pub fn resting_for_texture(cpu_access: CpuAccess) -> Self {
        match cpu_access {
            CpuAccess::CpuToGpu => Self::GenericRead,
            CpuAccess::GpuToCpu => Self::CopyDest,
            CpuAccess::None | CpuAccess::GpuOnly => Self::PixelShaderResource,
        }
    }
}

/// A buffer or image handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeResource {
    /// A buffer.
    Buffer(BufferHandle),
    /// An image.
    Image(ImageHandle),
}

/// One state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBarrier {
    /// Resource to transition.
    pub resource: NativeResource,
    /// Current state.
    pub before: ResourceState,
    /// New state.
    pub after: ResourceState,
}

/// A range of mapped memory to flush or invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    /// Memory allocation.
    pub memory: MemoryHandle,
    /// Offset from the start of the allocation.
    pub offset: u64,
    /// Length in bytes.
    pub size: u64,
}

/// Width and height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent2d {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Extent2d {
    /// Create an extent.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Width, height and depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
    /// Depth.
    pub depth: u32,
}

/// Viewport transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width.
    pub width: f32,
    /// Height.
    pub height: f32,
    /// Near depth.
    pub min_depth: f32,
    /// Far depth.
    pub max_depth: f32,
}

impl Viewport {
    /// A viewport covering `extent` with the full depth range.
    pub fn covering(extent: Extent2d) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl ScissorRect {
    /// A rectangle covering `extent`.
    pub fn covering(extent: Extent2d) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }
}

/// Index element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    U32,
}

impl IndexFormat {
    /// Format for an index stride in bytes.
    pub fn from_stride(stride: u32) -> Option<Self> {
        match stride {
            2 => Some(Self::U16),
            4 => Some(Self::U32),
            _ => None,
        }
    }
}

/// Vertex buffer bound for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferBinding {
    /// Buffer.
    pub buffer: BufferHandle,
    /// Offset of the first vertex inside the buffer.
    pub offset: u64,
    /// Bytes per vertex.
    pub stride: u32,
}

/// Index buffer bound for a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferBinding {
    /// Buffer.
    pub buffer: BufferHandle,
    /// Offset of the first index inside the buffer.
    pub offset: u64,
    /// Element size.
    pub format: IndexFormat,
    /// Number of indices.
    pub count: u32,
}

/// A recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCommand {
    /// Pipeline.
    pub pipeline: PipelineHandle,
    /// Signature the pipeline was built against.
    pub signature: SignatureHandle,
    /// Resource bindings, if the primitive has any.
    pub binding_set: Option<BindingSetHandle>,
    /// Vertex buffer.
    pub vertex_buffer: VertexBufferBinding,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Optional index buffer; when present an indexed draw is issued.
    pub index_buffer: Option<IndexBufferBinding>,
}

/// A command recorded into a native command list.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// State transitions, applied in order.
    Barrier(Vec<ResourceBarrier>),
    /// Begin rendering into `target`, clearing it.
    BeginRenderPass {
        /// Render pass.
        render_pass: RenderPassHandle,
        /// Target view.
        target: RenderTargetViewHandle,
        /// Target size.
        extent: Extent2d,
        /// RGBA clear colour.
        clear_color: [f32; 4],
    },
    /// Set the viewport.
    SetViewport(Viewport),
    /// Set the scissor rectangle.
    SetScissor(ScissorRect),
    /// End the current render pass.
    EndRenderPass,
    /// Copy `size` bytes from the start of `source` to the start of `destination`.
    CopyBuffer {
        /// Destination.
        destination: BufferHandle,
        /// Source.
        source: BufferHandle,
        /// Bytes to copy.
        size: u64,
    },
    /// Upload texel rows laid out with `footprint` into an image.
    CopyBufferToImage {
        /// Destination image.
        destination: ImageHandle,
        /// State of the destination during the copy.
        destination_state: ResourceState,
        /// Source buffer.
        source: BufferHandle,
        /// Texel format.
        format: TexelFormat,
        /// Extent of the copied region.
        extent: Extent3d,
        /// Layout of the source data.
        footprint: CopyableFootprint,
    },
    /// Read texel rows from an image into a buffer laid out with `footprint`.
    CopyImageToBuffer {
        /// Destination buffer.
        destination: BufferHandle,
        /// Source image.
        source: ImageHandle,
        /// State of the source during the copy.
        source_state: ResourceState,
        /// Texel format.
        format: TexelFormat,
        /// Extent of the copied region.
        extent: Extent3d,
        /// Layout of the destination data.
        footprint: CopyableFootprint,
    },
    /// Draw a primitive.
    Draw(DrawCommand),
}

/// Kind of shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Vertex shader.
    Vertex,
    /// Pixel (fragment) shader.
    Pixel,
}

/// Semantic of a vertex input element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputElementKind {
    /// Position.
    Position,
    /// Vertex colour.
    Color,
    /// Texture coordinate.
    TextureCoordinate,
    /// Normal.
    Normal,
}

/// Format of a vertex input element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementFormat {
    /// Two floats.
    Float2,
    /// Three floats.
    Float3,
    /// Four floats.
    Float4,
}

impl ElementFormat {
    /// Size in bytes.
    pub const fn size(&self) -> u32 {
        match self {
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }
}

/// One element of the vertex layout; elements are packed in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputElement {
    /// Semantic.
    pub kind: InputElementKind,
    /// Format.
    pub format: ElementFormat,
}

/// Kind of resource bound through a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceBindingKind {
    /// Constant buffer region.
    ConstantBuffer,
    /// Sampled texture.
    Texture,
}

/// Shader stages a binding is visible to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    /// Vertex stage.
    Vertex,
    /// Pixel stage.
    Pixel,
    /// All stages.
    All,
}

/// One resource slot of a pipeline signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineResource {
    /// Kind.
    pub kind: ResourceBindingKind,
    /// Visibility.
    pub visibility: ShaderVisibility,
}

/// Parameters for creating a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineDescriptor {
    /// Signature.
    pub signature: SignatureHandle,
    /// Render pass the pipeline renders into.
    pub render_pass: RenderPassHandle,
    /// Vertex shader.
    pub vertex_shader: Option<ShaderHandle>,
    /// Pixel shader.
    pub pixel_shader: Option<ShaderHandle>,
}

/// A resource bound into a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingResource {
    /// A constant-buffer region.
    ConstantBuffer {
        /// Buffer.
        buffer: BufferHandle,
        /// Offset of the region.
        offset: u64,
        /// Size of the region.
        size: u64,
    },
    /// A texture.
    Texture {
        /// Image.
        image: ImageHandle,
        /// Format.
        format: TexelFormat,
    },
}

/// Presentation support reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationCapabilities {
    /// Fewest swapchain images.
    pub min_image_count: u32,
    /// Most swapchain images.
    pub max_image_count: u32,
    /// Supported formats, preferred first.
    pub formats: Vec<TexelFormat>,
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Image size.
    pub extent: Extent2d,
    /// Image format.
    pub format: TexelFormat,
    /// Number of images.
    pub image_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_pitch_alignment() {
        let desc = TextureDescriptor::new_2d(TexelFormat::R8G8B8Unorm, 257, 4, CpuAccess::None);
        let footprint = CopyableFootprint::for_texture(&desc, 256);
        assert_eq!(footprint.row_size, 771);
        assert_eq!(footprint.row_pitch, 1024);
        assert_eq!(footprint.total_bytes, 1024 * 3 + 771);
        assert_eq!(footprint.row_offset(2, 0), 2048);
    }

    #[test]
    fn test_footprint_pack_unpack() {
        let desc = TextureDescriptor::new_3d(TexelFormat::R8Unorm, 3, 2, 2, CpuAccess::None);
        let footprint = CopyableFootprint::for_texture(&desc, 4);
        let linear: Vec<u8> = (0..12).collect();
        let mut pitched = vec![0xEE; footprint.total_bytes as usize];
        assert!(footprint.pack(&linear, &mut pitched));
        assert_eq!(&pitched[0..4], &[0, 1, 2, 0xEE]);
        assert_eq!(&pitched[12..15], &[9, 10, 11]);

        let mut back = vec![0; 12];
        assert!(footprint.unpack(&pitched, &mut back));
        assert_eq!(back, linear);
        assert!(!footprint.pack(&linear[..5], &mut pitched));
    }

    #[test]
    fn test_resting_states() {
        assert_eq!(
            ResourceState::resting_for_buffer(BufferKind::Vertex, CpuAccess::GpuOnly),
            ResourceState::VertexAndConstantBuffer
        );
        assert_eq!(
            ResourceState::resting_for_buffer(BufferKind::Index, CpuAccess::None),
            ResourceState::IndexBuffer
        );
        assert_eq!(
            ResourceState::resting_for_buffer(BufferKind::Vertex, CpuAccess::CpuToGpu),
            ResourceState::GenericRead
        );
        assert_eq!(
            ResourceState::resting_for_texture(CpuAccess::GpuToCpu),
            ResourceState::CopyDest
        );
    }

    #[test]
    fn test_index_format_from_stride() {
        assert_eq!(IndexFormat::from_stride(2), Some(IndexFormat::U16));
        assert_eq!(IndexFormat::from_stride(4), Some(IndexFormat::U32));
        assert_eq!(IndexFormat::from_stride(3), None);
    }

    #[test]
    fn test_memory_type_coherence() {
        let upload = MemoryType {
            index: 1,
            properties: MemoryProperties::HOST_VISIBLE,
            heap_size: 1 << 20,
        };
        assert!(upload.is_non_coherent());
        let coherent = MemoryType {
            properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
            ..upload
        };
        assert!(!coherent.is_non_coherent());
    }
}
