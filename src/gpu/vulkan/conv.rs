//! Conversions between backend-neutral types and Vulkan enums.

use ash::vk;

use crate::error::{NativeError, NativeErrorKind};
use crate::gpu::types::*;
use crate::util::layout::align_up;

pub(super) fn native_error(api: &'static str, result: vk::Result) -> NativeError {
    let kind = match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => NativeErrorKind::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => NativeErrorKind::OutOfDeviceMemory,
        vk::Result::ERROR_DEVICE_LOST => NativeErrorKind::DeviceLost,
        vk::Result::ERROR_OUT_OF_DATE_KHR => NativeErrorKind::SwapchainOutOfDate,
        vk::Result::TIMEOUT => NativeErrorKind::Timeout,
        _ => NativeErrorKind::Other,
    };
    NativeError::new(api, i64::from(result.as_raw()), kind)
}

/// Error for a handle the backend does not know.
pub(super) fn unknown_handle(api: &'static str) -> NativeError {
    native_error(api, vk::Result::ERROR_UNKNOWN)
}

pub fn map_texel_format(format: TexelFormat) -> vk::Format {
    match format {
        TexelFormat::R8Unorm => vk::Format::R8_UNORM,
        TexelFormat::R8G8Unorm => vk::Format::R8G8_UNORM,
        TexelFormat::R8G8B8Unorm => vk::Format::R8G8B8_UNORM,
        TexelFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        TexelFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        TexelFormat::R32Float => vk::Format::R32_SFLOAT,
        TexelFormat::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn map_vk_format(format: vk::Format) -> Option<TexelFormat> {
    Some(match format {
        vk::Format::R8_UNORM => TexelFormat::R8Unorm,
        vk::Format::R8G8_UNORM => TexelFormat::R8G8Unorm,
        vk::Format::R8G8B8_UNORM => TexelFormat::R8G8B8Unorm,
        vk::Format::R8G8B8A8_UNORM => TexelFormat::R8G8B8A8Unorm,
        vk::Format::B8G8R8A8_UNORM => TexelFormat::B8G8R8A8Unorm,
        vk::Format::R32_SFLOAT => TexelFormat::R32Float,
        vk::Format::R32G32B32A32_SFLOAT => TexelFormat::R32G32B32A32Float,
        _ => return None,
    })
}

pub fn map_element_format(format: ElementFormat) -> vk::Format {
    match format {
        ElementFormat::Float2 => vk::Format::R32G32_SFLOAT,
        ElementFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        ElementFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub fn map_index_format(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub fn map_memory_properties(flags: vk::MemoryPropertyFlags) -> MemoryProperties {
    let mut properties = MemoryProperties::empty();
    if flags.contains(vk::MemoryPropertyFlags::DEVICE_LOCAL) {
        properties |= MemoryProperties::DEVICE_LOCAL;
    }
    if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        properties |= MemoryProperties::HOST_VISIBLE;
    }
    if flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
        properties |= MemoryProperties::HOST_COHERENT;
    }
    if flags.contains(vk::MemoryPropertyFlags::HOST_CACHED) {
        properties |= MemoryProperties::HOST_CACHED;
    }
    properties
}

pub fn map_buffer_usage(kind: BufferKind) -> vk::BufferUsageFlags {
    let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    match kind {
        BufferKind::Default => transfer,
        BufferKind::Vertex => transfer | vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferKind::Index => transfer | vk::BufferUsageFlags::INDEX_BUFFER,
        BufferKind::Constant => transfer | vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

pub fn map_texture_kind(kind: TextureKind) -> (vk::ImageType, vk::ImageViewType) {
    match kind {
        TextureKind::OneDimensional => (vk::ImageType::TYPE_1D, vk::ImageViewType::TYPE_1D),
        TextureKind::TwoDimensional => (vk::ImageType::TYPE_2D, vk::ImageViewType::TYPE_2D),
        TextureKind::ThreeDimensional => (vk::ImageType::TYPE_3D, vk::ImageViewType::TYPE_3D),
    }
}

/// Mapped textures must be linear so the CPU can address their rows.
pub fn map_tiling(cpu_access: CpuAccess) -> vk::ImageTiling {
    if cpu_access.is_cpu_visible() {
        vk::ImageTiling::LINEAR
    } else {
        vk::ImageTiling::OPTIMAL
    }
}

pub fn map_shader_visibility(visibility: ShaderVisibility) -> vk::ShaderStageFlags {
    match visibility {
        ShaderVisibility::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderVisibility::Pixel => vk::ShaderStageFlags::FRAGMENT,
        ShaderVisibility::All => vk::ShaderStageFlags::ALL_GRAPHICS,
    }
}

pub fn map_shader_kind(kind: ShaderKind) -> vk::ShaderStageFlags {
    match kind {
        ShaderKind::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderKind::Pixel => vk::ShaderStageFlags::FRAGMENT,
    }
}

pub fn map_binding_kind(kind: ResourceBindingKind) -> vk::DescriptorType {
    match kind {
        ResourceBindingKind::ConstantBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ResourceBindingKind::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

/// Layout, access mask and pipeline stage a resource state stands for.
pub struct StateInfo {
    pub layout: vk::ImageLayout,
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

pub fn map_state(state: ResourceState) -> StateInfo {
    let (layout, access, stage) = match state {
        ResourceState::Common => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        ResourceState::GenericRead => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::MEMORY_READ,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        ResourceState::VertexAndConstantBuffer => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ | vk::AccessFlags::UNIFORM_READ,
            vk::PipelineStageFlags::VERTEX_INPUT
                | vk::PipelineStageFlags::VERTEX_SHADER
                | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ResourceState::IndexBuffer => (
            vk::ImageLayout::GENERAL,
            vk::AccessFlags::INDEX_READ,
            vk::PipelineStageFlags::VERTEX_INPUT,
        ),
        ResourceState::PixelShaderResource => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        ResourceState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        ResourceState::RenderTarget => (
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        ResourceState::Present => (
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    };
    StateInfo {
        layout,
        access,
        stage,
    }
}

pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

pub fn map_extent_3d(extent: Extent3d) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.width.max(1),
        height: extent.height.max(1),
        depth: extent.depth.max(1),
    }
}

pub fn map_extent_2d(extent: Extent2d) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

/// `bufferRowLength` is counted in texels, so the pitch must hold a whole
/// number of texels as well as honour the driver's preferred alignment.
pub fn copyable_footprint(desc: &TextureDescriptor, pitch_alignment: u64) -> CopyableFootprint {
    let alignment = pitch_alignment.max(1);
    let texel = u64::from(desc.format.bytes_per_texel());
    let row_size = desc.row_size();
    let mut row_pitch = align_up(row_size, alignment);
    while row_pitch % texel != 0 {
        row_pitch += alignment;
    }
    let rows = desc.height.max(1);
    let depth = u32::from(desc.depth.max(1));
    let row_count = u64::from(rows) * u64::from(depth);
    CopyableFootprint {
        offset: 0,
        row_pitch,
        row_size,
        rows,
        depth,
        total_bytes: row_pitch * (row_count - 1) + row_size,
    }
}

pub fn buffer_image_copy(
    format: TexelFormat,
    extent: Extent3d,
    footprint: &CopyableFootprint,
) -> vk::BufferImageCopy {
    let texel = u64::from(format.bytes_per_texel());
    vk::BufferImageCopy {
        buffer_offset: footprint.offset,
        buffer_row_length: (footprint.row_pitch / texel) as u32,
        buffer_image_height: footprint.rows,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: map_extent_3d(extent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_footprint_pitch_holds_whole_texels() {
        let desc = TextureDescriptor::new_2d(TexelFormat::R8G8B8Unorm, 257, 2, CpuAccess::None);
        let footprint = copyable_footprint(&desc, 256);
        assert_eq!(footprint.row_size, 771);
        assert_eq!(footprint.row_pitch, 1536);

        let rgba = TextureDescriptor::new_2d(TexelFormat::R8G8B8A8Unorm, 257, 2, CpuAccess::None);
        assert_eq!(copyable_footprint(&rgba, 256).row_pitch, 1280);

        let region = buffer_image_copy(TexelFormat::R8G8B8Unorm, desc.extent(), &footprint);
        assert_eq!(region.buffer_row_length, 512);
        assert_eq!(region.image_extent.depth, 1);
    }

    #[test]
    fn test_format_round_trip_and_errors() {
        assert_eq!(
            map_vk_format(map_texel_format(TexelFormat::B8G8R8A8Unorm)),
            Some(TexelFormat::B8G8R8A8Unorm)
        );
        assert_eq!(map_vk_format(vk::Format::D32_SFLOAT), None);

        let error = native_error("present", vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(error.kind, NativeErrorKind::SwapchainOutOfDate);
        assert_eq!(error.code, -1_000_001_004);
        assert!(native_error("allocate_memory", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            .is_out_of_memory());
    }

    #[test]
    fn test_copy_states_use_transfer_layouts() {
        assert_eq!(
            map_state(ResourceState::CopyDest).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            map_state(ResourceState::Present).layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert!(map_memory_properties(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        )
        .contains(MemoryProperties::HOST_COHERENT));
    }
}
