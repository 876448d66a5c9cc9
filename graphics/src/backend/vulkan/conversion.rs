//! Type conversions between Aster types and Vulkan types.

use ash::vk;
use aster_core::mesh::{IndexFormat, PrimitiveTopology, VertexAttributeFormat};
use aster_core::sampler::{AddressMode, FilterMode};

use crate::error::GraphicsError;
use crate::types::{Access, BufferUsage, TextureFormat, TextureLayout, TextureUsage};

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::DEVICE_ADDRESS) {
        result |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_INPUT) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
    }
    if usage.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE) {
        result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
    }

    // MAP_WRITE affects the memory location, not the usage

    result
}

/// Convert TextureFormat to Vulkan format.
pub fn convert_texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
    }
}

/// Convert TextureUsage flags to Vulkan image usage flags.
pub fn convert_texture_usage(usage: TextureUsage) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(TextureUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(TextureUsage::TEXTURE_BINDING) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }

    result
}

/// Convert a texture layout to the Vulkan image layout.
pub fn convert_texture_layout(layout: TextureLayout) -> vk::ImageLayout {
    match layout {
        TextureLayout::Undefined => vk::ImageLayout::UNDEFINED,
        TextureLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        TextureLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    }
}

/// Access mask and stage that complete before leaving a layout.
pub fn texture_layout_source(layout: TextureLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        TextureLayout::Undefined => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        TextureLayout::TransferDst => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        TextureLayout::ShaderReadOnly => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    }
}

/// Access mask and stage that wait for a layout to be entered.
pub fn texture_layout_destination(
    layout: TextureLayout,
) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        TextureLayout::Undefined => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        TextureLayout::TransferDst => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        TextureLayout::ShaderReadOnly => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
    }
}

/// Convert access flags to the Vulkan access mask and the stages performing
/// those accesses.
pub fn convert_access(access: Access) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    let mut mask = vk::AccessFlags::empty();
    let mut stages = vk::PipelineStageFlags::empty();

    if access.contains(Access::TRANSFER_WRITE) {
        mask |= vk::AccessFlags::TRANSFER_WRITE;
        stages |= vk::PipelineStageFlags::TRANSFER;
    }
    if access.contains(Access::TRANSFER_READ) {
        mask |= vk::AccessFlags::TRANSFER_READ;
        stages |= vk::PipelineStageFlags::TRANSFER;
    }
    if access.contains(Access::VERTEX_ATTRIBUTE_READ) {
        mask |= vk::AccessFlags::VERTEX_ATTRIBUTE_READ;
        stages |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if access.contains(Access::INDEX_READ) {
        mask |= vk::AccessFlags::INDEX_READ;
        stages |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if access.contains(Access::SHADER_READ) {
        mask |= vk::AccessFlags::SHADER_READ;
        stages |= vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if access.contains(Access::ACCELERATION_STRUCTURE_BUILD_INPUT) {
        mask |= vk::AccessFlags::SHADER_READ;
        stages |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }
    if access.contains(Access::ACCELERATION_STRUCTURE_READ) {
        mask |= vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR;
        stages |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }
    if access.contains(Access::ACCELERATION_STRUCTURE_WRITE) {
        mask |= vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR;
        stages |= vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR;
    }

    if stages.is_empty() {
        stages = vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    (mask, stages)
}

/// Convert FilterMode to Vulkan filter.
pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

/// Convert FilterMode to Vulkan mipmap filter mode.
pub fn convert_mipmap_filter_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
    }
}

/// Convert IndexFormat to Vulkan index type.
pub fn convert_index_format(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::Uint16 => vk::IndexType::UINT16,
        IndexFormat::Uint32 => vk::IndexType::UINT32,
    }
}

/// Convert PrimitiveTopology to Vulkan topology.
pub fn convert_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
    }
}

/// Convert vertex attribute format to Vulkan format.
pub fn convert_vertex_format(format: VertexAttributeFormat) -> vk::Format {
    match format {
        VertexAttributeFormat::Float => vk::Format::R32_SFLOAT,
        VertexAttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexAttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexAttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexAttributeFormat::Unorm8x2 => vk::Format::R8G8_UNORM,
        VertexAttributeFormat::Unorm8x4 => vk::Format::R8G8B8A8_UNORM,
        VertexAttributeFormat::Snorm8x4 => vk::Format::R8G8B8A8_SNORM,
        VertexAttributeFormat::Unorm16x2 => vk::Format::R16G16_UNORM,
        VertexAttributeFormat::Unorm16x4 => vk::Format::R16G16B16A16_UNORM,
        VertexAttributeFormat::Snorm16x4 => vk::Format::R16G16B16A16_SNORM,
        VertexAttributeFormat::Uint8x4 => vk::Format::R8G8B8A8_UINT,
        VertexAttributeFormat::Uint16x4 => vk::Format::R16G16B16A16_UINT,
    }
}

/// Map a Vulkan error to a graphics error, keeping what was attempted.
pub fn convert_vk_error(context: &str, error: vk::Result) -> GraphicsError {
    match error {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            GraphicsError::OutOfMemory
        }
        _ => GraphicsError::Internal(format!("Failed to {}: {:?}", context, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_conversion() {
        let usage = convert_buffer_usage(
            BufferUsage::STORAGE | BufferUsage::DEVICE_ADDRESS | BufferUsage::MAP_WRITE,
        );
        assert_eq!(
            usage,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
        );
    }

    #[test]
    fn test_access_without_flags_waits_on_top_of_pipe() {
        let (mask, stages) = convert_access(Access::empty());
        assert!(mask.is_empty());
        assert_eq!(stages, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn test_vk_error_mapping() {
        assert_eq!(
            convert_vk_error("submit", vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            convert_vk_error("allocate", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory
        );
        assert!(matches!(
            convert_vk_error("wait", vk::Result::TIMEOUT),
            GraphicsError::Internal(_)
        ));
    }
}
