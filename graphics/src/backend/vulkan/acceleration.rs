//! Acceleration structure build descriptions.

use ash::vk;

use crate::types::{AccelerationGeometry, AccelerationStructureKind};

use super::conversion::convert_index_format;

/// Vulkan structure type for a level.
pub fn convert_structure_kind(kind: AccelerationStructureKind) -> vk::AccelerationStructureTypeKHR {
    match kind {
        AccelerationStructureKind::BottomLevel => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureKind::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

/// Describe build input for Vulkan.
///
/// Triangle geometry carries no geometry flags; opacity and culling are
/// decided per instance.
pub fn convert_geometry(geometry: &AccelerationGeometry) -> vk::AccelerationStructureGeometryKHR<'static> {
    match geometry {
        AccelerationGeometry::Triangles(triangles) => {
            let mut data = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(vk::Format::R32G32B32_SFLOAT)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: triangles.vertex_address,
                })
                .vertex_stride(triangles.vertex_stride)
                .max_vertex(triangles.max_vertex);
            data = match triangles.index_address {
                Some(address) => data
                    .index_type(convert_index_format(triangles.index_format))
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: address,
                    }),
                None => data.index_type(vk::IndexType::NONE_KHR),
            };

            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .flags(vk::GeometryFlagsKHR::empty())
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles: data })
        }
        AccelerationGeometry::Instances { address, .. } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(vk::DeviceOrHostAddressConstKHR {
                    device_address: *address,
                });

            vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .flags(vk::GeometryFlagsKHR::empty())
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        }
    }
}

/// Build info for a from-scratch build of `geometries`.
pub fn build_geometry_info<'a>(
    kind: AccelerationStructureKind,
    geometries: &'a [vk::AccelerationStructureGeometryKHR<'static>],
) -> vk::AccelerationStructureBuildGeometryInfoKHR<'a> {
    vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(convert_structure_kind(kind))
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(geometries)
}

/// Single range covering every primitive of `geometry`.
pub fn build_range(geometry: &AccelerationGeometry) -> vk::AccelerationStructureBuildRangeInfoKHR {
    vk::AccelerationStructureBuildRangeInfoKHR::default()
        .primitive_count(geometry.primitive_count())
        .primitive_offset(0)
        .first_vertex(0)
        .transform_offset(0)
}
