//! Ray-tracing acceleration structures over the uploaded scene.
//!
//! One bottom-level structure is built per submesh with ray-traceable
//! geometry, reading positions and indices straight out of the shared device
//! buffers. One top-level structure instances every BLAS with its mesh's
//! world transform, and an instance buffer gives shaders the per-instance
//! data needed to fetch vertices and materials.
//!
//! Everything is built once, in one transient submission. Transform changes
//! are not tracked.

use aster_core::ResourceStore;
use aster_core::material::AlphaMode;
use aster_core::mesh::{IndexFormat, SubmeshId};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::backend::GpuDevice;
use crate::commands::{TransferCommand, TransientCommands};
use crate::error::GraphicsResult;
use crate::material_fx::RayTracingFx;
use crate::types::{
    AccelerationGeometry, AccelerationStructureDescriptor, AccelerationStructureHandle,
    AccelerationStructureKind, BufferDescriptor, BufferHandle, BufferUsage, PipelineHandle,
    TriangleGeometry,
};
use crate::upload::DeviceScene;

/// Alignment of each build's region in the shared scratch buffer.
pub const SCRATCH_ALIGNMENT: u64 = 256;

/// Instance flag disabling back-face culling.
const INSTANCE_CULL_DISABLE: u32 = 0x1;
/// Instance flag forcing geometry opaque.
const INSTANCE_FORCE_OPAQUE: u32 = 0x4;

/// Per-instance data read by ray-tracing shaders.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Device address of the submesh's first vertex.
    pub vertex_address: u64,
    /// Device address of the submesh's first index; zero when non-indexed.
    pub index_address: u64,
    /// Index into the material proxy buffer.
    pub material_index: u32,
    /// Index into the transform buffer.
    pub transform_index: u32,
    /// Bytes between vertices.
    pub vertex_stride: u32,
    /// 0 for non-indexed, 1 for 16-bit, 2 for 32-bit indices.
    pub index_format: u32,
    /// Byte offset of the position within a vertex.
    pub position_offset: u32,
    /// Padding.
    pub _pad: [u32; 3],
}

/// Top-level instance in the layout acceleration structure builds consume.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TlasInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    /// Custom index in the low 24 bits, visibility mask in the high 8.
    pub custom_index_and_mask: u32,
    /// Hit group offset in the low 24 bits, instance flags in the high 8.
    pub sbt_offset_and_flags: u32,
    /// Device address of the instanced BLAS.
    pub blas_address: u64,
}

impl TlasInstance {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Instance of `blas_address` at `world`, with `custom_index` visible to
    /// hit shaders.
    pub fn new(world: Mat4, custom_index: u32, flags: u32, blas_address: u64) -> Self {
        let rows = world.transpose().to_cols_array();
        let mut transform = [0.0; 12];
        transform.copy_from_slice(&rows[..12]);
        Self {
            transform,
            custom_index_and_mask: (custom_index & 0x00FF_FFFF) | (0xFF << 24),
            sbt_offset_and_flags: (flags & 0xFF) << 24,
            blas_address,
        }
    }
}

/// One bottom-level structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BottomLevel {
    /// Submesh the geometry comes from.
    pub submesh: SubmeshId,
    /// Structure handle.
    pub structure: AccelerationStructureHandle,
    /// Triangle count.
    pub triangles: u32,
}

/// Acceleration structures of a scene.
#[derive(Debug, Default)]
pub struct AccelerationState {
    bottom_levels: Vec<BottomLevel>,
    tlas: Option<AccelerationStructureHandle>,
    instance_buffer: Option<(BufferHandle, u64)>,
    instance_of: Vec<Option<u32>>,
}

impl AccelerationState {
    /// Bottom-level structures in instance order.
    pub fn bottom_levels(&self) -> &[BottomLevel] {
        &self.bottom_levels
    }

    /// Top-level structure; `None` when no submesh was ray-traceable.
    pub fn tlas(&self) -> Option<AccelerationStructureHandle> {
        self.tlas
    }

    /// Number of TLAS instances.
    pub fn instance_count(&self) -> usize {
        self.bottom_levels.len()
    }

    /// Buffer of [`InstanceRecord`]s.
    pub fn instance_buffer(&self) -> Option<BufferHandle> {
        self.instance_buffer.map(|(buffer, _)| buffer)
    }

    /// Instance index of a submesh, if it has a BLAS.
    pub fn instance_index(&self, submesh: SubmeshId) -> Option<u32> {
        self.instance_of.get(submesh.index()).copied().flatten()
    }

    /// Ray-tracing effect bound to these structures.
    pub fn ray_tracing_fx(&self, pipeline: Option<PipelineHandle>) -> Option<RayTracingFx> {
        let tlas = self.tlas?;
        let (instance_buffer, instance_buffer_size) = self.instance_buffer?;
        Some(RayTracingFx {
            pipeline,
            tlas,
            instance_buffer,
            instance_buffer_size,
        })
    }

    /// Destroy every structure and the instance buffer.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        if let Some(tlas) = self.tlas.take() {
            device.destroy_acceleration_structure(tlas);
        }
        for bottom in self.bottom_levels.drain(..) {
            device.destroy_acceleration_structure(bottom.structure);
        }
        if let Some((buffer, _)) = self.instance_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.instance_of.clear();
    }
}

/// Build one BLAS per ray-traceable submesh and one TLAS over them.
pub fn build_acceleration_structures(
    store: &ResourceStore,
    scene: &DeviceScene,
    device: &dyn GpuDevice,
) -> GraphicsResult<AccelerationState> {
    let mut state = AccelerationState {
        instance_of: vec![None; store.submeshes().len()],
        ..Default::default()
    };
    let mut temporaries = Vec::new();
    let result = build(store, scene, device, &mut state, &mut temporaries);
    for buffer in temporaries {
        device.destroy_buffer(buffer);
    }
    match result {
        Ok(()) => {
            log::info!(
                "Built acceleration structures: {} BLAS, {} TLAS instances",
                state.bottom_levels.len(),
                state.instance_count()
            );
            Ok(state)
        }
        Err(error) => {
            log::error!("Acceleration structure build failed: {}", error);
            state.destroy(device);
            Err(error)
        }
    }
}

struct PendingBuild {
    structure: AccelerationStructureHandle,
    geometry: AccelerationGeometry,
    scratch_offset: u64,
}

fn build(
    store: &ResourceStore,
    scene: &DeviceScene,
    device: &dyn GpuDevice,
    state: &mut AccelerationState,
    temporaries: &mut Vec<BufferHandle>,
) -> GraphicsResult<()> {
    let Some(vertex_buffer) = scene.vertex_buffer() else {
        log::info!("No geometry to build acceleration structures from");
        return Ok(());
    };
    let vertex_base = device.buffer_device_address(vertex_buffer)?;
    let index_base = scene
        .index_buffer()
        .map(|buffer| device.buffer_device_address(buffer))
        .transpose()?;

    let mut builds = Vec::new();
    let mut records = Vec::new();
    let mut scratch_size = 0;

    for id in store.submesh_ids() {
        let submesh = store.submesh(id);
        let Some(triangles) = submesh.draw.ray_traced_triangles() else {
            continue;
        };
        let (Some(position_offset), Some((vertex_offset, index_offset))) = (
            submesh.draw.layout.float3_position_offset(),
            store.submesh_buffer_offsets(id),
        ) else {
            continue;
        };
        let mesh = store.mesh(submesh.mesh);
        let index_address = if submesh.draw.is_indexed() {
            let Some(base) = index_base else {
                continue;
            };
            Some(base + index_offset)
        } else {
            None
        };
        let vertex_address = vertex_base + vertex_offset;
        let geometry = AccelerationGeometry::Triangles(TriangleGeometry {
            vertex_address: vertex_address + position_offset as u64,
            vertex_stride: submesh.draw.layout.stride as u64,
            max_vertex: submesh.draw.vertex_count.saturating_sub(1),
            index_address,
            index_format: mesh.index_format,
            triangle_count: triangles,
        });

        let sizes = device.acceleration_structure_sizes(&geometry)?;
        let structure = device.create_acceleration_structure(&AccelerationStructureDescriptor {
            label: Some(format!("blas {}", id.index())),
            kind: AccelerationStructureKind::BottomLevel,
            size: sizes.structure_size,
        })?;
        let instance = state.bottom_levels.len() as u32;
        state.bottom_levels.push(BottomLevel {
            submesh: id,
            structure,
            triangles,
        });
        state.instance_of[id.index()] = Some(instance);

        builds.push(PendingBuild {
            structure,
            geometry,
            scratch_offset: scratch_size,
        });
        scratch_size += aster_core::store::align_up(sizes.build_scratch_size, SCRATCH_ALIGNMENT);

        let material = submesh.material.map(|material| store.material_ref(material));
        records.push(InstanceRecord {
            vertex_address,
            index_address: index_address.unwrap_or(0),
            material_index: material.map(|m| m.proxy as u32).unwrap_or_default(),
            transform_index: mesh.transform as u32,
            vertex_stride: submesh.draw.layout.stride,
            index_format: match (submesh.draw.is_indexed(), mesh.index_format) {
                (false, _) => 0,
                (true, IndexFormat::Uint16) => 1,
                (true, IndexFormat::Uint32) => 2,
            },
            position_offset,
            _pad: [0; 3],
        });
    }

    if builds.is_empty() {
        log::info!("No ray-traceable submeshes");
        return Ok(());
    }

    let record_bytes: &[u8] = bytemuck::cast_slice(&records);
    let instance_buffer = device.create_buffer(
        &BufferDescriptor::host_visible(record_bytes.len() as u64, BufferUsage::STORAGE)
            .with_label("ray tracing instances"),
    )?;
    state.instance_buffer = Some((instance_buffer, record_bytes.len() as u64));
    device.write_buffer(instance_buffer, 0, record_bytes)?;

    let mut instances = Vec::with_capacity(state.bottom_levels.len());
    for (index, bottom) in state.bottom_levels.iter().enumerate() {
        let submesh = store.submesh(bottom.submesh);
        let mut flags = 0;
        if let Some(material) = submesh.material.map(|m| store.material_ref(m)) {
            if material.state.double_sided {
                flags |= INSTANCE_CULL_DISABLE;
            }
            if material.state.alpha_mode == AlphaMode::Opaque {
                flags |= INSTANCE_FORCE_OPAQUE;
            }
        }
        instances.push(TlasInstance::new(
            store.world_transform(submesh.mesh),
            index as u32,
            flags,
            device.acceleration_structure_address(bottom.structure)?,
        ));
    }
    let instance_bytes: &[u8] = bytemuck::cast_slice(&instances);
    let instance_staging = device.create_buffer(
        &BufferDescriptor::host_visible(
            instance_bytes.len() as u64,
            BufferUsage::ACCELERATION_STRUCTURE_INPUT | BufferUsage::DEVICE_ADDRESS,
        )
        .with_label("tlas instances"),
    )?;
    temporaries.push(instance_staging);
    device.write_buffer(instance_staging, 0, instance_bytes)?;

    let tlas_geometry = AccelerationGeometry::Instances {
        address: device.buffer_device_address(instance_staging)?,
        count: instances.len() as u32,
    };
    let tlas_sizes = device.acceleration_structure_sizes(&tlas_geometry)?;
    let tlas = device.create_acceleration_structure(&AccelerationStructureDescriptor {
        label: Some("scene tlas".to_string()),
        kind: AccelerationStructureKind::TopLevel,
        size: tlas_sizes.structure_size,
    })?;
    state.tlas = Some(tlas);
    let tlas_scratch_offset = scratch_size;
    scratch_size += aster_core::store::align_up(tlas_sizes.build_scratch_size, SCRATCH_ALIGNMENT);

    let scratch = device.create_buffer(
        &BufferDescriptor::new(
            scratch_size,
            BufferUsage::ACCELERATION_STRUCTURE_STORAGE
                | BufferUsage::STORAGE
                | BufferUsage::DEVICE_ADDRESS,
        )
        .with_label("acceleration scratch"),
    )?;
    temporaries.push(scratch);
    let scratch_base = device.buffer_device_address(scratch)?;

    let mut commands = TransientCommands::new("acceleration structure build");
    for pending in &builds {
        commands.push(TransferCommand::BuildAccelerationStructure {
            target: pending.structure,
            geometry: pending.geometry,
            scratch_address: scratch_base + pending.scratch_offset,
        });
    }
    commands.push(TransferCommand::AccelerationStructureBarrier);
    commands.push(TransferCommand::BuildAccelerationStructure {
        target: tlas,
        geometry: tlas_geometry,
        scratch_address: scratch_base + tlas_scratch_offset,
    });
    device.submit_transient(&commands)?;

    log::debug!(
        "Acceleration build used {} scratch bytes for {} instances",
        scratch_size,
        instances.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_instance_layout_sizes() {
        assert_eq!(std::mem::size_of::<TlasInstance>(), 64);
        assert_eq!(std::mem::size_of::<InstanceRecord>(), 48);
    }

    #[test]
    fn test_tlas_instance_transform_is_row_major() {
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let instance = TlasInstance::new(world, 5, INSTANCE_FORCE_OPAQUE, 0xABCD);
        assert_eq!(instance.transform[3], 1.0);
        assert_eq!(instance.transform[7], 2.0);
        assert_eq!(instance.transform[11], 3.0);
        assert_eq!(instance.transform[0], 1.0);
        assert_eq!(instance.custom_index_and_mask, 5 | 0xFF00_0000);
        assert_eq!(instance.sbt_offset_and_flags >> 24, INSTANCE_FORCE_OPAQUE);
    }

    #[test]
    fn test_empty_scene_builds_nothing() {
        let store = ResourceStore::new();
        let device = crate::backend::DummyDevice::new();
        let state =
            build_acceleration_structures(&store, &DeviceScene::default(), &device).unwrap();
        assert!(state.tlas().is_none());
        assert_eq!(state.instance_count(), 0);
        assert!(state.ray_tracing_fx(None).is_none());
        assert!(device.submissions().is_empty());
    }
}
