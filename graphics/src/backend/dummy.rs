//! Dummy GPU device for testing and development.
//!
//! This device doesn't talk to a GPU. It hands out handle ids, keeps every
//! buffer and texture as host bytes, and executes transient copies in host
//! memory, so tests can check exactly what an upload produced.

use std::collections::HashMap;

use aster_core::mesh::IndexFormat;
use aster_core::sampler::SamplerDesc;
use parking_lot::Mutex;

use crate::commands::{TransferCommand, TransientCommands};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    AccelerationGeometry, AccelerationStructureDescriptor, AccelerationStructureHandle,
    AccelerationStructureKind, AccelerationStructureSizes, BufferDescriptor, BufferHandle,
    BufferUsage, PipelineDescriptor, PipelineHandle, SamplerHandle, TextureDescriptor,
    TextureHandle, TextureLayout, TextureViewHandle,
};

use super::{GpuDevice, RenderEncoder};

/// Base of the fake device address space; each resource gets a 4 GiB window.
const ADDRESS_SHIFT: u32 = 32;

#[derive(Debug)]
struct DummyBuffer {
    descriptor: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyTexture {
    descriptor: TextureDescriptor,
    layout: TextureLayout,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyAccelerationStructure {
    descriptor: AccelerationStructureDescriptor,
    built_from: Option<AccelerationGeometry>,
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    created: usize,
    fail_after: Option<usize>,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, DummyTexture>,
    views: HashMap<u64, TextureHandle>,
    samplers: HashMap<u64, SamplerDesc>,
    pipelines: HashMap<u64, PipelineDescriptor>,
    structures: HashMap<u64, DummyAccelerationStructure>,
    submissions: Vec<TransientCommands>,
    host_writes: usize,
}

impl DummyState {
    /// Allocate an id, or fail if a failure was injected for this creation.
    fn allocate_id(&mut self, what: &str) -> GraphicsResult<u64> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                self.fail_after = None;
                log::trace!("DummyDevice: injected failure creating {}", what);
                return Err(GraphicsError::OutOfMemory);
            }
            *remaining -= 1;
        }
        self.next_id += 1;
        self.created += 1;
        Ok(self.next_id)
    }

    fn buffer(&self, handle: BufferHandle) -> GraphicsResult<&DummyBuffer> {
        self.buffers.get(&handle.0).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {:?}", handle))
        })
    }

    fn execute(&mut self, command: &TransferCommand) -> GraphicsResult<()> {
        match command {
            TransferCommand::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    let source = self.buffer(*src)?;
                    let bytes = slice(&source.data, region.src_offset, region.size)?.to_vec();
                    let target = self.buffers.get_mut(&dst.0).ok_or_else(|| {
                        GraphicsError::InvalidParameter(format!("unknown buffer {:?}", dst))
                    })?;
                    slice_mut(&mut target.data, region.dst_offset, region.size)?
                        .copy_from_slice(&bytes);
                }
            }
            TransferCommand::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                width,
                height,
            } => {
                let texture = self.textures.get(&dst.0).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("unknown texture {:?}", dst))
                })?;
                if texture.layout != TextureLayout::TransferDst {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "texture {:?} is in {:?}, not TransferDst",
                        dst, texture.layout
                    )));
                }
                if (*width, *height) != (texture.descriptor.width, texture.descriptor.height) {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "copy extent {}x{} does not match texture {:?}",
                        width, height, dst
                    )));
                }
                let size = texture.descriptor.byte_size();
                let bytes = slice(&self.buffer(*src)?.data, *src_offset, size)?.to_vec();
                if let Some(texture) = self.textures.get_mut(&dst.0) {
                    texture.data = bytes;
                }
            }
            TransferCommand::BufferBarrier { buffer, .. } => {
                self.buffer(*buffer)?;
            }
            TransferCommand::TextureBarrier { texture, old, new } => {
                let texture_state = self.textures.get_mut(&texture.0).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("unknown texture {:?}", texture))
                })?;
                if *old != TextureLayout::Undefined && *old != texture_state.layout {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "texture {:?} transition from {:?} but it is in {:?}",
                        texture, old, texture_state.layout
                    )));
                }
                texture_state.layout = *new;
            }
            TransferCommand::BuildAccelerationStructure {
                target, geometry, ..
            } => {
                let structure = self.structures.get_mut(&target.0).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!(
                        "unknown acceleration structure {:?}",
                        target
                    ))
                })?;
                if structure.descriptor.kind != geometry.kind() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "{:?} built from {:?} geometry",
                        structure.descriptor.kind,
                        geometry.kind()
                    )));
                }
                structure.built_from = Some(*geometry);
            }
            TransferCommand::AccelerationStructureBarrier => {}
        }
        Ok(())
    }
}

fn slice(data: &[u8], offset: u64, size: u64) -> GraphicsResult<&[u8]> {
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= data.len() as u64)
        .ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "range {}..+{} outside {} bytes",
                offset,
                size,
                data.len()
            ))
        })?;
    Ok(&data[offset as usize..end as usize])
}

fn slice_mut(data: &mut [u8], offset: u64, size: u64) -> GraphicsResult<&mut [u8]> {
    let len = data.len();
    let end = offset
        .checked_add(size)
        .filter(|end| *end <= len as u64)
        .ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "range {}..+{} outside {} bytes",
                offset, size, len
            ))
        })?;
    Ok(&mut data[offset as usize..end as usize])
}

/// Dummy GPU device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    state: Mutex<DummyState>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the creation after the next `successes` ones fail with
    /// [`GraphicsError::OutOfMemory`].
    pub fn fail_after(&self, successes: usize) {
        self.state.lock().fail_after = Some(successes);
    }

    /// Total number of resources created so far, destroyed ones included.
    pub fn created_count(&self) -> usize {
        self.state.lock().created
    }

    /// Number of resources of any kind still alive.
    pub fn live_resource_count(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len()
            + state.textures.len()
            + state.views.len()
            + state.samplers.len()
            + state.pipelines.len()
            + state.structures.len()
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of live textures.
    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    /// Number of live texture views.
    pub fn live_texture_views(&self) -> usize {
        self.state.lock().views.len()
    }

    /// Number of live samplers.
    pub fn live_samplers(&self) -> usize {
        self.state.lock().samplers.len()
    }

    /// Number of live pipelines.
    pub fn live_pipelines(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Number of live acceleration structures of the given level.
    pub fn live_acceleration_structures(&self, kind: AccelerationStructureKind) -> usize {
        self.state
            .lock()
            .structures
            .values()
            .filter(|structure| structure.descriptor.kind == kind)
            .count()
    }

    /// Descriptor a live buffer was created with.
    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<BufferDescriptor> {
        let state = self.state.lock();
        state.buffers.get(&buffer.0).map(|b| b.descriptor.clone())
    }

    /// Current contents of a live buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.state.lock().buffers.get(&buffer.0).map(|b| b.data.clone())
    }

    /// Descriptor a live texture was created with.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        let state = self.state.lock();
        state.textures.get(&texture.0).map(|t| t.descriptor.clone())
    }

    /// Current layout of a live texture.
    pub fn texture_layout(&self, texture: TextureHandle) -> Option<TextureLayout> {
        self.state.lock().textures.get(&texture.0).map(|t| t.layout)
    }

    /// Texels copied into a live texture.
    pub fn texture_contents(&self, texture: TextureHandle) -> Option<Vec<u8>> {
        self.state.lock().textures.get(&texture.0).map(|t| t.data.clone())
    }

    /// Texture a live view was created for.
    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.state.lock().views.get(&view.0).copied()
    }

    /// Descriptor a live pipeline was created with.
    pub fn pipeline_descriptor(&self, pipeline: PipelineHandle) -> Option<PipelineDescriptor> {
        self.state.lock().pipelines.get(&pipeline.0).cloned()
    }

    /// Geometry a live acceleration structure was last built from.
    pub fn acceleration_structure_geometry(
        &self,
        structure: AccelerationStructureHandle,
    ) -> Option<AccelerationGeometry> {
        let state = self.state.lock();
        state.structures.get(&structure.0)?.built_from
    }

    /// Every transient submission so far, in order.
    pub fn submissions(&self) -> Vec<TransientCommands> {
        self.state.lock().submissions.clone()
    }

    /// Number of host writes through [`GpuDevice::write_buffer`].
    pub fn host_write_count(&self) -> usize {
        self.state.lock().host_writes
    }
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy Device"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} has zero size",
                descriptor.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id("buffer")?;
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        state.buffers.insert(
            id,
            DummyBuffer {
                descriptor: descriptor.clone(),
                data: vec![0; descriptor.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let target = state.buffers.get_mut(&buffer.0).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {:?}", buffer))
        })?;
        if !target.descriptor.is_host_visible() {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} is not host visible",
                target.descriptor.label
            )));
        }
        slice_mut(&mut target.data, offset, data.len() as u64)?.copy_from_slice(data);
        state.host_writes += 1;
        log::trace!(
            "DummyDevice: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> GraphicsResult<u64> {
        let state = self.state.lock();
        let target = state.buffer(buffer)?;
        if !target.descriptor.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} was created without DEVICE_ADDRESS",
                target.descriptor.label
            )));
        }
        Ok(buffer.0 << ADDRESS_SHIFT)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<TextureHandle> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero extent",
                descriptor.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id("texture")?;
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        state.textures.insert(
            id,
            DummyTexture {
                descriptor: descriptor.clone(),
                layout: TextureLayout::Undefined,
                data: Vec::new(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.state.lock().textures.remove(&texture.0);
    }

    fn create_texture_view(&self, texture: TextureHandle) -> GraphicsResult<TextureViewHandle> {
        let mut state = self.state.lock();
        if !state.textures.contains_key(&texture.0) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown texture {:?}",
                texture
            )));
        }
        let id = state.allocate_id("texture view")?;
        state.views.insert(id, texture);
        Ok(TextureViewHandle(id))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        self.state.lock().views.remove(&view.0);
    }

    fn create_sampler(&self, descriptor: &SamplerDesc) -> GraphicsResult<SamplerHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id("sampler")?;
        log::trace!("DummyDevice: creating sampler {:?}", descriptor);
        state.samplers.insert(id, *descriptor);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> GraphicsResult<PipelineHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id("pipeline")?;
        log::trace!("DummyDevice: creating pipeline {:?}", descriptor.label);
        state.pipelines.insert(id, descriptor.clone());
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.state.lock().pipelines.remove(&pipeline.0);
    }

    fn acceleration_structure_sizes(
        &self,
        geometry: &AccelerationGeometry,
    ) -> GraphicsResult<AccelerationStructureSizes> {
        let primitives = geometry.primitive_count() as u64;
        if primitives == 0 {
            return Err(GraphicsError::InvalidParameter(
                "acceleration structure without primitives".to_string(),
            ));
        }
        Ok(AccelerationStructureSizes {
            structure_size: 256 + primitives * 64,
            build_scratch_size: 128 + primitives * 32,
        })
    }

    fn create_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> GraphicsResult<AccelerationStructureHandle> {
        let mut state = self.state.lock();
        let id = state.allocate_id("acceleration structure")?;
        log::trace!(
            "DummyDevice: creating {:?} {:?} (size: {})",
            descriptor.kind,
            descriptor.label,
            descriptor.size
        );
        state.structures.insert(
            id,
            DummyAccelerationStructure {
                descriptor: descriptor.clone(),
                built_from: None,
            },
        );
        Ok(AccelerationStructureHandle(id))
    }

    fn acceleration_structure_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> GraphicsResult<u64> {
        if !self.state.lock().structures.contains_key(&structure.0) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown acceleration structure {:?}",
                structure
            )));
        }
        Ok(structure.0 << ADDRESS_SHIFT)
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle) {
        self.state.lock().structures.remove(&structure.0);
    }

    fn submit_transient(&self, commands: &TransientCommands) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        log::trace!(
            "DummyDevice: executing {:?} with {} commands",
            commands.label,
            commands.len()
        );
        for command in &commands.commands {
            state.execute(command)?;
        }
        state.submissions.push(commands.clone());
        Ok(())
    }
}

/// A command recorded by [`RecordingEncoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// `bind_pipeline`.
    BindPipeline(PipelineHandle),
    /// `bind_vertex_buffer`.
    BindVertexBuffer {
        /// Bound buffer.
        buffer: BufferHandle,
        /// Byte offset.
        offset: u64,
    },
    /// `bind_index_buffer`.
    BindIndexBuffer {
        /// Bound buffer.
        buffer: BufferHandle,
        /// Byte offset.
        offset: u64,
        /// Index format.
        format: IndexFormat,
    },
    /// `push_constants`.
    PushConstants(Vec<u8>),
    /// `draw`.
    Draw {
        /// Vertex count.
        vertex_count: u32,
        /// First vertex.
        first_vertex: u32,
    },
    /// `draw_indexed`.
    DrawIndexed {
        /// Index count.
        index_count: u32,
        /// First index.
        first_index: u32,
        /// Value added to each index.
        vertex_offset: i32,
    },
}

/// A [`RenderEncoder`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingEncoder {
    /// Recorded commands in call order.
    pub commands: Vec<RecordedCommand>,
}

impl RecordingEncoder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of draw and indexed draw calls.
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }
                )
            })
            .count()
    }

    /// Pipelines bound, in order.
    pub fn bound_pipelines(&self) -> Vec<PipelineHandle> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindPipeline(pipeline) => Some(*pipeline),
                _ => None,
            })
            .collect()
    }

    /// Push constant blocks, in order.
    pub fn push_constant_blocks(&self) -> Vec<&[u8]> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::PushConstants(data) => Some(data.as_slice()),
                _ => None,
            })
            .collect()
    }
}

impl RenderEncoder for RecordingEncoder {
    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(RecordedCommand::BindPipeline(pipeline));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        self.commands
            .push(RecordedCommand::BindVertexBuffer { buffer, offset });
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.commands.push(RecordedCommand::BindIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn push_constants(&mut self, data: &[u8]) {
        self.commands.push(RecordedCommand::PushConstants(data.to_vec()));
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        self.commands.push(RecordedCommand::Draw {
            vertex_count,
            first_vertex,
        });
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        self.commands.push(RecordedCommand::DrawIndexed {
            index_count,
            first_index,
            vertex_offset,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::TransferCommand;
    use crate::types::{TextureFormat, TextureUsage};

    #[test]
    fn test_copy_executes_in_host_memory() {
        let device = DummyDevice::new();
        let staging = device
            .create_buffer(&BufferDescriptor::host_visible(8, BufferUsage::COPY_SRC))
            .unwrap();
        let target = device
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::COPY_DST))
            .unwrap();
        device.write_buffer(staging, 0, &[1, 2, 3, 4]).unwrap();

        let mut commands = TransientCommands::new("copy");
        commands.copy_buffer(staging, 0, target, 4, 4);
        device.submit_transient(&commands).unwrap();

        assert_eq!(
            device.buffer_contents(target).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
        assert_eq!(device.submissions().len(), 1);
    }

    #[test]
    fn test_write_requires_host_visible() {
        let device = DummyDevice::new();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::STORAGE))
            .unwrap();
        assert!(matches!(
            device.write_buffer(buffer, 0, &[0; 4]),
            Err(GraphicsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_texture_copy_requires_transfer_layout() {
        let device = DummyDevice::new();
        let staging = device
            .create_buffer(&BufferDescriptor::host_visible(4, BufferUsage::COPY_SRC))
            .unwrap();
        let texture = device
            .create_texture(&TextureDescriptor::new_2d(
                1,
                1,
                TextureFormat::Rgba8Unorm,
                TextureUsage::COPY_DST,
            ))
            .unwrap();
        let copy = TransferCommand::CopyBufferToTexture {
            src: staging,
            src_offset: 0,
            dst: texture,
            width: 1,
            height: 1,
        };

        let mut commands = TransientCommands::new("bad");
        commands.push(copy.clone());
        assert!(device.submit_transient(&commands).is_err());

        let mut commands = TransientCommands::new("good");
        commands.texture_barrier(texture, TextureLayout::Undefined, TextureLayout::TransferDst);
        commands.push(copy);
        device.submit_transient(&commands).unwrap();
        assert_eq!(device.texture_layout(texture), Some(TextureLayout::TransferDst));
    }

    #[test]
    fn test_fail_after() {
        let device = DummyDevice::new();
        device.fail_after(1);
        assert!(device.create_sampler(&SamplerDesc::linear()).is_ok());
        assert_eq!(
            device.create_sampler(&SamplerDesc::linear()),
            Err(GraphicsError::OutOfMemory)
        );
        assert!(device.create_sampler(&SamplerDesc::linear()).is_ok());
        assert_eq!(device.live_samplers(), 2);
    }

    #[test]
    fn test_recording_encoder() {
        let mut encoder = RecordingEncoder::new();
        encoder.bind_pipeline(PipelineHandle(3));
        encoder.push_constants(&[1, 2]);
        encoder.draw(3, 0);
        encoder.draw_indexed(6, 0, 0);
        assert_eq!(encoder.draw_count(), 2);
        assert_eq!(encoder.bound_pipelines(), vec![PipelineHandle(3)]);
        assert_eq!(encoder.push_constant_blocks(), vec![&[1u8, 2][..]]);
    }
}
