//! Device abstraction layer.
//!
//! Scene upload, batching, and acceleration-structure builds talk to the GPU
//! only through the [`GpuDevice`] and [`RenderEncoder`] traits. The device
//! creation, swapchain, and frame synchronization are owned by the caller.
//!
//! # Available Backends
//!
//! - [`dummy`]: No GPU; tracks resources and executes copies in host memory
//! - `vulkan` (feature `vulkan-backend`): Native Vulkan through `ash`

pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use aster_core::mesh::IndexFormat;
use aster_core::sampler::SamplerDesc;

use crate::commands::TransientCommands;
use crate::error::GraphicsResult;
use crate::types::{
    AccelerationGeometry, AccelerationStructureDescriptor, AccelerationStructureHandle,
    AccelerationStructureSizes, BufferDescriptor, BufferHandle, PipelineDescriptor, PipelineHandle,
    SamplerHandle, TextureDescriptor, TextureHandle, TextureViewHandle,
};

pub use dummy::{DummyDevice, RecordedCommand, RecordingEncoder};

/// Resource creation and one-shot submission on a GPU device.
///
/// Implementations use interior mutability so that a device can be shared
/// between the upload engine, the material registry, and the batcher.
/// Destroying a handle the device does not know is a no-op.
pub trait GpuDevice {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Create a buffer.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle>;

    /// Destroy a buffer.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Write bytes into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()>;

    /// Device address of a buffer created with `DEVICE_ADDRESS` usage.
    fn buffer_device_address(&self, buffer: BufferHandle) -> GraphicsResult<u64>;

    /// Create a 2D texture.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<TextureHandle>;

    /// Destroy a texture.
    fn destroy_texture(&self, texture: TextureHandle);

    /// Create a view covering the whole texture.
    fn create_texture_view(&self, texture: TextureHandle) -> GraphicsResult<TextureViewHandle>;

    /// Destroy a texture view.
    fn destroy_texture_view(&self, view: TextureViewHandle);

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDesc) -> GraphicsResult<SamplerHandle>;

    /// Destroy a sampler.
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Create a graphics pipeline.
    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> GraphicsResult<PipelineHandle>;

    /// Destroy a graphics pipeline.
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    /// Storage and scratch sizes needed to build a structure from `geometry`.
    fn acceleration_structure_sizes(
        &self,
        geometry: &AccelerationGeometry,
    ) -> GraphicsResult<AccelerationStructureSizes>;

    /// Create an acceleration structure with device-owned backing storage.
    fn create_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> GraphicsResult<AccelerationStructureHandle>;

    /// Device address of an acceleration structure, referenced by instances.
    fn acceleration_structure_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> GraphicsResult<u64>;

    /// Destroy an acceleration structure and its backing storage.
    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle);

    /// Record, submit, and wait for a list of transient commands.
    fn submit_transient(&self, commands: &TransientCommands) -> GraphicsResult<()>;
}

/// Draw recording into a caller-owned render pass.
pub trait RenderEncoder {
    /// Bind a graphics pipeline.
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind a vertex buffer at slot 0.
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64);

    /// Bind an index buffer.
    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Upload push constants for the bound pipeline.
    fn push_constants(&mut self, data: &[u8]);

    /// Draw non-indexed vertices.
    fn draw(&mut self, vertex_count: u32, first_vertex: u32);

    /// Draw indexed vertices.
    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32);
}
