//! Common types and descriptors for device resources.
//!
//! This module contains handles, usage flags, and descriptor structs
//! consumed by [`GpuDevice`](crate::backend::GpuDevice) implementations.

mod acceleration;
mod buffer;
mod descriptor;
mod handle;
mod pipeline;
mod texture;

pub use acceleration::{
    AccelerationGeometry, AccelerationStructureDescriptor, AccelerationStructureKind,
    AccelerationStructureSizes, TriangleGeometry,
};
pub use buffer::{Access, BufferDescriptor, BufferUsage, MemoryLocation};
pub use descriptor::{DescriptorBufferInfo, DescriptorImageInfo, DescriptorType, DescriptorWrite};
pub use handle::{
    AccelerationStructureHandle, BufferHandle, PipelineHandle, SamplerHandle, TextureHandle,
    TextureViewHandle,
};
pub use pipeline::{PipelineDescriptor, ShaderSource};
pub use texture::{TextureDescriptor, TextureFormat, TextureLayout, TextureUsage};
