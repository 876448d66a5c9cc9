//! Descriptor writes produced for the caller's descriptor update mechanism.

use super::{AccelerationStructureHandle, BufferHandle, SamplerHandle, TextureViewHandle};

/// Kind of resource bound at a descriptor binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Texture view paired with a sampler.
    CombinedImageSampler,
    /// Read-only storage buffer.
    StorageBuffer,
    /// Uniform buffer.
    UniformBuffer,
    /// Top-level acceleration structure.
    AccelerationStructure,
}

/// One texture element of a descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorImageInfo {
    /// View to sample.
    pub view: TextureViewHandle,
    /// Sampler applied to the view.
    pub sampler: SamplerHandle,
}

/// One buffer element of a descriptor write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorBufferInfo {
    /// Bound buffer.
    pub buffer: BufferHandle,
    /// Start of the bound range.
    pub offset: u64,
    /// Size of the bound range.
    pub range: u64,
}

/// A descriptor update. Exactly one of the info arrays is populated,
/// matching [`ty`](Self::ty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorWrite {
    /// Destination binding.
    pub binding: u32,
    /// Descriptor type.
    pub ty: DescriptorType,
    /// Texture elements, in array order.
    pub image_infos: Vec<DescriptorImageInfo>,
    /// Buffer elements.
    pub buffer_infos: Vec<DescriptorBufferInfo>,
    /// Acceleration structures.
    pub acceleration_structures: Vec<AccelerationStructureHandle>,
}

impl DescriptorWrite {
    /// Bind an array of sampled textures.
    pub fn images(binding: u32, infos: Vec<DescriptorImageInfo>) -> Self {
        Self {
            binding,
            ty: DescriptorType::CombinedImageSampler,
            image_infos: infos,
            buffer_infos: Vec::new(),
            acceleration_structures: Vec::new(),
        }
    }

    /// Bind a whole buffer.
    pub fn buffer(binding: u32, ty: DescriptorType, buffer: BufferHandle, range: u64) -> Self {
        Self {
            binding,
            ty,
            image_infos: Vec::new(),
            buffer_infos: vec![DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }],
            acceleration_structures: Vec::new(),
        }
    }

    /// Bind a top-level acceleration structure.
    pub fn acceleration_structure(binding: u32, tlas: AccelerationStructureHandle) -> Self {
        Self {
            binding,
            ty: DescriptorType::AccelerationStructure,
            image_infos: Vec::new(),
            buffer_infos: Vec::new(),
            acceleration_structures: vec![tlas],
        }
    }

    /// Number of descriptors written.
    pub fn count(&self) -> usize {
        match self.ty {
            DescriptorType::CombinedImageSampler => self.image_infos.len(),
            DescriptorType::StorageBuffer | DescriptorType::UniformBuffer => {
                self.buffer_infos.len()
            }
            DescriptorType::AccelerationStructure => self.acceleration_structures.len(),
        }
    }
}
