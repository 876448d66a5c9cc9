//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be used as a vertex buffer.
        const VERTEX = 1 << 0;
        /// Buffer can be used as an index buffer.
        const INDEX = 1 << 1;
        /// Buffer can be used as a uniform buffer.
        const UNIFORM = 1 << 2;
        /// Buffer can be used as a storage buffer.
        const STORAGE = 1 << 3;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 4;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 5;
        /// Buffer is mappable for CPU write.
        const MAP_WRITE = 1 << 6;
        /// Buffer exposes a device address.
        const DEVICE_ADDRESS = 1 << 7;
        /// Buffer is read by acceleration structure builds.
        const ACCELERATION_STRUCTURE_INPUT = 1 << 8;
        /// Buffer backs an acceleration structure or its scratch memory.
        const ACCELERATION_STRUCTURE_STORAGE = 1 << 9;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Where a buffer's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local memory, filled through transfers.
    #[default]
    GpuOnly,
    /// Host-visible memory the CPU writes directly.
    CpuToGpu,
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
    /// Memory location.
    pub location: MemoryLocation,
}

impl BufferDescriptor {
    /// Create a new device-local buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
            location: MemoryLocation::GpuOnly,
        }
    }

    /// Create a host-visible buffer descriptor; `MAP_WRITE` is implied.
    pub fn host_visible(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage: usage | BufferUsage::MAP_WRITE,
            location: MemoryLocation::CpuToGpu,
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Whether the CPU may write this buffer directly.
    pub fn is_host_visible(&self) -> bool {
        self.location == MemoryLocation::CpuToGpu
    }
}

bitflags! {
    /// Memory accesses synchronized by barriers in transient submissions.
    ///
    /// Each flag implies the pipeline stage that performs it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u32 {
        /// Written by a transfer.
        const TRANSFER_WRITE = 1 << 0;
        /// Read by a transfer.
        const TRANSFER_READ = 1 << 1;
        /// Read as vertex attributes.
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        /// Read as indices.
        const INDEX_READ = 1 << 3;
        /// Read by any shader stage.
        const SHADER_READ = 1 << 4;
        /// Read as acceleration structure build input.
        const ACCELERATION_STRUCTURE_BUILD_INPUT = 1 << 5;
        /// Read by traversal or a later build.
        const ACCELERATION_STRUCTURE_READ = 1 << 6;
        /// Written by an acceleration structure build.
        const ACCELERATION_STRUCTURE_WRITE = 1 << 7;
    }
}

impl Default for Access {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_visible_implies_map_write() {
        let desc = BufferDescriptor::host_visible(64, BufferUsage::COPY_SRC).with_label("staging");
        assert!(desc.usage.contains(BufferUsage::MAP_WRITE));
        assert!(desc.is_host_visible());
        assert_eq!(desc.label.as_deref(), Some("staging"));
    }

    #[test]
    fn test_default_is_gpu_only() {
        let desc = BufferDescriptor::new(16, BufferUsage::VERTEX);
        assert_eq!(desc.location, MemoryLocation::GpuOnly);
        assert!(!desc.is_host_visible());
    }
}
