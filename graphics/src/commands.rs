//! Transient command lists executed once by [`GpuDevice::submit_transient`].
//!
//! Upload and acceleration-structure builds record their work into a
//! [`TransientCommands`] list; the device records it into a one-shot command
//! buffer, submits it and waits before returning.
//!
//! [`GpuDevice::submit_transient`]: crate::backend::GpuDevice::submit_transient

use crate::types::{
    Access, AccelerationGeometry, AccelerationStructureHandle, BufferHandle, TextureHandle,
    TextureLayout,
};

/// One region of a buffer-to-buffer copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopy {
    /// Start in the source buffer.
    pub src_offset: u64,
    /// Start in the destination buffer.
    pub dst_offset: u64,
    /// Bytes copied.
    pub size: u64,
}

/// A recorded transfer or build command.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferCommand {
    /// Copy regions between two buffers.
    CopyBuffer {
        /// Source buffer.
        src: BufferHandle,
        /// Destination buffer.
        dst: BufferHandle,
        /// Copied regions.
        regions: Vec<BufferCopy>,
    },
    /// Copy tightly packed texels into the whole of a texture.
    ///
    /// The texture must be in [`TextureLayout::TransferDst`].
    CopyBufferToTexture {
        /// Source buffer.
        src: BufferHandle,
        /// Start of the texels in the source buffer.
        src_offset: u64,
        /// Destination texture.
        dst: TextureHandle,
        /// Width in texels.
        width: u32,
        /// Height in texels.
        height: u32,
    },
    /// Make writes to a buffer visible to later accesses.
    BufferBarrier {
        /// Synchronized buffer.
        buffer: BufferHandle,
        /// Accesses that must complete.
        src: Access,
        /// Accesses that wait.
        dst: Access,
    },
    /// Transition a texture between layouts.
    TextureBarrier {
        /// Transitioned texture.
        texture: TextureHandle,
        /// Current layout.
        old: TextureLayout,
        /// New layout.
        new: TextureLayout,
    },
    /// Build an acceleration structure from scratch.
    BuildAccelerationStructure {
        /// Structure written by the build.
        target: AccelerationStructureHandle,
        /// Build input.
        geometry: AccelerationGeometry,
        /// Device address of the scratch region.
        scratch_address: u64,
    },
    /// Order bottom-level builds before top-level builds.
    AccelerationStructureBarrier,
}

/// An ordered list of commands submitted together.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransientCommands {
    /// Debug label of the submission.
    pub label: Option<String>,
    /// Commands in execution order.
    pub commands: Vec<TransferCommand>,
}

impl TransientCommands {
    /// Create an empty command list.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            commands: Vec::new(),
        }
    }

    /// Append a command.
    pub fn push(&mut self, command: TransferCommand) {
        self.commands.push(command);
    }

    /// Append a single-region buffer copy.
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) {
        self.push(TransferCommand::CopyBuffer {
            src,
            dst,
            regions: vec![BufferCopy {
                src_offset,
                dst_offset,
                size,
            }],
        });
    }

    /// Append a buffer barrier.
    pub fn buffer_barrier(&mut self, buffer: BufferHandle, src: Access, dst: Access) {
        self.push(TransferCommand::BufferBarrier { buffer, src, dst });
    }

    /// Append a texture layout transition.
    pub fn texture_barrier(&mut self, texture: TextureHandle, old: TextureLayout, new: TextureLayout) {
        self.push(TransferCommand::TextureBarrier { texture, old, new });
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_order() {
        let mut commands = TransientCommands::new("upload");
        commands.copy_buffer(BufferHandle(1), 0, BufferHandle(2), 16, 32);
        commands.buffer_barrier(BufferHandle(2), Access::TRANSFER_WRITE, Access::SHADER_READ);
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            commands.commands[0],
            TransferCommand::CopyBuffer { ref regions, .. } if regions[0].dst_offset == 16
        ));
        assert!(matches!(commands.commands[1], TransferCommand::BufferBarrier { .. }));
    }
}
