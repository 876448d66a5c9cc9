//! Draw recording into a caller-owned Vulkan command buffer.

use ash::vk;
use aster_core::mesh::IndexFormat;

use crate::backend::RenderEncoder;
use crate::types::{BufferHandle, PipelineHandle};

use super::VulkanDevice;
use super::conversion::convert_index_format;

/// Records scene draws into a command buffer that is inside a dynamic
/// rendering pass with the scene descriptor set bound at set 0.
///
/// Unknown handles are logged and the command is dropped.
pub struct VulkanRenderEncoder<'a> {
    device: &'a VulkanDevice,
    cmd: vk::CommandBuffer,
    /// Layout of the bound pipeline, used for push constants.
    layout: Option<vk::PipelineLayout>,
}

impl<'a> VulkanRenderEncoder<'a> {
    /// Wrap a command buffer in the recording state.
    pub fn new(device: &'a VulkanDevice, cmd: vk::CommandBuffer) -> Self {
        Self {
            device,
            cmd,
            layout: None,
        }
    }

    /// The wrapped command buffer.
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }
}

impl RenderEncoder for VulkanRenderEncoder<'_> {
    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some((raw, layout)) = self.device.raw_pipeline(pipeline) else {
            log::warn!("bind_pipeline: unknown pipeline {}", pipeline.id());
            return;
        };
        unsafe {
            self.device
                .device()
                .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, raw)
        };
        self.layout = Some(layout);
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle, offset: u64) {
        let Some(raw) = self.device.raw_buffer(buffer) else {
            log::warn!("bind_vertex_buffer: unknown buffer {}", buffer.id());
            return;
        };
        unsafe {
            self.device
                .device()
                .cmd_bind_vertex_buffers(self.cmd, 0, &[raw], &[offset])
        };
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        let Some(raw) = self.device.raw_buffer(buffer) else {
            log::warn!("bind_index_buffer: unknown buffer {}", buffer.id());
            return;
        };
        unsafe {
            self.device.device().cmd_bind_index_buffer(
                self.cmd,
                raw,
                offset,
                convert_index_format(format),
            )
        };
    }

    fn push_constants(&mut self, data: &[u8]) {
        let Some(layout) = self.layout else {
            log::warn!("push_constants without a bound pipeline");
            return;
        };
        unsafe {
            self.device.device().cmd_push_constants(
                self.cmd,
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                data,
            )
        };
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) {
        unsafe {
            self.device
                .device()
                .cmd_draw(self.cmd, vertex_count, 1, first_vertex, 0)
        };
    }

    fn draw_indexed(&mut self, index_count: u32, first_index: u32, vertex_offset: i32) {
        unsafe {
            self.device.device().cmd_draw_indexed(
                self.cmd,
                index_count,
                1,
                first_index,
                vertex_offset,
                0,
            )
        };
    }
}
