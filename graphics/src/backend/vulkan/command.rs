//! Vulkan command pool and one-shot command buffer management.

use ash::vk;

use crate::error::GraphicsError;

use super::conversion::convert_vk_error;

/// Timeout for transient submissions.
const FENCE_TIMEOUT_NS: u64 = 10_000_000_000;

/// Create a command pool for transient command buffers.
pub fn create_command_pool(
    device: &ash::Device,
    queue_family_index: u32,
) -> Result<vk::CommandPool, GraphicsError> {
    let pool_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        );

    let pool = unsafe { device.create_command_pool(&pool_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create command pool: {:?}", e))
    })?;

    Ok(pool)
}

/// Create the fence transient submissions wait on.
pub fn create_fence(device: &ash::Device) -> Result<vk::Fence, GraphicsError> {
    let fence_info = vk::FenceCreateInfo::default();
    unsafe { device.create_fence(&fence_info, None) }.map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create fence: {:?}", e))
    })
}

/// Allocate a primary command buffer, let `record` fill it, submit it to
/// `queue`, and wait on `fence`. The command buffer is freed on every path.
pub fn submit_and_wait(
    device: &ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    fence: vk::Fence,
    record: impl FnOnce(vk::CommandBuffer) -> Result<(), GraphicsError>,
) -> Result<(), GraphicsError> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let cmd_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(|e| convert_vk_error("allocate command buffer", e))?;
    let cmd = cmd_buffers[0];

    let result = (|| {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| convert_vk_error("begin command buffer", e))?;

        record(cmd)?;

        unsafe { device.end_command_buffer(cmd) }
            .map_err(|e| convert_vk_error("end command buffer", e))?;

        unsafe { device.reset_fences(&[fence]) }
            .map_err(|e| convert_vk_error("reset fence", e))?;

        let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
        unsafe { device.queue_submit(queue, &[submit_info], fence) }
            .map_err(|e| convert_vk_error("submit transient commands", e))?;

        unsafe { device.wait_for_fences(&[fence], true, FENCE_TIMEOUT_NS) }
            .map_err(|e| convert_vk_error("wait for transient commands", e))
    })();

    if result.is_err() {
        // The buffer may still be pending after a timeout.
        let _ = unsafe { device.device_wait_idle() };
    }
    unsafe { device.free_command_buffers(pool, &cmd_buffers) };
    result
}
