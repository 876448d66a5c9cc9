//! Native Vulkan backend implementation using ash.
//!
//! [`VulkanDevice`] wraps a logical device the application already created
//! and implements [`GpuDevice`] on top of it. Instance and device creation,
//! surfaces, and frame synchronization stay with the application; this
//! backend owns only the objects it creates.
//!
//! Required device features: `bufferDeviceAddress`, `dynamicRendering`,
//! and `descriptorBindingPartiallyBound`. Ray tracing additionally needs
//! `VK_KHR_acceleration_structure`.

mod acceleration;
mod allocator;
mod command;
mod conversion;
mod encoder;
mod pipeline;

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

use ash::vk;
use aster_core::sampler::SamplerDesc;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;

use crate::backend::GpuDevice;
use crate::commands::{TransferCommand, TransientCommands};
use crate::error::{GraphicsError, GraphicsResult};
use crate::types::{
    AccelerationGeometry, AccelerationStructureDescriptor, AccelerationStructureHandle,
    AccelerationStructureKind, AccelerationStructureSizes, BufferDescriptor, BufferHandle,
    BufferUsage, DescriptorType, DescriptorWrite, MemoryLocation, PipelineDescriptor,
    PipelineHandle, SamplerHandle, TextureDescriptor, TextureHandle, TextureViewHandle,
};

use self::acceleration::{build_geometry_info, build_range, convert_geometry, convert_structure_kind};
use self::conversion::{
    convert_access, convert_address_mode, convert_buffer_usage, convert_filter_mode,
    convert_mipmap_filter_mode, convert_texture_format, convert_texture_layout,
    convert_texture_usage, convert_vk_error, texture_layout_destination, texture_layout_source,
};

pub use self::encoder::VulkanRenderEncoder;

/// Parameters for wrapping a logical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulkanDeviceParameters {
    /// Name used in log messages.
    pub label: String,
    /// Attach resource labels as debug-utils object names.
    ///
    /// Needs `VK_EXT_debug_utils` enabled on the instance.
    pub debug_names: bool,
    /// Load `VK_KHR_acceleration_structure` and expose the TLAS and
    /// instance bindings in the scene set layout.
    pub ray_tracing: bool,
    /// Size of the bindless texture array at binding 0.
    pub max_scene_textures: u32,
}

impl Default for VulkanDeviceParameters {
    fn default() -> Self {
        Self {
            label: "vulkan".to_string(),
            debug_names: false,
            ray_tracing: false,
            max_scene_textures: 1024,
        }
    }
}

impl VulkanDeviceParameters {
    /// Create default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Enable or disable debug object names.
    pub fn with_debug_names(mut self, enabled: bool) -> Self {
        self.debug_names = enabled;
        self
    }

    /// Enable or disable acceleration structure support.
    pub fn with_ray_tracing(mut self, enabled: bool) -> Self {
        self.ray_tracing = enabled;
        self
    }

    /// Set the bindless texture array size.
    pub fn with_max_scene_textures(mut self, count: u32) -> Self {
        self.max_scene_textures = count;
        self
    }
}

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    descriptor: BufferDescriptor,
}

struct VulkanTexture {
    image: vk::Image,
    allocation: Allocation,
    descriptor: TextureDescriptor,
}

struct VulkanPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

struct VulkanAccelerationStructure {
    structure: vk::AccelerationStructureKHR,
    buffer: vk::Buffer,
    allocation: Allocation,
    kind: AccelerationStructureKind,
}

/// Every object created through [`GpuDevice`], keyed by handle id.
#[derive(Default)]
struct ResourceTable {
    buffers: HashMap<u64, VulkanBuffer>,
    textures: HashMap<u64, VulkanTexture>,
    views: HashMap<u64, vk::ImageView>,
    samplers: HashMap<u64, vk::Sampler>,
    pipelines: HashMap<u64, VulkanPipeline>,
    structures: HashMap<u64, VulkanAccelerationStructure>,
}

/// [`GpuDevice`] over an application-owned `ash::Device`.
pub struct VulkanDevice {
    params: VulkanDeviceParameters,
    device: ash::Device,
    queue: vk::Queue,
    /// Taken in `Drop` so the allocator is released before the caller
    /// destroys the device.
    allocator: Mutex<Option<Allocator>>,
    resources: Mutex<ResourceTable>,
    next_id: AtomicU64,
    command_pool: vk::CommandPool,
    fence: vk::Fence,
    scene_set_layout: vk::DescriptorSetLayout,
    acceleration: Option<ash::khr::acceleration_structure::Device>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("params", &self.params)
            .finish()
    }
}

impl VulkanDevice {
    /// Wrap a logical device. Work is submitted to queue 0 of
    /// `queue_family_index`.
    ///
    /// # Safety
    ///
    /// `device` must have been created from `physical_device` with the
    /// features listed in the module documentation, and must outlive the
    /// returned value.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        queue_family_index: u32,
        params: VulkanDeviceParameters,
    ) -> GraphicsResult<Self> {
        if params.max_scene_textures == 0 {
            return Err(GraphicsError::InvalidParameter(
                "max_scene_textures must be positive".to_string(),
            ));
        }

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };
        let allocator = allocator::create_allocator(instance, physical_device, device.clone())?;
        let command_pool = command::create_command_pool(&device, queue_family_index)?;
        let fence = match command::create_fence(&device) {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { device.destroy_command_pool(command_pool, None) };
                return Err(e);
            }
        };
        let scene_set_layout = match pipeline::create_scene_set_layout(
            &device,
            params.max_scene_textures,
            params.ray_tracing,
        ) {
            Ok(layout) => layout,
            Err(e) => {
                unsafe {
                    device.destroy_fence(fence, None);
                    device.destroy_command_pool(command_pool, None);
                }
                return Err(e);
            }
        };

        let acceleration = params
            .ray_tracing
            .then(|| ash::khr::acceleration_structure::Device::new(instance, &device));
        let debug_utils = params
            .debug_names
            .then(|| ash::ext::debug_utils::Device::new(instance, &device));

        log::info!(
            "{}: wrapped Vulkan device (ray tracing: {}, scene textures: {})",
            params.label,
            params.ray_tracing,
            params.max_scene_textures
        );

        Ok(Self {
            params,
            device,
            queue,
            allocator: Mutex::new(Some(allocator)),
            resources: Mutex::new(ResourceTable::default()),
            next_id: AtomicU64::new(1),
            command_pool,
            fence,
            scene_set_layout,
            acceleration,
            debug_utils,
        })
    }

    /// The wrapped logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Parameters this device was created with.
    pub fn params(&self) -> &VulkanDeviceParameters {
        &self.params
    }

    /// Layout of the scene descriptor set every pipeline binds at set 0.
    pub fn scene_set_layout(&self) -> vk::DescriptorSetLayout {
        self.scene_set_layout
    }

    /// Raw buffer behind a handle.
    pub fn raw_buffer(&self, buffer: BufferHandle) -> Option<vk::Buffer> {
        self.resources.lock().buffers.get(&buffer.0).map(|b| b.buffer)
    }

    /// Raw pipeline and pipeline layout behind a handle.
    pub fn raw_pipeline(
        &self,
        pipeline: PipelineHandle,
    ) -> Option<(vk::Pipeline, vk::PipelineLayout)> {
        self.resources
            .lock()
            .pipelines
            .get(&pipeline.0)
            .map(|p| (p.pipeline, p.layout))
    }

    /// Raw image view behind a handle.
    pub fn raw_texture_view(&self, view: TextureViewHandle) -> Option<vk::ImageView> {
        self.resources.lock().views.get(&view.0).copied()
    }

    /// Apply descriptor writes to a set allocated with
    /// [`scene_set_layout`](Self::scene_set_layout).
    pub fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> GraphicsResult<()> {
        let resources = self.resources.lock();
        for write in writes {
            match write.ty {
                DescriptorType::CombinedImageSampler => {
                    let infos = write
                        .image_infos
                        .iter()
                        .map(|info| {
                            let view = resources.views.get(&info.view.0).ok_or_else(|| {
                                unknown_handle("texture view", info.view.0)
                            })?;
                            let sampler =
                                resources.samplers.get(&info.sampler.0).ok_or_else(|| {
                                    unknown_handle("sampler", info.sampler.0)
                                })?;
                            Ok(vk::DescriptorImageInfo::default()
                                .image_view(*view)
                                .sampler(*sampler)
                                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                        })
                        .collect::<GraphicsResult<Vec<_>>>()?;
                    if infos.len() > self.params.max_scene_textures as usize {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "{} textures exceed the scene limit of {}",
                            infos.len(),
                            self.params.max_scene_textures
                        )));
                    }
                    let vk_write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(write.binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&infos);
                    unsafe { self.device.update_descriptor_sets(&[vk_write], &[]) };
                }
                DescriptorType::StorageBuffer | DescriptorType::UniformBuffer => {
                    let infos = write
                        .buffer_infos
                        .iter()
                        .map(|info| {
                            let buffer = resources
                                .buffers
                                .get(&info.buffer.0)
                                .ok_or_else(|| unknown_handle("buffer", info.buffer.0))?;
                            Ok(vk::DescriptorBufferInfo::default()
                                .buffer(buffer.buffer)
                                .offset(info.offset)
                                .range(info.range))
                        })
                        .collect::<GraphicsResult<Vec<_>>>()?;
                    let ty = if write.ty == DescriptorType::UniformBuffer {
                        vk::DescriptorType::UNIFORM_BUFFER
                    } else {
                        vk::DescriptorType::STORAGE_BUFFER
                    };
                    let vk_write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(write.binding)
                        .descriptor_type(ty)
                        .buffer_info(&infos);
                    unsafe { self.device.update_descriptor_sets(&[vk_write], &[]) };
                }
                DescriptorType::AccelerationStructure => {
                    let structures = write
                        .acceleration_structures
                        .iter()
                        .map(|handle| {
                            resources
                                .structures
                                .get(&handle.0)
                                .map(|s| s.structure)
                                .ok_or_else(|| unknown_handle("acceleration structure", handle.0))
                        })
                        .collect::<GraphicsResult<Vec<_>>>()?;
                    let mut as_write = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(&structures);
                    let mut vk_write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(write.binding)
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        .push_next(&mut as_write);
                    vk_write.descriptor_count = structures.len() as u32;
                    unsafe { self.device.update_descriptor_sets(&[vk_write], &[]) };
                }
            }
        }
        Ok(())
    }

    /// Wrap a command buffer for scene draw recording.
    pub fn render_encoder(&self, cmd: vk::CommandBuffer) -> VulkanRenderEncoder<'_> {
        VulkanRenderEncoder::new(self, cmd)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn acceleration_loader(&self) -> GraphicsResult<&ash::khr::acceleration_structure::Device> {
        self.acceleration.as_ref().ok_or_else(|| {
            GraphicsError::FeatureNotSupported(
                "acceleration structures (ray tracing not enabled)".to_string(),
            )
        })
    }

    fn set_debug_name<H: vk::Handle>(&self, handle: H, label: Option<&str>) {
        let (Some(debug_utils), Some(label)) = (&self.debug_utils, label) else {
            return;
        };
        let Ok(name) = CString::new(label) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            log::debug!("Failed to name object '{}': {:?}", label, e);
        }
    }

    /// Create a buffer and bind fresh memory to it.
    fn allocate_buffer(
        &self,
        label: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: gpu_allocator::MemoryLocation,
    ) -> GraphicsResult<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let mut guard = self.allocator.lock();
        let Some(allocator) = guard.as_mut() else {
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(GraphicsError::Internal("Allocator already released".to_string()));
        };

        let allocation = match allocator.allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(match e {
                    gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
                    other => GraphicsError::ResourceCreationFailed(format!(
                        "Failed to allocate buffer memory: {}",
                        other
                    )),
                });
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            let _ = allocator.free(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind buffer memory: {:?}",
                e
            )));
        }

        Ok((buffer, allocation))
    }

    fn free_allocation(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut()
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("{}: failed to free allocation: {}", self.params.label, e);
        }
    }

    fn record_command(
        &self,
        resources: &ResourceTable,
        cmd: vk::CommandBuffer,
        command: &TransferCommand,
    ) -> GraphicsResult<()> {
        let buffer = |handle: BufferHandle| {
            resources
                .buffers
                .get(&handle.0)
                .map(|b| b.buffer)
                .ok_or_else(|| unknown_handle("buffer", handle.0))
        };
        let texture = |handle: TextureHandle| {
            resources
                .textures
                .get(&handle.0)
                .ok_or_else(|| unknown_handle("texture", handle.0))
        };

        match command {
            TransferCommand::CopyBuffer { src, dst, regions } => {
                let regions: Vec<vk::BufferCopy> = regions
                    .iter()
                    .map(|r| vk::BufferCopy {
                        src_offset: r.src_offset,
                        dst_offset: r.dst_offset,
                        size: r.size,
                    })
                    .collect();
                unsafe {
                    self.device
                        .cmd_copy_buffer(cmd, buffer(*src)?, buffer(*dst)?, &regions)
                };
            }
            TransferCommand::CopyBufferToTexture {
                src,
                src_offset,
                dst,
                width,
                height,
            } => {
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(*src_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: *width,
                        height: *height,
                        depth: 1,
                    });
                unsafe {
                    self.device.cmd_copy_buffer_to_image(
                        cmd,
                        buffer(*src)?,
                        texture(*dst)?.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    )
                };
            }
            TransferCommand::BufferBarrier {
                buffer: target,
                src,
                dst,
            } => {
                let (src_access, src_stage) = convert_access(*src);
                let (dst_access, dst_stage) = convert_access(*dst);
                let barrier = vk::BufferMemoryBarrier::default()
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer(*target)?)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier],
                        &[],
                    )
                };
            }
            TransferCommand::TextureBarrier {
                texture: target,
                old,
                new,
            } => {
                let entry = texture(*target)?;
                let (src_access, src_stage) = texture_layout_source(*old);
                let (dst_access, dst_stage) = texture_layout_destination(*new);
                let barrier = vk::ImageMemoryBarrier::default()
                    .old_layout(convert_texture_layout(*old))
                    .new_layout(convert_texture_layout(*new))
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(entry.image)
                    .subresource_range(full_range(&entry.descriptor));
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier],
                    )
                };
            }
            TransferCommand::BuildAccelerationStructure {
                target,
                geometry,
                scratch_address,
            } => {
                let loader = self.acceleration_loader()?;
                let entry = resources
                    .structures
                    .get(&target.0)
                    .ok_or_else(|| unknown_handle("acceleration structure", target.0))?;
                if entry.kind != geometry.kind() {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "Cannot build {:?} structure from {:?} geometry",
                        entry.kind,
                        geometry.kind()
                    )));
                }
                let geometries = [convert_geometry(geometry)];
                let info = build_geometry_info(entry.kind, &geometries)
                    .dst_acceleration_structure(entry.structure)
                    .scratch_data(vk::DeviceOrHostAddressKHR {
                        device_address: *scratch_address,
                    });
                let range = build_range(geometry);
                unsafe {
                    loader.cmd_build_acceleration_structures(
                        cmd,
                        &[info],
                        &[std::slice::from_ref(&range)],
                    )
                };
            }
            TransferCommand::AccelerationStructureBarrier => {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                    .dst_access_mask(
                        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                            | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
                    );
                unsafe {
                    self.device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    )
                };
            }
        }
        Ok(())
    }
}

fn unknown_handle(kind: &str, id: u64) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("Unknown {} handle {}", kind, id))
}

fn aspect_mask(descriptor: &TextureDescriptor) -> vk::ImageAspectFlags {
    if descriptor.format.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

fn full_range(descriptor: &TextureDescriptor) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect_mask(descriptor),
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn convert_location(location: MemoryLocation) -> gpu_allocator::MemoryLocation {
    match location {
        MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
        MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &'static str {
        "Vulkan Backend (ash)"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "Buffer size must be positive".to_string(),
            ));
        }

        let (buffer, allocation) = self.allocate_buffer(
            descriptor.label.as_deref().unwrap_or("buffer"),
            descriptor.size,
            convert_buffer_usage(descriptor.usage),
            convert_location(descriptor.location),
        )?;
        self.set_debug_name(buffer, descriptor.label.as_deref());

        let id = self.next_id();
        self.resources.lock().buffers.insert(
            id,
            VulkanBuffer {
                buffer,
                allocation,
                descriptor: descriptor.clone(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let Some(entry) = self.resources.lock().buffers.remove(&buffer.0) else {
            return;
        };
        unsafe { self.device.destroy_buffer(entry.buffer, None) };
        self.free_allocation(entry.allocation);
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut resources = self.resources.lock();
        let entry = resources
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| unknown_handle("buffer", buffer.0))?;

        let end = offset + data.len() as u64;
        if end > entry.descriptor.size {
            return Err(GraphicsError::InvalidParameter(format!(
                "Write of {} bytes at {} exceeds buffer size {}",
                data.len(),
                offset,
                entry.descriptor.size
            )));
        }

        let Some(mapped) = entry.allocation.mapped_slice_mut() else {
            return Err(GraphicsError::InvalidParameter(
                "Buffer is not mapped for CPU access".to_string(),
            ));
        };
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> GraphicsResult<u64> {
        let resources = self.resources.lock();
        let entry = resources
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| unknown_handle("buffer", buffer.0))?;
        if !entry.descriptor.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            return Err(GraphicsError::InvalidParameter(
                "Buffer was not created with DEVICE_ADDRESS usage".to_string(),
            ));
        }
        let info = vk::BufferDeviceAddressInfo::default().buffer(entry.buffer);
        Ok(unsafe { self.device.get_buffer_device_address(&info) })
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<TextureHandle> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "Texture extent must be positive".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = {
            let mut guard = self.allocator.lock();
            let allocated = match guard.as_mut() {
                Some(allocator) => allocator
                    .allocate(&AllocationCreateDesc {
                        name: descriptor.label.as_deref().unwrap_or("texture"),
                        requirements,
                        location: gpu_allocator::MemoryLocation::GpuOnly,
                        linear: false,
                        allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                    })
                    .map_err(|e| {
                        GraphicsError::ResourceCreationFailed(format!(
                            "Failed to allocate texture memory: {}",
                            e
                        ))
                    }),
                None => Err(GraphicsError::Internal("Allocator already released".to_string())),
            };
            match allocated {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            self.free_allocation(allocation);
            unsafe { self.device.destroy_image(image, None) };
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "Failed to bind image memory: {:?}",
                e
            )));
        }
        self.set_debug_name(image, descriptor.label.as_deref());

        let id = self.next_id();
        self.resources.lock().textures.insert(
            id,
            VulkanTexture {
                image,
                allocation,
                descriptor: descriptor.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        let Some(entry) = self.resources.lock().textures.remove(&texture.0) else {
            return;
        };
        unsafe { self.device.destroy_image(entry.image, None) };
        self.free_allocation(entry.allocation);
    }

    fn create_texture_view(&self, texture: TextureHandle) -> GraphicsResult<TextureViewHandle> {
        let mut resources = self.resources.lock();
        let entry = resources
            .textures
            .get(&texture.0)
            .ok_or_else(|| unknown_handle("texture", texture.0))?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(entry.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(convert_texture_format(entry.descriptor.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(full_range(&entry.descriptor));

        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create image view: {:?}", e))
        })?;

        let id = self.next_id();
        resources.views.insert(id, view);
        Ok(TextureViewHandle(id))
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        if let Some(view) = self.resources.lock().views.remove(&view.0) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    fn create_sampler(&self, descriptor: &SamplerDesc) -> GraphicsResult<SamplerHandle> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter_mode(descriptor.mag_filter))
            .min_filter(convert_filter_mode(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_filter_mode(descriptor.mipmap_filter))
            .address_mode_u(convert_address_mode(descriptor.address_mode_u))
            .address_mode_v(convert_address_mode(descriptor.address_mode_v))
            .address_mode_w(convert_address_mode(descriptor.address_mode_v))
            .mip_lod_bias(0.0)
            .anisotropy_enable(false)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }.map_err(|e| {
            GraphicsError::ResourceCreationFailed(format!("Failed to create sampler: {:?}", e))
        })?;

        let id = self.next_id();
        self.resources.lock().samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        if let Some(sampler) = self.resources.lock().samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn create_pipeline(&self, descriptor: &PipelineDescriptor) -> GraphicsResult<PipelineHandle> {
        let layout = pipeline::create_pipeline_layout(
            &self.device,
            self.scene_set_layout,
            descriptor.push_constant_size,
        )?;
        let raw = match pipeline::create_graphics_pipeline(&self.device, layout, descriptor) {
            Ok(raw) => raw,
            Err(e) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };
        self.set_debug_name(raw, descriptor.label.as_deref());

        let id = self.next_id();
        self.resources.lock().pipelines.insert(
            id,
            VulkanPipeline {
                pipeline: raw,
                layout,
            },
        );
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        let Some(entry) = self.resources.lock().pipelines.remove(&pipeline.0) else {
            return;
        };
        unsafe {
            self.device.destroy_pipeline(entry.pipeline, None);
            self.device.destroy_pipeline_layout(entry.layout, None);
        }
    }

    fn acceleration_structure_sizes(
        &self,
        geometry: &AccelerationGeometry,
    ) -> GraphicsResult<AccelerationStructureSizes> {
        let loader = self.acceleration_loader()?;
        if geometry.primitive_count() == 0 {
            return Err(GraphicsError::InvalidParameter(
                "Acceleration structure geometry has no primitives".to_string(),
            ));
        }

        let geometries = [convert_geometry(geometry)];
        let info = build_geometry_info(geometry.kind(), &geometries);
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &info,
                &[geometry.primitive_count()],
                &mut sizes,
            )
        };

        Ok(AccelerationStructureSizes {
            structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> GraphicsResult<AccelerationStructureHandle> {
        let loader = self.acceleration_loader()?;
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "Acceleration structure size must be positive".to_string(),
            ));
        }

        let (buffer, allocation) = self.allocate_buffer(
            descriptor.label.as_deref().unwrap_or("acceleration structure"),
            descriptor.size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            gpu_allocator::MemoryLocation::GpuOnly,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(buffer)
            .offset(0)
            .size(descriptor.size)
            .ty(convert_structure_kind(descriptor.kind));

        let structure = match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(structure) => structure,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                self.free_allocation(allocation);
                return Err(convert_vk_error("create acceleration structure", e));
            }
        };
        self.set_debug_name(structure, descriptor.label.as_deref());

        let id = self.next_id();
        self.resources.lock().structures.insert(
            id,
            VulkanAccelerationStructure {
                structure,
                buffer,
                allocation,
                kind: descriptor.kind,
            },
        );
        Ok(AccelerationStructureHandle(id))
    }

    fn acceleration_structure_address(
        &self,
        structure: AccelerationStructureHandle,
    ) -> GraphicsResult<u64> {
        let loader = self.acceleration_loader()?;
        let resources = self.resources.lock();
        let entry = resources
            .structures
            .get(&structure.0)
            .ok_or_else(|| unknown_handle("acceleration structure", structure.0))?;
        let info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
            .acceleration_structure(entry.structure);
        Ok(unsafe { loader.get_acceleration_structure_device_address(&info) })
    }

    fn destroy_acceleration_structure(&self, structure: AccelerationStructureHandle) {
        let Some(entry) = self.resources.lock().structures.remove(&structure.0) else {
            return;
        };
        if let Some(loader) = &self.acceleration {
            unsafe { loader.destroy_acceleration_structure(entry.structure, None) };
        }
        unsafe { self.device.destroy_buffer(entry.buffer, None) };
        self.free_allocation(entry.allocation);
    }

    fn submit_transient(&self, commands: &TransientCommands) -> GraphicsResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        log::debug!(
            "{}: submitting '{}' ({} commands)",
            self.params.label,
            commands.label.as_deref().unwrap_or("transient"),
            commands.len()
        );

        let resources = self.resources.lock();
        command::submit_and_wait(
            &self.device,
            self.command_pool,
            self.queue,
            self.fence,
            |cmd| {
                for command in &commands.commands {
                    self.record_command(&resources, cmd, command)?;
                }
                Ok(())
            },
        )
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
        }

        let resources = std::mem::take(&mut *self.resources.lock());
        let live = resources.buffers.len()
            + resources.textures.len()
            + resources.views.len()
            + resources.samplers.len()
            + resources.pipelines.len()
            + resources.structures.len();
        if live > 0 {
            log::warn!(
                "{}: destroying {} resources still alive at drop",
                self.params.label,
                live
            );
        }

        unsafe {
            for (_, structure) in resources.structures {
                if let Some(loader) = &self.acceleration {
                    loader.destroy_acceleration_structure(structure.structure, None);
                }
                self.device.destroy_buffer(structure.buffer, None);
                self.free_allocation(structure.allocation);
            }
            for (_, pipeline) in resources.pipelines {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, sampler) in resources.samplers {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, view) in resources.views {
                self.device.destroy_image_view(view, None);
            }
            for (_, texture) in resources.textures {
                self.device.destroy_image(texture.image, None);
                self.free_allocation(texture.allocation);
            }
            for (_, buffer) in resources.buffers {
                self.device.destroy_buffer(buffer.buffer, None);
                self.free_allocation(buffer.allocation);
            }

            self.device
                .destroy_descriptor_set_layout(self.scene_set_layout, None);
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
        }

        // Allocator must go before the caller destroys the device
        drop(self.allocator.lock().take());
    }
}
