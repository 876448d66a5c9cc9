//! One-shot transfer of a loaded scene into device memory.
//!
//! The upload runs in two phases, each with one staging buffer sized to the
//! phase total and one transient submission:
//!
//! - mesh phase: vertex, index, and transform bytes into three exactly-sized
//!   device buffers,
//! - image phase: every image (scene images followed by the default
//!   textures) into its own texture, transitioned for sampling.
//!
//! Samplers are created directly. If any step fails, every handle created by
//! the call is destroyed before the error is returned.

use aster_core::ResourceStore;
use aster_core::sampler::SamplerDesc;
use aster_core::store::BufferLayout;

use crate::backend::GpuDevice;
use crate::commands::{TransferCommand, TransientCommands};
use crate::error::{GraphicsError, GraphicsResult};
use crate::scene::bindings;
use crate::types::{
    Access, BufferDescriptor, BufferHandle, BufferUsage, DescriptorImageInfo, DescriptorType,
    DescriptorWrite, SamplerHandle, TextureDescriptor, TextureFormat, TextureHandle,
    TextureLayout, TextureUsage, TextureViewHandle,
};

/// Options of [`upload_to_device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    /// Drop host pixel, vertex, and index arrays once the transfers finished.
    pub release_host_data: bool,
    /// Build acceleration structures right after the upload.
    pub build_acceleration_structures: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            release_host_data: true,
            build_acceleration_structures: false,
        }
    }
}

impl UploadOptions {
    /// Set whether host copies are released.
    pub fn with_release_host_data(mut self, release: bool) -> Self {
        self.release_host_data = release;
        self
    }

    /// Set whether acceleration structures are built.
    pub fn with_acceleration_structures(mut self, build: bool) -> Self {
        self.build_acceleration_structures = build;
        self
    }
}

/// Device handles of an uploaded scene.
#[derive(Debug, Default)]
pub struct DeviceScene {
    layout: BufferLayout,
    vertex_buffer: Option<BufferHandle>,
    index_buffer: Option<BufferHandle>,
    transform_buffer: Option<BufferHandle>,
    textures: Vec<TextureHandle>,
    views: Vec<TextureViewHandle>,
    samplers: Vec<SamplerHandle>,
    default_sampler: Option<SamplerHandle>,
    texture_bindings: Vec<DescriptorImageInfo>,
}

impl DeviceScene {
    /// Byte totals the buffers were allocated with.
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// Shared vertex buffer; `None` when the scene has no vertices.
    pub fn vertex_buffer(&self) -> Option<BufferHandle> {
        self.vertex_buffer
    }

    /// Shared index buffer; `None` when the scene has no indices.
    pub fn index_buffer(&self) -> Option<BufferHandle> {
        self.index_buffer
    }

    /// Transform buffer; `None` when the scene has no meshes.
    pub fn transform_buffer(&self) -> Option<BufferHandle> {
        self.transform_buffer
    }

    /// One texture per store image, in image order.
    pub fn textures(&self) -> &[TextureHandle] {
        &self.textures
    }

    /// One view per texture.
    pub fn views(&self) -> &[TextureViewHandle] {
        &self.views
    }

    /// One sampler per store sampler.
    pub fn samplers(&self) -> &[SamplerHandle] {
        &self.samplers
    }

    /// Sampler used by textures that name none.
    pub fn default_sampler(&self) -> Option<SamplerHandle> {
        self.default_sampler
    }

    /// View and sampler of every store texture, in texture order.
    pub fn texture_bindings(&self) -> &[DescriptorImageInfo] {
        &self.texture_bindings
    }

    /// Descriptor writes for the texture array and the transform buffer.
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        let mut writes = Vec::new();
        if !self.texture_bindings.is_empty() {
            writes.push(DescriptorWrite::images(
                bindings::TEXTURES,
                self.texture_bindings.clone(),
            ));
        }
        if let Some(buffer) = self.transform_buffer {
            writes.push(DescriptorWrite::buffer(
                bindings::TRANSFORMS,
                DescriptorType::StorageBuffer,
                buffer,
                self.layout.transform_buffer_size,
            ));
        }
        writes
    }

    /// Destroy every handle.
    pub fn destroy(&mut self, device: &dyn GpuDevice) {
        for buffer in [
            self.vertex_buffer.take(),
            self.index_buffer.take(),
            self.transform_buffer.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.destroy_buffer(buffer);
        }
        for view in self.views.drain(..) {
            device.destroy_texture_view(view);
        }
        for texture in self.textures.drain(..) {
            device.destroy_texture(texture);
        }
        for sampler in self.samplers.drain(..).chain(self.default_sampler.take()) {
            device.destroy_sampler(sampler);
        }
        self.texture_bindings.clear();
    }
}

/// Upload a scene and return its device handles.
///
/// The store's buffer layout is computed if the loader did not already.
pub fn upload_to_device(
    store: &mut ResourceStore,
    device: &dyn GpuDevice,
    options: &UploadOptions,
) -> GraphicsResult<DeviceScene> {
    let layout = match store.buffer_layout() {
        Some(layout) => layout,
        None => store.compute_buffer_layout(),
    };
    store
        .validate_layout()
        .map_err(|e| GraphicsError::InvalidParameter(format!("buffer layout: {e}")))?;
    if !store.is_host_resident() {
        return Err(GraphicsError::InvalidParameter(
            "host data was already released".to_string(),
        ));
    }

    let mut scene = DeviceScene {
        layout,
        ..Default::default()
    };
    let result = upload_meshes(store, device, &mut scene)
        .and_then(|()| upload_images(store, device, &mut scene))
        .and_then(|()| create_samplers(store, device, &mut scene));
    if let Err(error) = result {
        log::error!("Scene upload failed: {}", error);
        scene.destroy(device);
        return Err(error);
    }

    log::info!(
        "Uploaded scene to {}: {} vertex bytes, {} index bytes, {} textures, {} samplers",
        device.name(),
        layout.vertex_buffer_size,
        layout.index_buffer_size,
        scene.textures.len(),
        scene.samplers.len()
    );
    if options.release_host_data {
        store.release_host_data();
        log::debug!("Released host scene data");
    }
    Ok(scene)
}

/// Create a host-visible staging buffer, run `record` against it, submit the
/// recorded commands, and destroy the staging buffer whatever happened.
fn with_staging(
    device: &dyn GpuDevice,
    label: &str,
    size: u64,
    record: impl FnOnce(BufferHandle, &mut TransientCommands) -> GraphicsResult<()>,
) -> GraphicsResult<()> {
    let staging = device.create_buffer(
        &BufferDescriptor::host_visible(size, BufferUsage::COPY_SRC)
            .with_label(format!("{label} staging")),
    )?;
    let mut commands = TransientCommands::new(label);
    let result = record(staging, &mut commands).and_then(|()| device.submit_transient(&commands));
    device.destroy_buffer(staging);
    result
}

fn create_device_buffer(
    device: &dyn GpuDevice,
    label: &str,
    size: u64,
    usage: BufferUsage,
) -> GraphicsResult<Option<BufferHandle>> {
    if size == 0 {
        return Ok(None);
    }
    device
        .create_buffer(&BufferDescriptor::new(size, usage | BufferUsage::COPY_DST).with_label(label))
        .map(Some)
}

fn upload_meshes(
    store: &ResourceStore,
    device: &dyn GpuDevice,
    scene: &mut DeviceScene,
) -> GraphicsResult<()> {
    let layout = scene.layout;
    let geometry_usage = BufferUsage::STORAGE
        | BufferUsage::DEVICE_ADDRESS
        | BufferUsage::ACCELERATION_STRUCTURE_INPUT;
    scene.vertex_buffer = create_device_buffer(
        device,
        "scene vertices",
        layout.vertex_buffer_size,
        BufferUsage::VERTEX | geometry_usage,
    )?;
    scene.index_buffer = create_device_buffer(
        device,
        "scene indices",
        layout.index_buffer_size,
        BufferUsage::INDEX | geometry_usage,
    )?;
    scene.transform_buffer = create_device_buffer(
        device,
        "scene transforms",
        layout.transform_buffer_size,
        BufferUsage::STORAGE,
    )?;

    let total = layout.vertex_buffer_size + layout.index_buffer_size + layout.transform_buffer_size;
    if total == 0 {
        return Ok(());
    }
    let index_base = layout.vertex_buffer_size;
    let transform_base = index_base + layout.index_buffer_size;

    with_staging(device, "mesh upload", total, |staging, commands| {
        for mesh in store.meshes() {
            let region = mesh.region.ok_or_else(|| {
                GraphicsError::Internal(format!("mesh {:?} has no buffer region", mesh.name))
            })?;
            if let Some(bytes) = mesh.vertex_data().filter(|bytes| !bytes.is_empty()) {
                device.write_buffer(staging, region.vertex_offset, bytes)?;
            }
            if let Some(bytes) = mesh.index_data().filter(|bytes| !bytes.is_empty()) {
                device.write_buffer(staging, index_base + region.index_offset, bytes)?;
            }
        }
        if !store.transforms().is_empty() {
            device.write_buffer(
                staging,
                transform_base,
                bytemuck::cast_slice(store.transforms()),
            )?;
        }

        let targets = [
            (scene.vertex_buffer, 0, layout.vertex_buffer_size),
            (scene.index_buffer, index_base, layout.index_buffer_size),
            (scene.transform_buffer, transform_base, layout.transform_buffer_size),
        ];
        for (buffer, src_offset, size) in targets {
            if let Some(buffer) = buffer {
                commands.copy_buffer(staging, src_offset, buffer, 0, size);
            }
        }

        let geometry_read = Access::SHADER_READ | Access::ACCELERATION_STRUCTURE_BUILD_INPUT;
        if let Some(buffer) = scene.vertex_buffer {
            commands.buffer_barrier(
                buffer,
                Access::TRANSFER_WRITE,
                Access::VERTEX_ATTRIBUTE_READ | geometry_read,
            );
        }
        if let Some(buffer) = scene.index_buffer {
            commands.buffer_barrier(
                buffer,
                Access::TRANSFER_WRITE,
                Access::INDEX_READ | geometry_read,
            );
        }
        if let Some(buffer) = scene.transform_buffer {
            commands.buffer_barrier(buffer, Access::TRANSFER_WRITE, Access::SHADER_READ);
        }
        Ok(())
    })?;
    log::debug!(
        "Mesh phase: {} meshes, {} staging bytes",
        store.meshes().len(),
        total
    );
    Ok(())
}

fn upload_images(
    store: &ResourceStore,
    device: &dyn GpuDevice,
    scene: &mut DeviceScene,
) -> GraphicsResult<()> {
    for (index, image) in store.images().iter().enumerate() {
        let mut descriptor = TextureDescriptor::new_2d(
            image.width,
            image.height,
            TextureFormat::Rgba8Unorm,
            TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING,
        );
        descriptor.label = Some(
            image
                .name
                .clone()
                .unwrap_or_else(|| format!("image {index}")),
        );
        let texture = device.create_texture(&descriptor)?;
        scene.textures.push(texture);
        scene.views.push(device.create_texture_view(texture)?);
    }

    let total = scene.layout.image_bytes;
    if total == 0 {
        return Ok(());
    }
    with_staging(device, "image upload", total, |staging, commands| {
        let mut offset = 0;
        for (image, &texture) in store.images().iter().zip(&scene.textures) {
            let pixels = image.pixels().ok_or_else(|| {
                GraphicsError::Internal(format!("image {:?} has no pixels", image.name))
            })?;
            device.write_buffer(staging, offset, pixels)?;
            commands.texture_barrier(texture, TextureLayout::Undefined, TextureLayout::TransferDst);
            commands.push(TransferCommand::CopyBufferToTexture {
                src: staging,
                src_offset: offset,
                dst: texture,
                width: image.width,
                height: image.height,
            });
            commands.texture_barrier(
                texture,
                TextureLayout::TransferDst,
                TextureLayout::ShaderReadOnly,
            );
            offset += image.byte_size();
        }
        Ok(())
    })?;
    log::debug!(
        "Image phase: {} images, {} staging bytes",
        scene.textures.len(),
        total
    );
    Ok(())
}

fn create_samplers(
    store: &ResourceStore,
    device: &dyn GpuDevice,
    scene: &mut DeviceScene,
) -> GraphicsResult<()> {
    for sampler in store.samplers() {
        scene.samplers.push(device.create_sampler(sampler)?);
    }
    let default_sampler = device.create_sampler(&SamplerDesc::default())?;
    scene.default_sampler = Some(default_sampler);

    scene.texture_bindings = store
        .textures()
        .iter()
        .map(|texture| {
            let view = scene.views.get(texture.image).copied().ok_or_else(|| {
                GraphicsError::Internal(format!("texture image {} out of range", texture.image))
            })?;
            let sampler = texture
                .sampler
                .and_then(|index| scene.samplers.get(index).copied())
                .unwrap_or(default_sampler);
            Ok(DescriptorImageInfo { view, sampler })
        })
        .collect::<GraphicsResult<_>>()?;
    Ok(())
}
