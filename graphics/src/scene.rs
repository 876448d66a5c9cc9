//! Owner of a scene's host data and every device resource derived from it.
//!
//! [`SceneResources`] ties the pieces together: it uploads the store, sets up
//! the material effects and their proxy buffer, optionally builds the
//! acceleration structures, and drives the batcher each frame. All
//! descriptor writes it produces target the scene set at the [`bindings`].

use aster_core::ResourceStore;
use aster_core::material::MaterialModel;

use crate::acceleration::{AccelerationState, build_acceleration_structures};
use crate::backend::{GpuDevice, RenderEncoder};
use crate::batcher::{Camera, FrameStats, RenderBatcher};
use crate::error::{GraphicsError, GraphicsResult};
use crate::material_fx::MaterialFxRegistry;
use crate::types::{DescriptorWrite, PipelineHandle, ShaderSource};
use crate::upload::{DeviceScene, UploadOptions, upload_to_device};

/// Binding numbers of the scene descriptor set.
pub mod bindings {
    /// Array of sampled scene textures, default textures last.
    pub const TEXTURES: u32 = 0;
    /// Material proxy storage buffer.
    pub const MATERIALS: u32 = 1;
    /// Mesh transform storage buffer.
    pub const TRANSFORMS: u32 = 2;
    /// Frame uniform buffer.
    pub const FRAME_UNIFORMS: u32 = 3;
    /// Top-level acceleration structure.
    pub const TLAS: u32 = 4;
    /// Ray-tracing instance record buffer.
    pub const INSTANCES: u32 = 5;
}

/// A loaded scene and its device resources.
#[derive(Debug)]
pub struct SceneResources {
    store: ResourceStore,
    registry: MaterialFxRegistry,
    batcher: RenderBatcher,
    device_scene: Option<DeviceScene>,
    acceleration: Option<AccelerationState>,
}

impl SceneResources {
    /// Wrap a loaded store; `shaders` is indexed by [`MaterialModel::index`].
    pub fn new(store: ResourceStore, shaders: [ShaderSource; MaterialModel::COUNT]) -> Self {
        Self::with_registry(store, MaterialFxRegistry::new(shaders))
    }

    /// Wrap a loaded store with a configured registry.
    pub fn with_registry(store: ResourceStore, registry: MaterialFxRegistry) -> Self {
        Self {
            store,
            registry,
            batcher: RenderBatcher::new(),
            device_scene: None,
            acceleration: None,
        }
    }

    /// Host data.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Material effects.
    pub fn registry(&self) -> &MaterialFxRegistry {
        &self.registry
    }

    /// Draw batcher.
    pub fn batcher(&self) -> &RenderBatcher {
        &self.batcher
    }

    /// Device handles, once uploaded.
    pub fn device_scene(&self) -> Option<&DeviceScene> {
        self.device_scene.as_ref()
    }

    /// Acceleration structures, once built.
    pub fn acceleration(&self) -> Option<&AccelerationState> {
        self.acceleration.as_ref()
    }

    /// Whether the scene is on the device.
    pub fn is_uploaded(&self) -> bool {
        self.device_scene.is_some()
    }

    /// Upload the scene, set up material effects, and optionally build the
    /// acceleration structures. Returns the descriptor writes of the scene
    /// set.
    ///
    /// Calling it again before [`release`](Self::release) allocates nothing
    /// and returns the existing writes. On failure every handle created by
    /// the call is destroyed and host data is kept.
    pub fn upload_to_device(
        &mut self,
        device: &dyn GpuDevice,
        options: &UploadOptions,
    ) -> GraphicsResult<Vec<DescriptorWrite>> {
        if self.is_uploaded() {
            log::warn!("Scene already uploaded; release it before uploading again");
            return Ok(self.descriptor_writes());
        }

        let transfer = options.with_release_host_data(false);
        let mut scene = upload_to_device(&mut self.store, device, &transfer)?;
        if let Err(error) = self.prepare(device, &scene, options) {
            self.registry.release(device);
            if let Some(mut acceleration) = self.acceleration.take() {
                acceleration.destroy(device);
            }
            scene.destroy(device);
            return Err(error);
        }
        self.device_scene = Some(scene);

        if options.release_host_data {
            self.store.release_host_data();
        }
        Ok(self.descriptor_writes())
    }

    fn prepare(
        &mut self,
        device: &dyn GpuDevice,
        scene: &DeviceScene,
        options: &UploadOptions,
    ) -> GraphicsResult<()> {
        self.registry.setup(&self.store, device)?;
        self.registry.push_proxies(device, self.store.proxies())?;
        if options.build_acceleration_structures {
            self.acceleration = Some(build_acceleration_structures(
                &self.store,
                scene,
                device,
            )?);
        }
        Ok(())
    }

    /// Build the acceleration structures of an uploaded scene. Does nothing
    /// if they were already built.
    pub fn build_acceleration_structures(&mut self, device: &dyn GpuDevice) -> GraphicsResult<()> {
        if self.acceleration.is_some() {
            return Ok(());
        }
        let scene = self.device_scene.as_ref().ok_or_else(|| {
            GraphicsError::InvalidParameter("scene is not uploaded".to_string())
        })?;
        self.acceleration = Some(build_acceleration_structures(&self.store, scene, device)?);
        Ok(())
    }

    /// Descriptor writes for every resource currently on the device.
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        let mut writes = self
            .device_scene
            .as_ref()
            .map(DeviceScene::descriptor_writes)
            .unwrap_or_default();
        writes.extend(self.registry.descriptor_writes());
        writes.extend(self.batcher.descriptor_writes());
        if let Some(fx) = self.registry.ray_tracing_fx() {
            writes.extend(fx.descriptor_writes());
        }
        writes
    }

    /// Attach a ray-tracing effect using the scene's acceleration structures
    /// and return its descriptor writes. From then on frames only update the
    /// uniforms.
    pub fn set_ray_tracing_fx(
        &mut self,
        pipeline: Option<PipelineHandle>,
    ) -> GraphicsResult<Vec<DescriptorWrite>> {
        let fx = self
            .acceleration
            .as_ref()
            .and_then(|acceleration| acceleration.ray_tracing_fx(pipeline))
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(
                    "ray tracing needs built acceleration structures".to_string(),
                )
            })?;
        Ok(self.registry.set_ray_tracing_fx(fx))
    }

    /// Write the frame uniforms and, unless ray tracing, record the frame's
    /// draws.
    pub fn render_frame(
        &mut self,
        device: &dyn GpuDevice,
        camera: &Camera,
        elapsed: f32,
        encoder: &mut dyn RenderEncoder,
    ) -> GraphicsResult<FrameStats> {
        let scene = self.device_scene.as_ref().ok_or_else(|| {
            GraphicsError::InvalidParameter("scene is not uploaded".to_string())
        })?;
        let ray_tracing = self.registry.ray_tracing_fx().is_some();
        self.batcher
            .write_frame_uniforms(device, camera, elapsed, ray_tracing)?;
        if ray_tracing {
            return Ok(FrameStats::default());
        }
        self.batcher.classify(&self.store, &self.registry, camera);
        Ok(self.batcher.draw(
            &self.store,
            &self.registry,
            scene,
            self.acceleration.as_ref(),
            encoder,
        ))
    }

    /// Destroy every device handle. The scene can be uploaded again if host
    /// data was kept.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        if let Some(mut acceleration) = self.acceleration.take() {
            acceleration.destroy(device);
        }
        self.registry.release(device);
        self.batcher.release(device);
        if let Some(mut scene) = self.device_scene.take() {
            scene.destroy(device);
        }
        log::debug!("Released scene device resources");
    }
}
