//! Material effects: one pipeline family per material model.
//!
//! The registry is a closed table indexed by [`MaterialModel`]. Each
//! [`MaterialFx`] owns the shaders of its model and the pipeline variants
//! created for it. A variant is keyed by the material state together with the
//! vertex layout and topology of the submeshes using it, since passthrough
//! layouts and non-triangle topologies need their own pipeline objects.
//!
//! The registry also owns the storage buffer holding every
//! [`MaterialProxy`], and the optional ray-tracing effect.

use std::collections::HashMap;
use std::sync::Arc;

use aster_core::ResourceStore;
use aster_core::material::{AlphaMode, MaterialModel, MaterialProxy, MaterialState};
use aster_core::mesh::{PrimitiveTopology, SubmeshId, VertexLayout};

use crate::backend::GpuDevice;
use crate::error::GraphicsResult;
use crate::scene::bindings;
use crate::types::{
    AccelerationStructureHandle, BufferDescriptor, BufferHandle, BufferUsage, DescriptorType,
    DescriptorWrite, PipelineDescriptor, PipelineHandle, ShaderSource, TextureFormat,
};

/// Identifies one pipeline variant of one effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FxKey {
    /// Effect (material model).
    pub model: MaterialModel,
    /// Variant index within the effect.
    pub variant: usize,
}

/// Fixed-function inputs that select a pipeline variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineVariant {
    /// Blending and culling.
    pub state: MaterialState,
    /// Vertex input layout.
    pub layout: Arc<VertexLayout>,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
}

/// Attachment formats every effect pipeline renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetFormats {
    /// Color attachment format.
    pub color: TextureFormat,
    /// Depth attachment format.
    pub depth: Option<TextureFormat>,
}

impl Default for RenderTargetFormats {
    fn default() -> Self {
        Self {
            color: TextureFormat::Bgra8UnormSrgb,
            depth: Some(TextureFormat::Depth32Float),
        }
    }
}

/// Pipelines of one material model.
#[derive(Debug)]
pub struct MaterialFx {
    model: MaterialModel,
    shaders: ShaderSource,
    variants: Vec<PipelineVariant>,
    pipelines: Vec<Option<PipelineHandle>>,
    lookup: HashMap<PipelineVariant, usize>,
}

impl MaterialFx {
    /// Create an effect with no variants.
    pub fn new(model: MaterialModel, shaders: ShaderSource) -> Self {
        Self {
            model,
            shaders,
            variants: Vec::new(),
            pipelines: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Material model this effect renders.
    pub fn model(&self) -> MaterialModel {
        self.model
    }

    /// Register a variant, returning its index. Registering the same variant
    /// twice returns the existing index.
    pub fn register(&mut self, variant: PipelineVariant) -> usize {
        if let Some(&index) = self.lookup.get(&variant) {
            return index;
        }
        let index = self.variants.len();
        self.lookup.insert(variant.clone(), index);
        self.variants.push(variant);
        self.pipelines.push(None);
        index
    }

    /// Create pipelines for every registered variant that has none yet.
    ///
    /// Returns the number of pipelines created.
    pub fn materialize(
        &mut self,
        device: &dyn GpuDevice,
        targets: RenderTargetFormats,
        push_constant_size: u32,
    ) -> GraphicsResult<usize> {
        let mut created = 0;
        for (index, variant) in self.variants.iter().enumerate() {
            if self.pipelines[index].is_some() {
                continue;
            }
            let descriptor = PipelineDescriptor {
                label: Some(format!("{:?}#{}", self.model, index)),
                shaders: self.shaders.clone(),
                vertex_layout: variant.layout.clone(),
                topology: variant.topology,
                state: variant.state,
                push_constant_size,
                color_format: targets.color,
                depth_format: targets.depth,
            };
            let pipeline = device.create_pipeline(&descriptor)?;
            log::debug!(
                "Created {:?} pipeline variant {} ({:?}, stride {})",
                self.model,
                index,
                variant.state,
                variant.layout.stride
            );
            self.pipelines[index] = Some(pipeline);
            created += 1;
        }
        Ok(created)
    }

    /// Pipeline of a variant, once materialized.
    pub fn pipeline(&self, variant: usize) -> Option<PipelineHandle> {
        self.pipelines.get(variant).copied().flatten()
    }

    /// Fixed-function inputs of a variant.
    pub fn variant(&self, variant: usize) -> Option<&PipelineVariant> {
        self.variants.get(variant)
    }

    /// Number of registered variants.
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    /// Destroy every pipeline; registered variants stay and can be
    /// materialized again.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        for pipeline in self.pipelines.iter_mut() {
            if let Some(pipeline) = pipeline.take() {
                device.destroy_pipeline(pipeline);
            }
        }
    }
}

/// Ray-tracing effect bound to the scene's acceleration structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RayTracingFx {
    /// Ray-tracing pipeline created by the caller, if any.
    pub pipeline: Option<PipelineHandle>,
    /// Top-level structure traced against.
    pub tlas: AccelerationStructureHandle,
    /// Buffer of per-instance records.
    pub instance_buffer: BufferHandle,
    /// Size of the instance buffer in bytes.
    pub instance_buffer_size: u64,
}

impl RayTracingFx {
    /// Descriptor writes binding the TLAS and the instance records.
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        vec![
            DescriptorWrite::acceleration_structure(bindings::TLAS, self.tlas),
            DescriptorWrite::buffer(
                bindings::INSTANCES,
                DescriptorType::StorageBuffer,
                self.instance_buffer,
                self.instance_buffer_size,
            ),
        ]
    }
}

/// Closed table of material effects plus the material proxy buffer.
#[derive(Debug)]
pub struct MaterialFxRegistry {
    effects: Vec<MaterialFx>,
    targets: RenderTargetFormats,
    push_constant_size: u32,
    submesh_keys: Vec<Option<FxKey>>,
    proxy_buffer: Option<(BufferHandle, u64)>,
    ray_tracing: Option<RayTracingFx>,
}

impl MaterialFxRegistry {
    /// Create a registry with one effect per model. `shaders` is indexed by
    /// [`MaterialModel::index`].
    pub fn new(shaders: [ShaderSource; MaterialModel::COUNT]) -> Self {
        let effects = MaterialModel::ALL
            .into_iter()
            .zip(shaders)
            .map(|(model, shaders)| MaterialFx::new(model, shaders))
            .collect();
        Self {
            effects,
            targets: RenderTargetFormats::default(),
            push_constant_size: crate::batcher::DrawConstants::SIZE,
            submesh_keys: Vec::new(),
            proxy_buffer: None,
            ray_tracing: None,
        }
    }

    /// Override the attachment formats pipelines are created for.
    pub fn with_render_targets(mut self, targets: RenderTargetFormats) -> Self {
        self.targets = targets;
        self
    }

    /// Effect of a material model.
    pub fn effect(&self, model: MaterialModel) -> &MaterialFx {
        &self.effects[model.index()]
    }

    /// Register the variant of every submesh that has a material, then
    /// create the pipelines not built yet.
    ///
    /// Returns the number of pipelines created by this call.
    pub fn setup(&mut self, store: &ResourceStore, device: &dyn GpuDevice) -> GraphicsResult<usize> {
        self.submesh_keys = store
            .submeshes()
            .iter()
            .map(|submesh| {
                let material = store.material_ref(submesh.material?);
                let variant = PipelineVariant {
                    state: material.state,
                    layout: submesh.draw.layout.clone(),
                    topology: submesh.draw.topology,
                };
                let effect = &mut self.effects[material.model.index()];
                Some(FxKey {
                    model: material.model,
                    variant: effect.register(variant),
                })
            })
            .collect();

        let mut created = 0;
        for effect in &mut self.effects {
            created += effect.materialize(device, self.targets, self.push_constant_size)?;
        }
        log::info!(
            "Material effects ready: {} pipelines created, {} variants total",
            created,
            self.effects
                .iter()
                .map(MaterialFx::variant_count)
                .sum::<usize>()
        );
        Ok(created)
    }

    /// Effect key of a submesh; `None` for submeshes without a material.
    pub fn fx_key(&self, submesh: SubmeshId) -> Option<FxKey> {
        self.submesh_keys.get(submesh.index()).copied().flatten()
    }

    /// Pipeline of an effect key.
    pub fn pipeline(&self, key: FxKey) -> Option<PipelineHandle> {
        self.effects[key.model.index()].pipeline(key.variant)
    }

    /// Alpha mode of an effect key.
    pub fn alpha_mode(&self, key: FxKey) -> AlphaMode {
        self.effects[key.model.index()]
            .variant(key.variant)
            .map(|variant| variant.state.alpha_mode)
            .unwrap_or_default()
    }

    /// Write the proxy array into the material storage buffer.
    ///
    /// The buffer is re-created only when the array size changed.
    pub fn push_proxies(
        &mut self,
        device: &dyn GpuDevice,
        proxies: &[MaterialProxy],
    ) -> GraphicsResult<Option<BufferHandle>> {
        let bytes: &[u8] = bytemuck::cast_slice(proxies);
        let size = bytes.len() as u64;
        if let Some((buffer, current)) = self.proxy_buffer {
            if current == size {
                device.write_buffer(buffer, 0, bytes)?;
                return Ok(Some(buffer));
            }
            device.destroy_buffer(buffer);
            self.proxy_buffer = None;
        }
        if size == 0 {
            return Ok(None);
        }
        let buffer = device.create_buffer(
            &BufferDescriptor::host_visible(size, BufferUsage::STORAGE)
                .with_label("material proxies"),
        )?;
        if let Err(error) = device.write_buffer(buffer, 0, bytes) {
            device.destroy_buffer(buffer);
            return Err(error);
        }
        self.proxy_buffer = Some((buffer, size));
        log::debug!("Material proxy buffer: {} proxies", proxies.len());
        Ok(Some(buffer))
    }

    /// Material proxy buffer, once pushed.
    pub fn proxy_buffer(&self) -> Option<BufferHandle> {
        self.proxy_buffer.map(|(buffer, _)| buffer)
    }

    /// Descriptor write binding the proxy buffer.
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.proxy_buffer
            .map(|(buffer, size)| {
                DescriptorWrite::buffer(
                    bindings::MATERIALS,
                    DescriptorType::StorageBuffer,
                    buffer,
                    size,
                )
            })
            .into_iter()
            .collect()
    }

    /// Attach a ray-tracing effect, returning its descriptor writes.
    pub fn set_ray_tracing_fx(&mut self, fx: RayTracingFx) -> Vec<DescriptorWrite> {
        let writes = fx.descriptor_writes();
        self.ray_tracing = Some(fx);
        writes
    }

    /// Attached ray-tracing effect.
    pub fn ray_tracing_fx(&self) -> Option<&RayTracingFx> {
        self.ray_tracing.as_ref()
    }

    /// Destroy pipelines and the proxy buffer, and detach the ray-tracing
    /// effect. The caller owns the ray-tracing pipeline.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        for effect in &mut self.effects {
            effect.release(device);
        }
        if let Some((buffer, _)) = self.proxy_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.submesh_keys.clear();
        self.ray_tracing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    fn variant(alpha_mode: AlphaMode, stride: u32) -> PipelineVariant {
        PipelineVariant {
            state: MaterialState::new(alpha_mode, false),
            layout: Arc::new(VertexLayout::new(stride)),
            topology: PrimitiveTopology::TriangleList,
        }
    }

    #[test]
    fn test_register_deduplicates() {
        let mut fx = MaterialFx::new(MaterialModel::Unlit, ShaderSource::default());
        let a = fx.register(variant(AlphaMode::Opaque, 12));
        let b = fx.register(variant(AlphaMode::Blend, 12));
        let c = fx.register(variant(AlphaMode::Opaque, 12));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(fx.variant_count(), 2);
    }

    #[test]
    fn test_materialize_only_new_variants() {
        let device = DummyDevice::new();
        let mut fx = MaterialFx::new(MaterialModel::PbrMetallicRoughness, ShaderSource::default());
        fx.register(variant(AlphaMode::Opaque, 12));
        let targets = RenderTargetFormats::default();
        assert_eq!(fx.materialize(&device, targets, 16).unwrap(), 1);
        assert_eq!(fx.materialize(&device, targets, 16).unwrap(), 0);
        fx.register(variant(AlphaMode::Mask, 12));
        assert_eq!(fx.materialize(&device, targets, 16).unwrap(), 1);
        assert_eq!(device.live_pipelines(), 2);

        fx.release(&device);
        assert_eq!(device.live_pipelines(), 0);
        assert!(fx.pipeline(0).is_none());
    }

    #[test]
    fn test_push_proxies_recreates_on_resize() {
        let device = DummyDevice::new();
        let mut registry = MaterialFxRegistry::new(Default::default());
        let proxies = vec![MaterialProxy::with_defaults(0); 2];

        let first = registry.push_proxies(&device, &proxies).unwrap();
        let second = registry.push_proxies(&device, &proxies).unwrap();
        assert_eq!(first, second);
        assert_eq!(device.live_buffers(), 1);

        let third = registry.push_proxies(&device, &proxies[..1]).unwrap();
        assert_ne!(first, third);
        assert_eq!(device.live_buffers(), 1);
        let buffer = third.unwrap();
        assert_eq!(
            device.buffer_descriptor(buffer).unwrap().size,
            MaterialProxy::SIZE
        );
        assert_eq!(registry.descriptor_writes()[0].binding, bindings::MATERIALS);
    }

    #[test]
    fn test_ray_tracing_fx_writes() {
        let mut registry = MaterialFxRegistry::new(Default::default());
        let writes = registry.set_ray_tracing_fx(RayTracingFx {
            pipeline: None,
            tlas: AccelerationStructureHandle(7),
            instance_buffer: BufferHandle(8),
            instance_buffer_size: 48,
        });
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].ty, DescriptorType::AccelerationStructure);
        assert_eq!(writes[1].buffer_infos[0].range, 48);
        assert!(registry.ray_tracing_fx().is_some());
    }
}
