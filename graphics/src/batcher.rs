//! Per-frame classification, sorting, and draw submission.
//!
//! Every frame the batcher:
//! 1. writes [`FrameUniforms`] for the camera,
//! 2. bins every submesh with a material by (alpha mode, model, state) and
//!    pipeline variant, so each bin maps to exactly one pipeline,
//! 3. sorts each bin by the depth proxy along the viewing direction,
//!    opaque and masked front-to-back, blended back-to-front,
//! 4. issues one draw per submesh, bins in alpha-mode order.
//!
//! With a ray-tracing effect attached only the uniforms are written, with the
//! view and projection inverted for ray generation.

use std::collections::BTreeMap;

use aster_core::ResourceStore;
use aster_core::material::{AlphaMode, MaterialModel, MaterialState};
use aster_core::mesh::SubmeshId;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::acceleration::AccelerationState;
use crate::backend::{GpuDevice, RenderEncoder};
use crate::error::GraphicsResult;
use crate::material_fx::{FxKey, MaterialFxRegistry};
use crate::scene::bindings;
use crate::types::{BufferDescriptor, BufferHandle, BufferUsage, DescriptorType, DescriptorWrite};
use crate::upload::DeviceScene;

/// Camera state for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// View matrix (world to view).
    pub view: Mat4,
    /// Projection matrix.
    pub projection: Mat4,
    /// World-space position.
    pub position: Vec3,
    /// Unit viewing direction in world space.
    pub forward: Vec3,
    /// Target size in pixels.
    pub viewport: (u32, u32),
}

impl Camera {
    /// Build a camera from view and projection matrices.
    pub fn new(view: Mat4, projection: Mat4, viewport: (u32, u32)) -> Self {
        let world = view.inverse();
        Self {
            view,
            projection,
            position: world.w_axis.truncate(),
            forward: (-world.z_axis.truncate()).normalize_or_zero(),
            viewport,
        }
    }

    /// Right-handed perspective camera looking from `eye` at `target`.
    pub fn look_at(
        eye: Vec3,
        target: Vec3,
        up: Vec3,
        fov_y: f32,
        viewport: (u32, u32),
        near: f32,
        far: f32,
    ) -> Self {
        let aspect = viewport.0.max(1) as f32 / viewport.1.max(1) as f32;
        Self::new(
            Mat4::look_at_rh(eye, target, up),
            Mat4::perspective_rh(fov_y, aspect, near, far),
            viewport,
        )
    }

    /// Signed distance of a point along the viewing direction.
    pub fn depth(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.forward)
    }
}

/// Per-frame uniform block bound at [`bindings::FRAME_UNIFORMS`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// View matrix, inverted when ray tracing.
    pub view: Mat4,
    /// Projection matrix, inverted when ray tracing.
    pub projection: Mat4,
    /// Projection times view, inverted when ray tracing.
    pub view_projection: Mat4,
    /// Camera position; `w` holds the elapsed time in seconds.
    pub camera_position: [f32; 4],
    /// Width, height, and their reciprocals.
    pub viewport: [f32; 4],
}

impl FrameUniforms {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Uniforms for a camera; `inverted` stores the inverse matrices.
    pub fn new(camera: &Camera, elapsed: f32, inverted: bool) -> Self {
        let view_projection = camera.projection * camera.view;
        let (view, projection, view_projection) = if inverted {
            (
                camera.view.inverse(),
                camera.projection.inverse(),
                view_projection.inverse(),
            )
        } else {
            (camera.view, camera.projection, view_projection)
        };
        let width = camera.viewport.0.max(1) as f32;
        let height = camera.viewport.1.max(1) as f32;
        Self {
            view,
            projection,
            view_projection,
            camera_position: camera.position.extend(elapsed).to_array(),
            viewport: [width, height, 1.0 / width, 1.0 / height],
        }
    }
}

/// Push constants of one draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawConstants {
    /// Index into the transform buffer.
    pub transform_index: u32,
    /// Index into the material proxy buffer.
    pub material_index: u32,
    /// Index into the ray-tracing instance buffer, or [`u32::MAX`].
    pub instance_index: u32,
    /// Padding.
    pub _pad: u32,
}

impl DrawConstants {
    /// Size in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Key of a draw bin. Ordering puts opaque bins first and blended bins last.
///
/// Submeshes sharing a material state but differing in vertex layout or
/// topology use different pipeline variants and land in different bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinKey {
    /// Alpha mode.
    pub alpha_mode: AlphaMode,
    /// Material model.
    pub model: MaterialModel,
    /// Full material state.
    pub state: MaterialState,
    /// Pipeline variant within the model's effect.
    pub variant: usize,
}

/// One classified submesh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawItem {
    /// Submesh drawn.
    pub submesh: SubmeshId,
    /// Effect key selecting the pipeline.
    pub fx: FxKey,
    /// Depth proxy along the viewing direction.
    pub depth: f32,
}

/// Submeshes sharing a bin key, in draw order.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    /// Bin key.
    pub key: BinKey,
    /// Items in draw order.
    pub items: Vec<DrawItem>,
}

/// Counters of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Non-empty bins.
    pub bins: usize,
    /// Draw calls issued.
    pub draws: usize,
    /// Pipeline binds issued.
    pub pipeline_binds: usize,
    /// Classified submeshes skipped for lack of a pipeline or buffers.
    pub skipped: usize,
}

/// Forward renderer draw organizer.
#[derive(Debug, Default)]
pub struct RenderBatcher {
    bins: Vec<Bin>,
    uniform_buffer: Option<BufferHandle>,
}

impl RenderBatcher {
    /// Create an empty batcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bins of the last classification, in draw order.
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Uniform buffer, once written.
    pub fn uniform_buffer(&self) -> Option<BufferHandle> {
        self.uniform_buffer
    }

    /// Descriptor write binding the uniform buffer.
    pub fn descriptor_writes(&self) -> Vec<DescriptorWrite> {
        self.uniform_buffer
            .map(|buffer| {
                DescriptorWrite::buffer(
                    bindings::FRAME_UNIFORMS,
                    DescriptorType::UniformBuffer,
                    buffer,
                    FrameUniforms::SIZE,
                )
            })
            .into_iter()
            .collect()
    }

    /// Write the frame uniforms, creating the buffer on first use.
    pub fn write_frame_uniforms(
        &mut self,
        device: &dyn GpuDevice,
        camera: &Camera,
        elapsed: f32,
        ray_tracing: bool,
    ) -> GraphicsResult<FrameUniforms> {
        let uniforms = FrameUniforms::new(camera, elapsed, ray_tracing);
        let buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = device.create_buffer(
                    &BufferDescriptor::host_visible(FrameUniforms::SIZE, BufferUsage::UNIFORM)
                        .with_label("frame uniforms"),
                )?;
                self.uniform_buffer = Some(buffer);
                buffer
            }
        };
        device.write_buffer(buffer, 0, bytemuck::bytes_of(&uniforms))?;
        Ok(uniforms)
    }

    /// Rebuild the bins for this frame's camera.
    pub fn classify(&mut self, store: &ResourceStore, registry: &MaterialFxRegistry, camera: &Camera) {
        let mut bins: BTreeMap<BinKey, Vec<DrawItem>> = BTreeMap::new();
        for id in store.submesh_ids() {
            let Some(material) = store.submesh(id).material else {
                continue;
            };
            let Some(fx) = registry.fx_key(id) else {
                continue;
            };
            let material = store.material_ref(material);
            let key = BinKey {
                alpha_mode: material.state.alpha_mode,
                model: material.model,
                state: material.state,
                variant: fx.variant,
            };
            bins.entry(key).or_default().push(DrawItem {
                submesh: id,
                fx,
                depth: camera.depth(store.submesh_world_center(id)),
            });
        }

        self.bins = bins
            .into_iter()
            .map(|(key, mut items)| {
                if key.alpha_mode == AlphaMode::Blend {
                    items.sort_by(|a, b| {
                        b.depth
                            .partial_cmp(&a.depth)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                } else {
                    items.sort_by(|a, b| {
                        a.depth
                            .partial_cmp(&b.depth)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                Bin { key, items }
            })
            .collect();
    }

    /// Record the draws of the current bins.
    pub fn draw(
        &self,
        store: &ResourceStore,
        registry: &MaterialFxRegistry,
        scene: &DeviceScene,
        acceleration: Option<&AccelerationState>,
        encoder: &mut dyn RenderEncoder,
    ) -> FrameStats {
        let mut stats = FrameStats {
            bins: self.bins.len(),
            ..Default::default()
        };
        let Some(vertex_buffer) = scene.vertex_buffer() else {
            stats.skipped = self.bins.iter().map(|bin| bin.items.len()).sum();
            return stats;
        };

        for bin in &self.bins {
            let mut bound = None;
            for item in &bin.items {
                let submesh = store.submesh(item.submesh);
                let (Some(pipeline), Some((vertex_offset, index_offset))) = (
                    registry.pipeline(item.fx),
                    store.submesh_buffer_offsets(item.submesh),
                ) else {
                    stats.skipped += 1;
                    continue;
                };
                let index_buffer = scene.index_buffer().filter(|_| submesh.draw.is_indexed());
                if submesh.draw.is_indexed() && index_buffer.is_none() {
                    stats.skipped += 1;
                    continue;
                }

                if bound != Some(pipeline) {
                    encoder.bind_pipeline(pipeline);
                    bound = Some(pipeline);
                    stats.pipeline_binds += 1;
                }

                let mesh = store.mesh(submesh.mesh);
                let constants = DrawConstants {
                    transform_index: mesh.transform as u32,
                    material_index: submesh
                        .material
                        .map(|material| store.material_ref(material).proxy as u32)
                        .unwrap_or_default(),
                    instance_index: acceleration
                        .and_then(|state| state.instance_index(item.submesh))
                        .unwrap_or(u32::MAX),
                    _pad: 0,
                };
                encoder.bind_vertex_buffer(vertex_buffer, vertex_offset);
                encoder.push_constants(bytemuck::bytes_of(&constants));
                match index_buffer {
                    Some(index_buffer) => {
                        encoder.bind_index_buffer(index_buffer, index_offset, mesh.index_format);
                        encoder.draw_indexed(submesh.draw.index_count, 0, 0);
                    }
                    None => encoder.draw(submesh.draw.vertex_count, 0),
                }
                stats.draws += 1;
            }
        }
        log::trace!(
            "Frame: {} bins, {} draws, {} pipeline binds",
            stats.bins,
            stats.draws,
            stats.pipeline_binds
        );
        stats
    }

    /// Destroy the uniform buffer and forget the bins.
    pub fn release(&mut self, device: &dyn GpuDevice) {
        if let Some(buffer) = self.uniform_buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.bins.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_camera_depth() {
        let camera = Camera::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::ZERO,
            Vec3::Y,
            1.0,
            (800, 600),
            0.1,
            100.0,
        );
        assert!((camera.forward - Vec3::NEG_Z).length() < 1e-5);
        assert!((camera.depth(Vec3::ZERO) - 5.0).abs() < 1e-4);
        assert!(camera.depth(Vec3::new(0.0, 0.0, 10.0)) < 0.0);
    }

    #[test]
    fn test_bin_key_order() {
        let key = |alpha_mode| BinKey {
            alpha_mode,
            model: MaterialModel::PbrMetallicRoughness,
            state: MaterialState::new(alpha_mode, false),
            variant: 0,
        };
        let unlit = BinKey {
            model: MaterialModel::Unlit,
            ..key(AlphaMode::Opaque)
        };
        let mut keys = vec![key(AlphaMode::Blend), unlit, key(AlphaMode::Mask), key(AlphaMode::Opaque)];
        keys.sort();
        assert_eq!(keys[0], key(AlphaMode::Opaque));
        assert_eq!(keys[1], unlit);
        assert_eq!(keys[2].alpha_mode, AlphaMode::Mask);
        assert_eq!(keys[3].alpha_mode, AlphaMode::Blend);
    }

    #[test]
    fn test_frame_uniforms_inverted() {
        let camera = Camera::look_at(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::ZERO,
            Vec3::Y,
            0.8,
            (640, 480),
            0.1,
            50.0,
        );
        let raster = FrameUniforms::new(&camera, 2.5, false);
        let traced = FrameUniforms::new(&camera, 2.5, true);
        assert_eq!(raster.camera_position[3], 2.5);
        assert_eq!(raster.viewport[0], 640.0);
        assert!((traced.view * raster.view).abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert!((traced.projection * raster.projection).abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_uniform_buffer_created_once() {
        let device = DummyDevice::new();
        let mut batcher = RenderBatcher::new();
        let camera = Camera::new(Mat4::IDENTITY, Mat4::IDENTITY, (1, 1));
        batcher.write_frame_uniforms(&device, &camera, 0.0, false).unwrap();
        batcher.write_frame_uniforms(&device, &camera, 0.1, false).unwrap();
        assert_eq!(device.live_buffers(), 1);
        assert_eq!(device.host_write_count(), 2);
        let contents = device.buffer_contents(batcher.uniform_buffer().unwrap()).unwrap();
        assert_eq!(contents.len() as u64, FrameUniforms::SIZE);
        assert_eq!(batcher.descriptor_writes()[0].binding, bindings::FRAME_UNIFORMS);
    }
}
