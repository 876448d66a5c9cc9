//! The host resource store.
//!
//! [`ResourceStore`] owns every host-side entity of one scene in flat arrays.
//! Cross references are indices: submeshes point at their mesh by [`MeshId`]
//! and at their material by [`MaterialRefId`], meshes point at their world
//! transform by index.
//!
//! Before upload, [`ResourceStore::compute_buffer_layout`] assigns each mesh a
//! [`BufferRegion`] in the shared vertex and index buffers in one
//! deterministic pass over the meshes.

use std::fmt;

use glam::{Mat4, Vec3};

use crate::error::LayoutError;
use crate::material::{MaterialModel, MaterialProxy, MaterialRef, MaterialRefId, MaterialState};
use crate::mesh::{BufferRegion, DrawDescriptor, Mesh, MeshId, Submesh, SubmeshId};
use crate::sampler::SamplerDesc;
use crate::skeleton::Skeleton;
use crate::texture::{DefaultTexture, HostImage, HostTexture};

/// Alignment of each mesh's vertex region in the shared vertex buffer.
pub const VERTEX_REGION_ALIGNMENT: u64 = 4;
/// Alignment of each mesh's index region in the shared index buffer.
pub const INDEX_REGION_ALIGNMENT: u64 = 4;

/// Round `value` up to a multiple of `alignment` (a power of two).
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Byte totals computed by [`ResourceStore::compute_buffer_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferLayout {
    /// Size of the shared vertex buffer, padding included.
    pub vertex_buffer_size: u64,
    /// Size of the shared index buffer, padding included.
    pub index_buffer_size: u64,
    /// Size of the transform buffer (one `Mat4` per transform).
    pub transform_buffer_size: u64,
    /// Total RGBA8 bytes across all images, defaults included.
    pub image_bytes: u64,
}

/// Entity counts and byte totals, logged after a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SceneStats {
    /// Mesh instances.
    pub meshes: usize,
    /// Submeshes.
    pub submeshes: usize,
    /// Submeshes with a material reference.
    pub drawable_submeshes: usize,
    /// Material references.
    pub materials: usize,
    /// Textures, defaults included.
    pub textures: usize,
    /// Images, defaults included.
    pub images: usize,
    /// Samplers.
    pub samplers: usize,
    /// Skeletons.
    pub skeletons: usize,
    /// Animation clips across all skeletons.
    pub animations: usize,
    /// Unpadded vertex bytes.
    pub vertex_bytes: u64,
    /// Unpadded index bytes.
    pub index_bytes: u64,
    /// RGBA8 image bytes.
    pub image_bytes: u64,
}

impl fmt::Display for SceneStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} meshes, {} submeshes ({} drawable), {} materials, {} textures, {} images, \
             {} samplers, {} skeletons, {} animations, {} vertex bytes, {} index bytes, \
             {} image bytes",
            self.meshes,
            self.submeshes,
            self.drawable_submeshes,
            self.materials,
            self.textures,
            self.images,
            self.samplers,
            self.skeletons,
            self.animations,
            self.vertex_bytes,
            self.index_bytes,
            self.image_bytes,
        )
    }
}

/// Host-side scene: images, samplers, textures, materials, meshes,
/// transforms and skeletons.
#[derive(Debug, Default)]
pub struct ResourceStore {
    images: Vec<HostImage>,
    samplers: Vec<SamplerDesc>,
    textures: Vec<HostTexture>,
    first_default_texture: Option<usize>,
    proxies: Vec<MaterialProxy>,
    material_refs: Vec<MaterialRef>,
    meshes: Vec<Mesh>,
    submeshes: Vec<Submesh>,
    transforms: Vec<Mat4>,
    skeletons: Vec<Skeleton>,
    layout: Option<BufferLayout>,
}

impl ResourceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // -- Building --

    /// Add an image and return its index.
    pub fn push_image(&mut self, image: HostImage) -> usize {
        self.images.push(image);
        self.images.len() - 1
    }

    /// Add a sampler and return its index.
    pub fn push_sampler(&mut self, sampler: SamplerDesc) -> usize {
        self.samplers.push(sampler);
        self.samplers.len() - 1
    }

    /// Add a scene texture and return its index.
    ///
    /// Scene textures must be added before
    /// [`append_default_textures`](Self::append_default_textures).
    pub fn push_texture(&mut self, texture: HostTexture) -> usize {
        debug_assert!(
            self.first_default_texture.is_none(),
            "scene textures must precede the default block"
        );
        self.textures.push(texture);
        self.textures.len() - 1
    }

    /// Append the [`DefaultTexture`] block after the scene textures and
    /// return the index of its first texture. Calling it again returns the
    /// same index without appending.
    pub fn append_default_textures(&mut self) -> u32 {
        if let Some(first) = self.first_default_texture {
            return first as u32;
        }
        let first = self.textures.len();
        for texture in DefaultTexture::ALL {
            let image = self.push_image(texture.image());
            self.textures.push(HostTexture {
                image,
                sampler: None,
            });
        }
        self.first_default_texture = Some(first);
        first as u32
    }

    /// Add a material and return its reference id.
    pub fn push_material(
        &mut self,
        name: Option<String>,
        model: MaterialModel,
        state: MaterialState,
        mut proxy: MaterialProxy,
    ) -> MaterialRefId {
        proxy.set_flags(model, state);
        self.proxies.push(proxy);
        self.material_refs.push(MaterialRef {
            name,
            model,
            state,
            proxy: self.proxies.len() - 1,
        });
        MaterialRefId((self.material_refs.len() - 1) as u32)
    }

    /// Add a world transform and return its index.
    pub fn push_transform(&mut self, transform: Mat4) -> usize {
        self.transforms.push(transform);
        self.transforms.len() - 1
    }

    /// Add a skeleton and return its index.
    pub fn push_skeleton(&mut self, skeleton: Skeleton) -> usize {
        self.skeletons.push(skeleton);
        self.skeletons.len() - 1
    }

    /// Add a mesh and return its id. Submeshes are attached with
    /// [`push_submesh`](Self::push_submesh).
    pub fn push_mesh(&mut self, mut mesh: Mesh) -> MeshId {
        mesh.submeshes.clear();
        mesh.region = None;
        self.meshes.push(mesh);
        self.layout = None;
        MeshId((self.meshes.len() - 1) as u32)
    }

    /// Attach a submesh to a mesh and return its id.
    pub fn push_submesh(
        &mut self,
        mesh: MeshId,
        material: Option<MaterialRefId>,
        draw: DrawDescriptor,
    ) -> SubmeshId {
        let id = SubmeshId(self.submeshes.len() as u32);
        self.submeshes.push(Submesh {
            mesh,
            material,
            draw,
        });
        self.meshes[mesh.index()].submeshes.push(id);
        id
    }

    // -- Access --

    /// All images, defaults included.
    pub fn images(&self) -> &[HostImage] {
        &self.images
    }

    /// All samplers.
    pub fn samplers(&self) -> &[SamplerDesc] {
        &self.samplers
    }

    /// All textures, defaults included.
    pub fn textures(&self) -> &[HostTexture] {
        &self.textures
    }

    /// Texture index of a built-in default, once the block is appended.
    pub fn default_texture_index(&self, texture: DefaultTexture) -> Option<u32> {
        self.first_default_texture
            .map(|first| (first + texture.offset()) as u32)
    }

    /// Material parameter blocks, in proxy order.
    pub fn proxies(&self) -> &[MaterialProxy] {
        &self.proxies
    }

    /// Material references.
    pub fn material_refs(&self) -> &[MaterialRef] {
        &self.material_refs
    }

    /// Look up a material reference.
    pub fn material_ref(&self, id: MaterialRefId) -> &MaterialRef {
        &self.material_refs[id.index()]
    }

    /// All meshes.
    pub fn meshes(&self) -> &[Mesh] {
        &self.meshes
    }

    /// Look up a mesh.
    pub fn mesh(&self, id: MeshId) -> &Mesh {
        &self.meshes[id.index()]
    }

    /// All submeshes.
    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    /// Look up a submesh.
    pub fn submesh(&self, id: SubmeshId) -> &Submesh {
        &self.submeshes[id.index()]
    }

    /// Submesh ids in order.
    pub fn submesh_ids(&self) -> impl Iterator<Item = SubmeshId> + '_ {
        (0..self.submeshes.len() as u32).map(SubmeshId)
    }

    /// World transforms.
    pub fn transforms(&self) -> &[Mat4] {
        &self.transforms
    }

    /// Skeletons.
    pub fn skeletons(&self) -> &[Skeleton] {
        &self.skeletons
    }

    /// Number of device images the upload creates.
    pub fn device_image_count(&self) -> usize {
        self.images.len()
    }

    /// World transform of a mesh.
    pub fn world_transform(&self, mesh: MeshId) -> Mat4 {
        self.transforms
            .get(self.mesh(mesh).transform)
            .copied()
            .unwrap_or(Mat4::IDENTITY)
    }

    /// World-space center of a submesh's bounds.
    pub fn submesh_world_center(&self, submesh: SubmeshId) -> Vec3 {
        let submesh = self.submesh(submesh);
        self.world_transform(submesh.mesh)
            .transform_point3(submesh.draw.bounds.center())
    }

    /// Absolute byte offsets of a submesh in the shared vertex and index
    /// buffers, once the layout has been computed.
    pub fn submesh_buffer_offsets(&self, submesh: SubmeshId) -> Option<(u64, u64)> {
        let submesh = self.submesh(submesh);
        let region = self.mesh(submesh.mesh).region?;
        Some((
            region.vertex_offset + submesh.draw.vertex_offset,
            region.index_offset + submesh.draw.index_offset,
        ))
    }

    // -- Layout --

    /// Assign every mesh its region in the shared buffers and return the
    /// byte totals.
    ///
    /// Regions follow mesh order. Vertex regions start on
    /// [`VERTEX_REGION_ALIGNMENT`], index regions on
    /// [`INDEX_REGION_ALIGNMENT`]; each region's size includes the padding
    /// up to the next region, so the totals are the sums of region sizes.
    pub fn compute_buffer_layout(&mut self) -> BufferLayout {
        let mut vertex_cursor = 0;
        let mut index_cursor = 0;

        for mesh in &mut self.meshes {
            let vertex_size = align_up(mesh.vertex_size(), VERTEX_REGION_ALIGNMENT);
            let index_size = align_up(mesh.index_size(), INDEX_REGION_ALIGNMENT);
            mesh.region = Some(BufferRegion {
                vertex_offset: vertex_cursor,
                vertex_size,
                index_offset: index_cursor,
                index_size,
            });
            vertex_cursor += vertex_size;
            index_cursor += index_size;
        }

        let layout = BufferLayout {
            vertex_buffer_size: vertex_cursor,
            index_buffer_size: index_cursor,
            transform_buffer_size: (self.transforms.len() * std::mem::size_of::<Mat4>()) as u64,
            image_bytes: self.images.iter().map(HostImage::byte_size).sum(),
        };

        log::debug!(
            "Buffer layout: {} vertex bytes, {} index bytes, {} transform bytes, {} image bytes",
            layout.vertex_buffer_size,
            layout.index_buffer_size,
            layout.transform_buffer_size,
            layout.image_bytes
        );

        self.layout = Some(layout);
        layout
    }

    /// The last computed layout, if still valid.
    pub fn buffer_layout(&self) -> Option<BufferLayout> {
        self.layout
    }

    /// Check that every submesh range lies within its mesh region and every
    /// region lies within the shared buffers without overlap.
    pub fn validate_layout(&self) -> Result<(), LayoutError> {
        let Some(layout) = self.layout else {
            return Err(LayoutError::Unassigned { mesh: 0 });
        };

        let mut previous: Option<(usize, BufferRegion)> = None;
        for (i, mesh) in self.meshes.iter().enumerate() {
            let region = mesh.region.ok_or(LayoutError::Unassigned { mesh: i })?;

            check_region(
                i,
                "vertex",
                region.vertex_offset,
                region.vertex_size,
                layout.vertex_buffer_size,
                VERTEX_REGION_ALIGNMENT,
            )?;
            check_region(
                i,
                "index",
                region.index_offset,
                region.index_size,
                layout.index_buffer_size,
                INDEX_REGION_ALIGNMENT,
            )?;

            if let Some((p, prev)) = previous {
                if prev.vertex_offset + prev.vertex_size > region.vertex_offset {
                    return Err(LayoutError::Overlap {
                        first: p,
                        second: i,
                        kind: "vertex",
                    });
                }
                if prev.index_offset + prev.index_size > region.index_offset {
                    return Err(LayoutError::Overlap {
                        first: p,
                        second: i,
                        kind: "index",
                    });
                }
            }
            previous = Some((i, region));

            for &id in &mesh.submeshes {
                let draw = &self.submesh(id).draw;
                let vertex_bytes = draw.vertex_bytes();
                if draw.vertex_offset + vertex_bytes > region.vertex_size {
                    return Err(LayoutError::SubmeshOutOfBounds {
                        submesh: id.index(),
                        kind: "vertex",
                        offset: draw.vertex_offset,
                        size: vertex_bytes,
                        region: region.vertex_size,
                    });
                }
                let index_bytes = draw.index_bytes(mesh.index_format);
                if draw.index_offset + index_bytes > region.index_size {
                    return Err(LayoutError::SubmeshOutOfBounds {
                        submesh: id.index(),
                        kind: "index",
                        offset: draw.index_offset,
                        size: index_bytes,
                        region: region.index_size,
                    });
                }
            }
        }
        Ok(())
    }

    // -- Lifetime --

    /// Drop host pixel, vertex and index arrays. Sizes and layout survive.
    pub fn release_host_data(&mut self) {
        for image in &mut self.images {
            image.release_pixels();
        }
        for mesh in &mut self.meshes {
            mesh.release_data();
        }
        log::debug!(
            "Released host copies of {} images and {} meshes",
            self.images.len(),
            self.meshes.len()
        );
    }

    /// Whether host arrays are still present.
    pub fn is_host_resident(&self) -> bool {
        self.images.iter().all(HostImage::is_resident)
            && self.meshes.iter().all(Mesh::is_resident)
    }

    /// Entity counts and byte totals.
    pub fn stats(&self) -> SceneStats {
        SceneStats {
            meshes: self.meshes.len(),
            submeshes: self.submeshes.len(),
            drawable_submeshes: self
                .submeshes
                .iter()
                .filter(|s| s.material.is_some())
                .count(),
            materials: self.material_refs.len(),
            textures: self.textures.len(),
            images: self.images.len(),
            samplers: self.samplers.len(),
            skeletons: self.skeletons.len(),
            animations: self.skeletons.iter().map(|s| s.animations.len()).sum(),
            vertex_bytes: self.meshes.iter().map(Mesh::vertex_size).sum(),
            index_bytes: self.meshes.iter().map(Mesh::index_size).sum(),
            image_bytes: self.images.iter().map(HostImage::byte_size).sum(),
        }
    }
}

fn check_region(
    mesh: usize,
    kind: &'static str,
    offset: u64,
    size: u64,
    total: u64,
    alignment: u64,
) -> Result<(), LayoutError> {
    if offset % alignment != 0 {
        return Err(LayoutError::Misaligned {
            mesh,
            kind,
            offset,
            alignment,
        });
    }
    if offset + size > total {
        return Err(LayoutError::RegionOutOfBounds {
            mesh,
            kind,
            offset,
            size,
            total,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::material::AlphaMode;
    use crate::mesh::{Aabb, IndexFormat, PrimitiveTopology, VertexLayout};

    fn draw(vertices: u32, indices: u32, vertex_offset: u64, index_offset: u64) -> DrawDescriptor {
        DrawDescriptor {
            layout: Arc::new(VertexLayout::canonical()),
            topology: PrimitiveTopology::TriangleList,
            vertex_count: vertices,
            index_count: indices,
            vertex_offset,
            index_offset,
            bounds: Aabb::default(),
        }
    }

    /// Two meshes: the first with 3 vertices and 3 u16 indices (6 bytes,
    /// needs padding), the second with 2 submeshes.
    fn two_mesh_store() -> ResourceStore {
        let mut store = ResourceStore::new();
        let t0 = store.push_transform(Mat4::IDENTITY);
        let t1 = store.push_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        let first = store.append_default_textures();
        let material = store.push_material(
            None,
            MaterialModel::PbrMetallicRoughness,
            MaterialState::default(),
            MaterialProxy::with_defaults(first),
        );

        let a = store.push_mesh(Mesh::new(
            Arc::from(vec![0u8; 3 * 88]),
            Arc::from(vec![0u8; 6]),
            IndexFormat::Uint16,
            t0,
        ));
        store.push_submesh(a, Some(material), draw(3, 3, 0, 0));

        let b = store.push_mesh(Mesh::new(
            Arc::from(vec![0u8; 7 * 88]),
            Arc::from(vec![0u8; 12 * 4]),
            IndexFormat::Uint32,
            t1,
        ));
        store.push_submesh(b, Some(material), draw(4, 6, 0, 0));
        store.push_submesh(b, None, draw(3, 6, 4 * 88, 24));
        store
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(6, 4), 8);
    }

    #[test]
    fn test_layout_sums_match_totals() {
        let mut store = two_mesh_store();
        let layout = store.compute_buffer_layout();

        let vertex_sum: u64 = store
            .meshes()
            .iter()
            .map(|m| m.region.unwrap().vertex_size)
            .sum();
        let index_sum: u64 = store
            .meshes()
            .iter()
            .map(|m| m.region.unwrap().index_size)
            .sum();
        assert_eq!(vertex_sum, layout.vertex_buffer_size);
        assert_eq!(store.stats().vertex_bytes, layout.vertex_buffer_size);
        assert_eq!(index_sum, layout.index_buffer_size);
        assert_eq!(layout.index_buffer_size, 8 + 48);
        assert_eq!(layout.transform_buffer_size, 128);
        assert_eq!(layout.image_bytes, 4 * DefaultTexture::COUNT as u64);
        assert_eq!(store.validate_layout(), Ok(()));
    }

    #[test]
    fn test_regions_are_aligned_and_ordered() {
        let mut store = two_mesh_store();
        store.compute_buffer_layout();
        let second = store.meshes()[1].region.unwrap();
        assert_eq!(second.vertex_offset, 3 * 88);
        assert_eq!(second.index_offset, 8);
        assert_eq!(
            store.submesh_buffer_offsets(SubmeshId(2)),
            Some((second.vertex_offset + 4 * 88, 8 + 24))
        );
    }

    #[test]
    fn test_validate_detects_submesh_overflow() {
        let mut store = two_mesh_store();
        let mesh = MeshId(0);
        store.push_submesh(mesh, None, draw(100, 0, 0, 0));
        store.compute_buffer_layout();
        assert!(matches!(
            store.validate_layout(),
            Err(LayoutError::SubmeshOutOfBounds { submesh: 3, kind: "vertex", .. })
        ));
    }

    #[test]
    fn test_validate_requires_layout() {
        let store = two_mesh_store();
        assert!(store.validate_layout().is_err());
    }

    #[test]
    fn test_default_textures_appended_once() {
        let mut store = ResourceStore::new();
        store.push_image(HostImage::solid([1, 2, 3, 4]));
        store.push_texture(HostTexture { image: 0, sampler: None });
        assert_eq!(store.append_default_textures(), 1);
        assert_eq!(store.append_default_textures(), 1);
        assert_eq!(store.device_image_count(), 1 + DefaultTexture::COUNT);
        assert_eq!(store.default_texture_index(DefaultTexture::Missing), Some(5));
    }

    #[test]
    fn test_material_flags_follow_state() {
        let mut store = ResourceStore::new();
        let id = store.push_material(
            Some("glass".into()),
            MaterialModel::PbrMetallicRoughness,
            MaterialState::new(AlphaMode::Blend, false),
            MaterialProxy::with_defaults(0),
        );
        let material = store.material_ref(id);
        assert_eq!(material.proxy, 0);
        assert_ne!(store.proxies()[0].flags, 0);
    }

    #[test]
    fn test_release_host_data() {
        let mut store = two_mesh_store();
        store.compute_buffer_layout();
        assert!(store.is_host_resident());
        store.release_host_data();
        assert!(!store.is_host_resident());
        assert_eq!(store.validate_layout(), Ok(()));
        assert_eq!(store.stats().vertex_bytes, 10 * 88);
    }

    #[test]
    fn test_world_center() {
        let store = two_mesh_store();
        assert_eq!(store.submesh_world_center(SubmeshId(1)), Vec3::new(0.0, 0.0, -5.0));
    }
}
