//! glTF 2.0 scene loading.
//!
//! [`SceneLoader`] turns a `.gltf` or `.glb` file into a [`ResourceStore`].
//! The document is parsed once; the conversion stages then run as parallel
//! tasks that wait on each other's results:
//!
//! ```text
//! samplers ──┐
//! images ────┴─> textures ─> materials ─┐
//! skeletons ────────────────────────────┼─> meshes
//! nodes ────────────────────────────────┘
//! ```
//!
//! The store is assembled on the calling thread after every task finished.
//!
//! # Example
//!
//! ```ignore
//! use aster_core::loader::{SceneLoader, LoaderConfig, AttributeLayoutMode};
//!
//! let loader = SceneLoader::new(LoaderConfig::default().with_layout_mode(AttributeLayoutMode::Passthrough));
//! let store = loader.load_file("assets/helmet.glb")?;
//! println!("{}", store.stats());
//! ```

mod buffers;
mod images;
mod materials;
mod meshes;
mod nodes;
mod skins;
mod tasks;

use std::path::Path;
use std::sync::Arc;

use crate::error::{LoadError, LoadResult};
use crate::material::MaterialRefId;
use crate::mesh::Mesh;
use crate::store::ResourceStore;

use materials::{MaterialTable, SamplerTable, TextureTable};
use meshes::LoadedMesh;
use nodes::NodeInstance;
use tasks::{TaskScope, into_owned};

/// How vertex attributes are laid out in the host vertex arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttributeLayoutMode {
    /// Restructure every primitive into [`CanonicalVertex`](crate::mesh::CanonicalVertex).
    #[default]
    Canonical,
    /// Keep the file's own interleaving when all attributes of a primitive
    /// share one buffer view; otherwise fall back to canonical.
    Passthrough,
}

/// Loader settings.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Vertex layout strategy.
    pub layout_mode: AttributeLayoutMode,
    /// Always emit 32-bit indices.
    pub promote_indices: bool,
    /// Upper bound on concurrent image decodes.
    pub decode_threads: usize,
    /// Read animation clip metadata.
    pub load_animations: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            layout_mode: AttributeLayoutMode::default(),
            promote_indices: false,
            decode_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            load_animations: true,
        }
    }
}

impl LoaderConfig {
    /// Set the vertex layout strategy.
    pub fn with_layout_mode(mut self, mode: AttributeLayoutMode) -> Self {
        self.layout_mode = mode;
        self
    }

    /// Set whether indices are always 32-bit.
    pub fn with_promote_indices(mut self, promote: bool) -> Self {
        self.promote_indices = promote;
        self
    }

    /// Set the image decode worker count (at least one).
    pub fn with_decode_threads(mut self, threads: usize) -> Self {
        self.decode_threads = threads.max(1);
        self
    }

    /// Set whether animation metadata is read.
    pub fn with_animations(mut self, load: bool) -> Self {
        self.load_animations = load;
        self
    }
}

/// Loads glTF documents into a [`ResourceStore`].
#[derive(Debug, Clone, Default)]
pub struct SceneLoader {
    config: LoaderConfig,
}

/// Task results, owned once every task has joined.
struct LoadedParts {
    images: Vec<crate::texture::HostImage>,
    samplers: SamplerTable,
    textures: TextureTable,
    materials: MaterialTable,
    skeletons: Vec<crate::skeleton::Skeleton>,
    meshes: Vec<Option<LoadedMesh>>,
    instances: Vec<NodeInstance>,
}

impl SceneLoader {
    /// Create a loader with the given settings.
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Loader settings.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a `.gltf` or `.glb` file. Relative URIs resolve against the
    /// file's directory.
    pub fn load_file(&self, path: impl AsRef<Path>) -> LoadResult<ResourceStore> {
        let path = path.as_ref();
        log::info!("Loading scene from {}", path.display());
        let data = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_slice(&data, path.parent())
    }

    /// Load a document from memory.
    ///
    /// `base_dir` resolves relative URIs; without it only embedded data
    /// (GLB binary chunk, data URIs) can be used.
    pub fn load_slice(&self, data: &[u8], base_dir: Option<&Path>) -> LoadResult<ResourceStore> {
        let gltf_dep::Gltf { document, blob } = gltf_dep::Gltf::from_slice(data)?;
        let buffers = buffers::resolve_buffers(&document, blob, base_dir)?;

        let parts = self.run_tasks(&document, &buffers, base_dir)?;
        // Source bytes are no longer needed once every task has joined.
        drop(buffers);

        let store = assemble(parts);
        log::info!("Loaded scene: {}", store.stats());
        Ok(store)
    }

    fn run_tasks(
        &self,
        document: &gltf_dep::Document,
        buffers: &buffers::Buffers,
        base_dir: Option<&Path>,
    ) -> LoadResult<LoadedParts> {
        let config = &self.config;

        let results = TaskScope::run(|scope| {
            let samplers = scope.spawn("samplers", move || Ok(materials::load_samplers(document)));
            let images = scope.spawn("images", move || {
                Ok(images::load_images(
                    document,
                    buffers,
                    base_dir,
                    config.decode_threads,
                ))
            });
            let skeletons = scope.spawn("skeletons", move || {
                Ok(skins::load_skeletons(
                    document,
                    buffers,
                    config.load_animations,
                ))
            });
            let nodes = scope.spawn("nodes", move || Ok(nodes::collect_instances(document)));

            let textures = {
                let (images, samplers) = (images.clone(), samplers.clone());
                scope.spawn("textures", move || {
                    images.get()?;
                    let samplers = samplers.get()?;
                    Ok(materials::load_textures(document, &samplers))
                })
            };

            let materials = {
                let textures = textures.clone();
                scope.spawn("materials", move || {
                    let textures = textures.get()?;
                    let first_default = textures.textures.len() as u32;
                    Ok(materials::load_materials(document, &textures, first_default))
                })
            };

            let meshes = {
                let (materials, skeletons, nodes) =
                    (materials.clone(), skeletons.clone(), nodes.clone());
                scope.spawn("meshes", move || {
                    let materials = materials.get()?;
                    let skeleton_count = skeletons.get()?.len();
                    let mut instances = into_owned(nodes.get()?);
                    for instance in &mut instances {
                        if let Some(skin) = instance.skin.filter(|&s| s >= skeleton_count) {
                            log::warn!(
                                "Node {} references missing skin {skin}; drawing it unskinned",
                                instance.node
                            );
                            instance.skin = None;
                        }
                    }
                    let referenced = nodes::referenced_meshes(document, &instances);
                    let meshes =
                        meshes::load_meshes(document, buffers, config, &materials, &referenced);
                    Ok((meshes, instances))
                })
            };

            // Dependency order, so the first failure reported is the root cause.
            (|| -> LoadResult<_> {
                Ok((
                    images.get()?,
                    samplers.get()?,
                    textures.get()?,
                    materials.get()?,
                    skeletons.get()?,
                    meshes.get()?,
                ))
            })()
        })?;

        let (images, samplers, textures, materials, skeletons, meshes) = results;
        let (meshes, instances) = into_owned(meshes);
        Ok(LoadedParts {
            images: into_owned(images),
            samplers: into_owned(samplers),
            textures: into_owned(textures),
            materials: into_owned(materials),
            skeletons: into_owned(skeletons),
            meshes,
            instances,
        })
    }
}

/// Move task results into a store, one [`Mesh`] per node instance.
fn assemble(parts: LoadedParts) -> ResourceStore {
    let mut store = ResourceStore::new();

    for image in parts.images {
        store.push_image(image);
    }
    for sampler in parts.samplers.samplers {
        store.push_sampler(sampler);
    }
    for texture in parts.textures.textures {
        store.push_texture(texture);
    }
    store.append_default_textures();

    let material_ids: Vec<Option<MaterialRefId>> = parts
        .materials
        .materials
        .into_iter()
        .map(|m| m.map(|m| store.push_material(m.name, m.model, m.state, m.proxy)))
        .collect();

    for skeleton in parts.skeletons {
        store.push_skeleton(skeleton);
    }

    for instance in &parts.instances {
        let Some(Some(loaded)) = parts.meshes.get(instance.mesh) else {
            continue;
        };
        let transform = store.push_transform(instance.world);
        let mut mesh = Mesh::new(
            Arc::clone(&loaded.vertex_data),
            Arc::clone(&loaded.index_data),
            loaded.index_format,
            transform,
        )
        .with_skeleton(instance.skin);
        if let Some(name) = &loaded.name {
            mesh = mesh.with_name(name.clone());
        }

        let id = store.push_mesh(mesh);
        for submesh in &loaded.submeshes {
            let material = material_ids.get(submesh.material_slot).copied().flatten();
            store.push_submesh(id, material, submesh.draw.clone());
        }
    }

    store.compute_buffer_layout();
    store
}
