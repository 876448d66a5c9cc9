//! Mesh and primitive conversion.
//!
//! Each glTF mesh becomes one host vertex array and one host index array
//! holding all of its usable primitives back to back. Primitives the engine
//! cannot draw are dropped with a warning; a mesh is dropped only when none of
//! its primitives survive.

use std::sync::Arc;

use crate::mesh::{
    Aabb, CanonicalVertex, DrawDescriptor, IndexFormat, PrimitiveTopology, VertexAttribute,
    VertexAttributeFormat, VertexAttributeSemantic, VertexLayout,
};
use crate::store::align_up;

use super::buffers::{Buffers, MESHOPT_EXTENSION};
use super::materials::MaterialTable;
use super::{AttributeLayoutMode, LoaderConfig};

const DRACO_EXTENSION: &str = "KHR_draco_mesh_compression";

/// Alignment of primitive data inside a mesh's byte arrays.
const PRIMITIVE_ALIGNMENT: u64 = 4;

/// One primitive of a converted mesh.
#[derive(Debug, Clone)]
pub(crate) struct LoadedSubmesh {
    /// Slot in the [`MaterialTable`].
    pub material_slot: usize,
    pub draw: DrawDescriptor,
}

/// A converted glTF mesh, shared by every node instancing it.
#[derive(Debug, Clone)]
pub(crate) struct LoadedMesh {
    pub name: Option<String>,
    pub vertex_data: Arc<[u8]>,
    pub index_data: Arc<[u8]>,
    pub index_format: IndexFormat,
    pub submeshes: Vec<LoadedSubmesh>,
}

/// Convert the meshes flagged in `referenced`; other entries stay `None`.
pub(crate) fn load_meshes(
    document: &gltf_dep::Document,
    buffers: &Buffers,
    config: &LoaderConfig,
    materials: &MaterialTable,
    referenced: &[bool],
) -> Vec<Option<LoadedMesh>> {
    let mut builder = MeshBuilder {
        buffers,
        config,
        materials,
        draco: document.extensions_used().any(|e| e == DRACO_EXTENSION),
        meshopt: document.extensions_used().any(|e| e == MESHOPT_EXTENSION),
        layouts: Vec::new(),
    };

    let meshes: Vec<Option<LoadedMesh>> = document
        .meshes()
        .map(|mesh| {
            if referenced.get(mesh.index()).copied().unwrap_or(false) {
                builder.build_mesh(&mesh)
            } else {
                log::trace!("Mesh {} is not referenced by the scene", mesh.index());
                None
            }
        })
        .collect();

    log::debug!(
        "Converted {} meshes with {} distinct vertex layouts",
        meshes.iter().flatten().count(),
        builder.layouts.len()
    );
    meshes
}

struct PrimitiveData {
    layout: Arc<VertexLayout>,
    topology: PrimitiveTopology,
    vertex_bytes: Vec<u8>,
    vertex_count: u32,
    indices: Option<Vec<u32>>,
    bounds: Aabb,
    material_slot: usize,
}

struct MeshBuilder<'a> {
    buffers: &'a Buffers,
    config: &'a LoaderConfig,
    materials: &'a MaterialTable,
    draco: bool,
    meshopt: bool,
    /// Layouts handed out so far; equal layouts share one `Arc`.
    layouts: Vec<Arc<VertexLayout>>,
}

impl MeshBuilder<'_> {
    fn build_mesh(&mut self, mesh: &gltf_dep::Mesh<'_>) -> Option<LoadedMesh> {
        let label = mesh.name().unwrap_or("unnamed");
        let primitives: Vec<PrimitiveData> = mesh
            .primitives()
            .filter_map(|primitive| match self.read_primitive(&primitive) {
                Ok(data) => Some(data),
                Err(reason) => {
                    log::warn!(
                        "Skipping primitive {} of mesh {} ({label}): {reason}",
                        primitive.index(),
                        mesh.index()
                    );
                    None
                }
            })
            .collect();

        if primitives.is_empty() {
            log::warn!("Skipping mesh {} ({label}): no usable primitives", mesh.index());
            return None;
        }

        let needs_wide = primitives
            .iter()
            .any(|p| p.indices.is_some() && p.vertex_count > u16::MAX as u32);
        let index_format = if self.config.promote_indices || needs_wide {
            IndexFormat::Uint32
        } else {
            IndexFormat::Uint16
        };

        let mut vertex_data = Vec::new();
        let mut index_data = Vec::new();
        let mut submeshes = Vec::with_capacity(primitives.len());

        for primitive in primitives {
            let vertex_offset = align_up(vertex_data.len() as u64, PRIMITIVE_ALIGNMENT);
            vertex_data.resize(vertex_offset as usize, 0);
            vertex_data.extend_from_slice(&primitive.vertex_bytes);

            let index_offset = align_up(index_data.len() as u64, PRIMITIVE_ALIGNMENT);
            index_data.resize(index_offset as usize, 0);
            let index_count = match &primitive.indices {
                Some(indices) => {
                    write_indices(&mut index_data, indices, index_format);
                    indices.len() as u32
                }
                None => 0,
            };

            submeshes.push(LoadedSubmesh {
                material_slot: primitive.material_slot,
                draw: DrawDescriptor {
                    layout: primitive.layout,
                    topology: primitive.topology,
                    vertex_count: primitive.vertex_count,
                    index_count,
                    vertex_offset,
                    index_offset,
                    bounds: primitive.bounds,
                },
            });
        }

        log::trace!(
            "Mesh {} ({label}): {} submeshes, {} vertex bytes, {} index bytes ({:?})",
            mesh.index(),
            submeshes.len(),
            vertex_data.len(),
            index_data.len(),
            index_format
        );

        Some(LoadedMesh {
            name: mesh.name().map(String::from),
            vertex_data: vertex_data.into(),
            index_data: index_data.into(),
            index_format,
            submeshes,
        })
    }

    fn read_primitive(&mut self, primitive: &gltf_dep::Primitive<'_>) -> Result<PrimitiveData, String> {
        let topology = map_topology(primitive.mode())
            .ok_or_else(|| format!("unsupported topology {:?}", primitive.mode()))?;
        self.validate(primitive)?;

        let buffers = self.buffers;
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).and_then(|b| b.as_deref()));
        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or("missing POSITION attribute")?
            .collect();
        let bounds = Aabb::from_points(positions.iter().copied()).ok_or("primitive has no vertices")?;
        let vertex_count = positions.len() as u32;

        let indices = match reader.read_indices() {
            Some(indices) => {
                let indices: Vec<u32> = indices.into_u32().collect();
                if indices.is_empty() {
                    return Err("primitive has no indices".to_string());
                }
                if let Some(&bad) = indices.iter().find(|&&i| i >= vertex_count) {
                    return Err(format!("index {bad} out of range for {vertex_count} vertices"));
                }
                Some(indices)
            }
            None => None,
        };

        let (layout, vertex_bytes) = match self.config.layout_mode {
            AttributeLayoutMode::Passthrough => match self.passthrough(primitive, vertex_count) {
                Ok(result) => result,
                Err(reason) => {
                    log::debug!(
                        "Primitive {} falls back to the canonical layout: {reason}",
                        primitive.index()
                    );
                    self.canonical(primitive, &positions)
                }
            },
            AttributeLayoutMode::Canonical => self.canonical(primitive, &positions),
        };

        Ok(PrimitiveData {
            layout,
            topology,
            vertex_bytes,
            vertex_count,
            indices,
            bounds,
            material_slot: self.materials.slot(primitive.material().index()),
        })
    }

    /// Reject primitives using features the engine does not handle.
    fn validate(&self, primitive: &gltf_dep::Primitive<'_>) -> Result<(), String> {
        if primitive.get(&gltf_dep::Semantic::Positions).is_none() {
            return Err("missing POSITION attribute".to_string());
        }
        if primitive.morph_targets().next().is_some() {
            return Err("morph targets are not supported".to_string());
        }

        let attributes = primitive.attributes().map(|(semantic, accessor)| (Some(semantic), accessor));
        let indices = primitive.indices().map(|accessor| (None, accessor));

        for (semantic, accessor) in attributes.chain(indices) {
            let what = match &semantic {
                Some(semantic) => format!("{semantic:?}"),
                None => "indices".to_string(),
            };
            if let Some(gltf_dep::Semantic::TexCoords(set)) = semantic {
                if set > 0 {
                    return Err(format!("TEXCOORD_{set} is not supported"));
                }
            }
            if accessor.sparse().is_some() {
                return Err(format!("{what} uses a sparse accessor"));
            }
            let Some(view) = accessor.view() else {
                return Err(if self.draco {
                    format!("{what} is compressed with {DRACO_EXTENSION}")
                } else {
                    format!("{what} has no buffer view")
                });
            };
            let buffer = view.buffer().index();
            if self.buffers.get(buffer).is_none_or(|b| b.is_none()) {
                return Err(if self.meshopt {
                    format!("{what} is compressed with {MESHOPT_EXTENSION}")
                } else {
                    format!("{what} reads from buffer {buffer}, which has no data")
                });
            }
        }
        Ok(())
    }

    fn canonical(
        &mut self,
        primitive: &gltf_dep::Primitive<'_>,
        positions: &[[f32; 3]],
    ) -> (Arc<VertexLayout>, Vec<u8>) {
        let buffers = self.buffers;
        let reader = primitive.reader(|buffer| buffers.get(buffer.index()).and_then(|b| b.as_deref()));

        let mut vertices: Vec<CanonicalVertex> = positions
            .iter()
            .map(|&position| CanonicalVertex {
                position,
                ..CanonicalVertex::default()
            })
            .collect();

        if let Some(normals) = reader.read_normals() {
            vertices.iter_mut().zip(normals).for_each(|(v, n)| v.normal = n);
        }
        if let Some(uvs) = reader.read_tex_coords(0) {
            vertices.iter_mut().zip(uvs.into_f32()).for_each(|(v, uv)| v.uv0 = uv);
        }
        if let Some(tangents) = reader.read_tangents() {
            vertices.iter_mut().zip(tangents).for_each(|(v, t)| v.tangent = t);
        }
        if let Some(colors) = reader.read_colors(0) {
            vertices
                .iter_mut()
                .zip(colors.into_rgba_f32())
                .for_each(|(v, c)| v.color = c);
        }
        if let Some(joints) = reader.read_joints(0) {
            vertices.iter_mut().zip(joints.into_u16()).for_each(|(v, j)| v.joints = j);
        }
        if let Some(weights) = reader.read_weights(0) {
            vertices
                .iter_mut()
                .zip(weights.into_f32())
                .for_each(|(v, w)| v.weights = w);
        }

        let layout = self.intern(VertexLayout::canonical());
        (layout, bytemuck::cast_slice(&vertices).to_vec())
    }

    /// Copy the source interleaving when every attribute lives in one buffer
    /// view with a format the engine understands.
    fn passthrough(
        &mut self,
        primitive: &gltf_dep::Primitive<'_>,
        vertex_count: u32,
    ) -> Result<(Arc<VertexLayout>, Vec<u8>), String> {
        let mut view: Option<gltf_dep::buffer::View<'_>> = None;
        let mut stride = 0u32;
        let mut attributes = Vec::new();

        for (semantic, accessor) in primitive.attributes() {
            let Some(engine_semantic) = map_semantic(&semantic) else {
                continue;
            };
            let accessor_view = accessor.view().ok_or("attribute has no buffer view")?;
            match &view {
                Some(v) if v.index() != accessor_view.index() => {
                    return Err("attributes span multiple buffer views".to_string());
                }
                Some(_) => {}
                None => {
                    stride = accessor_view.stride().unwrap_or(accessor.size()) as u32;
                    view = Some(accessor_view);
                }
            }
            let format = accessor_format(&accessor).ok_or_else(|| {
                format!(
                    "{semantic:?} has unsupported format {:?}/{:?}",
                    accessor.dimensions(),
                    accessor.data_type()
                )
            })?;
            let offset = accessor.offset() as u32;
            if offset + format.size() > stride {
                return Err(format!("{semantic:?} does not fit in a {stride}-byte vertex"));
            }
            attributes.push(VertexAttribute::new(engine_semantic, format, offset));
        }

        let view = view.ok_or("no supported attributes")?;
        if stride == 0 || stride % PRIMITIVE_ALIGNMENT as u32 != 0 {
            return Err(format!("stride {stride} is not a multiple of {PRIMITIVE_ALIGNMENT}"));
        }

        let buffer = self
            .buffers
            .get(view.buffer().index())
            .and_then(|b| b.as_deref())
            .ok_or("buffer has no data")?;
        let size = vertex_count as usize * stride as usize;
        let start = view.offset();
        let end = start + view.length().min(size);
        let mut bytes = buffer.get(start..end).ok_or("view exceeds its buffer")?.to_vec();
        bytes.resize(size, 0);

        let layout = attributes
            .into_iter()
            .fold(VertexLayout::new(stride), |layout, a| layout.with_attribute(a));
        Ok((self.intern(layout), bytes))
    }

    /// Return the shared `Arc` for a layout equal to `layout`.
    fn intern(&mut self, layout: VertexLayout) -> Arc<VertexLayout> {
        if let Some(existing) = self.layouts.iter().find(|l| ***l == layout) {
            return Arc::clone(existing);
        }
        let layout = Arc::new(layout);
        self.layouts.push(Arc::clone(&layout));
        layout
    }
}

fn write_indices(out: &mut Vec<u8>, indices: &[u32], format: IndexFormat) {
    match format {
        IndexFormat::Uint16 => {
            let narrow: Vec<u16> = indices.iter().map(|&i| i as u16).collect();
            out.extend_from_slice(bytemuck::cast_slice(&narrow));
        }
        IndexFormat::Uint32 => out.extend_from_slice(bytemuck::cast_slice(indices)),
    }
}

fn map_topology(mode: gltf_dep::mesh::Mode) -> Option<PrimitiveTopology> {
    use gltf_dep::mesh::Mode;
    match mode {
        Mode::Points => Some(PrimitiveTopology::PointList),
        Mode::Lines => Some(PrimitiveTopology::LineList),
        Mode::LineLoop => None,
        Mode::LineStrip => Some(PrimitiveTopology::LineStrip),
        Mode::Triangles => Some(PrimitiveTopology::TriangleList),
        Mode::TriangleStrip => Some(PrimitiveTopology::TriangleStrip),
        Mode::TriangleFan => Some(PrimitiveTopology::TriangleFan),
    }
}

fn map_semantic(semantic: &gltf_dep::Semantic) -> Option<VertexAttributeSemantic> {
    match semantic {
        gltf_dep::Semantic::Positions => Some(VertexAttributeSemantic::Position),
        gltf_dep::Semantic::Normals => Some(VertexAttributeSemantic::Normal),
        gltf_dep::Semantic::Tangents => Some(VertexAttributeSemantic::Tangent),
        gltf_dep::Semantic::Colors(0) => Some(VertexAttributeSemantic::Color),
        gltf_dep::Semantic::TexCoords(0) => Some(VertexAttributeSemantic::TexCoord0),
        gltf_dep::Semantic::Joints(0) => Some(VertexAttributeSemantic::Joints),
        gltf_dep::Semantic::Weights(0) => Some(VertexAttributeSemantic::Weights),
        _ => None,
    }
}

fn accessor_format(accessor: &gltf_dep::Accessor<'_>) -> Option<VertexAttributeFormat> {
    use gltf_dep::accessor::{DataType, Dimensions};

    let normalized = accessor.normalized();
    match (accessor.dimensions(), accessor.data_type(), normalized) {
        (Dimensions::Scalar, DataType::F32, _) => Some(VertexAttributeFormat::Float),
        (Dimensions::Vec2, DataType::F32, _) => Some(VertexAttributeFormat::Float2),
        (Dimensions::Vec3, DataType::F32, _) => Some(VertexAttributeFormat::Float3),
        (Dimensions::Vec4, DataType::F32, _) => Some(VertexAttributeFormat::Float4),
        (Dimensions::Vec2, DataType::U8, true) => Some(VertexAttributeFormat::Unorm8x2),
        (Dimensions::Vec4, DataType::U8, true) => Some(VertexAttributeFormat::Unorm8x4),
        (Dimensions::Vec4, DataType::I8, true) => Some(VertexAttributeFormat::Snorm8x4),
        (Dimensions::Vec2, DataType::U16, true) => Some(VertexAttributeFormat::Unorm16x2),
        (Dimensions::Vec4, DataType::U16, true) => Some(VertexAttributeFormat::Unorm16x4),
        (Dimensions::Vec4, DataType::I16, true) => Some(VertexAttributeFormat::Snorm16x4),
        (Dimensions::Vec4, DataType::U8, false) => Some(VertexAttributeFormat::Uint8x4),
        (Dimensions::Vec4, DataType::U16, false) => Some(VertexAttributeFormat::Uint16x4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_loop_rejected() {
        assert_eq!(map_topology(gltf_dep::mesh::Mode::LineLoop), None);
        assert_eq!(
            map_topology(gltf_dep::mesh::Mode::TriangleFan),
            Some(PrimitiveTopology::TriangleFan)
        );
    }

    #[test]
    fn test_write_indices_narrow() {
        let mut out = Vec::new();
        write_indices(&mut out, &[1, 2, 3], IndexFormat::Uint16);
        assert_eq!(out.len(), 6);
        assert_eq!(&out[..2], &1u16.to_ne_bytes());

        let mut out = Vec::new();
        write_indices(&mut out, &[7], IndexFormat::Uint32);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_only_first_sets_mapped() {
        assert_eq!(
            map_semantic(&gltf_dep::Semantic::TexCoords(0)),
            Some(VertexAttributeSemantic::TexCoord0)
        );
        assert_eq!(map_semantic(&gltf_dep::Semantic::Colors(1)), None);
    }
}
