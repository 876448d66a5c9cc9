//! Host-side mesh data structures.
//!
//! - [`Mesh`]: vertex/index bytes for one node instance of a source mesh
//! - [`Submesh`]: one drawable primitive within a mesh
//! - [`DrawDescriptor`]: layout, counts and mesh-relative byte offsets
//! - [`BufferRegion`]: where a mesh lives in the shared device buffers

use std::sync::Arc;

use glam::Vec3;

use crate::material::MaterialRefId;

use super::layout::VertexLayout;

/// Index of a [`Mesh`] in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MeshId(pub u32);

impl MeshId {
    /// Array index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a [`Submesh`] in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmeshId(pub u32);

impl SubmeshId {
    /// Array index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Primitive topology describing how vertices are assembled into primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Each vertex is a separate point.
    PointList,
    /// Every two vertices form a line.
    LineList,
    /// Vertices form a connected strip of lines.
    LineStrip,
    /// Every three vertices form a triangle.
    #[default]
    TriangleList,
    /// Vertices form a connected strip of triangles.
    TriangleStrip,
    /// Triangles share the first vertex.
    TriangleFan,
}

/// Index format for indexed drawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexFormat {
    /// 16-bit unsigned integers.
    #[default]
    Uint16,
    /// 32-bit unsigned integers.
    Uint32,
}

impl IndexFormat {
    /// Size in bytes of each index.
    pub fn size(&self) -> u64 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Bounds of a set of points; `None` when empty.
    pub fn from_points(points: impl IntoIterator<Item = [f32; 3]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = Vec3::from(iter.next()?);
        let (min, max) = iter.fold((first, first), |(min, max), p| {
            let p = Vec3::from(p);
            (min.min(p), max.max(p))
        });
        Some(Self { min, max })
    }

    /// Center point.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// Everything needed to issue one draw for a submesh.
///
/// Offsets are relative to the parent mesh's [`BufferRegion`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawDescriptor {
    /// Vertex layout.
    pub layout: Arc<VertexLayout>,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Number of indices; zero for non-indexed draws.
    pub index_count: u32,
    /// Byte offset of the first vertex within the mesh vertex bytes.
    pub vertex_offset: u64,
    /// Byte offset of the first index within the mesh index bytes.
    pub index_offset: u64,
    /// Object-space bounds.
    pub bounds: Aabb,
}

impl DrawDescriptor {
    /// Whether the submesh is drawn with an index buffer.
    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }

    /// Bytes of vertex data this draw reads.
    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_count as u64 * self.layout.stride as u64
    }

    /// Bytes of index data this draw reads.
    pub fn index_bytes(&self, format: IndexFormat) -> u64 {
        self.index_count as u64 * format.size()
    }

    /// Number of triangles for ray tracing, or `None` when the submesh is not
    /// a non-empty triangle list with a `Float32x3` position.
    pub fn ray_traced_triangles(&self) -> Option<u32> {
        if self.topology != PrimitiveTopology::TriangleList {
            return None;
        }
        self.layout.float3_position_offset()?;
        let primitives = if self.is_indexed() {
            self.index_count / 3
        } else {
            self.vertex_count / 3
        };
        (primitives > 0).then_some(primitives)
    }
}

/// One drawable primitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Submesh {
    /// Parent mesh.
    pub mesh: MeshId,
    /// Material; submeshes without one are never drawn.
    pub material: Option<MaterialRefId>,
    /// Draw parameters.
    pub draw: DrawDescriptor,
}

/// Byte ranges a mesh occupies in the shared vertex and index buffers.
///
/// Sizes include the alignment padding that follows the mesh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferRegion {
    /// Start in the shared vertex buffer.
    pub vertex_offset: u64,
    /// Reserved vertex bytes.
    pub vertex_size: u64,
    /// Start in the shared index buffer.
    pub index_offset: u64,
    /// Reserved index bytes.
    pub index_size: u64,
}

/// Vertex and index bytes of one mesh instance.
///
/// Instances of the same source mesh share their byte arrays until the host
/// copies are released.
#[derive(Debug, Clone)]
pub struct Mesh {
    /// Mesh name from the source document.
    pub name: Option<String>,
    /// Index into the store transform array.
    pub transform: usize,
    /// Skeleton driving this mesh, if skinned.
    pub skeleton: Option<usize>,
    /// Index format of [`index_data`](Self::index_data).
    pub index_format: IndexFormat,
    /// Submeshes in primitive order.
    pub submeshes: Vec<super::SubmeshId>,
    /// Region in the shared device buffers, assigned by the layout pass.
    pub region: Option<BufferRegion>,
    vertex_data: Option<Arc<[u8]>>,
    index_data: Option<Arc<[u8]>>,
    vertex_size: u64,
    index_size: u64,
}

impl Mesh {
    /// Create a mesh from its byte arrays.
    pub fn new(
        vertex_data: Arc<[u8]>,
        index_data: Arc<[u8]>,
        index_format: IndexFormat,
        transform: usize,
    ) -> Self {
        Self {
            name: None,
            transform,
            skeleton: None,
            index_format,
            submeshes: Vec::new(),
            region: None,
            vertex_size: vertex_data.len() as u64,
            index_size: index_data.len() as u64,
            vertex_data: Some(vertex_data),
            index_data: Some(index_data),
        }
    }

    /// Set the mesh name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the skeleton.
    pub fn with_skeleton(mut self, skeleton: Option<usize>) -> Self {
        self.skeleton = skeleton;
        self
    }

    /// Vertex bytes, or `None` after release.
    pub fn vertex_data(&self) -> Option<&[u8]> {
        self.vertex_data.as_deref()
    }

    /// Index bytes, or `None` after release.
    pub fn index_data(&self) -> Option<&[u8]> {
        self.index_data.as_deref()
    }

    /// Length of the vertex bytes, valid after release.
    pub fn vertex_size(&self) -> u64 {
        self.vertex_size
    }

    /// Length of the index bytes, valid after release.
    pub fn index_size(&self) -> u64 {
        self.index_size
    }

    /// Whether the host byte arrays are still present.
    pub fn is_resident(&self) -> bool {
        self.vertex_data.is_some()
    }

    /// Drop the host byte arrays.
    pub fn release_data(&mut self) {
        self.vertex_data = None;
        self.index_data = None;
    }
}
