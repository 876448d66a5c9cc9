//! Acceleration structure descriptors.

use aster_core::mesh::IndexFormat;

/// Acceleration structure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationStructureKind {
    /// Triangle geometry.
    BottomLevel,
    /// Instances of bottom-level structures.
    TopLevel,
}

/// Triangle input for a bottom-level build. Positions are `Float32x3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriangleGeometry {
    /// Device address of the first vertex's position.
    pub vertex_address: u64,
    /// Bytes between consecutive positions.
    pub vertex_stride: u64,
    /// Highest vertex index referenced.
    pub max_vertex: u32,
    /// Device address of the first index, for indexed geometry.
    pub index_address: Option<u64>,
    /// Index format; ignored without an index address.
    pub index_format: IndexFormat,
    /// Number of triangles.
    pub triangle_count: u32,
}

/// Build input of an acceleration structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccelerationGeometry {
    /// One opaque triangle geometry.
    Triangles(TriangleGeometry),
    /// Tightly packed 64-byte instance records.
    Instances {
        /// Device address of the first instance.
        address: u64,
        /// Number of instances.
        count: u32,
    },
}

impl AccelerationGeometry {
    /// Level of structure built from this geometry.
    pub fn kind(&self) -> AccelerationStructureKind {
        match self {
            Self::Triangles(_) => AccelerationStructureKind::BottomLevel,
            Self::Instances { .. } => AccelerationStructureKind::TopLevel,
        }
    }

    /// Number of primitives (triangles or instances).
    pub fn primitive_count(&self) -> u32 {
        match self {
            Self::Triangles(triangles) => triangles.triangle_count,
            Self::Instances { count, .. } => *count,
        }
    }
}

/// Memory requirements of one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccelerationStructureSizes {
    /// Size of the structure's backing storage.
    pub structure_size: u64,
    /// Scratch memory needed while building.
    pub build_scratch_size: u64,
}

/// Descriptor for creating an acceleration structure.
///
/// The device allocates the backing storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccelerationStructureDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Level.
    pub kind: AccelerationStructureKind,
    /// Backing storage size from [`AccelerationStructureSizes::structure_size`].
    pub size: u64,
}
