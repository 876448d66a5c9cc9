//! Host-side mesh types.
//!
//! - [`VertexLayout`] and [`CanonicalVertex`]: how vertex bytes are laid out
//! - [`Mesh`], [`Submesh`], [`DrawDescriptor`]: geometry and draw parameters
//! - [`BufferRegion`]: placement in the shared device buffers

mod data;
mod layout;

pub use data::{
    Aabb, BufferRegion, DrawDescriptor, IndexFormat, Mesh, MeshId, PrimitiveTopology, Submesh,
    SubmeshId,
};
pub use layout::{
    CanonicalVertex, VertexAttribute, VertexAttributeFormat, VertexAttributeSemantic,
    VertexLayout,
};
