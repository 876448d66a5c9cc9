//! Error types for host-side scene loading and layout.

use std::path::PathBuf;
use std::sync::Arc;

/// Errors that abort a scene load.
///
/// Problems local to one entity (an unsupported primitive, an undecodable
/// image, an animation without a skeleton) never surface here; they are logged
/// and the entity is skipped.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The top-level glTF document could not be parsed.
    #[cfg(feature = "gltf")]
    #[error("glTF parse error: {0}")]
    Parse(#[from] gltf_dep::Error),
    /// A referenced buffer could not be resolved.
    #[error("buffer error: {0}")]
    Buffer(String),
    /// Reading a file referenced by the document failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Accessor data was malformed beyond what per-primitive validation catches.
    #[error("accessor error: {0}")]
    Accessor(String),
    /// A loader task panicked.
    #[error("loader task '{0}' panicked")]
    TaskPanicked(&'static str),
    /// A task failed because one of its inputs failed.
    #[error("{0}")]
    Upstream(Arc<LoadError>),
}

impl From<Arc<LoadError>> for LoadError {
    fn from(e: Arc<LoadError>) -> Self {
        match Arc::try_unwrap(e) {
            Ok(inner) => inner,
            Err(shared) => Self::Upstream(shared),
        }
    }
}

/// Violations of the shared-buffer layout invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// A mesh has not been assigned a region yet.
    #[error("mesh {mesh} has no buffer region; run compute_buffer_layout first")]
    Unassigned {
        /// Mesh index.
        mesh: usize,
    },
    /// A mesh region extends past the end of the shared buffer.
    #[error("mesh {mesh} {kind} region {offset}+{size} exceeds buffer size {total}")]
    RegionOutOfBounds {
        /// Mesh index.
        mesh: usize,
        /// `"vertex"` or `"index"`.
        kind: &'static str,
        /// Region start.
        offset: u64,
        /// Region length.
        size: u64,
        /// Shared buffer size.
        total: u64,
    },
    /// A submesh byte range leaves its parent mesh region.
    #[error("submesh {submesh} {kind} range {offset}+{size} exceeds mesh region of {region} bytes")]
    SubmeshOutOfBounds {
        /// Submesh index.
        submesh: usize,
        /// `"vertex"` or `"index"`.
        kind: &'static str,
        /// Offset relative to the mesh region.
        offset: u64,
        /// Range length.
        size: u64,
        /// Mesh region length.
        region: u64,
    },
    /// Two mesh regions overlap.
    #[error("mesh {first} and mesh {second} {kind} regions overlap")]
    Overlap {
        /// Earlier mesh.
        first: usize,
        /// Later mesh.
        second: usize,
        /// `"vertex"` or `"index"`.
        kind: &'static str,
    },
    /// A region start is not aligned.
    #[error("mesh {mesh} {kind} region offset {offset} is not {alignment}-byte aligned")]
    Misaligned {
        /// Mesh index.
        mesh: usize,
        /// `"vertex"` or `"index"`.
        kind: &'static str,
        /// Region start.
        offset: u64,
        /// Required alignment.
        alignment: u64,
    },
}

/// Result type for loading.
pub type LoadResult<T> = Result<T, LoadError>;
