//! # Aster Core
//!
//! Host side of the Aster scene pipeline: the resource data model, the
//! [`ResourceStore`] that owns a loaded scene, and the glTF loader.
//!
//! GPU upload, material effects, draw batching, and acceleration structures
//! live in `aster-graphics`.

pub mod error;
#[cfg(feature = "gltf")]
pub mod loader;
pub mod material;
pub mod mesh;
pub mod sampler;
pub mod skeleton;
pub mod store;
pub mod texture;

pub use error::{LayoutError, LoadError, LoadResult};
#[cfg(feature = "gltf")]
pub use loader::{AttributeLayoutMode, LoaderConfig, SceneLoader};
pub use store::{BufferLayout, ResourceStore, SceneStats};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
