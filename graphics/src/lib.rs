//! # Aster Graphics
//!
//! GPU side of the Aster scene pipeline.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GpuDevice`] / [`RenderEncoder`] - Traits the rest of the crate talks to
//! - [`upload_to_device`] - One-shot transfer of a [`ResourceStore`] into
//!   device buffers and textures
//! - [`MaterialFxRegistry`] - Pipelines per material model and state
//! - [`RenderBatcher`] - Per-frame binning, sorting, and draw recording
//! - [`build_acceleration_structures`] - BLAS per submesh, one TLAS
//! - [`SceneResources`] - Owns all of the above for one scene
//! - Backends: [`DummyDevice`] for tests, Vulkan behind `vulkan-backend`
//!
//! ## Example
//!
//! ```ignore
//! use aster_core::SceneLoader;
//! use aster_graphics::{Camera, SceneResources, UploadOptions};
//!
//! let store = SceneLoader::default().load_file("scene.glb")?;
//! let mut scene = SceneResources::new(store, shaders);
//! let writes = scene.upload_to_device(&device, &UploadOptions::default())?;
//! // apply `writes` to the scene descriptor set, then every frame:
//! scene.render_frame(&device, &camera, elapsed, &mut encoder)?;
//! ```
//!
//! [`ResourceStore`]: aster_core::ResourceStore

pub mod acceleration;
pub mod backend;
pub mod batcher;
pub mod commands;
pub mod error;
pub mod material_fx;
pub mod scene;
pub mod types;
pub mod upload;

// Re-export main types for convenience
pub use acceleration::{AccelerationState, InstanceRecord, build_acceleration_structures};
pub use backend::{DummyDevice, GpuDevice, RecordingEncoder, RenderEncoder};
pub use batcher::{Camera, DrawConstants, FrameStats, FrameUniforms, RenderBatcher};
pub use commands::{TransferCommand, TransientCommands};
pub use error::{GraphicsError, GraphicsResult};
pub use material_fx::{FxKey, MaterialFx, MaterialFxRegistry, RayTracingFx};
pub use scene::{SceneResources, bindings};
pub use types::{DescriptorWrite, ShaderSource};
pub use upload::{DeviceScene, UploadOptions, upload_to_device};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
