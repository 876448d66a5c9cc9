//! Graphics pipeline descriptors.

use std::sync::Arc;

use aster_core::material::MaterialState;
use aster_core::mesh::{PrimitiveTopology, VertexLayout};

use super::TextureFormat;

/// SPIR-V words for the vertex and fragment stages of one effect.
///
/// Both stages use the `main` entry point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderSource {
    /// Vertex stage SPIR-V.
    pub vertex: Arc<[u32]>,
    /// Fragment stage SPIR-V.
    pub fragment: Arc<[u32]>,
}

impl ShaderSource {
    /// Create a shader source from SPIR-V words.
    pub fn new(vertex: impl Into<Arc<[u32]>>, fragment: impl Into<Arc<[u32]>>) -> Self {
        Self {
            vertex: vertex.into(),
            fragment: fragment.into(),
        }
    }
}

/// Everything needed to create one graphics pipeline.
///
/// Pipelines bind the scene descriptor set at set 0 and take push constants
/// of [`push_constant_size`](Self::push_constant_size) bytes visible to all
/// graphics stages.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    /// Debug label.
    pub label: Option<String>,
    /// Shader stages.
    pub shaders: ShaderSource,
    /// Vertex input layout, bound at slot 0.
    pub vertex_layout: Arc<VertexLayout>,
    /// Primitive topology.
    pub topology: PrimitiveTopology,
    /// Blending and culling state.
    pub state: MaterialState,
    /// Push constant block size in bytes.
    pub push_constant_size: u32,
    /// Color attachment format.
    pub color_format: TextureFormat,
    /// Depth attachment format, if depth tested.
    pub depth_format: Option<TextureFormat>,
}

impl PipelineDescriptor {
    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
