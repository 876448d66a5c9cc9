//! Vertex layout definitions.
//!
//! Every submesh carries an `Arc<VertexLayout>` describing its vertex bytes.
//! Layouts are single-buffer and interleaved: either the engine's
//! [`CanonicalVertex`] or the source file's own interleaving.

use bytemuck::{Pod, Zeroable};

/// Semantic meaning of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexAttributeSemantic {
    /// Vertex position.
    Position,
    /// Vertex normal.
    Normal,
    /// Texture coordinates set 0.
    TexCoord0,
    /// Vertex tangent (w = handedness).
    Tangent,
    /// Vertex color set 0.
    Color,
    /// Joint indices for skinning.
    Joints,
    /// Joint weights for skinning.
    Weights,
}

impl VertexAttributeSemantic {
    /// Shader input location for this semantic.
    pub fn location(&self) -> u32 {
        match self {
            Self::Position => 0,
            Self::Normal => 1,
            Self::TexCoord0 => 2,
            Self::Tangent => 3,
            Self::Color => 4,
            Self::Joints => 5,
            Self::Weights => 6,
        }
    }
}

/// Format of a vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexAttributeFormat {
    /// One 32-bit float.
    Float,
    /// Two 32-bit floats.
    Float2,
    /// Three 32-bit floats.
    Float3,
    /// Four 32-bit floats.
    Float4,
    /// Two normalized unsigned bytes.
    Unorm8x2,
    /// Four normalized unsigned bytes.
    Unorm8x4,
    /// Four normalized signed bytes.
    Snorm8x4,
    /// Two normalized unsigned shorts.
    Unorm16x2,
    /// Four normalized unsigned shorts.
    Unorm16x4,
    /// Four normalized signed shorts.
    Snorm16x4,
    /// Four unsigned bytes.
    Uint8x4,
    /// Four unsigned shorts.
    Uint16x4,
}

impl VertexAttributeFormat {
    /// Size in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Self::Float => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
            Self::Unorm8x2 => 2,
            Self::Unorm8x4 | Self::Snorm8x4 | Self::Uint8x4 => 4,
            Self::Unorm16x2 => 4,
            Self::Unorm16x4 | Self::Snorm16x4 | Self::Uint16x4 => 8,
        }
    }
}

/// One attribute within an interleaved vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// What the attribute holds.
    pub semantic: VertexAttributeSemantic,
    /// Data format.
    pub format: VertexAttributeFormat,
    /// Byte offset within the vertex.
    pub offset: u32,
}

impl VertexAttribute {
    /// Create an attribute.
    pub fn new(
        semantic: VertexAttributeSemantic,
        format: VertexAttributeFormat,
        offset: u32,
    ) -> Self {
        Self {
            semantic,
            format,
            offset,
        }
    }
}

/// Interleaved single-buffer vertex layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VertexLayout {
    /// Bytes between consecutive vertices.
    pub stride: u32,
    /// Attributes, sorted by offset.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// Create an empty layout with the given stride.
    pub fn new(stride: u32) -> Self {
        Self {
            stride,
            attributes: Vec::new(),
        }
    }

    /// Add an attribute, keeping attributes ordered by offset.
    pub fn with_attribute(mut self, attribute: VertexAttribute) -> Self {
        self.attributes.push(attribute);
        self.attributes.sort_by_key(|a| a.offset);
        self
    }

    /// The layout of [`CanonicalVertex`].
    pub fn canonical() -> Self {
        use VertexAttributeFormat as F;
        use VertexAttributeSemantic as S;

        Self::new(CanonicalVertex::STRIDE)
            .with_attribute(VertexAttribute::new(S::Position, F::Float3, 0))
            .with_attribute(VertexAttribute::new(S::Normal, F::Float3, 12))
            .with_attribute(VertexAttribute::new(S::TexCoord0, F::Float2, 24))
            .with_attribute(VertexAttribute::new(S::Tangent, F::Float4, 32))
            .with_attribute(VertexAttribute::new(S::Color, F::Float4, 48))
            .with_attribute(VertexAttribute::new(S::Joints, F::Uint16x4, 64))
            .with_attribute(VertexAttribute::new(S::Weights, F::Float4, 72))
    }

    /// Whether this is the canonical layout.
    pub fn is_canonical(&self) -> bool {
        *self == Self::canonical()
    }

    /// Find an attribute by semantic.
    pub fn attribute(&self, semantic: VertexAttributeSemantic) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.semantic == semantic)
    }

    /// Byte offset of a `Float32x3` position attribute, the only position
    /// format ray-tracing geometry accepts.
    pub fn float3_position_offset(&self) -> Option<u32> {
        self.attribute(VertexAttributeSemantic::Position)
            .filter(|a| a.format == VertexAttributeFormat::Float3)
            .map(|a| a.offset)
    }
}

/// Engine vertex format produced by the canonical loader path.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CanonicalVertex {
    /// Position.
    pub position: [f32; 3],
    /// Normal (zero when the source has none).
    pub normal: [f32; 3],
    /// First texture coordinate set.
    pub uv0: [f32; 2],
    /// Tangent with handedness in w.
    pub tangent: [f32; 4],
    /// Vertex color (white when the source has none).
    pub color: [f32; 4],
    /// Skinning joint indices.
    pub joints: [u16; 4],
    /// Skinning weights.
    pub weights: [f32; 4],
}

impl CanonicalVertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: u32 = std::mem::size_of::<Self>() as u32;
}

impl Default for CanonicalVertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            normal: [0.0; 3],
            uv0: [0.0; 2],
            tangent: [0.0; 4],
            color: [1.0; 4],
            joints: [0; 4],
            weights: [0.0; 4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_stride() {
        assert_eq!(CanonicalVertex::STRIDE, 88);
        assert_eq!(VertexLayout::canonical().stride, 88);
    }

    #[test]
    fn test_canonical_offsets_match_struct() {
        let layout = VertexLayout::canonical();
        let v = CanonicalVertex::default();
        let base = &v as *const _ as usize;
        let weights = &v.weights as *const _ as usize;
        let joints = &v.joints as *const _ as usize;
        assert_eq!(
            layout.attribute(VertexAttributeSemantic::Weights).unwrap().offset as usize,
            weights - base
        );
        assert_eq!(
            layout.attribute(VertexAttributeSemantic::Joints).unwrap().offset as usize,
            joints - base
        );
    }

    #[test]
    fn test_attributes_sorted_by_offset() {
        let layout = VertexLayout::new(20)
            .with_attribute(VertexAttribute::new(
                VertexAttributeSemantic::TexCoord0,
                VertexAttributeFormat::Float2,
                12,
            ))
            .with_attribute(VertexAttribute::new(
                VertexAttributeSemantic::Position,
                VertexAttributeFormat::Float3,
                0,
            ));
        assert_eq!(layout.attributes[0].semantic, VertexAttributeSemantic::Position);
        assert_eq!(layout.float3_position_offset(), Some(0));
        assert!(!layout.is_canonical());
    }

    #[test]
    fn test_non_float_position_rejected() {
        let layout = VertexLayout::new(8).with_attribute(VertexAttribute::new(
            VertexAttributeSemantic::Position,
            VertexAttributeFormat::Unorm16x4,
            0,
        ));
        assert_eq!(layout.float3_position_offset(), None);
    }
}
