//! Material data types shared by the loader, the store and the device side.
//!
//! A material is split in two: the [`MaterialProxy`] is the plain value block
//! the shaders index into, and the [`MaterialRef`] carries what the pipeline
//! needs to know ([`MaterialModel`] and [`MaterialState`]) plus the index of
//! its proxy.

use bytemuck::{Pod, Zeroable};

use crate::texture::DefaultTexture;

/// Alpha rendering mode.
///
/// The declaration order is the draw order: opaque first, blended last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum AlphaMode {
    /// Fully opaque (alpha ignored).
    #[default]
    Opaque,
    /// Alpha masking with cutoff threshold.
    Mask,
    /// Full alpha blending.
    Blend,
}

impl AlphaMode {
    /// All modes in draw order.
    pub const ALL: [AlphaMode; 3] = [AlphaMode::Opaque, AlphaMode::Mask, AlphaMode::Blend];
}

/// Shading model a material is rendered with.
///
/// Each model maps to exactly one material effect on the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum MaterialModel {
    /// glTF core metallic-roughness PBR.
    #[default]
    PbrMetallicRoughness,
    /// `KHR_materials_unlit`.
    Unlit,
}

impl MaterialModel {
    /// Number of models.
    pub const COUNT: usize = 2;

    /// All models.
    pub const ALL: [MaterialModel; Self::COUNT] =
        [MaterialModel::PbrMetallicRoughness, MaterialModel::Unlit];

    /// Dense index for table lookups.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fixed-function state that selects a pipeline variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MaterialState {
    /// Alpha rendering mode.
    pub alpha_mode: AlphaMode,
    /// Disables back-face culling.
    pub double_sided: bool,
}

impl MaterialState {
    /// Create a state.
    pub fn new(alpha_mode: AlphaMode, double_sided: bool) -> Self {
        Self {
            alpha_mode,
            double_sided,
        }
    }
}

/// Bit flags stored in [`MaterialProxy::flags`].
pub mod proxy_flags {
    /// Alpha test against `alpha_cutoff`.
    pub const ALPHA_MASK: u32 = 1 << 0;
    /// Alpha blended.
    pub const ALPHA_BLEND: u32 = 1 << 1;
    /// Back faces are shaded.
    pub const DOUBLE_SIDED: u32 = 1 << 2;
    /// Lighting is skipped.
    pub const UNLIT: u32 = 1 << 3;
}

/// GPU-visible material parameters.
///
/// Stored contiguously in one storage buffer and indexed by
/// [`MaterialRef::proxy`]. Texture fields are indices into the scene texture
/// array, which ends with the [`DefaultTexture`] block.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialProxy {
    /// Base color factor (linear RGBA).
    pub base_color_factor: [f32; 4],
    /// Emissive factor (linear RGB).
    pub emissive_factor: [f32; 3],
    /// Alpha cutoff for [`AlphaMode::Mask`].
    pub alpha_cutoff: f32,
    /// Metallic factor.
    pub metallic_factor: f32,
    /// Roughness factor.
    pub roughness_factor: f32,
    /// Normal map scale.
    pub normal_scale: f32,
    /// Occlusion strength.
    pub occlusion_strength: f32,
    /// Base color texture index.
    pub base_color_texture: u32,
    /// Metallic-roughness texture index.
    pub metallic_roughness_texture: u32,
    /// Normal map texture index.
    pub normal_texture: u32,
    /// Occlusion texture index.
    pub occlusion_texture: u32,
    /// Emissive texture index.
    pub emissive_texture: u32,
    /// See [`proxy_flags`].
    pub flags: u32,
    /// Pads the block to a multiple of 16 bytes.
    pub _pad: [u32; 2],
}

impl MaterialProxy {
    /// Size of one proxy in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// glTF default factors with every texture slot bound to its neutral
    /// default. `first_default` is the index of [`DefaultTexture::White`] in
    /// the scene texture array.
    pub fn with_defaults(first_default: u32) -> Self {
        let slot = |t: DefaultTexture| first_default + t.offset() as u32;
        Self {
            base_color_factor: [1.0; 4],
            emissive_factor: [0.0; 3],
            alpha_cutoff: 0.5,
            metallic_factor: 1.0,
            roughness_factor: 1.0,
            normal_scale: 1.0,
            occlusion_strength: 1.0,
            base_color_texture: slot(DefaultTexture::White),
            metallic_roughness_texture: slot(DefaultTexture::White),
            normal_texture: slot(DefaultTexture::FlatNormal),
            occlusion_texture: slot(DefaultTexture::White),
            emissive_texture: slot(DefaultTexture::Black),
            flags: 0,
            _pad: [0; 2],
        }
    }

    /// Encode model and state into [`flags`](Self::flags).
    pub fn set_flags(&mut self, model: MaterialModel, state: MaterialState) {
        let mut flags = 0;
        match state.alpha_mode {
            AlphaMode::Opaque => {}
            AlphaMode::Mask => flags |= proxy_flags::ALPHA_MASK,
            AlphaMode::Blend => flags |= proxy_flags::ALPHA_BLEND,
        }
        if state.double_sided {
            flags |= proxy_flags::DOUBLE_SIDED;
        }
        if model == MaterialModel::Unlit {
            flags |= proxy_flags::UNLIT;
        }
        self.flags = flags;
    }
}

/// Index of a [`MaterialRef`] in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialRefId(pub u32);

impl MaterialRefId {
    /// Array index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Non-owning material reference used by submeshes.
///
/// Many submeshes may point at the same reference by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaterialRef {
    /// Material name from the source document.
    pub name: Option<String>,
    /// Shading model.
    pub model: MaterialModel,
    /// Pipeline state.
    pub state: MaterialState,
    /// Index into the store's proxy array.
    pub proxy: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_layout() {
        assert_eq!(MaterialProxy::SIZE, 80);
        assert_eq!(MaterialProxy::SIZE % 16, 0);
    }

    #[test]
    fn test_proxy_defaults_point_at_default_block() {
        let proxy = MaterialProxy::with_defaults(3);
        assert_eq!(proxy.base_color_texture, 3);
        assert_eq!(proxy.emissive_texture, 4);
        assert_eq!(proxy.normal_texture, 5);
        assert_eq!(proxy.alpha_cutoff, 0.5);
    }

    #[test]
    fn test_flags() {
        let mut proxy = MaterialProxy::with_defaults(0);
        proxy.set_flags(
            MaterialModel::Unlit,
            MaterialState::new(AlphaMode::Blend, true),
        );
        assert_eq!(
            proxy.flags,
            proxy_flags::ALPHA_BLEND | proxy_flags::DOUBLE_SIDED | proxy_flags::UNLIT
        );
    }

    #[test]
    fn test_alpha_mode_draw_order() {
        assert!(AlphaMode::Opaque < AlphaMode::Mask);
        assert!(AlphaMode::Mask < AlphaMode::Blend);
    }
}
