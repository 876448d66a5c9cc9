//! Samplers, textures, and materials.
//!
//! Each stage maps glTF indices to local indices. Samplers are deduplicated
//! structurally and textures by (image, sampler), so shared entries are
//! uploaded once.

use std::collections::HashMap;

use crate::material::{AlphaMode, MaterialModel, MaterialProxy, MaterialState};
use crate::sampler::{AddressMode, FilterMode, SamplerDesc};
use crate::texture::{DefaultTexture, HostTexture};

/// Deduplicated samplers.
#[derive(Debug, Clone, Default)]
pub(crate) struct SamplerTable {
    pub samplers: Vec<SamplerDesc>,
    /// glTF sampler index → local sampler index.
    pub map: Vec<usize>,
}

/// Deduplicated textures.
#[derive(Debug, Clone, Default)]
pub(crate) struct TextureTable {
    pub textures: Vec<HostTexture>,
    /// glTF texture index → local texture index.
    pub map: Vec<usize>,
}

/// A material ready to be pushed into the store.
#[derive(Debug, Clone)]
pub(crate) struct LoadedMaterial {
    pub name: Option<String>,
    pub model: MaterialModel,
    pub state: MaterialState,
    pub proxy: MaterialProxy,
}

/// Materials in glTF order followed by the default material.
///
/// `None` marks a material whose model is not supported; primitives using it
/// get no material and are never drawn.
#[derive(Debug, Clone, Default)]
pub(crate) struct MaterialTable {
    pub materials: Vec<Option<LoadedMaterial>>,
}

impl MaterialTable {
    /// Local slot for a primitive's material; `None` selects the default.
    pub fn slot(&self, gltf_material: Option<usize>) -> usize {
        gltf_material.unwrap_or(self.materials.len().saturating_sub(1))
    }
}

pub(crate) fn load_samplers(document: &gltf_dep::Document) -> SamplerTable {
    let mut table = SamplerTable::default();
    let mut seen: HashMap<SamplerDesc, usize> = HashMap::new();

    for sampler in document.samplers() {
        let desc = map_sampler(&sampler);
        let local = *seen.entry(desc).or_insert_with(|| {
            table.samplers.push(desc);
            table.samplers.len() - 1
        });
        table.map.push(local);
    }

    log::debug!(
        "Loaded {} samplers ({} unique)",
        table.map.len(),
        table.samplers.len()
    );
    table
}

pub(crate) fn load_textures(document: &gltf_dep::Document, samplers: &SamplerTable) -> TextureTable {
    let mut table = TextureTable::default();
    let mut seen: HashMap<(usize, Option<usize>), usize> = HashMap::new();

    for texture in document.textures() {
        let image = texture.source().index();
        let sampler = texture
            .sampler()
            .index()
            .and_then(|i| samplers.map.get(i).copied());
        let local = *seen.entry((image, sampler)).or_insert_with(|| {
            table.textures.push(HostTexture { image, sampler });
            table.textures.len() - 1
        });
        table.map.push(local);
    }

    log::debug!(
        "Loaded {} textures ({} unique)",
        table.map.len(),
        table.textures.len()
    );
    table
}

/// Convert every material. `first_default` is the index the default texture
/// block will receive, i.e. the number of scene textures.
pub(crate) fn load_materials(
    document: &gltf_dep::Document,
    textures: &TextureTable,
    first_default: u32,
) -> MaterialTable {
    let mut table = MaterialTable::default();

    for material in document.materials() {
        table
            .materials
            .push(convert_material(&material, textures, first_default));
    }

    table.materials.push(Some(LoadedMaterial {
        name: Some("default".to_string()),
        model: MaterialModel::PbrMetallicRoughness,
        state: MaterialState::default(),
        proxy: MaterialProxy::with_defaults(first_default),
    }));

    log::debug!("Loaded {} materials", table.materials.len());
    table
}

fn convert_material(
    material: &gltf_dep::Material<'_>,
    textures: &TextureTable,
    first_default: u32,
) -> Option<LoadedMaterial> {
    let label = material.name().unwrap_or("unnamed");

    if material.pbr_specular_glossiness().is_some() {
        log::warn!(
            "Material '{label}' uses KHR_materials_pbrSpecularGlossiness, which is not supported; \
             primitives using it will not be drawn"
        );
        return None;
    }

    let model = if material.unlit() {
        MaterialModel::Unlit
    } else {
        MaterialModel::PbrMetallicRoughness
    };
    let alpha_mode = match material.alpha_mode() {
        gltf_dep::material::AlphaMode::Opaque => AlphaMode::Opaque,
        gltf_dep::material::AlphaMode::Mask => AlphaMode::Mask,
        gltf_dep::material::AlphaMode::Blend => AlphaMode::Blend,
    };
    let state = MaterialState::new(alpha_mode, material.double_sided());

    let resolve = |texture: Option<(usize, u32)>, fallback: DefaultTexture| -> u32 {
        let default = first_default + fallback.offset() as u32;
        let Some((index, tex_coord)) = texture else {
            return default;
        };
        if tex_coord != 0 {
            log::warn!(
                "Material '{label}' samples texture {index} with TEXCOORD_{tex_coord}; \
                 only TEXCOORD_0 is supported"
            );
            return default;
        }
        match textures.map.get(index) {
            Some(&local) => local as u32,
            None => {
                log::warn!("Material '{label}' references missing texture {index}");
                default
            }
        }
    };
    let info = |i: gltf_dep::texture::Info| (i.texture().index(), i.tex_coord());

    let pbr = material.pbr_metallic_roughness();
    let mut proxy = MaterialProxy::with_defaults(first_default);
    proxy.base_color_factor = pbr.base_color_factor();
    proxy.metallic_factor = pbr.metallic_factor();
    proxy.roughness_factor = pbr.roughness_factor();
    proxy.emissive_factor = material.emissive_factor();
    proxy.alpha_cutoff = material.alpha_cutoff().unwrap_or(0.5);

    proxy.base_color_texture = resolve(pbr.base_color_texture().map(info), DefaultTexture::White);
    proxy.metallic_roughness_texture = resolve(
        pbr.metallic_roughness_texture().map(info),
        DefaultTexture::White,
    );
    proxy.emissive_texture = resolve(material.emissive_texture().map(info), DefaultTexture::Black);

    if let Some(normal) = material.normal_texture() {
        proxy.normal_scale = normal.scale();
        proxy.normal_texture = resolve(
            Some((normal.texture().index(), normal.tex_coord())),
            DefaultTexture::FlatNormal,
        );
    }
    if let Some(occlusion) = material.occlusion_texture() {
        proxy.occlusion_strength = occlusion.strength();
        proxy.occlusion_texture = resolve(
            Some((occlusion.texture().index(), occlusion.tex_coord())),
            DefaultTexture::White,
        );
    }

    Some(LoadedMaterial {
        name: material.name().map(String::from),
        model,
        state,
        proxy,
    })
}

fn map_sampler(sampler: &gltf_dep::texture::Sampler<'_>) -> SamplerDesc {
    let (min_filter, mipmap_filter) = sampler
        .min_filter()
        .map(map_min_filter)
        .unwrap_or((FilterMode::Linear, FilterMode::Linear));
    SamplerDesc {
        mag_filter: sampler
            .mag_filter()
            .map(map_mag_filter)
            .unwrap_or(FilterMode::Linear),
        min_filter,
        mipmap_filter,
        address_mode_u: map_wrapping(sampler.wrap_s()),
        address_mode_v: map_wrapping(sampler.wrap_t()),
    }
}

fn map_mag_filter(filter: gltf_dep::texture::MagFilter) -> FilterMode {
    match filter {
        gltf_dep::texture::MagFilter::Nearest => FilterMode::Nearest,
        gltf_dep::texture::MagFilter::Linear => FilterMode::Linear,
    }
}

/// Split a glTF min filter into (min, mipmap) filters.
fn map_min_filter(filter: gltf_dep::texture::MinFilter) -> (FilterMode, FilterMode) {
    use gltf_dep::texture::MinFilter;
    match filter {
        MinFilter::Nearest => (FilterMode::Nearest, FilterMode::Nearest),
        MinFilter::Linear => (FilterMode::Linear, FilterMode::Linear),
        MinFilter::NearestMipmapNearest => (FilterMode::Nearest, FilterMode::Nearest),
        MinFilter::LinearMipmapNearest => (FilterMode::Linear, FilterMode::Nearest),
        MinFilter::NearestMipmapLinear => (FilterMode::Nearest, FilterMode::Linear),
        MinFilter::LinearMipmapLinear => (FilterMode::Linear, FilterMode::Linear),
    }
}

fn map_wrapping(wrap: gltf_dep::texture::WrappingMode) -> AddressMode {
    match wrap {
        gltf_dep::texture::WrappingMode::ClampToEdge => AddressMode::ClampToEdge,
        gltf_dep::texture::WrappingMode::MirroredRepeat => AddressMode::MirrorRepeat,
        gltf_dep::texture::WrappingMode::Repeat => AddressMode::Repeat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(json: &str) -> gltf_dep::Document {
        gltf_dep::Gltf::from_slice(json.as_bytes()).unwrap().document
    }

    #[test]
    fn test_min_filter_split() {
        use gltf_dep::texture::MinFilter;
        assert_eq!(
            map_min_filter(MinFilter::LinearMipmapNearest),
            (FilterMode::Linear, FilterMode::Nearest)
        );
        assert_eq!(
            map_min_filter(MinFilter::NearestMipmapLinear),
            (FilterMode::Nearest, FilterMode::Linear)
        );
    }

    #[test]
    fn test_samplers_and_textures_deduplicate() {
        let doc = document(
            r#"{
                "asset": {"version": "2.0"},
                "samplers": [
                    {"magFilter": 9728, "wrapS": 33071},
                    {"magFilter": 9728, "wrapS": 33071},
                    {}
                ],
                "images": [{"uri": "a.png"}, {"uri": "b.png"}],
                "textures": [
                    {"source": 0, "sampler": 0},
                    {"source": 0, "sampler": 1},
                    {"source": 1, "sampler": 2},
                    {"source": 1}
                ]
            }"#,
        );

        let samplers = load_samplers(&doc);
        assert_eq!(samplers.samplers.len(), 2);
        assert_eq!(samplers.map, vec![0, 0, 1]);
        assert_eq!(samplers.samplers[0].mag_filter, FilterMode::Nearest);
        assert_eq!(samplers.samplers[0].address_mode_u, AddressMode::ClampToEdge);
        assert_eq!(samplers.samplers[1], SamplerDesc::linear());

        let textures = load_textures(&doc, &samplers);
        assert_eq!(textures.textures.len(), 3);
        assert_eq!(textures.map, vec![0, 0, 1, 2]);
        assert_eq!(textures.textures[2].sampler, None);
    }

    #[test]
    fn test_materials_resolve_slots() {
        let doc = document(
            r#"{
                "asset": {"version": "2.0"},
                "extensionsUsed": ["KHR_materials_unlit"],
                "images": [{"uri": "a.png"}],
                "textures": [{"source": 0}],
                "materials": [
                    {
                        "name": "lit",
                        "pbrMetallicRoughness": {
                            "baseColorTexture": {"index": 0},
                            "metallicRoughnessTexture": {"index": 0, "texCoord": 1}
                        },
                        "alphaMode": "MASK",
                        "alphaCutoff": 0.25,
                        "doubleSided": true
                    },
                    {
                        "name": "flat",
                        "extensions": {"KHR_materials_unlit": {}},
                        "alphaMode": "BLEND"
                    }
                ]
            }"#,
        );
        let samplers = load_samplers(&doc);
        let textures = load_textures(&doc, &samplers);
        let first_default = textures.textures.len() as u32;
        let table = load_materials(&doc, &textures, first_default);

        assert_eq!(table.materials.len(), 3);
        let lit = table.materials[0].as_ref().unwrap();
        assert_eq!(lit.model, MaterialModel::PbrMetallicRoughness);
        assert_eq!(lit.state, MaterialState::new(AlphaMode::Mask, true));
        assert_eq!(lit.proxy.alpha_cutoff, 0.25);
        assert_eq!(lit.proxy.base_color_texture, 0);
        assert_eq!(
            lit.proxy.metallic_roughness_texture,
            first_default + DefaultTexture::White.offset() as u32
        );
        assert_eq!(
            lit.proxy.normal_texture,
            first_default + DefaultTexture::FlatNormal.offset() as u32
        );

        let flat = table.materials[1].as_ref().unwrap();
        assert_eq!(flat.model, MaterialModel::Unlit);
        assert_eq!(flat.state.alpha_mode, AlphaMode::Blend);

        let default = table.materials[table.slot(None)].as_ref().unwrap();
        assert_eq!(default.state, MaterialState::default());
        assert_eq!(table.slot(Some(1)), 1);
    }
}
