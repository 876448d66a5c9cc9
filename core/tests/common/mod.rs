//! Common utilities for loader integration tests.
//!
//! [`GlbBuilder`] assembles small glTF binaries in memory so tests do not
//! depend on asset files.

#![allow(dead_code)]

/// Initialize test logging once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Encode a solid-color PNG.
pub fn png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("PNG encoding failed");
    out.into_inner()
}

/// Corners of a unit right triangle in the XY plane.
pub const TRIANGLE: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

/// Corners of a unit quad in the XY plane.
pub const QUAD: [[f32; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 0.0],
];

/// Two triangles covering [`QUAD`].
pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// Builds a GLB file from raw JSON fragments and a binary chunk.
#[derive(Default)]
pub struct GlbBuilder {
    bin: Vec<u8>,
    views: Vec<String>,
    accessors: Vec<String>,
    images: Vec<String>,
    samplers: Vec<String>,
    textures: Vec<String>,
    materials: Vec<String>,
    meshes: Vec<String>,
    nodes: Vec<String>,
    scene_nodes: Vec<usize>,
    skins: Vec<String>,
    animations: Vec<String>,
    extensions_used: Vec<String>,
    extra_buffers: Vec<String>,
}

impl GlbBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes to the binary chunk as a new buffer view.
    pub fn view(&mut self, bytes: &[u8], stride: Option<usize>) -> usize {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }
        let offset = self.bin.len();
        self.bin.extend_from_slice(bytes);
        let stride = stride
            .map(|s| format!(r#", "byteStride": {s}"#))
            .unwrap_or_default();
        self.views.push(format!(
            r#"{{"buffer": 0, "byteOffset": {offset}, "byteLength": {}{stride}}}"#,
            bytes.len()
        ));
        self.views.len() - 1
    }

    /// Add a raw accessor.
    pub fn accessor(&mut self, json: String) -> usize {
        self.accessors.push(json);
        self.accessors.len() - 1
    }

    /// `VEC3` float accessor with min/max, suitable for `POSITION`.
    pub fn positions(&mut self, points: &[[f32; 3]]) -> usize {
        let view = self.view(bytemuck::cast_slice(points), None);
        self.position_accessor(view, 0, points)
    }

    fn position_accessor(&mut self, view: usize, offset: usize, points: &[[f32; 3]]) -> usize {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for p in points {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
        self.accessor(format!(
            r#"{{"bufferView": {view}, "byteOffset": {offset}, "componentType": 5126, "count": {}, "type": "VEC3", "min": {min:?}, "max": {max:?}}}"#,
            points.len()
        ))
    }

    /// Float accessor with `components` values per element.
    pub fn floats(&mut self, values: &[f32], components: usize) -> usize {
        let ty = match components {
            1 => "SCALAR",
            2 => "VEC2",
            3 => "VEC3",
            4 => "VEC4",
            16 => "MAT4",
            _ => panic!("unsupported component count {components}"),
        };
        let view = self.view(bytemuck::cast_slice(values), None);
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5126, "count": {}, "type": "{ty}"}}"#,
            values.len() / components
        ))
    }

    /// Scalar float accessor with min/max, suitable for animation inputs.
    pub fn times(&mut self, values: &[f32]) -> usize {
        let view = self.view(bytemuck::cast_slice(values), None);
        let min = values.iter().copied().fold(f32::MAX, f32::min);
        let max = values.iter().copied().fold(f32::MIN, f32::max);
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5126, "count": {}, "type": "SCALAR", "min": [{min:?}], "max": [{max:?}]}}"#,
            values.len()
        ))
    }

    /// `u16` index accessor.
    pub fn indices_u16(&mut self, indices: &[u16]) -> usize {
        let view = self.view(bytemuck::cast_slice(indices), None);
        self.accessor(format!(
            r#"{{"bufferView": {view}, "componentType": 5123, "count": {}, "type": "SCALAR"}}"#,
            indices.len()
        ))
    }

    /// Position and UV accessors interleaved in one view with a 20-byte stride.
    pub fn interleaved(&mut self, points: &[[f32; 3]], uvs: &[[f32; 2]]) -> (usize, usize) {
        let mut bytes = Vec::new();
        for (p, uv) in points.iter().zip(uvs) {
            bytes.extend_from_slice(bytemuck::cast_slice(p));
            bytes.extend_from_slice(bytemuck::cast_slice(uv));
        }
        let view = self.view(&bytes, Some(20));
        let position = self.position_accessor(view, 0, points);
        let uv = self.accessor(format!(
            r#"{{"bufferView": {view}, "byteOffset": 12, "componentType": 5126, "count": {}, "type": "VEC2"}}"#,
            uvs.len()
        ));
        (position, uv)
    }

    /// Image stored in the binary chunk.
    pub fn image(&mut self, bytes: &[u8], name: &str) -> usize {
        let view = self.view(bytes, None);
        self.images.push(format!(
            r#"{{"bufferView": {view}, "mimeType": "image/png", "name": "{name}"}}"#
        ));
        self.images.len() - 1
    }

    /// Add a raw sampler.
    pub fn sampler(&mut self, json: &str) -> usize {
        self.samplers.push(json.to_string());
        self.samplers.len() - 1
    }

    /// Texture over an image with an optional sampler.
    pub fn texture(&mut self, image: usize, sampler: Option<usize>) -> usize {
        let sampler = sampler
            .map(|s| format!(r#", "sampler": {s}"#))
            .unwrap_or_default();
        self.textures.push(format!(r#"{{"source": {image}{sampler}}}"#));
        self.textures.len() - 1
    }

    /// Add a raw material.
    pub fn material(&mut self, json: &str) -> usize {
        self.materials.push(json.to_string());
        self.materials.len() - 1
    }

    /// Add a mesh from raw primitive objects.
    pub fn mesh(&mut self, name: &str, primitives: &[String]) -> usize {
        self.meshes.push(format!(
            r#"{{"name": "{name}", "primitives": [{}]}}"#,
            primitives.join(", ")
        ));
        self.meshes.len() - 1
    }

    /// Add a raw node; `root` nodes are listed in the scene.
    pub fn node(&mut self, json: &str, root: bool) -> usize {
        self.nodes.push(json.to_string());
        let index = self.nodes.len() - 1;
        if root {
            self.scene_nodes.push(index);
        }
        index
    }

    /// Add a raw skin.
    pub fn skin(&mut self, json: &str) -> usize {
        self.skins.push(json.to_string());
        self.skins.len() - 1
    }

    /// Add a raw animation.
    pub fn animation(&mut self, json: &str) -> usize {
        self.animations.push(json.to_string());
        self.animations.len() - 1
    }

    /// Declare an extension in `extensionsUsed`.
    pub fn extension(&mut self, name: &str) {
        self.extensions_used.push(format!(r#""{name}""#));
    }

    /// Add a raw buffer after the binary chunk buffer.
    pub fn buffer(&mut self, json: &str) -> usize {
        self.extra_buffers.push(json.to_string());
        self.extra_buffers.len()
    }

    /// Serialize the document to GLB.
    pub fn build(mut self) -> Vec<u8> {
        while self.bin.len() % 4 != 0 {
            self.bin.push(0);
        }

        let mut buffers = Vec::new();
        if !self.bin.is_empty() {
            buffers.push(format!(r#"{{"byteLength": {}}}"#, self.bin.len()));
        }
        buffers.extend(self.extra_buffers.iter().cloned());

        let mut fields = vec![r#""asset": {"version": "2.0"}"#.to_string()];
        let mut array = |key: &str, items: &[String]| {
            if !items.is_empty() {
                fields.push(format!(r#""{key}": [{}]"#, items.join(", ")));
            }
        };
        array("extensionsUsed", &self.extensions_used);
        array("buffers", &buffers);
        array("bufferViews", &self.views);
        array("accessors", &self.accessors);
        array("images", &self.images);
        array("samplers", &self.samplers);
        array("textures", &self.textures);
        array("materials", &self.materials);
        array("meshes", &self.meshes);
        array("nodes", &self.nodes);
        array("skins", &self.skins);
        array("animations", &self.animations);
        if !self.nodes.is_empty() {
            fields.push(format!(
                r#""scene": 0, "scenes": [{{"nodes": {:?}}}]"#,
                self.scene_nodes
            ));
        }
        let json = format!("{{{}}}", fields.join(", ")).into_bytes();

        let json_pad = (4 - (json.len() % 4)) % 4;
        let json_chunk_len = json.len() + json_pad;
        let has_bin = !self.bin.is_empty();
        let total_length = 12 + 8 + json_chunk_len + if has_bin { 8 + self.bin.len() } else { 0 };

        let mut glb = Vec::with_capacity(total_length);
        glb.extend_from_slice(&0x46546C67u32.to_le_bytes());
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total_length as u32).to_le_bytes());

        glb.extend_from_slice(&(json_chunk_len as u32).to_le_bytes());
        glb.extend_from_slice(&0x4E4F534Au32.to_le_bytes());
        glb.extend_from_slice(&json);
        glb.extend(std::iter::repeat_n(b' ', json_pad));

        if has_bin {
            glb.extend_from_slice(&(self.bin.len() as u32).to_le_bytes());
            glb.extend_from_slice(&0x004E4942u32.to_le_bytes());
            glb.extend_from_slice(&self.bin);
        }
        glb
    }
}

/// A primitive object with the given attributes.
pub fn primitive(
    attributes: &[(&str, usize)],
    indices: Option<usize>,
    material: Option<usize>,
) -> String {
    let attributes: Vec<String> = attributes
        .iter()
        .map(|(name, accessor)| format!(r#""{name}": {accessor}"#))
        .collect();
    let mut json = format!(r#"{{"attributes": {{{}}}"#, attributes.join(", "));
    if let Some(indices) = indices {
        json.push_str(&format!(r#", "indices": {indices}"#));
    }
    if let Some(material) = material {
        json.push_str(&format!(r#", "material": {material}"#));
    }
    json.push('}');
    json
}

/// Insert an extra member into a JSON object produced by [`primitive`].
pub fn with_member(object: String, member: &str) -> String {
    let mut object = object;
    object.pop();
    format!("{object}, {member}}}")
}
