//! Shared fixtures for device-side integration tests.
//!
//! Scenes are synthesized as GLB files with the loader test builder, then
//! loaded into a `ResourceStore`.

#![allow(dead_code)]

#[path = "../../../core/tests/common/mod.rs"]
mod glb;

pub use glb::*;

use aster_core::material::MaterialModel;
use aster_core::{ResourceStore, SceneLoader};
use aster_graphics::ShaderSource;

/// Placeholder SPIR-V; the dummy device never compiles shaders.
pub fn shaders() -> [ShaderSource; MaterialModel::COUNT] {
    [
        ShaderSource::new(vec![0x0723_0203, 1], vec![0x0723_0203, 2]),
        ShaderSource::new(vec![0x0723_0203, 3], vec![0x0723_0203, 4]),
    ]
}

/// Load a GLB into a store.
pub fn load(glb: &[u8]) -> ResourceStore {
    init_logging();
    SceneLoader::default()
        .load_slice(glb, None)
        .expect("scene should load")
}

/// One glTF mesh with an indexed quad and a non-indexed triangle sharing a
/// textured opaque material.
pub fn textured_scene() -> Vec<u8> {
    let mut b = GlbBuilder::new();
    let png = png(2, 2, [200, 100, 50, 255]);
    let image = b.image(&png, "albedo");
    let texture = b.texture(image, None);
    let material = b.material(&format!(
        r#"{{"name": "painted", "pbrMetallicRoughness": {{"baseColorTexture": {{"index": {texture}}}}}}}"#
    ));

    let quad = b.positions(&QUAD);
    let quad_indices = b.indices_u16(&QUAD_INDICES);
    let tri = b.positions(&TRIANGLE);
    b.mesh(
        "panel",
        &[
            primitive(&[("POSITION", quad)], Some(quad_indices), Some(material)),
            primitive(&[("POSITION", tri)], None, Some(material)),
        ],
    );
    b.node(r#"{"mesh": 0}"#, true);
    b.build()
}

/// One quad per entry, each placed at `z` with the material given as raw
/// JSON.
pub fn quads_scene(quads: &[(f32, &str)]) -> Vec<u8> {
    let mut b = GlbBuilder::new();
    let positions = b.positions(&QUAD);
    let indices = b.indices_u16(&QUAD_INDICES);
    for (i, (z, material)) in quads.iter().enumerate() {
        let material = b.material(material);
        let mesh = b.mesh(
            &format!("quad{i}"),
            &[primitive(&[("POSITION", positions)], Some(indices), Some(material))],
        );
        b.node(
            &format!(r#"{{"mesh": {mesh}, "translation": [0.0, 0.0, {z:?}]}}"#),
            true,
        );
    }
    b.build()
}

/// Meshes sharing one opaque material, alternating an indexed triangle quad
/// and a line-list outline, placed at `z = -1, -2, ...`.
pub fn mixed_topology_scene(count: usize) -> Vec<u8> {
    let mut b = GlbBuilder::new();
    let material = b.material(r#"{"name": "plain"}"#);
    let positions = b.positions(&QUAD);
    let indices = b.indices_u16(&QUAD_INDICES);
    let outline = b.indices_u16(&[0, 1, 1, 2, 2, 3, 3, 0]);
    for i in 0..count {
        let primitive = if i % 2 == 0 {
            primitive(&[("POSITION", positions)], Some(indices), Some(material))
        } else {
            with_member(
                primitive(&[("POSITION", positions)], Some(outline), Some(material)),
                r#""mode": 1"#,
            )
        };
        let mesh = b.mesh(&format!("piece{i}"), &[primitive]);
        b.node(
            &format!(
                r#"{{"mesh": {mesh}, "translation": [0.0, 0.0, {:?}]}}"#,
                -(i as f32) - 1.0
            ),
            true,
        );
    }
    b.build()
}

/// One mesh whose primitives are, in order: a valid indexed quad, a
/// triangle with an unsupported specular-glossiness material, a line list,
/// and a triangle-list primitive with only two vertices.
pub fn partially_traceable_scene() -> Vec<u8> {
    let mut b = GlbBuilder::new();
    b.extension("KHR_materials_pbrSpecularGlossiness");
    let plain = b.material(r#"{"name": "plain"}"#);
    let glossy = b.material(
        r#"{"extensions": {"KHR_materials_pbrSpecularGlossiness": {"diffuseFactor": [1.0, 1.0, 1.0, 1.0]}}}"#,
    );

    let quad = b.positions(&QUAD);
    let quad_indices = b.indices_u16(&QUAD_INDICES);
    let triangle = b.positions(&TRIANGLE);
    let segment = b.positions(&TRIANGLE[..2]);
    b.mesh(
        "assorted",
        &[
            primitive(&[("POSITION", quad)], Some(quad_indices), Some(plain)),
            primitive(&[("POSITION", triangle)], None, Some(glossy)),
            with_member(
                primitive(&[("POSITION", quad)], None, Some(plain)),
                r#""mode": 1"#,
            ),
            primitive(&[("POSITION", segment)], None, Some(plain)),
        ],
    );
    b.node(r#"{"mesh": 0, "translation": [0.0, 0.0, -3.0]}"#, true);
    b.build()
}
