//! Integration tests for uploading, batching, and ray-tracing setup of
//! loaded scenes on the dummy device.

mod common;

use aster_core::material::AlphaMode;
use aster_core::mesh::MeshId;
use aster_core::texture::DefaultTexture;
use aster_graphics::types::{AccelerationStructureKind, DescriptorType, MemoryLocation};
use aster_graphics::{
    Camera, DrawConstants, DummyDevice, FrameUniforms, GpuDevice, RecordingEncoder,
    SceneResources, UploadOptions, bindings, upload_to_device,
};
use glam::Vec3;
use rstest::rstest;

const OPAQUE: &str = r#"{"name": "opaque"}"#;
const BLEND: &str = r#"{"name": "glass", "alphaMode": "BLEND"}"#;

fn camera() -> Camera {
    Camera::look_at(
        Vec3::ZERO,
        Vec3::NEG_Z,
        Vec3::Y,
        std::f32::consts::FRAC_PI_3,
        (640, 480),
        0.1,
        100.0,
    )
}

fn uploaded(glb: &[u8], options: UploadOptions) -> (SceneResources, DummyDevice) {
    let store = common::load(glb);
    let device = DummyDevice::new();
    let mut scene = SceneResources::new(store, common::shaders());
    scene
        .upload_to_device(&device, &options)
        .expect("upload should succeed");
    (scene, device)
}

#[test]
fn test_textured_scene_upload() {
    let mut store = common::load(&common::textured_scene());
    assert_eq!(store.meshes().len(), 1);
    assert_eq!(store.submeshes().len(), 2);
    assert_eq!(store.device_image_count(), 1 + DefaultTexture::COUNT);

    let vertex_bytes = store.mesh(MeshId(0)).vertex_data().unwrap().to_vec();
    let index_bytes = store.mesh(MeshId(0)).index_data().unwrap().to_vec();

    let device = DummyDevice::new();
    let scene = upload_to_device(
        &mut store,
        &device,
        &UploadOptions::default().with_release_host_data(false),
    )
    .unwrap();

    let layout = scene.layout();
    assert!(layout.vertex_buffer_size > 0);

    // shared buffers are allocated at exactly the computed sizes
    let vertex_buffer = scene.vertex_buffer().unwrap();
    let index_buffer = scene.index_buffer().unwrap();
    let transform_buffer = scene.transform_buffer().unwrap();
    assert_eq!(
        device.buffer_descriptor(vertex_buffer).unwrap().size,
        layout.vertex_buffer_size
    );
    assert_eq!(
        device.buffer_descriptor(index_buffer).unwrap().size,
        layout.index_buffer_size
    );
    assert_eq!(
        device.buffer_descriptor(transform_buffer).unwrap().size,
        layout.transform_buffer_size
    );
    assert_eq!(
        device.buffer_descriptor(vertex_buffer).unwrap().location,
        MemoryLocation::GpuOnly
    );

    // host bytes land at the mesh region
    let region = store.mesh(MeshId(0)).region.unwrap();
    let contents = device.buffer_contents(vertex_buffer).unwrap();
    let start = region.vertex_offset as usize;
    assert_eq!(&contents[start..start + vertex_bytes.len()], &vertex_bytes[..]);
    let contents = device.buffer_contents(index_buffer).unwrap();
    let start = region.index_offset as usize;
    assert_eq!(&contents[start..start + index_bytes.len()], &index_bytes[..]);

    // every image became a texture with a view and a bindless slot
    assert_eq!(scene.textures().len(), 1 + DefaultTexture::COUNT);
    assert_eq!(scene.views().len(), 1 + DefaultTexture::COUNT);
    assert_eq!(scene.texture_bindings().len(), store.textures().len());
    assert_eq!(
        device.texture_contents(scene.textures()[0]).unwrap()[..4],
        [200, 100, 50, 255]
    );

    // only persistent resources survive; staging is gone
    assert_eq!(device.live_buffers(), 3);
}

#[test]
fn test_upload_releases_host_data_by_default() {
    let (scene, _device) = uploaded(&common::textured_scene(), UploadOptions::default());
    assert!(scene.is_uploaded());
    assert!(!scene.store().is_host_resident());
    assert!(scene.store().mesh(MeshId(0)).vertex_data().is_none());
}

#[test]
fn test_second_upload_allocates_nothing() {
    let (mut scene, device) = uploaded(&common::textured_scene(), UploadOptions::default());
    let created = device.created_count();
    let first = scene.descriptor_writes();

    let second = scene
        .upload_to_device(&device, &UploadOptions::default())
        .unwrap();

    assert_eq!(device.created_count(), created);
    assert_eq!(first, second);
}

#[test]
fn test_descriptor_writes_cover_scene_bindings() {
    let (mut scene, device) = uploaded(&common::textured_scene(), UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    let writes = scene.descriptor_writes();
    let binding = |b: u32| writes.iter().find(|w| w.binding == b).unwrap();

    assert_eq!(binding(bindings::TEXTURES).count(), 1 + DefaultTexture::COUNT);
    assert_eq!(binding(bindings::MATERIALS).ty, DescriptorType::StorageBuffer);
    assert_eq!(binding(bindings::TRANSFORMS).ty, DescriptorType::StorageBuffer);
    assert_eq!(
        binding(bindings::FRAME_UNIFORMS).ty,
        DescriptorType::UniformBuffer
    );
    assert!(writes.iter().all(|w| w.binding != bindings::TLAS));
}

#[test]
fn test_every_material_submesh_in_exactly_one_bin() {
    let glb = common::quads_scene(&[
        (-2.0, OPAQUE),
        (-3.0, BLEND),
        (-4.0, r#"{"alphaMode": "MASK", "alphaCutoff": 0.3}"#),
        (-5.0, r#"{"doubleSided": true}"#),
        (-6.0, OPAQUE),
    ]);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    let stats = scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    let mut seen: Vec<_> = scene
        .batcher()
        .bins()
        .iter()
        .flat_map(|bin| bin.items.iter().map(|item| item.submesh))
        .collect();
    seen.sort();
    let expected: Vec<_> = scene.store().submesh_ids().collect();
    assert_eq!(seen, expected);

    assert_eq!(stats.draws, 5);
    assert_eq!(encoder.draw_count(), 5);
    assert_eq!(stats.skipped, 0);
}

#[test]
fn test_bin_depth_ordering() {
    let glb = common::quads_scene(&[
        (-5.0, OPAQUE),
        (-1.0, OPAQUE),
        (-3.0, OPAQUE),
        (-2.0, BLEND),
        (-8.0, BLEND),
        (-4.0, BLEND),
    ]);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    let bins = scene.batcher().bins();
    assert_eq!(bins.len(), 2);
    for bin in bins {
        let depths: Vec<f32> = bin.items.iter().map(|item| item.depth).collect();
        if bin.key.alpha_mode == AlphaMode::Blend {
            assert!(depths.windows(2).all(|w| w[0] >= w[1]), "{depths:?}");
        } else {
            assert!(depths.windows(2).all(|w| w[0] <= w[1]), "{depths:?}");
        }
    }
    // blended geometry is drawn after everything else
    assert_eq!(bins.last().unwrap().key.alpha_mode, AlphaMode::Blend);
}

#[test]
fn test_farther_transparent_submesh_drawn_first() {
    let glb = common::quads_scene(&[(-2.0, BLEND), (-10.0, BLEND)]);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    // quad1 sits at z = -10 and has transform index 1
    let blocks = encoder.push_constant_blocks();
    assert_eq!(blocks.len(), 2);
    let first: DrawConstants = bytemuck::pod_read_unaligned(blocks[0]);
    let second: DrawConstants = bytemuck::pod_read_unaligned(blocks[1]);
    let far = scene.store().mesh(MeshId(1)).transform as u32;
    let near = scene.store().mesh(MeshId(0)).transform as u32;
    assert_eq!(first.transform_index, far);
    assert_eq!(second.transform_index, near);
    assert_eq!(first.instance_index, u32::MAX);
}

#[test]
fn test_pipeline_bound_once_per_bin() {
    let glb = common::quads_scene(&[(-1.0, OPAQUE), (-2.0, OPAQUE), (-3.0, OPAQUE)]);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    let stats = scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    assert_eq!(stats.bins, 1);
    assert_eq!(stats.pipeline_binds, 1);
    assert_eq!(encoder.bound_pipelines().len(), 1);
    assert_eq!(device.live_pipelines(), 1);
}

#[test]
fn test_mixed_topologies_bind_each_pipeline_once() {
    let glb = common::mixed_topology_scene(4);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    let stats = scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    // one material, two topologies: two pipeline variants
    assert_eq!(device.live_pipelines(), 2);
    assert_eq!(stats.bins, 2);
    assert_eq!(stats.draws, 4);

    let bound = encoder.bound_pipelines();
    let mut distinct = bound.clone();
    distinct.sort();
    distinct.dedup();
    assert_eq!(stats.pipeline_binds, distinct.len());
    assert_eq!(bound.len(), distinct.len());

    for bin in scene.batcher().bins() {
        let fx = bin.items[0].fx;
        assert!(bin.items.iter().all(|item| item.fx == fx));
        assert_eq!(bin.key.variant, fx.variant);
        assert_eq!(bin.items.len(), 2);
    }
}

#[test]
fn test_unassigned_submesh_is_never_drawn() {
    let glb = common::partially_traceable_scene();
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    let stats = scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    let store = scene.store();
    let unassigned: Vec<_> = store
        .submesh_ids()
        .filter(|&id| store.submesh(id).material.is_none())
        .collect();
    assert_eq!(unassigned.len(), 1);

    let binned: Vec<_> = scene
        .batcher()
        .bins()
        .iter()
        .flat_map(|bin| bin.items.iter().map(|item| item.submesh))
        .collect();
    assert!(!binned.contains(&unassigned[0]));
    assert_eq!(binned.len(), store.submeshes().len() - 1);
    assert_eq!(stats.draws, store.submeshes().len() - 1);
    assert_eq!(encoder.draw_count(), stats.draws);
    assert_eq!(stats.skipped, 0);
}

#[rstest]
#[case::opaque(r#"{"alphaMode": "OPAQUE"}"#, AlphaMode::Opaque)]
#[case::mask(r#"{"alphaMode": "MASK"}"#, AlphaMode::Mask)]
#[case::blend(r#"{"alphaMode": "BLEND"}"#, AlphaMode::Blend)]
fn test_alpha_mode_selects_pipeline_state(#[case] material: &str, #[case] expected: AlphaMode) {
    let glb = common::quads_scene(&[(-2.0, material)]);
    let (mut scene, device) = uploaded(&glb, UploadOptions::default());
    let mut encoder = RecordingEncoder::new();
    scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();

    let bins = scene.batcher().bins();
    assert_eq!(bins.len(), 1);
    assert_eq!(bins[0].key.alpha_mode, expected);

    let pipeline = encoder.bound_pipelines()[0];
    let descriptor = device.pipeline_descriptor(pipeline).unwrap();
    assert_eq!(descriptor.state.alpha_mode, expected);
    assert_eq!(descriptor.push_constant_size, DrawConstants::SIZE);
}

#[test]
fn test_acceleration_structures_match_submeshes() {
    let glb = common::quads_scene(&[(-1.0, OPAQUE), (-2.0, BLEND), (-3.0, r#"{"doubleSided": true}"#)]);
    let (scene, device) = uploaded(
        &glb,
        UploadOptions::default().with_acceleration_structures(true),
    );

    let acceleration = scene.acceleration().unwrap();
    let submeshes = scene.store().submeshes().len();
    assert_eq!(acceleration.bottom_levels().len(), submeshes);
    assert_eq!(acceleration.instance_count(), submeshes);
    assert_eq!(
        device.live_acceleration_structures(AccelerationStructureKind::BottomLevel),
        submeshes
    );
    assert_eq!(
        device.live_acceleration_structures(AccelerationStructureKind::TopLevel),
        1
    );

    // BLAS builds, a barrier, then the TLAS build, in one submission
    let submissions = device.submissions();
    let build = submissions.last().unwrap();
    assert_eq!(build.len(), submeshes + 2);

    // geometry, transforms, proxies and instance records persist;
    // scratch and TLAS staging do not
    let instance_buffer = acceleration.instance_buffer().unwrap();
    assert!(device.buffer_descriptor(instance_buffer).is_some());
    assert_eq!(device.live_buffers(), 5);
}

#[test]
fn test_acceleration_structures_only_for_traceable_geometry() {
    let glb = common::partially_traceable_scene();
    let (scene, device) = uploaded(
        &glb,
        UploadOptions::default().with_acceleration_structures(true),
    );

    let store = scene.store();
    let acceleration = scene.acceleration().unwrap();
    let traceable: Vec<_> = store
        .submesh_ids()
        .filter(|&id| store.submesh(id).draw.ray_traced_triangles().is_some())
        .collect();
    // the quad and the glossy triangle; the line list and the two-vertex
    // primitive have no triangles
    assert_eq!(traceable.len(), 2);
    assert!(traceable.len() < store.submeshes().len());
    assert_eq!(acceleration.bottom_levels().len(), traceable.len());
    assert_eq!(
        device.live_acceleration_structures(AccelerationStructureKind::BottomLevel),
        traceable.len()
    );

    for id in store.submesh_ids() {
        assert_eq!(
            acceleration.instance_index(id).is_some(),
            traceable.contains(&id),
            "submesh {id:?}"
        );
    }
}

#[test]
fn test_ray_tracing_frames_only_write_uniforms() {
    let glb = common::quads_scene(&[(-1.0, OPAQUE), (-2.0, BLEND)]);
    let (mut scene, device) = uploaded(
        &glb,
        UploadOptions::default().with_acceleration_structures(true),
    );
    let writes = scene.set_ray_tracing_fx(None).unwrap();
    assert!(writes.iter().any(|w| w.binding == bindings::TLAS));
    assert!(writes.iter().any(|w| w.binding == bindings::INSTANCES));

    let mut encoder = RecordingEncoder::new();
    let writes_before = device.host_write_count();
    let stats = scene
        .render_frame(&device, &camera(), 1.5, &mut encoder)
        .unwrap();

    assert!(encoder.commands.is_empty());
    assert_eq!(stats.draws, 0);
    assert_eq!(device.host_write_count(), writes_before + 1);

    let uniforms = scene.batcher().uniform_buffer().unwrap();
    let bytes = device.buffer_contents(uniforms).unwrap();
    assert_eq!(bytes.len() as u64, FrameUniforms::SIZE);
    let uniforms: FrameUniforms = bytemuck::pod_read_unaligned(&bytes);
    assert_eq!(uniforms.camera_position[3], 1.5);
}

#[test]
fn test_ray_tracing_requires_acceleration_structures() {
    let (mut scene, _device) = uploaded(&common::textured_scene(), UploadOptions::default());
    assert!(scene.set_ray_tracing_fx(None).is_err());
}

#[test]
fn test_release_destroys_everything() {
    let glb = common::quads_scene(&[(-1.0, OPAQUE), (-2.0, BLEND)]);
    let (mut scene, device) = uploaded(
        &glb,
        UploadOptions::default()
            .with_acceleration_structures(true)
            .with_release_host_data(false),
    );
    let mut encoder = RecordingEncoder::new();
    scene
        .render_frame(&device, &camera(), 0.0, &mut encoder)
        .unwrap();
    assert!(device.live_resource_count() > 0);

    scene.release(&device);
    assert_eq!(device.live_resource_count(), 0);
    assert!(!scene.is_uploaded());

    // host data was kept, so the scene can go up again
    scene
        .upload_to_device(&device, &UploadOptions::default())
        .unwrap();
    assert!(scene.is_uploaded());
}

#[test]
fn test_failed_upload_leaves_no_resources() {
    let store = common::load(&common::textured_scene());
    let device = DummyDevice::new();
    device.fail_after(12);
    let mut scene = SceneResources::new(store, common::shaders());

    assert!(
        scene
            .upload_to_device(&device, &UploadOptions::default())
            .is_err()
    );
    assert_eq!(device.live_resource_count(), 0);
    assert!(!scene.is_uploaded());
    assert!(scene.store().is_host_resident());
    assert_eq!(device.name(), "Dummy Device");
}
