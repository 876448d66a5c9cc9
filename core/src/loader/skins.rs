//! Skeletons and animation clip metadata.

use glam::Mat4;

use crate::skeleton::{
    AnimationChannel, AnimationClip, AnimationProperty, Interpolation, Skeleton,
};

use super::buffers::Buffers;

/// Convert every skin, then attach each animation to the first skeleton that
/// owns all of its target nodes.
pub(crate) fn load_skeletons(
    document: &gltf_dep::Document,
    buffers: &Buffers,
    load_animations: bool,
) -> Vec<Skeleton> {
    let get = |buffer: gltf_dep::Buffer<'_>| buffers.get(buffer.index()).and_then(|b| b.as_deref());

    let mut skeletons: Vec<Skeleton> = document
        .skins()
        .map(|skin| {
            let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
            let mut inverse_bind_matrices: Vec<Mat4> = skin
                .reader(get)
                .read_inverse_bind_matrices()
                .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
                .unwrap_or_default();
            if inverse_bind_matrices.len() != joints.len() {
                if !inverse_bind_matrices.is_empty() {
                    log::warn!(
                        "Skin {} has {} inverse bind matrices for {} joints; using identity",
                        skin.index(),
                        inverse_bind_matrices.len(),
                        joints.len()
                    );
                }
                inverse_bind_matrices = vec![Mat4::IDENTITY; joints.len()];
            }

            Skeleton {
                name: skin.name().map(String::from),
                joints,
                inverse_bind_matrices,
                root: skin.skeleton().map(|n| n.index()),
                animations: Vec::new(),
            }
        })
        .collect();

    if load_animations {
        for animation in document.animations() {
            let clip = convert_animation(&animation, buffers);
            match skeletons.iter_mut().find(|s| s.owns_clip(&clip)) {
                Some(skeleton) => skeleton.animations.push(clip),
                None => log::warn!(
                    "Skipping animation {} ({}): no skeleton owns its targets",
                    animation.index(),
                    animation.name().unwrap_or("unnamed")
                ),
            }
        }
    }

    log::debug!(
        "Loaded {} skeletons with {} animation clips",
        skeletons.len(),
        skeletons.iter().map(|s| s.animations.len()).sum::<usize>()
    );
    skeletons
}

fn convert_animation(animation: &gltf_dep::Animation<'_>, buffers: &Buffers) -> AnimationClip {
    let mut duration = 0.0f32;
    let channels = animation
        .channels()
        .map(|channel| {
            let target = channel.target();
            let sampler = channel.sampler();

            let reader = channel.reader(|b| buffers.get(b.index()).and_then(|d| d.as_deref()));
            if let Some(inputs) = reader.read_inputs() {
                duration = inputs.fold(duration, f32::max);
            }

            AnimationChannel {
                target_node: target.node().index(),
                property: match target.property() {
                    gltf_dep::animation::Property::Translation => AnimationProperty::Translation,
                    gltf_dep::animation::Property::Rotation => AnimationProperty::Rotation,
                    gltf_dep::animation::Property::Scale => AnimationProperty::Scale,
                    gltf_dep::animation::Property::MorphTargetWeights => {
                        AnimationProperty::MorphTargetWeights
                    }
                },
                interpolation: match sampler.interpolation() {
                    gltf_dep::animation::Interpolation::Linear => Interpolation::Linear,
                    gltf_dep::animation::Interpolation::Step => Interpolation::Step,
                    gltf_dep::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
                },
                key_count: sampler.input().count(),
            }
        })
        .collect();

    AnimationClip {
        name: animation.name().map(String::from),
        channels,
        duration,
    }
}
