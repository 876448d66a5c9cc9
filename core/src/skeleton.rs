//! Skeletons and animation clip metadata.
//!
//! Only the data needed to bind skinned meshes and to describe clips is kept;
//! clips are not evaluated here.

use glam::Mat4;

/// Animated property of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnimationProperty {
    /// Translation vector.
    Translation,
    /// Rotation quaternion.
    Rotation,
    /// Scale vector.
    Scale,
    /// Morph target weights.
    MorphTargetWeights,
}

/// Keyframe interpolation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
    /// Linear interpolation (slerp for rotations).
    Linear,
    /// Hold the previous key.
    Step,
    /// Cubic spline with in/out tangents.
    CubicSpline,
}

/// One animated property of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationChannel {
    /// Source node index.
    pub target_node: usize,
    /// Animated property.
    pub property: AnimationProperty,
    /// Interpolation mode.
    pub interpolation: Interpolation,
    /// Number of keyframes.
    pub key_count: usize,
}

/// Named set of channels.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    /// Clip name.
    pub name: Option<String>,
    /// Channels.
    pub channels: Vec<AnimationChannel>,
    /// Last keyframe time in seconds.
    pub duration: f32,
}

/// Joint hierarchy from a glTF skin.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    /// Skin name.
    pub name: Option<String>,
    /// Source node indices of the joints.
    pub joints: Vec<usize>,
    /// One inverse bind matrix per joint.
    pub inverse_bind_matrices: Vec<Mat4>,
    /// Common root node, if declared.
    pub root: Option<usize>,
    /// Clips animating this skeleton's joints.
    pub animations: Vec<AnimationClip>,
}

impl Skeleton {
    /// Whether a node is one of this skeleton's joints or its root.
    pub fn owns_node(&self, node: usize) -> bool {
        self.root == Some(node) || self.joints.contains(&node)
    }

    /// Whether every channel of a clip targets this skeleton.
    pub fn owns_clip(&self, clip: &AnimationClip) -> bool {
        !clip.channels.is_empty() && clip.channels.iter().all(|c| self.owns_node(c.target_node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(node: usize) -> AnimationChannel {
        AnimationChannel {
            target_node: node,
            property: AnimationProperty::Rotation,
            interpolation: Interpolation::Linear,
            key_count: 2,
        }
    }

    #[test]
    fn test_owns_clip() {
        let skeleton = Skeleton {
            name: None,
            joints: vec![2, 3],
            inverse_bind_matrices: vec![Mat4::IDENTITY; 2],
            root: Some(1),
            animations: Vec::new(),
        };
        let clip = AnimationClip {
            name: None,
            channels: vec![channel(1), channel(3)],
            duration: 1.0,
        };
        assert!(skeleton.owns_clip(&clip));

        let foreign = AnimationClip {
            name: None,
            channels: vec![channel(3), channel(7)],
            duration: 1.0,
        };
        assert!(!skeleton.owns_clip(&foreign));

        let empty = AnimationClip {
            name: None,
            channels: Vec::new(),
            duration: 0.0,
        };
        assert!(!skeleton.owns_clip(&empty));
    }
}
