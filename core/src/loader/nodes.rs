//! Scene hierarchy traversal.

use glam::Mat4;

/// One node that instances a mesh.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NodeInstance {
    pub node: usize,
    pub mesh: usize,
    pub skin: Option<usize>,
    pub world: Mat4,
}

/// Walk the default scene (or scene 0) and collect every mesh instance in
/// depth-first order with its world transform.
pub(crate) fn collect_instances(document: &gltf_dep::Document) -> Vec<NodeInstance> {
    let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) else {
        log::warn!("Document has no scene; nothing will be drawn");
        return Vec::new();
    };

    let mut instances = Vec::new();
    let mut stack: Vec<(gltf_dep::Node<'_>, Mat4)> =
        scene.nodes().map(|n| (n, Mat4::IDENTITY)).collect();
    stack.reverse();

    while let Some((node, parent)) = stack.pop() {
        let world = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
        if let Some(mesh) = node.mesh() {
            instances.push(NodeInstance {
                node: node.index(),
                mesh: mesh.index(),
                skin: node.skin().map(|s| s.index()),
                world,
            });
        }
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev().map(|child| (child, world)));
    }

    log::debug!(
        "Scene {} has {} mesh instances",
        scene.index(),
        instances.len()
    );
    instances
}

/// Flags for the meshes any instance references.
pub(crate) fn referenced_meshes(document: &gltf_dep::Document, instances: &[NodeInstance]) -> Vec<bool> {
    let mut referenced = vec![false; document.meshes().len()];
    for instance in instances {
        if let Some(flag) = referenced.get_mut(instance.mesh) {
            *flag = true;
        }
    }
    referenced
}
