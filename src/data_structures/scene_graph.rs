//! Scene graph and hierarchical scene organization.
//!
//! Nodes are stored in an arena and addressed by [`NodeId`]. A node owns its
//! children through its child list; the parent link is a plain id and never
//! owns anything. This keeps child-to-parent navigation cheap without
//! reference cycles.

use generational_arena::{Arena, Index};

use crate::data_structures::{gltf::NodeExtras, transform::Transform};

/// Handle of a node inside a [`SceneGraph`].
pub type NodeId = Index;

/// A materialized glTF node.
///
/// Mesh, skeleton and skin references are kept as opaque glTF ids. They are
/// resolved later, when draw data is built.
#[derive(Clone, Debug, Default)]
pub struct SceneNode {
    /// The glTF id this node was built from.
    pub id: String,
    pub name: String,
    pub transform: Transform,
    pub meshes: Vec<String>,
    pub skeletons: Vec<String>,
    pub skin: Option<String>,
    pub extras: Option<NodeExtras>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The prefab id if this node is a prefab placeholder.
    pub fn prefab(&self) -> Option<&str> {
        self.extras.as_ref().and_then(|extras| extras.prefab.as_deref())
    }
}

/// Arena holding every node of a scene, including joints and prefab sources.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: Arena<SceneNode>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Inserts a detached node.
    pub fn insert(&mut self, node: SceneNode) -> NodeId {
        self.nodes.insert(node)
    }

    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(SceneNode::parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(id).map_or(&[], SceneNode::children)
    }

    /// Appends `child` to the children of `parent`. A child that already has
    /// a parent is detached from it first.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        if !self.nodes.contains(parent) || !self.nodes.contains(child) {
            log::warn!("tried to attach a node that is not part of the graph");
            return;
        }
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Removes `id` from its parent's child list and clears its parent link.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.retain(|&child| child != id);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = None;
        }
    }

    /// Visits every descendant of `root` in pre-order. `root` itself is not visited.
    pub fn walk(&self, root: NodeId, visit: &mut dyn FnMut(NodeId, &SceneNode)) {
        for &child in self.children(root) {
            if let Some(node) = self.nodes.get(child) {
                visit(child, node);
                self.walk(child, visit);
            }
        }
    }

    /// Returns `root` followed by all of its descendants in pre-order.
    pub fn flatten(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if self.nodes.contains(root) {
            out.push(root);
            self.walk(root, &mut |id, _| out.push(id));
        }
        out
    }

    /// Puts `new` at the position of `old` in the child list of `old`'s parent.
    ///
    /// Returns `false` when `old` has no parent; the caller is responsible for
    /// root lists. `old` stays in the arena, detached.
    pub fn replace(&mut self, old: NodeId, new: NodeId) -> bool {
        let Some(parent) = self.parent(old) else {
            return false;
        };
        self.detach(new);
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return false;
        };
        let Some(slot) = parent_node.children.iter().position(|&child| child == old) else {
            return false;
        };
        parent_node.children[slot] = new;
        if let Some(node) = self.nodes.get_mut(new) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(old) {
            node.parent = None;
        }
        true
    }

    /// Removes `root` and all of its descendants from the arena.
    pub fn remove_subtree(&mut self, root: NodeId) {
        self.detach(root);
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.remove(id) {
                stack.extend(node.children);
            }
        }
    }

    /// Copies the subtree below `root` of `source` into this graph.
    ///
    /// Nodes are copied with their name, id and transform. `transfer` is called
    /// for every (new, old) pair and decides which other data carries over.
    /// The copy is detached and shares nothing with `source`.
    pub fn deep_clone(
        &mut self,
        source: &SceneGraph,
        root: NodeId,
        transfer: &mut dyn FnMut(&mut SceneNode, &SceneNode),
    ) -> Option<NodeId> {
        let original = source.get(root)?;
        let mut copy = SceneNode::new(&original.id, &original.name);
        copy.transform = original.transform;
        transfer(&mut copy, original);
        let copy = self.nodes.insert(copy);

        for &child in original.children() {
            if let Some(child_copy) = self.deep_clone(source, child, transfer) {
                self.add_child(copy, child_copy);
            }
        }
        Some(copy)
    }

    /// Local-to-world matrix of a node, composed along its parent chain.
    pub fn world_matrix(&self, id: NodeId) -> cgmath::Matrix4<f32> {
        use cgmath::SquareMatrix;

        let mut matrix = cgmath::Matrix4::identity();
        let mut current = Some(id);
        while let Some(node) = current.and_then(|id| self.nodes.get(id)) {
            matrix = node.transform.to_matrix() * matrix;
            current = node.parent;
        }
        matrix
    }
}
