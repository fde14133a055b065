//! Loaded scenes.
//!
//! A [`SceneTree`] is the node hierarchy materialized from one glTF document.
//! A [`Scene`] is the host tree of a load plus every resource shared by it and
//! by the prefab documents it pulled in: meshes, materials, accessors,
//! techniques, GPU textures and buffers, and compiled draw commands.

use std::{collections::BTreeMap, rc::Rc};

use crate::{
    backend::{CommandDescriptor, RenderBackend},
    data_structures::{
        gltf::{Accessor, Document, Material, Mesh},
        scene_graph::{NodeId, SceneGraph, SceneNode},
        technique::TechniqueRegistry,
        transform::Transform,
    },
};

/// The node hierarchy of one glTF document.
#[derive(Debug, Default)]
pub struct SceneTree {
    pub name: String,
    pub document: Rc<Document>,
    pub graph: SceneGraph,
    /// Root nodes in document order.
    pub nodes: Vec<NodeId>,
    /// Skeleton joints by glTF node id.
    pub joints: BTreeMap<String, NodeId>,
}

impl SceneTree {
    /// Builds the node tree of the document's default scene and the joint
    /// hierarchy of every node carrying a `jointName`.
    pub fn materialize(document: Rc<Document>) -> Self {
        let mut graph = SceneGraph::new();
        let (name, roots) = match document.default_scene() {
            Some((_, scene)) => (scene.name.clone().unwrap_or_default(), scene.nodes.clone()),
            None => {
                log::warn!("document has no scene to materialize");
                (String::new(), Vec::new())
            }
        };

        let nodes = roots
            .iter()
            .filter_map(|id| materialize_node(&document, &mut graph, id))
            .collect();

        let mut joints = BTreeMap::new();
        for (id, node) in &document.nodes {
            if node.joint_name.is_some() {
                materialize_joint(&document, &mut graph, None, id, &mut joints);
            }
        }

        Self {
            name,
            document,
            graph,
            nodes,
            joints,
        }
    }

    /// All nodes under the roots, in pre-order.
    pub fn flatten(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .flat_map(|&root| self.graph.flatten(root))
            .collect()
    }
}

fn materialize_node(document: &Document, graph: &mut SceneGraph, id: &str) -> Option<NodeId> {
    let Some(source) = document.nodes.get(id) else {
        log::warn!("node \"{id}\" is referenced but not defined");
        return None;
    };
    let mut node = SceneNode::new(id, source.name.as_deref().unwrap_or_default());
    node.transform = Transform::from_gltf(source.translation, source.rotation, source.scale);
    node.meshes = source.meshes.clone().unwrap_or_default();
    node.skeletons = source.skeletons.clone().unwrap_or_default();
    node.skin = source.skin.clone();
    node.extras = source.extras.clone();
    let node = graph.insert(node);

    for child in &source.children {
        if let Some(child) = materialize_node(document, graph, child) {
            graph.add_child(node, child);
        }
    }
    Some(node)
}

/// Joints are shared: a joint reached a second time is not copied. It moves
/// under the latest parent that references it.
fn materialize_joint(
    document: &Document,
    graph: &mut SceneGraph,
    parent: Option<NodeId>,
    id: &str,
    joints: &mut BTreeMap<String, NodeId>,
) {
    if let Some(&joint) = joints.get(id) {
        if let Some(parent) = parent {
            if graph.parent(joint).is_some_and(|previous| previous != parent) {
                log::warn!("joint \"{id}\" is referenced by more than one parent, re-parenting");
            }
            graph.add_child(parent, joint);
        }
        return;
    }

    let Some(source) = document.nodes.get(id) else {
        log::warn!("joint \"{id}\" is referenced but not defined");
        return;
    };
    let mut node = SceneNode::new(id, source.name.as_deref().unwrap_or_default());
    node.transform = Transform::from_gltf(source.translation, source.rotation, source.scale);
    let node = graph.insert(node);
    joints.insert(id.to_string(), node);
    if let Some(parent) = parent {
        graph.add_child(parent, node);
    }

    for child in &source.children {
        materialize_joint(document, graph, Some(node), child, joints);
    }
}

/// Storage of a buffer view.
pub enum BufferSlot<B: RenderBackend> {
    /// Views targeting `ARRAY_BUFFER` or `ELEMENT_ARRAY_BUFFER`.
    Gpu(B::Buffer),
    /// Views without a target keep their bytes. Empty until the buffer arrives.
    Raw(Vec<u8>),
}

impl<B: RenderBackend> BufferSlot<B> {
    pub fn gpu(&self) -> Option<&B::Buffer> {
        match self {
            BufferSlot::Gpu(buffer) => Some(buffer),
            BufferSlot::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            BufferSlot::Raw(bytes) => Some(bytes),
            BufferSlot::Gpu(_) => None,
        }
    }
}

/// A loaded scene.
///
/// Returned as soon as the node tree and joints exist. Textures and buffers
/// fill their slots when they arrive, and grafted prefabs set `dirty`.
pub struct Scene<B: RenderBackend> {
    pub name: String,
    pub document: Rc<Document>,
    pub graph: SceneGraph,
    pub nodes: Vec<NodeId>,
    pub joints: BTreeMap<String, NodeId>,

    pub registry: TechniqueRegistry,
    pub meshes: BTreeMap<String, Mesh>,
    pub materials: BTreeMap<String, Material>,
    pub accessors: BTreeMap<String, Accessor>,

    /// Texture id to GPU texture.
    pub textures: BTreeMap<String, B::Texture>,
    /// Buffer view id to storage.
    pub buffers: BTreeMap<String, BufferSlot<B>>,
    /// Prefab id to the fully resolved prefab tree.
    pub prefabs: BTreeMap<String, SceneTree>,
    /// Technique id to compiled draw command.
    pub commands: BTreeMap<String, B::Command>,

    pub dirty: bool,
}

impl<B: RenderBackend> Scene<B> {
    pub fn new(registry: TechniqueRegistry) -> Self {
        Self {
            name: String::new(),
            document: Rc::default(),
            graph: SceneGraph::new(),
            nodes: Vec::new(),
            joints: BTreeMap::new(),
            registry,
            meshes: BTreeMap::new(),
            materials: BTreeMap::new(),
            accessors: BTreeMap::new(),
            textures: BTreeMap::new(),
            buffers: BTreeMap::new(),
            prefabs: BTreeMap::new(),
            commands: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Installs `tree` as the host tree of the scene.
    pub fn set_tree(&mut self, tree: SceneTree) {
        self.name = tree.name;
        self.document = tree.document;
        self.graph = tree.graph;
        self.nodes = tree.nodes;
        self.joints = tree.joints;
    }

    /// Overlays the document-level definitions onto the scene-wide tables.
    /// Entries of later documents win on id collisions.
    pub fn overlay(&mut self, document: &Document) {
        self.registry.overlay(document);
        self.meshes
            .extend(document.meshes.iter().map(|(id, mesh)| (id.clone(), mesh.clone())));
        self.materials.extend(
            document
                .materials
                .iter()
                .map(|(id, material)| (id.clone(), material.clone())),
        );
        self.accessors.extend(
            document
                .accessors
                .iter()
                .map(|(id, accessor)| (id.clone(), accessor.clone())),
        );
    }

    /// Compiles a draw command for every registered technique. Techniques
    /// that fail to compile are skipped.
    pub fn compile_commands(&mut self, backend: &B) {
        for (name, technique) in self.registry.techniques() {
            let Some(program) = self.registry.program(&technique.program) else {
                log::warn!(
                    "technique \"{name}\" uses unknown program \"{}\"",
                    technique.program
                );
                continue;
            };
            let descriptor = CommandDescriptor::new(name, technique, program);
            match backend.compile_command(&descriptor) {
                Ok(command) => {
                    self.commands.insert(name.clone(), command);
                }
                Err(e) => log::warn!("could not compile technique \"{name}\": {e:#}"),
            }
        }
    }

    /// All nodes under the roots, in pre-order. Re-run this when `dirty` is set.
    pub fn flatten(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .flat_map(|&root| self.graph.flatten(root))
            .collect()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Finds a node of the host tree by its glTF id.
    pub fn find(&self, id: &str) -> Option<NodeId> {
        self.flatten()
            .into_iter()
            .find(|&node| self.graph.get(node).is_some_and(|node| node.id == id))
    }
}
