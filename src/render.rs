//! Per-frame draw data.
//!
//! This module turns scene nodes into [`DrawData`] records: everything a
//! compiled draw command needs for one glTF primitive. Attribute and uniform
//! entries are keyed by the names the command was compiled with
//! (see [`crate::backend::CommandDescriptor`]).
//!
//! # Key types
//!
//! - [`DrawData`] holds topology, attribute bindings, uniforms and indices
//! - [`ElementBinding`] holds the index buffer range of an indexed primitive
//!
//! Building draw data never fails hard. Missing attributes are skipped with a
//! warning and meshes that are not known yet are skipped silently, so a scene
//! can be drawn while its resources are still arriving.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
};

use crate::{
    backend::RenderBackend,
    data_structures::{
        gltf::Primitive,
        pool::{MatrixPool, PooledMatrix},
        scene::Scene,
        scene_graph::NodeId,
        transform::flatten_matrix,
    },
    resolver::{self, AttributeBinding, Topology, UniformValue},
};

/// Name of the uniform receiving the node's world matrix.
pub const MODEL_UNIFORM: &str = "model";

/// Uniform value of a draw: a literal, a texture or a pooled matrix.
pub type Uniform<B> = UniformValue<<B as RenderBackend>::Texture, PooledMatrix>;

/// Index buffer range of an indexed primitive.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementBinding<Buf> {
    pub buffer: Buf,
    pub offset: usize,
    pub count: usize,
}

/// Input of one draw command invocation.
pub struct DrawData<B: RenderBackend> {
    /// Technique id, which is also the key of the draw command.
    pub technique: String,
    pub primitive: Topology,
    pub attributes: BTreeMap<String, AttributeBinding<B::Buffer>>,
    pub uniforms: BTreeMap<String, Uniform<B>>,
    pub elements: Option<ElementBinding<B::Buffer>>,
}

impl<B: RenderBackend> Debug for DrawData<B>
where
    B::Buffer: Debug,
    B::Texture: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrawData")
            .field("technique", &self.technique)
            .field("primitive", &self.primitive)
            .field("attributes", &self.attributes)
            .field("uniforms", &self.uniforms)
            .field("elements", &self.elements)
            .finish()
    }
}

/// Builds the draw data of `primitive` as drawn by `node`.
///
/// The node's world matrix is written into a buffer taken from `pool` and
/// bound as the `model` uniform. Returns `None` when the material or its
/// technique cannot be resolved.
pub fn build_draw_data<B: RenderBackend>(
    scene: &Scene<B>,
    node: NodeId,
    primitive: &Primitive,
    pool: &mut MatrixPool,
) -> Option<DrawData<B>> {
    if !scene.graph.contains(node) {
        return None;
    }
    let Some(material_id) = primitive.material.as_deref() else {
        log::warn!("primitive without material cannot be drawn");
        return None;
    };
    let resolved = resolver::resolve_material(scene, material_id)?;
    let technique = resolved.technique;

    let mut attributes = BTreeMap::new();
    for attribute in &resolved.program.attributes {
        let Some(parameter) = technique
            .attributes
            .get(attribute)
            .and_then(|name| technique.parameters.get(name))
        else {
            log::warn!(
                "attribute \"{attribute}\" is not declared by technique \"{}\"",
                resolved.technique_id
            );
            continue;
        };
        let semantic = parameter.semantic.as_deref().unwrap_or_default();
        let Some(accessor) = primitive.attributes.get(semantic) else {
            log::warn!("can not find attribute by semantic {semantic}");
            continue;
        };
        if let Some(binding) = resolver::resolve_accessor(scene, accessor) {
            attributes.insert(attribute.clone(), binding);
        }
    }

    let mut uniforms = BTreeMap::new();
    for (uniform, parameter_name) in &technique.uniforms {
        let Some(parameter) = technique.parameters.get(parameter_name) else {
            continue;
        };
        if let Some(value) =
            resolver::resolve_uniform(scene, resolved.material, parameter_name, parameter)
        {
            uniforms.insert(uniform.clone(), value);
        }
    }

    let elements = primitive.indices.as_deref().and_then(|indices| {
        let accessor = scene.accessors.get(indices)?;
        let buffer = scene.buffers.get(&accessor.buffer_view)?.gpu()?.clone();
        Some(ElementBinding {
            buffer,
            offset: accessor.byte_offset,
            count: accessor.count,
        })
    });

    let model = pool.acquire();
    model.set(flatten_matrix(&scene.graph.world_matrix(node)));
    uniforms.insert(MODEL_UNIFORM.to_string(), UniformValue::Matrix(model));

    Some(DrawData {
        technique: resolved.technique_id.to_string(),
        primitive: Topology::from_mode(primitive.mode),
        attributes,
        uniforms,
        elements,
    })
}

/// Builds the draw data of every primitive of every mesh of `nodes`, paired
/// with the command that draws it.
///
/// Reset `pool` once per frame, before calling this.
pub fn collect_draws<'a, B: RenderBackend>(
    scene: &'a Scene<B>,
    nodes: &[NodeId],
    pool: &mut MatrixPool,
) -> Vec<(&'a B::Command, DrawData<B>)> {
    let mut draws = Vec::new();
    for &id in nodes {
        let Some(node) = scene.graph.get(id) else {
            continue;
        };
        for mesh in node.meshes.iter().filter_map(|mesh| scene.meshes.get(mesh)) {
            for primitive in &mesh.primitives {
                let Some(data) = build_draw_data(scene, id, primitive, pool) else {
                    continue;
                };
                match scene.commands.get(&data.technique) {
                    Some(command) => draws.push((command, data)),
                    None => log::warn!("no draw command for technique \"{}\"", data.technique),
                }
            }
        }
    }
    draws
}
