//! Reference resolution.
//!
//! Follows the indirections of a glTF document: accessors to buffer views to
//! buffers, and materials to techniques to programs. Results are plain
//! descriptors that do not depend on a particular renderer.

use crate::{
    backend::RenderBackend,
    data_structures::{
        gltf::{Material, ParameterValue, Program, Technique, TechniqueParameter, gl},
        scene::Scene,
    },
};

/// Number of components of an accessor `type`. Unknown types count as scalars.
pub fn component_count(kind: &str) -> usize {
    match kind {
        "SCALAR" => 1,
        "VEC2" => 2,
        "VEC3" => 3,
        "VEC4" => 4,
        "MAT2" => 4,
        "MAT3" => 9,
        "MAT4" => 16,
        _ => 1,
    }
}

/// Primitive topology of a draw call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Topology {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    #[default]
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl Topology {
    /// Maps a glTF primitive `mode`. Missing or unknown modes draw triangles.
    pub fn from_mode(mode: Option<u32>) -> Self {
        match mode {
            Some(gl::POINTS) => Topology::Points,
            Some(gl::LINES) => Topology::Lines,
            Some(gl::LINE_LOOP) => Topology::LineLoop,
            Some(gl::LINE_STRIP) => Topology::LineStrip,
            Some(gl::TRIANGLE_STRIP) => Topology::TriangleStrip,
            Some(gl::TRIANGLE_FAN) => Topology::TriangleFan,
            _ => Topology::Triangles,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topology::Points => "points",
            Topology::Lines => "lines",
            Topology::LineLoop => "line loop",
            Topology::LineStrip => "line strip",
            Topology::Triangles => "triangles",
            Topology::TriangleStrip => "triangle strip",
            Topology::TriangleFan => "triangle fan",
        }
    }
}

/// Where the data of one vertex attribute lives.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeBinding<Buf> {
    pub buffer: Buf,
    pub offset: usize,
    pub stride: usize,
    pub component_type: u32,
    pub size: usize,
}

/// Resolves `accessor` to the GPU buffer of its buffer view.
///
/// Returns `None` for unknown accessors and for views that are not backed by
/// a GPU buffer.
pub fn resolve_accessor<B: RenderBackend>(
    scene: &Scene<B>,
    accessor: &str,
) -> Option<AttributeBinding<B::Buffer>> {
    let Some(source) = scene.accessors.get(accessor) else {
        log::warn!("unknown accessor \"{accessor}\"");
        return None;
    };
    let Some(buffer) = scene
        .buffers
        .get(&source.buffer_view)
        .and_then(|slot| slot.gpu())
    else {
        log::warn!(
            "accessor \"{accessor}\" uses buffer view \"{}\" which has no GPU buffer",
            source.buffer_view
        );
        return None;
    };
    Some(AttributeBinding {
        buffer: buffer.clone(),
        offset: source.byte_offset,
        stride: source.byte_stride,
        component_type: source.component_type,
        size: component_count(&source.kind),
    })
}

/// A material with the technique and program it is drawn with.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedMaterial<'a> {
    pub material: &'a Material,
    pub technique_id: &'a str,
    pub technique: &'a Technique,
    pub program: &'a Program,
}

pub fn resolve_material<'a, B: RenderBackend>(
    scene: &'a Scene<B>,
    material: &str,
) -> Option<ResolvedMaterial<'a>> {
    let Some(source) = scene.materials.get(material) else {
        log::warn!("unknown material \"{material}\"");
        return None;
    };
    let Some(technique_id) = source.technique.as_deref() else {
        log::warn!("material \"{material}\" has no technique");
        return None;
    };
    let Some((technique, program)) = scene.registry.resolve(technique_id) else {
        log::warn!("technique \"{technique_id}\" of material \"{material}\" cannot be resolved");
        return None;
    };
    Some(ResolvedMaterial {
        material: source,
        technique_id,
        technique,
        program,
    })
}

/// The value a uniform is set to for one draw.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue<Tex, Mat> {
    Literal(ParameterValue),
    Texture(Tex),
    Matrix(Mat),
}

/// Resolves the value of technique parameter `parameter` for `material`.
///
/// The material's own value wins over the parameter default. Sampler values
/// name a texture and resolve to its handle. `None` leaves the uniform unset.
pub fn resolve_uniform<B: RenderBackend, Mat>(
    scene: &Scene<B>,
    material: &Material,
    parameter_name: &str,
    parameter: &TechniqueParameter,
) -> Option<UniformValue<B::Texture, Mat>> {
    let value = material
        .values
        .get(parameter_name)
        .or(parameter.value.as_ref())?;
    if !parameter.is_sampler() {
        return Some(UniformValue::Literal(value.clone()));
    }
    let texture = value.as_id().and_then(|id| scene.textures.get(id));
    if texture.is_none() {
        log::debug!("sampler \"{parameter_name}\" references an unknown texture {value:?}");
    }
    texture.cloned().map(UniformValue::Texture)
}
