//! The glTF 1.0 JSON document model.
//!
//! Only the parts needed to resolve references are modelled. Unknown fields
//! are ignored and no schema validation happens beyond what serde needs to
//! read the document.

use std::collections::BTreeMap;

use serde::Deserialize;

/// WebGL enum values used by glTF 1.0 documents.
pub mod gl {
    pub const POINTS: u32 = 0;
    pub const LINES: u32 = 1;
    pub const LINE_LOOP: u32 = 2;
    pub const LINE_STRIP: u32 = 3;
    pub const TRIANGLES: u32 = 4;
    pub const TRIANGLE_STRIP: u32 = 5;
    pub const TRIANGLE_FAN: u32 = 6;

    pub const BYTE: u32 = 5120;
    pub const UNSIGNED_BYTE: u32 = 5121;
    pub const SHORT: u32 = 5122;
    pub const UNSIGNED_SHORT: u32 = 5123;
    pub const FLOAT: u32 = 5126;

    pub const FLOAT_VEC2: u32 = 35664;
    pub const FLOAT_VEC3: u32 = 35665;
    pub const FLOAT_VEC4: u32 = 35666;
    pub const FLOAT_MAT4: u32 = 35676;
    pub const SAMPLER_2D: u32 = 35678;

    pub const ARRAY_BUFFER: u32 = 34962;
    pub const ELEMENT_ARRAY_BUFFER: u32 = 34963;
}

/// A parsed glTF 1.0 document. All top level collections are keyed by id.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub scene: Option<String>,
    #[serde(default)]
    pub scenes: BTreeMap<String, SceneDef>,
    #[serde(default)]
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub meshes: BTreeMap<String, Mesh>,
    #[serde(default)]
    pub materials: BTreeMap<String, Material>,
    #[serde(default)]
    pub accessors: BTreeMap<String, Accessor>,
    #[serde(default)]
    pub buffer_views: BTreeMap<String, BufferView>,
    #[serde(default)]
    pub buffers: BTreeMap<String, Buffer>,
    #[serde(default)]
    pub textures: BTreeMap<String, Texture>,
    #[serde(default)]
    pub images: BTreeMap<String, Image>,
    #[serde(default)]
    pub programs: BTreeMap<String, Program>,
    #[serde(default)]
    pub techniques: BTreeMap<String, Technique>,
    #[serde(default)]
    pub extras: Option<DocumentExtras>,
}

impl Document {
    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// The scene the document marks as default, falling back to the first one.
    pub fn default_scene(&self) -> Option<(&String, &SceneDef)> {
        self.scene
            .as_ref()
            .and_then(|id| self.scenes.get_key_value(id))
            .or_else(|| self.scenes.iter().next())
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SceneDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub translation: Option<[f32; 3]>,
    #[serde(default)]
    pub rotation: Option<[f32; 4]>,
    #[serde(default)]
    pub scale: Option<[f32; 3]>,
    #[serde(default)]
    pub meshes: Option<Vec<String>>,
    #[serde(default)]
    pub skeletons: Option<Vec<String>>,
    #[serde(default)]
    pub skin: Option<String>,
    #[serde(default)]
    pub joint_name: Option<String>,
    #[serde(default)]
    pub extras: Option<NodeExtras>,
}

/// Vendor extras on a node. `prefab` marks the node as a prefab placeholder.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct NodeExtras {
    #[serde(default)]
    pub prefab: Option<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DocumentExtras {
    #[serde(default)]
    pub prefabs: BTreeMap<String, PrefabRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PrefabRef {
    pub uri: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Mesh {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub primitives: Vec<Primitive>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Primitive {
    /// Semantic (`POSITION`, `NORMAL`, ...) to accessor id.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub indices: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub mode: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Material {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub technique: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, ParameterValue>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accessor {
    pub buffer_view: String,
    #[serde(default)]
    pub byte_offset: usize,
    #[serde(default)]
    pub byte_stride: usize,
    pub component_type: u32,
    pub count: usize,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferView {
    pub buffer: String,
    #[serde(default)]
    pub byte_offset: usize,
    #[serde(default)]
    pub byte_length: usize,
    #[serde(default)]
    pub target: Option<u32>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buffer {
    pub uri: String,
    #[serde(default)]
    pub byte_length: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Texture {
    pub source: String,
    #[serde(default)]
    pub sampler: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Image {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A shader program. Shader fields hold GLSL source text.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(default)]
    pub attributes: Vec<String>,
    #[serde(default)]
    pub vertex_shader: String,
    #[serde(default)]
    pub fragment_shader: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Technique {
    #[serde(default)]
    pub name: Option<String>,
    pub program: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, TechniqueParameter>,
    /// Program attribute name to parameter name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Program uniform name to parameter name.
    #[serde(default)]
    pub uniforms: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TechniqueParameter {
    #[serde(rename = "type")]
    pub kind: u32,
    #[serde(default)]
    pub semantic: Option<String>,
    #[serde(default)]
    pub value: Option<ParameterValue>,
}

impl TechniqueParameter {
    pub fn new(kind: u32, semantic: Option<&str>) -> Self {
        Self {
            kind,
            semantic: semantic.map(str::to_string),
            value: None,
        }
    }

    pub fn is_sampler(&self) -> bool {
        self.kind == gl::SAMPLER_2D
    }
}

/// A literal material or parameter value.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Number(f32),
    Boolean(bool),
    Text(String),
    Numbers(Vec<f32>),
    Booleans(Vec<bool>),
    Texts(Vec<String>),
}

impl ParameterValue {
    /// The referenced id when the value names another object (e.g. a texture).
    pub fn as_id(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(id) => Some(id),
            _ => None,
        }
    }
}
