//! Technique and program registry.
//!
//! Every scene owns one registry. It starts out with the built-in `diffuse`
//! and `diffuse_skinning` entries and every loaded document overlays its own
//! definitions by name. Entries are never removed.

use std::collections::BTreeMap;

use crate::data_structures::gltf::{
    Document, Program, Technique, TechniqueParameter,
    gl::{FLOAT, FLOAT_MAT4, FLOAT_VEC2, FLOAT_VEC3, FLOAT_VEC4, SAMPLER_2D},
};

pub const DIFFUSE: &str = "diffuse";
pub const DIFFUSE_SKINNING: &str = "diffuse_skinning";

const DIFFUSE_VERTEX_SHADER: &str = r#"
precision mediump float;
uniform mat4 model, view, projection;

attribute vec3 a_position;
attribute vec3 a_normal;
attribute vec2 a_uv0;

varying vec2 v_uv0;

void main() {
  v_uv0 = a_uv0;
  gl_Position = projection * view * model * vec4(a_position, 1);
}
"#;

const DIFFUSE_SKINNING_VERTEX_SHADER: &str = r#"
precision mediump float;
uniform mat4 model, view, projection;

attribute vec3 a_position;
attribute vec3 a_normal;
attribute vec2 a_uv0;
attribute vec4 a_weight;
attribute vec4 a_joint;

uniform sampler2D u_bonesTexture;
uniform float u_bonesTextureSize;

varying vec2 v_uv0;

mat4 getBoneMatrix(const in float i) {
  float size = u_bonesTextureSize;
  float j = i * 4.0;
  float x = mod(j, size);
  float y = floor(j / size);

  float dx = 1.0 / size;
  float dy = 1.0 / size;

  y = dy * (y + 0.5);

  vec4 v1 = texture2D(u_bonesTexture, vec2(dx * (x + 0.5), y));
  vec4 v2 = texture2D(u_bonesTexture, vec2(dx * (x + 1.5), y));
  vec4 v3 = texture2D(u_bonesTexture, vec2(dx * (x + 2.5), y));
  vec4 v4 = texture2D(u_bonesTexture, vec2(dx * (x + 3.5), y));

  return mat4(v1, v2, v3, v4);
}

void main() {
  v_uv0 = a_uv0;
  mat4 matSkin =
    getBoneMatrix(a_joint.x) * a_weight.x +
    getBoneMatrix(a_joint.y) * a_weight.y +
    getBoneMatrix(a_joint.z) * a_weight.z +
    getBoneMatrix(a_joint.w) * a_weight.w;

  gl_Position = projection * view * model * matSkin * vec4(a_position, 1);
}
"#;

const DIFFUSE_FRAGMENT_SHADER: &str = r#"
#extension GL_OES_standard_derivatives : enable

precision mediump float;
uniform sampler2D u_mainTexture;

varying vec2 v_uv0;

void main () {
  gl_FragColor = texture2D( u_mainTexture, v_uv0 );

  if (!gl_FrontFacing) {
    gl_FragColor *= 0.05;
  }
}
"#;

/// Techniques and programs available to a scene, keyed by name.
#[derive(Clone, Debug)]
pub struct TechniqueRegistry {
    techniques: BTreeMap<String, Technique>,
    programs: BTreeMap<String, Program>,
}

impl TechniqueRegistry {
    /// A registry holding only the built-in definitions.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.insert_program(DIFFUSE, diffuse_program());
        registry.insert_program(DIFFUSE_SKINNING, diffuse_skinning_program());
        registry.insert_technique(DIFFUSE, diffuse_technique());
        registry.insert_technique(DIFFUSE_SKINNING, diffuse_skinning_technique());
        registry
    }

    /// A registry without the built-ins.
    pub fn empty() -> Self {
        Self {
            techniques: BTreeMap::new(),
            programs: BTreeMap::new(),
        }
    }

    pub fn insert_technique(&mut self, name: &str, technique: Technique) -> Option<Technique> {
        self.techniques.insert(name.to_string(), technique)
    }

    pub fn insert_program(&mut self, name: &str, program: Program) -> Option<Program> {
        self.programs.insert(name.to_string(), program)
    }

    /// Overlays the document's programs and techniques, shadowing entries
    /// with the same name.
    pub fn overlay(&mut self, document: &Document) {
        for (name, program) in &document.programs {
            if self.insert_program(name, program.clone()).is_some() {
                log::debug!("program \"{name}\" shadowed by document definition");
            }
        }
        for (name, technique) in &document.techniques {
            if self.insert_technique(name, technique.clone()).is_some() {
                log::debug!("technique \"{name}\" shadowed by document definition");
            }
        }
    }

    pub fn technique(&self, name: &str) -> Option<&Technique> {
        self.techniques.get(name)
    }

    pub fn program(&self, name: &str) -> Option<&Program> {
        self.programs.get(name)
    }

    pub fn techniques(&self) -> impl Iterator<Item = (&String, &Technique)> {
        self.techniques.iter()
    }

    pub fn programs(&self) -> impl Iterator<Item = (&String, &Program)> {
        self.programs.iter()
    }

    /// Looks up a technique together with the program it runs.
    pub fn resolve(&self, technique: &str) -> Option<(&Technique, &Program)> {
        let technique = self.techniques.get(technique)?;
        let program = self.programs.get(&technique.program)?;
        Some((technique, program))
    }
}

impl Default for TechniqueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn diffuse_program() -> Program {
    Program {
        attributes: ["a_position", "a_normal", "a_uv0"].map(String::from).to_vec(),
        vertex_shader: DIFFUSE_VERTEX_SHADER.to_string(),
        fragment_shader: DIFFUSE_FRAGMENT_SHADER.to_string(),
    }
}

fn diffuse_skinning_program() -> Program {
    Program {
        attributes: ["a_position", "a_normal", "a_uv0", "a_joint", "a_weight"]
            .map(String::from)
            .to_vec(),
        vertex_shader: DIFFUSE_SKINNING_VERTEX_SHADER.to_string(),
        fragment_shader: DIFFUSE_FRAGMENT_SHADER.to_string(),
    }
}

fn common_parameters() -> BTreeMap<String, TechniqueParameter> {
    [
        ("position", TechniqueParameter::new(FLOAT_VEC3, Some("POSITION"))),
        ("normal", TechniqueParameter::new(FLOAT_VEC3, Some("NORMAL"))),
        ("uv0", TechniqueParameter::new(FLOAT_VEC2, Some("TEXCOORD_0"))),
        ("model", TechniqueParameter::new(FLOAT_MAT4, Some("MODEL"))),
        ("view", TechniqueParameter::new(FLOAT_MAT4, Some("VIEW"))),
        ("projection", TechniqueParameter::new(FLOAT_MAT4, Some("PROJECTION"))),
        ("mainTexture", TechniqueParameter::new(SAMPLER_2D, None)),
    ]
    .into_iter()
    .map(|(name, parameter)| (name.to_string(), parameter))
    .collect()
}

fn pairs(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn diffuse_technique() -> Technique {
    Technique {
        name: Some(DIFFUSE.to_string()),
        program: DIFFUSE.to_string(),
        parameters: common_parameters(),
        attributes: pairs(&[
            ("a_position", "position"),
            ("a_normal", "normal"),
            ("a_uv0", "uv0"),
        ]),
        // view and projection are supplied by the renderer per frame
        uniforms: pairs(&[("model", "model"), ("u_mainTexture", "mainTexture")]),
    }
}

fn diffuse_skinning_technique() -> Technique {
    let mut parameters = common_parameters();
    parameters.insert("joint".into(), TechniqueParameter::new(FLOAT_VEC4, Some("JOINT")));
    parameters.insert("weight".into(), TechniqueParameter::new(FLOAT_VEC4, Some("WEIGHT")));
    parameters.insert("bonesTexture".into(), TechniqueParameter::new(SAMPLER_2D, None));
    parameters.insert("bonesTextureSize".into(), TechniqueParameter::new(FLOAT, None));

    Technique {
        name: Some(DIFFUSE_SKINNING.to_string()),
        program: DIFFUSE_SKINNING.to_string(),
        parameters,
        attributes: pairs(&[
            ("a_position", "position"),
            ("a_normal", "normal"),
            ("a_uv0", "uv0"),
            ("a_joint", "joint"),
            ("a_weight", "weight"),
        ]),
        uniforms: pairs(&[
            ("model", "model"),
            ("u_bonesTexture", "bonesTexture"),
            ("u_bonesTextureSize", "bonesTextureSize"),
            ("u_mainTexture", "mainTexture"),
        ]),
    }
}
