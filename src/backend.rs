//! Rendering backend capabilities.
//!
//! The loader never talks to a graphics API directly. Everything it needs
//! from the GPU side goes through [`RenderBackend`]: buffer and texture
//! creation, uploads, and compiling a technique into a draw command whose
//! per-draw inputs are filled from a [`crate::render::DrawData`] record.

use image::RgbaImage;

use crate::data_structures::gltf::{Program, Technique};

/// Sampling state used when a decoded image is uploaded into a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureOptions {
    pub wrap_repeat: bool,
    pub mag_linear: bool,
    pub mipmap: bool,
    pub flip_y: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            wrap_repeat: true,
            mag_linear: true,
            mipmap: true,
            flip_y: true,
        }
    }
}

/// Face culling for a compiled command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cull {
    None,
    Back,
    Front,
}

/// Everything a backend needs to compile the draw command of one technique.
///
/// Attribute and uniform inputs are deferred: `attribute_props` and
/// `uniform_props` name the entries of the per-draw [`crate::render::DrawData`]
/// that will feed them (`attributes.<name>` / `uniforms.<name>`).
/// `primitive`, `offset`, `count` and `elements` are deferred the same way.
#[derive(Clone, Debug)]
pub struct CommandDescriptor {
    pub technique: String,
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub cull: Cull,
    pub attribute_props: Vec<String>,
    pub uniform_props: Vec<String>,
}

impl CommandDescriptor {
    pub fn new(name: &str, technique: &Technique, program: &Program) -> Self {
        Self {
            technique: name.to_string(),
            vertex_shader: program.vertex_shader.clone(),
            fragment_shader: program.fragment_shader.clone(),
            cull: Cull::Back,
            attribute_props: technique
                .attributes
                .keys()
                .map(|name| format!("attributes.{name}"))
                .collect(),
            uniform_props: technique
                .uniforms
                .keys()
                .map(|name| format!("uniforms.{name}"))
                .collect(),
        }
    }
}

/// GPU capabilities the scene loader consumes.
///
/// Handles are cheap to clone; clones refer to the same GPU object.
pub trait RenderBackend {
    type Buffer: Clone;
    type Texture: Clone;
    type Command;

    /// Allocates a vertex buffer of `byte_length` bytes. Contents arrive later.
    fn create_buffer(&self, byte_length: usize) -> Self::Buffer;

    /// Allocates an index buffer of `byte_length` bytes. Contents arrive later.
    fn create_element_buffer(&self, byte_length: usize) -> Self::Buffer;

    fn write_buffer(&self, buffer: &Self::Buffer, data: &[u8]);

    /// Creates an empty texture whose image is uploaded once it arrives.
    fn create_texture(&self) -> Self::Texture;

    fn write_texture(&self, texture: &Self::Texture, image: &RgbaImage, options: &TextureOptions);

    fn compile_command(&self, descriptor: &CommandDescriptor) -> anyhow::Result<Self::Command>;
}
