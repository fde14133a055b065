//! Data structures: the glTF document model, scene graphs and scenes.
//!
//! - `gltf` is the serde model of a glTF 1.0 document
//! - `technique` holds the technique/program registry with the built-ins
//! - `transform` is the local transform of a node
//! - `scene_graph` enables hierarchical scene organization
//! - `scene` holds loaded scenes and the node materializer
//! - `pool` hands out per-frame matrix buffers

pub mod gltf;
pub mod pool;
pub mod scene;
pub mod scene_graph;
pub mod technique;
pub mod transform;
