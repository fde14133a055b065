//! flow-gltf
//!
//! Loads glTF 1.0 scenes (JSON document, binary buffers, images) for a
//! WebGL style rendering backend, natively and on WASM. Resources are
//! fetched asynchronously through small loader sessions, the document's
//! nodes become a hierarchical scene graph, prefab documents are grafted
//! into it as they arrive, and every frame the scene is turned into draw
//! data for precompiled commands.
//!
//! High-level modules
//! - `resources`: loader sessions, transports, the glTF pipeline and prefabs
//! - `data_structures`: document model, scene graph, scenes and pools
//! - `resolver`: accessor and material/technique/program resolution
//! - `render`: per-frame draw data
//! - `backend`: what the loader needs from a rendering backend
//! - `error`: error types of loading operations
//! - `platform`: logger setup and task spawning per target
//!

pub mod backend;
pub mod data_structures;
pub mod error;
pub mod platform;
pub mod render;
pub mod resolver;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use backend::{CommandDescriptor, Cull, RenderBackend, TextureOptions};
pub use data_structures::{
    pool::MatrixPool,
    scene::{BufferSlot, Scene, SceneTree},
    scene_graph::{NodeId, SceneGraph, SceneNode},
    technique::TechniqueRegistry,
};
pub use error::{LoadError, LoadResult};
pub use resources::{
    GltfLoader, LoadedScene,
    loader::{Assets, LoadConfig, LoadSession, LoaderState, load, load_assets},
    manifest::{Asset, LoadRequest, Manifest, Parser, RequestType},
    transport::{HttpTransport, Transport, TransportEvent},
};
#[cfg(not(target_arch = "wasm32"))]
pub use resources::transport::FileTransport;
