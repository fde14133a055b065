//! Loading glTF 1.0 scenes.
//!
//! [`GltfLoader::load`] fetches a document, materializes its node tree and
//! returns as soon as the tree exists. Textures, buffers and prefabs keep
//! loading in [`LoadedScene::pending`], each through its own loader session,
//! and fill the scene in place when they arrive. A failing resource session
//! is logged and never affects the scene that is already returned.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use futures::{
    FutureExt,
    future::{self, LocalBoxFuture},
};
use instant::Instant;

use crate::{
    backend::{RenderBackend, TextureOptions},
    data_structures::{
        gltf::{Document, gl},
        scene::{BufferSlot, Scene, SceneTree},
        technique::TechniqueRegistry,
    },
    error::{LoadError, LoadResult},
    resources::{
        loader::load_assets,
        manifest::{Asset, LoadRequest, Manifest, Parser, RequestType},
        transport::{Transport, base_url, join_url},
    },
};

pub mod loader;
pub mod manifest;
pub mod prefab;
pub mod transport;

/// Backend, transport and upload settings shared by every load of a scene.
pub(crate) struct LoadContext<B: RenderBackend> {
    pub(crate) backend: Rc<B>,
    pub(crate) transport: Rc<dyn Transport>,
    pub(crate) texture_options: TextureOptions,
}

impl<B: RenderBackend> Clone for LoadContext<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            transport: self.transport.clone(),
            texture_options: self.texture_options,
        }
    }
}

/// A scene whose node tree is ready.
#[must_use = "the pending future has to be polled for textures, buffers and prefabs to load"]
pub struct LoadedScene<B: RenderBackend> {
    pub scene: Rc<RefCell<Scene<B>>>,
    /// Loads textures, buffers and prefabs. Spawn it or await it.
    pub pending: LocalBoxFuture<'static, ()>,
}

/// Loads glTF 1.0 documents into [`Scene`]s.
pub struct GltfLoader<B: RenderBackend> {
    context: LoadContext<B>,
    registry: TechniqueRegistry,
}

impl<B: RenderBackend + 'static> GltfLoader<B> {
    pub fn new(backend: Rc<B>, transport: Rc<dyn Transport>) -> Self {
        Self {
            context: LoadContext {
                backend,
                transport,
                texture_options: TextureOptions::default(),
            },
            registry: TechniqueRegistry::new(),
        }
    }

    /// Techniques and programs every scene starts with. Each scene gets its
    /// own copy, so documents never leak definitions into other scenes.
    pub fn with_registry(mut self, registry: TechniqueRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_texture_options(mut self, options: TextureOptions) -> Self {
        self.context.texture_options = options;
        self
    }

    /// Loads the document at `url`.
    ///
    /// Resolves once the node tree and the joints are materialized and every
    /// technique is compiled. Relative resource URIs resolve against the
    /// directory of `url`.
    pub async fn load(&self, url: &str) -> LoadResult<LoadedScene<B>> {
        let started = Instant::now();
        let document = Rc::new(fetch_document(&*self.context.transport, url).await?);
        let base = base_url(url).to_string();

        let scene = Rc::new(RefCell::new(Scene::new(self.registry.clone())));
        let (tree, resources) = prepare(&self.context, &scene, document.clone(), &base);
        scene.borrow_mut().set_tree(tree);
        log::info!("loaded scene from {url} in {:?}", started.elapsed());

        let prefabs = prefab::graft_prefabs(self.context.clone(), scene.clone(), document, base);
        let pending = future::join(resources, prefabs).map(|_| ()).boxed_local();
        Ok(LoadedScene { scene, pending })
    }
}

/// Fetches and parses a glTF document.
pub async fn fetch_document(transport: &dyn Transport, url: &str) -> LoadResult<Document> {
    let manifest = Manifest::new().with("json", LoadRequest::new(url).parser(Parser::json()));
    let json = load_assets(transport, manifest)
        .await?
        .remove("json")
        .and_then(Asset::into_json)
        .ok_or_else(|| LoadError::transport(url, "document is not JSON"))?;
    Ok(Document::from_value(json)?)
}

/// Runs the synchronous part of a document load against `scene`: overlays
/// the document definitions, compiles commands, creates texture and buffer
/// slots, and materializes the node tree.
///
/// Returns the tree and the future that fills the slots.
pub(crate) fn prepare<B: RenderBackend + 'static>(
    context: &LoadContext<B>,
    scene: &Rc<RefCell<Scene<B>>>,
    document: Rc<Document>,
    base: &str,
) -> (SceneTree, LocalBoxFuture<'static, ()>) {
    let (textures, (buffers, views)) = {
        let mut scene = scene.borrow_mut();
        scene.overlay(&document);
        scene.compile_commands(&*context.backend);
        (
            create_textures(&*context.backend, &mut *scene, &document, base),
            create_buffers(&*context.backend, &mut *scene, &document, base),
        )
    };
    let tree = SceneTree::materialize(document.clone());

    let resources = future::join(
        upload_textures(context.clone(), scene.clone(), textures),
        upload_buffers(context.clone(), scene.clone(), document, buffers, views),
    )
    .map(|_| ())
    .boxed_local();
    (tree, resources)
}

fn create_textures<B: RenderBackend>(
    backend: &B,
    scene: &mut Scene<B>,
    document: &Document,
    base: &str,
) -> Manifest {
    let mut manifest = Manifest::new();
    for (id, texture) in &document.textures {
        let Some(image) = document.images.get(&texture.source) else {
            log::warn!("texture \"{id}\" uses unknown image \"{}\"", texture.source);
            continue;
        };
        scene.textures.insert(id.clone(), backend.create_texture());
        manifest.insert(
            id.as_str(),
            LoadRequest::new(join_url(base, &image.uri)).kind(RequestType::Image),
        );
    }
    manifest
}

async fn upload_textures<B: RenderBackend>(
    context: LoadContext<B>,
    scene: Rc<RefCell<Scene<B>>>,
    manifest: Manifest,
) {
    if manifest.is_empty() {
        return;
    }
    let assets = match load_assets(&*context.transport, manifest).await {
        Ok(assets) => assets,
        Err(e) => {
            log::error!("could not load textures: {e}");
            return;
        }
    };
    let scene = scene.borrow();
    for (id, asset) in assets {
        let (Some(texture), Some(image)) = (scene.textures.get(&id), asset.into_image()) else {
            continue;
        };
        context
            .backend
            .write_texture(texture, &image.to_rgba8(), &context.texture_options);
    }
}

/// Creates a slot for every buffer view. Returns the buffer manifest and
/// the views of each buffer.
fn create_buffers<B: RenderBackend>(
    backend: &B,
    scene: &mut Scene<B>,
    document: &Document,
    base: &str,
) -> (Manifest, BTreeMap<String, Vec<String>>) {
    let mut manifest = Manifest::new();
    let mut views: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (id, buffer) in &document.buffers {
        manifest.insert(
            id.as_str(),
            LoadRequest::new(join_url(base, &buffer.uri)).kind(RequestType::Binary),
        );
    }
    for (id, view) in &document.buffer_views {
        let slot = match view.target {
            Some(gl::ARRAY_BUFFER) => BufferSlot::Gpu(backend.create_buffer(view.byte_length)),
            Some(gl::ELEMENT_ARRAY_BUFFER) => {
                BufferSlot::Gpu(backend.create_element_buffer(view.byte_length))
            }
            _ => BufferSlot::Raw(Vec::new()),
        };
        scene.buffers.insert(id.clone(), slot);
        views.entry(view.buffer.clone()).or_default().push(id.clone());
    }
    (manifest, views)
}

async fn upload_buffers<B: RenderBackend>(
    context: LoadContext<B>,
    scene: Rc<RefCell<Scene<B>>>,
    document: Rc<Document>,
    manifest: Manifest,
    views: BTreeMap<String, Vec<String>>,
) {
    if manifest.is_empty() {
        return;
    }
    let assets = match load_assets(&*context.transport, manifest).await {
        Ok(assets) => assets,
        Err(e) => {
            log::error!("could not load buffers: {e}");
            return;
        }
    };
    let mut scene = scene.borrow_mut();
    for (id, asset) in assets {
        let Some(bytes) = asset.as_bytes() else {
            continue;
        };
        for view_id in views.get(&id).into_iter().flatten() {
            let Some(view) = document.buffer_views.get(view_id) else {
                continue;
            };
            let range = view.byte_offset..view.byte_offset.saturating_add(view.byte_length);
            let Some(data) = bytes.get(range) else {
                log::warn!(
                    "buffer view \"{view_id}\" is out of range of buffer \"{id}\" ({} bytes)",
                    bytes.len()
                );
                continue;
            };
            match scene.buffers.get_mut(view_id) {
                Some(BufferSlot::Gpu(buffer)) => context.backend.write_buffer(buffer, data),
                Some(BufferSlot::Raw(raw)) => *raw = data.to_vec(),
                None => {}
            }
        }
    }
}
