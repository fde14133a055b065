//! Prefabs: nodes that stand in for a whole external document.
//!
//! A document lists its prefabs in `extras.prefabs` and marks placeholder
//! nodes with `extras.prefab`. Each prefab document is loaded through the
//! same pipeline as the host, including its own prefabs, and the first root
//! of the result replaces every placeholder that references it.

use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use futures::{
    FutureExt,
    future::{self, LocalBoxFuture},
};

use crate::{
    backend::RenderBackend,
    data_structures::{
        gltf::Document,
        scene::{Scene, SceneTree},
        scene_graph::{NodeId, SceneGraph, SceneNode},
    },
    resources::{
        LoadContext,
        loader::load_assets,
        manifest::{Asset, LoadRequest, Manifest, Parser},
        prepare,
        transport::{base_url, join_url},
    },
};

/// Replaces every prefab placeholder below `roots` with a copy of the
/// prefab's first root node.
///
/// The copy takes over the placeholder's local transform and its place in
/// the parent's child list (or in `roots`). The placeholder subtree is
/// removed. Placeholders referencing unknown prefabs stay in place. Returns
/// the number of grafted prefabs.
pub fn graft(
    graph: &mut SceneGraph,
    roots: &mut [NodeId],
    prefabs: &BTreeMap<String, SceneTree>,
) -> usize {
    let placeholders: Vec<(NodeId, String)> = roots
        .iter()
        .flat_map(|&root| graph.flatten(root))
        .filter_map(|id| Some((id, graph.get(id)?.prefab()?.to_string())))
        .collect();

    let mut grafted = 0;
    for (placeholder, prefab_id) in placeholders {
        let Some(transform) = graph.get(placeholder).map(|node| node.transform) else {
            // removed together with an enclosing placeholder
            continue;
        };
        let Some(prefab) = prefabs.get(&prefab_id) else {
            log::warn!("prefab \"{prefab_id}\" is not loaded, keeping its placeholder");
            continue;
        };
        let Some(&source) = prefab.nodes.first() else {
            log::warn!("prefab \"{prefab_id}\" has no nodes");
            continue;
        };
        let Some(copy) = graph.deep_clone(&prefab.graph, source, &mut transfer) else {
            continue;
        };
        if let Some(node) = graph.get_mut(copy) {
            node.transform = transform;
        }

        if !graph.replace(placeholder, copy) {
            if let Some(slot) = roots.iter_mut().find(|root| **root == placeholder) {
                *slot = copy;
            }
        }
        graph.remove_subtree(placeholder);
        grafted += 1;
    }
    grafted
}

fn transfer(new: &mut SceneNode, old: &SceneNode) {
    new.meshes = old.meshes.clone();
    new.skeletons = old.skeletons.clone();
    new.skin = old.skin.clone();
    new.extras = old.extras.clone();
}

/// Loads the prefabs of the host document and grafts them into the scene.
/// Marks the scene dirty when anything was grafted.
pub(crate) fn graft_prefabs<B: RenderBackend + 'static>(
    context: LoadContext<B>,
    scene: Rc<RefCell<Scene<B>>>,
    document: Rc<Document>,
    base: String,
) -> LocalBoxFuture<'static, ()> {
    async move {
        let resources = load_prefabs(context, scene.clone(), document, base).await;
        {
            let mut guard = scene.borrow_mut();
            let scene = &mut *guard;
            let grafted = graft(&mut scene.graph, &mut scene.nodes, &scene.prefabs);
            if grafted > 0 {
                log::debug!("grafted {grafted} prefabs into scene \"{}\"", scene.name);
                scene.dirty = true;
            }
        }
        resources.await;
    }
    .boxed_local()
}

/// Loads every prefab `document` declares into `scene.prefabs`.
///
/// Resolves once all prefab trees are complete, with their own prefabs
/// grafted. The returned future loads their textures and buffers.
fn load_prefabs<B: RenderBackend + 'static>(
    context: LoadContext<B>,
    scene: Rc<RefCell<Scene<B>>>,
    document: Rc<Document>,
    base: String,
) -> LocalBoxFuture<'static, LocalBoxFuture<'static, ()>> {
    async move {
        let Some(prefabs) = document.extras.as_ref().map(|extras| &extras.prefabs) else {
            return future::ready(()).boxed_local();
        };
        if prefabs.is_empty() {
            return future::ready(()).boxed_local();
        }

        let mut manifest = Manifest::new();
        let mut urls = BTreeMap::new();
        for (id, prefab) in prefabs {
            let src = join_url(&base, &prefab.uri);
            manifest.insert(id.as_str(), LoadRequest::new(src.as_str()).parser(Parser::json()));
            urls.insert(id.clone(), src);
        }
        let assets = match load_assets(&*context.transport, manifest).await {
            Ok(assets) => assets,
            Err(e) => {
                log::error!("could not load prefabs: {e}");
                return future::ready(()).boxed_local();
            }
        };

        let loads: Vec<_> = assets
            .into_iter()
            .filter_map(|(id, asset)| {
                let url = urls.remove(&id)?;
                Some(load_prefab(context.clone(), scene.clone(), id, asset, url))
            })
            .collect();
        let resources: Vec<_> = future::join_all(loads).await.into_iter().flatten().collect();
        future::join_all(resources).map(|_| ()).boxed_local()
    }
    .boxed_local()
}

fn load_prefab<B: RenderBackend + 'static>(
    context: LoadContext<B>,
    scene: Rc<RefCell<Scene<B>>>,
    id: String,
    asset: Asset,
    url: String,
) -> LocalBoxFuture<'static, Option<LocalBoxFuture<'static, ()>>> {
    async move {
        let document = match asset.into_json().map(Document::from_value) {
            Some(Ok(document)) => Rc::new(document),
            Some(Err(e)) => {
                log::error!("prefab \"{id}\" at {url} is not a glTF document: {e}");
                return None;
            }
            None => {
                log::error!("prefab \"{id}\" at {url} is not JSON");
                return None;
            }
        };
        let base = base_url(&url).to_string();
        let (mut tree, resources) = prepare(&context, &scene, document.clone(), &base);
        let nested = load_prefabs(context, scene.clone(), document, base).await;

        let mut guard = scene.borrow_mut();
        let scene = &mut *guard;
        graft(&mut tree.graph, &mut tree.nodes, &scene.prefabs);
        log::debug!("prefab \"{id}\" loaded from {url}");
        scene.prefabs.insert(id, tree);

        Some(future::join(resources, nested).map(|_| ()).boxed_local())
    }
    .boxed_local()
}
