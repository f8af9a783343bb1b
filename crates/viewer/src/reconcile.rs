use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::Id;
use layers::{ImageryLayerCache, MapItem};
use runtime::{ListenerHandle, Observable};
use scene::{DataSource, ImageryLayer, Primitive, Scene};
use tracing::{debug, warn};

/// What one reconciliation pass changed on the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    pub reordered: usize,
    /// Imagery layers whose alpha or visibility changed.
    pub restyled: usize,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    pub fn changed(&self) -> bool {
        !self.is_noop()
    }
}

/// Makes the engine's collections match the desired map items.
///
/// Desired items arrive ordered topmost first. Each pass touches data
/// sources, then imagery layers, then primitives, and only issues the engine
/// calls needed to close the gap, so a pass over an unchanged set is free.
pub struct SceneReconciler {
    cache: ImageryLayerCache,
    previous_primitives: Vec<Id>,
    tileset_listeners: BTreeMap<Id, Vec<ListenerHandle>>,
    /// Tile error listeners keyed by imagery layer id.
    imagery_listeners: BTreeMap<Id, ListenerHandle>,
    tiles_loading: Observable<bool>,
}

impl SceneReconciler {
    /// `tiles_loading` is raised while any attached tileset streams tiles.
    pub fn new(tiles_loading: Observable<bool>) -> Self {
        Self {
            cache: ImageryLayerCache::new(),
            previous_primitives: Vec::new(),
            tileset_listeners: BTreeMap::new(),
            imagery_listeners: BTreeMap::new(),
            tiles_loading,
        }
    }

    pub fn cache_mut(&mut self) -> &mut ImageryLayerCache {
        &mut self.cache
    }

    pub fn tileset_listener_count(&self) -> usize {
        self.tileset_listeners.values().map(Vec::len).sum()
    }

    pub fn tile_error_listener_count(&self) -> usize {
        self.imagery_listeners.len()
    }

    pub fn reconcile(&mut self, scene: &dyn Scene, desired: &[(Id, MapItem)]) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        self.sync_data_sources(scene, desired, &mut summary);
        self.sync_imagery(scene, desired, &mut summary);
        self.sync_primitives(scene, desired, &mut summary);
        if summary.changed() {
            debug!(?summary, "scene reconciled");
        }
        summary
    }

    fn sync_data_sources(
        &mut self,
        scene: &dyn Scene,
        desired: &[(Id, MapItem)],
        summary: &mut ReconcileSummary,
    ) {
        let mut wanted: Vec<&Rc<DataSource>> = Vec::new();
        for ds in desired.iter().filter_map(|(_, item)| item.data_source()) {
            if !wanted.iter().any(|w| Rc::ptr_eq(w, ds)) {
                wanted.push(ds);
            }
        }

        let collection = scene.data_sources();
        for attached in collection.sources().iter().rev() {
            if !wanted.iter().any(|w| Rc::ptr_eq(w, attached)) {
                collection.remove(attached);
                summary.removed += 1;
            }
        }
        for ds in &wanted {
            if !collection.contains(ds) {
                collection.add(Rc::clone(ds));
                summary.added += 1;
            }
        }

        // Engine order is bottom to top, so it should be the desired order reversed.
        let attached: Vec<Id> = collection.sources().iter().map(|ds| ds.id()).collect();
        let expected: Vec<Id> = wanted.iter().rev().map(|ds| ds.id()).collect();
        if attached != expected {
            for ds in wanted.iter().rev() {
                if collection.index_of(ds) != Some(collection.len() - 1) {
                    collection.raise_to_top(ds);
                    summary.reordered += 1;
                }
            }
        }
    }

    fn sync_imagery(
        &mut self,
        scene: &dyn Scene,
        desired: &[(Id, MapItem)],
        summary: &mut ReconcileSummary,
    ) {
        self.cache.begin_pass();
        let mut wanted: Vec<Rc<ImageryLayer>> = Vec::new();
        for parts in desired.iter().filter_map(|(_, item)| item.imagery()) {
            let layer = self.cache.layer_for(parts);
            if parts.apply_to(&layer) {
                summary.restyled += 1;
            }
            if !wanted.iter().any(|w| Rc::ptr_eq(w, &layer)) {
                if let Some(handler) = &parts.tile_error_handler
                    && !self.imagery_listeners.contains_key(&layer.id())
                {
                    let handler = Rc::clone(handler);
                    let handle = layer.error_event().subscribe(move |error| handler(error));
                    self.imagery_listeners.insert(layer.id(), handle);
                }
                wanted.push(layer);
            }
        }

        let collection = scene.imagery_layers();
        for attached in collection.layers().iter().rev() {
            if !wanted.iter().any(|w| Rc::ptr_eq(w, attached)) {
                collection.remove(attached);
                self.release_tile_errors(attached.id());
                summary.removed += 1;
            }
        }

        // Walk from the bottom of the model so inserts land in increasing index order.
        let n = wanted.len();
        for (model_index, layer) in wanted.iter().enumerate().rev() {
            let target = n - model_index - 1;
            match collection.index_of(layer) {
                None => {
                    collection.add(Rc::clone(layer), Some(target));
                    summary.added += 1;
                }
                Some(current) if current > target => {
                    for _ in target..current {
                        collection.lower(layer);
                        summary.reordered += 1;
                    }
                }
                Some(current) => {
                    for _ in current..target {
                        collection.raise(layer);
                        summary.reordered += 1;
                    }
                }
            }
        }
        self.cache.end_pass();
    }

    fn sync_primitives(
        &mut self,
        scene: &dyn Scene,
        desired: &[(Id, MapItem)],
        summary: &mut ReconcileSummary,
    ) {
        let mut wanted: Vec<&Rc<Primitive>> = Vec::new();
        for p in desired.iter().filter_map(|(_, item)| item.primitive()) {
            if !wanted.iter().any(|w| w.id() == p.id()) {
                wanted.push(p);
            }
        }

        let collection = scene.primitives();
        let attached = collection.primitives();
        let previous = std::mem::take(&mut self.previous_primitives);
        for id in previous {
            if wanted.iter().any(|w| w.id() == id) {
                continue;
            }
            self.release_tileset(id);
            if let Some(primitive) = attached.iter().find(|p| p.id() == id) {
                collection.remove(primitive);
                summary.removed += 1;
            }
        }

        for primitive in &wanted {
            if collection.contains(primitive) {
                continue;
            }
            collection.add(Rc::clone(primitive));
            summary.added += 1;
            if let Some(events) = primitive.tileset_events() {
                let loading = self.tiles_loading.clone();
                let started = events.tile_load.subscribe(move |_| {
                    loading.set_if_changed(true);
                });
                let loading = self.tiles_loading.clone();
                let finished = events.all_tiles_loaded.subscribe(move |_| {
                    loading.set_if_changed(false);
                });
                self.tileset_listeners
                    .insert(primitive.id(), vec![started, finished]);
            }
        }
        self.previous_primitives = wanted.iter().map(|p| p.id()).collect();
    }

    fn release_tileset(&mut self, id: Id) {
        let Some(handles) = self.tileset_listeners.remove(&id) else {
            return;
        };
        for handle in handles {
            if let Err(err) = handle.remove() {
                warn!(%err, primitive = ?id, "failed to remove tileset listener");
            }
        }
        // Any tileset still loading raises the signal again on its next tile.
        self.tiles_loading.set_if_changed(false);
    }

    fn release_tile_errors(&mut self, layer: Id) {
        if let Some(handle) = self.imagery_listeners.remove(&layer)
            && let Err(err) = handle.remove()
        {
            warn!(%err, ?layer, "failed to remove tile error listener");
        }
    }

    /// Releases every tileset listener, tile error listener and cached layer.
    /// Safe to call twice.
    pub fn teardown(&mut self) {
        let ids: Vec<Id> = self.tileset_listeners.keys().copied().collect();
        for id in ids {
            self.release_tileset(id);
        }
        let layers: Vec<Id> = self.imagery_listeners.keys().copied().collect();
        for layer in layers {
            self.release_tile_errors(layer);
        }
        self.tiles_loading.set_if_changed(false);
        self.previous_primitives.clear();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::SceneReconciler;
    use foundation::Id;
    use layers::{ImageryParts, MapItem};
    use pretty_assertions::assert_eq;
    use runtime::{ListenerId, Observable};
    use scene::collection::CollectionOp;
    use scene::headless::{HeadlessScene, StaticImageryProvider};
    use scene::{DataSource, ImageryProvider, Primitive, Scene, TileCoords, TileLoadError};
    use std::cell::Cell;
    use std::rc::Rc;

    fn imagery(url: &str) -> MapItem {
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some(url)));
        MapItem::Imagery(ImageryParts::new(provider))
    }

    fn items(map_items: &[MapItem]) -> Vec<(Id, MapItem)> {
        map_items
            .iter()
            .enumerate()
            .map(|(i, m)| (Id::new(i as u64 + 1), m.clone()))
            .collect()
    }

    fn drain(scene: &HeadlessScene) -> usize {
        scene.imagery_layers().take_ops().len()
            + scene.data_sources().take_ops().len()
            + scene.primitives().take_ops().len()
    }

    fn imagery_urls(scene: &HeadlessScene) -> Vec<Option<String>> {
        scene
            .imagery_layers()
            .layers()
            .iter()
            .map(|l| l.provider().url())
            .collect()
    }

    #[test]
    fn second_pass_over_the_same_items_is_free() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let desired = items(&[
            imagery("top"),
            MapItem::DataSource(DataSource::new("a")),
            imagery("bottom"),
            MapItem::DataSource(DataSource::new("b")),
            MapItem::Primitive(Rc::new(Primitive::tileset("city"))),
        ]);

        let first = reconciler.reconcile(&scene, &desired);
        assert_eq!(first.added, 5);
        assert!(drain(&scene) > 0);

        let second = reconciler.reconcile(&scene, &desired);
        assert!(second.is_noop());
        assert_eq!(drain(&scene), 0);
    }

    #[test]
    fn imagery_model_index_maps_to_reversed_engine_index() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let layers = [imagery("a"), imagery("b"), imagery("c"), imagery("d")];

        reconciler.reconcile(&scene, &items(&layers));
        assert_eq!(
            imagery_urls(&scene),
            vec![Some("d".into()), Some("c".into()), Some("b".into()), Some("a".into())]
        );

        let reordered = [
            layers[2].clone(),
            layers[0].clone(),
            layers[3].clone(),
            layers[1].clone(),
        ];
        scene.imagery_layers().take_ops();
        let summary = reconciler.reconcile(&scene, &items(&reordered));
        assert_eq!(summary.added, 0);
        assert_eq!(summary.removed, 0);
        assert_eq!(
            imagery_urls(&scene),
            vec![Some("b".into()), Some("d".into()), Some("a".into()), Some("c".into())]
        );
        let ops = scene.imagery_layers().take_ops();
        assert!(ops.iter().all(|op| matches!(op, CollectionOp::Raise(_) | CollectionOp::Lower(_))));
    }

    #[test]
    fn alpha_changes_restyle_the_cached_layer() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some("a")));
        reconciler.reconcile(
            &scene,
            &items(&[MapItem::Imagery(ImageryParts::new(provider.clone()))]),
        );
        let summary = reconciler.reconcile(
            &scene,
            &items(&[MapItem::Imagery(ImageryParts::new(provider).with_alpha(0.5))]),
        );
        assert_eq!(summary.restyled, 1);
        assert_eq!(summary.added, 0);
        assert_eq!(scene.imagery_layers().layers()[0].alpha(), 0.5);
    }

    #[test]
    fn replacing_a_data_source_removes_one_and_adds_one() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let a = DataSource::new("a");
        let b = DataSource::new("b");

        reconciler.reconcile(&scene, &items(&[MapItem::DataSource(a.clone())]));
        scene.data_sources().take_ops();

        reconciler.reconcile(&scene, &items(&[MapItem::DataSource(b.clone())]));
        assert_eq!(
            scene.data_sources().take_ops(),
            vec![
                CollectionOp::Remove(a.id()),
                CollectionOp::Add {
                    id: b.id(),
                    index: 0
                },
            ]
        );

        reconciler.reconcile(&scene, &items(&[MapItem::DataSource(b)]));
        assert!(scene.data_sources().take_ops().is_empty());
    }

    #[test]
    fn first_data_source_ends_on_top() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let (a, b, c) = (DataSource::new("a"), DataSource::new("b"), DataSource::new("c"));
        reconciler.reconcile(
            &scene,
            &items(&[
                MapItem::DataSource(a.clone()),
                MapItem::DataSource(b.clone()),
                MapItem::DataSource(c.clone()),
            ]),
        );
        let names = |scene: &HeadlessScene| -> Vec<String> {
            scene
                .data_sources()
                .sources()
                .iter()
                .map(|ds| ds.name().to_string())
                .collect()
        };
        assert_eq!(names(&scene), vec!["c", "b", "a"]);

        let summary = reconciler.reconcile(
            &scene,
            &items(&[
                MapItem::DataSource(c),
                MapItem::DataSource(a),
                MapItem::DataSource(b),
            ]),
        );
        assert!(summary.reordered > 0);
        assert_eq!(names(&scene), vec!["b", "a", "c"]);
    }

    #[test]
    fn removed_tilesets_stop_driving_the_loading_signal() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let loading = Observable::new(false);
        let mut reconciler = SceneReconciler::new(loading.clone());
        let tileset = Rc::new(Primitive::tileset("city"));
        let with = items(&[MapItem::Primitive(tileset.clone())]);
        let events = tileset.tileset_events().unwrap();

        reconciler.reconcile(&scene, &with);
        events.tile_load.raise(&());
        assert!(loading.get());
        events.all_tiles_loaded.raise(&());
        assert!(!loading.get());

        events.tile_load.raise(&());
        reconciler.reconcile(&scene, &[]);
        assert!(!loading.get());
        assert!(!scene.primitives().contains(&tileset));
        assert_eq!(events.tile_load.listener_count(), 0);
        events.tile_load.raise(&());
        assert!(!loading.get());

        reconciler.reconcile(&scene, &with);
        assert_eq!(events.tile_load.listener_count(), 1);
        assert_eq!(events.all_tiles_loaded.listener_count(), 1);
        let version = loading.version();
        events.tile_load.raise(&());
        assert_eq!(loading.version(), version + 1);
        assert!(loading.get());
    }

    #[test]
    fn teardown_releases_listeners_once() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let loading = Observable::new(false);
        let mut reconciler = SceneReconciler::new(loading.clone());
        let tileset = Rc::new(Primitive::tileset("city"));
        reconciler.reconcile(&scene, &items(&[MapItem::Primitive(tileset.clone())]));
        tileset.tileset_events().unwrap().tile_load.raise(&());
        assert_eq!(reconciler.tileset_listener_count(), 2);

        reconciler.teardown();
        reconciler.teardown();
        assert_eq!(reconciler.tileset_listener_count(), 0);
        assert!(!loading.get());
        assert_eq!(tileset.tileset_events().unwrap().tile_load.listener_count(), 0);
    }

    #[test]
    fn failed_listener_removal_still_completes_the_pass() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let loading = Observable::new(false);
        let mut reconciler = SceneReconciler::new(loading.clone());
        let tileset = Rc::new(Primitive::tileset("city"));
        let events = tileset.tileset_events().unwrap();
        reconciler.reconcile(&scene, &items(&[MapItem::Primitive(tileset.clone())]));
        events.tile_load.raise(&());
        assert!(loading.get());

        // Someone else detached the tile_load listener first.
        events.tile_load.remove_listener(ListenerId(1)).unwrap();

        let replacement = DataSource::new("replacement");
        let summary = reconciler.reconcile(
            &scene,
            &items(&[imagery("a"), MapItem::DataSource(replacement.clone())]),
        );
        assert_eq!(summary.added, 2);
        assert_eq!(summary.removed, 1);
        assert!(!loading.get());
        assert!(!scene.primitives().contains(&tileset));
        assert!(scene.data_sources().contains(&replacement));
        assert_eq!(scene.imagery_layers().len(), 1);
        assert_eq!(events.all_tiles_loaded.listener_count(), 0);
        assert_eq!(reconciler.tileset_listener_count(), 0);
    }

    #[test]
    fn tile_errors_reach_the_handler_until_the_layer_is_removed() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let calls = Rc::new(Cell::new(0));
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some("a")));
        let counter = calls.clone();
        let parts = ImageryParts::new(provider).with_tile_error_handler(move |error| {
            assert_eq!(error.message, "404");
            counter.set(counter.get() + 1);
        });
        let desired = items(&[MapItem::Imagery(parts)]);

        reconciler.reconcile(&scene, &desired);
        reconciler.reconcile(&scene, &desired);
        assert_eq!(reconciler.tile_error_listener_count(), 1);
        let layer = scene.imagery_layers().layers()[0].clone();
        assert_eq!(layer.error_event().listener_count(), 1);

        let error = TileLoadError {
            coords: TileCoords { x: 1, y: 0, level: 0 },
            message: "404".into(),
            retry_count: 0,
        };
        layer.error_event().raise(&error);
        assert_eq!(calls.get(), 1);

        reconciler.reconcile(&scene, &[]);
        assert_eq!(layer.error_event().listener_count(), 0);
        assert_eq!(reconciler.tile_error_listener_count(), 0);
        layer.error_event().raise(&error);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn teardown_releases_tile_error_listeners() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let mut reconciler = SceneReconciler::new(Observable::new(false));
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some("a")));
        let parts = ImageryParts::new(provider).with_tile_error_handler(|_| {});
        reconciler.reconcile(&scene, &items(&[MapItem::Imagery(parts), imagery("b")]));
        assert_eq!(reconciler.tile_error_listener_count(), 1);
        let layer = scene.imagery_layers().layers()[1].clone();

        reconciler.teardown();
        reconciler.teardown();
        assert_eq!(reconciler.tile_error_listener_count(), 0);
        assert_eq!(layer.error_event().listener_count(), 0);
    }
}
