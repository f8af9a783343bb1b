use std::fmt;
use std::rc::Rc;

use catalog::{CatalogItem, Feature, FeatureInfoFetcher, Workbench};
use foundation::Id;
use foundation::math::Geodetic;
use layers::MapItem;
use runtime::Observable;
use scene::SplitDirection;

use crate::config::ViewerConfig;
use crate::pick::PickedFeatures;

/// An error surfaced to the user, kept until the UI dismisses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    pub title: String,
    pub message: String,
}

/// A modal map gesture (drag-zoom, point selection) that captures picks
/// while it is on top of the stack.
pub struct MapInteractionMode {
    id: Id,
    message: String,
    picked_features: Observable<Option<Rc<PickedFeatures>>>,
}

impl MapInteractionMode {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Id::next(),
            message: message.into(),
            picked_features: Observable::new(None),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn picked_features(&self) -> &Observable<Option<Rc<PickedFeatures>>> {
        &self.picked_features
    }
}

impl fmt::Debug for MapInteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapInteractionMode")
            .field("id", &self.id)
            .field("message", &self.message)
            .finish()
    }
}

/// State shared between the viewer and the application around it.
///
/// Handed to every component explicitly; nothing reads it from a global.
pub struct ViewerContext {
    pub config: ViewerConfig,
    pub workbench: Workbench,
    pub base_map: Observable<Option<Rc<dyn CatalogItem>>>,
    pub picked_features: Observable<Option<Rc<PickedFeatures>>>,
    pub interaction_modes: Observable<Vec<Rc<MapInteractionMode>>>,
    pub selected_feature: Observable<Option<Rc<Feature>>>,
    pub show_splitter: Observable<bool>,
    /// Fraction of the canvas width, 0 to 1.
    pub split_position: Observable<f64>,
    pub terrain_split_direction: Observable<SplitDirection>,
    pub depth_test_against_terrain: Observable<bool>,
    pub use_native_resolution: Observable<bool>,
    pub base_maximum_screen_space_error: Observable<f64>,
    pub use_terrain: Observable<bool>,
    pub errors: Observable<Vec<ReportedError>>,
    pub mouse_coords: Observable<Option<Geodetic>>,
    pub tiles_loading_indeterminate: Observable<bool>,
    pub allow_feature_info_requests: Observable<bool>,
    pub feature_info_fetcher: Rc<dyn FeatureInfoFetcher>,
}

impl ViewerContext {
    pub fn new(config: ViewerConfig, feature_info_fetcher: Rc<dyn FeatureInfoFetcher>) -> Self {
        Self {
            workbench: Workbench::new(),
            base_map: Observable::new(None),
            picked_features: Observable::new(None),
            interaction_modes: Observable::new(Vec::new()),
            selected_feature: Observable::new(None),
            show_splitter: Observable::new(false),
            split_position: Observable::new(0.5),
            terrain_split_direction: Observable::new(SplitDirection::None),
            depth_test_against_terrain: Observable::new(false),
            use_native_resolution: Observable::new(config.use_native_resolution),
            base_maximum_screen_space_error: Observable::new(
                config.base_maximum_screen_space_error,
            ),
            use_terrain: Observable::new(config.use_terrain),
            errors: Observable::new(Vec::new()),
            mouse_coords: Observable::new(None),
            tiles_loading_indeterminate: Observable::new(false),
            allow_feature_info_requests: Observable::new(config.allow_feature_info_requests),
            feature_info_fetcher,
            config,
        }
    }

    /// Workbench item or the base map with the given id.
    pub fn find_item(&self, id: Id) -> Option<Rc<dyn CatalogItem>> {
        self.workbench.find(id).or_else(|| {
            self.base_map
                .borrow()
                .as_ref()
                .filter(|item| item.id() == id)
                .cloned()
        })
    }

    /// Workbench items topmost first, then the base map.
    pub fn mappable_items(&self) -> Vec<Rc<dyn CatalogItem>> {
        let mut items: Vec<_> = self
            .workbench
            .items()
            .into_iter()
            .filter(|item| item.as_mappable().is_some())
            .collect();
        if let Some(base) = self.base_map.get()
            && base.as_mappable().is_some()
            && !items.iter().any(|i| i.id() == base.id())
        {
            items.push(base);
        }
        items
    }

    /// Every (item, map item) pair in rendering priority order.
    pub fn all_map_items(&self) -> Vec<(Id, MapItem)> {
        let mut pairs = Vec::new();
        for item in self.mappable_items() {
            if let Some(mappable) = item.as_mappable() {
                let id = item.id();
                mappable
                    .map_items()
                    .with(|items| pairs.extend(items.iter().cloned().map(|m| (id, m))));
            }
        }
        pairs
    }

    /// Versions of everything [`Self::all_map_items`] reads.
    pub fn map_item_versions(&self) -> Vec<u64> {
        let mut versions = vec![
            self.workbench.observable().version(),
            self.base_map.version(),
        ];
        for item in self.mappable_items() {
            if let Some(mappable) = item.as_mappable() {
                versions.push(item.id().get());
                versions.push(mappable.map_items().version());
            }
        }
        versions
    }

    pub fn report_error(&self, title: impl Into<String>, message: impl Into<String>) {
        let error = ReportedError {
            title: title.into(),
            message: message.into(),
        };
        self.errors.update(|errors| errors.push(error));
    }

    pub fn push_interaction_mode(&self, mode: Rc<MapInteractionMode>) {
        self.interaction_modes.update(|modes| modes.push(mode));
    }

    /// Removes `mode` wherever it sits in the stack.
    pub fn remove_interaction_mode(&self, id: Id) -> bool {
        if !self
            .interaction_modes
            .with(|modes| modes.iter().any(|m| m.id() == id))
        {
            return false;
        }
        self.interaction_modes
            .update(|modes| modes.retain(|m| m.id() != id));
        true
    }

    pub fn top_interaction_mode(&self) -> Option<Rc<MapInteractionMode>> {
        self.interaction_modes.with(|modes| modes.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::{MapInteractionMode, ViewerContext};
    use crate::config::ViewerConfig;
    use catalog::{CatalogItem, FeatureInfoFetcher, MappableItem, MemoryFeatureInfoFetcher};
    use layers::{ImageryParts, MapItem};
    use scene::ImageryProvider;
    use scene::headless::StaticImageryProvider;
    use std::rc::Rc;

    fn context() -> ViewerContext {
        let fetcher: Rc<dyn FeatureInfoFetcher> = Rc::new(MemoryFeatureInfoFetcher::new());
        ViewerContext::new(ViewerConfig::default(), fetcher)
    }

    fn imagery_item(name: &str) -> Rc<dyn CatalogItem> {
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some(name)));
        Rc::new(
            MappableItem::new(name)
                .with_map_items(vec![MapItem::Imagery(ImageryParts::new(provider))]),
        )
    }

    #[test]
    fn base_map_comes_after_the_workbench() {
        let ctx = context();
        let base = imagery_item("base");
        let top = imagery_item("top");
        ctx.base_map.set(Some(base.clone()));
        ctx.workbench.add(top.clone());

        let ids: Vec<_> = ctx.all_map_items().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![top.id(), base.id()]);
        assert_eq!(ctx.find_item(base.id()).map(|i| i.id()), Some(base.id()));
    }

    #[test]
    fn versions_change_with_map_items() {
        let ctx = context();
        let item = Rc::new(MappableItem::new("x"));
        ctx.workbench.add(item.clone());
        let before = ctx.map_item_versions();
        item.set_map_items(Vec::new());
        assert_ne!(ctx.map_item_versions(), before);
    }

    #[test]
    fn interaction_modes_stack() {
        let ctx = context();
        let first = Rc::new(MapInteractionMode::new("first"));
        let second = Rc::new(MapInteractionMode::new("second"));
        ctx.push_interaction_mode(first.clone());
        ctx.push_interaction_mode(second.clone());
        assert_eq!(ctx.top_interaction_mode().map(|m| m.id()), Some(second.id()));
        assert!(ctx.remove_interaction_mode(second.id()));
        assert!(!ctx.remove_interaction_mode(second.id()));
        assert_eq!(ctx.top_interaction_mode().map(|m| m.id()), Some(first.id()));
    }
}
