use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use foundation::Id;
use layers::MapItem;
use runtime::Observable;
use scene::{Scene, TerrainProvider, TerrainSource, terrain_provider_key};
use tracing::{debug, warn};

use crate::error::CatalogError;
use crate::item::{CatalogItem, Mappable};

/// Catalog item contributing a terrain provider.
///
/// Map items stay empty until [`TerrainCatalogItem::load`] has seen the
/// provider become ready, and while the item is hidden.
pub struct TerrainCatalogItem {
    id: Id,
    name: String,
    source: TerrainSource,
    show: Cell<bool>,
    provider: RefCell<Option<Rc<dyn TerrainProvider>>>,
    map_items: Observable<Vec<MapItem>>,
}

impl TerrainCatalogItem {
    pub fn new(name: impl Into<String>, source: TerrainSource) -> Self {
        Self {
            id: Id::next(),
            name: name.into(),
            source,
            show: Cell::new(true),
            provider: RefCell::new(None),
            map_items: Observable::new(Vec::new()),
        }
    }

    pub fn source(&self) -> &TerrainSource {
        &self.source
    }

    pub fn show(&self) -> bool {
        self.show.get()
    }

    pub fn set_show(&self, show: bool) {
        if self.show.replace(show) != show {
            self.refresh_map_items();
        }
    }

    pub fn provider(&self) -> Option<Rc<dyn TerrainProvider>> {
        self.provider.borrow().clone()
    }

    /// Creates the provider through the engine, then waits for it.
    pub async fn load_with(&self, scene: &dyn Scene) -> Result<(), CatalogError> {
        let provider = scene.create_terrain_provider(&self.source);
        self.load(provider).await
    }

    /// Waits for `provider` to become ready and publishes it as a map item.
    /// A rejected readiness leaves the item without map items.
    pub async fn load(&self, provider: Rc<dyn TerrainProvider>) -> Result<(), CatalogError> {
        match provider.ready().await {
            Ok(()) => {
                debug!(item = %self.id, source = ?self.source, "terrain provider ready");
                *self.provider.borrow_mut() = Some(provider);
                self.refresh_map_items();
                Ok(())
            }
            Err(err) => {
                warn!(item = %self.id, error = %err, "terrain provider failed to load");
                *self.provider.borrow_mut() = None;
                self.refresh_map_items();
                Err(CatalogError::TerrainLoad(err.to_string()))
            }
        }
    }

    /// Whether the engine is currently using this item's provider.
    pub fn is_terrain_active(&self, current: &Rc<dyn TerrainProvider>) -> bool {
        self.provider
            .borrow()
            .as_ref()
            .is_some_and(|p| terrain_provider_key(p) == terrain_provider_key(current))
    }

    pub fn short_report(&self, current: &Rc<dyn TerrainProvider>) -> String {
        let status = if self.is_terrain_active(current) {
            "In use"
        } else {
            "Not in use"
        };
        format!("Terrain status: {status}")
    }

    fn refresh_map_items(&self) {
        let items = match (self.show.get(), self.provider.borrow().as_ref()) {
            (true, Some(provider)) => vec![MapItem::Terrain(Rc::clone(provider))],
            _ => Vec::new(),
        };
        self.map_items.set(items);
    }
}

impl CatalogItem for TerrainCatalogItem {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_mappable(&self) -> Option<&dyn Mappable> {
        Some(self)
    }
}

impl Mappable for TerrainCatalogItem {
    fn map_items(&self) -> &Observable<Vec<MapItem>> {
        &self.map_items
    }

    fn disable_zoom_to(&self) -> bool {
        true
    }
}

impl fmt::Debug for TerrainCatalogItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainCatalogItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("source", &self.source)
            .field("loaded", &self.provider.borrow().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::TerrainCatalogItem;
    use crate::error::CatalogError;
    use crate::item::Mappable;
    use scene::headless::HeadlessTerrainProvider;
    use scene::{EllipsoidTerrainProvider, TerrainProvider, TerrainSource};
    use std::rc::Rc;

    fn source() -> TerrainSource {
        TerrainSource::Url("https://terrain.test/".into())
    }

    #[tokio::test]
    async fn ready_provider_becomes_a_map_item() {
        let item = TerrainCatalogItem::new("terrain", source());
        let provider: Rc<dyn TerrainProvider> = Rc::new(HeadlessTerrainProvider::new(source()));
        assert!(item.map_items().borrow().is_empty());

        item.load(provider.clone()).await.unwrap();
        assert_eq!(item.map_items().borrow().len(), 1);
        assert!(item.is_terrain_active(&provider));
        assert_eq!(item.short_report(&provider), "Terrain status: In use");

        item.set_show(false);
        assert!(item.map_items().borrow().is_empty());
        item.set_show(true);
        assert_eq!(item.map_items().borrow().len(), 1);
    }

    #[tokio::test]
    async fn rejected_readiness_is_a_load_error() {
        let item = TerrainCatalogItem::new("terrain", source());
        let provider: Rc<dyn TerrainProvider> =
            Rc::new(HeadlessTerrainProvider::new(source()).failing_ready("401"));
        let err = item.load(provider).await.unwrap_err();
        assert!(matches!(err, CatalogError::TerrainLoad(_)));
        assert!(item.map_items().borrow().is_empty());

        let other: Rc<dyn TerrainProvider> = Rc::new(EllipsoidTerrainProvider);
        assert_eq!(item.short_report(&other), "Terrain status: Not in use");
    }
}
