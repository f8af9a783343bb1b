use std::rc::Rc;

use foundation::math::Geodetic;
use futures_util::future::LocalBoxFuture;
use scene::{
    Credit, Scene, TerrainError, TerrainProvider, TerrainSource, terrain_provider_key,
};
use tracing::debug;

use crate::config::ViewerConfig;

pub const ION_CREDIT_HTML: &str = "<a href=\"https://cesium.com/\" target=\"_blank\" \
     rel=\"noopener noreferrer\"><img src=\"ion-credit.png\" title=\"Cesium ion\"/></a>";

/// Terrain provider that reports an extra attribution.
pub struct CreditedTerrainProvider {
    inner: Rc<dyn TerrainProvider>,
    credit: Credit,
}

impl CreditedTerrainProvider {
    pub fn new(inner: Rc<dyn TerrainProvider>, credit: Credit) -> Self {
        Self { inner, credit }
    }
}

impl TerrainProvider for CreditedTerrainProvider {
    fn ready(&self) -> LocalBoxFuture<'static, Result<(), TerrainError>> {
        self.inner.ready()
    }

    fn sample_heights(
        &self,
        level: u32,
        positions: &[Geodetic],
    ) -> LocalBoxFuture<'static, Result<Vec<f64>, TerrainError>> {
        self.inner.sample_heights(level, positions)
    }

    fn source(&self) -> TerrainSource {
        self.inner.source()
    }

    fn credit(&self) -> Option<Credit> {
        Some(self.credit.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TerrainKey {
    MapItem(usize),
    Configured(TerrainSource),
}

/// Picks the globe's terrain provider and remembers the last choice so an
/// unchanged selection does not build a new provider.
#[derive(Default)]
pub struct TerrainSelector {
    current: Option<(TerrainKey, Rc<dyn TerrainProvider>)>,
}

impl TerrainSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider to use given the terrain toggle, the topmost terrain map item
    /// and the configured fallbacks.
    pub fn select(
        &mut self,
        scene: &dyn Scene,
        use_terrain: bool,
        map_item_terrain: Option<&Rc<dyn TerrainProvider>>,
        config: &ViewerConfig,
    ) -> Rc<dyn TerrainProvider> {
        let key = match (use_terrain, map_item_terrain) {
            (false, _) => TerrainKey::Configured(TerrainSource::Ellipsoid),
            (true, Some(provider)) => TerrainKey::MapItem(terrain_provider_key(provider)),
            (true, None) => TerrainKey::Configured(
                config.configured_terrain().unwrap_or(TerrainSource::Ellipsoid),
            ),
        };
        if let Some((current_key, provider)) = &self.current
            && *current_key == key
        {
            return Rc::clone(provider);
        }

        let provider = match (&key, map_item_terrain) {
            (TerrainKey::MapItem(_), Some(provider)) => Rc::clone(provider),
            (TerrainKey::Configured(TerrainSource::WorldTerrain), _) => {
                let world = scene.create_terrain_provider(&TerrainSource::WorldTerrain);
                Rc::new(CreditedTerrainProvider::new(world, Credit::new(ION_CREDIT_HTML)))
                    as Rc<dyn TerrainProvider>
            }
            (TerrainKey::Configured(source), _) => scene.create_terrain_provider(source),
            (TerrainKey::MapItem(_), None) => {
                scene.create_terrain_provider(&TerrainSource::Ellipsoid)
            }
        };
        debug!(key = ?key, "terrain provider selected");
        self.current = Some((key, Rc::clone(&provider)));
        provider
    }

    /// Selects and installs the provider. Returns whether the scene changed.
    pub fn apply(
        &mut self,
        scene: &dyn Scene,
        use_terrain: bool,
        map_item_terrain: Option<&Rc<dyn TerrainProvider>>,
        config: &ViewerConfig,
    ) -> bool {
        let provider = self.select(scene, use_terrain, map_item_terrain, config);
        if terrain_provider_key(&scene.terrain_provider()) == terrain_provider_key(&provider) {
            return false;
        }
        scene.set_terrain_provider(provider);
        true
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
