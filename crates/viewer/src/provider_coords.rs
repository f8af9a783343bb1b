use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use foundation::Rectangle;
use scene::{
    Credit, FeaturePickFuture, ImageryLayer, ImageryLayerCollection, ImageryProvider, TileCoords,
    provider_key,
};
use tracing::debug;

/// Tile coordinates each raster provider was queried with, keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct ProviderCoords(Rc<RefCell<BTreeMap<String, TileCoords>>>);

impl ProviderCoords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<TileCoords> {
        self.0.borrow().get(url).copied()
    }

    /// Keeps the first coordinates recorded for `url`.
    pub fn insert(&self, url: String, coords: TileCoords) {
        self.0.borrow_mut().entry(url).or_insert(coords);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<String, TileCoords> {
        self.0.borrow().clone()
    }
}

impl FromIterator<(String, TileCoords)> for ProviderCoords {
    fn from_iter<I: IntoIterator<Item = (String, TileCoords)>>(iter: I) -> Self {
        Self(Rc::new(RefCell::new(iter.into_iter().collect())))
    }
}

/// One-shot stand-in for a layer's provider.
///
/// The first `pick_features` call records its tile coordinates, puts the
/// original provider back on the layer and forwards the call.
struct CoordHook {
    original: Rc<dyn ImageryProvider>,
    layer: Weak<ImageryLayer>,
    coords: ProviderCoords,
    fired: Cell<bool>,
}

impl CoordHook {
    fn key(&self) -> usize {
        self as *const CoordHook as *const () as usize
    }

    /// Puts the original provider back if the layer still holds this hook.
    fn restore(&self) -> bool {
        let Some(layer) = self.layer.upgrade() else {
            return false;
        };
        if provider_key(&layer.provider()) != self.key() {
            return false;
        }
        layer.replace_provider(Rc::clone(&self.original));
        true
    }
}

impl ImageryProvider for CoordHook {
    fn url(&self) -> Option<String> {
        self.original.url()
    }

    fn credit(&self) -> Option<Credit> {
        self.original.credit()
    }

    fn rectangle(&self) -> Option<Rectangle> {
        self.original.rectangle()
    }

    fn maximum_level(&self) -> u32 {
        self.original.maximum_level()
    }

    fn pick_features(
        &self,
        coords: TileCoords,
        lon_rad: f64,
        lat_rad: f64,
    ) -> Option<FeaturePickFuture> {
        if !self.fired.replace(true) {
            if let Some(url) = self.original.url() {
                self.coords.insert(url, coords);
            }
            self.restore();
        }
        self.original.pick_features(coords, lon_rad, lat_rad)
    }
}

/// Hooks installed on every layer of a collection for the duration of one
/// raster pick. Dropping the guard restores every hook that never fired.
pub struct ProviderCoordHooks {
    hooks: Vec<Rc<CoordHook>>,
    coords: ProviderCoords,
}

impl ProviderCoordHooks {
    pub fn attach(layers: &ImageryLayerCollection) -> Self {
        let coords = ProviderCoords::new();
        let hooks = layers
            .layers()
            .into_iter()
            .map(|layer| {
                let hook = Rc::new(CoordHook {
                    original: layer.provider(),
                    layer: Rc::downgrade(&layer),
                    coords: coords.clone(),
                    fired: Cell::new(false),
                });
                layer.replace_provider(Rc::clone(&hook) as Rc<dyn ImageryProvider>);
                hook
            })
            .collect();
        Self { hooks, coords }
    }

    pub fn coords(&self) -> &ProviderCoords {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl Drop for ProviderCoordHooks {
    fn drop(&mut self) {
        let restored = self.hooks.drain(..).filter(|hook| hook.restore()).count();
        if restored > 0 {
            debug!(restored, "restored unfired provider hooks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ProviderCoordHooks, ProviderCoords};
    use scene::headless::StaticImageryProvider;
    use scene::{ImageryLayer, ImageryLayerCollection, ImageryProvider, TileCoords, provider_key};
    use std::rc::Rc;

    fn collection(urls: &[Option<&str>]) -> (ImageryLayerCollection, Vec<Rc<dyn ImageryProvider>>) {
        let coll = ImageryLayerCollection::new();
        let mut providers = Vec::new();
        for url in urls {
            let p: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(*url));
            coll.add(Rc::new(ImageryLayer::new(p.clone(), None)), None);
            providers.push(p);
        }
        (coll, providers)
    }

    const AT: TileCoords = TileCoords { x: 3, y: 1, level: 2 };

    #[test]
    fn first_call_records_once_and_restores() {
        let (coll, providers) = collection(&[Some("X")]);
        let layer = coll.get(0).unwrap();
        let hooks = ProviderCoordHooks::attach(&coll);
        let hook = layer.provider();
        assert_ne!(provider_key(&hook), provider_key(&providers[0]));

        assert!(hook.pick_features(AT, 0.0, 0.0).is_some());
        assert_eq!(provider_key(&layer.provider()), provider_key(&providers[0]));

        // Re-picking through a retained handle forwards without recording.
        let again = TileCoords { x: 9, y: 9, level: 9 };
        assert!(hook.pick_features(again, 0.0, 0.0).is_some());
        assert!(layer.provider().pick_features(again, 0.0, 0.0).is_some());

        assert_eq!(hooks.coords().len(), 1);
        assert_eq!(hooks.coords().get("X"), Some(AT));
    }

    #[test]
    fn drop_restores_unfired_hooks() {
        let (coll, providers) = collection(&[Some("a"), None]);
        {
            let hooks = ProviderCoordHooks::attach(&coll);
            assert_eq!(hooks.len(), 2);
            let hooked = coll.get(1).unwrap().provider();
            hooked.pick_features(AT, 0.0, 0.0);
            assert!(hooks.coords().is_empty());
        }
        for (layer, original) in coll.layers().iter().zip(&providers) {
            assert_eq!(provider_key(&layer.provider()), provider_key(original));
        }
    }

    #[test]
    fn insert_keeps_the_first_entry() {
        let coords = ProviderCoords::new();
        coords.insert("u".into(), AT);
        coords.insert("u".into(), TileCoords { x: 0, y: 0, level: 0 });
        assert_eq!(coords.get("u"), Some(AT));
        let collected: ProviderCoords = [("v".to_string(), AT)].into_iter().collect();
        assert_eq!(collected.snapshot().len(), 1);
    }
}
