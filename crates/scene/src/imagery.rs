use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::rc::Rc;

use foundation::Id;
use foundation::Rectangle;
use foundation::math::Geodetic;
use futures_util::future::LocalBoxFuture;
use runtime::Event;

use crate::collection::{CollectionOp, OpLog};
use crate::credit::Credit;
use crate::error::PickError;

/// Which side of the splitter a layer renders on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Hash)]
pub enum SplitDirection {
    Left,
    #[default]
    None,
    Right,
}

/// Tile address in the geographic tiling scheme (2x1 tiles at level 0).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TileCoords {
    pub x: u32,
    pub y: u32,
    pub level: u32,
}

impl TileCoords {
    pub fn from_geographic(lon_rad: f64, lat_rad: f64, level: u32) -> Self {
        let level = level.min(30);
        let nx = 2u64 << level;
        let ny = 1u64 << level;
        let fx = ((lon_rad + PI) / TAU).clamp(0.0, 1.0);
        let fy = ((FRAC_PI_2 - lat_rad) / PI).clamp(0.0, 1.0);
        let x = ((fx * nx as f64) as u64).min(nx - 1);
        let y = ((fy * ny as f64) as u64).min(ny - 1);
        Self {
            x: x as u32,
            y: y as u32,
            level,
        }
    }
}

/// A tile request that failed on an imagery layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLoadError {
    pub coords: TileCoords,
    pub message: String,
    /// Attempts already made for this tile.
    pub retry_count: u32,
}

/// One feature returned by a raster provider's feature pick.
#[derive(Clone, Default)]
pub struct ImageryLayerFeatureInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub position: Option<Geodetic>,
    /// Layer whose provider produced this feature, assigned by the picker.
    pub imagery_layer: Option<Rc<ImageryLayer>>,
}

impl ImageryLayerFeatureInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl fmt::Debug for ImageryLayerFeatureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryLayerFeatureInfo")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("position", &self.position)
            .field("imagery_layer", &self.imagery_layer.as_ref().map(|l| l.id()))
            .finish()
    }
}

pub type FeaturePickFuture =
    LocalBoxFuture<'static, Result<Vec<ImageryLayerFeatureInfo>, PickError>>;

/// Tile source for a raster layer.
pub trait ImageryProvider {
    /// Stable identity used to key tile coordinates captured during picking.
    fn url(&self) -> Option<String>;

    fn credit(&self) -> Option<Credit> {
        None
    }

    fn rectangle(&self) -> Option<Rectangle> {
        None
    }

    fn maximum_level(&self) -> u32 {
        18
    }

    /// Starts an asynchronous feature query for the given tile and location.
    /// `None` means the provider does not support feature picking.
    fn pick_features(
        &self,
        coords: TileCoords,
        lon_rad: f64,
        lat_rad: f64,
    ) -> Option<FeaturePickFuture>;
}

/// Identity of a provider handle, stable while the `Rc` is alive.
pub fn provider_key(provider: &Rc<dyn ImageryProvider>) -> usize {
    Rc::as_ptr(provider) as *const () as usize
}

/// Engine-side raster layer wrapping a provider.
pub struct ImageryLayer {
    id: Id,
    provider: RefCell<Rc<dyn ImageryProvider>>,
    rectangle: Option<Rectangle>,
    alpha: Cell<f64>,
    show: Cell<bool>,
    split_direction: Cell<SplitDirection>,
    error_event: Rc<Event<TileLoadError>>,
}

impl ImageryLayer {
    pub fn new(provider: Rc<dyn ImageryProvider>, rectangle: Option<Rectangle>) -> Self {
        Self {
            id: Id::next(),
            provider: RefCell::new(provider),
            rectangle,
            alpha: Cell::new(1.0),
            show: Cell::new(true),
            split_direction: Cell::new(SplitDirection::None),
            error_event: Rc::new(Event::new()),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// Raised by the engine for every tile that fails to load.
    pub fn error_event(&self) -> &Rc<Event<TileLoadError>> {
        &self.error_event
    }

    pub fn provider(&self) -> Rc<dyn ImageryProvider> {
        Rc::clone(&self.provider.borrow())
    }

    /// Swaps the provider in place, returning the previous one.
    pub fn replace_provider(&self, provider: Rc<dyn ImageryProvider>) -> Rc<dyn ImageryProvider> {
        std::mem::replace(&mut *self.provider.borrow_mut(), provider)
    }

    pub fn rectangle(&self) -> Option<Rectangle> {
        self.rectangle
    }

    /// Clipping rectangle, falling back to the provider's own extent.
    pub fn extent(&self) -> Option<Rectangle> {
        self.rectangle.or_else(|| self.provider().rectangle())
    }

    pub fn alpha(&self) -> f64 {
        self.alpha.get()
    }

    pub fn set_alpha(&self, alpha: f64) {
        self.alpha.set(alpha);
    }

    pub fn show(&self) -> bool {
        self.show.get()
    }

    pub fn set_show(&self, show: bool) {
        self.show.set(show);
    }

    pub fn split_direction(&self) -> SplitDirection {
        self.split_direction.get()
    }

    pub fn set_split_direction(&self, direction: SplitDirection) {
        self.split_direction.set(direction);
    }
}

impl fmt::Debug for ImageryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryLayer")
            .field("id", &self.id)
            .field("url", &self.provider.borrow().url())
            .field("alpha", &self.alpha.get())
            .field("show", &self.show.get())
            .field("split_direction", &self.split_direction.get())
            .finish()
    }
}

/// Ordered raster stack. Index 0 is the bottom layer.
#[derive(Default)]
pub struct ImageryLayerCollection {
    layers: RefCell<Vec<Rc<ImageryLayer>>>,
    log: OpLog,
}

impl ImageryLayerCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Rc<ImageryLayer>> {
        self.layers.borrow().get(index).cloned()
    }

    /// Snapshot of the stack, bottom first.
    pub fn layers(&self) -> Vec<Rc<ImageryLayer>> {
        self.layers.borrow().clone()
    }

    pub fn index_of(&self, layer: &ImageryLayer) -> Option<usize> {
        self.layers.borrow().iter().position(|l| l.id() == layer.id())
    }

    pub fn contains(&self, layer: &ImageryLayer) -> bool {
        self.index_of(layer).is_some()
    }

    /// Inserts at `index` (clamped), or on top when `index` is `None`.
    pub fn add(&self, layer: Rc<ImageryLayer>, index: Option<usize>) {
        let mut layers = self.layers.borrow_mut();
        let index = index.unwrap_or(layers.len()).min(layers.len());
        self.log.push(CollectionOp::Add {
            id: layer.id(),
            index,
        });
        layers.insert(index, layer);
    }

    pub fn remove(&self, layer: &ImageryLayer) -> bool {
        let Some(index) = self.index_of(layer) else {
            return false;
        };
        self.layers.borrow_mut().remove(index);
        self.log.push(CollectionOp::Remove(layer.id()));
        true
    }

    /// Moves the layer one step up. No-op at the top.
    pub fn raise(&self, layer: &ImageryLayer) {
        let Some(index) = self.index_of(layer) else {
            return;
        };
        let mut layers = self.layers.borrow_mut();
        if index + 1 >= layers.len() {
            return;
        }
        layers.swap(index, index + 1);
        self.log.push(CollectionOp::Raise(layer.id()));
    }

    /// Moves the layer one step down. No-op at the bottom.
    pub fn lower(&self, layer: &ImageryLayer) {
        let Some(index) = self.index_of(layer) else {
            return;
        };
        if index == 0 {
            return;
        }
        self.layers.borrow_mut().swap(index, index - 1);
        self.log.push(CollectionOp::Lower(layer.id()));
    }

    pub fn remove_all(&self) {
        let removed = std::mem::take(&mut *self.layers.borrow_mut());
        for layer in removed {
            self.log.push(CollectionOp::Remove(layer.id()));
        }
    }

    /// Drains the recorded mutations.
    pub fn take_ops(&self) -> Vec<CollectionOp> {
        self.log.take()
    }

    pub fn op_count(&self) -> usize {
        self.log.len()
    }
}
