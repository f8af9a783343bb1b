use std::fmt;
use std::rc::Rc;

use foundation::Rectangle;
use scene::{
    DataSource, ImageryLayer, ImageryProvider, Primitive, TerrainProvider, TileLoadError,
};

/// Callback run for each failed tile of a layer built from [`ImageryParts`].
pub type TileErrorHandler = Rc<dyn Fn(&TileLoadError)>;

/// Description of a raster layer: the tile source plus display parameters.
#[derive(Clone)]
pub struct ImageryParts {
    pub imagery_provider: Rc<dyn ImageryProvider>,
    pub alpha: f64,
    pub show: bool,
    pub clipping_rectangle: Option<Rectangle>,
    pub tile_error_handler: Option<TileErrorHandler>,
}

impl ImageryParts {
    pub fn new(imagery_provider: Rc<dyn ImageryProvider>) -> Self {
        Self {
            imagery_provider,
            alpha: 1.0,
            show: true,
            clipping_rectangle: None,
            tile_error_handler: None,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_show(mut self, show: bool) -> Self {
        self.show = show;
        self
    }

    pub fn with_clipping_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.clipping_rectangle = Some(rectangle);
        self
    }

    pub fn with_tile_error_handler(mut self, handler: impl Fn(&TileLoadError) + 'static) -> Self {
        self.tile_error_handler = Some(Rc::new(handler));
        self
    }

    /// Copies alpha and visibility onto `layer`. Returns whether anything changed.
    pub fn apply_to(&self, layer: &ImageryLayer) -> bool {
        let mut changed = false;
        if layer.alpha() != self.alpha {
            layer.set_alpha(self.alpha);
            changed = true;
        }
        if layer.show() != self.show {
            layer.set_show(self.show);
            changed = true;
        }
        changed
    }
}

impl fmt::Debug for ImageryParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageryParts")
            .field("url", &self.imagery_provider.url())
            .field("alpha", &self.alpha)
            .field("show", &self.show)
            .field("clipping_rectangle", &self.clipping_rectangle)
            .field("tile_error_handler", &self.tile_error_handler.is_some())
            .finish()
    }
}

/// One renderable unit produced by a catalog item.
#[derive(Clone)]
pub enum MapItem {
    Imagery(ImageryParts),
    DataSource(Rc<DataSource>),
    Primitive(Rc<Primitive>),
    Terrain(Rc<dyn TerrainProvider>),
}

impl MapItem {
    pub fn imagery(&self) -> Option<&ImageryParts> {
        match self {
            MapItem::Imagery(parts) => Some(parts),
            _ => None,
        }
    }

    pub fn data_source(&self) -> Option<&Rc<DataSource>> {
        match self {
            MapItem::DataSource(ds) => Some(ds),
            _ => None,
        }
    }

    pub fn primitive(&self) -> Option<&Rc<Primitive>> {
        match self {
            MapItem::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn terrain(&self) -> Option<&Rc<dyn TerrainProvider>> {
        match self {
            MapItem::Terrain(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_tileset(&self) -> bool {
        self.primitive().is_some_and(|p| p.is_tileset())
    }
}

impl fmt::Debug for MapItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapItem::Imagery(parts) => f.debug_tuple("Imagery").field(parts).finish(),
            MapItem::DataSource(ds) => f.debug_tuple("DataSource").field(ds).finish(),
            MapItem::Primitive(p) => f.debug_tuple("Primitive").field(p).finish(),
            MapItem::Terrain(t) => f.debug_tuple("Terrain").field(&t.source()).finish(),
        }
    }
}

impl From<ImageryParts> for MapItem {
    fn from(parts: ImageryParts) -> Self {
        MapItem::Imagery(parts)
    }
}

impl From<Rc<DataSource>> for MapItem {
    fn from(ds: Rc<DataSource>) -> Self {
        MapItem::DataSource(ds)
    }
}

impl From<Rc<Primitive>> for MapItem {
    fn from(p: Rc<Primitive>) -> Self {
        MapItem::Primitive(p)
    }
}
