use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use foundation::Id;
use foundation::math::Geodetic;
use runtime::Observable;
use scene::{Entity, ImageryLayer, ImageryLayerFeatureInfo, Primitive};
use serde::Serialize;
use serde_json::Value;

/// A picked feature as shown to the user.
///
/// Description and properties are observable because feature-info
/// enrichment fills them in after the pick has already been reported.
pub struct Feature {
    id: Id,
    name: Option<String>,
    description: Observable<Option<String>>,
    properties: Observable<BTreeMap<String, Value>>,
    position: Cell<Option<Geodetic>>,
    entity: Option<Rc<Entity>>,
    primitive: Option<Rc<Primitive>>,
    imagery_layer: Option<Rc<ImageryLayer>>,
    catalog_item: Cell<Option<Id>>,
}

impl Feature {
    pub fn new(name: impl Into<String>) -> Self {
        Self::empty(Some(name.into()))
    }

    fn empty(name: Option<String>) -> Self {
        Self {
            id: Id::next(),
            name,
            description: Observable::new(None),
            properties: Observable::new(BTreeMap::new()),
            position: Cell::new(None),
            entity: None,
            primitive: None,
            imagery_layer: None,
            catalog_item: Cell::new(None),
        }
    }

    /// Wraps a vector entity, copying its display fields.
    pub fn from_entity(entity: Rc<Entity>) -> Self {
        let mut feature = Self::empty(Some(entity.name().to_string()));
        feature.description.set(entity.description().map(str::to_string));
        feature.properties.set(entity.properties().clone());
        feature.position.set(entity.position());
        feature.entity = Some(entity);
        feature
    }

    /// Wraps a raster pick result. The owning layer travels with it.
    pub fn from_imagery(info: ImageryLayerFeatureInfo) -> Self {
        let mut feature = Self::empty(info.name);
        feature.description.set(info.description);
        feature.properties.set(info.properties);
        feature.position.set(info.position);
        feature.imagery_layer = info.imagery_layer;
        feature
    }

    pub fn with_primitive(mut self, primitive: Rc<Primitive>) -> Self {
        self.primitive = Some(primitive);
        self
    }

    pub fn with_property(self, key: impl Into<String>, value: Value) -> Self {
        self.properties.update(|p| {
            p.insert(key.into(), value);
        });
        self
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.description.set(Some(description.into()));
        self
    }

    pub fn with_position(self, position: Geodetic) -> Self {
        self.position.set(Some(position));
        self
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> &Observable<Option<String>> {
        &self.description
    }

    pub fn properties(&self) -> &Observable<BTreeMap<String, Value>> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.with(|p| p.get(key).cloned())
    }

    pub fn position(&self) -> Option<Geodetic> {
        self.position.get()
    }

    pub fn set_position(&self, position: Option<Geodetic>) {
        self.position.set(position);
    }

    pub fn entity(&self) -> Option<&Rc<Entity>> {
        self.entity.as_ref()
    }

    pub fn primitive(&self) -> Option<&Rc<Primitive>> {
        self.primitive.as_ref()
    }

    pub fn imagery_layer(&self) -> Option<&Rc<ImageryLayer>> {
        self.imagery_layer.as_ref()
    }

    /// Catalog item that produced this feature, if known.
    pub fn catalog_item(&self) -> Option<Id> {
        self.catalog_item.get()
    }

    pub fn set_catalog_item(&self, item: Option<Id>) {
        self.catalog_item.set(item);
    }

    pub fn snapshot(&self) -> FeatureSnapshot {
        let position = self.position.get();
        FeatureSnapshot {
            name: self.name.clone(),
            description: self.description.get(),
            properties: self.properties.get(),
            latitude: position.map(|p| p.lat_deg()),
            longitude: position.map(|p| p.lon_deg()),
            height: position.map(|p| p.alt_m),
            layer: self
                .imagery_layer
                .as_ref()
                .and_then(|layer| layer.provider().url()),
        }
    }
}

impl fmt::Debug for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Feature")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("position", &self.position.get())
            .field("entity", &self.entity.as_ref().map(|e| e.id()))
            .field("imagery_layer", &self.imagery_layer.as_ref().map(|l| l.id()))
            .field("catalog_item", &self.catalog_item.get())
            .finish()
    }
}

/// Serializable view of a [`Feature`] at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    pub name: Option<String>,
    pub description: Option<String>,
    pub properties: BTreeMap<String, Value>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer: Option<String>,
}
