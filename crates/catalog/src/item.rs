use std::cell::Cell;
use std::fmt;

use foundation::math::Vec2;
use foundation::{Id, Rectangle};
use layers::MapItem;
use runtime::Observable;
use scene::{PickedObject, SplitDirection};

use crate::feature::Feature;

pub const DEFAULT_MAX_REQUESTS: usize = 10;

/// An entry of the catalog. Capabilities are looked up through the `as_*`
/// accessors rather than by inspecting the concrete type.
pub trait CatalogItem {
    fn id(&self) -> Id;
    fn name(&self) -> &str;

    fn as_mappable(&self) -> Option<&dyn Mappable> {
        None
    }

    fn as_feature_info(&self) -> Option<&dyn FeatureInfoUrlTemplate> {
        None
    }
}

/// Items that put something on the map.
pub trait Mappable {
    /// Current renderables, replaced wholesale whenever the item changes.
    fn map_items(&self) -> &Observable<Vec<MapItem>>;

    /// Fixed extent to fly to instead of inspecting the map items.
    fn display_rectangle(&self) -> Option<Rectangle> {
        None
    }

    /// `None` when the item cannot be assigned a splitter side.
    fn split_direction(&self) -> Option<&Observable<SplitDirection>> {
        None
    }

    fn disable_zoom_to(&self) -> bool {
        false
    }
}

/// Items able to build features from raw picks and enrich them over HTTP.
pub trait FeatureInfoUrlTemplate {
    /// URL with `{property}` placeholders filled from the picked feature.
    fn feature_info_url_template(&self) -> Option<String>;

    /// Cap on how many picks in one gesture trigger enrichment requests.
    fn max_requests(&self) -> usize {
        DEFAULT_MAX_REQUESTS
    }

    /// Text shown for null property values; `None` hides them.
    fn show_string_if_property_value_is_null(&self) -> Option<String> {
        None
    }

    fn build_feature_from_pick_result(
        &self,
        screen: Option<Vec2>,
        picked: &PickedObject,
    ) -> Option<Feature>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureInfoSettings {
    pub url_template: Option<String>,
    pub max_requests: usize,
    pub show_string_if_null: Option<String>,
}

impl Default for FeatureInfoSettings {
    fn default() -> Self {
        Self {
            url_template: None,
            max_requests: DEFAULT_MAX_REQUESTS,
            show_string_if_null: None,
        }
    }
}

/// General-purpose mappable item holding whatever map items it is given.
pub struct MappableItem {
    id: Id,
    name: String,
    map_items: Observable<Vec<MapItem>>,
    display_rectangle: Cell<Option<Rectangle>>,
    split_direction: Option<Observable<SplitDirection>>,
    feature_info: Option<FeatureInfoSettings>,
}

impl MappableItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Id::next(),
            name: name.into(),
            map_items: Observable::new(Vec::new()),
            display_rectangle: Cell::new(None),
            split_direction: None,
            feature_info: None,
        }
    }

    pub fn with_map_items(self, items: Vec<MapItem>) -> Self {
        self.set_map_items(items);
        self
    }

    pub fn with_display_rectangle(self, rectangle: Rectangle) -> Self {
        self.display_rectangle.set(Some(rectangle));
        self
    }

    /// Lets the splitter assign this item a side.
    pub fn splittable(mut self) -> Self {
        self.split_direction = Some(Observable::new(SplitDirection::None));
        self
    }

    pub fn with_feature_info(mut self, settings: FeatureInfoSettings) -> Self {
        self.feature_info = Some(settings);
        self
    }

    /// Replaces the map items, tagging data sources and primitives with this
    /// item so picks can be traced back to it.
    pub fn set_map_items(&self, items: Vec<MapItem>) {
        for item in &items {
            match item {
                MapItem::DataSource(ds) => ds.set_owner_item(Some(self.id)),
                MapItem::Primitive(p) => p.set_owner_item(Some(self.id)),
                MapItem::Imagery(_) | MapItem::Terrain(_) => {}
            }
        }
        self.map_items.set(items);
    }

    pub fn set_display_rectangle(&self, rectangle: Option<Rectangle>) {
        self.display_rectangle.set(rectangle);
    }

    pub fn set_split_direction(&self, direction: SplitDirection) {
        if let Some(split) = &self.split_direction {
            split.set_if_changed(direction);
        }
    }
}

impl CatalogItem for MappableItem {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_mappable(&self) -> Option<&dyn Mappable> {
        Some(self)
    }

    fn as_feature_info(&self) -> Option<&dyn FeatureInfoUrlTemplate> {
        self.feature_info
            .as_ref()
            .map(|_| self as &dyn FeatureInfoUrlTemplate)
    }
}

impl Mappable for MappableItem {
    fn map_items(&self) -> &Observable<Vec<MapItem>> {
        &self.map_items
    }

    fn display_rectangle(&self) -> Option<Rectangle> {
        self.display_rectangle.get()
    }

    fn split_direction(&self) -> Option<&Observable<SplitDirection>> {
        self.split_direction.as_ref()
    }
}

impl FeatureInfoUrlTemplate for MappableItem {
    fn feature_info_url_template(&self) -> Option<String> {
        self.feature_info
            .as_ref()
            .and_then(|s| s.url_template.clone())
    }

    fn max_requests(&self) -> usize {
        self.feature_info
            .as_ref()
            .map_or(DEFAULT_MAX_REQUESTS, |s| s.max_requests)
    }

    fn show_string_if_property_value_is_null(&self) -> Option<String> {
        self.feature_info
            .as_ref()
            .and_then(|s| s.show_string_if_null.clone())
    }

    fn build_feature_from_pick_result(
        &self,
        _screen: Option<Vec2>,
        picked: &PickedObject,
    ) -> Option<Feature> {
        match (&picked.entity, &picked.primitive) {
            (Some(entity), primitive) => {
                let feature = Feature::from_entity(entity.clone());
                Some(match primitive {
                    Some(p) => feature.with_primitive(p.clone()),
                    None => feature,
                })
            }
            (None, Some(primitive)) => {
                let mut feature = Feature::new(primitive.name()).with_primitive(primitive.clone());
                if let Some(sphere) = primitive.bounding_sphere() {
                    feature = feature.with_position(foundation::math::ecef_to_geodetic(sphere.center));
                }
                Some(feature)
            }
            (None, None) => None,
        }
    }
}

impl fmt::Debug for MappableItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappableItem")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("map_items", &self.map_items.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{CatalogItem, FeatureInfoSettings, MappableItem};
    use foundation::math::Geodetic;
    use foundation::BoundingSphere;
    use layers::MapItem;
    use scene::{DataSource, Entity, PickedObject, Primitive};
    use std::rc::Rc;

    #[test]
    fn map_items_are_tagged_with_the_item() {
        let ds = DataSource::new("points");
        let tileset = Rc::new(Primitive::tileset("buildings"));
        let item = MappableItem::new("layer").with_map_items(vec![
            MapItem::DataSource(ds.clone()),
            MapItem::Primitive(tileset.clone()),
        ]);
        assert_eq!(ds.owner_item(), Some(item.id()));
        assert_eq!(tileset.owner_item(), Some(item.id()));
    }

    #[test]
    fn feature_info_capability_is_opt_in() {
        let plain = MappableItem::new("plain");
        assert!(plain.as_mappable().is_some());
        assert!(plain.as_feature_info().is_none());

        let rich = MappableItem::new("rich").with_feature_info(FeatureInfoSettings {
            url_template: Some("https://example.com/{id}".into()),
            max_requests: 3,
            show_string_if_null: None,
        });
        let info = rich.as_feature_info().unwrap();
        assert_eq!(info.max_requests(), 3);
        assert_eq!(
            info.feature_info_url_template().as_deref(),
            Some("https://example.com/{id}")
        );
    }

    #[test]
    fn builds_features_for_entities_and_primitives() {
        let item = MappableItem::new("x").with_feature_info(FeatureInfoSettings::default());
        let info = item.as_feature_info().unwrap();

        let entity = Rc::new(Entity::new("e").with_position(Geodetic::from_degrees(0.0, 0.0, 0.0)));
        let from_entity = info
            .build_feature_from_pick_result(
                None,
                &PickedObject {
                    entity: Some(entity),
                    primitive: None,
                },
            )
            .unwrap();
        assert_eq!(from_entity.name(), Some("e"));

        let sphere = BoundingSphere::from_geodetic(Geodetic::from_degrees(1.0, 2.0, 0.0), 50.0);
        let primitive = Rc::new(Primitive::model("tower").with_bounding_sphere(sphere));
        let from_primitive = info
            .build_feature_from_pick_result(
                None,
                &PickedObject {
                    entity: None,
                    primitive: Some(primitive),
                },
            )
            .unwrap();
        assert_eq!(from_primitive.name(), Some("tower"));
        assert!(from_primitive.position().is_some());

        assert!(info
            .build_feature_from_pick_result(None, &PickedObject::default())
            .is_none());
    }
}
