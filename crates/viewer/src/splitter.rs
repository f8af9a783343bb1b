use std::rc::Rc;

use catalog::CatalogItem;
use layers::{ImageryLayerCache, MapItem};
use scene::{ImageryLayer, Primitive, SplitDirection};

/// Which side of a split line at `split_position` (fraction of `width`)
/// the screen column `x` falls on.
pub fn split_side_for_screen_position(x: f64, width: f64, split_position: f64) -> SplitDirection {
    if x <= split_position * width {
        SplitDirection::Left
    } else {
        SplitDirection::Right
    }
}

/// Engine objects that can be assigned a splitter side.
#[derive(Debug, Clone)]
pub enum SplittableMapItem {
    Imagery(Rc<ImageryLayer>),
    Tileset(Rc<Primitive>),
}

impl SplittableMapItem {
    pub fn split_direction(&self) -> SplitDirection {
        match self {
            SplittableMapItem::Imagery(layer) => layer.split_direction(),
            SplittableMapItem::Tileset(tileset) => tileset.split_direction(),
        }
    }

    pub fn set_split_direction(&self, direction: SplitDirection) {
        match self {
            SplittableMapItem::Imagery(layer) => layer.set_split_direction(direction),
            SplittableMapItem::Tileset(tileset) => tileset.set_split_direction(direction),
        }
    }
}

/// Imagery layers (through the shared cache, so they are the layers on the
/// globe) and 3D tilesets of `item`.
pub fn get_splittable_map_items(
    item: &dyn CatalogItem,
    cache: &mut ImageryLayerCache,
) -> Vec<SplittableMapItem> {
    let Some(mappable) = item.as_mappable() else {
        return Vec::new();
    };
    mappable.map_items().with(|items| {
        items
            .iter()
            .filter_map(|m| match m {
                MapItem::Imagery(parts) => {
                    let layer = cache.layer_for(parts);
                    parts.apply_to(&layer);
                    Some(SplittableMapItem::Imagery(layer))
                }
                MapItem::Primitive(p) if p.is_tileset() => {
                    Some(SplittableMapItem::Tileset(Rc::clone(p)))
                }
                _ => None,
            })
            .collect()
    })
}

/// Assigns each splittable item's side to its engine objects, or `None`
/// everywhere while the splitter is hidden. Returns how many objects changed.
pub fn apply_split_directions(
    items: &[Rc<dyn CatalogItem>],
    show_splitter: bool,
    cache: &mut ImageryLayerCache,
) -> usize {
    let mut changed = 0;
    for item in items {
        let Some(split) = item.as_mappable().and_then(|m| m.split_direction()) else {
            continue;
        };
        let direction = if show_splitter {
            split.get()
        } else {
            SplitDirection::None
        };
        for target in get_splittable_map_items(item.as_ref(), cache) {
            if target.split_direction() != direction {
                target.set_split_direction(direction);
                changed += 1;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::{apply_split_directions, get_splittable_map_items, split_side_for_screen_position};
    use catalog::{CatalogItem, MappableItem};
    use layers::{ImageryLayerCache, ImageryParts, MapItem};
    use scene::headless::StaticImageryProvider;
    use scene::{DataSource, ImageryProvider, Primitive, SplitDirection};
    use std::rc::Rc;

    #[test]
    fn screen_side_is_inclusive_on_the_left() {
        assert_eq!(split_side_for_screen_position(400.0, 800.0, 0.5), SplitDirection::Left);
        assert_eq!(split_side_for_screen_position(401.0, 800.0, 0.5), SplitDirection::Right);
        assert_eq!(split_side_for_screen_position(0.0, 800.0, 0.0), SplitDirection::Left);
    }

    #[test]
    fn only_imagery_and_tilesets_are_splittable() {
        let provider: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some("a")));
        let item = MappableItem::new("mixed").with_map_items(vec![
            MapItem::Imagery(ImageryParts::new(provider).with_alpha(0.4)),
            MapItem::Primitive(Rc::new(Primitive::tileset("city"))),
            MapItem::Primitive(Rc::new(Primitive::model("tower"))),
            MapItem::DataSource(DataSource::new("points")),
        ]);
        let mut cache = ImageryLayerCache::new();
        let splittable = get_splittable_map_items(&item, &mut cache);
        assert_eq!(splittable.len(), 2);

        // Same cached layer on a second call.
        let again = get_splittable_map_items(&item, &mut cache);
        match (&splittable[0], &again[0]) {
            (super::SplittableMapItem::Imagery(a), super::SplittableMapItem::Imagery(b)) => {
                assert!(Rc::ptr_eq(a, b));
                assert_eq!(a.alpha(), 0.4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hidden_splitter_resets_every_side() {
        let tileset = Rc::new(Primitive::tileset("city"));
        let item = Rc::new(
            MappableItem::new("city")
                .splittable()
                .with_map_items(vec![MapItem::Primitive(tileset.clone())]),
        );
        item.set_split_direction(SplitDirection::Right);
        let items: Vec<Rc<dyn CatalogItem>> = vec![item, Rc::new(MappableItem::new("plain"))];
        let mut cache = ImageryLayerCache::new();

        assert_eq!(apply_split_directions(&items, true, &mut cache), 1);
        assert_eq!(tileset.split_direction(), SplitDirection::Right);
        assert_eq!(apply_split_directions(&items, true, &mut cache), 0);
        assert_eq!(apply_split_directions(&items, false, &mut cache), 1);
        assert_eq!(tileset.split_direction(), SplitDirection::None);
    }
}
