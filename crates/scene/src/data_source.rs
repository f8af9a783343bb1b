use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use foundation::math::Geodetic;
use foundation::{BoundingSphere, Id};

use crate::collection::{CollectionOp, OpLog};

/// Progress of the engine's bounding-volume computation for an entity.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BoundsState {
    Pending,
    Ready(BoundingSphere),
    Failed,
}

/// A vector feature owned by a [`DataSource`].
pub struct Entity {
    id: Id,
    name: String,
    description: Option<String>,
    properties: BTreeMap<String, serde_json::Value>,
    position: Cell<Option<Geodetic>>,
    bounds: Cell<BoundsState>,
    bounds_error: RefCell<Option<String>>,
    data_source: RefCell<Weak<DataSource>>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Id::next(),
            name: name.into(),
            description: None,
            properties: BTreeMap::new(),
            position: Cell::new(None),
            bounds: Cell::new(BoundsState::Pending),
            bounds_error: RefCell::new(None),
            data_source: RefCell::new(Weak::new()),
        }
    }

    /// Positions the entity and marks its bounds as a point sphere.
    pub fn with_position(self, position: Geodetic) -> Self {
        self.position.set(Some(position));
        self.bounds
            .set(BoundsState::Ready(BoundingSphere::from_geodetic(position, 0.0)));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn position(&self) -> Option<Geodetic> {
        self.position.get()
    }

    pub fn bounds(&self) -> BoundsState {
        self.bounds.get()
    }

    pub fn set_bounds(&self, bounds: BoundsState) {
        self.bounds.set(bounds);
    }

    /// Makes bounding-sphere queries for this entity fail until cleared.
    pub fn set_bounds_error(&self, error: Option<String>) {
        *self.bounds_error.borrow_mut() = error;
    }

    pub fn bounds_error(&self) -> Option<String> {
        self.bounds_error.borrow().clone()
    }

    pub fn data_source(&self) -> Option<Rc<DataSource>> {
        self.data_source.borrow().upgrade()
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("position", &self.position.get())
            .finish()
    }
}

/// Named collection of entities, typically produced by one catalog item.
pub struct DataSource {
    id: Id,
    name: String,
    entities: RefCell<Vec<Rc<Entity>>>,
    is_loading: Cell<bool>,
    owner_item: Cell<Option<Id>>,
}

impl DataSource {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            id: Id::next(),
            name: name.into(),
            entities: RefCell::new(Vec::new()),
            is_loading: Cell::new(false),
            owner_item: Cell::new(None),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_entity(self: &Rc<Self>, entity: Rc<Entity>) {
        *entity.data_source.borrow_mut() = Rc::downgrade(self);
        self.entities.borrow_mut().push(entity);
    }

    pub fn entities(&self) -> Vec<Rc<Entity>> {
        self.entities.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading.get()
    }

    pub fn set_loading(&self, loading: bool) {
        self.is_loading.set(loading);
    }

    /// Catalog item that produced this data source, if tagged.
    pub fn owner_item(&self) -> Option<Id> {
        self.owner_item.get()
    }

    pub fn set_owner_item(&self, item: Option<Id>) {
        self.owner_item.set(item);
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entities", &self.entities.borrow().len())
            .finish()
    }
}

/// Attached data sources. Index 0 renders at the bottom.
#[derive(Default)]
pub struct DataSourceCollection {
    sources: RefCell<Vec<Rc<DataSource>>>,
    log: OpLog,
}

impl DataSourceCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Rc<DataSource>> {
        self.sources.borrow().get(index).cloned()
    }

    pub fn sources(&self) -> Vec<Rc<DataSource>> {
        self.sources.borrow().clone()
    }

    pub fn index_of(&self, source: &DataSource) -> Option<usize> {
        self.sources.borrow().iter().position(|s| s.id() == source.id())
    }

    pub fn contains(&self, source: &DataSource) -> bool {
        self.index_of(source).is_some()
    }

    pub fn add(&self, source: Rc<DataSource>) {
        let mut sources = self.sources.borrow_mut();
        self.log.push(CollectionOp::Add {
            id: source.id(),
            index: sources.len(),
        });
        sources.push(source);
    }

    pub fn remove(&self, source: &DataSource) -> bool {
        let Some(index) = self.index_of(source) else {
            return false;
        };
        self.sources.borrow_mut().remove(index);
        self.log.push(CollectionOp::Remove(source.id()));
        true
    }

    pub fn raise_to_top(&self, source: &DataSource) {
        let Some(index) = self.index_of(source) else {
            return;
        };
        let mut sources = self.sources.borrow_mut();
        if index + 1 == sources.len() {
            return;
        }
        let s = sources.remove(index);
        sources.push(s);
        self.log.push(CollectionOp::RaiseToTop(source.id()));
    }

    pub fn take_ops(&self) -> Vec<CollectionOp> {
        self.log.take()
    }

    pub fn op_count(&self) -> usize {
        self.log.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{DataSource, DataSourceCollection, Entity};
    use crate::collection::CollectionOp;
    use foundation::math::Geodetic;
    use std::rc::Rc;

    #[test]
    fn entity_knows_its_data_source() {
        let ds = DataSource::new("points");
        let e = Rc::new(Entity::new("p").with_position(Geodetic::from_degrees(1.0, 2.0, 0.0)));
        ds.add_entity(e.clone());
        assert_eq!(e.data_source().map(|d| d.id()), Some(ds.id()));
    }

    #[test]
    fn raise_to_top_moves_to_end() {
        let coll = DataSourceCollection::new();
        let (a, b) = (DataSource::new("a"), DataSource::new("b"));
        coll.add(a.clone());
        coll.add(b.clone());
        coll.take_ops();

        coll.raise_to_top(&b);
        assert!(coll.take_ops().is_empty());
        coll.raise_to_top(&a);
        assert_eq!(coll.index_of(&a), Some(1));
        assert_eq!(coll.take_ops(), vec![CollectionOp::RaiseToTop(a.id())]);
    }
}
