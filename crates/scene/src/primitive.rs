use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use foundation::{BoundingSphere, Id};
use runtime::Event;
use tokio::sync::watch;

use crate::collection::{CollectionOp, OpLog};
use crate::credit::Credit;
use crate::error::SceneError;
use crate::imagery::SplitDirection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

/// Load-progress events raised by a streamed 3D tileset.
#[derive(Default)]
pub struct TilesetEvents {
    pub tile_load: Rc<Event<()>>,
    pub all_tiles_loaded: Rc<Event<()>>,
}

pub enum PrimitiveKind {
    Tileset(TilesetEvents),
    Model,
    Generic,
}

/// Engine primitive: a 3D tileset, a model or any other drawable.
pub struct Primitive {
    id: Id,
    name: String,
    kind: PrimitiveKind,
    bounding_sphere: Cell<Option<BoundingSphere>>,
    ready: watch::Sender<Readiness>,
    show: Cell<bool>,
    split_direction: Cell<SplitDirection>,
    owner_item: Cell<Option<Id>>,
    credit: RefCell<Option<Credit>>,
}

impl Primitive {
    pub fn new(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        let (ready, _) = watch::channel(Readiness::Pending);
        Self {
            id: Id::next(),
            name: name.into(),
            kind,
            bounding_sphere: Cell::new(None),
            ready,
            show: Cell::new(true),
            split_direction: Cell::new(SplitDirection::None),
            owner_item: Cell::new(None),
            credit: RefCell::new(None),
        }
    }

    pub fn tileset(name: impl Into<String>) -> Self {
        Self::new(name, PrimitiveKind::Tileset(TilesetEvents::default()))
    }

    pub fn model(name: impl Into<String>) -> Self {
        Self::new(name, PrimitiveKind::Model)
    }

    pub fn with_bounding_sphere(self, sphere: BoundingSphere) -> Self {
        self.bounding_sphere.set(Some(sphere));
        self
    }

    pub fn with_credit(self, credit: Credit) -> Self {
        *self.credit.borrow_mut() = Some(credit);
        self
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PrimitiveKind {
        &self.kind
    }

    pub fn is_tileset(&self) -> bool {
        matches!(self.kind, PrimitiveKind::Tileset(_))
    }

    pub fn tileset_events(&self) -> Option<&TilesetEvents> {
        match &self.kind {
            PrimitiveKind::Tileset(events) => Some(events),
            _ => None,
        }
    }

    pub fn bounding_sphere(&self) -> Option<BoundingSphere> {
        self.bounding_sphere.get()
    }

    pub fn set_bounding_sphere(&self, sphere: Option<BoundingSphere>) {
        self.bounding_sphere.set(sphere);
    }

    pub fn readiness(&self) -> Readiness {
        self.ready.borrow().clone()
    }

    pub fn set_readiness(&self, readiness: Readiness) {
        self.ready.send_replace(readiness);
    }

    /// Resolves once the primitive leaves [`Readiness::Pending`].
    pub fn wait_ready(&self) -> impl Future<Output = Result<(), SceneError>> + 'static {
        let mut rx = self.ready.subscribe();
        async move {
            let state = {
                let current = rx
                    .wait_for(|r| *r != Readiness::Pending)
                    .await
                    .map_err(|_| SceneError::Destroyed)?;
                (*current).clone()
            };
            match state {
                Readiness::Ready => Ok(()),
                Readiness::Failed(msg) => Err(SceneError::PrimitiveFailed(msg)),
                Readiness::Pending => Err(SceneError::PrimitiveFailed("still pending".into())),
            }
        }
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

    pub fn owner_item(&self) -> Option<Id> {
        self.owner_item.get()
    }

    pub fn set_owner_item(&self, item: Option<Id>) {
        self.owner_item.set(item);
    }

    pub fn credit(&self) -> Option<Credit> {
        self.credit.borrow().clone()
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("tileset", &self.is_tileset())
            .field("readiness", &self.readiness())
            .finish()
    }
}

/// Unordered set of attached primitives.
#[derive(Default)]
pub struct PrimitiveCollection {
    primitives: RefCell<Vec<Rc<Primitive>>>,
    log: OpLog,
}

impl PrimitiveCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.primitives.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.borrow().is_empty()
    }

    pub fn primitives(&self) -> Vec<Rc<Primitive>> {
        self.primitives.borrow().clone()
    }

    pub fn contains(&self, primitive: &Primitive) -> bool {
        self.primitives
            .borrow()
            .iter()
            .any(|p| p.id() == primitive.id())
    }

    pub fn add(&self, primitive: Rc<Primitive>) {
        let mut primitives = self.primitives.borrow_mut();
        self.log.push(CollectionOp::Add {
            id: primitive.id(),
            index: primitives.len(),
        });
        primitives.push(primitive);
    }

    pub fn remove(&self, primitive: &Primitive) -> bool {
        let mut primitives = self.primitives.borrow_mut();
        let Some(index) = primitives.iter().position(|p| p.id() == primitive.id()) else {
            return false;
        };
        primitives.remove(index);
        self.log.push(CollectionOp::Remove(primitive.id()));
        true
    }

    pub fn take_ops(&self) -> Vec<CollectionOp> {
        self.log.take()
    }

    pub fn op_count(&self) -> usize {
        self.log.len()
    }
}
