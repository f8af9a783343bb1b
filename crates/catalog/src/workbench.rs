use std::rc::Rc;

use foundation::Id;
use runtime::Observable;

use crate::error::CatalogError;
use crate::item::CatalogItem;

/// Items the user has added to the map, topmost first.
#[derive(Clone, Default)]
pub struct Workbench {
    items: Observable<Vec<Rc<dyn CatalogItem>>>,
}

impl Workbench {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `item` on top. Adding an item twice is a no-op.
    pub fn add(&self, item: Rc<dyn CatalogItem>) {
        if self.contains(item.id()) {
            return;
        }
        self.items.update(|items| items.insert(0, item));
    }

    /// Inserts at `index` (clamped), 0 being the top.
    pub fn insert(&self, index: usize, item: Rc<dyn CatalogItem>) {
        if self.contains(item.id()) {
            return;
        }
        self.items.update(|items| {
            let index = index.min(items.len());
            items.insert(index, item);
        });
    }

    pub fn remove(&self, id: Id) -> Result<Rc<dyn CatalogItem>, CatalogError> {
        let index = self
            .index_of(id)
            .ok_or(CatalogError::NotFound(id))?;
        Ok(self.items.update(|items| items.remove(index)))
    }

    /// Swaps the item with its neighbour above.
    pub fn move_up(&self, id: Id) -> Result<(), CatalogError> {
        let index = self.index_of(id).ok_or(CatalogError::NotFound(id))?;
        if index > 0 {
            self.items.update(|items| items.swap(index, index - 1));
        }
        Ok(())
    }

    pub fn move_down(&self, id: Id) -> Result<(), CatalogError> {
        let index = self.index_of(id).ok_or(CatalogError::NotFound(id))?;
        if index + 1 < self.len() {
            self.items.update(|items| items.swap(index, index + 1));
        }
        Ok(())
    }

    pub fn find(&self, id: Id) -> Option<Rc<dyn CatalogItem>> {
        self.items
            .with(|items| items.iter().find(|i| i.id() == id).cloned())
    }

    pub fn contains(&self, id: Id) -> bool {
        self.index_of(id).is_some()
    }

    fn index_of(&self, id: Id) -> Option<usize> {
        self.items.with(|items| items.iter().position(|i| i.id() == id))
    }

    pub fn items(&self) -> Vec<Rc<dyn CatalogItem>> {
        self.items.get()
    }

    pub fn len(&self) -> usize {
        self.items.with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.items.with(Vec::is_empty)
    }

    pub fn clear(&self) {
        self.items.set(Vec::new());
    }

    pub fn observable(&self) -> &Observable<Vec<Rc<dyn CatalogItem>>> {
        &self.items
    }
}
