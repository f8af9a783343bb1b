use std::cell::RefCell;

use foundation::Id;

/// Structural mutation applied to one of the engine's collections.
///
/// Collections record these so callers can observe exactly which engine
/// calls a synchronization pass made.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CollectionOp {
    Add { id: Id, index: usize },
    Remove(Id),
    Raise(Id),
    Lower(Id),
    RaiseToTop(Id),
}

#[derive(Debug, Default)]
pub(crate) struct OpLog {
    ops: RefCell<Vec<CollectionOp>>,
}

impl OpLog {
    pub(crate) fn push(&self, op: CollectionOp) {
        self.ops.borrow_mut().push(op);
    }

    pub(crate) fn take(&self) -> Vec<CollectionOp> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.borrow().len()
    }
}
