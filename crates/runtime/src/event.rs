use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    UnknownListener(ListenerId),
    /// The event source was dropped before the listener was removed.
    SourceDropped(ListenerId),
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::UnknownListener(id) => write!(f, "no listener with id {}", id.0),
            EventError::SourceDropped(id) => {
                write!(f, "event source dropped before removing listener {}", id.0)
            }
        }
    }
}

impl std::error::Error for EventError {}

/// Synchronous multi-listener event.
///
/// Listeners are invoked in registration order. `raise` iterates a snapshot,
/// so listeners may add or remove listeners while being notified.
pub struct Event<A> {
    next_id: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(&A)>)>>,
}

impl<A> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Event<A> {
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(1),
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, f: impl Fn(&A) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, Rc::new(f)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<(), EventError> {
        let mut listeners = self.listeners.borrow_mut();
        let Some(index) = listeners.iter().position(|(lid, _)| *lid == id) else {
            return Err(EventError::UnknownListener(id));
        };
        listeners.remove(index);
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn raise(&self, arg: &A) {
        let snapshot: Vec<Rc<dyn Fn(&A)>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();
        for f in snapshot {
            f(arg);
        }
    }
}

impl<A: 'static> Event<A> {
    /// Registers `f` and returns a handle that can remove it later without
    /// keeping the event alive.
    pub fn subscribe(self: &Rc<Self>, f: impl Fn(&A) + 'static) -> ListenerHandle {
        let id = self.add_listener(f);
        let weak: Weak<Event<A>> = Rc::downgrade(self);
        ListenerHandle {
            id,
            remove: Box::new(move || match weak.upgrade() {
                Some(event) => event.remove_listener(id),
                None => Err(EventError::SourceDropped(id)),
            }),
        }
    }
}

/// Detached remover for a listener registered through [`Event::subscribe`].
pub struct ListenerHandle {
    id: ListenerId,
    remove: Box<dyn FnOnce() -> Result<(), EventError>>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn remove(self) -> Result<(), EventError> {
        (self.remove)()
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

/// Collects listener handles so they can be released together.
#[derive(Debug, Default)]
pub struct EventHelper {
    handles: Vec<ListenerHandle>,
}

impl EventHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<A: 'static>(&mut self, event: &Rc<Event<A>>, f: impl Fn(&A) + 'static) {
        self.handles.push(event.subscribe(f));
    }

    pub fn push(&mut self, handle: ListenerHandle) {
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Removes every listener. Failures are logged and do not stop the rest.
    /// Returns the number of failed removals.
    pub fn remove_all(&mut self) -> usize {
        let mut failed = 0;
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.remove() {
                warn!(%err, "failed to remove event listener");
                failed += 1;
            }
        }
        failed
    }
}
