use std::cell::{Cell, RefCell};
use std::rc::Rc;

use runtime::{Event, ListenerHandle};
use tracing::warn;

/// Tracks whether the scene needs another frame.
///
/// Anything that changes what is on screen calls
/// [`RenderLoopPauser::notify_repaint_required`]; a rendered frame clears the
/// request. A host render loop can idle while no request is pending.
#[derive(Debug, Default)]
pub struct RenderLoopPauser {
    repaint_requested: Cell<bool>,
    notifications: Cell<u64>,
    post_render: RefCell<Option<ListenerHandle>>,
    destroyed: Cell<bool>,
}

impl RenderLoopPauser {
    pub fn new(post_render: &Rc<Event<()>>) -> Rc<Self> {
        let pauser = Rc::new(Self::default());
        let weak = Rc::downgrade(&pauser);
        let handle = post_render.subscribe(move |_| {
            if let Some(pauser) = weak.upgrade() {
                pauser.repaint_requested.set(false);
            }
        });
        *pauser.post_render.borrow_mut() = Some(handle);
        pauser
    }

    pub fn notify_repaint_required(&self) {
        if self.destroyed.get() {
            return;
        }
        self.repaint_requested.set(true);
        self.notifications.set(self.notifications.get() + 1);
    }

    pub fn repaint_requested(&self) -> bool {
        self.repaint_requested.get()
    }

    /// Returns and clears the pending request.
    pub fn take_repaint_request(&self) -> bool {
        self.repaint_requested.replace(false)
    }

    /// Total requests since construction.
    pub fn notifications(&self) -> u64 {
        self.notifications.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.repaint_requested.set(false);
        if let Some(handle) = self.post_render.borrow_mut().take()
            && let Err(err) = handle.remove()
        {
            warn!(%err, "failed to detach render loop pauser");
        }
    }
}
