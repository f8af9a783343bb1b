use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::math::Vec2;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InputEvent {
    LeftClick,
    LeftDown,
    LeftUp,
    MouseMove,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyModifier {
    Shift,
    Ctrl,
    Alt,
}

/// Screen positions in pixels; `end_position` differs only for movement.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct InputArgs {
    pub position: Vec2,
    pub end_position: Vec2,
}

impl InputArgs {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            end_position: position,
        }
    }

    pub fn movement(start: Vec2, end: Vec2) -> Self {
        Self {
            position: start,
            end_position: end,
        }
    }
}

type Action = Rc<dyn Fn(&InputArgs)>;

/// Screen-space input dispatch: one action per (event, modifier) pair.
#[derive(Default)]
pub struct InputHandler {
    actions: RefCell<BTreeMap<(InputEvent, Option<KeyModifier>), Action>>,
}

impl InputHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `action`, replacing any previous one for the same binding.
    pub fn set_input_action(
        &self,
        event: InputEvent,
        modifier: Option<KeyModifier>,
        action: impl Fn(&InputArgs) + 'static,
    ) {
        self.actions
            .borrow_mut()
            .insert((event, modifier), Rc::new(action));
    }

    pub fn remove_input_action(&self, event: InputEvent, modifier: Option<KeyModifier>) -> bool {
        self.actions.borrow_mut().remove(&(event, modifier)).is_some()
    }

    pub fn has_action(&self, event: InputEvent, modifier: Option<KeyModifier>) -> bool {
        self.actions.borrow().contains_key(&(event, modifier))
    }

    pub fn action_count(&self) -> usize {
        self.actions.borrow().len()
    }

    /// Dispatches an input event. Returns whether an action was bound.
    pub fn fire(&self, event: InputEvent, modifier: Option<KeyModifier>, args: InputArgs) -> bool {
        let action = self.actions.borrow().get(&(event, modifier)).cloned();
        match action {
            Some(action) => {
                action(&args);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{InputArgs, InputEvent, InputHandler, KeyModifier};
    use foundation::math::Vec2;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn modifiers_select_distinct_actions() {
        let handler = InputHandler::new();
        let plain = Rc::new(Cell::new(0));
        let shifted = Rc::new(Cell::new(0));
        let (p, s) = (plain.clone(), shifted.clone());
        handler.set_input_action(InputEvent::LeftClick, None, move |_| p.set(p.get() + 1));
        handler.set_input_action(InputEvent::LeftClick, Some(KeyModifier::Shift), move |_| {
            s.set(s.get() + 1)
        });

        let args = InputArgs::at(Vec2::new(1.0, 2.0));
        assert!(handler.fire(InputEvent::LeftClick, None, args));
        assert!(handler.fire(InputEvent::LeftClick, Some(KeyModifier::Shift), args));
        assert!(!handler.fire(InputEvent::LeftUp, None, args));
        assert_eq!((plain.get(), shifted.get()), (1, 1));

        assert!(handler.remove_input_action(InputEvent::LeftClick, None));
        assert!(!handler.fire(InputEvent::LeftClick, None, args));
        assert_eq!(handler.action_count(), 1);
    }

    #[test]
    fn action_may_rebind_itself() {
        let handler = Rc::new(InputHandler::new());
        let h = Rc::downgrade(&handler);
        handler.set_input_action(InputEvent::LeftDown, None, move |_| {
            if let Some(h) = h.upgrade() {
                h.remove_input_action(InputEvent::LeftDown, None);
            }
        });
        handler.fire(InputEvent::LeftDown, None, InputArgs::at(Vec2::new(0.0, 0.0)));
        assert_eq!(handler.action_count(), 0);
    }
}
