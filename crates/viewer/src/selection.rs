use std::cell::Cell;

use foundation::math::{Vec2, Vec3};
use scene::Scene;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum IndicatorState {
    #[default]
    Hidden,
    Appearing,
    Departing,
}

/// Screen-space marker following the selected feature.
#[derive(Debug, Default)]
pub struct SelectionIndicator {
    position: Cell<Option<Vec3>>,
    screen_position: Cell<Option<Vec2>>,
    state: Cell<IndicatorState>,
    destroyed: Cell<bool>,
}

impl SelectionIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Option<Vec3> {
        self.position.get()
    }

    pub fn set_position(&self, position: Option<Vec3>) {
        self.position.set(position);
    }

    pub fn state(&self) -> IndicatorState {
        self.state.get()
    }

    pub fn is_visible(&self) -> bool {
        self.state.get() == IndicatorState::Appearing
    }

    pub fn screen_position(&self) -> Option<Vec2> {
        self.screen_position.get()
    }

    pub fn animate_appear(&self) {
        if !self.destroyed.get() {
            self.state.set(IndicatorState::Appearing);
        }
    }

    pub fn animate_depart(&self) {
        if !self.destroyed.get() && self.state.get() == IndicatorState::Appearing {
            self.state.set(IndicatorState::Departing);
        }
    }

    /// Re-projects the marker for the current camera.
    pub fn update(&self, scene: &dyn Scene) {
        if self.destroyed.get() {
            return;
        }
        let screen = match (self.is_visible(), self.position.get()) {
            (true, Some(position)) => scene.wgs84_to_window(position),
            _ => None,
        };
        self.screen_position.set(screen);
    }

    pub fn destroy(&self) {
        self.destroyed.set(true);
        self.position.set(None);
        self.screen_position.set(None);
        self.state.set(IndicatorState::Hidden);
    }
}

#[cfg(test)]
mod tests {
    use super::{IndicatorState, SelectionIndicator};
    use foundation::math::{Geodetic, geodetic_to_ecef};
    use scene::headless::HeadlessScene;

    #[test]
    fn follows_the_position_while_visible() {
        let scene = HeadlessScene::try_new(800, 600).unwrap();
        let indicator = SelectionIndicator::new();
        indicator.set_position(Some(geodetic_to_ecef(Geodetic::from_degrees(0.0, 0.0, 0.0))));
        indicator.update(&scene);
        assert!(indicator.screen_position().is_none());

        indicator.animate_appear();
        indicator.update(&scene);
        let screen = indicator.screen_position().unwrap();
        assert!((screen.x - 400.0).abs() < 1e-6);

        indicator.animate_depart();
        indicator.update(&scene);
        assert_eq!(indicator.state(), IndicatorState::Departing);
        assert!(indicator.screen_position().is_none());
    }

    #[test]
    fn destroyed_indicator_stays_hidden() {
        let indicator = SelectionIndicator::new();
        indicator.destroy();
        indicator.animate_appear();
        assert_eq!(indicator.state(), IndicatorState::Hidden);
    }
}
