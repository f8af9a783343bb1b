use std::rc::Rc;

use foundation::Rectangle;
use foundation::math::{Geodetic, Vec2, Vec3};
use futures_util::future::LocalBoxFuture;
use runtime::Event;

use crate::camera::{CameraPose, Flight, FlightOutcome, Frustum};
use crate::credit::FrameCredit;
use crate::data_source::{BoundsState, DataSourceCollection, Entity};
use crate::error::SceneError;
use crate::imagery::{FeaturePickFuture, ImageryLayerCollection, SplitDirection};
use crate::input::InputHandler;
use crate::picking::{PickedObject, Ray};
use crate::primitive::PrimitiveCollection;
use crate::terrain::{TerrainProvider, TerrainSource};

/// Pixels read back from the drawing surface, RGBA8, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// The rendering engine boundary.
///
/// Everything the viewer needs from a 3D engine: live collections with
/// adjacent-swap reordering, a camera with flights that report completion,
/// globe ray casting, raster feature picking and per-frame credits.
pub trait Scene {
    fn imagery_layers(&self) -> &ImageryLayerCollection;
    fn data_sources(&self) -> &DataSourceCollection;
    fn primitives(&self) -> &PrimitiveCollection;
    fn input(&self) -> &InputHandler;

    fn terrain_provider(&self) -> Rc<dyn TerrainProvider>;
    fn set_terrain_provider(&self, provider: Rc<dyn TerrainProvider>);
    fn create_terrain_provider(&self, source: &TerrainSource) -> Rc<dyn TerrainProvider>;
    fn set_globe_split_direction(&self, direction: SplitDirection);
    fn set_depth_test_against_terrain(&self, enabled: bool);

    fn camera_pose(&self) -> CameraPose;
    fn frustum(&self) -> Frustum;
    /// Where the camera would naturally go to view `rectangle`.
    fn rectangle_camera_coordinates(&self, rectangle: &Rectangle) -> Geodetic;
    fn fly_to(&self, flight: Flight) -> LocalBoxFuture<'static, FlightOutcome>;

    fn pick_ray(&self, screen: Vec2) -> Option<Ray>;
    fn pick_globe(&self, ray: &Ray) -> Option<Vec3>;
    /// Every object under `screen`, nearest first.
    fn drill_pick(&self, screen: Vec2) -> Vec<PickedObject>;
    /// Queries every imagery layer under `ray`, calling each provider's
    /// `pick_features` synchronously. `None` when no layer was queried.
    fn pick_imagery_layer_features(&self, ray: &Ray) -> Option<FeaturePickFuture>;
    fn wgs84_to_window(&self, position: Vec3) -> Option<Vec2>;
    fn entity_bounding_sphere(&self, entity: &Entity) -> Result<BoundsState, SceneError>;

    fn canvas_size(&self) -> (u32, u32);
    fn render(&self);
    fn post_render(&self) -> &Rc<Event<()>>;
    fn render_error(&self) -> &Rc<Event<String>>;
    fn frame_credits(&self) -> Vec<FrameCredit>;
    fn capture_canvas(&self) -> Result<Canvas, SceneError>;

    fn set_split_position(&self, position: f64);
    fn set_inputs_enabled(&self, enabled: bool);
    fn set_use_browser_recommended_resolution(&self, enabled: bool);
    fn set_maximum_screen_space_error(&self, sse: f64);

    fn destroy(&self);
    fn is_destroyed(&self) -> bool;
}
