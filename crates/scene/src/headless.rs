//! Deterministic in-memory engine.
//!
//! Models collections, a pinhole camera over the WGS84 ellipsoid, credits,
//! render events and input dispatch without drawing anything. Flights either
//! complete synchronously or wait for [`HeadlessScene::complete_flight`].

use std::cell::{Cell, RefCell};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_3};
use std::rc::Rc;
use std::time::Duration;

use foundation::Rectangle;
use foundation::math::{Geodetic, Vec2, Vec3, WGS84_A, ecef_to_geodetic};
use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture, try_join_all};
use runtime::Event;
use tokio::sync::oneshot;
use tracing::debug;

use crate::camera::{CameraPose, Flight, FlightDestination, FlightOutcome, Frustum, Orientation};
use crate::credit::{Credit, CreditDisplay, FrameCredit};
use crate::data_source::{BoundsState, DataSourceCollection, Entity};
use crate::error::{PickError, SceneError, TerrainError};
use crate::imagery::{
    FeaturePickFuture, ImageryLayerCollection, ImageryLayerFeatureInfo, ImageryProvider,
    SplitDirection, TileCoords,
};
use crate::input::InputHandler;
use crate::picking::{PickedObject, Ray, ray_ellipsoid_intersection};
use crate::primitive::PrimitiveCollection;
use crate::scene::{Canvas, Scene};
use crate::terrain::{EllipsoidTerrainProvider, TerrainProvider, TerrainSource};

const DEFAULT_ALTITUDE_M: f64 = 20_000_000.0;
const ENTITY_PICK_TOLERANCE_PX: f64 = 4.0;
const MINIMUM_DEFAULT_RANGE_M: f64 = 100.0;
const CLEAR_COLOR: [u8; 4] = [16, 24, 40, 255];

struct PendingFlight {
    pose: CameraPose,
    done: oneshot::Sender<FlightOutcome>,
}

pub struct HeadlessScene {
    width: u32,
    height: u32,
    frustum: Frustum,
    imagery: ImageryLayerCollection,
    data_sources: DataSourceCollection,
    primitives: PrimitiveCollection,
    input: InputHandler,
    terrain: RefCell<Rc<dyn TerrainProvider>>,
    terrain_providers_created: Cell<usize>,
    globe_split_direction: Cell<SplitDirection>,
    depth_test_against_terrain: Cell<bool>,
    camera: Cell<CameraPose>,
    instant_flights: Cell<bool>,
    pending_flight: RefCell<Option<PendingFlight>>,
    flights: RefCell<Vec<Flight>>,
    post_render: Rc<Event<()>>,
    render_error: Rc<Event<String>>,
    render_failure: RefCell<Option<String>>,
    credits: RefCell<CreditDisplay>,
    extra_credits: RefCell<Vec<FrameCredit>>,
    frames_rendered: Cell<u64>,
    split_position: Cell<f64>,
    inputs_enabled: Cell<bool>,
    browser_recommended_resolution: Cell<bool>,
    maximum_screen_space_error: Cell<f64>,
    imagery_pick_level: Cell<u32>,
    destroyed: Cell<bool>,
}

impl HeadlessScene {
    /// Fails like a real engine would when no drawing surface is available.
    pub fn try_new(width: u32, height: u32) -> Result<Self, SceneError> {
        if width == 0 || height == 0 {
            return Err(SceneError::ContextUnavailable(format!(
                "cannot create a {width}x{height} drawing surface"
            )));
        }
        Ok(Self {
            width,
            height,
            frustum: Frustum {
                fov_y: FRAC_PI_3,
                aspect: width as f64 / height as f64,
            },
            imagery: ImageryLayerCollection::new(),
            data_sources: DataSourceCollection::new(),
            primitives: PrimitiveCollection::new(),
            input: InputHandler::new(),
            terrain: RefCell::new(Rc::new(EllipsoidTerrainProvider)),
            terrain_providers_created: Cell::new(0),
            globe_split_direction: Cell::new(SplitDirection::None),
            depth_test_against_terrain: Cell::new(false),
            camera: Cell::new(CameraPose::looking_from(
                Geodetic::new(0.0, 0.0, DEFAULT_ALTITUDE_M),
                0.0,
                -FRAC_PI_2,
            )),
            instant_flights: Cell::new(true),
            pending_flight: RefCell::new(None),
            flights: RefCell::new(Vec::new()),
            post_render: Rc::new(Event::new()),
            render_error: Rc::new(Event::new()),
            render_failure: RefCell::new(None),
            credits: RefCell::new(CreditDisplay::default()),
            extra_credits: RefCell::new(Vec::new()),
            frames_rendered: Cell::new(0),
            split_position: Cell::new(0.5),
            inputs_enabled: Cell::new(true),
            browser_recommended_resolution: Cell::new(true),
            maximum_screen_space_error: Cell::new(2.0),
            imagery_pick_level: Cell::new(10),
            destroyed: Cell::new(false),
        })
    }

    pub fn set_camera(&self, pose: CameraPose) {
        self.camera.set(pose);
    }

    /// When disabled, flights wait for [`Self::complete_flight`] and a new
    /// flight cancels the one in progress.
    pub fn set_instant_flights(&self, instant: bool) {
        self.instant_flights.set(instant);
    }

    /// Finishes the in-progress flight. Returns false when none is pending.
    pub fn complete_flight(&self) -> bool {
        let Some(pending) = self.pending_flight.borrow_mut().take() else {
            return false;
        };
        self.camera.set(pending.pose);
        let _ = pending.done.send(FlightOutcome::Completed);
        true
    }

    pub fn flights(&self) -> Vec<Flight> {
        self.flights.borrow().clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.get()
    }

    /// While set, every render raises the render-error event instead of
    /// completing a frame.
    pub fn set_render_failure(&self, error: Option<String>) {
        *self.render_failure.borrow_mut() = error;
    }

    /// Usage reported on every frame in addition to layer credits.
    pub fn push_frame_credit(&self, credit: Credit, count: u32) {
        self.extra_credits
            .borrow_mut()
            .push(FrameCredit { credit, count });
    }

    pub fn clear_frame_credits(&self) {
        self.extra_credits.borrow_mut().clear();
    }

    pub fn terrain_providers_created(&self) -> usize {
        self.terrain_providers_created.get()
    }

    pub fn globe_split_direction(&self) -> SplitDirection {
        self.globe_split_direction.get()
    }

    pub fn depth_test_against_terrain(&self) -> bool {
        self.depth_test_against_terrain.get()
    }

    pub fn split_position(&self) -> f64 {
        self.split_position.get()
    }

    pub fn inputs_enabled(&self) -> bool {
        self.inputs_enabled.get()
    }

    pub fn browser_recommended_resolution(&self) -> bool {
        self.browser_recommended_resolution.get()
    }

    pub fn maximum_screen_space_error(&self) -> f64 {
        self.maximum_screen_space_error.get()
    }

    pub fn set_imagery_pick_level(&self, level: u32) {
        self.imagery_pick_level.set(level);
    }

    fn default_range(&self, radius: f64) -> f64 {
        (radius / (self.frustum.fov_y * 0.5).sin()).max(MINIMUM_DEFAULT_RANGE_M)
    }

    fn pose_for(&self, destination: &FlightDestination) -> CameraPose {
        match destination {
            FlightDestination::Position {
                destination,
                orientation,
            } => match orientation {
                None => CameraPose::looking_from(ecef_to_geodetic(*destination), 0.0, -FRAC_PI_2),
                Some(Orientation::HeadingPitch { heading, pitch }) => {
                    CameraPose::looking_from(ecef_to_geodetic(*destination), *heading, *pitch)
                }
                Some(Orientation::DirectionUp { direction, up }) => CameraPose {
                    position: *destination,
                    direction: *direction,
                    up: *up,
                },
            },
            FlightDestination::Rectangle(rectangle) => CameraPose::looking_from(
                self.rectangle_camera_coordinates(rectangle),
                0.0,
                -FRAC_PI_2,
            ),
            FlightDestination::BoundingSphere { sphere, offset } => {
                let range = offset
                    .range
                    .unwrap_or_else(|| self.default_range(sphere.radius));
                CameraPose::looking_at(sphere.center, offset.heading, offset.pitch, range)
            }
        }
    }
}

impl Scene for HeadlessScene {
    fn imagery_layers(&self) -> &ImageryLayerCollection {
        &self.imagery
    }

    fn data_sources(&self) -> &DataSourceCollection {
        &self.data_sources
    }

    fn primitives(&self) -> &PrimitiveCollection {
        &self.primitives
    }

    fn input(&self) -> &InputHandler {
        &self.input
    }

    fn terrain_provider(&self) -> Rc<dyn TerrainProvider> {
        Rc::clone(&self.terrain.borrow())
    }

    fn set_terrain_provider(&self, provider: Rc<dyn TerrainProvider>) {
        *self.terrain.borrow_mut() = provider;
    }

    fn create_terrain_provider(&self, source: &TerrainSource) -> Rc<dyn TerrainProvider> {
        self.terrain_providers_created
            .set(self.terrain_providers_created.get() + 1);
        match source {
            TerrainSource::Ellipsoid => Rc::new(EllipsoidTerrainProvider),
            other => Rc::new(HeadlessTerrainProvider::new(other.clone())),
        }
    }

    fn set_globe_split_direction(&self, direction: SplitDirection) {
        self.globe_split_direction.set(direction);
    }

    fn set_depth_test_against_terrain(&self, enabled: bool) {
        self.depth_test_against_terrain.set(enabled);
    }

    fn camera_pose(&self) -> CameraPose {
        self.camera.get()
    }

    fn frustum(&self) -> Frustum {
        self.frustum
    }

    fn rectangle_camera_coordinates(&self, rectangle: &Rectangle) -> Geodetic {
        let center = rectangle.center();
        let width_m = rectangle.width() * WGS84_A * center.lat_rad.cos();
        let height_m = rectangle.height() * WGS84_A;
        let half_fov_y = self.frustum.fov_y * 0.5;
        let half_fov_x = (half_fov_y.tan() * self.frustum.aspect).atan();
        let altitude = (width_m * 0.5 / half_fov_x.tan()).max(height_m * 0.5 / half_fov_y.tan());
        center.with_alt(altitude)
    }

    fn fly_to(&self, flight: Flight) -> LocalBoxFuture<'static, FlightOutcome> {
        if self.destroyed.get() {
            return future::ready(FlightOutcome::Cancelled).boxed_local();
        }
        let pose = self.pose_for(&flight.destination);
        debug!(destination = ?flight.destination, "camera flight");
        self.flights.borrow_mut().push(flight);

        if self.instant_flights.get() {
            self.camera.set(pose);
            return future::ready(FlightOutcome::Completed).boxed_local();
        }

        let (done, rx) = oneshot::channel();
        if let Some(previous) = self
            .pending_flight
            .borrow_mut()
            .replace(PendingFlight { pose, done })
        {
            let _ = previous.done.send(FlightOutcome::Cancelled);
        }
        rx.map(|outcome| outcome.unwrap_or(FlightOutcome::Cancelled))
            .boxed_local()
    }

    fn pick_ray(&self, screen: Vec2) -> Option<Ray> {
        let pose = self.camera.get();
        let ndc_x = 2.0 * screen.x / self.width as f64 - 1.0;
        let ndc_y = 1.0 - 2.0 * screen.y / self.height as f64;
        let t = (self.frustum.fov_y * 0.5).tan();
        let dir = pose.direction
            + pose.right().scale(ndc_x * t * self.frustum.aspect)
            + pose.up.scale(ndc_y * t);
        Some(Ray::new(pose.position, dir.normalize()?))
    }

    fn pick_globe(&self, ray: &Ray) -> Option<Vec3> {
        ray_ellipsoid_intersection(ray)
    }

    fn drill_pick(&self, screen: Vec2) -> Vec<PickedObject> {
        let mut hits: Vec<(f64, PickedObject)> = Vec::new();
        let camera = self.camera.get().position;

        for source in self.data_sources.sources().iter().rev() {
            for entity in source.entities() {
                let Some(position) = entity.position() else {
                    continue;
                };
                let ecef = foundation::math::geodetic_to_ecef(position);
                let Some(window) = self.wgs84_to_window(ecef) else {
                    continue;
                };
                let dx = window.x - screen.x;
                let dy = window.y - screen.y;
                if (dx * dx + dy * dy).sqrt() <= ENTITY_PICK_TOLERANCE_PX {
                    hits.push((
                        ecef.distance(camera),
                        PickedObject {
                            entity: Some(entity),
                            primitive: None,
                        },
                    ));
                }
            }
        }

        if let Some(ray) = self.pick_ray(screen) {
            for primitive in self.primitives.primitives() {
                if !primitive.show() {
                    continue;
                }
                let Some(sphere) = primitive.bounding_sphere() else {
                    continue;
                };
                let to_center = sphere.center - ray.origin;
                let along = to_center.dot(ray.dir);
                if along < 0.0 {
                    continue;
                }
                let closest = ray.at(along);
                if closest.distance(sphere.center) <= sphere.radius {
                    hits.push((
                        along,
                        PickedObject {
                            entity: None,
                            primitive: Some(primitive),
                        },
                    ));
                }
            }
        }

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, hit)| hit).collect()
    }

    fn pick_imagery_layer_features(&self, ray: &Ray) -> Option<FeaturePickFuture> {
        let point = self.pick_globe(ray)?;
        let geo = ecef_to_geodetic(point);

        let mut picks: Vec<FeaturePickFuture> = Vec::new();
        for layer in self.imagery.layers().into_iter().rev() {
            if !layer.show() {
                continue;
            }
            if let Some(extent) = layer.extent()
                && !extent.contains(geo)
            {
                continue;
            }
            let provider = layer.provider();
            let level = provider.maximum_level().min(self.imagery_pick_level.get());
            let coords = TileCoords::from_geographic(geo.lon_rad, geo.lat_rad, level);
            let Some(pick) = provider.pick_features(coords, geo.lon_rad, geo.lat_rad) else {
                continue;
            };
            picks.push(
                async move {
                    let mut features = pick.await?;
                    for feature in &mut features {
                        feature.imagery_layer = Some(Rc::clone(&layer));
                    }
                    Ok::<_, PickError>(features)
                }
                .boxed_local(),
            );
        }

        if picks.is_empty() {
            return None;
        }
        Some(
            async move {
                let groups = try_join_all(picks).await?;
                let features: Vec<ImageryLayerFeatureInfo> = groups.into_iter().flatten().collect();
                Ok::<_, PickError>(features)
            }
            .boxed_local(),
        )
    }

    fn wgs84_to_window(&self, position: Vec3) -> Option<Vec2> {
        let pose = self.camera.get();
        let rel = position - pose.position;
        let depth = rel.dot(pose.direction);
        if depth <= 0.0 {
            return None;
        }
        let t = (self.frustum.fov_y * 0.5).tan();
        let x = rel.dot(pose.right()) / (depth * t * self.frustum.aspect);
        let y = rel.dot(pose.up) / (depth * t);
        Some(Vec2::new(
            (x + 1.0) * 0.5 * self.width as f64,
            (1.0 - y) * 0.5 * self.height as f64,
        ))
    }

    fn entity_bounding_sphere(&self, entity: &Entity) -> Result<BoundsState, SceneError> {
        if self.destroyed.get() {
            return Err(SceneError::Destroyed);
        }
        if let Some(err) = entity.bounds_error() {
            return Err(SceneError::BoundsUnavailable(err));
        }
        Ok(entity.bounds())
    }

    fn canvas_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&self) {
        if self.destroyed.get() {
            return;
        }
        let failure = self.render_failure.borrow().clone();
        if let Some(err) = failure {
            self.render_error.raise(&err);
            return;
        }

        {
            let mut credits = self.credits.borrow_mut();
            credits.begin_frame();
            for layer in self.imagery.layers() {
                if layer.show()
                    && let Some(credit) = layer.provider().credit()
                {
                    credits.add(&credit);
                }
            }
            for primitive in self.primitives.primitives() {
                if primitive.show()
                    && let Some(credit) = primitive.credit()
                {
                    credits.add(&credit);
                }
            }
            if let Some(credit) = self.terrain.borrow().credit() {
                credits.add(&credit);
            }
            for extra in self.extra_credits.borrow().iter() {
                for _ in 0..extra.count {
                    credits.add(&extra.credit);
                }
            }
        }

        self.frames_rendered.set(self.frames_rendered.get() + 1);
        self.post_render.raise(&());
    }

    fn post_render(&self) -> &Rc<Event<()>> {
        &self.post_render
    }

    fn render_error(&self) -> &Rc<Event<String>> {
        &self.render_error
    }

    fn frame_credits(&self) -> Vec<FrameCredit> {
        self.credits.borrow().frame_credits().to_vec()
    }

    fn capture_canvas(&self) -> Result<Canvas, SceneError> {
        if self.destroyed.get() {
            return Err(SceneError::Destroyed);
        }
        let pixels = self.width as usize * self.height as usize;
        Ok(Canvas {
            width: self.width,
            height: self.height,
            rgba: CLEAR_COLOR.repeat(pixels),
        })
    }

    fn set_split_position(&self, position: f64) {
        self.split_position.set(position);
    }

    fn set_inputs_enabled(&self, enabled: bool) {
        self.inputs_enabled.set(enabled);
    }

    fn set_use_browser_recommended_resolution(&self, enabled: bool) {
        self.browser_recommended_resolution.set(enabled);
    }

    fn set_maximum_screen_space_error(&self, sse: f64) {
        self.maximum_screen_space_error.set(sse);
    }

    fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        if let Some(pending) = self.pending_flight.borrow_mut().take() {
            let _ = pending.done.send(FlightOutcome::Cancelled);
        }
        self.imagery.remove_all();
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }
}

enum StaticResponse {
    Features(Vec<ImageryLayerFeatureInfo>),
    Fail(String),
    Unsupported,
}

/// Raster provider answering feature picks from a fixed response.
pub struct StaticImageryProvider {
    url: Option<String>,
    credit: Option<Credit>,
    rectangle: Option<Rectangle>,
    response: StaticResponse,
    delay: Option<Duration>,
    calls: Cell<usize>,
    last_coords: Cell<Option<TileCoords>>,
}

impl StaticImageryProvider {
    pub fn new(url: Option<&str>) -> Self {
        Self {
            url: url.map(str::to_string),
            credit: None,
            rectangle: None,
            response: StaticResponse::Features(Vec::new()),
            delay: None,
            calls: Cell::new(0),
            last_coords: Cell::new(None),
        }
    }

    pub fn with_features(mut self, features: Vec<ImageryLayerFeatureInfo>) -> Self {
        self.response = StaticResponse::Features(features);
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.response = StaticResponse::Fail(message.into());
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.response = StaticResponse::Unsupported;
        self
    }

    pub fn with_credit(mut self, credit: Credit) -> Self {
        self.credit = Some(credit);
        self
    }

    pub fn with_rectangle(mut self, rectangle: Rectangle) -> Self {
        self.rectangle = Some(rectangle);
        self
    }

    /// Responses resolve after `delay` of (tokio) time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    pub fn last_coords(&self) -> Option<TileCoords> {
        self.last_coords.get()
    }
}

impl ImageryProvider for StaticImageryProvider {
    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn credit(&self) -> Option<Credit> {
        self.credit.clone()
    }

    fn rectangle(&self) -> Option<Rectangle> {
        self.rectangle
    }

    fn pick_features(
        &self,
        coords: TileCoords,
        _lon_rad: f64,
        _lat_rad: f64,
    ) -> Option<FeaturePickFuture> {
        self.calls.set(self.calls.get() + 1);
        self.last_coords.set(Some(coords));
        let result = match &self.response {
            StaticResponse::Unsupported => return None,
            StaticResponse::Features(features) => Ok(features.clone()),
            StaticResponse::Fail(message) => Err(PickError::Provider {
                url: self.url.clone(),
                message: message.clone(),
            }),
        };
        let delay = self.delay;
        Some(
            async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                result
            }
            .boxed_local(),
        )
    }
}

/// Terrain provider returning a constant height.
pub struct HeadlessTerrainProvider {
    source: TerrainSource,
    height: f64,
    delay: Option<Duration>,
    ready_error: Option<String>,
    sample_error: Option<String>,
    credit: Option<Credit>,
    samples: Cell<usize>,
}

impl HeadlessTerrainProvider {
    pub fn new(source: TerrainSource) -> Self {
        Self {
            source,
            height: 0.0,
            delay: None,
            ready_error: None,
            sample_error: None,
            credit: None,
            samples: Cell::new(0),
        }
    }

    pub fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing_ready(mut self, message: impl Into<String>) -> Self {
        self.ready_error = Some(message.into());
        self
    }

    pub fn failing_samples(mut self, message: impl Into<String>) -> Self {
        self.sample_error = Some(message.into());
        self
    }

    pub fn with_credit(mut self, credit: Credit) -> Self {
        self.credit = Some(credit);
        self
    }

    pub fn samples(&self) -> usize {
        self.samples.get()
    }
}

impl TerrainProvider for HeadlessTerrainProvider {
    fn ready(&self) -> LocalBoxFuture<'static, Result<(), TerrainError>> {
        let result = match &self.ready_error {
            Some(msg) => Err(TerrainError::NotReady(msg.clone())),
            None => Ok(()),
        };
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed_local()
    }

    fn sample_heights(
        &self,
        _level: u32,
        positions: &[Geodetic],
    ) -> LocalBoxFuture<'static, Result<Vec<f64>, TerrainError>> {
        self.samples.set(self.samples.get() + 1);
        let result = match &self.sample_error {
            Some(msg) => Err(TerrainError::Sample(msg.clone())),
            None => Ok(vec![self.height; positions.len()]),
        };
        let delay = self.delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed_local()
    }

    fn source(&self) -> TerrainSource {
        self.source.clone()
    }

    fn credit(&self) -> Option<Credit> {
        self.credit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{HeadlessScene, StaticImageryProvider};
    use crate::camera::{Flight, FlightDestination, FlightOutcome, HeadingPitchRange};
    use crate::credit::Credit;
    use crate::data_source::{DataSource, Entity};
    use crate::error::PickError;
    use crate::imagery::{ImageryLayer, ImageryLayerFeatureInfo, ImageryProvider};
    use crate::primitive::Primitive;
    use crate::scene::Scene;
    use foundation::BoundingSphere;
    use foundation::math::{Geodetic, Vec2, geodetic_to_ecef};
    use std::cell::Cell;
    use std::rc::Rc;

    fn scene() -> HeadlessScene {
        HeadlessScene::try_new(800, 600).unwrap()
    }

    fn center(scene: &HeadlessScene) -> Vec2 {
        let (w, h) = scene.canvas_size();
        Vec2::new(w as f64 / 2.0, h as f64 / 2.0)
    }

    #[test]
    fn zero_sized_canvas_fails_construction() {
        assert!(HeadlessScene::try_new(0, 600).is_err());
    }

    #[test]
    fn screen_center_round_trips_through_the_globe() {
        let s = scene();
        let ray = s.pick_ray(center(&s)).unwrap();
        let hit = s.pick_globe(&ray).unwrap();
        let window = s.wgs84_to_window(hit).unwrap();
        assert!((window.x - 400.0).abs() < 1e-6);
        assert!((window.y - 300.0).abs() < 1e-6);
    }

    #[test]
    fn drill_pick_finds_entities_under_the_cursor() {
        let s = scene();
        let ds = DataSource::new("points");
        let e = Rc::new(Entity::new("origin").with_position(Geodetic::from_degrees(0.0, 0.0, 0.0)));
        ds.add_entity(e.clone());
        s.data_sources().add(ds);

        let hits = s.drill_pick(center(&s));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.as_ref().map(|e| e.id()), Some(e.id()));
        assert!(s.drill_pick(Vec2::new(10.0, 10.0)).is_empty());
    }

    #[test]
    fn drill_pick_includes_primitives_hit_by_the_ray() {
        let s = scene();
        let sphere = BoundingSphere::new(geodetic_to_ecef(Geodetic::from_degrees(0.0, 0.0, 0.0)), 50_000.0);
        let p = Rc::new(Primitive::tileset("city").with_bounding_sphere(sphere));
        s.primitives().add(p.clone());
        let hits = s.drill_pick(center(&s));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].primitive.as_ref().map(|p| p.id()), Some(p.id()));
    }

    #[tokio::test]
    async fn imagery_pick_tags_layers_and_fails_as_a_whole() {
        let s = scene();
        let ok: Rc<dyn ImageryProvider> = Rc::new(
            StaticImageryProvider::new(Some("ok"))
                .with_features(vec![ImageryLayerFeatureInfo::named("a")]),
        );
        let layer = Rc::new(ImageryLayer::new(ok, None));
        s.imagery_layers().add(layer.clone(), None);

        let ray = s.pick_ray(center(&s)).unwrap();
        let features = s.pick_imagery_layer_features(&ray).unwrap().await.unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(
            features[0].imagery_layer.as_ref().map(|l| l.id()),
            Some(layer.id())
        );

        let bad: Rc<dyn ImageryProvider> = Rc::new(StaticImageryProvider::new(Some("bad")).failing("boom"));
        s.imagery_layers().add(Rc::new(ImageryLayer::new(bad, None)), None);
        let err = s.pick_imagery_layer_features(&ray).unwrap().await.unwrap_err();
        assert!(matches!(err, PickError::Provider { .. }));
    }

    #[test]
    fn render_collects_credits_and_raises_post_render() {
        let s = scene();
        let provider: Rc<dyn ImageryProvider> =
            Rc::new(StaticImageryProvider::new(Some("a")).with_credit(Credit::new("Esri")));
        s.imagery_layers().add(Rc::new(ImageryLayer::new(provider, None)), None);
        s.push_frame_credit(Credit::new("OSM"), 3);

        let frames = Rc::new(Cell::new(0));
        let f = frames.clone();
        s.post_render().add_listener(move |_| f.set(f.get() + 1));
        s.render();

        let credits: Vec<_> = s
            .frame_credits()
            .into_iter()
            .map(|c| (c.credit.html, c.count))
            .collect();
        assert_eq!(credits, vec![("Esri".to_string(), 1), ("OSM".to_string(), 3)]);
        assert_eq!(frames.get(), 1);
    }

    #[test]
    fn render_failure_raises_render_error() {
        let s = scene();
        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        s.render_error().add_listener(move |_| e.set(e.get() + 1));
        s.set_render_failure(Some("context lost".into()));
        s.render();
        assert_eq!(errors.get(), 1);
        assert_eq!(s.frames_rendered(), 0);
    }

    #[tokio::test]
    async fn new_flight_cancels_pending_one() {
        let s = scene();
        s.set_instant_flights(false);
        let flight = |lat: f64| Flight {
            destination: FlightDestination::BoundingSphere {
                sphere: BoundingSphere::new(geodetic_to_ecef(Geodetic::from_degrees(lat, 0.0, 0.0)), 10.0),
                offset: HeadingPitchRange::new(0.0, -0.5, None),
            },
            duration_s: 1.0,
        };
        let first = s.fly_to(flight(10.0));
        let second = s.fly_to(flight(20.0));
        assert!(s.complete_flight());
        assert_eq!(first.await, FlightOutcome::Cancelled);
        assert_eq!(second.await, FlightOutcome::Completed);
        assert!((s.camera_pose().geodetic().lat_deg() - 20.0).abs() < 0.1);
    }
}
