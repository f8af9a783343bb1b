use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use catalog::CatalogItem;
use foundation::math::geodetic_to_ecef;
use foundation::{BoundingSphere, Rectangle};
use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture};
use layers::MapItem;
use runtime::poll_until;
use scene::{
    BoundsState, CameraView, DataSource, Flight, FlightDestination, FlightOutcome,
    HeadingPitchRange, Orientation, Primitive, Scene,
};
use tracing::debug;

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::pauser::RenderLoopPauser;

/// Spheres smaller than this let the engine pick the viewing distance.
const MIN_EXPLICIT_RANGE_M: f64 = 100.0;
const FLIGHT_PITCH: f64 = -0.5;

/// Anything the camera can be asked to fly to.
#[derive(Clone)]
pub enum ZoomTarget {
    Rectangle(Rectangle),
    CameraView(CameraView),
    DataSource(Rc<DataSource>),
    Mappable(Rc<dyn CatalogItem>),
    Primitive(Rc<Primitive>),
}

impl ZoomTarget {
    /// Target for a single map item. Imagery and terrain are not zoom targets;
    /// an imagery item's extent comes from its catalog item's display rectangle.
    pub fn from_map_item(item: &MapItem) -> Option<Self> {
        match item {
            MapItem::DataSource(ds) => Some(ZoomTarget::DataSource(Rc::clone(ds))),
            MapItem::Primitive(p) => Some(ZoomTarget::Primitive(Rc::clone(p))),
            MapItem::Imagery(_) | MapItem::Terrain(_) => None,
        }
    }
}

impl fmt::Debug for ZoomTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoomTarget::Rectangle(r) => f.debug_tuple("Rectangle").field(r).finish(),
            ZoomTarget::CameraView(v) => f.debug_tuple("CameraView").field(v).finish(),
            ZoomTarget::DataSource(ds) => f.debug_tuple("DataSource").field(ds).finish(),
            ZoomTarget::Mappable(item) => f.debug_tuple("Mappable").field(&item.name()).finish(),
            ZoomTarget::Primitive(p) => f.debug_tuple("Primitive").field(&p.name()).finish(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ZoomOutcome {
    Completed,
    /// The engine abandoned the flight.
    Cancelled,
    /// A newer zoom started before this one reached its flight.
    Superseded,
    NothingToZoom,
}

impl From<FlightOutcome> for ZoomOutcome {
    fn from(outcome: FlightOutcome) -> Self {
        match outcome {
            FlightOutcome::Completed => ZoomOutcome::Completed,
            FlightOutcome::Cancelled => ZoomOutcome::Cancelled,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ZoomSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub terrain_sample_level: u32,
}

impl ZoomSettings {
    pub fn from_config(config: &ViewerConfig) -> Self {
        Self {
            poll_interval: config.zoom_poll_interval(),
            timeout: config.zoom_timeout(),
            terrain_sample_level: config.terrain_sample_level,
        }
    }
}

impl Default for ZoomSettings {
    fn default() -> Self {
        Self::from_config(&ViewerConfig::default())
    }
}

/// Starts camera flights and tracks which one is current.
///
/// Each call to [`CameraFlightController::do_zoom_to`] takes a new
/// generation. A zoom that has to wait (terrain samples, data source bounds,
/// primitive readiness) checks its generation before flying and resolves to
/// [`ZoomOutcome::Superseded`] when a newer zoom has started.
#[derive(Clone, Default)]
pub struct CameraFlightController {
    generation: Rc<Cell<u64>>,
    last_target: Rc<RefCell<Option<ZoomTarget>>>,
    settings: ZoomSettings,
}

impl CameraFlightController {
    pub fn new(settings: ZoomSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn last_zoom_target(&self) -> Option<ZoomTarget> {
        self.last_target.borrow().clone()
    }

    pub fn do_zoom_to(
        &self,
        scene: Rc<dyn Scene>,
        pauser: &Rc<RenderLoopPauser>,
        target: ZoomTarget,
        duration_s: f64,
    ) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
        let token = self.generation.get() + 1;
        self.generation.set(token);
        *self.last_target.borrow_mut() = Some(target.clone());
        debug!(?target, token, "zoom requested");

        pauser.notify_repaint_required();
        let zoom = match target {
            ZoomTarget::Mappable(item) => match mappable_target(item.as_ref()) {
                MappableZoom::Fly(destination) => fly(scene.as_ref(), destination, duration_s),
                MappableZoom::Item(inner) => {
                    return self.do_zoom_to(scene, pauser, inner, duration_s);
                }
                MappableZoom::Nothing => future::ready(Ok(ZoomOutcome::NothingToZoom)).boxed_local(),
            },
            target => self.zoom(scene, target, token, duration_s),
        };

        let pauser = Rc::clone(pauser);
        async move {
            let result = zoom.await;
            pauser.notify_repaint_required();
            result
        }
        .boxed_local()
    }

    fn zoom(
        &self,
        scene: Rc<dyn Scene>,
        target: ZoomTarget,
        token: u64,
        duration_s: f64,
    ) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
        let generation = Rc::clone(&self.generation);
        let settings = self.settings;
        let is_current = move || generation.get() == token;

        match target {
            ZoomTarget::Rectangle(rectangle) => async move {
                let natural = scene.rectangle_camera_coordinates(&rectangle);
                let center = rectangle.center();
                let terrain = scene.terrain_provider();
                let sampled = terrain
                    .sample_heights(settings.terrain_sample_level, &[center])
                    .await;
                let height = match sampled {
                    Ok(heights) => heights.first().copied().unwrap_or(0.0),
                    Err(err) => {
                        debug!(%err, "terrain sample failed, assuming sea level");
                        0.0
                    }
                };
                if !is_current() {
                    return Ok(ZoomOutcome::Superseded);
                }
                let destination = FlightDestination::Position {
                    destination: geodetic_to_ecef(natural.with_alt(natural.alt_m + height)),
                    orientation: None,
                };
                fly(scene.as_ref(), destination, duration_s).await
            }
            .boxed_local(),

            ZoomTarget::DataSource(source) => async move {
                let settled = poll_until(settings.poll_interval, settings.timeout, || {
                    if !is_current() {
                        return Some(None);
                    }
                    data_source_spheres(scene.as_ref(), &source).map(Some)
                })
                .await
                .map_err(|err| ViewerError::ZoomTimeout(err.timeout))?;

                let Some(spheres) = settled else {
                    return Ok(ZoomOutcome::Superseded);
                };
                if !is_current() {
                    return Ok(ZoomOutcome::Superseded);
                }
                match BoundingSphere::from_spheres(&spheres) {
                    Some(sphere) => fly(scene.as_ref(), sphere_destination(sphere), duration_s).await,
                    None => Ok(ZoomOutcome::NothingToZoom),
                }
            }
            .boxed_local(),

            ZoomTarget::Primitive(primitive) => async move {
                primitive.wait_ready().await?;
                if !is_current() {
                    return Ok(ZoomOutcome::Superseded);
                }
                match primitive.bounding_sphere() {
                    Some(sphere) => fly(scene.as_ref(), sphere_destination(sphere), duration_s).await,
                    None => Ok(ZoomOutcome::NothingToZoom),
                }
            }
            .boxed_local(),

            ZoomTarget::CameraView(view) => {
                let destination = match (view.position, view.direction, view.up) {
                    (Some(position), Some(direction), Some(up)) => FlightDestination::Position {
                        destination: position,
                        orientation: Some(Orientation::DirectionUp { direction, up }),
                    },
                    _ => FlightDestination::Rectangle(view.rectangle),
                };
                fly(scene.as_ref(), destination, duration_s)
            }

            ZoomTarget::Mappable(_) => future::ready(Ok(ZoomOutcome::NothingToZoom)).boxed_local(),
        }
    }
}

enum MappableZoom {
    Fly(FlightDestination),
    Item(ZoomTarget),
    Nothing,
}

fn mappable_target(item: &dyn CatalogItem) -> MappableZoom {
    let Some(mappable) = item.as_mappable() else {
        return MappableZoom::Nothing;
    };
    if mappable.disable_zoom_to() {
        return MappableZoom::Nothing;
    }
    if let Some(rectangle) = mappable.display_rectangle() {
        return MappableZoom::Fly(FlightDestination::Rectangle(rectangle));
    }
    mappable
        .map_items()
        .with(|items| items.first().and_then(ZoomTarget::from_map_item))
        .map_or(MappableZoom::Nothing, MappableZoom::Item)
}

/// Bounding spheres of every entity once the source has loaded and no
/// entity is still computing. Entities whose bounds failed are skipped.
fn data_source_spheres(scene: &dyn Scene, source: &DataSource) -> Option<Vec<BoundingSphere>> {
    if source.is_loading() {
        return None;
    }
    let mut spheres = Vec::new();
    for entity in source.entities() {
        match scene.entity_bounding_sphere(&entity) {
            Ok(BoundsState::Ready(sphere)) => spheres.push(sphere),
            Ok(BoundsState::Failed) => {}
            Ok(BoundsState::Pending) => return None,
            Err(err) => {
                debug!(%err, entity = entity.name(), "entity bounds not available yet");
                return None;
            }
        }
    }
    Some(spheres)
}

fn sphere_destination(sphere: BoundingSphere) -> FlightDestination {
    let range = (sphere.radius >= MIN_EXPLICIT_RANGE_M).then_some(sphere.radius);
    FlightDestination::BoundingSphere {
        sphere,
        offset: HeadingPitchRange::new(0.0, FLIGHT_PITCH, range),
    }
}

fn fly(
    scene: &dyn Scene,
    destination: FlightDestination,
    duration_s: f64,
) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
    scene
        .fly_to(Flight {
            destination,
            duration_s,
        })
        .map(|outcome| Ok(ZoomOutcome::from(outcome)))
        .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::{CameraFlightController, ZoomOutcome, ZoomSettings, ZoomTarget};
    use crate::error::ViewerError;
    use crate::pauser::RenderLoopPauser;
    use catalog::{CatalogItem, MappableItem};
    use foundation::math::{Geodetic, geodetic_to_ecef};
    use foundation::{BoundingSphere, Rectangle};
    use layers::{ImageryParts, MapItem};
    use scene::headless::{HeadlessScene, HeadlessTerrainProvider, StaticImageryProvider};
    use scene::{
        BoundsState, DataSource, Entity, FlightDestination, ImageryProvider, Primitive,
        Readiness, Scene, TerrainSource,
    };
    use std::rc::Rc;
    use std::time::Duration;

    fn setup() -> (Rc<HeadlessScene>, Rc<RenderLoopPauser>, CameraFlightController) {
        let scene = Rc::new(HeadlessScene::try_new(800, 600).unwrap());
        let pauser = RenderLoopPauser::new(scene.post_render());
        (scene, pauser, CameraFlightController::new(ZoomSettings::default()))
    }

    fn as_scene(scene: &Rc<HeadlessScene>) -> Rc<dyn Scene> {
        scene.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn rectangle_zoom_adds_the_sampled_terrain_height() {
        let (scene, pauser, flights) = setup();
        scene.set_terrain_provider(Rc::new(
            HeadlessTerrainProvider::new(TerrainSource::Url("https://terrain".into()))
                .with_height(250.0),
        ));
        let rectangle = Rectangle::from_degrees(10.0, 10.0, 12.0, 12.0);
        let natural = scene.rectangle_camera_coordinates(&rectangle);

        let outcome = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Rectangle(rectangle), 3.0)
            .await
            .unwrap();
        assert_eq!(outcome, ZoomOutcome::Completed);

        let recorded = scene.flights();
        assert_eq!(recorded.len(), 1);
        let expected = geodetic_to_ecef(natural.with_alt(natural.alt_m + 250.0));
        match &recorded[0].destination {
            FlightDestination::Position { destination, .. } => {
                assert!(destination.distance(expected) < 1e-6);
            }
            other => panic!("unexpected destination {other:?}"),
        }
        assert_eq!(pauser.notifications(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_terrain_sample_flies_at_natural_height() {
        let (scene, pauser, flights) = setup();
        scene.set_terrain_provider(Rc::new(
            HeadlessTerrainProvider::new(TerrainSource::Url("https://terrain".into()))
                .failing_samples("offline"),
        ));
        let rectangle = Rectangle::from_degrees(0.0, 0.0, 1.0, 1.0);
        let natural = scene.rectangle_camera_coordinates(&rectangle);
        flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Rectangle(rectangle), 3.0)
            .await
            .unwrap();
        match &scene.flights()[0].destination {
            FlightDestination::Position { destination, .. } => {
                assert!(destination.distance(geodetic_to_ecef(natural)) < 1e-6);
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn newer_zoom_supersedes_a_waiting_one() {
        let (scene, pauser, flights) = setup();
        scene.set_terrain_provider(Rc::new(
            HeadlessTerrainProvider::new(TerrainSource::Url("https://terrain".into()))
                .with_delay(Duration::from_secs(1)),
        ));
        let a = Rectangle::from_degrees(-10.0, -10.0, -5.0, -5.0);
        let b = Rectangle::from_degrees(20.0, 20.0, 25.0, 25.0);

        let first = flights.do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Rectangle(a), 3.0);
        let second = flights.do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Rectangle(b), 3.0);
        let (first, second) = futures_util::future::join(first, second).await;

        assert_eq!(first.unwrap(), ZoomOutcome::Superseded);
        assert_eq!(second.unwrap(), ZoomOutcome::Completed);
        assert_eq!(scene.flights().len(), 1);
        let camera = scene.camera_pose().geodetic();
        assert!((camera.lat_deg() - b.center().lat_deg()).abs() < 1e-6);
        assert!((camera.lon_deg() - b.center().lon_deg()).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn data_source_waits_for_bounds_and_skips_failures() {
        let (scene, pauser, flights) = setup();
        let source = DataSource::new("stations");
        let pending = Rc::new(Entity::new("pending"));
        let broken = Rc::new(Entity::new("broken"));
        broken.set_bounds(BoundsState::Failed);
        source.add_entity(Rc::new(
            Entity::new("a").with_position(Geodetic::from_degrees(0.0, 0.0, 0.0)),
        ));
        source.add_entity(pending.clone());
        source.add_entity(broken);

        let zoom = flights.do_zoom_to(
            as_scene(&scene),
            &pauser,
            ZoomTarget::DataSource(source.clone()),
            2.0,
        );
        let settle = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            assert!(scene.flights().is_empty());
            pending.set_bounds(BoundsState::Ready(BoundingSphere::new(
                geodetic_to_ecef(Geodetic::from_degrees(0.0, 1.0, 0.0)),
                5_000.0,
            )));
        };
        let (outcome, ()) = futures_util::future::join(zoom, settle).await;
        assert_eq!(outcome.unwrap(), ZoomOutcome::Completed);

        match &scene.flights()[0].destination {
            FlightDestination::BoundingSphere { sphere, offset } => {
                assert!(sphere.radius >= 5_000.0);
                assert_eq!(offset.pitch, -0.5);
                assert_eq!(offset.range, Some(sphere.radius));
            }
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn data_source_that_never_settles_times_out() {
        let (scene, pauser, _) = setup();
        let flights = CameraFlightController::new(ZoomSettings {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(1),
            terrain_sample_level: 6,
        });
        let source = DataSource::new("stuck");
        source.set_loading(true);
        let err = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::DataSource(source), 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::ZoomTimeout(d) if d == Duration::from_secs(1)));
        assert!(scene.flights().is_empty());
        assert_eq!(pauser.notifications(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn small_primitives_let_the_engine_choose_the_range() {
        let (scene, pauser, flights) = setup();
        let model = Rc::new(
            Primitive::model("statue").with_bounding_sphere(BoundingSphere::new(
                geodetic_to_ecef(Geodetic::from_degrees(0.0, 0.0, 0.0)),
                40.0,
            )),
        );
        model.set_readiness(Readiness::Ready);
        let outcome = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Primitive(model), 3.0)
            .await
            .unwrap();
        assert_eq!(outcome, ZoomOutcome::Completed);
        match &scene.flights()[0].destination {
            FlightDestination::BoundingSphere { offset, .. } => assert_eq!(offset.range, None),
            other => panic!("unexpected destination {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_primitive_fails_the_zoom() {
        let (scene, pauser, flights) = setup();
        let tileset = Rc::new(Primitive::tileset("city"));
        tileset.set_readiness(Readiness::Failed("404".into()));
        let err = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Primitive(tileset), 3.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ViewerError::Scene(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mappable_items_prefer_their_display_rectangle() {
        let (scene, pauser, flights) = setup();
        let rectangle = Rectangle::from_degrees(1.0, 2.0, 3.0, 4.0);
        let item: Rc<dyn CatalogItem> =
            Rc::new(MappableItem::new("parks").with_display_rectangle(rectangle));
        flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Mappable(item), 3.0)
            .await
            .unwrap();
        assert_eq!(scene.flights()[0].destination, FlightDestination::Rectangle(rectangle));

        let empty: Rc<dyn CatalogItem> = Rc::new(MappableItem::new("empty"));
        let outcome = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Mappable(empty), 3.0)
            .await
            .unwrap();
        assert_eq!(outcome, ZoomOutcome::NothingToZoom);
    }

    #[tokio::test(start_paused = true)]
    async fn mappable_without_rectangle_zooms_to_its_first_map_item() {
        let (scene, pauser, flights) = setup();
        let model = Rc::new(Primitive::model("tower").with_bounding_sphere(BoundingSphere::new(
            geodetic_to_ecef(Geodetic::from_degrees(5.0, 5.0, 0.0)),
            500.0,
        )));
        model.set_readiness(Readiness::Ready);
        let item: Rc<dyn CatalogItem> = Rc::new(
            MappableItem::new("tower").with_map_items(vec![MapItem::Primitive(model)]),
        );
        let before = flights.generation();
        let outcome = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Mappable(item), 3.0)
            .await
            .unwrap();
        assert_eq!(outcome, ZoomOutcome::Completed);
        assert_eq!(flights.generation(), before + 2);
        assert!(matches!(
            flights.last_zoom_target(),
            Some(ZoomTarget::Primitive(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn mappable_led_by_imagery_has_nothing_to_zoom() {
        let (scene, pauser, flights) = setup();
        let provider: Rc<dyn ImageryProvider> = Rc::new(
            StaticImageryProvider::new(Some("osm"))
                .with_rectangle(Rectangle::from_degrees(1.0, 2.0, 3.0, 4.0)),
        );
        let parts = ImageryParts::new(provider)
            .with_clipping_rectangle(Rectangle::from_degrees(1.5, 2.5, 2.5, 3.5));
        let item: Rc<dyn CatalogItem> = Rc::new(
            MappableItem::new("osm").with_map_items(vec![MapItem::Imagery(parts.clone())]),
        );
        assert!(ZoomTarget::from_map_item(&MapItem::Imagery(parts)).is_none());

        let outcome = flights
            .do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::Mappable(item), 3.0)
            .await
            .unwrap();
        assert_eq!(outcome, ZoomOutcome::NothingToZoom);
        assert!(scene.flights().is_empty());
    }

    #[tokio::test]
    async fn cancelled_engine_flight_is_reported() {
        let (scene, pauser, flights) = setup();
        scene.set_instant_flights(false);
        let view = scene::CameraView::from_rectangle(Rectangle::from_degrees(0.0, 0.0, 1.0, 1.0));
        let first = flights.do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::CameraView(view.clone()), 1.0);
        let second = flights.do_zoom_to(as_scene(&scene), &pauser, ZoomTarget::CameraView(view), 1.0);
        assert!(scene.complete_flight());
        let (first, second) = futures_util::future::join(first, second).await;
        assert_eq!(first.unwrap(), ZoomOutcome::Cancelled);
        assert_eq!(second.unwrap(), ZoomOutcome::Completed);
    }
}
