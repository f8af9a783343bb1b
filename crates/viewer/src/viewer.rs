use std::cell::{Cell, RefCell};
use std::io::Cursor;
use std::rc::{Rc, Weak};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use catalog::{CatalogItem, Feature};
use foundation::Rectangle;
use foundation::math::{
    Enu, Geodetic, Vec2, Vec3, ecef_to_geodetic, geodetic_to_ecef, offset_in_local_frame,
};
use futures_util::future::LocalBoxFuture;
use runtime::{EventHelper, ListenerHandle, Observable, Reaction, Reactions, RunSummary};
use scene::{
    CameraView, Canvas, InputArgs, InputEvent, KeyModifier, Scene, SceneError, SplitDirection,
};
use tracing::{debug, info, warn};

use crate::context::{MapInteractionMode, ViewerContext};
use crate::credits::CreditAggregator;
use crate::error::ViewerError;
use crate::flight::{CameraFlightController, ZoomOutcome, ZoomSettings, ZoomTarget};
use crate::pauser::RenderLoopPauser;
use crate::pick::{self, LatLonHeight, PickedFeatures};
use crate::provider_coords::ProviderCoords;
use crate::reconcile::SceneReconciler;
use crate::selection::SelectionIndicator;
use crate::splitter::{SplittableMapItem, apply_split_directions, get_splittable_map_items};
use crate::terrain::TerrainSelector;

const RENDER_ERROR_TITLE: &str = "Rendering stopped";
const DRAG_ZOOM_MESSAGE: &str = "Drag a rectangle to zoom to";

const BINDINGS: [(InputEvent, Option<KeyModifier>); 5] = [
    (InputEvent::MouseMove, None),
    (InputEvent::MouseMove, Some(KeyModifier::Shift)),
    (InputEvent::LeftClick, None),
    (InputEvent::LeftDown, Some(KeyModifier::Shift)),
    (InputEvent::LeftUp, Some(KeyModifier::Shift)),
];

struct DragZoom {
    mode: Rc<MapInteractionMode>,
    first_corner: Option<Geodetic>,
}

struct ViewerInner {
    ctx: Rc<ViewerContext>,
    scene: Rc<dyn Scene>,
    pauser: Rc<RenderLoopPauser>,
    flights: CameraFlightController,
    credits: CreditAggregator,
    selection: SelectionIndicator,
    reconciler: RefCell<SceneReconciler>,
    terrain: RefCell<TerrainSelector>,
    reactions: RefCell<Reactions>,
    listeners: RefCell<EventHelper>,
    last_render_error: RefCell<Option<String>>,
    pause_count: Cell<u32>,
    drag_zoom: RefCell<Option<DragZoom>>,
    destroyed: Cell<bool>,
}

/// The 3D globe viewer.
///
/// Keeps a [`Scene`] in step with a [`ViewerContext`]: reactions push
/// catalog state into the engine, input bindings turn clicks into picks and
/// drag-to-zoom, and post-render hooks keep credits and the selection
/// indicator current. Async work (pick aggregation, drag zoom) is spawned on
/// the current [`tokio::task::LocalSet`], so a viewer must live inside one.
pub struct Viewer {
    inner: Rc<ViewerInner>,
}

impl Viewer {
    pub fn new(
        ctx: Rc<ViewerContext>,
        create_scene: impl FnOnce() -> Result<Rc<dyn Scene>, SceneError>,
    ) -> Result<Self, ViewerError> {
        ctx.config.validate()?;
        let scene = create_scene().map_err(|err| {
            warn!(%err, "rendering engine construction failed");
            ViewerError::construction(&ctx.config.app_name, err)
        })?;

        let inner = Rc::new(ViewerInner {
            pauser: RenderLoopPauser::new(scene.post_render()),
            flights: CameraFlightController::new(ZoomSettings::from_config(&ctx.config)),
            credits: CreditAggregator::new(),
            selection: SelectionIndicator::new(),
            reconciler: RefCell::new(SceneReconciler::new(
                ctx.tiles_loading_indeterminate.clone(),
            )),
            terrain: RefCell::new(TerrainSelector::new()),
            reactions: RefCell::new(Reactions::new()),
            listeners: RefCell::new(EventHelper::new()),
            last_render_error: RefCell::new(None),
            pause_count: Cell::new(0),
            drag_zoom: RefCell::new(None),
            destroyed: Cell::new(false),
            scene,
            ctx,
        });
        let weak = Rc::downgrade(&inner);
        bind_inputs(&inner, &weak);
        subscribe_scene_events(&inner, &weak);
        install_reactions(&inner, &weak);

        let viewer = Self { inner };
        viewer.run_reactions();
        info!(app = %viewer.inner.ctx.config.app_name, "viewer ready");
        Ok(viewer)
    }

    pub fn scene(&self) -> &Rc<dyn Scene> {
        &self.inner.scene
    }

    pub fn context(&self) -> &Rc<ViewerContext> {
        &self.inner.ctx
    }

    /// Re-runs every reaction whose inputs changed since its last run.
    pub fn run_reactions(&self) -> RunSummary {
        if self.inner.destroyed.get() {
            return RunSummary::default();
        }
        self.inner.reactions.borrow_mut().run_pending()
    }

    /// Brings the scene up to date and draws one frame.
    pub fn render_frame(&self) {
        if self.inner.destroyed.get() {
            return;
        }
        self.run_reactions();
        self.inner.scene.render();
    }

    pub fn notify_repaint_required(&self) {
        self.inner.pauser.notify_repaint_required();
    }

    pub fn repaint_requested(&self) -> bool {
        self.inner.pauser.repaint_requested()
    }

    pub fn attributions(&self) -> &Observable<Vec<String>> {
        self.inner.credits.attributions()
    }

    pub fn selection_indicator(&self) -> &SelectionIndicator {
        &self.inner.selection
    }

    pub fn pick_from_screen_position(
        &self,
        screen: Vec2,
        ignore_splitter: bool,
    ) -> Rc<PickedFeatures> {
        pick::pick_from_screen_position(
            &self.inner.ctx,
            self.inner.scene.as_ref(),
            screen,
            ignore_splitter,
        )
    }

    pub fn pick_from_location(
        &self,
        location: LatLonHeight,
        provider_coords: &ProviderCoords,
        existing: Vec<Rc<Feature>>,
    ) -> Rc<PickedFeatures> {
        pick::pick_from_location(
            &self.inner.ctx,
            self.inner.scene.as_ref(),
            location,
            provider_coords,
            existing,
        )
    }

    pub async fn get_features_at_location(
        &self,
        location: LatLonHeight,
        provider_coords: &ProviderCoords,
        existing: Vec<Rc<Feature>>,
    ) -> Vec<Rc<Feature>> {
        pick::get_features_at_location(
            &self.inner.ctx,
            self.inner.scene.as_ref(),
            location,
            provider_coords,
            existing,
        )
        .await
    }

    pub fn do_zoom_to(
        &self,
        target: ZoomTarget,
        duration_s: f64,
    ) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
        self.inner.zoom(target, duration_s)
    }

    /// [`Self::do_zoom_to`] with the configured flight duration.
    pub fn zoom_to(
        &self,
        target: ZoomTarget,
    ) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
        self.do_zoom_to(target, self.inner.ctx.config.default_flight_duration_s)
    }

    pub fn last_zoom_target(&self) -> Option<ZoomTarget> {
        self.inner.flights.last_zoom_target()
    }

    pub fn get_splittable_map_items(&self, item: &dyn CatalogItem) -> Vec<SplittableMapItem> {
        get_splittable_map_items(item, self.inner.reconciler.borrow_mut().cache_mut())
    }

    pub fn pause_map_interaction(&self) {
        self.inner.pause_map_interaction();
    }

    pub fn resume_map_interaction(&self) {
        self.inner.resume_map_interaction();
    }

    pub fn is_map_interaction_paused(&self) -> bool {
        self.inner.pause_count.get() > 0
    }

    /// Keyboard hook: releasing Shift abandons a drag zoom.
    pub fn on_key_up(&self, key: &str) {
        if key == "Shift" {
            self.inner.exit_drag_zoom();
        }
    }

    pub fn is_drag_zooming(&self) -> bool {
        self.inner.drag_zoom.borrow().is_some()
    }

    /// The visible rectangle plus the exact camera pose. Falls back to the
    /// configured home view when the screen centre misses the globe.
    pub fn get_current_camera_view(&self) -> CameraView {
        let scene = self.inner.scene.as_ref();
        let (width, height) = scene.canvas_size();
        let centre = Vec2::new(width as f64 / 2.0, height as f64 / 2.0);
        let Some(center) = scene.pick_ray(centre).and_then(|ray| scene.pick_globe(&ray)) else {
            return CameraView::from_rectangle(self.inner.ctx.config.home_view.rectangle());
        };

        let pose = scene.camera_pose();
        let frustum = scene.frustum();
        let half_fov_y = frustum.fov_y * 0.5;
        let half_fov_x = (half_fov_y.tan() * frustum.aspect).atan();
        let camera_height = pose.position.distance(center);
        let x = camera_height * half_fov_x.tan();
        let y = camera_height * half_fov_y.tan();

        let corners: Vec<Geodetic> = [(-x, -y), (x, -y), (x, y), (-x, y)]
            .into_iter()
            .map(|(east, north)| {
                ecef_to_geodetic(offset_in_local_frame(center, Enu::new(east, north, 0.0)))
            })
            .collect();
        let rectangle = Rectangle::new(
            corners.iter().map(|c| c.lon_rad).fold(f64::INFINITY, f64::min),
            corners.iter().map(|c| c.lat_rad).fold(f64::INFINITY, f64::min),
            corners.iter().map(|c| c.lon_rad).fold(f64::NEG_INFINITY, f64::max),
            corners.iter().map(|c| c.lat_rad).fold(f64::NEG_INFINITY, f64::max),
        );
        CameraView::from_pose(rectangle, pose)
    }

    /// Renders a frame and returns it as a `data:image/png;base64,` URL, with
    /// the split line drawn in while the splitter is shown.
    pub fn capture_screenshot(&self) -> Result<String, ViewerError> {
        let inner = &self.inner;
        if inner.destroyed.get() {
            return Err(ViewerError::Destroyed);
        }

        let captured: Rc<RefCell<Option<Result<Canvas, SceneError>>>> = Rc::default();
        let own_handle: Rc<RefCell<Option<ListenerHandle>>> = Rc::default();
        let scene = Rc::downgrade(&inner.scene);
        let (slot, handle_slot) = (Rc::clone(&captured), Rc::clone(&own_handle));
        let handle = inner.scene.post_render().subscribe(move |_| {
            release(handle_slot.borrow_mut().take());
            if let Some(scene) = scene.upgrade() {
                *slot.borrow_mut() = Some(scene.capture_canvas());
            }
        });
        *own_handle.borrow_mut() = Some(handle);

        inner.scene.render();
        // Still attached when the render failed before post-render.
        release(own_handle.borrow_mut().take());

        let mut canvas = captured
            .borrow_mut()
            .take()
            .ok_or_else(|| ViewerError::Screenshot("no frame was rendered".to_string()))??;
        if inner.ctx.show_splitter.get() {
            let color = inner.ctx.config.contrast_color()?;
            draw_split_line(&mut canvas, inner.ctx.split_position.get(), color)?;
        }
        encode_png_data_url(canvas)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Detaches everything the viewer installed and destroys the scene.
    pub fn destroy(&self) {
        let inner = &self.inner;
        if inner.destroyed.replace(true) {
            return;
        }
        let input = inner.scene.input();
        for (event, modifier) in BINDINGS {
            input.remove_input_action(event, modifier);
        }
        if let Some(drag) = inner.drag_zoom.borrow_mut().take() {
            inner.ctx.remove_interaction_mode(drag.mode.id());
        }
        let failed = inner.listeners.borrow_mut().remove_all();
        if failed > 0 {
            warn!(failed, "some scene listeners could not be removed");
        }
        inner.selection.destroy();
        inner.pauser.destroy();
        inner.reactions.borrow_mut().clear();
        inner.reconciler.borrow_mut().teardown();
        inner.terrain.borrow_mut().clear();
        inner.ctx.tiles_loading_indeterminate.set_if_changed(false);
        inner.scene.destroy();
        info!("viewer destroyed");
    }
}

impl ViewerInner {
    fn zoom(
        &self,
        target: ZoomTarget,
        duration_s: f64,
    ) -> LocalBoxFuture<'static, Result<ZoomOutcome, ViewerError>> {
        self.flights
            .do_zoom_to(Rc::clone(&self.scene), &self.pauser, target, duration_s)
    }

    fn pause_map_interaction(&self) {
        let count = self.pause_count.get() + 1;
        self.pause_count.set(count);
        if count == 1 {
            self.scene.set_inputs_enabled(false);
        }
    }

    fn resume_map_interaction(&self) {
        let Some(count) = self.pause_count.get().checked_sub(1) else {
            return;
        };
        self.pause_count.set(count);
        if count == 0 && !self.destroyed.get() {
            self.scene.set_inputs_enabled(true);
        }
    }

    fn globe_position(&self, screen: Vec2) -> Option<Geodetic> {
        let ray = self.scene.pick_ray(screen)?;
        self.scene.pick_globe(&ray).map(ecef_to_geodetic)
    }

    fn begin_drag_zoom(&self, screen: Vec2) {
        if self.pause_count.get() > 0 || self.drag_zoom.borrow().is_some() {
            return;
        }
        self.pause_map_interaction();
        let mode = Rc::new(MapInteractionMode::new(DRAG_ZOOM_MESSAGE));
        self.ctx.push_interaction_mode(Rc::clone(&mode));
        *self.drag_zoom.borrow_mut() = Some(DragZoom {
            mode,
            first_corner: self.globe_position(screen),
        });
    }

    fn finish_drag_zoom(&self, screen: Vec2) {
        let first_corner = match self.drag_zoom.borrow().as_ref() {
            Some(drag) => drag.first_corner,
            None => return,
        };
        let second_corner = self.globe_position(screen);
        self.exit_drag_zoom();

        let (Some(a), Some(b)) = (first_corner, second_corner) else {
            debug!("drag zoom corner missed the globe");
            return;
        };
        let rectangle = Rectangle::from_corners(a, b);
        if rectangle.is_empty() {
            return;
        }
        let zoom = self.zoom(
            ZoomTarget::Rectangle(rectangle),
            self.ctx.config.drag_zoom_flight_duration_s,
        );
        tokio::task::spawn_local(async move {
            if let Err(err) = zoom.await {
                warn!(%err, "drag zoom failed");
            }
        });
    }

    fn exit_drag_zoom(&self) {
        let Some(drag) = self.drag_zoom.borrow_mut().take() else {
            return;
        };
        self.ctx.remove_interaction_mode(drag.mode.id());
        self.resume_map_interaction();
    }

    fn on_render_error(&self, error: &str) {
        // Only an immediate repeat is suppressed.
        if self.last_render_error.borrow().as_deref() == Some(error) {
            return;
        }
        self.last_render_error.replace(Some(error.to_string()));
        warn!(%error, "scene stopped rendering");
        self.ctx.report_error(
            RENDER_ERROR_TITLE,
            format!(
                "{} stopped rendering the 3D map ({error}). Reloading the page may help.",
                self.ctx.config.app_name
            ),
        );
    }

    fn after_render(&self) {
        let position = self
            .ctx
            .selected_feature
            .with(|feature| feature.as_deref().and_then(feature_position));
        if position.is_some() {
            self.selection.set_position(position);
        }
        self.selection.update(self.scene.as_ref());
        self.credits.update(&self.scene.frame_credits());
    }

    fn reconcile(&self) {
        let desired = self.ctx.all_map_items();
        let summary = self
            .reconciler
            .borrow_mut()
            .reconcile(self.scene.as_ref(), &desired);
        if summary.changed() {
            self.pauser.notify_repaint_required();
        }
    }

    fn apply_terrain(&self) {
        let terrain_item = self
            .ctx
            .all_map_items()
            .into_iter()
            .find_map(|(_, item)| item.terrain().cloned());
        self.terrain.borrow_mut().apply(
            self.scene.as_ref(),
            self.ctx.use_terrain.get(),
            terrain_item.as_ref(),
            &self.ctx.config,
        );
        let direction = if self.ctx.show_splitter.get() {
            self.ctx.terrain_split_direction.get()
        } else {
            SplitDirection::None
        };
        self.scene.set_globe_split_direction(direction);
        self.scene
            .set_depth_test_against_terrain(self.ctx.depth_test_against_terrain.get());
        self.pauser.notify_repaint_required();
    }

    fn apply_split_position(&self) {
        self.scene.set_split_position(self.ctx.split_position.get());
        self.pauser.notify_repaint_required();
    }

    fn apply_split_directions(&self) {
        let items = self.ctx.workbench.items();
        let changed = apply_split_directions(
            &items,
            self.ctx.show_splitter.get(),
            self.reconciler.borrow_mut().cache_mut(),
        );
        if changed > 0 {
            self.pauser.notify_repaint_required();
        }
    }

    fn apply_resolution(&self) {
        self.scene
            .set_use_browser_recommended_resolution(!self.ctx.use_native_resolution.get());
        self.scene
            .set_maximum_screen_space_error(self.ctx.base_maximum_screen_space_error.get());
        self.pauser.notify_repaint_required();
    }

    fn select_feature(&self) {
        let position = self
            .ctx
            .selected_feature
            .with(|feature| feature.as_deref().and_then(feature_position));
        match position {
            Some(position) => {
                self.selection.set_position(Some(position));
                self.selection.animate_appear();
            }
            None => self.selection.animate_depart(),
        }
        self.pauser.notify_repaint_required();
    }
}

fn feature_position(feature: &Feature) -> Option<Vec3> {
    feature
        .position()
        .or_else(|| feature.entity().and_then(|entity| entity.position()))
        .map(geodetic_to_ecef)
}

fn release(handle: Option<ListenerHandle>) {
    if let Some(handle) = handle
        && let Err(err) = handle.remove()
    {
        warn!(%err, "failed to remove screenshot listener");
    }
}

fn with_inner(weak: &Weak<ViewerInner>, f: impl Fn(&ViewerInner) + 'static) -> impl FnMut() + 'static {
    let weak = weak.clone();
    move || {
        if let Some(inner) = weak.upgrade() {
            f(&inner);
        }
    }
}

fn bind_inputs(inner: &ViewerInner, weak: &Weak<ViewerInner>) {
    let input = inner.scene.input();
    for modifier in [None, Some(KeyModifier::Shift)] {
        let weak = weak.clone();
        input.set_input_action(InputEvent::MouseMove, modifier, move |args: &InputArgs| {
            if let Some(inner) = weak.upgrade() {
                inner.ctx.mouse_coords.set(inner.globe_position(args.end_position));
            }
        });
    }

    let w = weak.clone();
    input.set_input_action(InputEvent::LeftClick, None, move |args: &InputArgs| {
        if let Some(inner) = w.upgrade()
            && inner.pause_count.get() == 0
        {
            pick::pick_from_screen_position(&inner.ctx, inner.scene.as_ref(), args.position, false);
        }
    });

    let w = weak.clone();
    input.set_input_action(
        InputEvent::LeftDown,
        Some(KeyModifier::Shift),
        move |args: &InputArgs| {
            if let Some(inner) = w.upgrade() {
                inner.begin_drag_zoom(args.position);
            }
        },
    );

    let w = weak.clone();
    input.set_input_action(
        InputEvent::LeftUp,
        Some(KeyModifier::Shift),
        move |args: &InputArgs| {
            if let Some(inner) = w.upgrade() {
                inner.finish_drag_zoom(args.position);
            }
        },
    );
}

fn subscribe_scene_events(inner: &ViewerInner, weak: &Weak<ViewerInner>) {
    let mut listeners = inner.listeners.borrow_mut();

    let w = weak.clone();
    listeners.add(inner.scene.render_error(), move |error: &String| {
        if let Some(inner) = w.upgrade() {
            inner.on_render_error(error);
        }
    });

    let w = weak.clone();
    listeners.add(inner.scene.post_render(), move |_| {
        if let Some(inner) = w.upgrade() {
            inner.after_render();
        }
    });
}

fn install_reactions(inner: &ViewerInner, weak: &Weak<ViewerInner>) {
    let mut reactions = inner.reactions.borrow_mut();

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "reconcile-map-items",
        0,
        move || ctx.map_item_versions(),
        with_inner(weak, ViewerInner::reconcile),
    ));

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "terrain",
        10,
        move || {
            let mut versions = vec![
                ctx.use_terrain.version(),
                ctx.show_splitter.version(),
                ctx.terrain_split_direction.version(),
                ctx.depth_test_against_terrain.version(),
            ];
            versions.extend(ctx.map_item_versions());
            versions
        },
        with_inner(weak, ViewerInner::apply_terrain),
    ));

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "split-position",
        20,
        move || vec![ctx.split_position.version()],
        with_inner(weak, ViewerInner::apply_split_position),
    ));

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "split-direction",
        21,
        move || {
            let mut versions = vec![ctx.show_splitter.version()];
            versions.extend(ctx.map_item_versions());
            for item in ctx.workbench.items() {
                if let Some(split) = item.as_mappable().and_then(|m| m.split_direction()) {
                    versions.push(item.id().get());
                    versions.push(split.version());
                }
            }
            versions
        },
        with_inner(weak, ViewerInner::apply_split_directions),
    ));

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "resolution",
        30,
        move || {
            vec![
                ctx.use_native_resolution.version(),
                ctx.base_maximum_screen_space_error.version(),
            ]
        },
        with_inner(weak, ViewerInner::apply_resolution),
    ));

    let ctx = Rc::clone(&inner.ctx);
    reactions.add(Reaction::with_priority(
        "selected-feature",
        40,
        move || vec![ctx.selected_feature.version()],
        with_inner(weak, ViewerInner::select_feature),
    ));
}

fn draw_split_line(canvas: &mut Canvas, split_position: f64, color: [u8; 4]) -> Result<(), ViewerError> {
    let (width, height) = (canvas.width as usize, canvas.height as usize);
    if width == 0 || canvas.rgba.len() != width * height * 4 {
        return Err(ViewerError::Screenshot(format!(
            "canvas holds {} bytes for {width}x{height} pixels",
            canvas.rgba.len()
        )));
    }
    let x = ((split_position.clamp(0.0, 1.0) * width as f64) as usize).min(width - 1);
    for y in 0..height {
        let offset = (y * width + x) * 4;
        canvas.rgba[offset..offset + 4].copy_from_slice(&color);
    }
    Ok(())
}

fn encode_png_data_url(canvas: Canvas) -> Result<String, ViewerError> {
    let Canvas {
        width,
        height,
        rgba,
    } = canvas;
    let image = image::RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
        ViewerError::Screenshot(format!("pixel buffer does not match {width}x{height}"))
    })?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|err| ViewerError::Screenshot(err.to_string()))?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(png)))
}
