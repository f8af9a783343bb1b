//! Feature picking at a screen or world position.
//!
//! A pick produces a [`PickedFeatures`] right away. Vector hits are known
//! synchronously; raster hits arrive later and are merged in one atomic
//! update when every provider has answered.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use catalog::{Feature, features_from_pick_result};
use foundation::Id;
use foundation::math::{Geodetic, Vec2, Vec3, ecef_to_geodetic, geodetic_to_ecef};
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, Shared, try_join_all};
use runtime::Observable;
use scene::{
    FeaturePickFuture, ImageryLayerFeatureInfo, PickError, Scene, SplitDirection,
};
use serde::Deserialize;
use tracing::{debug, error};

use crate::context::ViewerContext;
use crate::provider_coords::{ProviderCoordHooks, ProviderCoords};
use crate::splitter::split_side_for_screen_position;

/// Name of the internal data source drawing the selection highlight.
pub const FEATURE_HIGHLIGHT_NAME: &str = "___$FeatureHighlight&__";

pub const UNKNOWN_PICK_ERROR: &str = "An unknown error occurred while picking features.";

/// World position in degrees and meters.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct LatLonHeight {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub height: f64,
}

impl LatLonHeight {
    pub fn new(latitude: f64, longitude: f64, height: f64) -> Self {
        Self {
            latitude,
            longitude,
            height,
        }
    }

    pub fn to_geodetic(self) -> Geodetic {
        Geodetic::from_degrees(self.latitude, self.longitude, self.height)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PickState {
    pub features: Vec<Rc<Feature>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

/// Features found by one pick gesture.
pub struct PickedFeatures {
    id: Id,
    provider_coords: ProviderCoords,
    pick_position: Option<Vec3>,
    state: Observable<PickState>,
    all_features_available: Shared<LocalBoxFuture<'static, ()>>,
}

struct PickRequest {
    provider_coords: ProviderCoords,
    pick_position: Option<Vec3>,
    existing: Vec<Rc<Feature>>,
    raster: Vec<FeaturePickFuture>,
    default_height: f64,
    splitter_side: Option<SplitDirection>,
}

impl PickedFeatures {
    /// Starts aggregating `raster` on the current `LocalSet`.
    fn start(request: PickRequest) -> Rc<Self> {
        let PickRequest {
            provider_coords,
            pick_position,
            existing,
            raster,
            default_height,
            splitter_side,
        } = request;

        let state = Observable::new(PickState {
            features: Vec::new(),
            is_loading: true,
            error: None,
        });
        let settled = state.clone();
        let pick_geodetic = pick_position.map(ecef_to_geodetic);
        let aggregate = async move {
            match try_join_all(raster).await {
                Ok(groups) => {
                    let mut features = existing;
                    for info in groups.into_iter().flatten() {
                        let feature =
                            Feature::from_imagery(backfill(info, pick_geodetic, default_height));
                        if keep_on_side(&feature, splitter_side) {
                            features.push(Rc::new(feature));
                        }
                    }
                    debug!(features = features.len(), "pick settled");
                    settled.set(PickState {
                        features,
                        is_loading: false,
                        error: None,
                    });
                }
                Err(err) => {
                    error!(error = %err, "failed to pick features");
                    settled.set(PickState {
                        features: Vec::new(),
                        is_loading: false,
                        error: Some(UNKNOWN_PICK_ERROR.to_string()),
                    });
                }
            }
        }
        .boxed_local()
        .shared();

        tokio::task::spawn_local(aggregate.clone());
        Rc::new(Self {
            id: Id::next(),
            provider_coords,
            pick_position,
            state,
            all_features_available: aggregate,
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn provider_coords(&self) -> &ProviderCoords {
        &self.provider_coords
    }

    pub fn pick_position(&self) -> Option<Vec3> {
        self.pick_position
    }

    pub fn state(&self) -> &Observable<PickState> {
        &self.state
    }

    pub fn features(&self) -> Vec<Rc<Feature>> {
        self.state.with(|s| s.features.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.state.with(|s| s.is_loading)
    }

    pub fn error(&self) -> Option<String> {
        self.state.with(|s| s.error.clone())
    }

    /// Resolves once the pick has settled. Never fails.
    pub fn all_features_available(&self) -> Shared<LocalBoxFuture<'static, ()>> {
        self.all_features_available.clone()
    }
}

impl fmt::Debug for PickedFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state.with(|s| {
            f.debug_struct("PickedFeatures")
                .field("id", &self.id)
                .field("features", &s.features.len())
                .field("is_loading", &s.is_loading)
                .field("error", &s.error)
                .finish()
        })
    }
}

fn backfill(
    mut info: ImageryLayerFeatureInfo,
    pick: Option<Geodetic>,
    default_height: f64,
) -> ImageryLayerFeatureInfo {
    if info.position.is_none() {
        info.position = pick;
    }
    if let Some(position) = &mut info.position
        && (position.alt_m == 0.0 || !position.alt_m.is_finite())
    {
        position.alt_m = default_height;
    }
    info
}

fn keep_on_side(feature: &Feature, side: Option<SplitDirection>) -> bool {
    let Some(side) = side else {
        return true;
    };
    match feature.imagery_layer() {
        Some(layer) => {
            let direction = layer.split_direction();
            direction == side || direction == SplitDirection::None
        }
        // No layer means no known side.
        None => false,
    }
}

/// Side of the splitter `pick_position` falls on, when filtering applies.
fn splitter_side(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    pick_position: Option<Vec3>,
    ignore_splitter: bool,
) -> Option<SplitDirection> {
    if ignore_splitter || !ctx.show_splitter.get() {
        return None;
    }
    let screen = scene.wgs84_to_window(pick_position?)?;
    let (width, _) = scene.canvas_size();
    Some(split_side_for_screen_position(
        screen.x,
        width as f64,
        ctx.split_position.get(),
    ))
}

/// Picks everything under `screen` and stores the result where the UI
/// reads it.
pub fn pick_from_screen_position(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    screen: Vec2,
    ignore_splitter: bool,
) -> Rc<PickedFeatures> {
    let ray = scene.pick_ray(screen);
    let pick_position = ray.as_ref().and_then(|r| scene.pick_globe(r));
    let default_height = pick_position.map_or(0.0, |p| ecef_to_geodetic(p).alt_m);

    let vector = pick_vector_features(ctx, scene, screen);

    let hooks = ProviderCoordHooks::attach(scene.imagery_layers());
    let raster = match &ray {
        Some(ray) if ctx.allow_feature_info_requests.get() => {
            scene.pick_imagery_layer_features(ray)
        }
        _ => None,
    };
    let provider_coords = hooks.coords().clone();
    drop(hooks);

    let result = PickedFeatures::start(PickRequest {
        provider_coords,
        pick_position,
        existing: vector,
        raster: raster.into_iter().collect(),
        default_height,
        splitter_side: splitter_side(ctx, scene, pick_position, ignore_splitter),
    });
    store_picked_features(ctx, &result);
    result
}

/// Re-picks raster layers at a known location, reusing tile coordinates
/// captured by an earlier screen pick.
pub fn pick_from_location(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    location: LatLonHeight,
    provider_coords: &ProviderCoords,
    existing: Vec<Rc<Feature>>,
) -> Rc<PickedFeatures> {
    let result = build_location_pick(ctx, scene, location, provider_coords, existing);
    store_picked_features(ctx, &result);
    result
}

/// Like [`pick_from_location`] but returns the features instead of storing
/// the result.
pub async fn get_features_at_location(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    location: LatLonHeight,
    provider_coords: &ProviderCoords,
    existing: Vec<Rc<Feature>>,
) -> Vec<Rc<Feature>> {
    let result = build_location_pick(ctx, scene, location, provider_coords, existing);
    result.all_features_available().await;
    result.features()
}

fn build_location_pick(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    location: LatLonHeight,
    provider_coords: &ProviderCoords,
    existing: Vec<Rc<Feature>>,
) -> Rc<PickedFeatures> {
    let pick_position = geodetic_to_ecef(location.to_geodetic());
    let geodetic = ecef_to_geodetic(pick_position);
    let raster = if ctx.allow_feature_info_requests.get() {
        pick_imagery_layer_features(scene, geodetic, provider_coords)
    } else {
        Vec::new()
    };
    PickedFeatures::start(PickRequest {
        provider_coords: provider_coords.clone(),
        pick_position: Some(pick_position),
        existing,
        raster,
        default_height: geodetic.alt_m,
        splitter_side: splitter_side(ctx, scene, Some(pick_position), false),
    })
}

/// One pick per layer, top to bottom, for providers with recorded coords.
fn pick_imagery_layer_features(
    scene: &dyn Scene,
    position: Geodetic,
    provider_coords: &ProviderCoords,
) -> Vec<FeaturePickFuture> {
    let mut picks = Vec::new();
    for layer in scene.imagery_layers().layers().into_iter().rev() {
        let provider = layer.provider();
        let Some(coords) = provider.url().and_then(|url| provider_coords.get(&url)) else {
            continue;
        };
        let Some(pick) = provider.pick_features(coords, position.lon_rad, position.lat_rad) else {
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
    picks
}

/// Every vector feature under `screen`. Synchronous: the data is in memory.
pub fn pick_vector_features(
    ctx: &ViewerContext,
    scene: &dyn Scene,
    screen: Vec2,
) -> Vec<Rc<Feature>> {
    let allow_requests = ctx.allow_feature_info_requests.get();
    let mut features: Vec<Rc<Feature>> = Vec::new();
    let mut seen_entities = BTreeSet::new();

    for picked in scene.drill_pick(screen) {
        if picked.owner_name().as_deref() == Some(FEATURE_HIGHLIGHT_NAME) {
            continue;
        }

        let item = picked.owner_item().and_then(|id| ctx.find_item(id));
        if allow_requests
            && let Some(item) = &item
            && let Some(info) = item.as_feature_info()
        {
            let load_external = features.len() < info.max_requests();
            if let Some(feature) = features_from_pick_result(
                item,
                Some(screen),
                &picked,
                load_external,
                &ctx.feature_info_fetcher,
            ) {
                features.push(feature);
            }
            continue;
        }

        if let Some(entity) = &picked.entity
            && seen_entities.insert(entity.id())
        {
            let mut feature = Feature::from_entity(Rc::clone(entity));
            if let Some(primitive) = &picked.primitive {
                feature = feature.with_primitive(Rc::clone(primitive));
            }
            features.push(Rc::new(feature));
        }
    }
    features
}

/// Puts `result` in the top interaction mode, or the shared slot when no
/// mode is active.
pub fn store_picked_features(ctx: &ViewerContext, result: &Rc<PickedFeatures>) {
    match ctx.top_interaction_mode() {
        Some(mode) => mode.picked_features().set(Some(Rc::clone(result))),
        None => ctx.picked_features.set(Some(Rc::clone(result))),
    }
}
