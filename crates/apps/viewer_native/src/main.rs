use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use catalog::{CatalogItem, FeatureInfoFetcher, HttpFeatureInfoFetcher, MappableItem};
use clap::Parser;
use foundation::math::{Geodetic, Vec2};
use foundation::{BoundingSphere, Rectangle};
use layers::{ImageryParts, MapItem};
use scene::headless::{HeadlessScene, StaticImageryProvider};
use scene::{
    BoundsState, Credit, DataSource, Entity, ImageryProvider, Primitive, Readiness, Scene,
    SplitDirection,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use viewer::{Viewer, ViewerConfig, ViewerContext, ZoomTarget};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drives a headless globe viewer from a JSON scenario")]
struct Args {
    /// Scenario file (JSON)
    scenario: PathBuf,

    /// Pick at a screen position: x,y in pixels
    #[arg(long)]
    pick: Option<String>,

    /// Fly to the workbench item with this name
    #[arg(long)]
    zoom_to: Option<String>,

    /// Write a PNG data URL of the final frame to this file
    #[arg(long)]
    screenshot: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Scenario {
    config: ViewerConfig,
    width: u32,
    height: u32,
    workbench: Vec<ItemSpec>,
    base_map: Option<ItemSpec>,
    show_splitter: bool,
    split_position: f64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            config: ViewerConfig::default(),
            width: 800,
            height: 600,
            workbench: Vec::new(),
            base_map: None,
            show_splitter: false,
            split_position: 0.5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemSpec {
    name: String,
    #[serde(default)]
    imagery: Vec<ImagerySpec>,
    #[serde(default)]
    points: Vec<PointSpec>,
    #[serde(default)]
    tilesets: Vec<TilesetSpec>,
    /// "left", "right" or absent
    #[serde(default)]
    split: Option<String>,
    /// west, south, east, north in degrees
    #[serde(default)]
    rectangle: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
struct ImagerySpec {
    url: String,
    #[serde(default)]
    credit: Option<String>,
    #[serde(default = "full_alpha")]
    alpha: f64,
}

fn full_alpha() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct PointSpec {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    height: f64,
}

#[derive(Debug, Deserialize)]
struct TilesetSpec {
    name: String,
    lat: f64,
    lon: f64,
    radius: f64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(&args.scenario)?;
    let scenario: Scenario = serde_json::from_str(&text)?;
    info!(path = %args.scenario.display(), items = scenario.workbench.len(), "scenario loaded");

    let fetcher: Rc<dyn FeatureInfoFetcher> =
        Rc::new(HttpFeatureInfoFetcher::new(reqwest::Client::new()));
    let ctx = Rc::new(ViewerContext::new(scenario.config, fetcher));
    let (width, height) = (scenario.width, scenario.height);
    let viewer = Viewer::new(Rc::clone(&ctx), move || {
        Ok(Rc::new(HeadlessScene::try_new(width, height)?) as Rc<dyn Scene>)
    })?;

    let mut items = Vec::new();
    for spec in &scenario.workbench {
        let item = build_item(spec);
        ctx.workbench.add(Rc::clone(&item) as Rc<dyn CatalogItem>);
        items.push(item);
    }
    if let Some(spec) = &scenario.base_map {
        ctx.base_map.set(Some(build_item(spec) as Rc<dyn CatalogItem>));
    }
    ctx.show_splitter.set(scenario.show_splitter);
    ctx.split_position.set(scenario.split_position);

    let summary = viewer.run_reactions();
    viewer.render_frame();
    let scene = viewer.scene();
    let layers: Vec<String> = scene
        .imagery_layers()
        .layers()
        .iter()
        .map(|layer| layer.provider().url().unwrap_or_default())
        .collect();
    let sources: Vec<String> = scene
        .data_sources()
        .sources()
        .iter()
        .map(|source| source.name().to_string())
        .collect();
    println!(
        "{}",
        json!({
            "reactions": summary.runs,
            "imagery_layers": layers,
            "data_sources": sources,
            "primitives": scene.primitives().len(),
            "attributions": viewer.attributions().get(),
        })
    );

    if let Some(name) = &args.zoom_to {
        match items.iter().find(|item| item.name() == name.as_str()) {
            Some(item) => {
                let target = ZoomTarget::Mappable(Rc::clone(item) as Rc<dyn CatalogItem>);
                let outcome = viewer.zoom_to(target).await?;
                let camera = scene.camera_pose().geodetic();
                println!(
                    "{}",
                    json!({
                        "zoom": format!("{outcome:?}"),
                        "camera": [camera.lat_deg(), camera.lon_deg(), camera.alt_m],
                    })
                );
            }
            None => warn!(%name, "no workbench item to zoom to"),
        }
    }

    if let Some(position) = &args.pick {
        let screen = parse_screen_position(position)?;
        let picked = viewer.pick_from_screen_position(screen, false);
        picked.all_features_available().await;
        let names: Vec<String> = picked
            .features()
            .iter()
            .map(|feature| feature.name().unwrap_or("(unnamed)").to_string())
            .collect();
        println!(
            "{}",
            json!({
                "picked": names,
                "error": picked.error(),
            })
        );
    }

    if let Some(path) = &args.screenshot {
        viewer.render_frame();
        let url = viewer.capture_screenshot()?;
        fs::write(path, url)?;
        info!(path = %path.display(), "screenshot written");
    }

    viewer.destroy();
    Ok(())
}

fn build_item(spec: &ItemSpec) -> Rc<MappableItem> {
    let mut map_items = Vec::new();
    for imagery in &spec.imagery {
        let mut provider = StaticImageryProvider::new(Some(imagery.url.as_str()));
        if let Some(credit) = &imagery.credit {
            provider = provider.with_credit(Credit::new(credit.clone()));
        }
        let provider: Rc<dyn ImageryProvider> = Rc::new(provider);
        map_items.push(MapItem::Imagery(
            ImageryParts::new(provider).with_alpha(imagery.alpha),
        ));
    }
    if !spec.points.is_empty() {
        let source = DataSource::new(&spec.name);
        for point in &spec.points {
            let position = Geodetic::from_degrees(point.lat, point.lon, point.height);
            let entity = Rc::new(Entity::new(&point.name).with_position(position));
            entity.set_bounds(BoundsState::Ready(BoundingSphere::from_geodetic(position, 1.0)));
            source.add_entity(entity);
        }
        map_items.push(MapItem::DataSource(source));
    }
    for tileset in &spec.tilesets {
        let center = Geodetic::from_degrees(tileset.lat, tileset.lon, 0.0);
        let primitive = Primitive::tileset(&tileset.name)
            .with_bounding_sphere(BoundingSphere::from_geodetic(center, tileset.radius));
        primitive.set_readiness(Readiness::Ready);
        map_items.push(MapItem::Primitive(Rc::new(primitive)));
    }

    let mut item = MappableItem::new(&spec.name);
    if spec.split.is_some() {
        item = item.splittable();
    }
    if let Some([west, south, east, north]) = spec.rectangle {
        item = item.with_display_rectangle(Rectangle::from_degrees(west, south, east, north));
    }
    let item = Rc::new(item.with_map_items(map_items));
    match spec.split.as_deref() {
        Some("left") => item.set_split_direction(SplitDirection::Left),
        Some("right") => item.set_split_direction(SplitDirection::Right),
        _ => {}
    }
    item
}

fn parse_screen_position(text: &str) -> Result<Vec2, String> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got {text:?}"))?;
    let x: f64 = x.trim().parse().map_err(|_| format!("bad x coordinate: {x:?}"))?;
    let y: f64 = y.trim().parse().map_err(|_| format!("bad y coordinate: {y:?}"))?;
    Ok(Vec2::new(x, y))
}
