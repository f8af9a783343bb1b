//! Feature-info enrichment: follow-up HTTP requests templated from the
//! properties of a picked feature.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use foundation::Rectangle;
use foundation::math::Vec2;
use futures_util::FutureExt;
use futures_util::future::{self, LocalBoxFuture};
use scene::{
    Credit, FeaturePickFuture, ImageryLayerFeatureInfo, ImageryProvider, PickError, PickedObject,
    TileCoords,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::feature::Feature;
use crate::item::CatalogItem;

pub const ERROR_PROPERTY: &str = "Error";

/// Source of feature-info JSON documents.
pub trait FeatureInfoFetcher {
    fn fetch_json(&self, url: &str) -> LocalBoxFuture<'static, Result<Value, FetchError>>;
}

/// Fetches feature info over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpFeatureInfoFetcher {
    client: reqwest::Client,
}

impl HttpFeatureInfoFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl FeatureInfoFetcher for HttpFeatureInfoFetcher {
    fn fetch_json(&self, url: &str) -> LocalBoxFuture<'static, Result<Value, FetchError>> {
        let request = self.client.get(url);
        async move {
            let resp = request.send().await?.error_for_status()?;
            Ok::<_, FetchError>(resp.json::<Value>().await?)
        }
        .boxed_local()
    }
}

/// In-memory responses keyed by URL.
#[derive(Debug, Default)]
pub struct MemoryFeatureInfoFetcher {
    responses: RefCell<BTreeMap<String, Result<Value, FetchError>>>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFeatureInfoFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, response: Result<Value, FetchError>) {
        self.responses.borrow_mut().insert(url.into(), response);
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl FeatureInfoFetcher for MemoryFeatureInfoFetcher {
    fn fetch_json(&self, url: &str) -> LocalBoxFuture<'static, Result<Value, FetchError>> {
        self.requests.borrow_mut().push(url.to_string());
        let response = self
            .responses
            .borrow()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotFound(url.to_string())));
        future::ready(response).boxed_local()
    }
}

fn template_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replaces `{name}` placeholders with url-encoded property values.
/// Placeholders without a matching property are kept verbatim.
pub fn expand_url_template(template: &str, properties: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        match properties.get(key) {
            Some(value) => out.push_str(&urlencoding::encode(&template_value(value))),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn describe_value(value: &Value, null_string: Option<&str>, out: &mut String) {
    match value {
        Value::Object(map) => describe_rows(map.iter(), null_string, out),
        Value::String(s) => out.push_str(&escape_html(s)),
        Value::Null => out.push_str(&escape_html(null_string.unwrap_or_default())),
        other => out.push_str(&other.to_string()),
    }
}

fn describe_rows<'a>(
    rows: impl Iterator<Item = (&'a String, &'a Value)>,
    null_string: Option<&str>,
    out: &mut String,
) {
    out.push_str("<table class=\"feature-info-table\">");
    for (key, value) in rows {
        if value.is_null() && null_string.is_none() {
            continue;
        }
        out.push_str("<tr><th>");
        out.push_str(&escape_html(key));
        out.push_str("</th><td>");
        describe_value(value, null_string, out);
        out.push_str("</td></tr>");
    }
    out.push_str("</table>");
}

/// Renders properties as an HTML table. Nested objects become nested tables.
pub fn describe_from_properties(
    properties: &BTreeMap<String, Value>,
    show_string_if_null: Option<&str>,
) -> String {
    let mut out = String::new();
    describe_rows(properties.iter(), show_string_if_null, &mut out);
    out
}

fn merge_object(target: &mut BTreeMap<String, Value>, source: Map<String, Value>) {
    for (key, value) in source {
        target.insert(key, value);
    }
}

/// Fetches the templated URL for one feature and merges the response into
/// its properties. Failures become an `Error` property naming the URL.
pub async fn enrich_feature(
    feature: Rc<Feature>,
    template: String,
    show_string_if_null: Option<String>,
    fetcher: Rc<dyn FeatureInfoFetcher>,
) {
    let url = feature
        .properties()
        .with(|props| expand_url_template(&template, props));
    let response = fetcher.fetch_json(&url).await.and_then(|value| match value {
        Value::Object(map) => Ok(map),
        other => Err(FetchError::Decode(format!("expected an object, got {other}"))),
    });
    match response {
        Ok(map) => {
            let description = feature.properties().update(|props| {
                merge_object(props, map);
                describe_from_properties(props, show_string_if_null.as_deref())
            });
            feature.description().set(Some(description));
            debug!(%url, feature = ?feature.id(), "feature info loaded");
        }
        Err(err) => {
            warn!(%url, error = %err, "feature info request failed");
            feature.properties().update(|props| {
                props.insert(ERROR_PROPERTY.to_string(), Value::String(unavailable_message(&url)));
            });
        }
    }
}

fn unavailable_message(url: &str) -> String {
    format!("Unable to retrieve feature details from:\n\n{url}")
}

/// Builds the feature for a raw vector pick through the item's feature-info
/// capability and tags it with the item.
///
/// When `load_external` is set and the item has a URL template, enrichment is
/// spawned on the current `LocalSet`; the feature is returned immediately and
/// its properties and description update once the request settles.
pub fn features_from_pick_result(
    item: &Rc<dyn CatalogItem>,
    screen: Option<Vec2>,
    picked: &PickedObject,
    load_external: bool,
    fetcher: &Rc<dyn FeatureInfoFetcher>,
) -> Option<Rc<Feature>> {
    let info = item.as_feature_info()?;
    let feature = Rc::new(info.build_feature_from_pick_result(screen, picked)?);
    feature.set_catalog_item(Some(item.id()));

    if load_external && let Some(template) = info.feature_info_url_template() {
        tokio::task::spawn_local(enrich_feature(
            Rc::clone(&feature),
            template,
            info.show_string_if_property_value_is_null(),
            Rc::clone(fetcher),
        ));
    }
    Some(feature)
}

async fn enrich_imagery_feature(
    feature: &mut ImageryLayerFeatureInfo,
    template: &str,
    show_string_if_null: Option<&str>,
    fetcher: &dyn FeatureInfoFetcher,
) {
    let url = expand_url_template(template, &feature.properties);
    match fetcher.fetch_json(&url).await {
        Ok(Value::Object(map)) => {
            merge_object(&mut feature.properties, map);
            feature.description = Some(describe_from_properties(
                &feature.properties,
                show_string_if_null,
            ));
        }
        Ok(_) | Err(_) => {
            warn!(%url, "feature info request failed");
            feature.properties.insert(
                ERROR_PROPERTY.to_string(),
                Value::String(unavailable_message(&url)),
            );
        }
    }
}

/// Raster provider wrapper that enriches picked features when the pick
/// returned fewer than `max_requests` of them.
pub struct EnrichingImageryProvider {
    inner: Rc<dyn ImageryProvider>,
    template: Option<String>,
    max_requests: usize,
    show_string_if_null: Option<String>,
    fetcher: Rc<dyn FeatureInfoFetcher>,
    picks: Cell<usize>,
}

impl EnrichingImageryProvider {
    pub fn new(
        inner: Rc<dyn ImageryProvider>,
        item: &dyn CatalogItem,
        fetcher: Rc<dyn FeatureInfoFetcher>,
    ) -> Self {
        let info = item.as_feature_info();
        Self {
            inner,
            template: info.and_then(|i| i.feature_info_url_template()),
            max_requests: info.map_or(crate::item::DEFAULT_MAX_REQUESTS, |i| i.max_requests()),
            show_string_if_null: info.and_then(|i| i.show_string_if_property_value_is_null()),
            fetcher,
            picks: Cell::new(0),
        }
    }

    pub fn inner(&self) -> &Rc<dyn ImageryProvider> {
        &self.inner
    }

    pub fn picks(&self) -> usize {
        self.picks.get()
    }
}

impl ImageryProvider for EnrichingImageryProvider {
    fn url(&self) -> Option<String> {
        self.inner.url()
    }

    fn credit(&self) -> Option<Credit> {
        self.inner.credit()
    }

    fn rectangle(&self) -> Option<Rectangle> {
        self.inner.rectangle()
    }

    fn maximum_level(&self) -> u32 {
        self.inner.maximum_level()
    }

    fn pick_features(
        &self,
        coords: TileCoords,
        lon_rad: f64,
        lat_rad: f64,
    ) -> Option<FeaturePickFuture> {
        let pick = self.inner.pick_features(coords, lon_rad, lat_rad)?;
        self.picks.set(self.picks.get() + 1);
        let template = self.template.clone();
        let max_requests = self.max_requests;
        let null_string = self.show_string_if_null.clone();
        let fetcher = Rc::clone(&self.fetcher);
        Some(
            async move {
                let mut features = pick.await?;
                if let Some(template) = template
                    && features.len() < max_requests
                {
                    for feature in &mut features {
                        enrich_imagery_feature(feature, &template, null_string.as_deref(), &*fetcher)
                            .await;
                    }
                }
                Ok::<_, PickError>(features)
            }
            .boxed_local(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EnrichingImageryProvider, FeatureInfoFetcher, MemoryFeatureInfoFetcher,
        describe_from_properties, expand_url_template, features_from_pick_result,
    };
    use crate::error::FetchError;
    use crate::item::{CatalogItem, FeatureInfoSettings, MappableItem};
    use foundation::math::Geodetic;
    use pretty_assertions::assert_eq;
    use scene::headless::StaticImageryProvider;
    use scene::{Entity, ImageryLayerFeatureInfo, ImageryProvider, PickedObject, TileCoords};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn props(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn item(template: &str, max_requests: usize) -> Rc<dyn CatalogItem> {
        Rc::new(MappableItem::new("wells").with_feature_info(FeatureInfoSettings {
            url_template: Some(template.to_string()),
            max_requests,
            show_string_if_null: None,
        }))
    }

    #[test]
    fn template_values_are_url_encoded() {
        let p = props(&[("name", json!("a b/c")), ("id", json!(7))]);
        assert_eq!(
            expand_url_template("https://x.test/{name}?id={id}&q={missing}", &p),
            "https://x.test/a%20b%2Fc?id=7&q={missing}"
        );
        assert_eq!(expand_url_template("no-close{brace", &p), "no-close{brace");
    }

    #[test]
    fn description_skips_nulls_unless_a_string_is_given() {
        let p = props(&[("a", json!(1)), ("b", json!(null)), ("c", json!("<x>"))]);
        assert_eq!(
            describe_from_properties(&p, None),
            "<table class=\"feature-info-table\"><tr><th>a</th><td>1</td></tr><tr><th>c</th><td>&lt;x&gt;</td></tr></table>"
        );
        assert!(describe_from_properties(&p, Some("n/a")).contains("<th>b</th><td>n/a</td>"));
    }

    #[tokio::test]
    async fn enrichment_merges_properties_and_rewrites_description() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let memory = Rc::new(MemoryFeatureInfoFetcher::new());
                memory.insert("https://x.test/w7", Ok(json!({"depth": 40})));
                let fetcher: Rc<dyn FeatureInfoFetcher> = memory.clone();

                let entity = Rc::new(
                    Entity::new("well")
                        .with_property("id", json!("w7"))
                        .with_position(Geodetic::from_degrees(0.0, 0.0, 0.0)),
                );
                let picked = PickedObject {
                    entity: Some(entity),
                    primitive: None,
                };
                let item = item("https://x.test/{id}", 10);
                let feature =
                    features_from_pick_result(&item, None, &picked, true, &fetcher).unwrap();
                assert_eq!(feature.catalog_item(), Some(item.id()));
                assert_eq!(feature.property("depth"), None);

                tokio::task::yield_now().await;
                assert_eq!(memory.requests(), vec!["https://x.test/w7".to_string()]);
                assert_eq!(feature.property("depth"), Some(json!(40)));
                assert!(feature.description().get().unwrap().contains("<th>depth</th>"));
            })
            .await;
    }

    #[tokio::test]
    async fn failed_enrichment_adds_error_property() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let memory = Rc::new(MemoryFeatureInfoFetcher::new());
                memory.insert("https://x.test/info", Err(FetchError::Status(500)));
                let fetcher: Rc<dyn FeatureInfoFetcher> = memory.clone();
                let picked = PickedObject {
                    entity: Some(Rc::new(Entity::new("well"))),
                    primitive: None,
                };
                let feature =
                    features_from_pick_result(&item("https://x.test/info", 10), None, &picked, true, &fetcher)
                        .unwrap();
                tokio::task::yield_now().await;
                assert_eq!(
                    feature.property("Error"),
                    Some(json!("Unable to retrieve feature details from:\n\nhttps://x.test/info"))
                );
            })
            .await;
    }

    #[tokio::test]
    async fn load_external_false_skips_requests() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let memory = Rc::new(MemoryFeatureInfoFetcher::new());
                let fetcher: Rc<dyn FeatureInfoFetcher> = memory.clone();
                let picked = PickedObject {
                    entity: Some(Rc::new(Entity::new("well"))),
                    primitive: None,
                };
                let feature =
                    features_from_pick_result(&item("https://x.test/{id}", 10), None, &picked, false, &fetcher);
                assert!(feature.is_some());
                tokio::task::yield_now().await;
                assert!(memory.requests().is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn raster_features_enriched_below_the_cap() {
        let memory = Rc::new(MemoryFeatureInfoFetcher::new());
        memory.insert("https://x.test/p1", Ok(json!({"owner": "council"})));
        let fetcher: Rc<dyn FeatureInfoFetcher> = memory.clone();

        let mut parcel = ImageryLayerFeatureInfo::named("parcel");
        parcel.properties.insert("id".into(), json!("p1"));
        let inner: Rc<dyn ImageryProvider> =
            Rc::new(StaticImageryProvider::new(Some("wms")).with_features(vec![parcel]));

        let enriching = EnrichingImageryProvider::new(
            inner.clone(),
            &*item("https://x.test/{id}", 2),
            fetcher.clone(),
        );
        let coords = TileCoords { x: 0, y: 0, level: 0 };
        let features = enriching.pick_features(coords, 0.0, 0.0).unwrap().await.unwrap();
        assert_eq!(features[0].properties.get("owner"), Some(&json!("council")));
        assert!(features[0].description.is_some());

        // One feature is not below a cap of one.
        let capped = EnrichingImageryProvider::new(inner, &*item("https://x.test/{id}", 1), fetcher);
        let features = capped.pick_features(coords, 0.0, 0.0).unwrap().await.unwrap();
        assert_eq!(features[0].properties.get("owner"), None);
        assert_eq!(memory.requests().len(), 1);
    }
}
