use std::fmt;
use std::time::Duration;

use foundation::Rectangle;
use scene::TerrainSource;
use serde::Deserialize;

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(err) => write!(f, "failed to parse viewer config: {err}"),
            ConfigError::Invalid(msg) => write!(f, "invalid viewer config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// Extent in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct HomeView {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Default for HomeView {
    fn default() -> Self {
        Self {
            west: -180.0,
            south: -90.0,
            east: 180.0,
            north: 90.0,
        }
    }
}

impl HomeView {
    pub fn rectangle(&self) -> Rectangle {
        Rectangle::from_degrees(self.west, self.south, self.east, self.north)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Named in user-facing errors.
    pub app_name: String,
    pub use_terrain: bool,
    pub terrain_url: Option<String>,
    pub terrain_asset_id: Option<u64>,
    pub ion_access_token: Option<String>,
    pub use_ion_terrain: bool,
    pub allow_feature_info_requests: bool,
    pub zoom_poll_interval_ms: u64,
    pub zoom_timeout_ms: u64,
    pub terrain_sample_level: u32,
    pub default_flight_duration_s: f64,
    pub drag_zoom_flight_duration_s: f64,
    pub home_view: HomeView,
    /// `#rrggbb`, used for the split line in screenshots.
    pub base_map_contrast_color: String,
    pub use_native_resolution: bool,
    pub base_maximum_screen_space_error: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            app_name: "Globe Viewer".to_string(),
            use_terrain: true,
            terrain_url: None,
            terrain_asset_id: None,
            ion_access_token: None,
            use_ion_terrain: false,
            allow_feature_info_requests: true,
            zoom_poll_interval_ms: 100,
            zoom_timeout_ms: 30_000,
            terrain_sample_level: 6,
            default_flight_duration_s: 3.0,
            drag_zoom_flight_duration_s: 1.0,
            home_view: HomeView::default(),
            base_map_contrast_color: "#ffffff".to_string(),
            use_native_resolution: false,
            base_maximum_screen_space_error: 2.0,
        }
    }
}

impl ViewerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zoom_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "zoom_poll_interval_ms must be positive".into(),
            ));
        }
        if self.zoom_timeout_ms < self.zoom_poll_interval_ms {
            return Err(ConfigError::Invalid(
                "zoom_timeout_ms must not be shorter than the poll interval".into(),
            ));
        }
        let sse = self.base_maximum_screen_space_error;
        if sse.is_nan() || sse <= 0.0 {
            return Err(ConfigError::Invalid(
                "base_maximum_screen_space_error must be positive".into(),
            ));
        }
        self.contrast_color()?;
        Ok(())
    }

    pub fn zoom_poll_interval(&self) -> Duration {
        Duration::from_millis(self.zoom_poll_interval_ms)
    }

    pub fn zoom_timeout(&self) -> Duration {
        Duration::from_millis(self.zoom_timeout_ms)
    }

    /// Opaque RGBA parsed from `base_map_contrast_color`.
    pub fn contrast_color(&self) -> Result<[u8; 4], ConfigError> {
        parse_hex_color(&self.base_map_contrast_color).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "base_map_contrast_color {:?} is not #rrggbb",
                self.base_map_contrast_color
            ))
        })
    }

    /// Terrain configured outside the catalog, in priority order.
    pub fn configured_terrain(&self) -> Option<TerrainSource> {
        if let Some(asset_id) = self.terrain_asset_id {
            return Some(TerrainSource::IonAsset {
                asset_id,
                access_token: self.ion_access_token.clone(),
            });
        }
        if let Some(url) = &self.terrain_url {
            return Some(TerrainSource::Url(url.clone()));
        }
        if self.use_ion_terrain {
            return Some(TerrainSource::WorldTerrain);
        }
        None
    }
}

fn parse_hex_color(text: &str) -> Option<[u8; 4]> {
    let hex = text.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?, 255])
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, ViewerConfig};
    use scene::TerrainSource;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ViewerConfig::from_json(r#"{"app_name": "Atlas"}"#).unwrap();
        assert_eq!(config.app_name, "Atlas");
        assert_eq!(config.zoom_poll_interval_ms, 100);
        assert_eq!(config.zoom_timeout_ms, 30_000);
        assert_eq!(config.terrain_sample_level, 6);
        assert_eq!(config.contrast_color().unwrap(), [255, 255, 255, 255]);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ViewerConfig::from_json(r#"{"zoom_poll_interval_ms": 0}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ViewerConfig::from_json(r##"{"base_map_contrast_color": "#12"}"##),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ViewerConfig::from_json("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn asset_id_wins_over_url() {
        let config = ViewerConfig {
            terrain_url: Some("https://terrain.test".into()),
            terrain_asset_id: Some(1),
            ..ViewerConfig::default()
        };
        assert_eq!(
            config.configured_terrain(),
            Some(TerrainSource::IonAsset {
                asset_id: 1,
                access_token: None
            })
        );
        let plain = ViewerConfig::default();
        assert_eq!(plain.configured_terrain(), None);
    }
}
