//! Map configuration: initial view, layer catalog and sync timings.
//!
//! The page may embed its configuration as JSON in a
//! `<script id="map-config" type="application/json">` element; otherwise the
//! built-in default is used.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::hash::{
    ChangeChannel, LatLng, LayerRegistry, RegistryError, SyncOptions, DEFAULT_CHANGE_DEFER,
    DEFAULT_POLL_INTERVAL,
};
use crate::host::Host;

/// Errors that can occur while loading a map configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// The JSON could not be parsed.
    Parse(String),
    /// The configuration could not be written as JSON.
    Serialize(String),
    /// The configuration is well formed but inconsistent.
    Invalid(String),
    /// The layer keys do not form a valid registry.
    Registry(RegistryError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "Config parse error: {}", msg),
            ConfigError::Serialize(msg) => write!(f, "Config serialize error: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
            ConfigError::Registry(e) => write!(f, "Invalid layer registry: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for ConfigError {
    fn from(e: RegistryError) -> Self {
        ConfigError::Registry(e)
    }
}

/// Whether a layer is an exclusive base map or a toggleable overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Base,
    Overlay,
}

/// Where a layer's tiles come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerSource {
    /// XYZ tile template, e.g. `https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png`.
    Tile { url: String },
    /// WMS endpoint.
    Wms {
        url: String,
        layers: String,
        #[serde(default = "default_wms_format")]
        format: String,
        #[serde(default)]
        transparent: bool,
        /// CRS code such as `EPSG4326`; the map's CRS when absent.
        #[serde(default)]
        crs: Option<String>,
    },
}

fn default_wms_format() -> String {
    "image/png".to_string()
}

/// One entry of the layer catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Short key used in the URL fragment.
    pub key: String,
    /// Label in the layer control.
    pub name: String,
    pub kind: LayerKind,
    pub source: LayerSource,
    #[serde(default)]
    pub attribution: Option<String>,
    #[serde(default)]
    pub min_zoom: Option<u8>,
    #[serde(default)]
    pub opacity: Option<f64>,
}

/// Hash sync timings in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    pub change_defer_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            change_defer_ms: DEFAULT_CHANGE_DEFER.as_millis() as u64,
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl SyncConfig {
    /// Sync options for `host`, polling only if it lacks hash-change events.
    pub fn options<H: Host + ?Sized>(&self, host: &H) -> SyncOptions {
        SyncOptions {
            change_defer: Duration::from_millis(self.change_defer_ms),
            channel: ChangeChannel::detect(host, Duration::from_millis(self.poll_interval_ms)),
        }
    }
}

/// Full map page configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// DOM element id of the map container.
    pub container: String,
    pub center: LatLng,
    pub zoom: i32,
    /// Layers in fragment order.
    pub layers: Vec<LayerConfig>,
    /// Keys attached when the URL has no valid fragment.
    pub default_layers: Vec<String>,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            container: "map".to_string(),
            center: LatLng::new(59.3326, 24.5679),
            zoom: 14,
            layers: vec![
                LayerConfig {
                    key: "b".to_string(),
                    name: "OpenStreetMap".to_string(),
                    kind: LayerKind::Base,
                    source: LayerSource::Tile {
                        url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
                    },
                    attribution: Some(
                        "Kaart: <a href=\"http://osm.org/copyright\">OSM</a>".to_string(),
                    ),
                    min_zoom: None,
                    opacity: None,
                },
                LayerConfig {
                    key: "o".to_string(),
                    name: "Ortofoto".to_string(),
                    kind: LayerKind::Base,
                    source: LayerSource::Tile {
                        url: "https://tiles.maaamet.ee/tm/tms/1.0.0/foto@GMC/{z}/{x}/{-y}.png"
                            .to_string(),
                    },
                    attribution: Some(
                        "Orto: <a href=\"https://www.maaamet.ee/\" target=\"_blank\" \
                         rel=\"noopener noreferrer\">Maa-Amet</a>"
                            .to_string(),
                    ),
                    min_zoom: None,
                    opacity: None,
                },
                LayerConfig {
                    key: "hy".to_string(),
                    name: "Hybriid".to_string(),
                    kind: LayerKind::Overlay,
                    source: LayerSource::Tile {
                        url: "https://tiles.maaamet.ee/tm/tms/1.0.0/hybriid@GMC/{z}/{x}/{-y}.png"
                            .to_string(),
                    },
                    attribution: None,
                    min_zoom: None,
                    opacity: None,
                },
                LayerConfig {
                    key: "ka".to_string(),
                    name: "Kataster".to_string(),
                    kind: LayerKind::Overlay,
                    source: LayerSource::Wms {
                        url: "https://kaart.maaamet.ee/wms/alus-geo?".to_string(),
                        layers: "TOPOYKSUS_6569".to_string(),
                        format: default_wms_format(),
                        transparent: true,
                        crs: Some("EPSG4326".to_string()),
                    },
                    attribution: None,
                    min_zoom: Some(15),
                    opacity: None,
                },
                LayerConfig {
                    key: "va".to_string(),
                    name: "Vanamõisa".to_string(),
                    kind: LayerKind::Overlay,
                    source: LayerSource::Tile {
                        url: "https://mapwarper.net/maps/tile/80329/{z}/{x}/{y}.png".to_string(),
                    },
                    attribution: Some(
                        "<a href='https://atp.amphora.ee/sauevv/index.aspx?itm=1118413' \
                         target='_blank'>Vanamõisa arendusala eskiis</a>"
                            .to_string(),
                    ),
                    min_zoom: None,
                    opacity: Some(0.8),
                },
            ],
            default_layers: vec!["o".to_string()],
            sync: SyncConfig::default(),
        }
    }
}

impl MapConfig {
    /// Id of the inline JSON element read by [`MapConfig::load`].
    pub const ELEMENT_ID: &'static str = "map-config";

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Checks the invariants the map and the hash sync rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::Invalid("no layers configured".to_string()));
        }
        if !self.center.lat.is_finite() || !self.center.lng.is_finite() {
            return Err(ConfigError::Invalid("center must be finite".to_string()));
        }

        // Keys double as registry keys, so reuse its checks
        self.registry(|layer| layer.key.clone())?;

        for layer in &self.layers {
            if let Some(opacity) = layer.opacity {
                if !(0.0..=1.0).contains(&opacity) {
                    return Err(ConfigError::Invalid(format!(
                        "opacity of {} out of range: {}",
                        layer.key, opacity
                    )));
                }
            }
        }
        for key in &self.default_layers {
            if self.layer(key).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown default layer: {}",
                    key
                )));
            }
        }
        if self.sync.change_defer_ms == 0 || self.sync.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync intervals must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn layer(&self, key: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|layer| layer.key == key)
    }

    /// Builds a registry by creating one handle per configured layer.
    pub fn registry<L, F>(&self, mut make_layer: F) -> Result<LayerRegistry<L>, RegistryError>
    where
        L: PartialEq,
        F: FnMut(&LayerConfig) -> L,
    {
        LayerRegistry::new(
            self.layers
                .iter()
                .map(|layer| (layer.key.clone(), make_layer(layer))),
        )
    }

    /// Load the configuration embedded in the page.
    #[cfg(target_arch = "wasm32")]
    pub fn load() -> Self {
        let Some(document) = web_sys::window().and_then(|w| w.document()) else {
            return Self::default();
        };

        let json = match document.get_element_by_id(Self::ELEMENT_ID) {
            Some(element) => element.text_content().unwrap_or_default(),
            None => return Self::default(),
        };

        match Self::from_json(&json) {
            Ok(config) => {
                log::info!("Loaded map config from #{}", Self::ELEMENT_ID);
                config
            }
            Err(e) => {
                log::warn!("Failed to load map config: {}", e);
                Self::default()
            }
        }
    }

    /// Native builds have no page to read from.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load() -> Self {
        Self::default()
    }
}
