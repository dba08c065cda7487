//! Serializable view state and the URL fragment format.
//!
//! A fragment encodes the map view as `#<zoom>/<lat>/<lon>/<keys>`, where
//! `<keys>` is the dash-joined list of active layer keys. Coordinates are
//! rounded to a precision that grows with the zoom level, so URLs stay short
//! at low zoom and accurate at high zoom.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::registry::LayerRegistry;
use crate::map::MapView;

/// Geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// The part of the map state that is written to the URL fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub zoom: i32,
    pub center: LatLng,
    /// Active layer keys, in registry order when captured from a map.
    pub layers: Vec<String>,
}

impl ViewState {
    pub fn new(zoom: i32, center: LatLng, layers: Vec<String>) -> Self {
        Self {
            zoom,
            center,
            layers,
        }
    }

    /// Reads the current view of `map`, listing every registry layer that is
    /// attached to it.
    pub fn capture<M: MapView>(map: &M, registry: &LayerRegistry<M::Layer>) -> Self {
        Self {
            zoom: map.zoom(),
            center: map.center(),
            layers: registry.active_keys(map),
        }
    }

    /// Parse a fragment such as `#14/59.3326/24.5679/o-hy`.
    ///
    /// Returns `None` unless the fragment has exactly four `/`-separated
    /// fields with an integer zoom and finite coordinates. Layer keys are
    /// returned as written; empty segments are dropped, so a trailing `/`
    /// means no layers.
    pub fn parse(hash: &str) -> Option<Self> {
        let hash = hash.strip_prefix('#').unwrap_or(hash);

        let fields: Vec<&str> = hash.split('/').collect();
        let [zoom, lat, lng, layers] = fields.as_slice() else {
            return None;
        };

        let zoom: i32 = zoom.parse().ok()?;
        let lat: f64 = lat.parse().ok()?;
        let lng: f64 = lng.parse().ok()?;
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }

        let layers = layers
            .split('-')
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect();

        Some(Self {
            zoom,
            center: LatLng::new(lat, lng),
            layers,
        })
    }

    /// Decimal places used for the coordinates at this zoom level.
    pub fn precision(&self) -> usize {
        precision_for_zoom(self.zoom)
    }
}

/// `max(0, ceil(log2(zoom)))`: each zoom level roughly doubles resolution.
pub fn precision_for_zoom(zoom: i32) -> usize {
    if zoom <= 1 {
        return 0;
    }
    f64::from(zoom).log2().ceil() as usize
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = self.precision();
        write!(
            f,
            "#{}/{:.*}/{:.*}/{}",
            self.zoom,
            precision,
            self.center.lat,
            precision,
            self.center.lng,
            self.layers.join("-")
        )
    }
}
