#![warn(clippy::all)]

//! fullhash-map - a Leaflet web map whose view lives in the URL fragment.
//!
//! The map's zoom, center and active layers are written to the location
//! fragment (`#14/59.3326/24.5679/o-hy`) as the user pans, and the map
//! follows when the fragment changes, so every view can be bookmarked and
//! shared. The sync logic in [`hash`] only talks to the [`map::MapView`] and
//! [`host::Host`] traits; [`web`] implements them over Leaflet and the
//! browser window, and [`headless`] implements them in memory.

pub mod config;
pub mod hash;
pub mod headless;
pub mod host;
pub mod map;

#[cfg(target_arch = "wasm32")]
pub mod web;
