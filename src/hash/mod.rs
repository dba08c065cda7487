//! URL fragment synchronization for the map view.
//!
//! This module keeps the map's zoom, center and active layers in the page's
//! location fragment so that views can be bookmarked and shared, and moves
//! the map when the fragment changes (edits, back/forward).

mod debounce;
mod registry;
mod strategy;
mod sync;
mod view;

pub use debounce::Debounce;
pub use registry::{LayerRegistry, RegistryError};
pub use strategy::{update_map, DefaultHash, HashStrategy, LoggingHash, UpdateContext};
pub use sync::{
    ChangeChannel, HashSync, SyncOptions, DEFAULT_CHANGE_DEFER, DEFAULT_POLL_INTERVAL,
};
pub use view::{precision_for_zoom, LatLng, ViewState};
