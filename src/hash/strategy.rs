//! Substitutable parse/format/update behavior.
//!
//! [`HashStrategy`] has default bodies for all three operations. A wrapper
//! such as [`LoggingHash`] overrides some of them and delegates to an inner
//! strategy. [`UpdateContext::parse`] always goes through the outermost
//! strategy, so a wrapper's `parse` also sees the calls made by the default
//! `update`.

use super::registry::LayerRegistry;
use super::view::ViewState;
use crate::map::MapView;

/// Sync state operations exposed to [`HashStrategy::update`].
pub(crate) trait SyncLink {
    fn location_hash(&self) -> String;
    fn last_hash(&self) -> Option<String>;
    fn set_last_hash(&self, hash: String);
    fn clear_last_hash(&self);
    fn set_applying(&self, applying: bool);
    fn on_map_move(&self);
}

/// Everything the inbound update step may touch.
pub struct UpdateContext<'a, M: MapView> {
    pub(crate) map: &'a M,
    pub(crate) registry: &'a LayerRegistry<M::Layer>,
    pub(crate) strategy: &'a dyn HashStrategy<M>,
    pub(crate) link: &'a dyn SyncLink,
}

impl<'a, M: MapView> UpdateContext<'a, M> {
    pub fn map(&self) -> &M {
        self.map
    }

    pub fn registry(&self) -> &LayerRegistry<M::Layer> {
        self.registry
    }

    /// Fragment currently in the location bar.
    pub fn current_hash(&self) -> String {
        self.link.location_hash()
    }

    /// Fragment most recently written or applied.
    pub fn last_hash(&self) -> Option<String> {
        self.link.last_hash()
    }

    pub fn parse(&self, hash: &str) -> Option<ViewState> {
        self.strategy.parse(hash)
    }

    /// Moves the map to `view` and records `hash` as applied.
    ///
    /// Every registered layer is detached, then the layers named in `view`
    /// are attached; keys missing from the registry are skipped. View-settled
    /// notifications raised meanwhile do not write to the location bar.
    pub fn apply(&self, hash: &str, view: &ViewState) {
        self.link.set_applying(true);

        for (_, layer) in self.registry.iter() {
            if self.map.has_layer(layer) {
                self.map.remove_layer(layer);
            }
        }
        for key in &view.layers {
            match self.registry.get(key) {
                Some(layer) if !self.map.has_layer(layer) => self.map.add_layer(layer),
                Some(_) => {}
                None => log::debug!("Ignoring unknown layer key: {}", key),
            }
        }
        self.map.set_view(view.center, view.zoom);

        self.link.set_last_hash(hash.to_string());
        self.link.set_applying(false);
    }

    /// Writes the map's current state to the location bar, even when it
    /// matches the last fragment written or applied.
    pub fn refresh(&self) {
        self.link.clear_last_hash();
        self.link.on_map_move();
    }
}

/// The three overridable operations of the hash sync.
pub trait HashStrategy<M: MapView> {
    /// Parses a fragment; `None` when it is malformed.
    fn parse(&self, hash: &str) -> Option<ViewState> {
        ViewState::parse(hash)
    }

    /// Formats the map's current state as a fragment.
    fn format(&self, map: &M, registry: &LayerRegistry<M::Layer>) -> String {
        ViewState::capture(map, registry).to_string()
    }

    /// Applies the location bar's fragment to the map.
    fn update(&self, ctx: &UpdateContext<'_, M>) {
        update_map(ctx);
    }
}

/// Default inbound step: apply a new, well-formed fragment, or overwrite a
/// malformed one with the map's state.
pub fn update_map<M: MapView>(ctx: &UpdateContext<'_, M>) {
    let hash = ctx.current_hash();
    if ctx.last_hash().as_deref() == Some(hash.as_str()) {
        return;
    }

    match ctx.parse(&hash) {
        Some(view) => ctx.apply(&hash, &view),
        None => ctx.refresh(),
    }
}

/// Strategy with the default behavior for every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHash;

impl<M: MapView> HashStrategy<M> for DefaultHash {}

/// Logs every call at debug level and delegates to the inner strategy.
#[derive(Debug, Clone, Default)]
pub struct LoggingHash<S = DefaultHash> {
    inner: S,
}

impl<S> LoggingHash<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<M: MapView, S: HashStrategy<M>> HashStrategy<M> for LoggingHash<S> {
    fn parse(&self, hash: &str) -> Option<ViewState> {
        log::debug!("parse: {}", hash);
        let parsed = self.inner.parse(hash);
        match serde_json::to_string(&parsed) {
            Ok(json) => log::debug!("parse: {}", json),
            Err(e) => log::warn!("Failed to serialize parsed view: {}", e),
        }
        parsed
    }

    fn format(&self, map: &M, registry: &LayerRegistry<M::Layer>) -> String {
        let formatted = self.inner.format(map, registry);
        log::debug!("format: {}", formatted);
        formatted
    }

    fn update(&self, ctx: &UpdateContext<'_, M>) {
        self.inner.update(ctx);
        log::debug!("update");
    }
}
