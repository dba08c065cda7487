//! Bidirectional link between a map's view and the URL fragment.
//!
//! ## Outbound (map -> location bar)
//!
//! Every view-settled notification formats the current view. When the
//! fragment differs from the last one seen, it replaces the current history
//! entry, so panning never floods the back button.
//!
//! ## Inbound (location bar -> map)
//!
//! Hash-change notifications (native event or polling) are deferred by
//! `change_defer` and coalesced: at most one processing call is pending at a
//! time. Processing parses the fragment and applies it to the map while the
//! `applying` guard mutes the map's own notifications. A malformed fragment
//! is overwritten with the map's state instead.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use super::debounce::Debounce;
use super::registry::LayerRegistry;
use super::strategy::{DefaultHash, HashStrategy, SyncLink, UpdateContext};
use crate::host::{Host, TimerId};
use crate::map::{ListenerId, MapView};

/// Delay between a hash-change notification and processing it.
pub const DEFAULT_CHANGE_DEFER: Duration = Duration::from_millis(200);

/// Polling period when the host has no hash-change event.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How location-bar changes are noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeChannel {
    /// The host's native hash-change event.
    HashChange,
    /// Periodic polling, for hosts without the event.
    Polling { interval: Duration },
}

impl ChangeChannel {
    /// Capability check: prefer the native event, fall back to polling.
    pub fn detect<H: Host + ?Sized>(host: &H, poll_interval: Duration) -> Self {
        if host.supports_hash_change() {
            ChangeChannel::HashChange
        } else {
            ChangeChannel::Polling {
                interval: poll_interval,
            }
        }
    }
}

/// Timing and channel settings for [`HashSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub change_defer: Duration,
    pub channel: ChangeChannel,
}

impl SyncOptions {
    /// Default timings with the channel chosen by [`ChangeChannel::detect`].
    pub fn detect<H: Host + ?Sized>(host: &H) -> Self {
        Self {
            change_defer: DEFAULT_CHANGE_DEFER,
            channel: ChangeChannel::detect(host, DEFAULT_POLL_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ChangeListener {
    Event(ListenerId),
    Poll(TimerId),
}

#[derive(Default)]
struct SyncState {
    last_hash: Option<String>,
    pending: Debounce,
    map_listener: Option<ListenerId>,
    change_listener: Option<ChangeListener>,
}

/// Keeps a map's view and the URL fragment in step.
///
/// Created behind an `Rc`; callbacks handed to the map and host hold only a
/// `Weak` reference, so dropping the last `Rc` stops all work.
pub struct HashSync<M, H, S = DefaultHash>
where
    M: MapView + 'static,
    H: Host + 'static,
    S: HashStrategy<M> + 'static,
{
    this: Weak<Self>,
    map: RefCell<Option<Rc<M>>>,
    registry: LayerRegistry<M::Layer>,
    host: Rc<H>,
    strategy: S,
    options: SyncOptions,
    state: RefCell<SyncState>,
    /// Set while a parsed fragment is being applied to the map.
    applying: Cell<bool>,
}

impl<M, H> HashSync<M, H, DefaultHash>
where
    M: MapView + 'static,
    H: Host + 'static,
{
    /// Attaches with the default parse/format/update behavior.
    pub fn attach(
        map: Option<Rc<M>>,
        registry: LayerRegistry<M::Layer>,
        host: Rc<H>,
        options: SyncOptions,
    ) -> Rc<Self> {
        Self::attach_with(map, registry, host, options, DefaultHash)
    }
}

impl<M, H, S> HashSync<M, H, S>
where
    M: MapView + 'static,
    H: Host + 'static,
    S: HashStrategy<M> + 'static,
{
    /// Creates the sync and, when `map` is given, applies the current
    /// fragment and starts listening. Without a map the instance is inert
    /// until [`HashSync::add_to`].
    pub fn attach_with(
        map: Option<Rc<M>>,
        registry: LayerRegistry<M::Layer>,
        host: Rc<H>,
        options: SyncOptions,
        strategy: S,
    ) -> Rc<Self> {
        let sync = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            map: RefCell::new(None),
            registry,
            host,
            strategy,
            options,
            state: RefCell::new(SyncState::default()),
            applying: Cell::new(false),
        });

        if let Some(map) = map {
            sync.add_to(map);
        }
        sync
    }

    /// Attaches to `map`, detaching from any previous one first.
    pub fn add_to(&self, map: Rc<M>) {
        if self.map().is_some() {
            self.remove();
        }

        *self.map.borrow_mut() = Some(map);
        log::info!(
            "Hash sync attached ({} layers, {:?})",
            self.registry.len(),
            self.options.channel
        );

        self.update();
        self.start_listening();
    }

    /// Cancels pending work, stops listening and releases the map.
    pub fn remove(&self) {
        let pending = self.state.borrow_mut().pending.cancel();
        if let Some(id) = pending {
            self.host.clear_timeout(id);
        }

        self.stop_listening();
        *self.map.borrow_mut() = None;
        log::info!("Hash sync removed");
    }

    pub fn map(&self) -> Option<Rc<M>> {
        self.map.borrow().clone()
    }

    pub fn registry(&self) -> &LayerRegistry<M::Layer> {
        &self.registry
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn options(&self) -> SyncOptions {
        self.options
    }

    pub fn last_hash(&self) -> Option<String> {
        self.state.borrow().last_hash.clone()
    }

    pub fn is_listening(&self) -> bool {
        let state = self.state.borrow();
        state.map_listener.is_some() || state.change_listener.is_some()
    }

    /// Whether a deferred processing call is outstanding.
    pub fn has_pending_update(&self) -> bool {
        self.state.borrow().pending.is_pending()
    }

    /// Parses `hash` through the configured strategy.
    pub fn parse(&self, hash: &str) -> Option<super::ViewState> {
        self.strategy.parse(hash)
    }

    /// Formats the attached map's view, or `None` when detached.
    pub fn format(&self) -> Option<String> {
        let map = self.map()?;
        Some(self.strategy.format(&map, &self.registry))
    }

    /// Applies the location bar's fragment to the map now.
    pub fn update(&self) {
        let Some(map) = self.map() else {
            return;
        };

        let ctx = UpdateContext {
            map: &*map,
            registry: &self.registry,
            strategy: &self.strategy,
            link: self,
        };
        self.strategy.update(&ctx);
    }

    /// View-settled handler: writes the map's view to the location bar.
    pub fn on_map_move(&self) {
        if self.applying.get() {
            return;
        }
        let Some(map) = self.map() else {
            return;
        };
        if !map.is_loaded() {
            return;
        }

        let hash = self.strategy.format(&map, &self.registry);
        if self.state.borrow().last_hash.as_deref() == Some(hash.as_str()) {
            return;
        }

        log::debug!("Replacing location hash with {}", hash);
        self.host.replace_hash(&hash);
        self.state.borrow_mut().last_hash = Some(hash);
    }

    /// Hash-change handler: schedules one deferred [`HashSync::update`].
    pub fn on_hash_change(&self) {
        if self.map.borrow().is_none() || self.state.borrow().pending.is_pending() {
            return;
        }

        let this = self.this.clone();
        let scheduled = self.host.set_timeout(
            self.options.change_defer,
            Box::new(move || {
                if let Some(sync) = this.upgrade() {
                    sync.run_deferred();
                }
            }),
        );
        match scheduled {
            Some(id) => {
                self.state.borrow_mut().pending.schedule(|| id);
            }
            None => log::warn!("Could not defer hash change; waiting for the next one"),
        }
    }

    fn run_deferred(&self) {
        self.state.borrow_mut().pending.fire();
        self.update();
    }

    fn start_listening(&self) {
        let Some(map) = self.map() else {
            return;
        };

        let this = self.this.clone();
        let map_listener = map.on_view_settled(Rc::new(move || {
            if let Some(sync) = this.upgrade() {
                sync.on_map_move();
            }
        }));

        let this = self.this.clone();
        let on_change: Rc<dyn Fn()> = Rc::new(move || {
            if let Some(sync) = this.upgrade() {
                sync.on_hash_change();
            }
        });
        let change_listener = match self.options.channel {
            ChangeChannel::HashChange => {
                Some(ChangeListener::Event(self.host.on_hash_change(on_change)))
            }
            ChangeChannel::Polling { interval } => self
                .host
                .set_interval(interval, on_change)
                .map(ChangeListener::Poll),
        };
        if change_listener.is_none() {
            log::warn!("Hash polling could not start; only map moves are synced");
        }

        let mut state = self.state.borrow_mut();
        state.map_listener = Some(map_listener);
        state.change_listener = change_listener;
    }

    fn stop_listening(&self) {
        let (map_listener, change_listener) = {
            let mut state = self.state.borrow_mut();
            (state.map_listener.take(), state.change_listener.take())
        };

        if let (Some(id), Some(map)) = (map_listener, self.map()) {
            map.off_view_settled(id);
        }
        match change_listener {
            Some(ChangeListener::Event(id)) => self.host.off_hash_change(id),
            Some(ChangeListener::Poll(id)) => self.host.clear_interval(id),
            None => {}
        }
    }
}

impl<M, H, S> SyncLink for HashSync<M, H, S>
where
    M: MapView + 'static,
    H: Host + 'static,
    S: HashStrategy<M> + 'static,
{
    fn location_hash(&self) -> String {
        self.host.location_hash()
    }

    fn last_hash(&self) -> Option<String> {
        self.state.borrow().last_hash.clone()
    }

    fn set_last_hash(&self, hash: String) {
        self.state.borrow_mut().last_hash = Some(hash);
    }

    fn clear_last_hash(&self) {
        self.state.borrow_mut().last_hash = None;
    }

    fn set_applying(&self, applying: bool) {
        self.applying.set(applying);
    }

    fn on_map_move(&self) {
        HashSync::on_map_move(self);
    }
}

impl<M, H, S> Drop for HashSync<M, H, S>
where
    M: MapView + 'static,
    H: Host + 'static,
    S: HashStrategy<M> + 'static,
{
    fn drop(&mut self) {
        if self.is_listening() || self.has_pending_update() {
            self.remove();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{LatLng, LoggingHash, ViewState};
    use crate::headless::{HeadlessMap, ManualHost};

    type Map = HeadlessMap<&'static str>;

    fn registry() -> LayerRegistry<&'static str> {
        LayerRegistry::new([("b", "osm"), ("o", "orto")]).unwrap()
    }

    fn stockholm_map() -> Rc<Map> {
        Rc::new(HeadlessMap::new(LatLng::new(59.0, 18.0), 10))
    }

    fn attach(map: &Rc<Map>, host: &Rc<ManualHost>) -> Rc<HashSync<Map, ManualHost>> {
        HashSync::attach(
            Some(map.clone()),
            registry(),
            host.clone(),
            SyncOptions::detect(&**host),
        )
    }

    fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Counts calls to each operation and delegates to the default behavior.
    #[derive(Default)]
    struct CountingHash {
        parses: Cell<usize>,
        formats: Cell<usize>,
        updates: Cell<usize>,
    }

    impl HashStrategy<Map> for CountingHash {
        fn parse(&self, hash: &str) -> Option<ViewState> {
            self.parses.set(self.parses.get() + 1);
            HashStrategy::<Map>::parse(&DefaultHash, hash)
        }

        fn format(&self, map: &Map, registry: &LayerRegistry<&'static str>) -> String {
            self.formats.set(self.formats.get() + 1);
            HashStrategy::<Map>::format(&DefaultHash, map, registry)
        }

        fn update(&self, ctx: &UpdateContext<'_, Map>) {
            self.updates.set(self.updates.get() + 1);
            HashStrategy::<Map>::update(&DefaultHash, ctx);
        }
    }

    #[test]
    fn test_example_fragment_applied_on_attach() {
        let host = Rc::new(ManualHost::new("#14/59.3326/24.5679/o"));
        let map = stockholm_map();
        map.add_layer(&"osm");

        let options = SyncOptions::detect(&*host);
        let _sync = HashSync::attach(Some(map.clone()), registry(), host.clone(), options);

        assert_eq!(map.zoom(), 14);
        assert!((map.center().lat - 59.3326).abs() < 1e-9);
        assert!((map.center().lng - 24.5679).abs() < 1e-9);
        assert!(map.has_layer(&"orto"));
        assert!(!map.has_layer(&"osm"));
        // Applying never writes back to the location bar
        assert!(host.replacements().is_empty());
    }

    #[test]
    fn test_malformed_fragment_replaced_with_map_state() {
        let host = Rc::new(ManualHost::new("#abc/1/2/x"));
        let map = stockholm_map();
        map.add_layer(&"orto");

        let sync = attach(&map, &host);

        assert_eq!(host.location_hash(), "#10/59.0000/18.0000/o");
        assert_eq!(host.replacements(), vec!["#10/59.0000/18.0000/o"]);
        assert_eq!(sync.last_hash().as_deref(), Some("#10/59.0000/18.0000/o"));
        assert_eq!(map.zoom(), 10);
    }

    #[test]
    fn test_malformed_navigation_restores_unchanged_map_state() {
        let host = Rc::new(ManualHost::new("#10/59.0000/18.0000/"));
        let map = stockholm_map();
        let sync = attach(&map, &host);
        assert!(host.replacements().is_empty());

        // The map still matches the last applied fragment
        host.navigate("#garbage");
        host.advance(millis(300));

        assert_eq!(host.location_hash(), "#10/59.0000/18.0000/");
        assert_eq!(host.replacements(), vec!["#10/59.0000/18.0000/"]);
        assert_eq!(sync.last_hash().as_deref(), Some("#10/59.0000/18.0000/"));
        assert_eq!(map.zoom(), 10);
    }

    #[test]
    fn test_failed_defer_does_not_block_later_changes() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let sync = attach(&map, &host);

        host.set_timers_available(false);
        host.navigate("#12/59.000/18.000/");
        host.advance(millis(300));
        assert!(!sync.has_pending_update());
        assert_eq!(map.zoom(), 10);

        host.set_timers_available(true);
        host.navigate("#13/59.000/18.000/");
        host.advance(millis(300));
        assert_eq!(map.zoom(), 13);
    }

    #[test]
    fn test_empty_fragment_written_once_map_loaded() {
        let host = Rc::new(ManualHost::new(""));
        let map = stockholm_map();
        map.set_loaded(false);

        let sync = attach(&map, &host);
        assert!(host.replacements().is_empty());
        assert_eq!(sync.last_hash(), None);

        map.set_loaded(true);
        map.add_layer(&"osm");
        assert_eq!(host.replacements(), vec!["#10/59.0000/18.0000/b"]);
    }

    #[test]
    fn test_map_moves_replace_hash_without_duplicates() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let _sync = attach(&map, &host);

        map.set_view(LatLng::new(59.5, 18.25), 12);
        map.notify();
        map.add_layer(&"osm");

        assert_eq!(
            host.replacements(),
            vec!["#12/59.5000/18.2500/", "#12/59.5000/18.2500/b"]
        );

        // Our own writes come back as hash changes and are ignored
        host.advance(millis(500));
        assert_eq!(map.zoom(), 12);
        assert_eq!(host.replacements().len(), 2);
    }

    #[test]
    fn test_navigation_applies_after_defer() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let _sync = attach(&map, &host);

        host.navigate("#15/59.4370/24.7536/b-o");
        host.advance(millis(199));
        assert_eq!(map.zoom(), 10);

        host.advance(millis(1));
        assert_eq!(map.zoom(), 15);
        assert_eq!(map.layers(), vec!["osm", "orto"]);
        assert!(host.replacements().is_empty());
    }

    #[test]
    fn test_unknown_keys_ignored_on_apply() {
        let host = Rc::new(ManualHost::new("#14/59.33/24.57/zz-o"));
        let map = stockholm_map();
        let registry = LayerRegistry::new([("o", "orto")]).unwrap();

        let options = SyncOptions::detect(&*host);
        let _sync = HashSync::attach(Some(map.clone()), registry, host.clone(), options);

        assert_eq!(map.layers(), vec!["orto"]);
        assert_eq!(map.zoom(), 14);
    }

    #[test]
    fn test_apply_leaves_unregistered_layers() {
        let host = Rc::new(ManualHost::new("#14/59.33/24.57/b"));
        let map = stockholm_map();
        map.add_layer(&"orto");
        map.add_layer(&"markers");

        let _sync = attach(&map, &host);

        assert_eq!(map.layers(), vec!["markers", "osm"]);
    }

    #[test]
    fn test_update_twice_is_noop() {
        let host = Rc::new(ManualHost::new("#14/59.33/24.57/o"));
        let map = stockholm_map();
        let sync = HashSync::attach_with(
            Some(map.clone()),
            registry(),
            host.clone(),
            SyncOptions::detect(&*host),
            CountingHash::default(),
        );
        let notifications = map.notifications();
        let last = sync.last_hash();

        sync.update();
        sync.update();

        assert_eq!(sync.strategy().updates.get(), 3);
        assert_eq!(sync.strategy().parses.get(), 1);
        assert_eq!(map.notifications(), notifications);
        assert_eq!(sync.last_hash(), last);
    }

    #[test]
    fn test_no_writes_while_applying() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let _sync = attach(&map, &host);
        let before = map.notifications();

        host.navigate("#13/60.10/24.90/b-o");
        host.advance(millis(200));

        // Two layers added and one view change, all muted
        assert_eq!(map.notifications() - before, 3);
        assert!(host.replacements().is_empty());
    }

    #[test]
    fn test_hash_changes_coalesce() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let sync = HashSync::attach_with(
            Some(map.clone()),
            registry(),
            host.clone(),
            SyncOptions::detect(&*host),
            CountingHash::default(),
        );
        assert_eq!(sync.strategy().updates.get(), 1);

        for zoom in 11..16 {
            host.navigate(&format!("#{}/59.000/18.000/", zoom));
            host.advance(millis(20));
        }
        assert!(sync.has_pending_update());

        host.advance(millis(200));
        assert_eq!(sync.strategy().updates.get(), 2);
        assert_eq!(map.zoom(), 15);
        assert!(!sync.has_pending_update());
    }

    #[test]
    fn test_polling_channel_picks_up_changes() {
        let host = Rc::new(ManualHost::without_hash_change("#10/59.000/18.000/"));
        let map = stockholm_map();
        let options = SyncOptions::detect(&*host);
        assert_eq!(
            options.channel,
            ChangeChannel::Polling {
                interval: DEFAULT_POLL_INTERVAL
            }
        );

        let _sync = HashSync::attach(Some(map.clone()), registry(), host.clone(), options);
        assert_eq!(host.listener_count(), 0);

        host.navigate("#12/58.3800/26.7200/o");
        host.advance(millis(250));

        assert_eq!(map.zoom(), 12);
        assert_eq!(map.layers(), vec!["orto"]);
    }

    #[test]
    fn test_remove_cancels_timer_and_listeners() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let sync = attach(&map, &host);
        assert!(sync.is_listening());
        assert_eq!(map.listener_count(), 1);
        assert_eq!(host.listener_count(), 1);

        host.navigate("#16/59.000/18.000/");
        host.advance(millis(10));
        assert!(sync.has_pending_update());

        sync.remove();

        assert!(!sync.is_listening());
        assert!(sync.map().is_none());
        assert_eq!(map.listener_count(), 0);
        assert_eq!(host.listener_count(), 0);
        assert_eq!(host.pending_timers(), 0);

        host.advance(millis(500));
        map.set_view(LatLng::new(1.0, 1.0), 3);
        assert_eq!(map.zoom(), 3);
        assert!(host.replacements().is_empty());
    }

    #[test]
    fn test_remove_stops_polling() {
        let host = Rc::new(ManualHost::without_hash_change("#10/59.000/18.000/"));
        let map = stockholm_map();
        let sync = attach(&map, &host);
        assert_eq!(host.pending_timers(), 1);

        sync.remove();
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_inert_until_added() {
        let host = Rc::new(ManualHost::new("#14/59.33/24.57/o"));
        let map = stockholm_map();
        let sync: Rc<HashSync<Map, ManualHost>> =
            HashSync::attach(None, registry(), host.clone(), SyncOptions::detect(&*host));

        assert!(!sync.is_listening());
        assert_eq!(sync.format(), None);
        sync.update();
        sync.on_map_move();
        sync.on_hash_change();
        host.advance(millis(500));
        assert!(host.replacements().is_empty());

        sync.add_to(map.clone());
        assert!(sync.is_listening());
        assert_eq!(map.zoom(), 14);
        assert_eq!(sync.format().as_deref(), Some("#14/59.3300/24.5700/o"));
    }

    #[test]
    fn test_dropping_sync_detaches() {
        let host = Rc::new(ManualHost::new("#10/59.000/18.000/"));
        let map = stockholm_map();
        let sync = attach(&map, &host);

        drop(sync);

        assert_eq!(map.listener_count(), 0);
        assert_eq!(host.listener_count(), 0);
    }

    #[test]
    fn test_logging_wrapper_delegates() {
        let host = Rc::new(ManualHost::new("#14/59.33/24.57/zz-o"));
        let map = stockholm_map();
        let sync = HashSync::attach_with(
            Some(map.clone()),
            registry(),
            host.clone(),
            SyncOptions::detect(&*host),
            LoggingHash::new(CountingHash::default()),
        );

        assert_eq!(map.layers(), vec!["orto"]);
        assert_eq!(sync.strategy().inner().updates.get(), 1);
        // The default update parses through the outermost strategy
        assert_eq!(sync.strategy().inner().parses.get(), 1);

        map.add_layer(&"osm");
        assert_eq!(sync.strategy().inner().formats.get(), 1);
        assert_eq!(host.location_hash(), "#14/59.3300/24.5700/b-o");
    }
}
