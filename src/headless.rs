//! In-memory map and host with a virtual clock.
//!
//! These drive the hash sync without a browser: the native binary uses them
//! to normalize fragments, and the tests use them to step time precisely.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::hash::LatLng;
use crate::host::{Host, TimerId};
use crate::map::{ListenerId, MapView};

struct HeadlessState<L> {
    zoom: i32,
    center: LatLng,
    layers: Vec<L>,
    loaded: bool,
}

/// A map widget that only keeps state.
///
/// Like Leaflet, it raises view-settled notifications synchronously from
/// inside `set_view`, `add_layer` and `remove_layer`.
pub struct HeadlessMap<L> {
    state: RefCell<HeadlessState<L>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn()>)>>,
    next_listener: Cell<u32>,
    notifications: Cell<usize>,
}

impl<L: Clone + PartialEq> HeadlessMap<L> {
    /// Creates a map that has already completed its first render.
    pub fn new(center: LatLng, zoom: i32) -> Self {
        Self {
            state: RefCell::new(HeadlessState {
                zoom,
                center,
                layers: Vec::new(),
                loaded: true,
            }),
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
            notifications: Cell::new(0),
        }
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.state.borrow_mut().loaded = loaded;
    }

    /// Attached layers in attachment order.
    pub fn layers(&self) -> Vec<L> {
        self.state.borrow().layers.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Number of view-settled notifications raised so far.
    pub fn notifications(&self) -> usize {
        self.notifications.get()
    }

    /// Raises a view-settled notification without changing anything.
    pub fn notify(&self) {
        self.notifications.set(self.notifications.get() + 1);
        let listeners: Vec<Rc<dyn Fn()>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in listeners {
            callback();
        }
    }
}

impl<L: Clone + PartialEq> MapView for HeadlessMap<L> {
    type Layer = L;

    fn zoom(&self) -> i32 {
        self.state.borrow().zoom
    }

    fn center(&self) -> LatLng {
        self.state.borrow().center
    }

    fn has_layer(&self, layer: &L) -> bool {
        self.state.borrow().layers.contains(layer)
    }

    fn is_loaded(&self) -> bool {
        self.state.borrow().loaded
    }

    fn set_view(&self, center: LatLng, zoom: i32) {
        {
            let mut state = self.state.borrow_mut();
            state.center = center;
            state.zoom = zoom;
        }
        self.notify();
    }

    fn add_layer(&self, layer: &L) {
        {
            let mut state = self.state.borrow_mut();
            if state.layers.contains(layer) {
                return;
            }
            state.layers.push(layer.clone());
        }
        self.notify();
    }

    fn remove_layer(&self, layer: &L) {
        {
            let mut state = self.state.borrow_mut();
            let before = state.layers.len();
            state.layers.retain(|l| l != layer);
            if state.layers.len() == before {
                return;
            }
        }
        self.notify();
    }

    fn on_view_settled(&self, callback: Rc<dyn Fn()>) -> ListenerId {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().push((id, callback));
        id
    }

    fn off_view_settled(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(l, _)| *l != id);
    }
}

enum TimerKind {
    Once(Box<dyn FnOnce()>),
    Every(Duration, Rc<dyn Fn()>),
}

struct Timer {
    id: TimerId,
    due: Duration,
    kind: TimerKind,
}

/// A browser environment whose clock only moves when told to.
///
/// Hash-change events are queued as zero-delay timeouts, so they are
/// delivered asynchronously as in a browser.
pub struct ManualHost {
    hash: RefCell<String>,
    hash_change: bool,
    replacements: RefCell<Vec<String>>,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn()>)>>,
    timers: RefCell<Vec<Timer>>,
    now: Cell<Duration>,
    next_id: Cell<i32>,
    timers_available: Cell<bool>,
}

impl ManualHost {
    /// A host that raises native hash-change events.
    pub fn new(hash: &str) -> Self {
        Self::build(hash, true)
    }

    /// A host without hash-change events, forcing the polling fallback.
    pub fn without_hash_change(hash: &str) -> Self {
        Self::build(hash, false)
    }

    fn build(hash: &str, hash_change: bool) -> Self {
        Self {
            hash: RefCell::new(hash.to_string()),
            hash_change,
            replacements: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            timers: RefCell::new(Vec::new()),
            now: Cell::new(Duration::ZERO),
            next_id: Cell::new(1),
            timers_available: Cell::new(true),
        }
    }

    /// When `false`, new timeouts and intervals fail to be created.
    /// Hash-change delivery is unaffected.
    pub fn set_timers_available(&self, available: bool) {
        self.timers_available.set(available);
    }

    /// Every fragment written through [`Host::replace_hash`], in order.
    pub fn replacements(&self) -> Vec<String> {
        self.replacements.borrow().clone()
    }

    pub fn now(&self) -> Duration {
        self.now.get()
    }

    /// Outstanding timeouts and intervals.
    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Changes the fragment the way a user edit or back/forward would.
    pub fn navigate(&self, hash: &str) {
        self.set_hash(hash);
    }

    /// Runs every timer due within `by`, in due order.
    pub fn advance(&self, by: Duration) {
        let target = self.now.get() + by;
        while let Some(timer) = self.take_due(target) {
            self.now.set(timer.due);
            match timer.kind {
                TimerKind::Once(callback) => callback(),
                TimerKind::Every(period, callback) => {
                    self.timers.borrow_mut().push(Timer {
                        id: timer.id,
                        due: timer.due + period,
                        kind: TimerKind::Every(period, callback.clone()),
                    });
                    callback();
                }
            }
        }
        self.now.set(target);
    }

    fn take_due(&self, target: Duration) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, timer)| timer.due <= target)
            .min_by_key(|(_, timer)| (timer.due, timer.id.0))
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }

    fn push_timer(&self, due: Duration, kind: TimerKind) -> TimerId {
        let id = self.next_timer_id();
        self.timers.borrow_mut().push(Timer { id, due, kind });
        id
    }

    fn next_timer_id(&self) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        id
    }

    fn set_hash(&self, hash: &str) {
        let changed = {
            let mut current = self.hash.borrow_mut();
            let changed = *current != hash;
            *current = hash.to_string();
            changed
        };
        if !changed || !self.hash_change {
            return;
        }

        let listeners: Vec<Rc<dyn Fn()>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        let now = self.now.get();
        for callback in listeners {
            self.push_timer(now, TimerKind::Once(Box::new(move || callback())));
        }
    }
}

impl Host for ManualHost {
    fn location_hash(&self) -> String {
        self.hash.borrow().clone()
    }

    fn replace_hash(&self, hash: &str) {
        self.replacements.borrow_mut().push(hash.to_string());
        self.set_hash(hash);
    }

    fn supports_hash_change(&self) -> bool {
        self.hash_change
    }

    fn on_hash_change(&self, callback: Rc<dyn Fn()>) -> ListenerId {
        let id = ListenerId(self.next_timer_id().0 as u32);
        self.listeners.borrow_mut().push((id, callback));
        id
    }

    fn off_hash_change(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(l, _)| *l != id);
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        if !self.timers_available.get() {
            return None;
        }
        Some(self.push_timer(self.now.get() + delay, TimerKind::Once(callback)))
    }

    fn clear_timeout(&self, id: TimerId) {
        self.timers.borrow_mut().retain(|timer| timer.id != id);
    }

    fn set_interval(&self, period: Duration, callback: Rc<dyn Fn()>) -> Option<TimerId> {
        if !self.timers_available.get() {
            return None;
        }
        Some(self.push_timer(self.now.get() + period, TimerKind::Every(period, callback)))
    }

    fn clear_interval(&self, id: TimerId) {
        self.clear_timeout(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_map_notifies_on_change() {
        let map = HeadlessMap::new(LatLng::new(59.0, 24.0), 10);
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        let id = map.on_view_settled(Rc::new(move || counter.set(counter.get() + 1)));

        map.add_layer(&"osm");
        map.add_layer(&"osm");
        map.set_view(LatLng::new(58.0, 25.0), 12);
        map.remove_layer(&"missing");
        map.remove_layer(&"osm");

        assert_eq!(seen.get(), 3);
        assert_eq!(map.zoom(), 12);
        assert!(map.layers().is_empty());

        map.off_view_settled(id);
        map.notify();
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn test_manual_host_runs_timers_in_due_order() {
        let host = ManualHost::new("");
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        host.set_timeout(Duration::from_millis(200), Box::new(move || l.borrow_mut().push("late")));
        let l = log.clone();
        host.set_timeout(Duration::from_millis(50), Box::new(move || l.borrow_mut().push("early")));
        let l = log.clone();
        let cancelled = host
            .set_timeout(
                Duration::from_millis(100),
                Box::new(move || l.borrow_mut().push("cancelled")),
            )
            .unwrap();
        host.clear_timeout(cancelled);

        host.advance(Duration::from_millis(150));
        assert_eq!(*log.borrow(), vec!["early"]);

        host.advance(Duration::from_millis(50));
        assert_eq!(*log.borrow(), vec!["early", "late"]);
        assert_eq!(host.now(), Duration::from_millis(200));
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_manual_host_interval_repeats() {
        let host = ManualHost::without_hash_change("");
        let ticks = Rc::new(Cell::new(0));
        let t = ticks.clone();
        let id = host
            .set_interval(Duration::from_millis(50), Rc::new(move || t.set(t.get() + 1)))
            .unwrap();

        host.advance(Duration::from_millis(220));
        assert_eq!(ticks.get(), 4);

        host.clear_interval(id);
        host.advance(Duration::from_millis(200));
        assert_eq!(ticks.get(), 4);
    }

    #[test]
    fn test_clear_timeout_releases_callback() {
        let host = ManualHost::new("");
        let captured = Rc::new(());
        let c = captured.clone();
        let id = host
            .set_timeout(Duration::from_millis(100), Box::new(move || drop(c)))
            .unwrap();
        assert_eq!(Rc::strong_count(&captured), 2);

        host.clear_timeout(id);
        assert_eq!(Rc::strong_count(&captured), 1);
    }

    #[test]
    fn test_unavailable_timers_are_refused() {
        let host = ManualHost::new("#1/0/0/");
        host.set_timers_available(false);
        assert_eq!(host.set_timeout(Duration::ZERO, Box::new(|| {})), None);
        assert_eq!(host.set_interval(Duration::from_millis(50), Rc::new(|| {})), None);

        // Hash-change events still arrive
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        host.on_hash_change(Rc::new(move || s.set(s.get() + 1)));
        host.navigate("#2/0/0/");
        host.advance(Duration::ZERO);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_hash_change_is_delivered_asynchronously() {
        let host = ManualHost::new("#1/0/0/");
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        host.on_hash_change(Rc::new(move || s.set(s.get() + 1)));

        host.navigate("#2/0/0/");
        assert_eq!(seen.get(), 0);
        host.advance(Duration::ZERO);
        assert_eq!(seen.get(), 1);

        // Same fragment again is not a change
        host.navigate("#2/0/0/");
        host.advance(Duration::ZERO);
        assert_eq!(seen.get(), 1);
    }
}
