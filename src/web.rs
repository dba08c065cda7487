//! Browser side: the location bar through web-sys and the Leaflet map
//! through wasm-bindgen, plus the page entry point.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use js_sys::{Array, Function, Object, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::config::{LayerConfig, LayerKind, LayerSource, MapConfig};
use crate::hash::{DefaultHash, HashSync, LatLng, LayerRegistry, LoggingHash};
use crate::host::{Host, TimerId};
use crate::map::{ListenerId, MapView};

#[wasm_bindgen]
extern "C" {
    /// A Leaflet `L.Map` instance.
    #[derive(Debug, Clone)]
    pub type Map;

    #[wasm_bindgen(js_namespace = L, js_name = map)]
    fn leaflet_map(container: &str, options: &JsValue) -> Map;

    #[wasm_bindgen(method, js_name = getZoom)]
    fn get_zoom(this: &Map) -> f64;

    #[wasm_bindgen(method, js_name = getCenter)]
    fn get_center(this: &Map) -> LatLngLiteral;

    #[wasm_bindgen(method, js_name = hasLayer)]
    fn contains_layer(this: &Map, layer: &Layer) -> bool;

    #[wasm_bindgen(method, js_name = setView)]
    fn move_to(this: &Map, center: &Array, zoom: f64);

    #[wasm_bindgen(method, js_name = addLayer)]
    fn attach_layer(this: &Map, layer: &Layer);

    #[wasm_bindgen(method, js_name = removeLayer)]
    fn detach_layer(this: &Map, layer: &Layer);

    #[wasm_bindgen(method)]
    fn on(this: &Map, types: &str, callback: &Function);

    #[wasm_bindgen(method)]
    fn off(this: &Map, types: &str, callback: &Function);

    type LatLngLiteral;

    #[wasm_bindgen(method, getter)]
    fn lat(this: &LatLngLiteral) -> f64;

    #[wasm_bindgen(method, getter)]
    fn lng(this: &LatLngLiteral) -> f64;

    /// A Leaflet layer (`L.TileLayer`, `L.TileLayer.WMS`).
    #[derive(Debug, Clone, PartialEq)]
    pub type Layer;

    #[wasm_bindgen(js_namespace = L, js_name = tileLayer)]
    fn tile_layer(url: &str, options: &JsValue) -> Layer;

    #[wasm_bindgen(js_namespace = ["L", "tileLayer"], js_name = wms)]
    fn wms_layer(url: &str, options: &JsValue) -> Layer;

    type Control;

    #[wasm_bindgen(js_namespace = ["L", "control"], js_name = layers)]
    fn layers_control(base_layers: &Object, overlays: &Object) -> Control;

    #[wasm_bindgen(method, js_name = addTo)]
    fn add_to(this: &Control, map: &Map);
}

/// Leaflet fires these after animations finish and on layer toggles.
const VIEW_SETTLED_EVENTS: &str = "moveend layeradd layerremove";

/// [`MapView`] over a Leaflet map.
pub struct LeafletMap {
    map: Map,
    listeners: RefCell<HashMap<ListenerId, Closure<dyn Fn()>>>,
    next_listener: Cell<u32>,
}

impl LeafletMap {
    pub fn new(map: Map) -> Self {
        Self {
            map,
            listeners: RefCell::new(HashMap::new()),
            next_listener: Cell::new(0),
        }
    }

    pub fn inner(&self) -> &Map {
        &self.map
    }
}

impl MapView for LeafletMap {
    type Layer = Layer;

    fn zoom(&self) -> i32 {
        self.map.get_zoom().round() as i32
    }

    fn center(&self) -> LatLng {
        let center = self.map.get_center();
        LatLng::new(center.lat(), center.lng())
    }

    fn has_layer(&self, layer: &Layer) -> bool {
        self.map.contains_layer(layer)
    }

    fn is_loaded(&self) -> bool {
        Reflect::get(self.map.as_ref(), &JsValue::from_str("_loaded"))
            .ok()
            .and_then(|loaded| loaded.as_bool())
            .unwrap_or(false)
    }

    fn set_view(&self, center: LatLng, zoom: i32) {
        let center = Array::of2(&JsValue::from_f64(center.lat), &JsValue::from_f64(center.lng));
        self.map.move_to(&center, f64::from(zoom));
    }

    fn add_layer(&self, layer: &Layer) {
        self.map.attach_layer(layer);
    }

    fn remove_layer(&self, layer: &Layer) {
        self.map.detach_layer(layer);
    }

    fn on_view_settled(&self, callback: Rc<dyn Fn()>) -> ListenerId {
        let closure = Closure::<dyn Fn()>::new(move || callback());
        self.map
            .on(VIEW_SETTLED_EVENTS, closure.as_ref().unchecked_ref());

        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().insert(id, closure);
        id
    }

    fn off_view_settled(&self, id: ListenerId) {
        let Some(closure) = self.listeners.borrow_mut().remove(&id) else {
            return;
        };
        self.map
            .off(VIEW_SETTLED_EVENTS, closure.as_ref().unchecked_ref());
    }
}

/// [`Host`] over the browser window.
pub struct BrowserHost {
    window: web_sys::Window,
    listeners: RefCell<HashMap<ListenerId, Closure<dyn Fn()>>>,
    timeouts: RefCell<HashMap<TimerId, Closure<dyn FnMut()>>>,
    /// Timeouts that have run; their closures are dropped on the next
    /// timer call, outside their own invocation.
    fired: Rc<RefCell<Vec<TimerId>>>,
    intervals: RefCell<HashMap<TimerId, Closure<dyn Fn()>>>,
    next_listener: Cell<u32>,
}

impl BrowserHost {
    /// Returns `None` outside a window context (e.g. in a worker).
    pub fn new() -> Option<Self> {
        Some(Self {
            window: web_sys::window()?,
            listeners: RefCell::new(HashMap::new()),
            timeouts: RefCell::new(HashMap::new()),
            fired: Rc::new(RefCell::new(Vec::new())),
            intervals: RefCell::new(HashMap::new()),
            next_listener: Cell::new(0),
        })
    }

    fn release_fired(&self) {
        let fired: Vec<TimerId> = self.fired.borrow_mut().drain(..).collect();
        let mut timeouts = self.timeouts.borrow_mut();
        for id in fired {
            timeouts.remove(&id);
        }
    }
}

impl Host for BrowserHost {
    fn location_hash(&self) -> String {
        self.window.location().hash().unwrap_or_default()
    }

    fn replace_hash(&self, hash: &str) {
        if let Err(e) = self.window.location().replace(hash) {
            log::warn!("Failed to replace location hash: {:?}", e);
        }
    }

    fn supports_hash_change(&self) -> bool {
        Reflect::has(self.window.as_ref(), &JsValue::from_str("onhashchange")).unwrap_or(false)
    }

    fn on_hash_change(&self, callback: Rc<dyn Fn()>) -> ListenerId {
        let closure = Closure::<dyn Fn()>::new(move || callback());
        if let Err(e) = self
            .window
            .add_event_listener_with_callback("hashchange", closure.as_ref().unchecked_ref())
        {
            log::warn!("Failed to listen for hashchange: {:?}", e);
        }

        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        self.listeners.borrow_mut().insert(id, closure);
        id
    }

    fn off_hash_change(&self, id: ListenerId) {
        let Some(closure) = self.listeners.borrow_mut().remove(&id) else {
            return;
        };
        let _ = self
            .window
            .remove_event_listener_with_callback("hashchange", closure.as_ref().unchecked_ref());
    }

    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId> {
        self.release_fired();

        // The handle is only known once scheduled
        let handle = Rc::new(Cell::new(None));
        let fired = self.fired.clone();
        let own_handle = handle.clone();
        let closure = Closure::once(move || {
            callback();
            if let Some(id) = own_handle.get() {
                fired.borrow_mut().push(id);
            }
        });

        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                delay.as_millis() as i32,
            ) {
            Ok(raw) => {
                let id = TimerId(raw);
                handle.set(Some(id));
                self.timeouts.borrow_mut().insert(id, closure);
                Some(id)
            }
            Err(e) => {
                log::warn!("Failed to set timeout: {:?}", e);
                None
            }
        }
    }

    fn clear_timeout(&self, id: TimerId) {
        self.window.clear_timeout_with_handle(id.0);
        self.timeouts.borrow_mut().remove(&id);
        self.release_fired();
    }

    fn set_interval(&self, period: Duration, callback: Rc<dyn Fn()>) -> Option<TimerId> {
        let closure = Closure::<dyn Fn()>::new(move || callback());
        match self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                closure.as_ref().unchecked_ref(),
                period.as_millis() as i32,
            ) {
            Ok(handle) => {
                let id = TimerId(handle);
                self.intervals.borrow_mut().insert(id, closure);
                Some(id)
            }
            Err(e) => {
                log::warn!("Failed to set interval: {:?}", e);
                None
            }
        }
    }

    fn clear_interval(&self, id: TimerId) {
        self.window.clear_interval_with_handle(id.0);
        self.intervals.borrow_mut().remove(&id);
    }
}

#[derive(Serialize)]
struct MapOptions {
    center: [f64; 2],
    zoom: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LayerOptions<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    attribution: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_zoom: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    layers: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transparent: Option<bool>,
}

/// Creates the Leaflet layer described by `config`.
fn create_layer(config: &LayerConfig) -> Result<Layer, JsValue> {
    let mut options = LayerOptions {
        attribution: config.attribution.as_deref(),
        min_zoom: config.min_zoom,
        opacity: config.opacity,
        layers: None,
        format: None,
        transparent: None,
    };

    match &config.source {
        LayerSource::Tile { url } => {
            let options = serde_wasm_bindgen::to_value(&options)?;
            Ok(tile_layer(url, &options))
        }
        LayerSource::Wms {
            url,
            layers,
            format,
            transparent,
            crs,
        } => {
            options.layers = Some(layers);
            options.format = Some(format);
            options.transparent = Some(*transparent);
            let options = serde_wasm_bindgen::to_value(&options)?;
            if let Some(code) = crs {
                Reflect::set(&options, &JsValue::from_str("crs"), &leaflet_crs(code)?)?;
            }
            Ok(wms_layer(url, &options))
        }
    }
}

/// Looks up `L.CRS[code]`.
fn leaflet_crs(code: &str) -> Result<JsValue, JsValue> {
    let leaflet = Reflect::get(&js_sys::global(), &JsValue::from_str("L"))?;
    let crs = Reflect::get(&leaflet, &JsValue::from_str("CRS"))?;
    let value = Reflect::get(&crs, &JsValue::from_str(code))?;
    if value.is_undefined() {
        return Err(JsValue::from_str(&format!("Unknown CRS: {}", code)));
    }
    Ok(value)
}

type PageSync = HashSync<LeafletMap, BrowserHost, LoggingHash<DefaultHash>>;

thread_local! {
    static PAGE_SYNC: RefCell<Option<Rc<PageSync>>> = const { RefCell::new(None) };
}

/// Builds the map described by `config` and links it to the URL fragment.
pub fn mount(config: &MapConfig) -> Result<Rc<PageSync>, JsValue> {
    let host = Rc::new(BrowserHost::new().ok_or_else(|| JsValue::from_str("No window"))?);

    let options = serde_wasm_bindgen::to_value(&MapOptions {
        center: [config.center.lat, config.center.lng],
        zoom: config.zoom,
    })?;
    let map = Rc::new(LeafletMap::new(leaflet_map(&config.container, &options)));

    let base_layers = Object::new();
    let overlays = Object::new();
    let mut entries = Vec::with_capacity(config.layers.len());
    for layer_config in &config.layers {
        let layer = create_layer(layer_config)?;
        let group = match layer_config.kind {
            LayerKind::Base => &base_layers,
            LayerKind::Overlay => &overlays,
        };
        Reflect::set(group, &JsValue::from_str(&layer_config.name), layer.as_ref())?;
        entries.push((layer_config.key.clone(), layer));
    }
    layers_control(&base_layers, &overlays).add_to(map.inner());

    let registry =
        LayerRegistry::new(entries).map_err(|e| JsValue::from_str(&e.to_string()))?;
    for key in &config.default_layers {
        if let Some(layer) = registry.get(key) {
            map.add_layer(layer);
        }
    }

    let sync = HashSync::attach_with(
        Some(map),
        registry,
        host.clone(),
        config.sync.options(&*host),
        LoggingHash::new(DefaultHash),
    );
    Ok(sync)
}

/// Entry point for the WASM application.
#[wasm_bindgen(start)]
pub fn start() -> Result<(), JsValue> {
    console_error_panic_hook::set_once();
    // Redirect `log` messages to the console
    wasm_logger::init(wasm_logger::Config::new(log::Level::Debug));

    let config = MapConfig::load();
    let sync = mount(&config)?;
    PAGE_SYNC.with(|slot| *slot.borrow_mut() = Some(sync));
    Ok(())
}

/// Stops syncing the page's map with the URL fragment.
#[wasm_bindgen(js_name = removeHash)]
pub fn remove_hash() {
    PAGE_SYNC.with(|slot| {
        if let Some(sync) = slot.borrow_mut().take() {
            sync.remove();
        }
    });
}
