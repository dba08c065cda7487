//! The map widget as seen by the hash sync.
//!
//! Rendering, tiling and projections all live in the widget. The sync only
//! needs to read the view, move it, toggle layers and hear about changes.

use std::rc::Rc;

use crate::hash::LatLng;

/// Handle for a registered notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u32);

/// Interface of an interactive map widget.
///
/// Methods take `&self` because widget handles are shared references into
/// the host (a Leaflet map object in the browser). Implementations may call
/// view-settled callbacks synchronously from inside `set_view`, `add_layer`
/// and `remove_layer`.
///
/// Note: no `Send` bounds, the map lives on the single browser thread.
pub trait MapView {
    /// Opaque handle for a layer the widget knows how to attach.
    type Layer: Clone + PartialEq;

    fn zoom(&self) -> i32;

    fn center(&self) -> LatLng;

    fn has_layer(&self, layer: &Self::Layer) -> bool;

    /// Whether the first render has completed.
    fn is_loaded(&self) -> bool;

    fn set_view(&self, center: LatLng, zoom: i32);

    fn add_layer(&self, layer: &Self::Layer);

    fn remove_layer(&self, layer: &Self::Layer);

    /// Subscribes to "moved, or layer added, or layer removed".
    fn on_view_settled(&self, callback: Rc<dyn Fn()>) -> ListenerId;

    fn off_view_settled(&self, id: ListenerId);
}
