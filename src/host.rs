//! The browser environment as seen by the hash sync: the location bar and
//! the timer primitives.

use std::rc::Rc;
use std::time::Duration;

use crate::map::ListenerId;

/// Handle for a scheduled timeout or interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub i32);

/// Location bar, hash-change notifications and timers.
pub trait Host {
    /// Current fragment including the leading `#`, or an empty string.
    fn location_hash(&self) -> String;

    /// Replaces the current history entry's fragment without pushing a new
    /// entry.
    fn replace_hash(&self, hash: &str);

    /// Whether the environment raises a native hash-change event.
    fn supports_hash_change(&self) -> bool;

    fn on_hash_change(&self, callback: Rc<dyn Fn()>) -> ListenerId;

    fn off_hash_change(&self, id: ListenerId);

    /// Schedules `callback` once after `delay`; `None` if the timer could
    /// not be created.
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> Option<TimerId>;

    /// Cancels a timeout and releases its callback. Clearing one that
    /// already fired is a no-op.
    fn clear_timeout(&self, id: TimerId);

    /// Runs `callback` every `period`; `None` if the timer could not be
    /// created.
    fn set_interval(&self, period: Duration, callback: Rc<dyn Fn()>) -> Option<TimerId>;

    fn clear_interval(&self, id: TimerId);
}
