//! Single-slot holder for a deferred call.

use crate::host::TimerId;

/// Tracks the one outstanding deferred call, if any.
///
/// Scheduling while a call is pending is a no-op, so a burst of
/// notifications collapses into a single deferred run.
#[derive(Debug, Default)]
pub struct Debounce {
    pending: Option<TimerId>,
}

impl Debounce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Runs `schedule` and records its timer unless a call is already pending.
    ///
    /// Returns whether a new call was scheduled.
    pub fn schedule(&mut self, schedule: impl FnOnce() -> TimerId) -> bool {
        if self.pending.is_some() {
            return false;
        }
        self.pending = Some(schedule());
        true
    }

    /// Marks the pending call as fired. Must be called before running it.
    pub fn fire(&mut self) -> Option<TimerId> {
        self.pending.take()
    }

    /// Takes the pending timer so the caller can cancel it.
    pub fn cancel(&mut self) -> Option<TimerId> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_single_slot() {
        let mut debounce = Debounce::new();
        let mut scheduled = 0;

        assert!(debounce.schedule(|| {
            scheduled += 1;
            TimerId(1)
        }));
        assert!(!debounce.schedule(|| {
            scheduled += 1;
            TimerId(2)
        }));

        assert_eq!(scheduled, 1);
        assert!(debounce.is_pending());
    }

    #[test]
    fn test_fire_frees_the_slot() {
        let mut debounce = Debounce::new();
        debounce.schedule(|| TimerId(7));

        assert_eq!(debounce.fire(), Some(TimerId(7)));
        assert!(!debounce.is_pending());
        assert!(debounce.schedule(|| TimerId(8)));
        assert_eq!(debounce.cancel(), Some(TimerId(8)));
        assert_eq!(debounce.cancel(), None);
    }
}
