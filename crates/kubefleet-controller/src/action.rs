//! Reconcile outcome, §9 "coroutine-style control flow".
//!
//! Grounded on `kube::runtime::controller::Action`'s two-variant shape
//! (`requeue(duration)` / `await_change()`), but kept local rather than
//! depending on a live `Controller` runtime, since the hub's watch/informer
//! plumbing is an external collaborator (§1).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-run this key after `Duration` even if nothing else changes.
    Requeue(Duration),
    /// Nothing further is needed until a watch event arrives.
    AwaitChange,
}

impl Action {
    pub fn requeue(after: Duration) -> Self {
        Action::Requeue(after)
    }

    pub fn await_change() -> Self {
        Action::AwaitChange
    }

    pub fn requeue_after(self) -> Option<Duration> {
        match self {
            Action::Requeue(d) => Some(d),
            Action::AwaitChange => None,
        }
    }
}
