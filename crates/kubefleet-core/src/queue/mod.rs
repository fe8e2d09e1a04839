//! The work queue and rate limiters, §4.1.
//!
//! A per-controller, de-duplicating, FIFO queue keyed by [`PlacementKey`]
//! (or, for the scheduler pool, the same key — §4.4 "All scheduling on a
//! single placement key is serialised through the queue's
//! de-duplication."). Items can be enqueued immediately or after an
//! explicit delay; a [`RateLimiter`] decides the delay for rate-limited
//! retries.
//!
//! The dirty/processing/queue split below is the same algorithm
//! client-go's workqueue uses: re-adding a key that is currently being
//! processed does not duplicate it in the queue, but does guarantee it is
//! re-processed once the in-flight reconcile calls [`WorkQueue::done`] —
//! this is what makes "level-triggered" (§1 Non-goals) hold even when a
//! change arrives mid-reconcile.

pub mod rate_limiter;

pub use rate_limiter::{ExponentialBackoffRateLimiter, ItemFastSlowRateLimiter, RateLimiter};

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub struct WorkQueue<K: Eq + Hash + Clone + Send + 'static> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
    cancellation: CancellationToken,
}

struct Inner<K: Eq + Hash + Clone> {
    queue: VecDeque<K>,
    /// Keys that must be (re-)processed: either sitting in `queue` now, or
    /// marked to be requeued once the in-flight run of them finishes.
    dirty: HashSet<K>,
    /// Keys currently checked out via `get` and not yet `done`.
    processing: HashSet<K>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> WorkQueue<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
            }),
            notify: Notify::new(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Enqueue a key for immediate processing. A no-op if the key is
    /// already queued; if the key is currently being processed, it is
    /// marked dirty and will be requeued on `done`.
    pub async fn add(&self, key: K) {
        let mut inner = self.inner.lock().await;
        if !inner.dirty.insert(key.clone()) {
            return;
        }
        if inner.processing.contains(&key) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Enqueue a key after `delay`. Used by rate-limited retries and timed
    /// re-runs (§4.1, §4.3 step 7 "Schedule the next tick"). Each delayed
    /// add spawns its own sleep future; adequate at the placement counts
    /// this system targets (§6 `maxFleetSizeSupported`), rather than
    /// requiring a timer wheel.
    pub async fn add_after(self: &std::sync::Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key).await;
            return;
        }
        let this = std::sync::Arc::clone(self);
        let cancelled = self.cancellation.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    this.add(key).await;
                }
                () = cancelled.cancelled() => {}
            }
        });
    }

    /// Dequeue the next ready key, waiting for one to arrive. Returns
    /// `None` once the queue has been cancelled (process shutdown / lost
    /// leader lease, §5 "Suspension points").
    pub async fn get(&self) -> Option<K> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                () = self.notify.notified() => {}
                () = self.cancellation.cancelled() => return None,
            }
        }
    }

    /// Mark a key's processing as finished. Must be called exactly once
    /// per `get()` result. If the key was marked dirty again while it was
    /// processing, it is requeued now.
    pub async fn done(&self, key: &K) {
        let mut inner = self.inner.lock().await;
        inner.processing.remove(key);
        if inner.dirty.contains(key) {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    pub fn shutdown(&self) {
        self.cancellation.cancel();
    }
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_add_is_collapsed() {
        let queue = Arc::new(WorkQueue::<String>::new());
        queue.add("a".to_string()).await;
        queue.add("a".to_string()).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = Arc::new(WorkQueue::<String>::new());
        queue.add("a".to_string()).await;
        queue.add("b".to_string()).await;
        assert_eq!(queue.get().await, Some("a".to_string()));
        assert_eq!(queue.get().await, Some("b".to_string()));
    }

    #[tokio::test]
    async fn readding_while_in_flight_requeues_on_done() {
        let queue = Arc::new(WorkQueue::<String>::new());
        queue.add("a".to_string()).await;
        let got = queue.get().await.unwrap();
        assert_eq!(queue.len().await, 0);

        // Re-added while still in flight: must not duplicate the queue...
        queue.add("a".to_string()).await;
        assert_eq!(queue.len().await, 0);

        // ...but must come back exactly once after `done`.
        queue.done(&got).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("a".to_string()));
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn add_after_delivers_once_delay_elapses() {
        let queue = Arc::new(WorkQueue::<String>::new());
        queue.add_after("a".to_string(), Duration::from_millis(10)).await;
        assert_eq!(queue.len().await, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.len().await, 1);
    }
}
