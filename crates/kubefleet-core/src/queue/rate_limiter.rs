//! Rate limiters paired with the work queue, §4.1.
//!
//! Two shapes are needed:
//!
//! - A general-purpose limiter: exponential backoff seeded at 5 ms, capped
//!   at 60 s, combined with an overall ~1000 QPS cap per controller. This
//!   is [`ExponentialBackoffRateLimiter`].
//! - A specialised limiter for the work generator / applier: fast delays
//!   for the first few attempts, then the same exponential schedule,
//!   resetting whenever the observed generation or a hash of the last
//!   processing result changes. This is [`ItemFastSlowRateLimiter`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Computes the delay to apply before an item is retried, and forgets an
/// item once it succeeds.
pub trait RateLimiter<K>: Send + Sync {
    /// Record an attempt against `key` and return how long to wait before
    /// retrying it.
    fn when(&self, key: &K) -> Duration;

    /// Clear retry history for `key`, e.g. after a successful reconcile.
    fn forget(&self, key: &K);
}

const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// ~1000 QPS per controller (§4.1).
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_micros(1_000_000 / 1000);

/// Per-key exponential backoff (`base * 2^failures`, capped), combined
/// with a process-wide minimum interval between any two delays handed out
/// (the "overall cap of ~1000 QPS" in §4.1). The effective delay is the
/// larger of the two, matching client-go's `MaxOfRateLimiter` combinator
/// that this is grounded on.
pub struct ExponentialBackoffRateLimiter<K: Eq + Hash + Clone> {
    base_delay: Duration,
    max_delay: Duration,
    min_interval: Duration,
    failures: Mutex<HashMap<K, u32>>,
    last_issued: Mutex<Option<Instant>>,
}

impl<K: Eq + Hash + Clone> ExponentialBackoffRateLimiter<K> {
    pub fn new() -> Self {
        Self::with_parameters(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MIN_INTERVAL)
    }

    pub fn with_parameters(
        base_delay: Duration,
        max_delay: Duration,
        min_interval: Duration,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            min_interval,
            failures: Mutex::new(HashMap::new()),
            last_issued: Mutex::new(None),
        }
    }

    fn exponential_delay(&self, failures: u32) -> Duration {
        // `2^failures` saturates quickly; clamp the exponent so the shift
        // never overflows before the cap kicks in.
        let exponent = failures.min(32);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        self.base_delay
            .checked_mul(multiplier as u32)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn qps_delay(&self) -> Duration {
        let mut last = self.last_issued.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        let delay = match *last {
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous);
                self.min_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };
        *last = Some(now.max(last.unwrap_or(now)) + delay);
        delay
    }
}

impl<K: Eq + Hash + Clone> Default for ExponentialBackoffRateLimiter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + Send + Sync> RateLimiter<K> for ExponentialBackoffRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let failures = {
            let mut failures = self.failures.lock().expect("rate limiter mutex poisoned");
            let count = failures.entry(key.clone()).or_insert(0);
            let current = *count;
            *count = count.saturating_add(1);
            current
        };
        self.exponential_delay(failures).max(self.qps_delay())
    }

    fn forget(&self, key: &K) {
        self.failures.lock().expect("rate limiter mutex poisoned").remove(key);
    }
}

/// Fingerprint used by [`ItemFastSlowRateLimiter`] to decide whether an
/// item's situation changed enough to reset its backoff: the observed
/// generation plus a hash of the last processing result (§4.4 "resets
/// when either the observed generation or a hash of the last processing
/// result changes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingFingerprint {
    pub observed_generation: i64,
    pub result_hash: u64,
}

struct FastSlowState {
    attempts: u32,
    fingerprint: Option<ProcessingFingerprint>,
}

/// Returns fast, fixed delays for the first `fast_attempts` retries of an
/// item, then falls back to the same exponential schedule as
/// [`ExponentialBackoffRateLimiter`]. Used by the work generator / applier
/// loop (§4.1 second paragraph) so that a freshly-changed binding gets
/// re-checked quickly a few times (catching fast appliers) before
/// settling into slow polling.
pub struct ItemFastSlowRateLimiter<K: Eq + Hash + Clone> {
    fast_delay: Duration,
    fast_attempts: u32,
    slow: ExponentialBackoffRateLimiter<K>,
    state: Mutex<HashMap<K, FastSlowState>>,
}

impl<K: Eq + Hash + Clone> ItemFastSlowRateLimiter<K> {
    pub fn new(fast_delay: Duration, fast_attempts: u32) -> Self {
        Self {
            fast_delay,
            fast_attempts,
            slow: ExponentialBackoffRateLimiter::new(),
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Record the fingerprint observed for `key` this round. If it differs
    /// from the last one recorded, the item's backoff state resets to
    /// "fast" before `when` is called.
    pub fn observe(&self, key: &K, fingerprint: ProcessingFingerprint) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let entry = state.entry(key.clone()).or_insert(FastSlowState {
            attempts: 0,
            fingerprint: None,
        });
        if entry.fingerprint != Some(fingerprint) {
            entry.attempts = 0;
            entry.fingerprint = Some(fingerprint);
            drop(state);
            self.slow.forget(key);
        }
    }
}

impl<K: Eq + Hash + Clone + Send + Sync> RateLimiter<K> for ItemFastSlowRateLimiter<K> {
    fn when(&self, key: &K) -> Duration {
        let is_fast = {
            let mut state = self.state.lock().expect("rate limiter mutex poisoned");
            let entry = state.entry(key.clone()).or_insert(FastSlowState {
                attempts: 0,
                fingerprint: None,
            });
            let was_fast = entry.attempts < self.fast_attempts;
            entry.attempts = entry.attempts.saturating_add(1);
            was_fast
        };
        if is_fast {
            self.fast_delay
        } else {
            self.slow.when(key)
        }
    }

    fn forget(&self, key: &K) {
        self.state.lock().expect("rate limiter mutex poisoned").remove(key);
        self.slow.forget(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_then_caps() {
        let limiter = ExponentialBackoffRateLimiter::<String>::with_parameters(
            Duration::from_millis(5),
            Duration::from_secs(60),
            Duration::ZERO,
        );
        let key = "a".to_string();
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(20));
        limiter.forget(&key);
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
    }

    #[test]
    fn exponential_backoff_caps_at_max_delay() {
        let limiter = ExponentialBackoffRateLimiter::<String>::with_parameters(
            Duration::from_millis(5),
            Duration::from_millis(12),
            Duration::ZERO,
        );
        let key = "a".to_string();
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        assert_eq!(limiter.when(&key), Duration::from_millis(10));
        assert_eq!(limiter.when(&key), Duration::from_millis(12));
        assert_eq!(limiter.when(&key), Duration::from_millis(12));
    }

    #[test]
    fn fast_slow_limiter_resets_on_fingerprint_change() {
        let limiter = ItemFastSlowRateLimiter::<String>::new(Duration::from_millis(1), 2);
        let key = "a".to_string();
        let fp1 = ProcessingFingerprint {
            observed_generation: 1,
            result_hash: 0,
        };
        limiter.observe(&key, fp1);
        assert_eq!(limiter.when(&key), Duration::from_millis(1));
        assert_eq!(limiter.when(&key), Duration::from_millis(1));
        // Third call falls through to the slow exponential schedule.
        assert_eq!(limiter.when(&key), Duration::from_millis(5));

        let fp2 = ProcessingFingerprint {
            observed_generation: 2,
            result_hash: 0,
        };
        limiter.observe(&key, fp2);
        assert_eq!(limiter.when(&key), Duration::from_millis(1));
    }
}
