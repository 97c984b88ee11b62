//! Single-value TTL cache slots owned by the telemetry client.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::MutexGuard;

/// A cached value and the instant it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// One cache key: the stored entry plus a single-flight guard.
///
/// Callers that miss take the flight guard before going to the network, so
/// concurrent misses for the same key queue behind one request and can
/// reuse whatever it produced via [`CacheSlot::settled_since`], including a
/// degraded value when every transport failed.
pub struct CacheSlot<T> {
    entry: Mutex<Option<CacheEntry<T>>>,
    /// Result of the most recently finished flight, good or degraded.
    settled: Mutex<Option<CacheEntry<T>>>,
    flight: tokio::sync::Mutex<()>,
}

impl<T: Clone> CacheSlot<T> {
    pub fn new() -> Self {
        Self {
            entry: Mutex::new(None),
            settled: Mutex::new(None),
            flight: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CacheEntry<T>>> {
        self.entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_settled(&self) -> std::sync::MutexGuard<'_, Option<CacheEntry<T>>> {
        self.settled.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The cached value if it is younger than `ttl`.
    pub fn fresh(&self, ttl: Duration) -> Option<T> {
        self.lock()
            .as_ref()
            .filter(|e| e.is_fresh(ttl))
            .map(|e| e.value.clone())
    }

    /// The outcome of a flight that finished at or after `instant`.
    pub fn settled_since(&self, instant: Instant) -> Option<T> {
        self.lock_settled()
            .as_ref()
            .filter(|e| e.fetched_at >= instant)
            .map(|e| e.value.clone())
    }

    /// Record what the current flight handed back to its caller.
    pub fn settle(&self, value: T) {
        *self.lock_settled() = Some(CacheEntry {
            value,
            fetched_at: Instant::now(),
        });
    }

    /// The cached value regardless of age.
    pub fn last_good(&self) -> Option<T> {
        self.lock().as_ref().map(|e| e.value.clone())
    }

    /// Store `value` fetched by a request that began at `started`.
    ///
    /// Rejected (returns `false`) when an entry newer than `started` is
    /// already present.
    pub fn store_if_newer(&self, value: T, started: Instant) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|e| e.fetched_at > started) {
            return false;
        }
        *slot = Some(CacheEntry {
            value,
            fetched_at: Instant::now(),
        });
        true
    }

    pub fn clear(&self) {
        *self.lock() = None;
        *self.lock_settled() = None;
    }

    pub fn age(&self) -> Option<Duration> {
        self.lock().as_ref().map(CacheEntry::age)
    }

    /// Wait for any in-flight fetch on this key to finish, then hold the
    /// guard for our own.
    pub async fn begin_flight(&self) -> MutexGuard<'_, ()> {
        self.flight.lock().await
    }
}

impl<T: Clone> Default for CacheSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
