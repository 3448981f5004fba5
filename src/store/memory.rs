//! In-process counter store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, StoreError};

/// A single counter and the instant its window closes.
#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Instant,
}

/// Increments between two sweeps of expired counters.
const DEFAULT_SWEEP_EVERY: u64 = 1024;

/// Counter store held in process memory.
///
/// Each increment runs under the map's shard lock for that key, so concurrent
/// callers in the same process never lose an update. Counters are only shared
/// within one process; use a Redis store to share them between hosts.
///
/// Expired counters are dropped by a sweep that runs every `sweep_every`
/// increments, so keys that are never touched again do not accumulate.
#[derive(Debug)]
pub struct MemoryStore {
    counters: DashMap<String, Slot>,
    increments: AtomicU64,
    sweep_every: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_every(DEFAULT_SWEEP_EVERY)
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sweeps expired counters every
    /// `sweep_every` increments. Zero is treated as one.
    pub fn with_sweep_every(sweep_every: u64) -> Self {
        Self {
            counters: DashMap::new(),
            increments: AtomicU64::new(0),
            sweep_every: sweep_every.max(1),
        }
    }

    /// Current count for `key`, or `None` when absent or expired.
    pub fn count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|slot| slot.expires_at > now)
            .map(|slot| slot.count)
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters.iter().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop counters whose window has closed, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, slot| slot.expires_at > now);
        before - self.counters.len()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment_and_get(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let expires_at = now.checked_add(window).ok_or_else(|| {
            StoreError::Unavailable(format!("window of {:?} is out of range", window))
        })?;

        let count = {
            let mut slot = self.counters.entry(key.to_string()).or_insert(Slot {
                count: 0,
                expires_at,
            });

            // An expired counter behaves as if the store had already dropped it.
            if slot.expires_at <= now {
                *slot = Slot {
                    count: 0,
                    expires_at,
                };
            }

            slot.count += 1;
            slot.count
        };
        trace!(key = %key, count = count, "Incremented in-memory counter");

        // The shard guard above must be released before sweeping.
        if (self.increments.fetch_add(1, Ordering::Relaxed) + 1) % self.sweep_every == 0 {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed = removed, "Swept expired in-memory counters");
            }
        }

        Ok(count)
    }

    async fn clear_namespace(&self, prefix: &str) -> Result<u64, StoreError> {
        let before = self.counters.len();
        self.counters.retain(|key, _| !key.starts_with(prefix));
        Ok((before - self.counters.len()) as u64)
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
