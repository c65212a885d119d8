//! Memory-budgeted cache store

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use sluice_core::{Result, SluiceError};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::key::normalize_key;
use crate::policy::EvictionPolicy;
use crate::size::{JsonSizeEstimator, SizeEstimator};
use crate::stats::CacheStats;

/// Per-call options for [`CacheStore::set`]
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the store's default TTL
    pub ttl: Option<Duration>,
    /// Skips the size estimator
    pub size_hint: Option<usize>,
}

impl SetOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_ttl_secs(self, secs: u64) -> Self {
        self.with_ttl(Duration::from_secs(secs))
    }

    pub fn with_size_hint(mut self, bytes: usize) -> Self {
        self.size_hint = Some(bytes);
        self
    }
}

struct CacheState<T> {
    entries: HashMap<String, CacheEntry<T>>,
    stats: CacheStats,
    tick: u64,
    sequence: u64,
}

impl<T> CacheState<T> {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Remove an entry and release its bytes; callers bump the counter
    /// that matches the reason.
    fn remove(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.stats.memory_usage -= entry.size_bytes();
        self.stats.entry_count = self.entries.len();
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    fn evict_one(&mut self, policy: EvictionPolicy) -> Option<String> {
        let victim = self
            .entries
            .iter()
            .min_by(|(_, a), (_, b)| policy.compare(a, b))
            .map(|(key, _)| key.clone())?;
        self.remove(&victim);
        self.stats.evictions += 1;
        Some(victim)
    }
}

/// A process-local cache generic over the stored value type
///
/// A single mutex guards entries and statistics together, so every
/// operation observes and leaves `stats.memory_usage` equal to the sum of
/// the stored entries' sizes.
pub struct CacheStore<T> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    sizer: Arc<dyn SizeEstimator<T>>,
    state: Mutex<CacheState<T>>,
}

impl<T> CacheStore<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    /// Store that sizes entries by their JSON encoding
    pub fn new(config: CacheConfig) -> Self {
        Self::with_estimator(config, JsonSizeEstimator::default())
    }
}

impl<T> CacheStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn with_estimator(config: CacheConfig, sizer: impl SizeEstimator<T> + 'static) -> Self {
        let stats = CacheStats::new(config.max_memory_bytes);
        Self {
            config,
            clock: Arc::new(SystemClock),
            sizer: Arc::new(sizer),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                stats,
                tick: 0,
                sequence: 0,
            }),
        }
    }

    /// Replace the time source (tests use [`ManualClock`](crate::ManualClock))
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let key = normalize_key(key, self.config.max_key_length);
        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = match state.entries.get(key.as_ref()) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            state.remove(&key);
            state.stats.expirations += 1;
            state.stats.misses += 1;
            return None;
        }

        let tick = state.next_tick();
        let entry = state.entries.get_mut(key.as_ref())?;
        entry.record_hit(tick);
        state.stats.hits += 1;
        Some(entry.data().clone())
    }

    /// Insert or replace an entry.
    ///
    /// When the new entry does not fit, expired entries are purged first and
    /// then the policy evicts until usage is at most
    /// `min(80% of budget, budget - size)`. An entry larger than the whole
    /// budget is rejected with `CacheCapacity`. A failing size estimate
    /// skips the insert without an error.
    pub fn set(&self, key: &str, value: T, options: SetOptions) -> Result<()> {
        let key = normalize_key(key, self.config.max_key_length);
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let budget = self.config.max_memory_bytes;

        let size = match options.size_hint {
            Some(size) => size,
            None => match self.sizer.estimate(&value) {
                Ok(size) => size,
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "size estimation failed, entry not cached");
                    return Ok(());
                }
            },
        };

        let now = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if size > budget {
            state.stats.rejections += 1;
            tracing::warn!(key = %key, size, budget, "cache entry larger than memory budget, rejected");
            return Err(SluiceError::CacheCapacity {
                key: key.into_owned(),
                size,
                budget,
            });
        }

        state.remove(&key);

        if ttl.is_zero() {
            return Ok(());
        }

        if state.stats.memory_usage + size > budget {
            let expired = state.purge_expired(now);
            let mut evicted = 0usize;
            if state.stats.memory_usage + size > budget {
                let target = self.config.eviction_target(size);
                while state.stats.memory_usage > target {
                    if state.evict_one(self.config.policy).is_none() {
                        break;
                    }
                    evicted += 1;
                }
            }
            tracing::debug!(
                expired,
                evicted,
                memory_usage = state.stats.memory_usage,
                budget,
                policy = %self.config.policy,
                "made room for cache entry"
            );
        }

        let tick = state.next_tick();
        let sequence = state.next_sequence();
        state.entries.insert(
            key.into_owned(),
            CacheEntry::new(value, now, ttl, size, tick, sequence),
        );
        state.stats.memory_usage += size;
        state.stats.entry_count = state.entries.len();
        state.stats.sets += 1;
        Ok(())
    }

    /// Remove one entry; `false` if there was nothing to remove.
    pub fn delete(&self, key: &str) -> bool {
        let key = normalize_key(key, self.config.max_key_length);
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let removed = state.remove(&key).is_some();
        if removed {
            state.stats.deletes += 1;
        }
        removed
    }

    /// Remove every entry whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let matching: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            state.remove(key);
        }
        state.stats.deletes += matching.len() as u64;
        if !matching.is_empty() {
            tracing::debug!(prefix, removed = matching.len(), "invalidated cache entries");
        }
        matching.len()
    }

    /// Drop every entry whose TTL has elapsed; returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().purge_expired(now)
    }

    pub fn clear(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.deletes += state.entries.len() as u64;
        state.entries.clear();
        state.stats.memory_usage = 0;
        state.stats.entry_count = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that touches neither stats nor recency
    pub fn contains_key(&self, key: &str) -> bool {
        let key = normalize_key(key, self.config.max_key_length);
        let now = self.clock.now();
        self.state
            .lock()
            .entries
            .get(key.as_ref())
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Sum of stored entry sizes, recomputed from scratch
    pub fn resident_bytes(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .map(CacheEntry::size_bytes)
            .sum()
    }
}
