//! Cache configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::EvictionPolicy;

/// Fraction of the budget the cache shrinks to once it has to evict
pub(crate) const EVICTION_TARGET_RATIO: f64 = 0.8;

/// Configuration for a [`CacheStore`](crate::CacheStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory budget in (approximate) bytes
    pub max_memory_bytes: usize,
    /// TTL applied when a `set` does not name one
    pub default_ttl: Duration,
    pub policy: EvictionPolicy,
    /// Interval of the background expiry sweep
    pub sweep_interval: Duration,
    /// Keys longer than this are stored under their digest
    pub max_key_length: usize,
}

impl CacheConfig {
    pub fn with_max_memory_mb(mut self, mb: usize) -> Self {
        self.max_memory_bytes = mb.saturating_mul(1024 * 1024);
        self
    }

    pub fn with_max_memory_bytes(mut self, bytes: usize) -> Self {
        self.max_memory_bytes = bytes;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_policy(mut self, policy: EvictionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_key_length(mut self, len: usize) -> Self {
        self.max_key_length = len;
        self
    }

    /// Usage the store evicts down to before inserting an entry of `size`
    pub(crate) fn eviction_target(&self, size: usize) -> usize {
        let ratio_target = (self.max_memory_bytes as f64 * EVICTION_TARGET_RATIO) as usize;
        ratio_target.min(self.max_memory_bytes.saturating_sub(size))
    }
}

impl Default for CacheConfig {
    /// 100 MB, 5 minute TTL, LRU, sweep every minute, 250 byte keys
    fn default() -> Self {
        Self {
            max_memory_bytes: 100 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            policy: EvictionPolicy::Lru,
            sweep_interval: Duration::from_secs(60),
            max_key_length: 250,
        }
    }
}
