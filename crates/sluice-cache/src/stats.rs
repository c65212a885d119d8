//! Cache statistics

use serde::{Deserialize, Serialize};

/// Counters maintained by a cache store
///
/// Only the store mutates these; callers receive copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Explicit deletes and prefix invalidations that removed an entry
    pub deletes: u64,
    /// Entries removed to make room under the memory budget
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Sets refused because the entry alone exceeds the budget
    pub rejections: u64,
    /// Sum of the approximate sizes of stored entries
    pub memory_usage: usize,
    pub entry_count: usize,
    pub max_memory_bytes: usize,
}

impl CacheStats {
    pub fn new(max_memory_bytes: usize) -> Self {
        Self {
            max_memory_bytes,
            ..Self::default()
        }
    }

    /// Hits over lookups (0.0 - 1.0); 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }

    /// Memory usage as a fraction of the budget
    pub fn memory_utilization(&self) -> f64 {
        if self.max_memory_bytes == 0 {
            0.0
        } else {
            self.memory_usage as f64 / self.max_memory_bytes as f64
        }
    }
}
