//! Eviction policies

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::entry::CacheEntry;

/// Rule that picks the next entry to evict under memory pressure
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EvictionPolicy {
    /// Least recently used; never-touched entries go in insertion order
    #[default]
    Lru,
    /// Least frequently used; ties go to the oldest entry
    Lfu,
    /// Soonest to expire, regardless of access pattern
    Ttl,
}

impl EvictionPolicy {
    /// `Ordering::Less` means `a` is evicted before `b`.
    pub fn compare<T>(self, a: &CacheEntry<T>, b: &CacheEntry<T>) -> Ordering {
        match self {
            EvictionPolicy::Lru => a
                .last_access_tick()
                .cmp(&b.last_access_tick())
                .then(a.sequence().cmp(&b.sequence())),
            EvictionPolicy::Lfu => a
                .hit_count()
                .cmp(&b.hit_count())
                .then(a.created_at().cmp(&b.created_at()))
                .then(a.sequence().cmp(&b.sequence())),
            EvictionPolicy::Ttl => a
                .expires_at()
                .cmp(&b.expires_at())
                .then(a.sequence().cmp(&b.sequence())),
        }
    }
}
