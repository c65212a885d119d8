//! Cache entries

use std::time::{Duration, Instant};

/// A stored value plus the bookkeeping every eviction policy needs
///
/// An entry is visible only while `now < created_at + ttl`.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    data: T,
    created_at: Instant,
    ttl: Duration,
    hit_count: u64,
    size_bytes: usize,
    /// Logical time of the last insert or hit, strictly increasing per store
    last_access_tick: u64,
    /// Insertion order, unique per store
    sequence: u64,
}

impl<T> CacheEntry<T> {
    pub(crate) fn new(
        data: T,
        created_at: Instant,
        ttl: Duration,
        size_bytes: usize,
        tick: u64,
        sequence: u64,
    ) -> Self {
        Self {
            data,
            created_at,
            ttl,
            hit_count: 0,
            size_bytes,
            last_access_tick: tick,
            sequence,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn last_access_tick(&self) -> u64 {
        self.last_access_tick
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn record_hit(&mut self, tick: u64) {
        self.hit_count += 1;
        self.last_access_tick = tick;
    }
}
