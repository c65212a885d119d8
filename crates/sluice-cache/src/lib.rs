//! Sluice Cache - the Cache Strategy Engine
//!
//! A process-local, memory-budgeted cache generic over the stored value
//! type. One eviction policy (LRU, LFU or TTL) is active per store; expired
//! entries disappear lazily on read and through a cancellable background
//! sweep.
//!
//! # Example
//!
//! ```ignore
//! use sluice_cache::{CacheConfig, CacheKey, CacheStore, SetOptions};
//!
//! let cache: CacheStore<User> = CacheStore::new(CacheConfig::default());
//! let key = CacheKey::new("user", user.id).build();
//! cache.set(&key, user, SetOptions::default().with_ttl_secs(60))?;
//! let cached = cache.get(&key);
//! ```

mod clock;
mod config;
mod entry;
mod key;
mod policy;
mod size;
mod stats;
mod store;
mod sweeper;


pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use key::{CacheKey, digest_hex, normalize_key};
pub use policy::EvictionPolicy;
pub use size::{JsonSizeEstimator, SizeEstimator};
pub use stats::CacheStats;
pub use store::{CacheStore, SetOptions};
pub use sweeper::{SweeperHandle, spawn_sweeper};
