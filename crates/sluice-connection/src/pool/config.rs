//! Pool sizing and connection lifecycle limits

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::{Result, SluiceError};

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

/// Sizing and timeouts of a [`ConnectionPool`](super::ConnectionPool)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    min_size: usize,
    max_size: usize,
    /// How long `get` waits for a free slot before giving up
    acquire_timeout: Duration,
    /// Idle connections older than this are closed instead of reused
    idle_timeout: Duration,
    /// Connections are retired after this long, however busy
    max_lifetime: Option<Duration>,
}

impl PoolConfig {
    /// # Panics
    ///
    /// Panics if `max_size` is 0 or `min_size > max_size`. Sizes that come
    /// from user input go through [`PoolConfig::try_new`].
    pub fn new(min_size: usize, max_size: usize) -> Self {
        match Self::try_new(min_size, max_size) {
            Ok(config) => config,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_new(min_size: usize, max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(SluiceError::Configuration(
                "max_size must be greater than 0".into(),
            ));
        }
        if min_size > max_size {
            return Err(SluiceError::Configuration(format!(
                "min_size ({}) cannot exceed max_size ({})",
                min_size, max_size
            )));
        }
        Ok(Self {
            min_size,
            max_size,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: None,
        })
    }

    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn with_idle_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.idle_timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn with_max_lifetime_ms(mut self, lifetime_ms: u64) -> Self {
        self.max_lifetime = Some(Duration::from_millis(lifetime_ms));
        self
    }

    /// Connections opened by `warm_up`
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Upper bound on connections checked out at once
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_lifetime: None,
        }
    }
}
