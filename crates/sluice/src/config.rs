//! Environment-style configuration for the persistence layer
//!
//! Every setting has a default, so an empty environment yields a working
//! development configuration. Values are read from `SLUICE_*` variables or
//! from a TOML document with one table per component:
//!
//! ```toml
//! environment = "production"
//!
//! [pool]
//! max_size = 20
//!
//! [cache]
//! eviction_policy = "lfu"
//! ```

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_cache::{CacheConfig, EvictionPolicy};
use sluice_connection::{BackoffStrategy, HealthCheckConfig, PoolConfig, RetryPolicy};
use sluice_core::{Result, SluiceError};
use sluice_query::OptimizerConfig;
use strum::{Display as StrumDisplay, EnumString};

#[cfg(test)]
mod tests;

/// Deployment environment; picks the default retry budget
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn default_max_retries(self) -> u32 {
        match self {
            Environment::Development => 1,
            Environment::Production => 3,
            Environment::Test => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_size: usize,
    pub max_size: usize,
    pub acquire_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_lifetime_ms: Option<u64>,
    pub statement_timeout_ms: u64,
    /// Retries per standalone statement; the environment's default when unset
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
            max_lifetime_ms: None,
            statement_timeout_ms: 30_000,
            max_retries: None,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_memory_mb: usize,
    pub default_ttl_secs: u64,
    pub eviction_policy: EvictionPolicy,
    pub sweep_interval_secs: u64,
    pub max_key_length: usize,
    /// Budget of the entity cache behind `cache_get`/`cache_set`
    pub entity_max_memory_mb: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory_mb: 100,
            default_ttl_secs: 300,
            eviction_policy: EvictionPolicy::Lru,
            sweep_interval_secs: 60,
            max_key_length: 250,
            entity_max_memory_mb: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub batch_window_ms: u64,
    pub max_batch_size: usize,
    pub slow_query_ms: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            batch_window_ms: 10,
            max_batch_size: 100,
            slow_query_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub check_interval_secs: u64,
    pub ping_timeout_ms: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            ping_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub environment: Environment,
    pub pool: PoolSettings,
    pub cache: CacheSettings,
    pub optimizer: OptimizerSettings,
    pub health: HealthSettings,
}

fn parse<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = raw.trim();
    raw.parse().map_err(|e| {
        SluiceError::Configuration(format!("invalid value {:?} for {}: {}", raw, key, e))
    })
}

/// Overwrite `slot` if the lookup has a value for `key`
fn read<T, F>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = parse(key, &raw)?;
    }
    Ok(())
}

fn read_optional<T, F>(lookup: &F, key: &str, slot: &mut Option<T>) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *slot = Some(parse(key, &raw)?);
    }
    Ok(())
}

impl SluiceConfig {
    /// Read `SLUICE_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; keys it does not know keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        read(&lookup, "SLUICE_ENV", &mut config.environment)?;

        let pool = &mut config.pool;
        read(&lookup, "SLUICE_POOL_MIN", &mut pool.min_size)?;
        read(&lookup, "SLUICE_POOL_MAX", &mut pool.max_size)?;
        read(&lookup, "SLUICE_POOL_ACQUIRE_TIMEOUT_MS", &mut pool.acquire_timeout_ms)?;
        read(&lookup, "SLUICE_POOL_IDLE_TIMEOUT_MS", &mut pool.idle_timeout_ms)?;
        read_optional(&lookup, "SLUICE_POOL_MAX_LIFETIME_MS", &mut pool.max_lifetime_ms)?;
        read(&lookup, "SLUICE_STATEMENT_TIMEOUT_MS", &mut pool.statement_timeout_ms)?;
        read_optional(&lookup, "SLUICE_MAX_RETRIES", &mut pool.max_retries)?;
        read(&lookup, "SLUICE_RETRY_BASE_DELAY_MS", &mut pool.retry_base_delay_ms)?;
        read(&lookup, "SLUICE_RETRY_MAX_DELAY_MS", &mut pool.retry_max_delay_ms)?;

        let cache = &mut config.cache;
        read(&lookup, "SLUICE_CACHE_MAX_MEMORY_MB", &mut cache.max_memory_mb)?;
        read(&lookup, "SLUICE_CACHE_DEFAULT_TTL_SECS", &mut cache.default_ttl_secs)?;
        read(&lookup, "SLUICE_CACHE_EVICTION_POLICY", &mut cache.eviction_policy)?;
        read(&lookup, "SLUICE_CACHE_SWEEP_INTERVAL_SECS", &mut cache.sweep_interval_secs)?;
        read(&lookup, "SLUICE_CACHE_MAX_KEY_LENGTH", &mut cache.max_key_length)?;
        read(&lookup, "SLUICE_ENTITY_CACHE_MAX_MEMORY_MB", &mut cache.entity_max_memory_mb)?;

        let optimizer = &mut config.optimizer;
        read(&lookup, "SLUICE_BATCH_WINDOW_MS", &mut optimizer.batch_window_ms)?;
        read(&lookup, "SLUICE_BATCH_MAX_SIZE", &mut optimizer.max_batch_size)?;
        read(&lookup, "SLUICE_SLOW_QUERY_MS", &mut optimizer.slow_query_ms)?;

        let health = &mut config.health;
        read(&lookup, "SLUICE_HEALTH_CHECK_INTERVAL_SECS", &mut health.check_interval_secs)?;
        read(&lookup, "SLUICE_HEALTH_PING_TIMEOUT_MS", &mut health.ping_timeout_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| SluiceError::Configuration(format!("invalid TOML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file; a missing file is a configuration error
    pub fn read_toml(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            SluiceError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| Err(SluiceError::Configuration(message.to_string()));
        if self.pool.max_size == 0 {
            return invalid("SLUICE_POOL_MAX must be greater than 0");
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(SluiceError::Configuration(format!(
                "SLUICE_POOL_MIN ({}) cannot exceed SLUICE_POOL_MAX ({})",
                self.pool.min_size, self.pool.max_size
            )));
        }
        if self.cache.max_memory_mb == 0 {
            return invalid("SLUICE_CACHE_MAX_MEMORY_MB must be greater than 0");
        }
        if self.cache.entity_max_memory_mb == 0 {
            return invalid("SLUICE_ENTITY_CACHE_MAX_MEMORY_MB must be greater than 0");
        }
        if self.optimizer.max_batch_size == 0 {
            return invalid("SLUICE_BATCH_MAX_SIZE must be greater than 0");
        }
        if self.cache.sweep_interval_secs == 0 || self.health.check_interval_secs == 0 {
            return invalid("sweep and health check intervals must be greater than 0");
        }
        Ok(())
    }

    /// Retries per standalone statement after the environment default is applied
    pub fn max_retries(&self) -> u32 {
        self.pool
            .max_retries
            .unwrap_or_else(|| self.environment.default_max_retries())
    }

    pub fn pool_config(&self) -> Result<PoolConfig> {
        let pool = &self.pool;
        let mut config = PoolConfig::try_new(pool.min_size, pool.max_size)?
            .with_acquire_timeout_ms(pool.acquire_timeout_ms)
            .with_idle_timeout_ms(pool.idle_timeout_ms);
        if let Some(lifetime) = pool.max_lifetime_ms {
            config = config.with_max_lifetime_ms(lifetime);
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries(),
            BackoffStrategy::new(self.pool.retry_base_delay_ms, self.pool.retry_max_delay_ms),
        )
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.statement_timeout_ms)
    }

    pub fn query_cache_config(&self) -> CacheConfig {
        self.cache_config(self.cache.max_memory_mb)
    }

    pub fn entity_cache_config(&self) -> CacheConfig {
        self.cache_config(self.cache.entity_max_memory_mb)
    }

    fn cache_config(&self, max_memory_mb: usize) -> CacheConfig {
        CacheConfig::default()
            .with_max_memory_mb(max_memory_mb)
            .with_default_ttl(Duration::from_secs(self.cache.default_ttl_secs))
            .with_policy(self.cache.eviction_policy)
            .with_sweep_interval(Duration::from_secs(self.cache.sweep_interval_secs))
            .with_max_key_length(self.cache.max_key_length)
    }

    pub fn optimizer_config(&self) -> OptimizerConfig {
        OptimizerConfig {
            batch_window: Duration::from_millis(self.optimizer.batch_window_ms),
            max_batch_size: self.optimizer.max_batch_size,
            slow_query_threshold: Duration::from_millis(self.optimizer.slow_query_ms),
        }
    }

    pub fn health_config(&self) -> HealthCheckConfig {
        HealthCheckConfig::new(Duration::from_secs(self.health.check_interval_secs))
            .with_ping_timeout(Duration::from_millis(self.health.ping_timeout_ms))
    }
}
