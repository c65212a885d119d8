//! Tests for configuration loading

use std::collections::HashMap;

use pretty_assertions::assert_eq;

use super::*;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_empty_environment_uses_defaults() {
    let config = SluiceConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(config, SluiceConfig::default());
    assert_eq!(config.environment, Environment::Development);
    assert_eq!(config.max_retries(), 1);
    assert_eq!(config.statement_timeout(), Duration::from_secs(30));

    let cache = config.query_cache_config();
    assert_eq!(cache.max_memory_bytes, 100 * 1024 * 1024);
    assert_eq!(cache.default_ttl, Duration::from_secs(300));
    assert_eq!(cache.policy, EvictionPolicy::Lru);
    assert_eq!(config.entity_cache_config().max_memory_bytes, 50 * 1024 * 1024);

    let optimizer = config.optimizer_config();
    assert_eq!(optimizer.batch_window, Duration::from_millis(10));
    assert_eq!(optimizer.max_batch_size, 100);
    assert_eq!(optimizer.slow_query_threshold, Duration::from_secs(1));
}

#[test]
fn test_environment_drives_retry_default() {
    let production = SluiceConfig::from_lookup(lookup(&[("SLUICE_ENV", "Production")])).unwrap();
    assert_eq!(production.max_retries(), 3);

    let test = SluiceConfig::from_lookup(lookup(&[("SLUICE_ENV", "test")])).unwrap();
    assert_eq!(test.max_retries(), 0);

    let explicit = SluiceConfig::from_lookup(lookup(&[
        ("SLUICE_ENV", "production"),
        ("SLUICE_MAX_RETRIES", "5"),
    ]))
    .unwrap();
    assert_eq!(explicit.max_retries(), 5);
    assert_eq!(explicit.retry_policy().max_retries(), 5);
}

#[test]
fn test_every_key_is_read() {
    let config = SluiceConfig::from_lookup(lookup(&[
        ("SLUICE_POOL_MIN", "2"),
        ("SLUICE_POOL_MAX", "4"),
        ("SLUICE_POOL_ACQUIRE_TIMEOUT_MS", "1500"),
        ("SLUICE_POOL_IDLE_TIMEOUT_MS", "9000"),
        ("SLUICE_POOL_MAX_LIFETIME_MS", "60000"),
        ("SLUICE_STATEMENT_TIMEOUT_MS", "250"),
        ("SLUICE_RETRY_BASE_DELAY_MS", "10"),
        ("SLUICE_RETRY_MAX_DELAY_MS", "80"),
        ("SLUICE_CACHE_MAX_MEMORY_MB", "8"),
        ("SLUICE_CACHE_DEFAULT_TTL_SECS", "30"),
        ("SLUICE_CACHE_EVICTION_POLICY", "LFU"),
        ("SLUICE_CACHE_SWEEP_INTERVAL_SECS", "5"),
        ("SLUICE_CACHE_MAX_KEY_LENGTH", "64"),
        ("SLUICE_ENTITY_CACHE_MAX_MEMORY_MB", "2"),
        ("SLUICE_BATCH_WINDOW_MS", "25"),
        ("SLUICE_BATCH_MAX_SIZE", "50"),
        ("SLUICE_SLOW_QUERY_MS", " 200 "),
        ("SLUICE_HEALTH_CHECK_INTERVAL_SECS", "15"),
        ("SLUICE_HEALTH_PING_TIMEOUT_MS", "500"),
    ]))
    .unwrap();

    let pool = config.pool_config().unwrap();
    assert_eq!(pool.min_size(), 2);
    assert_eq!(pool.max_size(), 4);
    assert_eq!(pool.acquire_timeout(), Duration::from_millis(1500));
    assert_eq!(pool.idle_timeout(), Duration::from_secs(9));
    assert_eq!(pool.max_lifetime(), Some(Duration::from_secs(60)));
    assert_eq!(config.statement_timeout(), Duration::from_millis(250));
    assert_eq!(
        config.retry_policy().backoff().initial_delay(),
        Duration::from_millis(10)
    );

    let cache = config.query_cache_config();
    assert_eq!(cache.max_memory_bytes, 8 * 1024 * 1024);
    assert_eq!(cache.policy, EvictionPolicy::Lfu);
    assert_eq!(cache.sweep_interval, Duration::from_secs(5));
    assert_eq!(cache.max_key_length, 64);
    assert_eq!(config.entity_cache_config().max_memory_bytes, 2 * 1024 * 1024);

    assert_eq!(config.optimizer.batch_window_ms, 25);
    assert_eq!(config.optimizer.max_batch_size, 50);
    assert_eq!(config.optimizer.slow_query_ms, 200);

    let health = config.health_config();
    assert_eq!(health.check_interval, Duration::from_secs(15));
    assert_eq!(health.ping_timeout, Duration::from_millis(500));
}

#[test]
fn test_unparsable_value_names_the_key() {
    let err = SluiceConfig::from_lookup(lookup(&[("SLUICE_POOL_MAX", "ten")])).unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(_)));
    assert!(err.to_string().contains("SLUICE_POOL_MAX"));

    let err = SluiceConfig::from_lookup(lookup(&[("SLUICE_CACHE_EVICTION_POLICY", "fifo")]))
        .unwrap_err();
    assert!(err.to_string().contains("SLUICE_CACHE_EVICTION_POLICY"));
}

#[test]
fn test_validation_rejects_impossible_settings() {
    for pairs in [
        vec![("SLUICE_POOL_MAX", "0")],
        vec![("SLUICE_POOL_MIN", "5"), ("SLUICE_POOL_MAX", "2")],
        vec![("SLUICE_CACHE_MAX_MEMORY_MB", "0")],
        vec![("SLUICE_BATCH_MAX_SIZE", "0")],
    ] {
        let err = SluiceConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(
            matches!(err, SluiceError::Configuration(_)),
            "{pairs:?} gave {err:?}"
        );
    }
}

#[test]
fn test_toml_tables() {
    let config = SluiceConfig::from_toml_str(
        r#"
        environment = "production"

        [pool]
        max_size = 20
        max_retries = 2

        [cache]
        eviction_policy = "ttl"
        "#,
    )
    .unwrap();

    assert_eq!(config.environment, Environment::Production);
    assert_eq!(config.pool.max_size, 20);
    assert_eq!(config.pool.min_size, 1);
    assert_eq!(config.max_retries(), 2);
    assert_eq!(config.cache.eviction_policy, EvictionPolicy::Ttl);
    assert_eq!(config.optimizer, OptimizerSettings::default());

    let err = SluiceConfig::from_toml_str("[pool]\nmax_size = 0\n").unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(_)));
    let err = SluiceConfig::from_toml_str("[pool\n").unwrap_err();
    assert!(err.to_string().contains("invalid TOML"));
}

#[test]
fn test_read_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sluice.toml");
    std::fs::write(&path, "[optimizer]\nbatch_window_ms = 5\n").unwrap();

    let config = SluiceConfig::read_toml(&path).unwrap();
    assert_eq!(config.optimizer.batch_window_ms, 5);
    assert_eq!(config.pool, PoolSettings::default());

    let err = SluiceConfig::read_toml(&dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, SluiceError::Configuration(_)));
}
