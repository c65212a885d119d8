//! The persistence layer service object

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sluice_cache::{CacheStats, CacheStore, SetOptions, SweeperHandle, spawn_sweeper};
use sluice_connection::{
    ConnectionFactory, ConnectionManager, ConnectionPool, ExecuteOptions, HealthCheckResult, PoolStats,
    PooledConnection, Transaction,
};
use sluice_core::{QueryResult, Result, Value};
use sluice_query::{
    BatchExecutionResult, BatchOptions, BatchStatement, QueryOptimizer, QueryOptions, ShapeStats,
    SlowQuery,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SluiceConfig;

/// Counters of both cache stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheReport {
    /// Query results cached by `execute_optimized`
    pub query: CacheStats,
    /// Values stored through `cache_set`
    pub entity: CacheStats,
}

struct BackgroundTasks {
    sweepers: Vec<SweeperHandle>,
    monitor_cancel: CancellationToken,
    monitor: JoinHandle<()>,
}

/// Pooled, cached and batched database access behind one handle
///
/// Built once at startup with [`PersistenceLayer::start`] and shared by
/// reference (`Arc`) with the collaborators that need the database.
pub struct PersistenceLayer {
    config: SluiceConfig,
    manager: Arc<ConnectionManager>,
    optimizer: QueryOptimizer,
    entity_cache: Arc<CacheStore<serde_json::Value>>,
    background: Mutex<Option<BackgroundTasks>>,
}

impl PersistenceLayer {
    /// Build the pool, both caches and the optimizer, then start the cache
    /// sweepers and the pool monitor.
    ///
    /// Warm-up failures are logged rather than returned: the database may
    /// become reachable after the process starts.
    pub async fn start<F: ConnectionFactory>(config: SluiceConfig, factory: F) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = ConnectionPool::new(config.pool_config()?, factory);
        let manager = Arc::new(
            ConnectionManager::new(pool, config.retry_policy(), config.statement_timeout())
                .with_health_config(config.health_config()),
        );
        match manager.warm_up().await {
            Ok(opened) => tracing::debug!(opened, "connection pool warmed up"),
            Err(err) => tracing::warn!(error = %err, "connection pool warm-up failed"),
        }

        let query_cache: Arc<CacheStore<QueryResult>> =
            Arc::new(CacheStore::new(config.query_cache_config()));
        let entity_cache: Arc<CacheStore<serde_json::Value>> =
            Arc::new(CacheStore::new(config.entity_cache_config()));
        let sweepers = vec![
            spawn_sweeper(&query_cache, query_cache.config().sweep_interval),
            spawn_sweeper(&entity_cache, entity_cache.config().sweep_interval),
        ];

        let monitor_cancel = CancellationToken::new();
        let monitor = spawn_pool_monitor(
            Arc::downgrade(&manager),
            config.health_config().check_interval,
            monitor_cancel.clone(),
        );

        let optimizer =
            QueryOptimizer::new(manager.clone(), query_cache, config.optimizer_config());

        tracing::info!(
            environment = %config.environment,
            pool_max = config.pool.max_size,
            retries = config.max_retries(),
            eviction_policy = %config.cache.eviction_policy,
            "persistence layer started"
        );

        Ok(Arc::new(Self {
            config,
            manager,
            optimizer,
            entity_cache,
            background: Mutex::new(Some(BackgroundTasks {
                sweepers,
                monitor_cancel,
                monitor,
            })),
        }))
    }

    /// [`start`](Self::start) with configuration from `SLUICE_*` variables
    pub async fn from_env<F: ConnectionFactory>(factory: F) -> anyhow::Result<Arc<Self>> {
        use anyhow::Context;

        let config = SluiceConfig::from_env().context("failed to read SLUICE_* configuration")?;
        let layer = Self::start(config, factory)
            .await
            .context("failed to start the persistence layer")?;
        Ok(layer)
    }

    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn optimizer(&self) -> &QueryOptimizer {
        &self.optimizer
    }

    /// Run one standalone statement with retry; never cached or batched
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecuteOptions,
    ) -> Result<QueryResult> {
        self.manager.execute(sql, params, options).await
    }

    /// Run one statement through the cache, the batcher or the pool
    pub async fn execute_optimized(
        &self,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        self.optimizer.execute_optimized(sql, params, options).await
    }

    /// Run `f` in a transaction on one exclusively held connection
    pub async fn run_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, Result<T>>,
    {
        self.manager.run_transaction(f).await
    }

    pub async fn get_connection(&self) -> Result<PooledConnection<'_>> {
        self.manager.get_connection().await
    }

    pub async fn batch_execute(
        &self,
        statements: Vec<BatchStatement>,
        options: BatchOptions,
    ) -> Result<BatchExecutionResult> {
        self.optimizer.execute_batch(statements, options).await
    }

    /// Typed read from the entity cache.
    ///
    /// A stored value that no longer deserializes as `T` is dropped and
    /// reported as absent.
    pub fn cache_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entity_cache.get(key)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(err) => {
                tracing::debug!(key, error = %err, "cached value has a different shape, dropping it");
                self.entity_cache.delete(key);
                None
            }
        }
    }

    /// Typed write to the entity cache.
    ///
    /// A value that cannot be serialized is skipped. The only error is
    /// `CacheCapacity`, for a value larger than the whole budget.
    pub fn cache_set<T: Serialize>(&self, key: &str, value: &T, options: SetOptions) -> Result<()> {
        match serde_json::to_value(value) {
            Ok(json) => self.entity_cache.set(key, json, options),
            Err(err) => {
                tracing::warn!(key, error = %err, "value not serializable, not cached");
                Ok(())
            }
        }
    }

    pub fn cache_delete(&self, key: &str) -> bool {
        self.entity_cache.delete(key)
    }

    /// Drop every entry under `prefix` from both caches; returns how many
    pub fn cache_invalidate_by_prefix(&self, prefix: &str) -> usize {
        self.entity_cache.invalidate_by_prefix(prefix)
            + self.optimizer.cache().invalidate_by_prefix(prefix)
    }

    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            query: self.optimizer.cache().stats(),
            entity: self.entity_cache.stats(),
        }
    }

    pub fn query_stats(&self) -> Vec<ShapeStats> {
        self.optimizer.stats()
    }

    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.optimizer.slow_queries()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.manager.pool_stats()
    }

    pub async fn health_check(&self) -> bool {
        self.manager.health_check().await
    }

    pub async fn health_report(&self) -> HealthCheckResult {
        self.manager.health_report().await
    }

    /// Stop the background tasks and close the pool.
    ///
    /// Calling it again is a no-op. Statements issued afterwards fail at once
    /// with `PoolClosed`.
    pub async fn shutdown(&self) {
        let Some(tasks) = self.background.lock().take() else {
            return;
        };

        tasks.monitor_cancel.cancel();
        if let Err(err) = tasks.monitor.await {
            tracing::warn!(error = %err, "pool monitor task failed");
        }
        for sweeper in tasks.sweepers {
            sweeper.shutdown().await;
        }
        self.manager.shutdown().await;
        tracing::info!("persistence layer shut down");
    }
}

impl Drop for PersistenceLayer {
    fn drop(&mut self) {
        if let Some(tasks) = self.background.get_mut().take() {
            tasks.monitor_cancel.cancel();
        }
    }
}

/// Log pool occupancy and liveness every `interval`
fn spawn_pool_monitor(
    manager: Weak<ConnectionManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(manager) = manager.upgrade() else { break };
                    let stats = manager.pool_stats();
                    let report = manager.health_report().await;
                    if report.is_alive() {
                        tracing::info!(
                            active = stats.active(),
                            idle = stats.idle(),
                            waiting = stats.waiting(),
                            max = stats.max(),
                            latency_ms = report.latency.map(|l| l.as_millis() as u64),
                            status = ?report.status,
                            "pool status"
                        );
                    } else {
                        tracing::warn!(
                            active = stats.active(),
                            waiting = stats.waiting(),
                            consecutive_failures = report.consecutive_failures,
                            error = report.error.as_deref().unwrap_or("unknown"),
                            "database health check failed"
                        );
                    }
                }
            }
        }
        tracing::trace!("pool monitor stopped");
    })
}
