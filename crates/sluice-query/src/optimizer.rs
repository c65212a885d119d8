//! The query optimizer: cache, batcher or direct execution per call

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_cache::{CacheKey, CacheStore, SetOptions};
use sluice_connection::{ConnectionManager, ExecuteOptions};
use sluice_core::{QueryResult, Result, Value, sql_preview};
use tokio::time::Instant;

use crate::batch::{
    BatchCoalescer, BatchConfig, BatchExecutionResult, BatchExecutor, BatchOptions, BatchStatement,
};
use crate::plan::QueryPlan;
use crate::stats::{ExecutionPath, QueryStatsRegistry, ShapeStats, SlowQuery};


/// Per-call switches for [`QueryOptimizer::execute_optimized`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Serve from and populate the query cache when the plan allows it
    pub cache: bool,
    /// TTL for a stored result; the cache's default when `None`
    pub cache_ttl: Option<Duration>,
    /// Coalesce with concurrent calls of the same shape
    pub batch: bool,
}

impl QueryOptions {
    pub fn cached() -> Self {
        Self {
            cache: true,
            ..Self::default()
        }
    }

    pub fn batched() -> Self {
        Self {
            batch: true,
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_batch(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub batch_window: Duration,
    pub max_batch_size: usize,
    pub slow_query_threshold: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let batch = BatchConfig::default();
        Self {
            batch_window: batch.window,
            max_batch_size: batch.max_batch_size,
            slow_query_threshold: Duration::from_millis(1000),
        }
    }
}

/// Decides for every call whether to answer from the cache, coalesce it with
/// concurrent siblings, or run it straight through the pool
///
/// Cache and batching only change latency and round-trips; a call returns
/// the same rows with both switched off.
pub struct QueryOptimizer {
    manager: Arc<ConnectionManager>,
    cache: Arc<CacheStore<QueryResult>>,
    coalescer: Arc<BatchCoalescer>,
    stats: QueryStatsRegistry,
}

impl QueryOptimizer {
    pub fn new(
        manager: Arc<ConnectionManager>,
        cache: Arc<CacheStore<QueryResult>>,
        config: OptimizerConfig,
    ) -> Self {
        let batch = BatchConfig::default()
            .with_window(config.batch_window)
            .with_max_batch_size(config.max_batch_size);
        Self {
            coalescer: Arc::new(BatchCoalescer::new(manager.clone(), batch)),
            stats: QueryStatsRegistry::new(config.slow_query_threshold),
            manager,
            cache,
        }
    }

    /// Run one statement through the cheapest path its plan allows.
    ///
    /// Plan validation errors are returned before any I/O. A successful write
    /// drops cached results of every table it references.
    #[tracing::instrument(
        skip(self, sql, params, options),
        fields(sql_preview = %sql_preview(sql), cache = options.cache, batch = options.batch)
    )]
    pub async fn execute_optimized(
        &self,
        sql: &str,
        params: &[Value],
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let plan = QueryPlan::build(sql, params)?;
        let start = Instant::now();

        let use_cache = options.cache && plan.is_cacheable();
        if use_cache {
            if let Some(hit) = plan.cache_key().and_then(|key| self.cache.get(key)) {
                tracing::trace!(shape = %plan.shape(), "query cache hit");
                self.stats
                    .record(plan.shape(), ExecutionPath::Cache, start.elapsed(), true);
                return Ok(hit);
            }
        }

        let coalesce = options.batch && (plan.is_batchable() || plan.kind().is_write());
        let (path, outcome) = if coalesce {
            (ExecutionPath::Batch, self.coalescer.submit(&plan).await)
        } else {
            let outcome = self
                .manager
                .execute(plan.sql(), plan.params(), &ExecuteOptions::default())
                .await;
            (ExecutionPath::Direct, outcome)
        };
        self.stats
            .record(plan.shape(), path, start.elapsed(), outcome.is_ok());
        let result = outcome?;

        if plan.kind().is_write() {
            self.invalidate_tables(&plan);
        } else if use_cache {
            if let Some(key) = plan.cache_key() {
                let set_options = SetOptions {
                    ttl: options.cache_ttl,
                    ..SetOptions::default()
                };
                if let Err(err) = self.cache.set(key, result.clone(), set_options) {
                    tracing::debug!(key, error = %err, "query result not cached");
                }
            }
        }

        tracing::debug!(
            path = %path,
            rows = result.row_count(),
            affected = result.affected_rows,
            cost = plan.estimated_cost(),
            "statement finished"
        );
        Ok(result)
    }

    fn invalidate_tables(&self, plan: &QueryPlan) {
        for table in plan.tables() {
            let removed = self.cache.invalidate_by_prefix(&CacheKey::entity_prefix(table));
            if removed > 0 {
                tracing::debug!(table = %table, removed, "invalidated cached reads");
            }
        }
    }

    /// Run an explicit list of statements.
    ///
    /// Writes in the batch invalidate the tables they reference, even when
    /// the transaction rolled back.
    pub async fn execute_batch(
        &self,
        statements: Vec<BatchStatement>,
        options: BatchOptions,
    ) -> Result<BatchExecutionResult> {
        let plans: Vec<QueryPlan> = statements
            .iter()
            .map(|s| QueryPlan::build(&s.sql, &s.params))
            .collect::<Result<_>>()?;

        let result = BatchExecutor::new(options)
            .execute(&self.manager, statements)
            .await?;

        for (plan, outcome) in plans.iter().zip(&result.results) {
            if !outcome.is_skipped() {
                self.stats.record(
                    plan.shape(),
                    ExecutionPath::Direct,
                    outcome.execution_time,
                    outcome.is_success(),
                );
            }
            if plan.kind().is_write() {
                self.invalidate_tables(plan);
            }
        }
        Ok(result)
    }

    /// Build the plan for a statement without running it
    pub fn plan(&self, sql: &str, params: &[Value]) -> Result<QueryPlan> {
        QueryPlan::build(sql, params)
    }

    pub fn stats(&self) -> Vec<ShapeStats> {
        self.stats.snapshot()
    }

    pub fn shape_stats(&self, shape: &str) -> Option<ShapeStats> {
        self.stats.get(shape)
    }

    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.stats.slow_queries()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub fn cache(&self) -> &Arc<CacheStore<QueryResult>> {
        &self.cache
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn coalescer(&self) -> &Arc<BatchCoalescer> {
        &self.coalescer
    }
}
