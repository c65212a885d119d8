//! Connection manager: retried statements and transactions over the pool

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use sluice_core::{QueryResult, Result, SluiceError, Value, sql_preview};

use crate::health::{HealthCheckConfig, HealthCheckResult, HealthChecker};
use crate::pool::{ConnectionPool, PoolStats, PooledConnection};
use crate::retry::RetryPolicy;
use crate::transaction::{Transaction, run_statement};

#[cfg(test)]
mod tests;

/// Per-call overrides for [`ConnectionManager::execute`]
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Statement deadline; the manager's default when `None`
    pub timeout: Option<Duration>,
    /// Retry budget; the manager's policy when `None`
    pub retries: Option<u32>,
    /// Log every attempt at debug level
    pub logging: bool,
}

impl ExecuteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }
}

/// Marks the connection broken if the transaction is abandoned before it
/// reaches COMMIT or ROLLBACK, e.g. when the caller's future is dropped.
struct OpenTransaction<'c, 'p> {
    conn: &'c PooledConnection<'p>,
    finished: bool,
}

impl Drop for OpenTransaction<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("transaction abandoned before completion, discarding connection");
            self.conn.mark_broken();
        }
    }
}

/// Owns the pool and runs statements and transactions against it
pub struct ConnectionManager {
    pool: ConnectionPool,
    retry: RetryPolicy,
    statement_timeout: Duration,
    health: HealthChecker,
}

impl ConnectionManager {
    pub fn new(pool: ConnectionPool, retry: RetryPolicy, statement_timeout: Duration) -> Self {
        Self {
            pool,
            retry,
            statement_timeout,
            health: HealthChecker::default(),
        }
    }

    pub fn with_health_config(mut self, config: HealthCheckConfig) -> Self {
        self.health = HealthChecker::new(config);
        self
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Execute one standalone statement.
    ///
    /// Each attempt acquires its own connection and releases it before any
    /// backoff sleep. A statement that times out discards its connection.
    /// After the last failed attempt the error is a `Connection` error
    /// wrapping the final cause, or a `Timeout` if that cause was a timeout.
    #[tracing::instrument(
        skip(self, sql, params, options),
        fields(sql_preview = %sql_preview(sql), param_count = params.len())
    )]
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        options: &ExecuteOptions,
    ) -> Result<QueryResult> {
        let timeout = options.timeout.unwrap_or(self.statement_timeout);
        let policy = match options.retries {
            Some(retries) => self.retry.clone().with_max_retries(retries),
            None => self.retry.clone(),
        };

        // A timed out acquire has already waited the whole acquire_timeout
        // on a saturated pool, so it ends the call.
        let acquire_timed_out = AtomicBool::new(false);
        let acquire_timed_out = &acquire_timed_out;

        policy
            .run_unless(
                "execute",
                |attempt| async move {
                    let start = Instant::now();
                    let conn = self.pool.get().await.inspect_err(|err| {
                        acquire_timed_out.store(err.is_timeout(), Ordering::SeqCst);
                    })?;
                    let result = run_statement(&*conn, sql, params, timeout).await;
                    if matches!(result, Err(SluiceError::Timeout(_))) {
                        conn.mark_broken();
                    }
                    if options.logging {
                        tracing::debug!(
                            attempt,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            ok = result.is_ok(),
                            "statement attempt finished"
                        );
                    }
                    result
                },
                |_| acquire_timed_out.load(Ordering::SeqCst),
            )
            .await
    }

    /// Run `f` inside BEGIN/COMMIT on a single connection.
    ///
    /// Any error from `f` or from its statements triggers ROLLBACK and is
    /// returned unchanged. Nothing is retried.
    ///
    /// ```ignore
    /// let id = manager
    ///     .run_transaction(|tx| Box::pin(async move {
    ///         tx.execute("INSERT INTO accounts (name) VALUES ($1)", &["ada".into()]).await?;
    ///         let rows = tx.query("SELECT count(*) FROM accounts", &[]).await?;
    ///         Ok(rows.row_count())
    ///     }))
    ///     .await?;
    /// ```
    pub async fn run_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let conn = self.pool.get().await?;
        conn.begin().await?;

        let mut open = OpenTransaction {
            conn: &conn,
            finished: false,
        };
        let tx = Transaction::new(conn.inner().clone(), self.statement_timeout);

        let outcome = f(&tx).await;

        match outcome {
            Ok(value) => {
                let committed = conn.commit().await;
                open.finished = true;
                if let Err(err) = committed {
                    tracing::error!(error = %err, "commit failed");
                    conn.mark_broken();
                    return Err(err);
                }
                tracing::debug!(statements = tx.statement_count(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                let rollback = tokio::time::timeout(self.statement_timeout, conn.rollback()).await;
                open.finished = true;
                match rollback {
                    Ok(Ok(())) => {
                        if tx.timed_out() {
                            conn.mark_broken();
                        }
                        tracing::debug!(error = %err, "transaction rolled back");
                    }
                    Ok(Err(rollback_err)) => {
                        tracing::error!(error = %err, rollback_error = %rollback_err, "rollback failed");
                        conn.mark_broken();
                    }
                    Err(_) => {
                        tracing::error!(error = %err, "rollback timed out");
                        conn.mark_broken();
                    }
                }
                Err(err)
            }
        }
    }

    /// Scoped acquisition of a raw pooled connection
    pub async fn get_connection(&self) -> Result<PooledConnection<'_>> {
        self.pool.get().await
    }

    /// Point-in-time pool snapshot; never blocks
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Liveness probe: `SELECT 1` with a short timeout
    pub async fn health_check(&self) -> bool {
        self.health_report().await.is_alive()
    }

    pub async fn health_report(&self) -> HealthCheckResult {
        self.health.check_pool(&self.pool).await
    }

    pub fn health_checker(&self) -> &HealthChecker {
        &self.health
    }

    /// Open `min_size` connections ahead of the first request
    pub async fn warm_up(&self) -> Result<usize> {
        self.pool.warm_up().await
    }

    /// Close the pool; later calls fail with `PoolClosed`, without retrying
    pub async fn shutdown(&self) {
        self.pool.close().await;
        tracing::info!("connection pool closed");
    }
}
