//! Tests for the connection manager

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sluice_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, SluiceError, StatementResult, Value,
};

use super::*;
use crate::pool::{ConnectionFactory, PoolConfig};
use crate::retry::BackoffStrategy;

/// Shared script for every connection the factory hands out
#[derive(Default)]
struct Script {
    log: Mutex<Vec<String>>,
    /// Fail this many upcoming statements with a driver error
    fail_next: AtomicUsize,
    /// Delay applied to statements containing "pg_sleep"
    slow: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct ScriptedConnection {
    script: Arc<Script>,
    closed: AtomicBool,
}

impl ScriptedConnection {
    async fn run(&self, sql: &str) -> Result<()> {
        self.script.log.lock().push(sql.to_string());
        let now = self.script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = if sql.contains("pg_sleep") {
            *self.script.slow.lock()
        } else {
            None
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.script.in_flight.fetch_sub(1, Ordering::SeqCst);

        if matches!(sql, "BEGIN" | "COMMIT" | "ROLLBACK") {
            return Ok(());
        }
        let should_fail = self
            .script
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SluiceError::Driver(format!("injected failure for: {sql}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn driver_name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.run(sql).await?;
        Ok(StatementResult { affected_rows: 1 })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.run(sql).await?;
        Ok(QueryResult::new(
            vec![ColumnMeta::new("value", "int8", 0)],
            vec![Row::new(vec!["value".into()], vec![Value::Int64(1)])],
        ))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedFactory {
    script: Arc<Script>,
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(ScriptedConnection {
            script: self.script.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

fn manager_with(max: usize, retries: u32) -> (ConnectionManager, Arc<Script>) {
    let script = Arc::new(Script::default());
    let factory = ScriptedFactory {
        script: script.clone(),
    };
    let pool = ConnectionPool::new(PoolConfig::new(0, max), factory);
    let policy = RetryPolicy::new(retries, BackoffStrategy::new(10, 100));
    (
        ConnectionManager::new(pool, policy, Duration::from_secs(5)),
        script,
    )
}

// =============================================================================
// execute
// =============================================================================

#[tokio::test]
async fn test_execute_routes_reads_and_writes() {
    let (manager, _) = manager_with(2, 0);

    let rows = manager
        .execute("SELECT value FROM t WHERE id = $1", &[Value::Int64(1)], &ExecuteOptions::default())
        .await
        .expect("select");
    assert_eq!(rows.row_count(), 1);

    let written = manager
        .execute("UPDATE t SET a = 1", &[], &ExecuteOptions::default())
        .await
        .expect("update");
    assert_eq!(written.affected_rows, 1);
    assert!(!written.has_rows());

    assert_eq!(manager.pool_stats().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_execute_retries_and_releases_connections() {
    let (manager, script) = manager_with(1, 3);
    script.fail_next.store(2, Ordering::SeqCst);

    let rows = manager
        .execute("SELECT 1", &[], &ExecuteOptions::default().with_logging(true))
        .await
        .expect("third attempt succeeds");
    assert_eq!(rows.row_count(), 1);
    assert_eq!(script.log.lock().len(), 3);

    let stats = manager.pool_stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_execute_surfaces_connection_error_after_retries() {
    let (manager, script) = manager_with(1, 2);
    script.fail_next.store(10, Ordering::SeqCst);

    let err = manager
        .execute("SELECT 1", &[], &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, SluiceError::Connection { .. }));
    assert!(matches!(err.root_cause(), SluiceError::Driver(_)));
    assert_eq!(script.log.lock().len(), 3);
    assert_eq!(manager.pool_stats().active(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_execute_per_call_retry_override() {
    let (manager, script) = manager_with(1, 5);
    script.fail_next.store(10, Ordering::SeqCst);

    let result = manager
        .execute("SELECT 1", &[], &ExecuteOptions::default().with_retries(0))
        .await;
    assert!(result.is_err());
    assert_eq!(script.log.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_statement_timeout_is_distinct_and_discards_connection() {
    let (manager, script) = manager_with(1, 0);
    *script.slow.lock() = Some(Duration::from_secs(10));

    let err = manager
        .execute(
            "SELECT pg_sleep(10)",
            &[],
            &ExecuteOptions::default().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert_eq!(manager.pool_stats().idle(), 0);
    assert_eq!(manager.pool_stats().active(), 0);
}

#[tokio::test]
async fn test_pool_of_two_serves_third_caller_after_release() {
    let (manager, script) = manager_with(2, 0);
    *script.slow.lock() = Some(Duration::from_millis(50));
    let manager = Arc::new(manager);

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .execute("SELECT pg_sleep(0.05)", &[], &ExecuteOptions::default())
                    .await
            })
        })
        .collect();

    let mut saw_waiter = false;
    for _ in 0..200 {
        let stats = manager.pool_stats();
        assert!(stats.idle() + stats.active() <= 2);
        if stats.waiting() == 1 {
            assert_eq!(stats.active(), 2);
            saw_waiter = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(saw_waiter, "third caller never queued");

    for call in calls {
        call.await.expect("join").expect("execute");
    }
    assert_eq!(script.peak_in_flight.load(Ordering::SeqCst), 2);
    assert_eq!(manager.pool_stats().waiting(), 0);
}

// =============================================================================
// run_transaction
// =============================================================================

#[tokio::test]
async fn test_transaction_commits_on_success() {
    let (manager, script) = manager_with(1, 3);

    let count = manager
        .run_transaction(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO t VALUES ($1)", &[Value::Int64(1)]).await?;
                tx.execute("INSERT INTO t VALUES ($1)", &[Value::Int64(2)]).await?;
                Ok(tx.statement_count())
            })
        })
        .await
        .expect("transaction");

    assert_eq!(count, 2);
    assert_eq!(
        *script.log.lock(),
        vec![
            "BEGIN".to_string(),
            "INSERT INTO t VALUES ($1)".to_string(),
            "INSERT INTO t VALUES ($1)".to_string(),
            "COMMIT".to_string(),
        ]
    );
    assert_eq!(manager.pool_stats().idle(), 1);
}

#[tokio::test]
async fn test_transaction_rolls_back_and_rethrows_original_error() {
    let (manager, script) = manager_with(1, 3);

    let err = manager
        .run_transaction(|tx| {
            Box::pin(async move {
                tx.execute("INSERT INTO t VALUES (1)", &[]).await?;
                tx.execute("INSERT INTO t VALUES (2)", &[]).await?;
                Err::<(), _>(SluiceError::Validation("business rule violated".into()))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SluiceError::Validation(ref m) if m == "business rule violated"));
    let log = script.log.lock().clone();
    assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
    assert!(!log.iter().any(|s| s == "COMMIT"));
    assert_eq!(manager.pool_stats().active(), 0);
}

#[tokio::test]
async fn test_transaction_statements_are_not_retried() {
    let (manager, script) = manager_with(1, 5);
    script.fail_next.store(1, Ordering::SeqCst);

    let err = manager
        .run_transaction(|tx| Box::pin(async move { tx.query("SELECT 1", &[]).await }))
        .await
        .unwrap_err();

    assert!(matches!(err, SluiceError::Driver(_)));
    let log = script.log.lock().clone();
    assert_eq!(log, vec!["BEGIN", "SELECT 1", "ROLLBACK"]);
}

#[tokio::test]
async fn test_abandoned_transaction_discards_connection() {
    let (manager, _script) = manager_with(1, 0);

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        manager.run_transaction(|_tx| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        }),
    )
    .await;

    assert!(abandoned.is_err());
    let stats = manager.pool_stats();
    assert_eq!(stats.active(), 0);
    assert_eq!(stats.idle(), 0);
}

// =============================================================================
// health / lifecycle
// =============================================================================

#[tokio::test]
async fn test_health_check_pings_pool() {
    let (manager, script) = manager_with(1, 0);
    assert!(manager.health_check().await);
    assert_eq!(*script.log.lock(), vec!["SELECT 1"]);

    script.fail_next.store(1, Ordering::SeqCst);
    let report = manager.health_report().await;
    assert!(!report.is_alive());
    assert_eq!(report.consecutive_failures, 1);
    assert_eq!(manager.health_checker().consecutive_failures(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_new_work_without_retrying() {
    let (manager, script) = manager_with(1, 3);
    manager.execute("SELECT 1", &[], &ExecuteOptions::default()).await.expect("select");
    manager.shutdown().await;

    let started = tokio::time::Instant::now();
    let err = manager
        .execute("SELECT 1", &[], &ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SluiceError::PoolClosed));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(script.log.lock().len(), 1);
    assert!(!manager.health_check().await);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_timeout_is_not_retried() {
    let script = Arc::new(Script::default());
    let pool = ConnectionPool::new(
        PoolConfig::new(0, 1).with_acquire_timeout_ms(50),
        ScriptedFactory {
            script: script.clone(),
        },
    );
    let policy = RetryPolicy::new(3, BackoffStrategy::new(1_000, 30_000));
    let manager = ConnectionManager::new(pool, policy, Duration::from_secs(5));

    let held = manager.get_connection().await.expect("first connection");
    let started = tokio::time::Instant::now();
    let err = manager
        .execute("SELECT 1", &[], &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(script.log.lock().is_empty());
    assert_eq!(manager.pool_stats().waiting(), 0);
    drop(held);

    script.fail_next.store(1, Ordering::SeqCst);
    manager
        .execute("SELECT 1", &[], &ExecuteOptions::default())
        .await
        .expect("statement failures are still retried");
    assert_eq!(script.log.lock().len(), 2);
}
