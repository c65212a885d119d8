//! Transaction handle passed to `ConnectionManager::run_transaction`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use sluice_core::{
    Connection, QueryResult, Result, SluiceError, StatementResult, Value, returns_rows,
    sql_preview,
};

/// Run one statement with a deadline, routing row-returning statements
/// through `query` and everything else through `execute`.
pub(crate) async fn run_statement(
    conn: &dyn Connection,
    sql: &str,
    params: &[Value],
    timeout: Duration,
) -> Result<QueryResult> {
    let start = Instant::now();
    let fut = async {
        if returns_rows(sql) {
            conn.query(sql, params).await
        } else {
            conn.execute(sql, params).await.map(QueryResult::from)
        }
    };

    let mut result = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| statement_timeout(sql, timeout))??;
    result.execution_time_ms = start.elapsed().as_millis() as u64;
    Ok(result)
}

pub(crate) fn statement_timeout(sql: &str, timeout: Duration) -> SluiceError {
    SluiceError::Timeout(format!(
        "statement exceeded {}ms: {}",
        timeout.as_millis(),
        sql_preview(sql)
    ))
}

/// An open transaction on one exclusively held connection
///
/// Statements issued here are never retried. Any error returned from the
/// transaction closure rolls the whole transaction back.
pub struct Transaction {
    connection: Arc<dyn Connection>,
    statement_timeout: Duration,
    statements: AtomicUsize,
    timed_out: AtomicBool,
}

impl Transaction {
    pub(crate) fn new(connection: Arc<dyn Connection>, statement_timeout: Duration) -> Self {
        Self {
            connection,
            statement_timeout,
            statements: AtomicUsize::new(0),
            timed_out: AtomicBool::new(false),
        }
    }

    /// Run a statement and return its rows (or affected-row count)
    pub async fn run(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.run_with_timeout(sql, params, self.statement_timeout).await
    }

    /// [`run`](Self::run) under a deadline other than the manager's
    pub async fn run_with_timeout(
        &self,
        sql: &str,
        params: &[Value],
        timeout: Duration,
    ) -> Result<QueryResult> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        let result = run_statement(&*self.connection, sql, params, timeout).await;
        if matches!(result, Err(SluiceError::Timeout(_))) {
            self.timed_out.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Execute a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.guard(sql, self.connection.query(sql, params)).await
    }

    /// Execute a statement that modifies data
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.statements.fetch_add(1, Ordering::SeqCst);
        self.guard(sql, self.connection.execute(sql, params)).await
    }

    async fn guard<T>(
        &self,
        sql: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                self.timed_out.store(true, Ordering::SeqCst);
                Err(statement_timeout(sql, self.statement_timeout))
            }
        }
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    /// Number of statements issued so far
    pub fn statement_count(&self) -> usize {
        self.statements.load(Ordering::SeqCst)
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }
}
