//! Explicit batch execution
//!
//! Runs a caller-supplied list of statements either one after another
//! (optionally inside a single transaction) or concurrently across pooled
//! connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sluice_connection::{ConnectionManager, ExecuteOptions};
use sluice_core::{QueryResult, Result, SluiceError, Value, returns_rows};

/// One statement in an explicit batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl BatchStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl From<&str> for BatchStatement {
    fn from(sql: &str) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl From<String> for BatchStatement {
    fn from(sql: String) -> Self {
        Self::new(sql, Vec::new())
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for BatchStatement {
    fn from((sql, params): (S, Vec<Value>)) -> Self {
        Self::new(sql, params)
    }
}

/// Configuration options for batch execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Execution mode for the batch
    pub mode: ExecutionMode,
    /// Whether to stop on first error or continue with remaining statements
    pub stop_on_error: bool,
    /// Whether to execute all statements within a single transaction
    pub transaction: bool,
    /// Maximum number of concurrent executions (Parallel mode only)
    pub max_parallelism: usize,
    /// Timeout per statement in milliseconds (0 = the manager's default)
    pub statement_timeout_ms: u64,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            ..Self::default()
        }
    }

    pub fn parallel() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            ..Self::default()
        }
    }

    /// Sequential, all-or-nothing
    pub fn transactional() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            transaction: true,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn with_transaction(mut self, transaction: bool) -> Self {
        self.transaction = transaction;
        self
    }

    pub fn with_max_parallelism(mut self, max: usize) -> Self {
        self.max_parallelism = max.max(1);
        self
    }

    pub fn with_statement_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.statement_timeout_ms = timeout_ms;
        self
    }

    fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    fn execute_options(&self) -> ExecuteOptions {
        let options = ExecuteOptions::default();
        match self.statement_timeout() {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            stop_on_error: true,
            transaction: false,
            max_parallelism: 4,
            statement_timeout_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One at a time, in order
    #[default]
    Sequential,
    /// Concurrently, bounded by `max_parallelism`
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementStatus {
    Success,
    Failed,
    /// Not run because an earlier statement failed
    Skipped,
}

/// Error information for a failed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementError {
    pub message: String,
    /// Error category, e.g. `timeout` or `query`
    pub code: Option<String>,
}

impl StatementError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<SluiceError> for StatementError {
    fn from(err: SluiceError) -> Self {
        let code = match err.root_cause() {
            SluiceError::Connection { .. } | SluiceError::PoolClosed => "connection",
            SluiceError::Timeout(_) => "timeout",
            SluiceError::Validation(_) => "validation",
            SluiceError::CacheCapacity { .. } => "cache_capacity",
            SluiceError::Query(_) => "query",
            SluiceError::Driver(_) => "driver",
            SluiceError::Configuration(_) => "configuration",
            SluiceError::Serialization(_) => "serialization",
            SluiceError::NotSupported(_) => "not_supported",
            SluiceError::Cancelled => "cancelled",
            SluiceError::Other(_) => "other",
        };
        Self::new(err.to_string()).with_code(code)
    }
}

impl std::fmt::Display for StatementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{}] {}", code, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Result of executing a single statement in the batch
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Position in the submitted batch
    pub index: usize,
    pub sql: String,
    pub status: StatementStatus,
    /// Rows, for row-returning statements
    pub query_result: Option<QueryResult>,
    pub affected_rows: u64,
    pub error: Option<StatementError>,
    pub execution_time: Duration,
}

impl BatchResult {
    fn completed(index: usize, sql: String, result: QueryResult, duration: Duration) -> Self {
        let rows = returns_rows(&sql);
        Self {
            index,
            status: StatementStatus::Success,
            affected_rows: result.affected_rows,
            query_result: rows.then_some(result),
            sql,
            error: None,
            execution_time: duration,
        }
    }

    fn failed(index: usize, sql: String, error: StatementError, duration: Duration) -> Self {
        Self {
            index,
            sql,
            status: StatementStatus::Failed,
            query_result: None,
            affected_rows: 0,
            error: Some(error),
            execution_time: duration,
        }
    }

    fn skipped(index: usize, sql: String) -> Self {
        Self {
            index,
            sql,
            status: StatementStatus::Skipped,
            query_result: None,
            affected_rows: 0,
            error: None,
            execution_time: Duration::ZERO,
        }
    }

    fn from_outcome(
        index: usize,
        sql: String,
        outcome: Result<QueryResult>,
        duration: Duration,
    ) -> Self {
        match outcome {
            Ok(result) => Self::completed(index, sql, result, duration),
            Err(err) => Self::failed(index, sql, err.into(), duration),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatementStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StatementStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StatementStatus::Skipped
    }
}

/// Result of batch execution containing all statement results
#[derive(Debug, Clone)]
pub struct BatchExecutionResult {
    /// One entry per submitted statement, in submission order
    pub results: Vec<BatchResult>,
    pub total_execution_time: Duration,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    pub was_transactional: bool,
    /// Set when a transactional batch was rolled back; no statement's
    /// changes are visible in that case
    pub transaction_rolled_back: bool,
}

impl BatchExecutionResult {
    pub fn new(
        results: Vec<BatchResult>,
        total_time: Duration,
        was_transactional: bool,
        rolled_back: bool,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.iter().filter(|r| r.is_failed()).count();
        let skipped_count = results.iter().filter(|r| r.is_skipped()).count();

        Self {
            results,
            total_execution_time: total_time,
            success_count,
            failure_count,
            skipped_count,
            was_transactional,
            transaction_rolled_back: rolled_back,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.skipped_count == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    pub fn total_affected_rows(&self) -> u64 {
        self.results.iter().map(|r| r.affected_rows).sum()
    }

    pub fn failed_results(&self) -> Vec<&BatchResult> {
        self.results.iter().filter(|r| r.is_failed()).collect()
    }

    pub fn statement_count(&self) -> usize {
        self.results.len()
    }
}

/// Runs explicit statement batches through a [`ConnectionManager`]
#[derive(Debug, Clone, Default)]
pub struct BatchExecutor {
    options: BatchOptions,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    #[tracing::instrument(
        skip(self, manager, statements),
        fields(statements = statements.len(), mode = ?self.options.mode, transaction = self.options.transaction)
    )]
    pub async fn execute(
        &self,
        manager: &ConnectionManager,
        statements: Vec<BatchStatement>,
    ) -> Result<BatchExecutionResult> {
        let batch_start = Instant::now();

        if statements.is_empty() {
            return Ok(BatchExecutionResult::new(vec![], Duration::ZERO, false, false));
        }

        if self.options.transaction {
            if self.options.mode == ExecutionMode::Parallel {
                tracing::warn!(
                    "transaction mode is not supported with parallel execution, falling back to sequential"
                );
            }
            return self.execute_transactional(manager, statements, batch_start).await;
        }

        match self.options.mode {
            ExecutionMode::Sequential => {
                Ok(self.execute_sequential(manager, statements, batch_start).await)
            }
            ExecutionMode::Parallel => {
                Ok(self.execute_parallel(manager, statements, batch_start).await)
            }
        }
    }

    async fn execute_sequential(
        &self,
        manager: &ConnectionManager,
        statements: Vec<BatchStatement>,
        batch_start: Instant,
    ) -> BatchExecutionResult {
        let options = self.options.execute_options();
        let mut results = Vec::with_capacity(statements.len());
        let mut should_stop = false;

        for (index, statement) in statements.into_iter().enumerate() {
            if should_stop {
                results.push(BatchResult::skipped(index, statement.sql));
                continue;
            }

            let start = Instant::now();
            let outcome = manager.execute(&statement.sql, &statement.params, &options).await;
            let result = BatchResult::from_outcome(index, statement.sql, outcome, start.elapsed());
            if result.is_failed() && self.options.stop_on_error {
                should_stop = true;
            }
            results.push(result);
        }

        BatchExecutionResult::new(results, batch_start.elapsed(), false, false)
    }

    /// Any failure rolls back the whole batch and the remaining statements
    /// are reported as skipped.
    async fn execute_transactional(
        &self,
        manager: &ConnectionManager,
        statements: Vec<BatchStatement>,
        batch_start: Instant,
    ) -> Result<BatchExecutionResult> {
        let sql_texts: Vec<String> = statements.iter().map(|s| s.sql.clone()).collect();
        let collected: Arc<Mutex<Vec<BatchResult>>> =
            Arc::new(Mutex::new(Vec::with_capacity(statements.len())));
        let sink = Arc::clone(&collected);
        let timeout = self.options.statement_timeout();

        let outcome = manager
            .run_transaction(move |tx| {
                Box::pin(async move {
                    let timeout = timeout.unwrap_or_else(|| tx.statement_timeout());
                    for (index, statement) in statements.into_iter().enumerate() {
                        let start = Instant::now();
                        let outcome = tx
                            .run_with_timeout(&statement.sql, &statement.params, timeout)
                            .await;
                        let failure = outcome.as_ref().err().cloned();
                        sink.lock().push(BatchResult::from_outcome(
                            index,
                            statement.sql,
                            outcome,
                            start.elapsed(),
                        ));
                        if let Some(err) = failure {
                            return Err(err);
                        }
                    }
                    Ok(())
                })
            })
            .await;

        let mut results = std::mem::take(&mut *collected.lock());
        let rolled_back = match outcome {
            Ok(()) => false,
            // BEGIN itself can fail before any statement ran.
            Err(err) if results.is_empty() => return Err(err),
            Err(_) => {
                for result in results.iter_mut().filter(|r| r.is_success()) {
                    result.affected_rows = 0;
                }
                true
            }
        };

        let ran = results.len();
        results.extend(
            sql_texts
                .into_iter()
                .enumerate()
                .skip(ran)
                .map(|(index, sql)| BatchResult::skipped(index, sql)),
        );
        Ok(BatchExecutionResult::new(results, batch_start.elapsed(), true, rolled_back))
    }

    async fn execute_parallel(
        &self,
        manager: &ConnectionManager,
        statements: Vec<BatchStatement>,
        batch_start: Instant,
    ) -> BatchExecutionResult {
        let options = self.options.execute_options();
        let stop_on_error = self.options.stop_on_error;
        let stop_flag = AtomicBool::new(false);
        let (options, stop_flag) = (&options, &stop_flag);

        let mut results: Vec<BatchResult> = futures::stream::iter(
            statements.into_iter().enumerate(),
        )
        .map(|(index, statement)| async move {
            if stop_on_error && stop_flag.load(Ordering::Acquire) {
                return BatchResult::skipped(index, statement.sql);
            }
            let start = Instant::now();
            let outcome = manager.execute(&statement.sql, &statement.params, options).await;
            if outcome.is_err() && stop_on_error {
                stop_flag.store(true, Ordering::Release);
            }
            BatchResult::from_outcome(index, statement.sql, outcome, start.elapsed())
        })
        .buffer_unordered(self.options.max_parallelism.max(1))
        .collect()
        .await;

        results.sort_by_key(|r| r.index);
        BatchExecutionResult::new(results, batch_start.elapsed(), false, false)
    }
}
