//! Coalescing of concurrent same-shape calls

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sluice_connection::{ConnectionManager, ExecuteOptions};
use sluice_core::{QueryResult, Result, SluiceError, Value};
use tokio::sync::oneshot;

use super::rewrite::{distinct_keys, rewrite_lookup, rows_for_key};
use crate::plan::{EqualityLookup, QueryPlan};

/// Coalescing window and group size limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// How long the first call of a group waits for siblings
    pub window: Duration,
    /// A group flushes immediately once it holds this many calls
    pub max_batch_size: usize,
}

impl BatchConfig {
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(10),
            max_batch_size: 100,
        }
    }
}

enum GroupKind {
    /// Answered by one membership query; `leader_sql` is the text `lookup`
    /// was detected on
    Lookup {
        lookup: EqualityLookup,
        leader_sql: String,
    },
    /// Run together in one transaction
    Write,
}

struct PendingCall {
    id: u64,
    sql: String,
    params: Vec<Value>,
    reply: oneshot::Sender<Result<QueryResult>>,
}

struct BatchGroup {
    generation: u64,
    kind: GroupKind,
    calls: Vec<PendingCall>,
}

/// Removes a waiting call from its group if the caller goes away before
/// the group is flushed.
struct PendingCallGuard<'a> {
    coalescer: &'a BatchCoalescer,
    shape: &'a str,
    generation: u64,
    id: u64,
}

impl Drop for PendingCallGuard<'_> {
    fn drop(&mut self) {
        self.coalescer.withdraw(self.shape, self.generation, self.id);
    }
}

/// Groups concurrent calls by normalized shape and flushes each group once
///
/// Every member of a flushed group receives exactly one result or one
/// error. A failed batched lookup falls back to running each call on its
/// own; a failed write group delivers the transaction's error to all
/// members.
pub struct BatchCoalescer {
    manager: Arc<ConnectionManager>,
    config: BatchConfig,
    groups: Mutex<HashMap<String, BatchGroup>>,
    next_call_id: AtomicU64,
    next_generation: AtomicU64,
}

impl BatchCoalescer {
    pub fn new(manager: Arc<ConnectionManager>, config: BatchConfig) -> Self {
        Self {
            manager,
            config,
            groups: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Groups waiting for their window to close
    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }

    /// Calls waiting across all groups
    pub fn pending_calls(&self) -> usize {
        self.groups.lock().values().map(|g| g.calls.len()).sum()
    }

    /// Join (or open) the group for `plan`'s shape and wait for its flush.
    ///
    /// Only equality lookups and writes can be submitted.
    pub async fn submit(self: &Arc<Self>, plan: &QueryPlan) -> Result<QueryResult> {
        let kind = match plan.lookup() {
            Some(lookup) => GroupKind::Lookup {
                lookup: lookup.clone(),
                leader_sql: plan.sql().to_string(),
            },
            None if plan.kind().is_write() => GroupKind::Write,
            None => {
                return Err(SluiceError::Validation(
                    "statement is neither an equality lookup nor a write".into(),
                ));
            }
        };

        let (reply, receiver) = oneshot::channel();
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let shape = plan.shape().to_string();
        let call = PendingCall {
            id,
            sql: plan.sql().to_string(),
            params: plan.params().to_vec(),
            reply,
        };

        let (generation, opened, full) = {
            let mut groups = self.groups.lock();
            let group = groups.entry(shape.clone()).or_insert_with(|| BatchGroup {
                generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                kind,
                calls: Vec::new(),
            });
            let opened = group.calls.is_empty();
            group.calls.push(call);
            let generation = group.generation;
            let full = if group.calls.len() >= self.config.max_batch_size {
                groups.remove(&shape)
            } else {
                None
            };
            (generation, opened, full)
        };

        match full {
            Some(group) => {
                tracing::debug!(
                    shape = %shape,
                    calls = group.calls.len(),
                    "batch group full, flushing early"
                );
                let this = Arc::clone(self);
                tokio::spawn(async move { this.flush(group).await });
            }
            None if opened => self.schedule_flush(shape.clone(), generation),
            None => {}
        }

        let _guard = PendingCallGuard {
            coalescer: self,
            shape: &shape,
            generation,
            id,
        };
        receiver.await.unwrap_or(Err(SluiceError::Cancelled))
    }

    fn schedule_flush(self: &Arc<Self>, shape: String, generation: u64) {
        let this = Arc::clone(self);
        let window = self.config.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(group) = this.take_group(&shape, generation) {
                this.flush(group).await;
            }
        });
    }

    /// Remove the group for `shape` if it is still the given generation
    fn take_group(&self, shape: &str, generation: u64) -> Option<BatchGroup> {
        let mut groups = self.groups.lock();
        match groups.get(shape) {
            Some(group) if group.generation == generation => groups.remove(shape),
            _ => None,
        }
    }

    fn withdraw(&self, shape: &str, generation: u64, id: u64) {
        let mut groups = self.groups.lock();
        let emptied = match groups.get_mut(shape) {
            Some(group) if group.generation == generation => {
                let before = group.calls.len();
                group.calls.retain(|call| call.id != id);
                if group.calls.len() < before {
                    tracing::trace!(shape, call = id, "caller left batch group before flush");
                }
                group.calls.is_empty()
            }
            _ => false,
        };
        if emptied {
            groups.remove(shape);
        }
    }

    async fn flush(&self, group: BatchGroup) {
        let BatchGroup { kind, mut calls, .. } = group;
        calls.retain(|call| !call.reply.is_closed());
        if calls.is_empty() {
            return;
        }

        match kind {
            GroupKind::Lookup { lookup, leader_sql } => {
                self.flush_lookup(&lookup, &leader_sql, calls).await
            }
            GroupKind::Write => self.flush_writes(calls).await,
        }
    }

    async fn flush_lookup(&self, lookup: &EqualityLookup, leader_sql: &str, calls: Vec<PendingCall>) {
        if calls.len() == 1 {
            self.run_individually(calls).await;
            return;
        }

        let keys = distinct_keys(calls.iter().filter_map(|call| call.params.first()));
        let batched = match rewrite_lookup(leader_sql, lookup, &keys) {
            // A rejected rewrite falls back at once; the individual calls keep
            // their retries.
            Ok((sql, params)) => {
                self.manager
                    .execute(&sql, &params, &ExecuteOptions::default().with_retries(0))
                    .await
            }
            Err(err) => Err(err),
        };

        match batched {
            Ok(result) if result.has_column(&lookup.correlation_column) => {
                tracing::debug!(
                    table = %lookup.table,
                    callers = calls.len(),
                    keys = keys.len(),
                    rows = result.row_count(),
                    "batched lookup executed"
                );
                for call in calls {
                    let rows = match call.params.first() {
                        Some(key) => rows_for_key(&result, &lookup.correlation_column, key),
                        None => Vec::new(),
                    };
                    let _ = call.reply.send(Ok(result.with_rows(rows)));
                }
            }
            Ok(_) => {
                tracing::warn!(
                    table = %lookup.table,
                    column = %lookup.correlation_column,
                    "batched result lacks the correlation column, running calls individually"
                );
                self.run_individually(calls).await;
            }
            Err(err) => {
                tracing::warn!(
                    table = %lookup.table,
                    callers = calls.len(),
                    error = %err,
                    "batched lookup failed, running calls individually"
                );
                self.run_individually(calls).await;
            }
        }
    }

    async fn flush_writes(&self, calls: Vec<PendingCall>) {
        if calls.len() == 1 {
            self.run_individually(calls).await;
            return;
        }

        let statements: Vec<(String, Vec<Value>)> = calls
            .iter()
            .map(|call| (call.sql.clone(), call.params.clone()))
            .collect();
        let outcome = self
            .manager
            .run_transaction(move |tx| {
                Box::pin(async move {
                    let mut results = Vec::with_capacity(statements.len());
                    for (sql, params) in &statements {
                        results.push(tx.run(sql, params).await?);
                    }
                    Ok(results)
                })
            })
            .await;

        match outcome {
            Ok(results) => {
                tracing::debug!(statements = results.len(), "write group committed");
                for (call, result) in calls.into_iter().zip(results) {
                    let _ = call.reply.send(Ok(result));
                }
            }
            Err(err) => {
                tracing::warn!(callers = calls.len(), error = %err, "write group rolled back");
                for call in calls {
                    let _ = call.reply.send(Err(err.clone()));
                }
            }
        }
    }

    async fn run_individually(&self, calls: Vec<PendingCall>) {
        let options = ExecuteOptions::default();
        let options = &options;
        join_all(calls.into_iter().map(|call| async move {
            let result = self.manager.execute(&call.sql, &call.params, options).await;
            let _ = call.reply.send(result);
        }))
        .await;
    }
}
