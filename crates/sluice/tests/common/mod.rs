//! Common test utilities and mocks
//!
//! `MockDatabase` is an in-memory `users(id, name)` table that speaks just
//! enough SQL for the persistence layer: single-row writes, key lookups
//! (`= $1`, `= ANY($1)`), full scans, transactions and `pg_sleep`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice::{
    ColumnMeta, Connection, ConnectionFactory, Environment, PersistenceLayer, QueryResult, Result,
    Row, SluiceConfig, SluiceError, StatementResult, Value,
};

/// How long `SELECT pg_sleep(...)` keeps its connection busy
pub const SLEEP: Duration = Duration::from_millis(100);

#[derive(Default)]
pub struct MockDatabase {
    users: Mutex<BTreeMap<i64, String>>,
    /// Every statement the driver received, in order
    pub query_log: Mutex<Vec<String>>,
    /// Statements containing this pattern fail with a driver error
    fail_pattern: Mutex<Option<String>>,
}

impl MockDatabase {
    pub fn with_users(names: &[&str]) -> Arc<Self> {
        let db = Self::default();
        db.users.lock().extend(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (i as i64 + 1, name.to_string())),
        );
        Arc::new(db)
    }

    pub fn fail_when(&self, pattern: &str) {
        *self.fail_pattern.lock() = Some(pattern.to_string());
    }

    pub fn user(&self, id: i64) -> Option<String> {
        self.users.lock().get(&id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }

    /// Logged statements containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.query_log
            .lock()
            .iter()
            .filter(|sql| sql.contains(pattern))
            .count()
    }

    /// Logged statements against the users table
    pub fn user_statements(&self) -> Vec<String> {
        self.query_log
            .lock()
            .iter()
            .filter(|sql| sql.contains("users"))
            .cloned()
            .collect()
    }
}

pub struct MockConnection {
    db: Arc<MockDatabase>,
    /// Private copy of the table while a transaction is open
    tx_users: Mutex<Option<BTreeMap<i64, String>>>,
    closed: AtomicBool,
}

impl MockConnection {
    fn log(&self, sql: &str) -> Result<()> {
        self.db.query_log.lock().push(sql.to_string());
        let fails = match self.db.fail_pattern.lock().as_deref() {
            Some(pattern) => sql.contains(pattern),
            None => false,
        };
        if fails {
            return Err(SluiceError::Driver(format!("mock failure on: {}", sql)));
        }
        Ok(())
    }

    fn table<R>(&self, f: impl FnOnce(&mut BTreeMap<i64, String>) -> R) -> R {
        let mut tx = self.tx_users.lock();
        match tx.as_mut() {
            Some(users) => f(users),
            None => f(&mut self.db.users.lock()),
        }
    }
}

fn int_param(params: &[Value], index: usize) -> Result<i64> {
    params
        .get(index)
        .and_then(Value::as_i64)
        .ok_or_else(|| SluiceError::Query(format!("parameter ${} must be an integer", index + 1)))
}

fn text_param(params: &[Value], index: usize) -> Result<String> {
    params
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SluiceError::Query(format!("parameter ${} must be text", index + 1)))
}

fn user_row(id: i64, name: &str) -> Row {
    Row::new(
        vec!["id".into(), "name".into()],
        vec![Value::Int64(id), Value::String(name.to_string())],
    )
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.log(sql)?;
        tokio::task::yield_now().await;

        let affected_rows = match sql {
            "BEGIN" => {
                let snapshot = self.db.users.lock().clone();
                *self.tx_users.lock() = Some(snapshot);
                0
            }
            "COMMIT" => {
                if let Some(users) = self.tx_users.lock().take() {
                    *self.db.users.lock() = users;
                }
                0
            }
            "ROLLBACK" => {
                self.tx_users.lock().take();
                0
            }
            _ if sql.starts_with("INSERT INTO users") => {
                let id = int_param(params, 0)?;
                let name = text_param(params, 1)?;
                self.table(|users| {
                    if users.contains_key(&id) {
                        return Err(SluiceError::Query(format!(
                            "duplicate value violates unique constraint: id={}",
                            id
                        )));
                    }
                    users.insert(id, name);
                    Ok(1)
                })?
            }
            _ if sql.starts_with("UPDATE users SET name") => {
                let name = text_param(params, 0)?;
                let id = int_param(params, 1)?;
                self.table(|users| match users.get_mut(&id) {
                    Some(existing) => {
                        *existing = name;
                        1
                    }
                    None => 0,
                })
            }
            _ if sql.starts_with("DELETE FROM users") => {
                let id = int_param(params, 0)?;
                self.table(|users| u64::from(users.remove(&id).is_some()))
            }
            _ => return Err(SluiceError::Query(format!("mock cannot run: {}", sql))),
        };
        Ok(StatementResult { affected_rows })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.log(sql)?;

        if sql.contains("pg_sleep") {
            tokio::time::sleep(SLEEP).await;
            return Ok(QueryResult::new(
                vec![ColumnMeta::new("pg_sleep", "void", 0)],
                vec![Row::new(vec!["pg_sleep".into()], vec![Value::Null])],
            ));
        }
        tokio::task::yield_now().await;

        if !sql.contains("FROM users") {
            return Ok(QueryResult::new(
                vec![ColumnMeta::new("?column?", "int4", 0)],
                vec![Row::new(vec!["?column?".into()], vec![Value::Int32(1)])],
            ));
        }

        let keys: Option<Vec<i64>> = if sql.contains("= ANY($1)") {
            match params.first() {
                Some(Value::Array(items)) => Some(items.iter().filter_map(Value::as_i64).collect()),
                _ => return Err(SluiceError::Query("ANY($1) needs an array".into())),
            }
        } else if sql.contains("WHERE id = $1") {
            Some(vec![int_param(params, 0)?])
        } else {
            None
        };

        let rows = self.table(|users| {
            users
                .iter()
                .filter(|(id, _)| keys.as_ref().is_none_or(|keys| keys.contains(id)))
                .map(|(id, name)| user_row(*id, name))
                .collect()
        });
        Ok(QueryResult::new(
            vec![ColumnMeta::new("id", "int8", 0), ColumnMeta::new("name", "text", 1)],
            rows,
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

pub struct MockFactory {
    pub db: Arc<MockDatabase>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        Ok(Arc::new(MockConnection {
            db: self.db.clone(),
            tx_users: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Test environment (no retries), an empty pool of at most `max` connections
pub fn test_config(max: usize) -> SluiceConfig {
    let mut config = SluiceConfig {
        environment: Environment::Test,
        ..SluiceConfig::default()
    };
    config.pool.min_size = 0;
    config.pool.max_size = max;
    config
}

pub async fn start(db: &Arc<MockDatabase>, config: SluiceConfig) -> Arc<PersistenceLayer> {
    PersistenceLayer::start(config, MockFactory { db: db.clone() })
        .await
        .expect("persistence layer starts")
}

pub fn names(result: &QueryResult) -> Vec<String> {
    result
        .rows
        .iter()
        .filter_map(|row| row.get_by_name("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}
