//! In-memory `users` table behind the `Connection` trait

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_cache::{CacheConfig, CacheStore};
use sluice_connection::{
    BackoffStrategy, ConnectionFactory, ConnectionManager, ConnectionPool, PoolConfig, RetryPolicy,
};
use sluice_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, SluiceError, StatementResult, Value,
};

type Users = BTreeMap<i64, String>;

/// How long a `pg_sleep` statement takes
pub const SLEEP: Duration = Duration::from_millis(100);

/// One statement as the driver saw it
#[derive(Debug, Clone)]
pub struct Logged {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
pub struct MockDatabase {
    committed: Mutex<Users>,
    log: Mutex<Vec<Logged>>,
    /// Statements containing this text fail with a driver error
    fail_on: Mutex<Option<String>>,
}

impl MockDatabase {
    pub fn with_users(names: &[&str]) -> Arc<Self> {
        let db = Self::default();
        {
            let mut users = db.committed.lock();
            for (i, name) in names.iter().enumerate() {
                users.insert(i as i64 + 1, name.to_string());
            }
        }
        Arc::new(db)
    }

    pub fn fail_on(&self, needle: &str) {
        *self.fail_on.lock() = Some(needle.to_string());
    }

    pub fn user(&self, id: i64) -> Option<String> {
        self.committed.lock().get(&id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.committed.lock().len()
    }

    /// Logged statements other than transaction control
    pub fn statements(&self) -> Vec<Logged> {
        self.log
            .lock()
            .iter()
            .filter(|s| !matches!(s.sql.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .cloned()
            .collect()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.log.lock().iter().filter(|s| s.sql.contains(needle)).count()
    }
}

pub struct MockConnection {
    db: Arc<MockDatabase>,
    /// Working copy while a transaction is open
    staged: Mutex<Option<Users>>,
    closed: AtomicBool,
}

impl MockConnection {
    async fn enter(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.db.log.lock().push(Logged {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        if sql.contains("pg_sleep") {
            tokio::time::sleep(SLEEP).await;
        }
        tokio::task::yield_now().await;
        let fail = self
            .db
            .fail_on
            .lock()
            .as_deref()
            .is_some_and(|needle| sql.contains(needle));
        if fail {
            return Err(SluiceError::Driver(format!("injected failure: {sql}")));
        }
        Ok(())
    }

    fn with_users<R>(&self, f: impl FnOnce(&mut Users) -> R) -> R {
        let mut staged = self.staged.lock();
        match staged.as_mut() {
            Some(users) => f(users),
            None => f(&mut self.db.committed.lock()),
        }
    }
}

fn key_of(value: &Value) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| SluiceError::Query(format!("bad key: {value:?}")))
}

fn param(params: &[Value], index: usize) -> Result<&Value> {
    params
        .get(index)
        .ok_or_else(|| SluiceError::Query(format!("missing parameter {}", index + 1)))
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.enter(sql, params).await?;
        let affected = match sql {
            "BEGIN" => {
                let snapshot = self.db.committed.lock().clone();
                *self.staged.lock() = Some(snapshot);
                0
            }
            "COMMIT" => {
                if let Some(users) = self.staged.lock().take() {
                    *self.db.committed.lock() = users;
                }
                0
            }
            "ROLLBACK" => {
                self.staged.lock().take();
                0
            }
            _ if sql.starts_with("INSERT INTO users") => {
                let id = key_of(param(params, 0)?)?;
                let name = param(params, 1)?.as_str().unwrap_or_default().to_string();
                self.with_users(|users| {
                    if users.contains_key(&id) {
                        return Err(SluiceError::Query(format!("duplicate key: id={id}")));
                    }
                    users.insert(id, name);
                    Ok(1)
                })?
            }
            _ if sql.starts_with("UPDATE users") => {
                let name = param(params, 0)?.as_str().unwrap_or_default().to_string();
                let id = key_of(param(params, 1)?)?;
                self.with_users(|users| match users.get_mut(&id) {
                    Some(existing) => {
                        *existing = name;
                        1
                    }
                    None => 0,
                })
            }
            _ if sql.starts_with("DELETE FROM users") => {
                let id = key_of(param(params, 0)?)?;
                self.with_users(|users| u64::from(users.remove(&id).is_some()))
            }
            _ => return Err(SluiceError::Query(format!("unsupported statement: {sql}"))),
        };
        Ok(StatementResult {
            affected_rows: affected,
        })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.enter(sql, params).await?;
        if !sql.contains("FROM users") {
            return Ok(QueryResult::new(
                vec![ColumnMeta::new("?column?", "int4", 0)],
                vec![Row::new(vec!["?column?".into()], vec![Value::Int32(1)])],
            ));
        }

        let wanted: Option<Vec<i64>> = if sql.contains("ANY(") {
            match param(params, 0)? {
                Value::Array(keys) => Some(keys.iter().map(key_of).collect::<Result<_>>()?),
                other => return Err(SluiceError::Query(format!("ANY needs an array: {other:?}"))),
            }
        } else if sql.contains(" IN (") {
            Some(params.iter().map(key_of).collect::<Result<_>>()?)
        } else if sql.contains("id = ") {
            Some(vec![key_of(param(params, 0)?)?])
        } else {
            None
        };

        let name_only = sql.starts_with("SELECT name");
        let rows: Vec<Row> = self.with_users(|users| {
            users
                .iter()
                .filter(|(id, _)| wanted.as_ref().is_none_or(|w| w.contains(id)))
                .map(|(id, name)| {
                    if name_only {
                        Row::new(vec!["name".into()], vec![Value::String(name.clone())])
                    } else {
                        // Stored as int4; callers usually bind int8.
                        Row::new(
                            vec!["id".into(), "name".into()],
                            vec![Value::Int32(*id as i32), Value::String(name.clone())],
                        )
                    }
                })
                .collect()
        });

        let columns = if name_only {
            vec![ColumnMeta::new("name", "text", 0)]
        } else {
            vec![ColumnMeta::new("id", "int4", 0), ColumnMeta::new("name", "text", 1)]
        };
        Ok(QueryResult::new(columns, rows))
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
            staged: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Manager over `db` with no retries and a pool of `max` connections
pub fn manager(db: &Arc<MockDatabase>, max: usize) -> Arc<ConnectionManager> {
    retrying_manager(db, max, 0)
}

/// Like [`manager`], retrying transient failures with a one-second base backoff
pub fn retrying_manager(db: &Arc<MockDatabase>, max: usize, retries: u32) -> Arc<ConnectionManager> {
    let pool = ConnectionPool::new(PoolConfig::new(0, max), MockFactory { db: db.clone() });
    let retry = RetryPolicy::new(retries, BackoffStrategy::new(1_000, 30_000));
    Arc::new(ConnectionManager::new(pool, retry, Duration::from_secs(5)))
}

pub fn query_cache() -> Arc<CacheStore<QueryResult>> {
    Arc::new(CacheStore::new(CacheConfig::default()))
}

pub fn ids(result: &QueryResult) -> Vec<i64> {
    result
        .rows
        .iter()
        .filter_map(|row| row.get_by_name("id").and_then(Value::as_i64))
        .collect()
}
