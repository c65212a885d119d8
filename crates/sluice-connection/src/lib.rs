//! Sluice Connection - the Connection Pool Manager
//!
//! This crate owns physical database sessions. It hands them out through
//! scoped acquisition, retries standalone statements with exponential
//! backoff, and runs multi-statement transactions on one exclusively held
//! connection.

pub mod health;
mod manager;
pub mod pool;
pub mod retry;
mod transaction;

pub use health::{
    HealthCheckConfig, HealthCheckResult, HealthChecker, HealthStatus, HealthThresholds,
    PingError, PingResult, ping_database,
};
pub use manager::{ConnectionManager, ExecuteOptions};
pub use pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use retry::{BackoffStrategy, RetryEvent, RetryPolicy};
pub use transaction::Transaction;
