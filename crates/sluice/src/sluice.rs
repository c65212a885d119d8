//! Sluice - pooled, cached and batched database access
//!
//! A process builds one [`PersistenceLayer`] at startup and hands it (behind
//! an `Arc`) to everything that talks to the database. The layer owns three
//! parts:
//!
//! - the connection pool manager ([`sluice_connection`]): bounded pool,
//!   retry with backoff, transactions, health checks
//! - the cache strategy engine ([`sluice_cache`]): memory-bounded stores
//!   with LRU, LFU or TTL eviction
//! - the query optimizer/batcher ([`sluice_query`]): shape statistics,
//!   result caching and request coalescing
//!
//! Drivers plug in through [`ConnectionFactory`]; PostgreSQL support lives
//! in `sluice-driver-postgres`.
//!
//! ```ignore
//! let factory = PostgresConnectionFactory::new(PostgresConfig::parse(&url)?);
//! let layer = PersistenceLayer::start(SluiceConfig::from_env()?, factory).await?;
//!
//! let user = layer
//!     .execute_optimized("SELECT * FROM users WHERE id = $1", &[7.into()], &QueryOptions::batched())
//!     .await?;
//! ```

pub mod config;
mod layer;
pub mod logging;

pub use config::{
    CacheSettings, Environment, HealthSettings, OptimizerSettings, PoolSettings, SluiceConfig,
};
pub use layer::{CacheReport, PersistenceLayer};

pub use sluice_cache::{CacheStats, EvictionPolicy, SetOptions};
pub use sluice_connection::{
    ConnectionFactory, ExecuteOptions, HealthCheckResult, HealthStatus, PoolStats,
    PooledConnection, Transaction,
};
pub use sluice_core::{
    ColumnMeta, Connection, QueryResult, Result, Row, SluiceError, StatementResult, Value,
};
pub use sluice_query::{
    BatchExecutionResult, BatchOptions, BatchResult, BatchStatement, ExecutionMode, QueryOptions,
    ShapeStats, SlowQuery, StatementError, StatementStatus,
};
