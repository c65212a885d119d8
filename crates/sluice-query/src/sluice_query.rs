//! Sluice Query - the Query Optimizer/Batcher
//!
//! Every optimized call gets a [`QueryPlan`]: its normalized shape, a cost
//! estimate, whether its result may be cached, and whether it is a simple
//! equality lookup that concurrent callers can share. The
//! [`QueryOptimizer`] then answers the call from the cache, coalesces it
//! through the [`BatchCoalescer`], or runs it directly on the pool.

pub mod batch;
mod cost;
mod optimizer;
pub mod parameters;
mod plan;
mod shape;
mod stats;

#[cfg(test)]
mod test_helpers;

pub use batch::{
    BatchCoalescer, BatchConfig, BatchExecutionResult, BatchExecutor, BatchOptions, BatchResult,
    BatchStatement, ExecutionMode, StatementError, StatementStatus,
};
pub use cost::estimate_cost;
pub use optimizer::{OptimizerConfig, QueryOptimizer, QueryOptions};
pub use parameters::{PlaceholderStyle, Placeholders, validate_parameters};
pub use plan::{EqualityLookup, QueryPlan, referenced_tables};
pub use shape::{fingerprint, normalize_shape};
pub use stats::{ExecutionPath, QueryStatsRegistry, SLOW_QUERY_LOG_CAPACITY, ShapeStats, SlowQuery};
