//! Batched execution
//!
//! Two forms live here:
//!
//! - [`BatchCoalescer`] collects concurrent calls that share a shape for a
//!   short window and answers them with one round-trip (equality lookups)
//!   or one transaction (writes).
//! - [`BatchExecutor`] runs an explicit list of statements sequentially,
//!   transactionally or in parallel.

mod coalescer;
mod executor;
mod rewrite;

pub use coalescer::{BatchCoalescer, BatchConfig};
pub use executor::{
    BatchExecutionResult, BatchExecutor, BatchOptions, BatchResult, BatchStatement,
    ExecutionMode, StatementError, StatementStatus,
};
pub use rewrite::{distinct_keys, rewrite_lookup, rows_for_key};
