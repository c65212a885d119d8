//! Retry with exponential backoff
//!
//! Standalone statements are retried by the pool manager through a
//! [`RetryPolicy`]. Transactions are never retried here; the caller decides
//! whether to run the whole transaction again.
//!
//! # Example
//!
//! ```ignore
//! use sluice_connection::retry::{BackoffStrategy, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, BackoffStrategy::new(1000, 30_000));
//! let rows = policy
//!     .run("load_user", |_attempt| async { manager_call().await })
//!     .await?;
//! ```

mod backoff;
mod policy;


pub use backoff::BackoffStrategy;
pub use policy::{RetryEvent, RetryPolicy};
