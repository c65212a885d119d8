//! Sluice Core - shared abstractions for the persistence layer
//!
//! This crate provides the vocabulary every other Sluice crate speaks:
//!
//! - `Connection` - The driver boundary: run a statement, return rows
//! - `Value`, `Row`, `QueryResult` - Database values and result sets
//! - `StatementKind` - Lightweight statement classification
//! - `SluiceError` - The error taxonomy shared by pool, cache and optimizer

mod connection;
mod error;
mod statement;
mod types;

pub use connection::*;
pub use error::*;
pub use statement::*;
pub use types::*;
