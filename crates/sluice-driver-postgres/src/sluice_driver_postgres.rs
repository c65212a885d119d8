//! PostgreSQL adapter for the Sluice driver boundary
//!
//! [`PostgresConnectionFactory`] plugs into the connection pool and opens
//! [`PostgresConnection`]s over `tokio-postgres`, optionally through
//! native-tls. Parameters are coerced to the types the server reports for
//! the prepared statement, so an `Int64` bound against an `int4` column (or
//! an array bound to `= ANY($1)`) is encoded with the width PostgreSQL
//! expects.

mod config;
mod connection;
mod tls;
mod values;

pub use config::PostgresConfig;
pub use connection::{PostgresConnection, PostgresConnectionFactory};
pub use tls::{SslMode, TlsError, TlsSettings, build_tls_connector};
