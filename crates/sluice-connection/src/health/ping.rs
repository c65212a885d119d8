//! Database ping

use std::time::{Duration, Instant};

use sluice_core::Connection;
use thiserror::Error;

/// Result of a ping operation
pub type PingResult = Result<Duration, PingError>;

/// Error that can occur during a ping operation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PingError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Ping query failed: {0}")]
    QueryFailed(String),
    #[error("Ping timed out after {0:?}")]
    Timeout(Duration),
}

/// Ping a database connection with a trivial statement.
///
/// Returns the round-trip time, or an error if the connection is closed,
/// the query fails, or it does not answer within `timeout`.
pub async fn ping_database(conn: &dyn Connection, timeout: Duration) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    match tokio::time::timeout(timeout, conn.query("SELECT 1", &[])).await {
        Ok(Ok(_)) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(PingError::QueryFailed(e.to_string())),
        Err(_) => Err(PingError::Timeout(timeout)),
    }
}
