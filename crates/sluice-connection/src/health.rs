//! Health check functionality for pooled connections
//!
//! # Example
//!
//! ```ignore
//! use sluice_connection::health::{ping_database, HealthStatus};
//!
//! let latency = ping_database(&*conn, Duration::from_secs(2)).await?;
//! let status = HealthStatus::from_latency(latency);
//! ```

mod checker;
mod ping;
mod status;


pub use checker::{HealthCheckConfig, HealthCheckResult, HealthChecker};
pub use ping::{PingError, PingResult, ping_database};
pub use status::{HealthStatus, HealthThresholds};
