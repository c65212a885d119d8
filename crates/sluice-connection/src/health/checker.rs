//! Health checker that tracks consecutive failures across checks

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::ping::ping_database;
use super::status::{HealthStatus, HealthThresholds};
use crate::pool::ConnectionPool;

/// Configuration for health checking
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between periodic checks
    pub check_interval: Duration,
    /// Thresholds for classifying health status
    pub thresholds: HealthThresholds,
    /// Timeout for each ping
    pub ping_timeout: Duration,
    /// Number of consecutive failures before the pool counts as unhealthy
    pub failure_threshold: u32,
}

impl HealthCheckConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            check_interval: interval,
            thresholds: HealthThresholds::default(),
            ping_timeout: Duration::from_secs(2),
            failure_threshold: 3,
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Result of a single health check
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    /// Latency of the ping, if successful
    pub latency: Option<Duration>,
    /// Error message if the check failed
    pub error: Option<String>,
    pub checked_at: Instant,
    /// Number of consecutive failures (0 if the check succeeded)
    pub consecutive_failures: u32,
}

impl HealthCheckResult {
    pub fn success(latency: Duration, thresholds: &HealthThresholds) -> Self {
        Self {
            status: HealthStatus::from_latency_with_thresholds(latency, thresholds),
            latency: Some(latency),
            error: None,
            checked_at: Instant::now(),
            consecutive_failures: 0,
        }
    }

    pub fn failure(error: String, consecutive_failures: u32) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency: None,
            error: Some(error),
            checked_at: Instant::now(),
            consecutive_failures,
        }
    }

    /// Whether the ping answered at all
    pub fn is_alive(&self) -> bool {
        self.error.is_none()
    }
}

/// Health checker for a connection pool.
pub struct HealthChecker {
    config: HealthCheckConfig,
    consecutive_failures: AtomicU32,
    last_status: Mutex<HealthStatus>,
}

impl HealthChecker {
    pub fn new(config: HealthCheckConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            last_status: Mutex::new(HealthStatus::Healthy),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn last_status(&self) -> HealthStatus {
        *self.last_status.lock()
    }

    /// Borrow a connection from the pool and ping it.
    ///
    /// A connection that fails the ping is closed instead of recycled.
    pub async fn check_pool(&self, pool: &ConnectionPool) -> HealthCheckResult {
        let outcome = match pool.get().await {
            Ok(conn) => {
                let ping = ping_database(&*conn, self.config.ping_timeout).await;
                if ping.is_err() {
                    conn.mark_broken();
                }
                ping.map_err(|e| e.to_string())
            }
            Err(e) => Err(e.to_string()),
        };

        let result = match outcome {
            Ok(latency) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                HealthCheckResult::success(latency, &self.config.thresholds)
            }
            Err(error) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(error = %error, consecutive_failures = failures, "health check failed");
                HealthCheckResult::failure(error, failures)
            }
        };

        *self.last_status.lock() = result.status;
        result
    }

    /// True once consecutive failures reach the configured threshold.
    pub fn should_mark_unhealthy(&self) -> bool {
        self.consecutive_failures() >= self.config.failure_threshold
    }

    pub fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.last_status.lock() = HealthStatus::Healthy;
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthCheckConfig::default())
    }
}
