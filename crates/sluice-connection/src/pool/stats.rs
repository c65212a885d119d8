//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a connection pool's state
///
/// Invariants: `idle + active <= max`, and `waiting > 0` only while every
/// permit is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total number of connections (idle + active)
    total: usize,
    /// Number of idle connections available in the pool
    idle: usize,
    /// Number of connections currently in use
    active: usize,
    /// Number of callers suspended waiting for a connection
    waiting: usize,
    /// Configured maximum pool size
    max: usize,
}

impl PoolStats {
    /// Create new pool statistics
    pub fn new(idle: usize, active: usize, waiting: usize, max: usize) -> Self {
        Self {
            total: idle + active,
            idle,
            active,
            waiting,
            max,
        }
    }

    /// Get the total number of connections
    pub fn total(&self) -> usize {
        self.total
    }

    /// Get the number of idle connections
    pub fn idle(&self) -> usize {
        self.idle
    }

    /// Get the number of active (in-use) connections
    pub fn active(&self) -> usize {
        self.active
    }

    /// Get the number of waiting callers
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Get the configured maximum
    pub fn max(&self) -> usize {
        self.max
    }

    /// Active connections as a fraction of the configured maximum (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            self.active as f64 / self.max as f64
        }
    }

    /// Check if every connection the pool may open is in use
    pub fn is_full(&self) -> bool {
        self.max > 0 && self.active >= self.max
    }
}

impl Default for PoolStats {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}
