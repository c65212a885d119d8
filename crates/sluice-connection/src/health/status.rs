use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the database looked on the last ping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Answering, but slowly
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Grade a successful ping with the default 100ms / 500ms cut-offs
    pub fn from_latency(latency: Duration) -> Self {
        HealthThresholds::default().classify(latency)
    }

    pub fn from_latency_with_thresholds(latency: Duration, thresholds: &HealthThresholds) -> Self {
        thresholds.classify(latency)
    }

    /// Statements can still be sent
    pub fn is_usable(&self) -> bool {
        *self != HealthStatus::Unhealthy
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

/// Latency cut-offs between the three statuses, both inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub healthy_threshold: Duration,
    pub degraded_threshold: Duration,
}

impl HealthThresholds {
    /// `degraded_ms` below `healthy_ms` is raised to it
    pub fn new(healthy_ms: u64, degraded_ms: u64) -> Self {
        let healthy_threshold = Duration::from_millis(healthy_ms);
        Self {
            healthy_threshold,
            degraded_threshold: Duration::from_millis(degraded_ms).max(healthy_threshold),
        }
    }

    pub fn classify(&self, latency: Duration) -> HealthStatus {
        match latency {
            l if l <= self.healthy_threshold => HealthStatus::Healthy,
            l if l <= self.degraded_threshold => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self::new(100, 500)
    }
}
