//! Per-shape execution statistics and the slow query log

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sluice_core::sql_preview;
use strum::{Display, EnumString};

/// Slow executions kept for inspection
pub const SLOW_QUERY_LOG_CAPACITY: usize = 100;

/// How a call was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ExecutionPath {
    Cache,
    Batch,
    Direct,
}

/// Running totals for one normalized shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStats {
    pub shape: String,
    pub executions: u64,
    pub errors: u64,
    pub cache_hits: u64,
    pub batched: u64,
    pub slow_count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub last_executed: Option<DateTime<Utc>>,
}

impl ShapeStats {
    fn new(shape: &str) -> Self {
        Self {
            shape: shape.to_string(),
            executions: 0,
            errors: 0,
            cache_hits: 0,
            batched: 0,
            slow_count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            last_executed: None,
        }
    }

    pub fn avg_duration(&self) -> Duration {
        if self.executions == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_duration.as_nanos() / u128::from(self.executions);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }

    /// Fraction of executions answered from the cache
    pub fn cache_hit_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.executions as f64
        }
    }
}

/// One execution that crossed the slow query threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    /// Shortened shape text
    pub shape: String,
    pub duration_ms: u64,
    pub path: ExecutionPath,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

/// Thread-safe registry of [`ShapeStats`]
pub struct QueryStatsRegistry {
    slow_threshold: Duration,
    shapes: Mutex<HashMap<String, ShapeStats>>,
    slow_log: Mutex<VecDeque<SlowQuery>>,
}

impl QueryStatsRegistry {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            slow_threshold,
            shapes: Mutex::new(HashMap::new()),
            slow_log: Mutex::new(VecDeque::with_capacity(SLOW_QUERY_LOG_CAPACITY)),
        }
    }

    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Record one execution of `shape`
    pub fn record(&self, shape: &str, path: ExecutionPath, elapsed: Duration, success: bool) {
        let now = Utc::now();
        let slow = elapsed >= self.slow_threshold;
        {
            let mut shapes = self.shapes.lock();
            let stats = shapes
                .entry(shape.to_string())
                .or_insert_with(|| ShapeStats::new(shape));
            stats.executions += 1;
            stats.total_duration += elapsed;
            stats.max_duration = stats.max_duration.max(elapsed);
            stats.last_executed = Some(now);
            if !success {
                stats.errors += 1;
            }
            match path {
                ExecutionPath::Cache => stats.cache_hits += 1,
                ExecutionPath::Batch => stats.batched += 1,
                ExecutionPath::Direct => {}
            }
            if slow {
                stats.slow_count += 1;
            }
        }

        if slow {
            let entry = SlowQuery {
                shape: sql_preview(shape),
                duration_ms: elapsed.as_millis() as u64,
                path,
                success,
                executed_at: now,
            };
            tracing::warn!(
                target: "sluice::slow_query",
                shape = %entry.shape,
                elapsed_ms = entry.duration_ms,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                path = %path,
                success,
                "slow query"
            );
            let mut log = self.slow_log.lock();
            log.push_front(entry);
            while log.len() > SLOW_QUERY_LOG_CAPACITY {
                log.pop_back();
            }
        }
    }

    pub fn get(&self, shape: &str) -> Option<ShapeStats> {
        self.shapes.lock().get(shape).cloned()
    }

    /// All shapes, most executed first
    pub fn snapshot(&self) -> Vec<ShapeStats> {
        let mut all: Vec<ShapeStats> = self.shapes.lock().values().cloned().collect();
        all.sort_by(|a, b| b.executions.cmp(&a.executions).then_with(|| a.shape.cmp(&b.shape)));
        all
    }

    /// Recent slow executions, newest first
    pub fn slow_queries(&self) -> Vec<SlowQuery> {
        self.slow_log.lock().iter().cloned().collect()
    }

    pub fn reset(&self) {
        self.shapes.lock().clear();
        self.slow_log.lock().clear();
    }
}

impl Default for QueryStatsRegistry {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_running_average_and_counts() {
        let registry = QueryStatsRegistry::default();
        let shape = "SELECT * FROM users WHERE id = $1";
        registry.record(shape, ExecutionPath::Direct, Duration::from_millis(10), true);
        registry.record(shape, ExecutionPath::Cache, Duration::from_millis(0), true);
        registry.record(shape, ExecutionPath::Batch, Duration::from_millis(20), false);

        let stats = registry.get(shape).expect("stats");
        assert_eq!(stats.executions, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.batched, 1);
        assert_eq!(stats.avg_duration(), Duration::from_millis(10));
        assert_eq!(stats.max_duration, Duration::from_millis(20));
        assert!(stats.last_executed.is_some());
        assert!(registry.slow_queries().is_empty());
    }

    #[test]
    fn test_average_past_u32_executions() {
        let mut stats = ShapeStats::new("SELECT 1");
        stats.executions = 1 << 32;
        stats.total_duration = Duration::from_secs(1 << 32);
        assert_eq!(stats.avg_duration(), Duration::from_secs(1));

        stats.executions = (1 << 32) + 1;
        assert!(stats.avg_duration() < Duration::from_secs(1));
    }

    #[test]
    fn test_slow_log_is_bounded() {
        let registry = QueryStatsRegistry::new(Duration::from_millis(5));
        for i in 0..(SLOW_QUERY_LOG_CAPACITY + 20) {
            registry.record(
                &format!("SELECT {i}"),
                ExecutionPath::Direct,
                Duration::from_millis(6),
                true,
            );
        }
        let slow = registry.slow_queries();
        assert_eq!(slow.len(), SLOW_QUERY_LOG_CAPACITY);
        assert_eq!(slow[0].shape, format!("SELECT {}", SLOW_QUERY_LOG_CAPACITY + 19));
        assert_eq!(registry.get("SELECT 0").map(|s| s.slow_count), Some(1));
    }

    #[test]
    fn test_snapshot_orders_by_executions() {
        let registry = QueryStatsRegistry::default();
        registry.record("a", ExecutionPath::Direct, Duration::ZERO, true);
        registry.record("b", ExecutionPath::Direct, Duration::ZERO, true);
        registry.record("b", ExecutionPath::Direct, Duration::ZERO, true);
        let shapes: Vec<String> = registry.snapshot().into_iter().map(|s| s.shape).collect();
        assert_eq!(shapes, vec!["b".to_string(), "a".to_string()]);

        registry.reset();
        assert!(registry.snapshot().is_empty());
    }
}
