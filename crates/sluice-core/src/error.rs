//! Error types for Sluice

use std::sync::Arc;
use thiserror::Error;

/// Core error type for Sluice operations
///
/// The type is `Clone` so that a single failure (a rolled back write group,
/// for instance) can be delivered to every caller that shared it.
#[derive(Error, Debug, Clone)]
pub enum SluiceError {
    /// The pool could not provide a connection, or a statement kept failing
    /// after every retry.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Arc<SluiceError>>,
    },

    /// The pool was shut down and hands out no more connections
    #[error("Connection error: connection pool is closed")]
    PoolClosed,

    /// A statement or a connection acquisition exceeded its deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The request was malformed before any I/O happened
    #[error("Validation error: {0}")]
    Validation(String),

    /// A single cache entry is larger than the whole memory budget
    #[error("Cache capacity exceeded: entry '{key}' needs {size} bytes, budget is {budget} bytes")]
    CacheCapacity {
        key: String,
        size: usize,
        budget: usize,
    },

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Connection error without an underlying cause
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Final error for a standalone statement that failed on every attempt.
    ///
    /// Timeouts stay timeouts so callers can tell a slow database from an
    /// unreachable one.
    pub fn retries_exhausted(attempts: u32, last: SluiceError) -> Self {
        if last.is_timeout() {
            return last;
        }
        Self::Connection {
            message: format!("statement failed after {} attempt(s): {}", attempts, last),
            source: Some(Arc::new(last)),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Whether running the same operation again could produce a different outcome
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Validation(_)
                | Self::PoolClosed
                | Self::Cancelled
                | Self::NotSupported(_)
                | Self::Configuration(_)
                | Self::CacheCapacity { .. }
        )
    }

    /// The innermost cause carried by a `Connection` error, or `self`
    pub fn root_cause(&self) -> &SluiceError {
        match self {
            Self::Connection {
                source: Some(inner),
                ..
            } => inner.root_cause(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for SluiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SluiceError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(format!("IO error: {}", err))
    }
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_retries_exhausted_wraps_last_cause() {
        let err = SluiceError::retries_exhausted(4, SluiceError::Query("relation missing".into()));
        match &err {
            SluiceError::Connection { message, source } => {
                assert!(message.contains("4 attempt(s)"));
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.root_cause().to_string(),
            "Query error: relation missing"
        );
    }

    #[test]
    fn test_retries_exhausted_keeps_timeouts_distinct() {
        let err = SluiceError::retries_exhausted(2, SluiceError::Timeout("slow".into()));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(SluiceError::connection("reset").is_retryable());
        assert!(SluiceError::Timeout("x".into()).is_retryable());
        assert!(SluiceError::Query("deadlock".into()).is_retryable());
        assert!(!SluiceError::Validation("x".into()).is_retryable());
        assert!(!SluiceError::Cancelled.is_retryable());
        assert!(!SluiceError::PoolClosed.is_retryable());
    }
}
