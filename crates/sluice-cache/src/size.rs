//! Approximate entry sizes

use serde::Serialize;
use sluice_core::Result;

/// Estimates how many bytes a value occupies
///
/// Any `Fn(&T) -> Result<usize>` closure is an estimator.
pub trait SizeEstimator<T>: Send + Sync {
    fn estimate(&self, value: &T) -> Result<usize>;
}

impl<T, F> SizeEstimator<T> for F
where
    F: Fn(&T) -> Result<usize> + Send + Sync,
{
    fn estimate(&self, value: &T) -> Result<usize> {
        self(value)
    }
}

/// Serialized JSON length times a constant factor
#[derive(Debug, Clone, Copy)]
pub struct JsonSizeEstimator {
    factor: usize,
}

impl JsonSizeEstimator {
    pub fn new(factor: usize) -> Self {
        Self {
            factor: factor.max(1),
        }
    }
}

impl Default for JsonSizeEstimator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl<T: Serialize> SizeEstimator<T> for JsonSizeEstimator {
    fn estimate(&self, value: &T) -> Result<usize> {
        let len = serde_json::to_vec(value)?.len();
        Ok(len.saturating_mul(self.factor))
    }
}
