//! Background expiry sweep

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::store::CacheStore;

/// Handle to a running sweeper task
///
/// Dropping the handle cancels the task.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweep and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "cache sweeper task failed");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Periodically purge expired entries from `store`.
///
/// The task holds only a weak reference and exits once the store is
/// dropped. Must be called from within a Tokio runtime.
pub fn spawn_sweeper<T>(store: &Arc<CacheStore<T>>, interval: Duration) -> SweeperHandle
where
    T: Clone + Send + Sync + 'static,
{
    let cancel = CancellationToken::new();
    let weak: Weak<CacheStore<T>> = Arc::downgrade(store);
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(store) = weak.upgrade() else { break };
                    let removed = store.sweep_expired();
                    if removed > 0 {
                        let stats = store.stats();
                        tracing::debug!(
                            removed,
                            entries = stats.entry_count,
                            memory_usage = stats.memory_usage,
                            "cache sweep removed expired entries"
                        );
                    }
                }
            }
        }
        tracing::trace!("cache sweeper stopped");
    });

    SweeperHandle {
        cancel,
        task: Some(task),
    }
}
