//! Connection pool implementation

use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use sluice_core::{Connection, Result, SluiceError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use super::config::PoolConfig;
use super::stats::PoolStats;

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that an idle connection is still usable
    ///
    /// Default implementation only checks that the connection is open.
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }
}

/// An idle connection with its lifecycle metadata
struct IdleConnection {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    idle_since: Instant,
}

/// One unit of a pool counter, given back on drop unless kept
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }

    /// Leave the unit counted; someone else now owns the decrement
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection pool that manages a bounded set of database connections
///
/// A semaphore with `max_size` permits bounds the number of connections in
/// use. Connections are returned to the idle queue when the
/// `PooledConnection` guard is dropped, on every exit path.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<VecDeque<IdleConnection>>,
    semaphore: Arc<Semaphore>,
    /// Connections currently borrowed from the pool
    active_count: AtomicUsize,
    /// Callers suspended on a saturated pool
    waiting_count: AtomicUsize,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size()));
        Self {
            config,
            factory: Arc::new(factory),
            idle: Mutex::new(VecDeque::new()),
            semaphore,
            active_count: AtomicUsize::new(0),
            waiting_count: AtomicUsize::new(0),
        }
    }

    /// Get a connection from the pool
    ///
    /// This will:
    /// 1. Take a permit, suspending (and counting as waiting) only if the
    ///    pool is saturated, for at most the acquire timeout
    /// 2. Reuse a valid idle connection if there is one
    /// 3. Otherwise create a new connection
    ///
    /// Returns `Timeout` if no permit frees up in time.
    pub async fn get(&self) -> Result<PooledConnection<'_>> {
        let permit = self.acquire_permit().await?;

        // The permit counts as active from here on, including while a
        // connection is validated or opened. A failed create drops both.
        let (slot, candidate) = {
            let mut idle = self.idle.lock();
            (CountGuard::enter(&self.active_count), idle.pop_front())
        };

        let (connection, created_at) = match self.reuse_idle(candidate).await {
            Some(found) => found,
            None => {
                let connection = self.factory.create().await?;
                tracing::debug!(driver = connection.driver_name(), "opened pooled connection");
                (connection, Instant::now())
            }
        };
        slot.keep();

        Ok(PooledConnection {
            connection,
            created_at,
            broken: AtomicBool::new(false),
            pool: self,
            _permit: permit,
        })
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(Self::closed_error()),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _waiting = CountGuard::enter(&self.waiting_count);
        let timeout = self.config.acquire_timeout();

        // Dropping the acquire future on timeout hands back any permit that
        // was granted in the race.
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(Self::closed_error()),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    max = self.config.max_size(),
                    "timed out waiting for a pooled connection"
                );
                Err(SluiceError::Timeout(format!(
                    "Timed out waiting for connection (timeout: {:?})",
                    timeout
                )))
            }
        }
    }

    fn closed_error() -> SluiceError {
        SluiceError::PoolClosed
    }

    /// First usable idle connection, starting from `candidate`. Expired,
    /// stale and invalid ones are closed on the way.
    async fn reuse_idle(
        &self,
        mut candidate: Option<IdleConnection>,
    ) -> Option<(Arc<dyn Connection>, Instant)> {
        while let Some(idle) = candidate {
            let expired = self
                .config
                .max_lifetime()
                .is_some_and(|max| idle.created_at.elapsed() > max);
            let stale = idle.idle_since.elapsed() > self.config.idle_timeout();

            if !expired && !stale && self.factory.validate(&*idle.connection).await {
                return Some((idle.connection, idle.created_at));
            }

            tracing::debug!(expired, stale, "discarding idle connection");
            let _ = idle.connection.close().await;
            candidate = self.idle.lock().pop_front();
        }
        None
    }

    /// Return a connection to the pool
    fn return_connection(&self, connection: Arc<dyn Connection>, created_at: Instant, broken: bool) {
        let mut idle = self.idle.lock();
        self.active_count.fetch_sub(1, Ordering::SeqCst);

        if broken {
            drop(idle);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = connection.close().await;
                });
            }
            return;
        }

        if connection.is_closed() || self.semaphore.is_closed() {
            return;
        }

        idle.push_back(IdleConnection {
            connection,
            created_at,
            idle_since: Instant::now(),
        });
    }

    /// Open connections until `min_size` are available
    ///
    /// Each connection is opened under a permit and counted as active until
    /// it is parked, so warm-up never pushes the pool past `max_size`. It
    /// stops early when every permit is taken.
    pub async fn warm_up(&self) -> Result<usize> {
        let mut opened = 0;
        loop {
            let _permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::Closed) => return Err(Self::closed_error()),
                Err(TryAcquireError::NoPermits) => break,
            };
            let slot = {
                let idle = self.idle.lock();
                if idle.len() + self.active_count.load(Ordering::SeqCst) >= self.config.min_size() {
                    break;
                }
                CountGuard::enter(&self.active_count)
            };

            let connection = self.factory.create().await?;
            let now = Instant::now();
            let mut idle = self.idle.lock();
            drop(slot);
            idle.push_back(IdleConnection {
                connection,
                created_at: now,
                idle_since: now,
            });
            opened += 1;
        }
        if opened > 0 {
            tracing::debug!(opened, min = self.config.min_size(), "pool warmed up");
        }
        Ok(opened)
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock();
        let active = self.active_count.load(Ordering::SeqCst);
        let waiting = self.waiting_count.load(Ordering::SeqCst);
        PoolStats::new(idle.len(), active, waiting, self.config.max_size())
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Close all idle connections in the pool
    pub async fn close_idle(&self) {
        let connections: Vec<_> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };

        for inner in connections {
            let _ = inner.connection.close().await;
        }
    }

    /// Stop handing out connections and close the idle ones
    ///
    /// Borrowed connections are closed instead of recycled once released.
    pub async fn close(&self) {
        self.semaphore.close();
        self.close_idle().await;
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

/// A connection borrowed from the pool
///
/// When dropped, the connection is automatically returned to the pool,
/// or closed if it was marked broken.
pub struct PooledConnection<'a> {
    connection: Arc<dyn Connection>,
    created_at: Instant,
    broken: AtomicBool,
    pool: &'a ConnectionPool,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection<'_> {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.pool.return_connection(
            self.connection.clone(),
            self.created_at,
            self.broken.load(Ordering::SeqCst),
        );
    }
}

impl PooledConnection<'_> {
    /// Get the underlying connection as an Arc
    pub fn inner(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Close this connection on release instead of recycling it
    ///
    /// Used when the session state is unknown, e.g. after a statement was
    /// abandoned by a timeout or a rollback failed.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }
}
