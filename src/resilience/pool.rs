//! Bounded connection pool over a [`ProviderConnector`].
//!
//! At most `max_open_conns` connections are checked out at once; up to
//! `max_idle_conns` returned connections are kept for reuse. A timer
//! health-checks idle connections and evicts unhealthy ones; replacements
//! are opened lazily by the next `acquire`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolSettings;
use crate::provider::{ProviderConnector, ProviderError, SchemaProvider};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// No slot became free within the acquire timeout.
    #[error("connection pool exhausted after waiting {0:?}")]
    Exhausted(Duration),

    #[error("failed to open connection: {0}")]
    Connect(ProviderError),
}

struct PoolInner {
    connector: Arc<dyn ProviderConnector>,
    slots: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<dyn SchemaProvider>>>,
    max_open: usize,
    max_idle: usize,
    acquire_timeout: Duration,
    opened: AtomicU64,
    evicted: AtomicU64,
}

/// Pool snapshot for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub idle: usize,
    pub opened: u64,
    pub evicted: u64,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.inner.connector.endpoint())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn ProviderConnector>, settings: &PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                slots: Arc::new(Semaphore::new(settings.max_open_conns)),
                idle: Mutex::new(Vec::new()),
                max_open: settings.max_open_conns,
                max_idle: settings.max_idle_conns,
                acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
                opened: AtomicU64::new(0),
                evicted: AtomicU64::new(0),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.inner.connector.endpoint()
    }

    /// Check out a connection, reusing an idle one when available.
    ///
    /// Cancelling the returned future releases the reserved slot.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        let permit = tokio::time::timeout(inner.acquire_timeout, inner.slots.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::Exhausted(inner.acquire_timeout))?
            .map_err(|_| PoolError::Exhausted(Duration::ZERO))?;

        let reused = inner.lock_idle().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                let conn = inner.connector.connect().await.map_err(PoolError::Connect)?;
                inner.opened.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %inner.connector.endpoint(), "opened pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn,
            pool: self.inner.clone(),
            _permit: permit,
            broken: false,
        })
    }

    /// Health-check every idle connection and drop the unhealthy ones.
    /// Returns how many were evicted.
    pub async fn check_idle(&self) -> usize {
        let candidates: Vec<_> = std::mem::take(&mut *self.inner.lock_idle());
        let checks = candidates.iter().map(|conn| conn.health_check());
        let results = futures::future::join_all(checks).await;

        let mut evicted = 0;
        let mut healthy = Vec::with_capacity(candidates.len());
        for (conn, ok) in candidates.into_iter().zip(results) {
            if ok {
                healthy.push(conn);
            } else {
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.inner.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::warn!(endpoint = %self.endpoint(), evicted, "evicted unhealthy connections");
        }

        let mut idle = self.inner.lock_idle();
        for conn in healthy {
            if idle.len() < self.inner.max_idle {
                idle.push(conn);
            }
        }
        evicted
    }

    /// Run [`ConnectionPool::check_idle`] every `interval` until `token` is cancelled.
    pub fn spawn_health_checks(&self, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        pool.check_idle().await;
                    }
                }
            }
            tracing::debug!(endpoint = %pool.endpoint(), "pool health checks stopped");
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            in_use: self.inner.max_open - self.inner.slots.available_permits(),
            idle: self.inner.lock_idle().len(),
            opened: self.inner.opened.load(Ordering::Relaxed),
            evicted: self.inner.evicted.load(Ordering::Relaxed),
        }
    }
}

impl PoolInner {
    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn SchemaProvider>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out connection. Returned to the pool on drop unless marked broken.
pub struct PooledConnection {
    conn: Arc<dyn SchemaProvider>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
    broken: bool,
}

impl PooledConnection {
    /// Shared handle to the underlying provider.
    pub fn provider(&self) -> Arc<dyn SchemaProvider> {
        self.conn.clone()
    }

    /// Do not return this connection to the pool.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.broken {
            self.pool.evicted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut idle = self.pool.lock_idle();
        if idle.len() < self.pool.max_idle {
            idle.push(self.conn.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemoryConnector, MemoryProvider};

    fn pool(max_open: usize, max_idle: usize) -> (ConnectionPool, MemoryConnector) {
        let connector = MemoryConnector::new("mem", Arc::new(MemoryProvider::new()));
        let settings = PoolSettings {
            max_open_conns: max_open,
            max_idle_conns: max_idle,
            health_check_interval_seconds: 30,
            acquire_timeout_ms: 50,
        };
        (ConnectionPool::new(Arc::new(connector.clone()), &settings), connector)
    }

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let (pool, connector) = pool(2, 2);
        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_open_connections() {
        let (pool, _) = pool(1, 1);
        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().in_use, 1);

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(_)));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_connection_not_reused() {
        let (pool, connector) = pool(2, 2);
        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);
        assert_eq!(pool.stats().idle, 0);

        drop(pool.acquire().await.unwrap());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_connections_evicted() {
        let (pool, connector) = pool(2, 2);
        drop(pool.acquire().await.unwrap());
        connector.provider().set_healthy(false);

        assert_eq!(pool.check_idle().await, 1);
        assert_eq!(pool.stats().idle, 0);

        connector.provider().set_healthy(true);
        drop(pool.acquire().await.unwrap());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_releases_slot() {
        let (pool, _) = pool(1, 1);
        let fut = pool.acquire();
        drop(fut);
        assert_eq!(pool.stats().in_use, 0);
    }
}
