//! Current-pool cell with atomic swap on rebuild: `RwLock<Arc<ConnectionPool>>`.

use crate::config::ConnectionConfig;
use crate::database::pool::{ConnectionPool, PoolStatus, PooledConnection};
use crate::database::traits::Connector;
use crate::error::{PoolError, PoolResult};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    pool: RwLock<Arc<ConnectionPool>>,
    generations: AtomicU64,
}

impl ConnectionManager {
    /// Creates a manager around a lazy pool for `config`. Nothing is opened yet.
    pub fn new(connector: Arc<dyn Connector>, config: Arc<ConnectionConfig>) -> Self {
        let pool = Arc::new(ConnectionPool::new(config, Arc::clone(&connector), 1));
        Self {
            connector,
            pool: RwLock::new(pool),
            generations: AtomicU64::new(1),
        }
    }

    pub fn current(&self) -> Arc<ConnectionPool> {
        Arc::clone(&self.pool.read())
    }

    /// Config the current pool is bound to.
    pub fn config(&self) -> Arc<ConnectionConfig> {
        Arc::clone(self.current().config())
    }

    pub fn status(&self) -> PoolStatus {
        self.current().status()
    }

    /// Opens `pool_min` idle connections on the current pool.
    pub async fn warm_up(&self) -> PoolResult<u32> {
        self.current().warm_up().await
    }

    /// Leases a connection from the current pool.
    ///
    /// A pool retired while this call was waiting redirects the call to its
    /// replacement; the overall wait still ends at `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> PoolResult<PooledConnection> {
        let deadline = Instant::now() + timeout;
        loop {
            let pool = self.current();
            let remaining = deadline.saturating_duration_since(Instant::now());
            match pool.acquire(remaining).await {
                Err(PoolError::Closed) if !Arc::ptr_eq(&pool, &self.current()) => {
                    debug!(
                        retired = pool.generation(),
                        "Pool retired while acquiring, retrying on current pool"
                    );
                }
                other => return other,
            }
        }
    }

    /// Builds a pool for `config`, proves it with a trial connection, installs it and
    /// retires the previous pool.
    ///
    /// Leases already taken from the previous pool keep working; its connections close
    /// as they come back. On error nothing is swapped.
    pub async fn rebuild(&self, config: Arc<ConnectionConfig>) -> PoolResult<Arc<ConnectionPool>> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let pool = Arc::new(ConnectionPool::new(
            config,
            Arc::clone(&self.connector),
            generation,
        ));

        if let Err(e) = pool.trial().await {
            warn!(generation, error = %e, "Trial connection failed, keeping current pool");
            pool.retire();
            return Err(e);
        }
        if let Err(e) = pool.warm_up().await {
            warn!(generation, error = %e, "Warm-up incomplete for new pool");
        }

        let previous = std::mem::replace(&mut *self.pool.write(), Arc::clone(&pool));
        info!(
            generation,
            previous = previous.generation(),
            connector = self.connector.name(),
            host = %pool.config().host,
            port = pool.config().port,
            "Connection pool rebuilt"
        );
        previous.retire();
        Ok(pool)
    }

    /// Retires the current pool. Later acquires fail with `Closed`.
    pub fn shutdown(&self) {
        self.current().retire();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("pool", &*self.pool.read())
            .finish()
    }
}
