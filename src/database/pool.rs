//! Bounded connection pool with exclusive leases.
//!
//! Lease concurrency is bounded by a FIFO semaphore holding `pool_max` permits. Each
//! lease owns one permit and one live slot; idle connections hold neither a permit nor
//! a lease, so `live = idle + leased` and `live <= pool_max` always hold.

use crate::config::ConnectionConfig;
use crate::database::result::QueryResult;
use crate::database::traits::{Connector, DatabaseConnection};
use crate::error::{ExecError, ExecResult, PoolError, PoolResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Pool metrics for monitoring.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    pub connections_created: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connect_errors: AtomicU64,
    pub health_check_failures: AtomicU64,
    pub leases_granted: AtomicU64,
    pub exhausted: AtomicU64,
    pub queries_executed: AtomicU64,
    pub query_errors: AtomicU64,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connect_errors: self.connect_errors.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            leases_granted: self.leases_granted.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of pool metrics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetricsSnapshot {
    pub connections_created: u64,
    pub connections_closed: u64,
    pub connect_errors: u64,
    pub health_check_failures: u64,
    pub leases_granted: u64,
    pub exhausted: u64,
    pub queries_executed: u64,
    pub query_errors: u64,
}

/// Pool status information.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub generation: u64,
    pub max: u32,
    pub live: u32,
    pub idle: u32,
    pub leased: u32,
    pub retired: bool,
    pub metrics: PoolMetricsSnapshot,
}

struct IdleConnection {
    conn: Box<dyn DatabaseConnection>,
    session_database: Option<String>,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    live: u32,
    retired: bool,
}

/// A bounded set of connections bound to one config snapshot.
pub struct ConnectionPool {
    generation: u64,
    config: Arc<ConnectionConfig>,
    connector: Arc<dyn Connector>,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    metrics: PoolMetrics,
}

impl ConnectionPool {
    /// Creates an empty pool. No connection is opened until [`trial`](Self::trial),
    /// [`warm_up`](Self::warm_up) or the first acquire.
    pub fn new(config: Arc<ConnectionConfig>, connector: Arc<dyn Connector>, generation: u64) -> Self {
        let max = config.pool_max as usize;
        Self {
            generation,
            config,
            connector,
            permits: Arc::new(Semaphore::new(max)),
            state: Mutex::new(PoolState::default()),
            metrics: PoolMetrics::new(),
        }
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let idle = state.idle.len() as u32;
        PoolStatus {
            generation: self.generation,
            max: self.config.pool_max,
            live: state.live,
            idle,
            leased: state.live.saturating_sub(idle),
            retired: state.retired,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Leases a connection, waiting at most `timeout` for a free slot.
    ///
    /// A zero timeout never waits. An idle connection is pinged first; if the ping fails
    /// it is discarded and a fresh connection opened in its place.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolExhausted`] if no slot frees up in time
    /// - [`PoolError::ConnectFailed`] if a new connection cannot be opened
    /// - [`PoolError::Closed`] if the pool is retired
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> PoolResult<PooledConnection> {
        let started = Instant::now();
        let permit = self.wait_for_permit(timeout, started).await?;

        let mut lease = {
            let mut state = self.state.lock();
            if state.retired {
                return Err(PoolError::Closed);
            }
            match state.idle.pop_back() {
                Some(idle) => PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(idle.conn),
                    session_database: idle.session_database,
                    healthy: false,
                    _permit: permit,
                },
                None => {
                    state.live += 1;
                    PooledConnection {
                        pool: Arc::clone(self),
                        conn: None,
                        session_database: None,
                        healthy: false,
                        _permit: permit,
                    }
                }
            }
        };

        if let Some(conn) = lease.conn.as_mut() {
            match conn.ping().await {
                Ok(()) => lease.healthy = true,
                Err(e) => {
                    warn!(generation = self.generation, error = %e, "Idle connection failed health check, replacing");
                    PoolMetrics::bump(&self.metrics.health_check_failures);
                    if let Some(stale) = lease.conn.take() {
                        self.close_in_background(stale);
                    }
                    lease.session_database = None;
                }
            }
        }

        if lease.conn.is_none() {
            let conn = self.open_connection().await?;
            lease.conn = Some(conn);
            lease.session_database = self.config.default_database.clone();
            lease.healthy = true;
        }

        PoolMetrics::bump(&self.metrics.leases_granted);
        debug!(
            generation = self.generation,
            waited_ms = started.elapsed().as_millis() as u64,
            "Connection leased"
        );
        Ok(lease)
    }

    async fn wait_for_permit(&self, timeout: Duration, started: Instant) -> PoolResult<OwnedSemaphorePermit> {
        let result = if timeout.is_zero() {
            Arc::clone(&self.permits)
                .try_acquire_owned()
                .map_err(|e| match e {
                    TryAcquireError::Closed => PoolError::Closed,
                    TryAcquireError::NoPermits => self.exhausted(started),
                })
        } else {
            match tokio::time::timeout(timeout, Arc::clone(&self.permits).acquire_owned()).await {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(PoolError::Closed),
                Err(_) => Err(self.exhausted(started)),
            }
        };
        if let Err(PoolError::PoolExhausted { waited_ms, .. }) = &result {
            warn!(generation = self.generation, max = self.config.pool_max, waited_ms, "Connection pool exhausted");
        }
        result
    }

    fn exhausted(&self, started: Instant) -> PoolError {
        PoolMetrics::bump(&self.metrics.exhausted);
        PoolError::PoolExhausted {
            max_size: self.config.pool_max,
            waited_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn open_connection(&self) -> PoolResult<Box<dyn DatabaseConnection>> {
        match self.connector.connect(&self.config).await {
            Ok(conn) => {
                PoolMetrics::bump(&self.metrics.connections_created);
                Ok(conn)
            }
            Err(e) => {
                PoolMetrics::bump(&self.metrics.connect_errors);
                warn!(
                    generation = self.generation,
                    host = %self.config.host,
                    port = self.config.port,
                    error = %e,
                    "Failed to open connection"
                );
                Err(e)
            }
        }
    }

    /// Opens one connection to prove the config works and keeps it idle.
    pub async fn trial(&self) -> PoolResult<()> {
        self.open_idle().await
    }

    /// Opens idle connections until `pool_min` are live. Returns how many were opened.
    pub async fn warm_up(&self) -> PoolResult<u32> {
        let mut opened = 0;
        loop {
            {
                let state = self.state.lock();
                if state.retired || state.live >= self.config.pool_min {
                    break;
                }
            }
            self.open_idle().await?;
            opened += 1;
        }
        if opened > 0 {
            debug!(generation = self.generation, opened, "Pool warmed up");
        }
        Ok(opened)
    }

    async fn open_idle(&self) -> PoolResult<()> {
        {
            let mut state = self.state.lock();
            if state.retired {
                return Err(PoolError::Closed);
            }
            if state.live >= self.config.pool_max {
                return Ok(());
            }
            state.live += 1;
        }
        let conn = match self.open_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                self.state.lock().live -= 1;
                return Err(e);
            }
        };

        let mut state = self.state.lock();
        if state.retired {
            state.live -= 1;
            drop(state);
            self.close_in_background(conn);
            return Err(PoolError::Closed);
        }
        state.idle.push_back(IdleConnection {
            conn,
            session_database: self.config.default_database.clone(),
        });
        Ok(())
    }

    /// Stops handing out leases. Idle connections close now; leased ones close on release.
    pub fn retire(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.retired {
                return;
            }
            state.retired = true;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.live -= idle.len() as u32;
            idle
        };
        self.permits.close();

        let closed = idle.len();
        for entry in idle {
            self.close_in_background(entry.conn);
        }
        let status = self.status();
        info!(
            generation = self.generation,
            closed_idle = closed,
            still_leased = status.leased,
            "Connection pool retired"
        );
        if status.live == 0 {
            info!(generation = self.generation, "Connection pool drained");
        }
    }

    /// Whether a session may go back to the idle set. With a default database every
    /// caller switches explicitly; without one an unqualified statement runs in whatever
    /// the session last used, and MySQL has no way to un-`USE`.
    fn session_reusable(&self, session_database: Option<&str>) -> bool {
        self.config.default_database.is_some() || session_database.is_none()
    }

    fn give_back(&self, conn: Option<Box<dyn DatabaseConnection>>, healthy: bool, session_database: Option<String>) {
        let reusable = healthy && self.session_reusable(session_database.as_deref());
        let mut state = self.state.lock();
        match conn {
            Some(conn) if reusable && !state.retired => {
                state.idle.push_back(IdleConnection {
                    conn,
                    session_database,
                });
            }
            conn => {
                state.live -= 1;
                let drained = state.retired && state.live == 0;
                drop(state);
                if let Some(conn) = conn {
                    if !healthy {
                        debug!(generation = self.generation, "Discarding unhealthy connection");
                    } else if !reusable {
                        debug!(
                            generation = self.generation,
                            session_database = session_database.as_deref().unwrap_or_default(),
                            "Discarding connection bound to a non-default database"
                        );
                    }
                    self.close_in_background(conn);
                }
                if drained {
                    info!(generation = self.generation, "Connection pool drained");
                }
            }
        }
    }

    fn close_in_background(&self, conn: Box<dyn DatabaseConnection>) {
        PoolMetrics::bump(&self.metrics.connections_closed);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(conn.close());
            }
            Err(_) => drop(conn),
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("generation", &self.generation)
            .field("connector", &self.connector.name())
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

/// Exclusive lease on one pooled connection.
///
/// Dropping the lease returns the connection to the idle set, or discards it when the
/// last operation failed with a connection-poisoning error or never completed.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Box<dyn DatabaseConnection>>,
    session_database: Option<String>,
    healthy: bool,
    // Dropped after `Drop::drop` has put the connection back.
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.pool.config
    }

    pub fn generation(&self) -> u64 {
        self.pool.generation
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Database the session is known to be using.
    pub fn session_database(&self) -> Option<&str> {
        self.session_database.as_deref()
    }

    pub fn set_session_database(&mut self, database: impl Into<String>) {
        self.session_database = Some(database.into());
    }

    /// Runs one statement on the leased connection.
    ///
    /// The lease counts as unhealthy while the call is in flight, so a cancelled call
    /// leaves the connection to be discarded.
    pub async fn query(&mut self, sql: &str) -> ExecResult<QueryResult> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| ExecError::ConnectionLost("connection already discarded".into()))?;
        self.healthy = false;
        let result = conn.query(sql).await;

        PoolMetrics::bump(&self.pool.metrics.queries_executed);
        match &result {
            Ok(_) => self.healthy = true,
            Err(e) => {
                PoolMetrics::bump(&self.pool.metrics.query_errors);
                self.healthy = !e.poisons_connection();
                if !self.healthy {
                    self.session_database = None;
                }
            }
        }
        result
    }

    /// Returns the connection to the pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = self.conn.take();
        let session_database = self.session_database.take();
        self.pool.give_back(conn, self.healthy, session_database);
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("generation", &self.pool.generation)
            .field("session_database", &self.session_database)
            .field("healthy", &self.healthy)
            .finish()
    }
}
