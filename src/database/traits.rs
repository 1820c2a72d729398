//! Connector and connection traits.

use crate::config::ConnectionConfig;
use crate::database::result::QueryResult;
use crate::error::{ExecResult, PoolResult};
use async_trait::async_trait;

/// Opens physical connections for a pool.
///
/// Implementations: [`MariaDbConnector`](crate::database::MariaDbConnector) for a live
/// server, and a scripted in-memory connector used by the test suite.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name (e.g., "mariadb").
    fn name(&self) -> &'static str;

    /// Opens and authenticates one connection against `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ConnectFailed`](crate::error::PoolError::ConnectFailed) for bad
    /// credentials, an unreachable host, a TLS failure or a connect timeout.
    async fn connect(&self, config: &ConnectionConfig) -> PoolResult<Box<dyn DatabaseConnection>>;
}

/// One live, authenticated database session.
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Liveness check.
    async fn ping(&mut self) -> ExecResult<()>;

    /// Runs one statement as-is and collects every row.
    async fn query(&mut self, sql: &str) -> ExecResult<QueryResult>;

    /// Closes the session. Errors are logged, not returned.
    async fn close(self: Box<Self>);
}
