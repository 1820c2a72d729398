//! Statement execution on a leased connection.

use crate::database::pool::PooledConnection;
use crate::database::result::QueryResult;
use crate::error::{ExecError, ExecResult};
use crate::security::preview;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Quotes an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Quotes a string literal with single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Runs statements with a client-side timeout, switching the session database first
/// when needed.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    query_timeout: Duration,
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(60),
        }
    }
}

impl QueryExecutor {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Executes `sql` on `lease`, in `database` when given.
    ///
    /// The timeout covers both the database switch and the statement. A timed-out lease
    /// is left unhealthy, so the pool discards the connection on release.
    ///
    /// # Errors
    ///
    /// Returns the [`ExecError`] kind mapped from the driver, or [`ExecError::Timeout`].
    #[instrument(skip(self, lease, sql), fields(database = database.unwrap_or_default()))]
    pub async fn execute(
        &self,
        lease: &mut PooledConnection,
        sql: &str,
        database: Option<&str>,
    ) -> ExecResult<QueryResult> {
        let started = Instant::now();
        debug!(sql = %preview(sql, 200), "Executing statement");

        let run = run_in_database(lease, sql, database);
        let result = match tokio::time::timeout(self.query_timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.query_timeout.as_millis() as u64;
                warn!(timeout_ms, "Statement timed out");
                Err(ExecError::client_timeout(timeout_ms))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(result) => {
                debug!(rows = result.row_count, elapsed_ms, "Statement completed");
                Ok(result.with_execution_time(elapsed_ms))
            }
            Err(e) => {
                debug!(kind = e.kind(), error = %e, elapsed_ms, "Statement failed");
                Err(e)
            }
        }
    }
}

async fn run_in_database(
    lease: &mut PooledConnection,
    sql: &str,
    database: Option<&str>,
) -> ExecResult<QueryResult> {
    if let Some(database) = database
        && lease.session_database() != Some(database)
    {
        lease
            .query(&format!("USE {}", quote_identifier(database)))
            .await?;
        lease.set_session_database(database);
    }
    lease.query(sql).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::database::pool::ConnectionPool;
    use crate::database::testing::{ScriptedConnector, config_for, rows};
    use std::sync::Arc;

    fn pool(connector: &ScriptedConnector, config: ConnectionConfig) -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Arc::new(config),
            Arc::new(connector.clone()),
            1,
        ))
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("shop"), "`shop`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("orders"), "'orders'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(quote_literal(r"a\b"), r"'a\\b'");
    }

    #[tokio::test]
    async fn test_execute_switches_database_once() {
        let connector = ScriptedConnector::new();
        connector.respond("SELECT 1", rows(&["1"], vec![vec![1i64.into()]]));
        let pool = pool(&connector, config_for("db.local"));
        let executor = QueryExecutor::default();

        let mut lease = pool.acquire(Duration::ZERO).await.unwrap();
        let result = executor
            .execute(&mut lease, "SELECT 1", Some("shop"))
            .await
            .unwrap();
        assert_eq!(result.row_count, 1);
        executor
            .execute(&mut lease, "SELECT 1", Some("shop"))
            .await
            .unwrap();

        assert_eq!(
            connector.executed(),
            vec!["USE `shop`", "SELECT 1", "SELECT 1"]
        );
        assert_eq!(lease.session_database(), Some("shop"));
    }

    #[tokio::test]
    async fn test_execute_without_database_uses_session() {
        let connector = ScriptedConnector::new();
        let pool = pool(&connector, config_for("db.local"));
        let executor = QueryExecutor::default();

        let mut lease = pool.acquire(Duration::ZERO).await.unwrap();
        executor.execute(&mut lease, "SHOW TABLES", None).await.unwrap();
        assert_eq!(connector.executed(), vec!["SHOW TABLES"]);
    }

    #[tokio::test]
    async fn test_default_database_needs_no_switch() {
        let connector = ScriptedConnector::new();
        let config = ConnectionConfig {
            default_database: Some("shop".into()),
            ..config_for("db.local")
        };
        let pool = pool(&connector, config);
        let executor = QueryExecutor::default();

        let mut lease = pool.acquire(Duration::ZERO).await.unwrap();
        executor
            .execute(&mut lease, "SELECT 1", Some("shop"))
            .await
            .unwrap();
        assert_eq!(connector.executed(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_failed_switch_skips_statement() {
        let connector = ScriptedConnector::new();
        connector.fail(
            "USE `nope`",
            ExecError::UnknownDatabase("Unknown database 'nope'".into()),
        );
        let pool = pool(&connector, config_for("db.local"));
        let executor = QueryExecutor::default();

        let mut lease = pool.acquire(Duration::ZERO).await.unwrap();
        let err = executor
            .execute(&mut lease, "SELECT 1", Some("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::UnknownDatabase(_)));
        assert_eq!(connector.executed(), vec!["USE `nope`"]);
        assert_eq!(lease.session_database(), None);
    }

    #[tokio::test]
    async fn test_timeout_discards_connection() {
        let connector = ScriptedConnector::new();
        connector.delay_queries(Duration::from_secs(5));
        let pool = pool(&connector, config_for("db.local"));
        let executor = QueryExecutor::new(Duration::from_millis(20));

        let mut lease = pool.acquire(Duration::ZERO).await.unwrap();
        let err = executor
            .execute(&mut lease, "SELECT SLEEP(5)", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::Timeout {
                after_ms: Some(20),
                ..
            }
        ));
        assert!(!lease.is_healthy());
        drop(lease);

        assert_eq!(pool.status().live, 0);
        assert_eq!(connector.settle_closes(1).await, 1);
        assert_eq!(connector.open_connections(), 0);
    }
}
