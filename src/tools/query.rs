//! Read-only query execution tool.

use crate::database::{ConnectionManager, QueryExecutor, QueryResult};
use crate::error::Result;
use crate::protocol::CallToolResult;
use crate::security::StatementClassifier;
use crate::tools::registry::{ExecuteSqlArgs, json_result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// `execute_sql` response body.
#[derive(Debug, Serialize)]
struct QueryOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(flatten)]
    result: &'a QueryResult,
}

pub struct ExecuteSqlTool {
    connection_manager: Arc<ConnectionManager>,
    classifier: StatementClassifier,
    executor: QueryExecutor,
    acquire_timeout: Duration,
}

impl ExecuteSqlTool {
    pub fn new(connection_manager: Arc<ConnectionManager>, classifier: StatementClassifier) -> Self {
        Self {
            connection_manager,
            classifier,
            executor: QueryExecutor::default(),
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_executor(mut self, executor: QueryExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Classifies the statement, then runs it on a leased connection.
    ///
    /// A denied statement never leases a connection. With neither a `database` argument
    /// nor a configured default the statement runs with no database selected: the pool
    /// never hands out a session that an earlier call switched elsewhere.
    #[instrument(skip(self, args), fields(tool = "execute_sql"))]
    pub async fn call(&self, args: ExecuteSqlArgs) -> Result<CallToolResult> {
        let statement = self.classifier.prepare(&args.query)?;

        let mut lease = self.connection_manager.acquire(self.acquire_timeout).await?;
        let database = lease
            .config()
            .resolve_database(args.database.as_deref())
            .map(str::to_string);

        let result = self
            .executor
            .execute(&mut lease, statement, database.as_deref())
            .await?;
        lease.release();

        debug!(
            rows = result.row_count,
            elapsed_ms = result.execution_time_ms,
            "Query returned"
        );
        Ok(json_result(&QueryOutput {
            database,
            result: &result,
        }))
    }
}
