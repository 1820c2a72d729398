//! MCP tool definitions and the dispatch table.

pub mod config;
pub mod query;
pub mod registry;
pub mod schema;

pub use config::{ReloadAck, ReloadConfigTool};
pub use query::ExecuteSqlTool;
pub use registry::{ToolCall, ToolKind, error_result, json_result};
pub use schema::{GetTableSchemaTool, ListDatabasesTool, ListTablesTool};

use crate::config::{ConfigSource, ConfigStore, GatewayLimits};
use crate::database::{ConnectionManager, QueryExecutor, SchemaIntrospector};
use crate::error::Result;
use crate::protocol::{CallToolParams, CallToolResult, Tool};
use crate::security::StatementClassifier;
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes a tool call to its handler. Every outcome, including failures, comes back as a
/// [`CallToolResult`].
pub struct ToolDispatcher {
    list_databases: ListDatabasesTool,
    list_tables: ListTablesTool,
    get_table_schema: GetTableSchemaTool,
    execute_sql: ExecuteSqlTool,
    reload_config: ReloadConfigTool,
}

impl ToolDispatcher {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        store: Arc<ConfigStore>,
        source: Arc<dyn ConfigSource>,
        limits: &GatewayLimits,
    ) -> Self {
        let executor = QueryExecutor::new(limits.query_timeout);
        let introspector = SchemaIntrospector::new(executor.clone());
        let classifier = StatementClassifier::new().max_query_length(limits.max_query_length);

        Self {
            list_databases: ListDatabasesTool::new(
                Arc::clone(&connection_manager),
                introspector.clone(),
            )
            .with_acquire_timeout(limits.acquire_timeout),
            list_tables: ListTablesTool::new(Arc::clone(&connection_manager), introspector.clone())
                .with_acquire_timeout(limits.acquire_timeout),
            get_table_schema: GetTableSchemaTool::new(
                Arc::clone(&connection_manager),
                introspector,
            )
            .with_acquire_timeout(limits.acquire_timeout),
            execute_sql: ExecuteSqlTool::new(Arc::clone(&connection_manager), classifier)
                .with_executor(executor)
                .with_acquire_timeout(limits.acquire_timeout),
            reload_config: ReloadConfigTool::new(connection_manager, store, source),
        }
    }

    pub fn list(&self) -> Vec<Tool> {
        ToolKind::ALL.into_iter().map(ToolKind::definition).collect()
    }

    /// Parses and runs a call, turning any failure into a structured error result.
    pub async fn call(&self, params: CallToolParams) -> CallToolResult {
        let CallToolParams { name, arguments } = params;
        let outcome = match ToolCall::parse(&name, arguments) {
            Ok(call) => self.dispatch(call).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(result) => {
                debug!(tool = %name, "Tool call succeeded");
                result
            }
            Err(e) => {
                warn!(tool = %name, kind = e.kind(), error = %e, "Tool call failed");
                error_result(&e)
            }
        }
    }

    pub async fn dispatch(&self, call: ToolCall) -> Result<CallToolResult> {
        match call {
            ToolCall::ListDatabases => self.list_databases.call().await,
            ToolCall::ListTables(args) => self.list_tables.call(args).await,
            ToolCall::GetTableSchema(args) => self.get_table_schema.call(args).await,
            ToolCall::ExecuteSql(args) => self.execute_sql.call(args).await,
            ToolCall::ReloadConfig => self.reload_config.call().await,
        }
    }
}
