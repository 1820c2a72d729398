//! Catalog tools: list_databases, list_tables, get_table_schema.

use crate::database::{ConnectionManager, SchemaIntrospector, SchemaOutcome};
use crate::error::{Result, ToolError};
use crate::protocol::CallToolResult;
use crate::tools::registry::{GetTableSchemaArgs, ListTablesArgs, json_result, require_database};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct ListDatabasesTool {
    connection_manager: Arc<ConnectionManager>,
    introspector: SchemaIntrospector,
    acquire_timeout: Duration,
}

impl ListDatabasesTool {
    pub fn new(connection_manager: Arc<ConnectionManager>, introspector: SchemaIntrospector) -> Self {
        Self {
            connection_manager,
            introspector,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[instrument(skip(self), fields(tool = "list_databases"))]
    pub async fn call(&self) -> Result<CallToolResult> {
        let mut lease = self.connection_manager.acquire(self.acquire_timeout).await?;
        let databases = self.introspector.list_databases(&mut lease).await?;
        lease.release();

        debug!(count = databases.len(), "Listed databases");
        Ok(json_result(&json!({ "databases": databases })))
    }
}

pub struct ListTablesTool {
    connection_manager: Arc<ConnectionManager>,
    introspector: SchemaIntrospector,
    acquire_timeout: Duration,
}

impl ListTablesTool {
    pub fn new(connection_manager: Arc<ConnectionManager>, introspector: SchemaIntrospector) -> Self {
        Self {
            connection_manager,
            introspector,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Fails with `NoDatabaseSelected` before leasing when nothing resolves.
    #[instrument(skip(self, args), fields(tool = "list_tables"))]
    pub async fn call(&self, args: ListTablesArgs) -> Result<CallToolResult> {
        require_database(&self.connection_manager.config(), args.database.as_deref())?;

        let mut lease = self.connection_manager.acquire(self.acquire_timeout).await?;
        let database = require_database(lease.config(), args.database.as_deref())?;
        let tables = self.introspector.list_tables(&mut lease, &database).await?;
        lease.release();

        debug!(database = %database, count = tables.len(), "Listed tables");
        Ok(json_result(&json!({
            "database": database,
            "tables": tables,
        })))
    }
}

pub struct GetTableSchemaTool {
    connection_manager: Arc<ConnectionManager>,
    introspector: SchemaIntrospector,
    acquire_timeout: Duration,
}

impl GetTableSchemaTool {
    pub fn new(connection_manager: Arc<ConnectionManager>, introspector: SchemaIntrospector) -> Self {
        Self {
            connection_manager,
            introspector,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// A partial schema is a successful result tagged `"status": "partial"`.
    #[instrument(skip(self, args), fields(tool = "get_table_schema", table = %args.table_name))]
    pub async fn call(&self, args: GetTableSchemaArgs) -> Result<CallToolResult> {
        let table = args.table_name.trim();
        if table.is_empty() {
            return Err(ToolError::MissingArgument("table_name".into()).into());
        }

        require_database(&self.connection_manager.config(), args.database.as_deref())?;

        // Resolved again against the lease: a reload may have swapped the pool meanwhile.
        let mut lease = self.connection_manager.acquire(self.acquire_timeout).await?;
        let database = require_database(lease.config(), args.database.as_deref())?;
        let outcome = self
            .introspector
            .get_table_schema(&mut lease, &database, table)
            .await?;
        lease.release();

        Ok(match outcome {
            SchemaOutcome::Complete(schema) => json_result(&schema),
            SchemaOutcome::Partial(partial) => json_result(&json!({
                "status": "partial",
                "schema": partial.schema,
                "failures": partial.failures,
            })),
        })
    }
}
