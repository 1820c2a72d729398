//! MCP request handler implementation.

use crate::error::ProtocolResult;
use crate::protocol::{
    CallToolParams, CallToolResult, Handler, InitializeParams, InitializeResult, ListToolsResult,
    MCP_VERSION, ServerCapabilities, ServerInfo, ToolsCapability,
};
use crate::server::state::ServerState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Protocol handler backed by the gateway's [`ServerState`].
pub struct McpHandler {
    state: Arc<ServerState>,
}

impl McpHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    fn instructions(&self) -> String {
        let config = self.state.connection_config();
        let default_database = match &config.default_database {
            Some(db) => format!("default database '{}'", db),
            None => "no default database".to_string(),
        };
        format!(
            "Read-only MariaDB gateway for {}@{}:{} ({}). \
            Tools: list_databases, list_tables, get_table_schema, execute_sql, reload_config. \
            execute_sql accepts a single SELECT, SHOW, DESCRIBE, DESC or EXPLAIN statement.",
            config.user, config.host, config.port, default_database
        )
    }
}

#[async_trait]
impl Handler for McpHandler {
    async fn initialize(&self, params: InitializeParams) -> ProtocolResult<InitializeResult> {
        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol_version = %params.protocol_version,
            "Initialize request"
        );
        self.state.set_initialized(params.client_info);

        Ok(InitializeResult {
            protocol_version: MCP_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: ServerInfo {
                name: self.state.config.name.to_string(),
                version: self.state.config.version.to_string(),
            },
            instructions: Some(self.instructions()),
        })
    }

    async fn initialized(&self) -> ProtocolResult<()> {
        info!("Client initialized");
        Ok(())
    }

    async fn shutdown(&self) -> ProtocolResult<()> {
        let status = self.state.pool_status();
        info!(
            tool_calls = self.state.tool_calls(),
            live = status.live,
            leased = status.leased,
            "Shutting down"
        );
        self.state.shutdown();
        Ok(())
    }

    async fn list_tools(&self) -> ProtocolResult<ListToolsResult> {
        let tools = self.state.tools.list();
        debug!(count = tools.len(), "Listing tools");

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    #[instrument(skip(self, params), fields(tool = %params.name))]
    async fn call_tool(&self, params: CallToolParams) -> ProtocolResult<CallToolResult> {
        let call_number = self.state.record_tool_call();
        debug!(call_number, "Tool call");
        Ok(self.state.tools.call(params).await)
    }
}
