//! Server state management.

use crate::config::{ConfigSource, ConfigStore, ConnectionConfig, ServerConfig};
use crate::database::{ConnectionManager, Connector, PoolStatus};
use crate::error::{McpError, Result};
use crate::protocol::ClientInfo;
use crate::tools::ToolDispatcher;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Everything a request handler needs, shared across request tasks.
pub struct ServerState {
    pub config: ServerConfig,
    pub store: Arc<ConfigStore>,
    pub connection_manager: Arc<ConnectionManager>,
    pub tools: ToolDispatcher,
    initialized: AtomicBool,
    client_info: RwLock<Option<ClientInfo>>,
    tool_calls: AtomicU64,
}

impl ServerState {
    pub fn builder() -> ServerStateBuilder {
        ServerStateBuilder::new()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, client_info: ClientInfo) {
        *self.client_info.write() = Some(client_info);
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client_info.read().clone()
    }

    pub fn record_tool_call(&self) -> u64 {
        self.tool_calls.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn tool_calls(&self) -> u64 {
        self.tool_calls.load(Ordering::SeqCst)
    }

    /// Committed connection config.
    pub fn connection_config(&self) -> Arc<ConnectionConfig> {
        self.store.current()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.connection_manager.status()
    }

    /// Closes the current pool. Later tool calls fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.connection_manager.shutdown();
    }
}

/// Assembles a [`ServerState`] from a validated startup config.
///
/// The pool starts lazily; nothing connects until [`ConnectionManager::warm_up`] or
/// the first tool call.
pub struct ServerStateBuilder {
    config: Option<ServerConfig>,
    connection: Option<ConnectionConfig>,
    connector: Option<Arc<dyn Connector>>,
    source: Option<Arc<dyn ConfigSource>>,
}

impl ServerStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            connection: None,
            connector: None,
            source: None,
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = Some(connection);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Where `reload_config` reads fresh settings from.
    pub fn config_source(mut self, source: Arc<dyn ConfigSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// # Errors
    ///
    /// A missing part is [`McpError::Internal`]; an invalid connection config is
    /// [`McpError::Config`].
    pub fn build(self) -> Result<ServerState> {
        let missing = |part: &'static str| McpError::Internal {
            message: format!("{} is required", part).into(),
        };
        let config = self.config.unwrap_or_default();
        let connection = self.connection.ok_or_else(|| missing("Connection config"))?;
        let connector = self.connector.ok_or_else(|| missing("Connector"))?;
        let source = self.source.ok_or_else(|| missing("Config source"))?;

        let store = Arc::new(ConfigStore::new(connection)?);
        let connection_manager = Arc::new(ConnectionManager::new(connector, store.current()));
        let tools = ToolDispatcher::new(
            Arc::clone(&connection_manager),
            Arc::clone(&store),
            source,
            &config.limits,
        );

        Ok(ServerState {
            config,
            store,
            connection_manager,
            tools,
            initialized: AtomicBool::new(false),
            client_info: RwLock::new(None),
            tool_calls: AtomicU64::new(0),
        })
    }
}

impl Default for ServerStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}
