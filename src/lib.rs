//! Read-only MCP gateway for MariaDB and MySQL.
//!
//! Exposes five tools (`list_databases`, `list_tables`, `get_table_schema`,
//! `execute_sql`, `reload_config`) over a bounded connection pool. Statements pass a
//! keyword allowlist before they reach the server, and connection settings can be
//! reloaded at runtime without interrupting in-flight queries.
//!
//! # Example
//!
//! ```no_run
//! use mariadb_readonly_mcp::{
//!     config::{ConfigSource, DotenvConfigSource, ServerConfig},
//!     database::MariaDbConnector,
//!     protocol::McpServerBuilder,
//!     server::{McpHandler, ServerState},
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = Arc::new(DotenvConfigSource::new(".env"));
//!     let vars = source.variables()?;
//!     let state = Arc::new(
//!         ServerState::builder()
//!             .config(ServerConfig::from_lookup(|key| vars.get(key))?)
//!             .connection(source.load()?)
//!             .connector(Arc::new(MariaDbConnector::new()))
//!             .config_source(source)
//!             .build()?,
//!     );
//!
//!     let server = McpServerBuilder::new()
//!         .handler(McpHandler::new(state))
//!         .build()?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod protocol;
pub mod security;
pub mod server;
pub mod tools;

pub use config::{ConnectionConfig, ConnectionConfigBuilder, ServerConfig};
pub use database::{ConnectionManager, MariaDbConnector};
pub use error::{McpError, Result};
pub use protocol::{McpServer, McpServerBuilder};
pub use security::StatementClassifier;
pub use server::{McpHandler, ServerState, ServerStateBuilder};
pub use tools::ToolDispatcher;
