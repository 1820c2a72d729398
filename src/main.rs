//! MCP server binary entry point.

use anyhow::{Context, Result};
use mariadb_readonly_mcp::{
    config::{ConfigSource, DotenvConfigSource, ServerConfig},
    database::MariaDbConnector,
    protocol::McpServerBuilder,
    server::{McpHandler, ServerState},
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let source = Arc::new(DotenvConfigSource::new(env_file_path()));
    let vars = source.variables().context("Failed to read env file")?;
    let config = ServerConfig::from_lookup(|key| vars.get(key)).context("Invalid server configuration")?;
    init_tracing(&config.log_level);

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let connection = source
        .load()
        .context("Invalid MariaDB connection configuration")?;
    info!(
        env_file = %source.path().display(),
        host = %connection.host,
        port = connection.port,
        user = %connection.user,
        database = connection.default_database.as_deref().unwrap_or_default(),
        pool_min = connection.pool_min,
        pool_max = connection.pool_max,
        "Connection settings loaded"
    );

    let state = Arc::new(
        ServerState::builder()
            .config(config)
            .connection(connection)
            .connector(Arc::new(MariaDbConnector::new()))
            .config_source(source)
            .build()?,
    );

    // An unreachable server is not fatal; tool calls retry the connect.
    match state.connection_manager.warm_up().await {
        Ok(opened) => info!(opened, "Connection pool warmed up"),
        Err(e) => warn!(error = %e, "Warm-up failed, connections will be opened on demand"),
    }

    let server = McpServerBuilder::new()
        .handler(McpHandler::new(Arc::clone(&state)))
        .name(state.config.name.to_string())
        .version(state.config.version.to_string())
        .build()?;

    info!("MCP server ready on stdio");
    server.run().await?;

    state.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// `MARIADB_ENV_FILE`, else `.env` in the working directory.
fn env_file_path() -> PathBuf {
    std::env::var_os("MARIADB_ENV_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".env"))
}

/// JSON logs on stderr; stdout carries the protocol. `RUST_LOG` wins over `LOG_LEVEL`.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mariadb_readonly_mcp={},warn", log_level))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .json()
        .init();
}
