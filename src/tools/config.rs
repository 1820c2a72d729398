//! Runtime reconfiguration tool.

use crate::config::{ConfigSource, ConfigStore, ConnectionConfig, SslMode};
use crate::database::ConnectionManager;
use crate::error::Result;
use crate::protocol::CallToolResult;
use crate::tools::registry::json_result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Effective settings after a reload. Carries no password.
#[derive(Debug, Serialize)]
pub struct ReloadAck {
    pub status: &'static str,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub default_database: Option<String>,
    pub pool_min: u32,
    pub pool_max: u32,
    pub ssl_mode: SslMode,
    pub generation: u64,
}

impl ReloadAck {
    fn new(config: &ConnectionConfig, generation: u64) -> Self {
        Self {
            status: "reloaded",
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            default_database: config.default_database.clone(),
            pool_min: config.pool_min,
            pool_max: config.pool_max,
            ssl_mode: config.ssl_mode,
            generation,
        }
    }
}

/// Re-reads connection settings and swaps in a pool built from them.
///
/// Reloads are serialized. The store is only updated once the new pool has proven
/// itself with a trial connection, so a failed reload leaves both untouched.
pub struct ReloadConfigTool {
    connection_manager: Arc<ConnectionManager>,
    store: Arc<ConfigStore>,
    source: Arc<dyn ConfigSource>,
    reload_lock: Mutex<()>,
}

impl ReloadConfigTool {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        store: Arc<ConfigStore>,
        source: Arc<dyn ConfigSource>,
    ) -> Self {
        Self {
            connection_manager,
            store,
            source,
            reload_lock: Mutex::new(()),
        }
    }

    #[instrument(skip(self), fields(tool = "reload_config"))]
    pub async fn call(&self) -> Result<CallToolResult> {
        let _guard = self.reload_lock.lock().await;

        let config = self.source.load().inspect_err(|e| {
            warn!(field = e.field(), error = %e, "Reload rejected, keeping current config");
        })?;
        config.validate().inspect_err(|e| {
            warn!(field = e.field(), error = %e, "Reload rejected, keeping current config");
        })?;

        let config = Arc::new(config);
        let pool = self.connection_manager.rebuild(Arc::clone(&config)).await?;
        let previous = self.store.replace(Arc::clone(&config))?;

        info!(
            generation = pool.generation(),
            previous_host = %previous.host,
            host = %config.host,
            port = config.port,
            "Configuration reloaded"
        );
        Ok(json_result(&ReloadAck::new(&config, pool.generation())))
    }
}
