//! Scripted in-memory connector for tests.

use crate::config::{ConfigSource, ConnectionConfig};
use crate::database::result::{CellValue, Column, QueryResult};
use crate::database::traits::{Connector, DatabaseConnection};
use crate::error::{ConfigError, ExecError, ExecResult, PoolError, PoolResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Rows(QueryResult),
    Fail(ExecError),
}

#[derive(Default)]
struct Script {
    responses: Mutex<HashMap<String, Scripted>>,
    failing_hosts: Mutex<HashSet<String>>,
    executed: Mutex<Vec<(String, String)>>,
    delay: Mutex<Option<Duration>>,
    failing_pings: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicUsize,
}

/// Connector whose connections answer from a table of canned responses.
///
/// Unscripted statements succeed with an empty result. Every executed statement is
/// recorded together with the host of the connection that ran it.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, sql: &str, result: QueryResult) -> &Self {
        self.script
            .responses
            .lock()
            .insert(sql.to_string(), Scripted::Rows(result));
        self
    }

    pub fn fail(&self, sql: &str, error: ExecError) -> &Self {
        self.script
            .responses
            .lock()
            .insert(sql.to_string(), Scripted::Fail(error));
        self
    }

    /// Connections to `host` fail with `ConnectFailed`.
    pub fn reject_host(&self, host: &str) -> &Self {
        self.script.failing_hosts.lock().insert(host.to_string());
        self
    }

    pub fn accept_host(&self, host: &str) -> &Self {
        self.script.failing_hosts.lock().remove(host);
        self
    }

    /// The next `count` pings fail with `ConnectionLost`.
    pub fn fail_pings(&self, count: usize) -> &Self {
        self.script.failing_pings.store(count, Ordering::SeqCst);
        self
    }

    /// Every query sleeps this long before answering.
    pub fn delay_queries(&self, delay: Duration) -> &Self {
        *self.script.delay.lock() = Some(delay);
        self
    }

    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed or dropped.
    pub fn open_connections(&self) -> usize {
        self.script.open.load(Ordering::SeqCst)
    }

    /// Waits up to a second for background closes to reach `expected`, returning the
    /// final count.
    pub async fn settle_closes(&self, expected: usize) -> usize {
        for _ in 0..100 {
            if self.closes() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.closes()
    }

    /// Statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.script
            .executed
            .lock()
            .iter()
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Statements executed on connections to `host`.
    pub fn executed_on(&self, host: &str) -> Vec<String> {
        self.script
            .executed
            .lock()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, sql)| sql.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn connect(&self, config: &ConnectionConfig) -> PoolResult<Box<dyn DatabaseConnection>> {
        if self.script.failing_hosts.lock().contains(&config.host) {
            return Err(PoolError::ConnectFailed(format!(
                "Can't connect to server on '{}'",
                config.host
            )));
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        self.script.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
            host: config.host.clone(),
        }))
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
    host: String,
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.script.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatabaseConnection for ScriptedConnection {
    async fn ping(&mut self) -> ExecResult<()> {
        let failed = self
            .script
            .failing_pings
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ExecError::ConnectionLost("server has gone away".into()));
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> ExecResult<QueryResult> {
        self.script
            .executed
            .lock()
            .push((self.host.clone(), sql.to_string()));

        let delay = *self.script.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.responses.lock().get(sql).cloned();
        match scripted {
            Some(Scripted::Rows(result)) => Ok(result),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(QueryResult::empty()),
        }
    }

    async fn close(self: Box<Self>) {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a result whose columns are all reported as VARCHAR.
pub fn rows(columns: &[&str], rows: Vec<Vec<CellValue>>) -> QueryResult {
    QueryResult::new(
        columns.iter().map(|c| Column::new(*c, "VARCHAR")).collect(),
        rows,
    )
}

/// A config that passes validation and points at `host`.
pub fn config_for(host: &str) -> ConnectionConfig {
    ConnectionConfig {
        host: host.to_string(),
        ..ConnectionConfig::default()
    }
}

/// Config source returning whatever was last set, unvalidated.
pub struct ScriptedConfigSource {
    next: Mutex<Result<ConnectionConfig, ConfigError>>,
    loads: AtomicUsize,
}

impl ScriptedConfigSource {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            next: Mutex::new(Ok(config)),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, config: ConnectionConfig) {
        *self.next.lock() = Ok(config);
    }

    pub fn set_error(&self, error: ConfigError) {
        *self.next.lock() = Err(error);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ConfigSource for ScriptedConfigSource {
    fn load(&self) -> Result<ConnectionConfig, ConfigError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.next.lock().clone()
    }
}
