//! MCP server with lifecycle management.

use crate::error::{McpError, ProtocolError, Result};
use crate::protocol::handler::{Dispatcher, Handler};
use crate::protocol::transport::{StdioTransport, Transport};
use crate::protocol::types::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    /// Initialize request received, awaiting the initialized notification.
    Initializing,
    Running,
    ShuttingDown,
    Stopped,
}

/// MCP Server.
///
/// Each request is dispatched on its own task, so slow tool calls do not hold up the
/// ones behind them. `shutdown` waits for in-flight requests before it is answered.
pub struct McpServer<H: Handler> {
    info: ServerInfo,
    handler: Arc<H>,
    state: Arc<RwLock<ServerState>>,
}

impl<H: Handler> McpServer<H> {
    pub fn new(handler: H, info: ServerInfo) -> Self {
        Self {
            info,
            handler: Arc::new(handler),
            state: Arc::new(RwLock::new(ServerState::Created)),
        }
    }

    pub async fn state(&self) -> ServerState {
        *self.state.read().await
    }

    /// Runs over stdin/stdout until EOF or `shutdown`.
    #[instrument(skip(self), fields(server = %self.info.name))]
    pub async fn run(self) -> Result<()> {
        self.run_with_transport(Arc::new(StdioTransport::stdio())).await
    }

    pub async fn run_with_transport<T: Transport + 'static>(&self, transport: Arc<T>) -> Result<()> {
        info!(version = %self.info.version, "Starting MCP server");

        let dispatcher = Dispatcher::new(Arc::clone(&self.handler));
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let message = match transport.read_message().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("EOF received, shutting down");
                    break;
                }
                Err(McpError::Protocol(ProtocolError::ParseError)) => {
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    if let Err(e) = transport.write_response(&response).await {
                        error!(error = %e, "Failed to send error response");
                    }
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "Transport error");
                    break;
                }
            };

            let request = match message {
                Message::Request(request) => request,
                Message::Response(response) => {
                    warn!(id = ?response.id, "Unexpected response received");
                    continue;
                }
            };

            self.update_state_for_method(&request.method).await;

            match request.method.as_str() {
                // Lifecycle requests run inline so their effects are ordered.
                "initialize" | "initialized" | "notifications/initialized" => {
                    respond(transport.as_ref(), dispatcher.dispatch(request).await).await;
                }
                "shutdown" => {
                    info!(in_flight = in_flight.len(), "Shutdown requested, draining requests");
                    while in_flight.join_next().await.is_some() {}
                    respond(transport.as_ref(), dispatcher.dispatch(request).await).await;
                    break;
                }
                _ => {
                    let dispatcher = dispatcher.clone();
                    let transport = Arc::clone(&transport);
                    in_flight.spawn(async move {
                        respond(transport.as_ref(), dispatcher.dispatch(request).await).await;
                    });
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        *self.state.write().await = ServerState::Stopped;
        info!("Server stopped");
        Ok(())
    }

    async fn update_state_for_method(&self, method: &str) {
        let mut state = self.state.write().await;
        match method {
            "initialize" if *state == ServerState::Created => {
                *state = ServerState::Initializing;
            }
            "initialized" | "notifications/initialized" if *state == ServerState::Initializing => {
                *state = ServerState::Running;
                info!("Server initialized and running");
            }
            "shutdown" => *state = ServerState::ShuttingDown,
            _ => {}
        }
    }
}

async fn respond<T: Transport + ?Sized>(transport: &T, response: Option<JsonRpcResponse>) {
    if let Some(response) = response
        && let Err(e) = transport.write_response(&response).await
    {
        error!(error = %e, "Failed to send response");
    }
}

/// Builder for MCP Server.
pub struct McpServerBuilder<H: Handler> {
    handler: Option<H>,
    name: String,
    version: String,
}

impl<H: Handler> McpServerBuilder<H> {
    pub fn new() -> Self {
        Self {
            handler: None,
            name: env!("CARGO_PKG_NAME").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }

    pub fn handler(mut self, handler: H) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn build(self) -> Result<McpServer<H>> {
        let handler = self.handler.ok_or_else(|| McpError::Internal {
            message: "Handler is required".into(),
        })?;

        Ok(McpServer::new(
            handler,
            ServerInfo {
                name: self.name,
                version: self.version,
            },
        ))
    }
}

impl<H: Handler> Default for McpServerBuilder<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handler::tests::MockHandler;
    use crate::protocol::transport::LineTransport;
    use serde_json::Value;

    fn server() -> McpServer<MockHandler> {
        McpServerBuilder::new()
            .handler(MockHandler::default())
            .name("test-server")
            .version("0.1.0")
            .build()
            .unwrap()
    }

    async fn run(server: &McpServer<MockHandler>, input: &'static str) -> Vec<Value> {
        let transport = Arc::new(LineTransport::new(input.as_bytes(), Vec::new()));
        server
            .run_with_transport(Arc::clone(&transport))
            .await
            .unwrap();

        let transport = Arc::try_unwrap(transport).ok().unwrap();
        let (_, written) = transport.into_inner();
        String::from_utf8(written)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_server_builder() {
        let server = server();
        assert_eq!(server.info.name, "test-server");
        assert_eq!(server.info.version, "0.1.0");
    }

    #[tokio::test]
    async fn test_server_lifecycle() {
        let server = server();
        assert_eq!(server.state().await, ServerState::Created);

        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"c","version":"1"}}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
                "\n",
            ),
        )
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(server.state().await, ServerState::Stopped);
        assert!(server.handler.initialized.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_later_requests() {
        let server = server();
        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
                "\n",
            ),
        )
        .await;

        let ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_requests() {
        let server = server();
        let responses = run(
            &server,
            concat!(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"slow"}}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":2,"method":"shutdown"}"#,
                "\n",
                r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
                "\n",
            ),
        )
        .await;

        let ids: Vec<i64> = responses.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_parse_error_response() {
        let server = server();
        let responses = run(&server, "garbage\n").await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert!(responses[0]["id"].is_null());
    }
}
