//! Request handler and method dispatcher.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::*;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Handler trait for processing MCP requests.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn initialize(&self, params: InitializeParams) -> ProtocolResult<InitializeResult>;

    async fn initialized(&self) -> ProtocolResult<()>;

    async fn shutdown(&self) -> ProtocolResult<()>;

    async fn list_tools(&self) -> ProtocolResult<ListToolsResult>;

    /// Tool failures are reported inside the result; `Err` is for protocol faults only.
    async fn call_tool(&self, params: CallToolParams) -> ProtocolResult<CallToolResult>;

    async fn ping(&self) -> ProtocolResult<Value> {
        Ok(serde_json::json!({}))
    }
}

/// Routes JSON-RPC methods to a [`Handler`].
pub struct Dispatcher<H: Handler> {
    handler: Arc<H>,
}

impl<H: Handler> Clone for Dispatcher<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }

    /// Dispatches a request. Notifications are handled and yield `None`.
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn dispatch(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        let is_notification = id.is_none();

        let result = match method.as_str() {
            "initialize" => match parse_params(params) {
                Ok(params) => to_value(self.handler.initialize(params).await),
                Err(e) => Err(e),
            },
            "initialized" | "notifications/initialized" => {
                self.handler.initialized().await.map(|()| Value::Null)
            }
            "notifications/cancelled" => {
                debug!("Cancellation notice ignored");
                Ok(Value::Null)
            }
            "shutdown" => self.handler.shutdown().await.map(|()| Value::Null),
            "ping" => self.handler.ping().await,
            "tools/list" => to_value(self.handler.list_tools().await),
            "tools/call" => match parse_params(params) {
                Ok(params) => to_value(self.handler.call_tool(params).await),
                Err(e) => Err(e),
            },
            other => {
                warn!(method = %other, "Unknown method");
                Err(ProtocolError::MethodNotFound(other.to_string()))
            }
        };

        if is_notification {
            if let Err(e) = result {
                debug!(error = %e, "Notification failed");
            }
            return None;
        }

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                error!(error = %e, "Request failed");
                JsonRpcResponse::error(id, JsonRpcError::from_protocol(&e))
            }
        })
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> ProtocolResult<T> {
    let params = params.ok_or_else(|| ProtocolError::InvalidParams("Missing params".into()))?;
    serde_json::from_value(params).map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))
}

fn to_value<T: Serialize>(result: ProtocolResult<T>) -> ProtocolResult<Value> {
    serde_json::to_value(result?).map_err(|e| ProtocolError::InternalError(e.to_string().into()))
}
