//! Error types for the gateway.
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `From` conversions.
//! Every family maps to a stable kind name via [`McpError::kind`], which is what tool
//! callers see in structured error results.

use std::borrow::Cow;
use thiserror::Error;

/// Main error type for the gateway.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Security error: {0}")]
    Security(#[from] SecurityError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: Cow<'static, str> },
}

impl McpError {
    /// Stable kind name reported to tool callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "ProtocolError",
            Self::Config(_) => "ConfigError",
            Self::Pool(e) => e.kind(),
            Self::Exec(e) => e.kind(),
            Self::Schema(e) => e.kind(),
            Self::Security(e) => e.kind(),
            Self::Tool(e) => e.kind(),
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
            Self::Internal { .. } => "InternalError",
        }
    }
}

/// JSON-RPC 2.0 and MCP protocol errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Parse error: invalid JSON")]
    ParseError,

    #[error("Invalid request: {0}")]
    InvalidRequest(Cow<'static, str>),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(Cow<'static, str>),

    #[error("Internal error: {0}")]
    InternalError(Cow<'static, str>),
}

impl ProtocolError {
    /// Returns the JSON-RPC 2.0 error code.
    pub fn code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::InternalError(_) => -32603,
        }
    }
}

/// A rejected configuration. Always names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),
}

impl ConfigError {
    pub fn invalid(field: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// The field that failed validation.
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField(field) => field,
            Self::InvalidValue { field, .. } => field,
            Self::InvalidUrl(_) => "url",
        }
    }
}

/// Connection pool errors.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("Connection pool exhausted: all {max_size} connections in use (waited {waited_ms}ms)")]
    PoolExhausted { max_size: u32, waited_ms: u64 },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The pool was retired by a rebuild or shut down. Callers holding a manager retry
    /// against the current pool.
    #[error("Connection pool is closed")]
    Closed,
}

impl PoolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "PoolExhausted",
            Self::ConnectFailed(_) => "ConnectFailed",
            Self::Closed => "PoolClosed",
        }
    }
}

/// Statement execution errors. The driver message is kept verbatim.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("SQL syntax error: {0}")]
    SyntaxError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// `after_ms` is the client-side limit that fired; `None` when the server aborted
    /// the statement itself.
    #[error("Query timed out: {message}")]
    Timeout {
        after_ms: Option<u64>,
        message: String,
    },

    #[error("Query failed: {0}")]
    Other(String),
}

impl ExecError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyntaxError(_) => "SyntaxError",
            Self::PermissionDenied(_) => "PermissionDenied",
            Self::UnknownDatabase(_) => "UnknownDatabase",
            Self::UnknownTable(_) => "UnknownTable",
            Self::ConnectionLost(_) => "ConnectionLost",
            Self::Timeout { .. } => "Timeout",
            Self::Other(_) => "Other",
        }
    }

    /// The client gave up waiting; the statement may still be running on the session.
    pub fn client_timeout(after_ms: u64) -> Self {
        Self::Timeout {
            after_ms: Some(after_ms),
            message: format!("statement exceeded the {}ms client timeout", after_ms),
        }
    }

    /// The server aborted the statement (`max_statement_time`, `max_execution_time`).
    pub fn server_timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            after_ms: None,
            message: message.into(),
        }
    }

    /// Whether the connection that produced this error must be discarded instead of
    /// returned to the idle set.
    ///
    /// A server-side timeout leaves the session usable; a client-side one does not.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_)
                | Self::Timeout {
                    after_ms: Some(_),
                    ..
                }
        )
    }
}

/// Schema introspection errors that are not plain execution failures.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("No database selected: pass a 'database' argument or configure a default database")]
    NoDatabaseSelected,

    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    #[error("Table '{table}' not found in database '{database}'")]
    UnknownTable { database: String, table: String },
}

impl SchemaError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoDatabaseSelected => "NoDatabaseSelected",
            Self::UnknownDatabase(_) => "UnknownDatabase",
            Self::UnknownTable { .. } => "UnknownTable",
        }
    }
}

/// Security-related errors.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    #[error("Statement denied: {0}")]
    StatementDenied(String),
}

impl SecurityError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatementDenied(_) => "StatementDenied",
        }
    }
}

/// Tool dispatch errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(Cow<'static, str>),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "ToolNotFound",
            Self::InvalidArguments(_) | Self::MissingArgument(_) => "InvalidArguments",
        }
    }
}

/// Result type alias for McpError.
pub type Result<T> = std::result::Result<T, McpError>;

/// Result type alias for PoolError.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Result type alias for ExecError.
pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Result type alias for ProtocolError.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for SecurityError.
pub type SecurityResult<T> = std::result::Result<T, SecurityError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::ParseError.code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest("test".into()).code(), -32600);
        assert_eq!(ProtocolError::MethodNotFound("test".into()).code(), -32601);
        assert_eq!(ProtocolError::InvalidParams("test".into()).code(), -32602);
        assert_eq!(ProtocolError::InternalError("test".into()).code(), -32603);
    }

    #[test]
    fn test_error_conversion_keeps_kind() {
        let err: McpError = PoolError::ConnectFailed("refused".into()).into();
        assert!(matches!(err, McpError::Pool(_)));
        assert_eq!(err.kind(), "ConnectFailed");

        let err: McpError = ExecError::client_timeout(5000).into();
        assert_eq!(err.kind(), "Timeout");
        assert!(err.to_string().contains("5000ms"));

        let err: McpError = SecurityError::StatementDenied("DROP".into()).into();
        assert_eq!(err.kind(), "StatementDenied");
    }

    #[test]
    fn test_config_error_names_field() {
        assert_eq!(ConfigError::MissingField("host".into()).field(), "host");
        assert_eq!(ConfigError::invalid("port", "out of range").field(), "port");
    }

    #[test]
    fn test_poisoning_errors() {
        assert!(ExecError::ConnectionLost("eof".into()).poisons_connection());
        assert!(ExecError::client_timeout(10).poisons_connection());
        assert!(!ExecError::server_timeout("max_statement_time exceeded").poisons_connection());
        assert!(!ExecError::SyntaxError("near x".into()).poisons_connection());
        assert!(!ExecError::PermissionDenied("no".into()).poisons_connection());
    }
}
