//! Tool table: the five tool kinds, their definitions and typed arguments.

use crate::config::ConnectionConfig;
use crate::error::{McpError, Result, SchemaError, ToolError};
use crate::protocol::{CallToolResult, Tool};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

#[macro_export]
macro_rules! define_tool {
    (
        name: $name:expr,
        description: $desc:expr,
        schema: $schema:tt
    ) => {
        $crate::protocol::Tool {
            name: $name.into(),
            description: Some($desc.into()),
            input_schema: serde_json::json!($schema),
        }
    };
}

/// The tools exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ListDatabases,
    ListTables,
    GetTableSchema,
    ExecuteSql,
    ReloadConfig,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::ListDatabases,
        ToolKind::ListTables,
        ToolKind::GetTableSchema,
        ToolKind::ExecuteSql,
        ToolKind::ReloadConfig,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ListDatabases => "list_databases",
            Self::ListTables => "list_tables",
            Self::GetTableSchema => "get_table_schema",
            Self::ExecuteSql => "execute_sql",
            Self::ReloadConfig => "reload_config",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn definition(self) -> Tool {
        match self {
            Self::ListDatabases => define_tool! {
                name: self.name(),
                description: "List the databases visible to the configured MariaDB user.",
                schema: {
                    "type": "object",
                    "properties": {}
                }
            },
            Self::ListTables => define_tool! {
                name: self.name(),
                description: "List tables and views in a database. \
                    Uses the configured default database when 'database' is omitted.",
                schema: {
                    "type": "object",
                    "properties": {
                        "database": {
                            "type": "string",
                            "description": "Database name (optional if a default database is configured)"
                        }
                    }
                }
            },
            Self::GetTableSchema => define_tool! {
                name: self.name(),
                description: "Describe a table: columns with types, nullability, defaults and keys, \
                    indexes, engine, collation and row estimate.",
                schema: {
                    "type": "object",
                    "properties": {
                        "table_name": {
                            "type": "string",
                            "description": "Table to describe"
                        },
                        "database": {
                            "type": "string",
                            "description": "Database name (optional if a default database is configured)"
                        }
                    },
                    "required": ["table_name"]
                }
            },
            Self::ExecuteSql => define_tool! {
                name: self.name(),
                description: "Execute a single read-only SQL statement. \
                    Only SELECT, SHOW, DESCRIBE, DESC and EXPLAIN are allowed; \
                    nothing may follow a ';'. Empty results carry column metadata \
                    for SELECT statements only.",
                schema: {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The SQL statement to execute"
                        },
                        "database": {
                            "type": "string",
                            "description": "Database to run the statement in (optional)"
                        }
                    },
                    "required": ["query"]
                }
            },
            Self::ReloadConfig => define_tool! {
                name: self.name(),
                description: "Re-read connection settings from the environment and the .env \
                    file and rebuild the connection pool. In-flight queries are not interrupted.",
                schema: {
                    "type": "object",
                    "properties": {}
                }
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListTablesArgs {
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetTableSchemaArgs {
    pub table_name: String,
    #[serde(default)]
    pub database: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSqlArgs {
    pub query: String,
    #[serde(default)]
    pub database: Option<String>,
}

/// A parsed tool invocation.
#[derive(Debug)]
pub enum ToolCall {
    ListDatabases,
    ListTables(ListTablesArgs),
    GetTableSchema(GetTableSchemaArgs),
    ExecuteSql(ExecuteSqlArgs),
    ReloadConfig,
}

impl ToolCall {
    /// Resolves `name` and decodes `arguments` for it. `null` arguments count as `{}`.
    pub fn parse(name: &str, arguments: Value) -> Result<Self> {
        let kind = ToolKind::from_name(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let arguments = match arguments {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => arguments,
            other => {
                return Err(ToolError::InvalidArguments(format!(
                    "Arguments must be an object, got {}",
                    json_type(&other)
                ))
                .into());
            }
        };

        Ok(match kind {
            ToolKind::ListDatabases => Self::ListDatabases,
            ToolKind::ListTables => Self::ListTables(decode(arguments)?),
            ToolKind::GetTableSchema => Self::GetTableSchema(decode(arguments)?),
            ToolKind::ExecuteSql => Self::ExecuteSql(decode(arguments)?),
            ToolKind::ReloadConfig => Self::ReloadConfig,
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::ListDatabases => ToolKind::ListDatabases,
            Self::ListTables(_) => ToolKind::ListTables,
            Self::GetTableSchema(_) => ToolKind::GetTableSchema,
            Self::ExecuteSql(_) => ToolKind::ExecuteSql,
            Self::ReloadConfig => ToolKind::ReloadConfig,
        }
    }
}

fn decode<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()).into())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Target database for a catalog tool: the argument, else the config's default database.
pub(crate) fn require_database(
    config: &ConnectionConfig,
    requested: Option<&str>,
) -> std::result::Result<String, SchemaError> {
    config
        .resolve_database(requested)
        .map(str::to_string)
        .ok_or(SchemaError::NoDatabaseSelected)
}

pub fn json_result<T: serde::Serialize>(data: &T) -> CallToolResult {
    CallToolResult::json(data)
}

/// Structured failure: `{"error": {"kind", "message"}}` with `isError` set.
pub fn error_result(error: &McpError) -> CallToolResult {
    CallToolResult::structured_error(error.kind(), error.to_string())
}
