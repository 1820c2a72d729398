//! MariaDB/MySQL connector using `sqlx`.
//!
//! Statements go over the text protocol (COM_QUERY), so `SHOW`, `DESCRIBE` and `USE`
//! run exactly as written.

use crate::config::{ConnectionConfig, SslMode};
use crate::database::result::{CellValue, Column, QueryResult};
use crate::database::traits::{Connector, DatabaseConnection};
use crate::error::{ExecError, ExecResult, PoolError, PoolResult};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow, MySqlSslMode};
use sqlx::{Column as _, ConnectOptions, Connection, Executor, Row, Statement as _, TypeInfo, ValueRef};
use tracing::{debug, instrument};

/// Removes `NO_BACKSLASH_ESCAPES` from the session `sql_mode`, keeping every other flag,
/// so the server reads string literals the way the statement classifier lexes them.
pub(crate) const SESSION_SQL_MODE: &str = "SET SESSION sql_mode = TRIM(BOTH ',' FROM \
     REPLACE(CONCAT(',', @@SESSION.sql_mode, ','), ',NO_BACKSLASH_ESCAPES,', ','))";

/// Production connector for MariaDB and MySQL servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbConnector;

impl MariaDbConnector {
    pub fn new() -> Self {
        Self
    }

    fn options(config: &ConnectionConfig) -> MySqlConnectOptions {
        let ssl_mode = match config.ssl_mode {
            SslMode::Disabled => MySqlSslMode::Disabled,
            SslMode::Preferred => MySqlSslMode::Preferred,
            SslMode::Required => MySqlSslMode::Required,
        };
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose())
            .ssl_mode(ssl_mode)
            .disable_statement_logging();
        if let Some(database) = &config.default_database {
            options = options.database(database);
        }
        options
    }
}

#[async_trait]
impl Connector for MariaDbConnector {
    fn name(&self) -> &'static str {
        "mariadb"
    }

    #[instrument(skip(self, config), fields(host = %config.host, port = config.port))]
    async fn connect(&self, config: &ConnectionConfig) -> PoolResult<Box<dyn DatabaseConnection>> {
        let options = Self::options(config);
        let attempt = open_session(&options);

        match tokio::time::timeout(config.connect_timeout, attempt).await {
            Ok(Ok(conn)) => {
                debug!(user = %config.user, "Connected to MariaDB");
                Ok(Box::new(MariaDbConnection { conn }))
            }
            Ok(Err(e)) => Err(PoolError::ConnectFailed(e.to_string())),
            Err(_) => Err(PoolError::ConnectFailed(format!(
                "Timed out after {}s connecting to {}:{}",
                config.connect_timeout.as_secs(),
                config.host,
                config.port
            ))),
        }
    }
}

async fn open_session(options: &MySqlConnectOptions) -> Result<MySqlConnection, sqlx::Error> {
    let mut conn = MySqlConnection::connect_with(options).await?;
    Executor::execute(&mut conn, SESSION_SQL_MODE).await?;
    Ok(conn)
}

/// Whether `sql` is a SELECT, possibly parenthesized.
fn is_select(sql: &str) -> bool {
    let head = sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
    head.get(..6).is_some_and(|word| word.eq_ignore_ascii_case("SELECT"))
        && !head[6..].starts_with(|c: char| c.is_ascii_alphanumeric() || c == '_')
}

/// One MariaDB session.
pub struct MariaDbConnection {
    conn: MySqlConnection,
}

#[async_trait]
impl DatabaseConnection for MariaDbConnection {
    async fn ping(&mut self) -> ExecResult<()> {
        self.conn.ping().await.map_err(map_error)
    }

    async fn query(&mut self, sql: &str) -> ExecResult<QueryResult> {
        let rows: Vec<MySqlRow> = Executor::fetch_all(&mut self.conn, sql)
            .await
            .map_err(map_error)?;

        // Column metadata comes from the first row. An empty SELECT is prepared (not
        // executed) to recover it; other empty results carry no columns.
        let columns: Vec<Column> = match rows.first() {
            Some(row) => row
                .columns()
                .iter()
                .map(|col| Column::new(col.name(), col.type_info().name()))
                .collect(),
            None if is_select(sql) => self.prepared_columns(sql).await,
            None => Vec::new(),
        };

        let rows = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| decode_cell(row, i, &col.data_type))
                    .collect()
            })
            .collect();

        Ok(QueryResult::new(columns, rows))
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Error while closing connection");
        }
    }
}

impl MariaDbConnection {
    async fn prepared_columns(&mut self, sql: &str) -> Vec<Column> {
        match Executor::prepare(&mut self.conn, sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|col| Column::new(col.name(), col.type_info().name()))
                .collect(),
            Err(e) => {
                debug!(error = %e, "Could not describe empty result");
                Vec::new()
            }
        }
    }
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> CellValue {
    match row.try_get_raw(index) {
        Ok(value) if !value.is_null() => {}
        _ => return CellValue::Null,
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(index).ok().map(CellValue::Bool),
        t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(index).ok().map(CellValue::UInt),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).ok().map(CellValue::Int)
        }
        "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(index).ok().map(CellValue::Float),
        "DECIMAL" => row.try_get::<Decimal, _>(index).ok().map(CellValue::Decimal),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .ok()
            .map(CellValue::DateTime),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .ok()
            .map(|dt| CellValue::DateTime(dt.and_utc())),
        "JSON" => match text_or_bytes(row, index) {
            CellValue::String(s) => serde_json::from_str(&s).ok().map(CellValue::Json),
            _ => None,
        },
        _ => None,
    };

    // Dates, times, zero dates and anything unrecognized fall back to the raw text.
    decoded.unwrap_or_else(|| text_or_bytes(row, index))
}

/// Raw value as UTF-8 text, or bytes when it is not valid UTF-8.
fn text_or_bytes(row: &MySqlRow, index: usize) -> CellValue {
    match row.try_get_unchecked::<Vec<u8>, _>(index) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => CellValue::String(text),
            Err(e) => CellValue::Bytes(e.into_bytes()),
        },
        Err(_) => CellValue::Null,
    }
}

/// Maps a driver error to an [`ExecError`] kind, keeping the server message.
pub fn map_error(err: sqlx::Error) -> ExecError {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            match db.try_downcast_ref::<MySqlDatabaseError>() {
                Some(mysql) => error_for_number(mysql.number(), message),
                None => ExecError::Other(message),
            }
        }
        sqlx::Error::Io(e) => ExecError::ConnectionLost(e.to_string()),
        sqlx::Error::Tls(e) => ExecError::ConnectionLost(e.to_string()),
        sqlx::Error::Protocol(message) => ExecError::ConnectionLost(message),
        e @ (sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed) => {
            ExecError::ConnectionLost(e.to_string())
        }
        other => ExecError::Other(other.to_string()),
    }
}

/// Server error numbers to error kinds.
pub fn error_for_number(number: u16, message: String) -> ExecError {
    match number {
        1064 | 1149 => ExecError::SyntaxError(message),
        1044 | 1045 | 1142 | 1143 | 1227 | 1370 => ExecError::PermissionDenied(message),
        1049 => ExecError::UnknownDatabase(message),
        1146 => ExecError::UnknownTable(message),
        // max_statement_time (MariaDB) and max_execution_time (MySQL)
        1969 | 3024 => ExecError::server_timeout(message),
        // Server shutdown, killed connection, lost connection
        1053 | 1927 | 2006 | 2013 => ExecError::ConnectionLost(message),
        _ => ExecError::Other(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_numbers_map_to_kinds() {
        let kind = |n: u16| error_for_number(n, "msg".into()).kind();
        assert_eq!(kind(1064), "SyntaxError");
        assert_eq!(kind(1142), "PermissionDenied");
        assert_eq!(kind(1045), "PermissionDenied");
        assert_eq!(kind(1049), "UnknownDatabase");
        assert_eq!(kind(1146), "UnknownTable");
        assert_eq!(kind(1969), "Timeout");
        assert_eq!(kind(3024), "Timeout");
        assert_eq!(kind(2013), "ConnectionLost");
        assert_eq!(kind(1292), "Other");
    }

    #[test]
    fn test_message_is_preserved() {
        let err = error_for_number(1064, "You have an error in your SQL syntax".into());
        assert!(err.to_string().contains("You have an error in your SQL syntax"));

        let err = error_for_number(
            1969,
            "Query execution was interrupted (max_statement_time exceeded)".into(),
        );
        assert!(err.to_string().contains("max_statement_time exceeded"));
        assert!(!err.poisons_connection());
    }

    #[test]
    fn test_transport_errors_are_connection_lost() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(map_error(sqlx::Error::Io(io)), ExecError::ConnectionLost(_)));
        assert!(matches!(
            map_error(sqlx::Error::Protocol("bad packet".into())),
            ExecError::ConnectionLost(_)
        ));
        assert!(matches!(
            map_error(sqlx::Error::RowNotFound),
            ExecError::Other(_)
        ));
    }

    #[test]
    fn test_connector_name() {
        assert_eq!(MariaDbConnector::new().name(), "mariadb");
    }

    #[test]
    fn test_empty_select_is_described() {
        assert!(is_select("SELECT * FROM t WHERE 0"));
        assert!(is_select("  select a from t"));
        assert!(is_select("(SELECT 1) UNION (SELECT 2)"));
        assert!(is_select("SELECT\n1"));
        assert!(!is_select("SHOW TABLES"));
        assert!(!is_select("SELECTED"));
        assert!(!is_select("select_x"));
        assert!(!is_select("SEL"));
    }

    #[test]
    fn test_session_sql_mode_drops_only_backslash_flag() {
        assert!(SESSION_SQL_MODE.starts_with("SET SESSION sql_mode"));
        assert!(SESSION_SQL_MODE.contains("',NO_BACKSLASH_ESCAPES,', ','"));
        assert!(SESSION_SQL_MODE.contains("@@SESSION.sql_mode"));
    }
}
