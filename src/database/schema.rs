//! Catalog queries assembled into structured schema descriptions.

use crate::database::executor::{QueryExecutor, quote_identifier, quote_literal};
use crate::database::pool::PooledConnection;
use crate::database::result::{
    ColumnSchema, IndexInfo, PartialSchema, QueryResult, SchemaOutcome, SubQueryFailure,
    TableSchema,
};
use crate::error::{ExecError, McpError, SchemaError};
use tracing::{debug, instrument, warn};

/// Issues catalog queries through a [`QueryExecutor`].
#[derive(Debug, Clone, Default)]
pub struct SchemaIntrospector {
    executor: QueryExecutor,
}

impl SchemaIntrospector {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Databases visible to the credential, in server order.
    #[instrument(skip(self, lease))]
    pub async fn list_databases(&self, lease: &mut PooledConnection) -> Result<Vec<String>, McpError> {
        let result = self.executor.execute(lease, "SHOW DATABASES", None).await?;
        Ok(result.first_column_text())
    }

    /// Tables and views of `database`, in server order.
    #[instrument(skip(self, lease))]
    pub async fn list_tables(
        &self,
        lease: &mut PooledConnection,
        database: &str,
    ) -> Result<Vec<String>, McpError> {
        let sql = format!("SHOW FULL TABLES FROM {}", quote_identifier(database));
        let result = self
            .executor
            .execute(lease, &sql, None)
            .await
            .map_err(|e| match e {
                ExecError::UnknownDatabase(_) => {
                    McpError::from(SchemaError::UnknownDatabase(database.to_string()))
                }
                other => other.into(),
            })?;
        Ok(result.first_column_text())
    }

    /// Columns, indexes and table status of `database`.`table`.
    ///
    /// The column query must succeed. Index and status failures are collected into a
    /// [`PartialSchema`] next to whatever was assembled.
    #[instrument(skip(self, lease))]
    pub async fn get_table_schema(
        &self,
        lease: &mut PooledConnection,
        database: &str,
        table: &str,
    ) -> Result<SchemaOutcome, McpError> {
        let db = quote_identifier(database);
        let tbl = quote_identifier(table);
        let unknown_table = || SchemaError::UnknownTable {
            database: database.to_string(),
            table: table.to_string(),
        };

        let columns_sql = format!("SHOW FULL COLUMNS FROM {} FROM {}", tbl, db);
        let columns = match self.executor.execute(lease, &columns_sql, None).await {
            Ok(result) if result.is_empty() => return Err(unknown_table().into()),
            Ok(result) => parse_columns(&result),
            Err(ExecError::UnknownTable(_)) => return Err(unknown_table().into()),
            Err(ExecError::UnknownDatabase(_)) => {
                return Err(SchemaError::UnknownDatabase(database.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut schema = TableSchema::new(database, table);
        schema.columns = columns;
        let mut failures = Vec::new();

        let index_sql = format!("SHOW INDEX FROM {} FROM {}", tbl, db);
        match self.executor.execute(lease, &index_sql, None).await {
            Ok(result) => schema.indexes = parse_indexes(&result),
            Err(e) => failures.push(failure("indexes", e)),
        }

        let status_sql = format!("SHOW TABLE STATUS FROM {} WHERE Name = {}", db, quote_literal(table));
        match self.executor.execute(lease, &status_sql, None).await {
            Ok(result) => apply_status(&mut schema, &result),
            Err(e) => failures.push(failure("status", e)),
        }

        debug!(
            columns = schema.columns.len(),
            indexes = schema.indexes.len(),
            failures = failures.len(),
            "Schema assembled"
        );

        if failures.is_empty() {
            Ok(SchemaOutcome::Complete(schema))
        } else {
            warn!(failures = failures.len(), "Returning partial schema");
            Ok(SchemaOutcome::Partial(PartialSchema { schema, failures }))
        }
    }
}

fn failure(section: &'static str, error: ExecError) -> SubQueryFailure {
    SubQueryFailure {
        section,
        kind: error.kind(),
        message: error.to_string(),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn parse_columns(result: &QueryResult) -> Vec<ColumnSchema> {
    result
        .records()
        .filter_map(|record| {
            Some(ColumnSchema {
                name: record.text("Field")?,
                data_type: record.text("Type").unwrap_or_default(),
                nullable: record
                    .text("Null")
                    .is_some_and(|v| v.eq_ignore_ascii_case("YES")),
                default: record.text("Default"),
                key_info: non_empty(record.text("Key")),
                extra: non_empty(record.text("Extra")),
                collation: non_empty(record.text("Collation")),
                comment: non_empty(record.text("Comment")),
            })
        })
        .collect()
}

fn parse_indexes(result: &QueryResult) -> Vec<IndexInfo> {
    // (position within index, column) per index, in first-seen order
    let mut indexes: Vec<(IndexInfo, Vec<(u64, String)>)> = Vec::new();

    for record in result.records() {
        let Some(name) = record.text("Key_name") else {
            continue;
        };
        let column = record
            .text("Column_name")
            .or_else(|| record.text("Expression"))
            .unwrap_or_default();
        let seq = record.unsigned("Seq_in_index").unwrap_or(0);

        let entry = match indexes.iter().position(|(index, _)| index.name == name) {
            Some(i) => &mut indexes[i],
            None => {
                let is_unique = record.unsigned("Non_unique") == Some(0);
                indexes.push((
                    IndexInfo {
                        is_primary: name == "PRIMARY",
                        name,
                        columns: vec![],
                        is_unique,
                        index_type: non_empty(record.text("Index_type")),
                    },
                    Vec::new(),
                ));
                let last = indexes.len() - 1;
                &mut indexes[last]
            }
        };
        entry.1.push((seq, column));
    }

    indexes
        .into_iter()
        .map(|(mut index, mut columns)| {
            columns.sort_by_key(|(seq, _)| *seq);
            index.columns = columns.into_iter().map(|(_, c)| c).collect();
            index
        })
        .collect()
}

fn apply_status(schema: &mut TableSchema, result: &QueryResult) {
    let Some(record) = result.records().next() else {
        return;
    };
    schema.engine = record.text("Engine");
    schema.row_count_estimate = record.unsigned("Rows");
    schema.collation = record.text("Collation");
    schema.auto_increment = record.unsigned("Auto_increment");
    schema.data_length = record.unsigned("Data_length");
    schema.create_time = record.text("Create_time");
    schema.comment = non_empty(record.text("Comment"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::pool::ConnectionPool;
    use crate::database::result::CellValue;
    use crate::database::testing::{ScriptedConnector, config_for, rows};
    use std::sync::Arc;
    use std::time::Duration;

    const COLUMNS_SQL: &str = "SHOW FULL COLUMNS FROM `orders` FROM `shop`";
    const INDEX_SQL: &str = "SHOW INDEX FROM `orders` FROM `shop`";
    const STATUS_SQL: &str = "SHOW TABLE STATUS FROM `shop` WHERE Name = 'orders'";

    fn column_rows() -> QueryResult {
        let c = |v: &str| CellValue::from(v);
        rows(
            &["Field", "Type", "Collation", "Null", "Key", "Default", "Extra", "Privileges", "Comment"],
            vec![
                vec![c("id"), c("int(11)"), CellValue::Null, c("NO"), c("PRI"), CellValue::Null, c("auto_increment"), c("select"), c("")],
                vec![c("customer_id"), c("int(11)"), CellValue::Null, c("NO"), c("MUL"), CellValue::Null, c(""), c("select"), c("")],
                vec![c("note"), c("varchar(255)"), c("utf8mb4_general_ci"), c("YES"), c(""), c("n/a"), c(""), c("select"), c("free text")],
            ],
        )
    }

    fn index_rows() -> QueryResult {
        let c = |v: &str| CellValue::from(v);
        rows(
            &["Table", "Non_unique", "Key_name", "Seq_in_index", "Column_name", "Index_type"],
            vec![
                vec![c("orders"), CellValue::Int(0), c("PRIMARY"), CellValue::Int(1), c("id"), c("BTREE")],
                vec![c("orders"), CellValue::Int(1), c("idx_customer"), CellValue::Int(2), c("id"), c("BTREE")],
                vec![c("orders"), CellValue::Int(1), c("idx_customer"), CellValue::Int(1), c("customer_id"), c("BTREE")],
            ],
        )
    }

    fn status_rows() -> QueryResult {
        let c = |v: &str| CellValue::from(v);
        rows(
            &["Name", "Engine", "Rows", "Data_length", "Auto_increment", "Create_time", "Collation", "Comment"],
            vec![vec![
                c("orders"),
                c("InnoDB"),
                CellValue::UInt(1200),
                CellValue::UInt(65536),
                CellValue::UInt(1201),
                c("2024-01-01 00:00:00"),
                c("utf8mb4_general_ci"),
                c(""),
            ]],
        )
    }

    async fn lease_for(connector: &ScriptedConnector) -> PooledConnection {
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(config_for("db.local")),
            Arc::new(connector.clone()),
            1,
        ));
        pool.acquire(Duration::ZERO).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_schema() {
        let connector = ScriptedConnector::new();
        connector
            .respond(COLUMNS_SQL, column_rows())
            .respond(INDEX_SQL, index_rows())
            .respond(STATUS_SQL, status_rows());
        let mut lease = lease_for(&connector).await;

        let outcome = SchemaIntrospector::default()
            .get_table_schema(&mut lease, "shop", "orders")
            .await
            .unwrap();
        assert!(!outcome.is_partial());

        let schema = outcome.schema();
        assert_eq!(schema.database_name, "shop");
        assert_eq!(schema.columns.len(), 3);
        assert_eq!(schema.columns[0].key_info.as_deref(), Some("PRI"));
        assert!(!schema.columns[0].nullable);
        assert!(schema.columns[2].nullable);
        assert_eq!(schema.columns[2].default.as_deref(), Some("n/a"));
        assert_eq!(schema.columns[2].comment.as_deref(), Some("free text"));
        assert_eq!(schema.columns[1].extra, None);

        assert_eq!(schema.indexes.len(), 2);
        assert!(schema.indexes[0].is_primary && schema.indexes[0].is_unique);
        assert_eq!(schema.indexes[1].columns, vec!["customer_id", "id"]);
        assert!(!schema.indexes[1].is_unique);

        assert_eq!(schema.engine.as_deref(), Some("InnoDB"));
        assert_eq!(schema.row_count_estimate, Some(1200));
        assert_eq!(schema.auto_increment, Some(1201));
        assert_eq!(schema.comment, None);
    }

    #[tokio::test]
    async fn test_index_failure_yields_partial_schema() {
        let connector = ScriptedConnector::new();
        connector
            .respond(COLUMNS_SQL, column_rows())
            .fail(INDEX_SQL, ExecError::PermissionDenied("SHOW INDEX denied".into()))
            .respond(STATUS_SQL, status_rows());
        let mut lease = lease_for(&connector).await;

        let outcome = SchemaIntrospector::default()
            .get_table_schema(&mut lease, "shop", "orders")
            .await
            .unwrap();
        let SchemaOutcome::Partial(partial) = outcome else {
            panic!("expected a partial schema");
        };
        assert_eq!(partial.schema.columns.len(), 3);
        assert_eq!(partial.schema.engine.as_deref(), Some("InnoDB"));
        assert_eq!(partial.failures.len(), 1);
        assert_eq!(partial.failures[0].section, "indexes");
        assert_eq!(partial.failures[0].kind, "PermissionDenied");
    }

    #[tokio::test]
    async fn test_missing_table() {
        let connector = ScriptedConnector::new();
        connector.fail(
            COLUMNS_SQL,
            ExecError::UnknownTable("Table 'shop.orders' doesn't exist".into()),
        );
        let mut lease = lease_for(&connector).await;

        let err = SchemaIntrospector::default()
            .get_table_schema(&mut lease, "shop", "orders")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UnknownTable");
        assert_eq!(connector.executed(), vec![COLUMNS_SQL]);
    }

    #[tokio::test]
    async fn test_empty_column_list_is_unknown_table() {
        let connector = ScriptedConnector::new();
        let mut lease = lease_for(&connector).await;

        let err = SchemaIntrospector::default()
            .get_table_schema(&mut lease, "shop", "orders")
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Schema(SchemaError::UnknownTable { .. })));
    }

    #[tokio::test]
    async fn test_list_tables_unknown_database() {
        let connector = ScriptedConnector::new();
        connector.fail(
            "SHOW FULL TABLES FROM `nope`",
            ExecError::UnknownDatabase("Unknown database 'nope'".into()),
        );
        let mut lease = lease_for(&connector).await;

        let err = SchemaIntrospector::default()
            .list_tables(&mut lease, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Schema(SchemaError::UnknownDatabase(ref db)) if db == "nope"));
    }

    #[tokio::test]
    async fn test_list_databases_keeps_server_order() {
        let connector = ScriptedConnector::new();
        connector.respond(
            "SHOW DATABASES",
            rows(
                &["Database"],
                vec![
                    vec!["information_schema".into()],
                    vec!["shop".into()],
                    vec!["analytics".into()],
                ],
            ),
        );
        let mut lease = lease_for(&connector).await;
        let introspector = SchemaIntrospector::default();

        let first = introspector.list_databases(&mut lease).await.unwrap();
        let second = introspector.list_databases(&mut lease).await.unwrap();
        assert_eq!(first, vec!["information_schema", "shop", "analytics"]);
        assert_eq!(first, second);
    }
}
