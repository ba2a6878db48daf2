use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ordersight_core::schema::{SchemaGraph, Table};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use thiserror::Error;

/// One JSON object per result row, column names as keys.
pub type QueryRows = Vec<Value>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("table '{0}' does not exist")]
    UnknownTable(String),
    #[error("{0}")]
    Query(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// The introspection and execution surface the agent's tools call into.
#[async_trait]
pub trait SqlDatabase: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;
    async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError>;
    /// Runs a single read-only statement and returns its rows unmodified.
    async fn run_read_only(&self, query: &str) -> Result<QueryRows, DatabaseError>;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
}

/// Postgres adapter restricted to the tables of the schema graph.
pub struct PgDatabase {
    pool: PgPool,
    schema: Arc<SchemaGraph>,
    statement_timeout: Duration,
}

impl PgDatabase {
    pub fn new(pool: PgPool, schema: Arc<SchemaGraph>, statement_timeout: Duration) -> Self {
        Self {
            pool,
            schema,
            statement_timeout,
        }
    }

    fn allowed(&self, name: &str) -> Result<&Table, DatabaseError> {
        self.schema
            .table(name)
            .ok_or_else(|| DatabaseError::UnknownTable(name.trim().to_string()))
    }
}

#[async_trait]
impl SqlDatabase for PgDatabase {
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let present = sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE'",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(self
            .schema
            .table_names()
            .into_iter()
            .filter(|name| present.iter().any(|p| p.eq_ignore_ascii_case(name)))
            .map(str::to_string)
            .collect())
    }

    async fn table_info(&self, tables: &[String]) -> Result<String, DatabaseError> {
        let mut sections = Vec::with_capacity(tables.len());
        for name in tables {
            let table = self.allowed(name)?;
            let columns = sqlx::query_as::<_, ColumnInfo>(
                "SELECT column_name::text, data_type::text, is_nullable::text \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND lower(table_name) = lower($1) \
                 ORDER BY ordinal_position",
            )
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await?;
            if columns.is_empty() {
                return Err(DatabaseError::UnknownTable(table.name.clone()));
            }
            sections.push(render_table_info(table, &columns));
        }
        Ok(sections.join("\n\n"))
    }

    async fn run_read_only(&self, query: &str) -> Result<QueryRows, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        // Simple protocol: the query text is sent as-is and every column comes back as text.
        let rows = sqlx::Executor::fetch_all(&mut *tx, sqlx::raw_sql(query)).await;
        tx.rollback().await?;

        let rows = rows.map_err(|e| match e {
            sqlx::Error::Database(db) => DatabaseError::Query(db.message().to_string()),
            other => DatabaseError::Sqlx(other),
        })?;
        let rows = rows.iter().map(row_to_json).collect::<Result<QueryRows, _>>()?;
        tracing::info!(rows = rows.len(), "query executed");
        Ok(rows)
    }
}

/// One result row as a JSON object keyed by column name.
///
/// A repeated column name (e.g. `Id` from both sides of a join) keeps its value under
/// `<name>_<position>`, position being 1-based.
fn row_to_json(row: &PgRow) -> Result<Value, sqlx::Error> {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        let text: Option<String> = row.try_get_unchecked(index)?;
        let key = column_key(&object, column.name(), index);
        object.insert(key, cell_to_json(column.type_info().name(), text));
    }
    Ok(Value::Object(object))
}

fn column_key(existing: &Map<String, Value>, name: &str, index: usize) -> String {
    let mut key = name.to_string();
    while existing.contains_key(&key) {
        key = format!("{key}_{}", index + 1);
    }
    key
}

/// Converts the text form of one cell. Numbers and booleans become JSON scalars,
/// `json`/`jsonb` is parsed, and everything else (including `numeric`, kept exact)
/// stays a string.
fn cell_to_json(type_name: &str, text: Option<String>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    match type_name {
        "BOOL" => match text.as_str() {
            "t" => Value::Bool(true),
            "f" => Value::Bool(false),
            _ => Value::String(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" => match text.parse::<i64>() {
            Ok(n) => Value::from(n),
            Err(_) => Value::String(text),
        },
        "FLOAT4" | "FLOAT8" => match text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            Some(n) => Value::Number(n),
            None => Value::String(text),
        },
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

/// DDL-style description of one table: live columns plus the keys the schema graph declares.
///
/// Sample rows are deliberately absent; they would bypass the partition filter.
pub fn render_table_info(table: &Table, columns: &[ColumnInfo]) -> String {
    let mut lines: Vec<String> = columns
        .iter()
        .map(|column| {
            let nullable = if column.is_nullable.eq_ignore_ascii_case("NO") {
                " NOT NULL"
            } else {
                ""
            };
            format!("\t{} {}{nullable}", column.column_name, column.data_type)
        })
        .collect();
    lines.push(format!("\tPRIMARY KEY ({})", table.primary_key));
    for fk in &table.foreign_keys {
        lines.push(format!(
            "\tFOREIGN KEY ({}) REFERENCES {} ({})",
            fk.column, fk.references_table, fk.references_column
        ));
    }

    let mut out = format!("CREATE TABLE {} (\n{}\n)", table.name, lines.join(",\n"));
    if let Some(description) = &table.description {
        out.push_str(&format!("\n/* {description} */"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str, nullable: &str) -> ColumnInfo {
        ColumnInfo {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: nullable.to_string(),
        }
    }

    async fn database_if_available() -> Option<PgDatabase> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };
        // one connection so the temp fixtures are visible inside the read-only transaction
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .ok()?;
        sqlx::raw_sql(
            "CREATE TEMP TABLE orders_fixture (id int, serviceteamid int, note text); \
             CREATE TEMP TABLE pets_fixture (id int, orderid int); \
             INSERT INTO orders_fixture VALUES (1, 101, NULL), (2, 999, 'other partition'); \
             INSERT INTO pets_fixture VALUES (50, 1);",
        )
        .execute(&pool)
        .await
        .ok()?;
        Some(PgDatabase::new(
            pool,
            Arc::new(SchemaGraph::standard()),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn join_rows_keep_both_id_columns() {
        let Some(db) = database_if_available().await else {
            return;
        };
        let rows = db
            .run_read_only(
                "SELECT * FROM orders_fixture o JOIN pets_fixture p ON p.orderid = o.id \
                 WHERE serviceteamid IN (101,205)",
            )
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![serde_json::json!({
                "id": 1,
                "serviceteamid": 101,
                "note": null,
                "id_4": 50,
                "orderid": 1
            })]
        );
    }

    #[tokio::test]
    async fn trailing_comment_does_not_break_the_query() {
        let Some(db) = database_if_available().await else {
            return;
        };
        let rows = db
            .run_read_only("SELECT id FROM orders_fixture WHERE serviceteamid IN (101,205) -- open orders")
            .await
            .unwrap();
        assert_eq!(rows, vec![serde_json::json!({ "id": 1 })]);
    }

    #[tokio::test]
    async fn execution_errors_come_back_as_query_errors() {
        let Some(db) = database_if_available().await else {
            return;
        };
        let err = db
            .run_read_only("SELECT id / 0 FROM orders_fixture WHERE serviceteamid IN (101,205)")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Query(message) if message.contains("division by zero")));
    }

    #[test]
    fn repeated_column_names_keep_every_value() {
        let mut object = Map::new();
        object.insert(column_key(&object, "id", 0), Value::from(1));
        object.insert(column_key(&object, "serviceteamid", 1), Value::from(101));
        object.insert(column_key(&object, "id", 2), Value::from(50));
        assert_eq!(object["id"], 1);
        assert_eq!(object["id_3"], 50);
        assert_eq!(object.len(), 3);
    }

    #[test]
    fn cells_keep_their_values() {
        assert_eq!(cell_to_json("INT4", Some("101".to_string())), Value::from(101));
        assert_eq!(cell_to_json("BOOL", Some("f".to_string())), Value::Bool(false));
        assert_eq!(cell_to_json("FLOAT8", Some("2.5".to_string())), Value::from(2.5));
        assert_eq!(
            cell_to_json("NUMERIC", Some("1234.50".to_string())),
            Value::String("1234.50".to_string())
        );
        assert_eq!(
            cell_to_json("JSONB", Some(r#"{"a": 1}"#.to_string())),
            serde_json::json!({ "a": 1 })
        );
        assert_eq!(
            cell_to_json("TEXT", Some("O'Brien".to_string())),
            Value::String("O'Brien".to_string())
        );
        assert_eq!(cell_to_json("TEXT", None), Value::Null);
    }

    #[test]
    fn table_info_lists_columns_and_declared_keys() {
        let schema = SchemaGraph::standard();
        let pets = schema.table("pets").expect("Pets is in the graph");
        let rendered = render_table_info(
            pets,
            &[
                column("id", "integer", "NO"),
                column("orderid", "integer", "NO"),
                column("name", "text", "YES"),
            ],
        );
        assert!(rendered.starts_with("CREATE TABLE Pets (\n\tid integer NOT NULL,"));
        assert!(rendered.contains("\tname text,\n"));
        assert!(rendered.contains("FOREIGN KEY (OrderId) REFERENCES Orders (Id)"));
        assert!(rendered.ends_with("/* pets information */"));
    }
}
