//! Tabular ingestion pipeline.
//!
//! Two entry points write into a local store:
//!
//! - [`ingest_grid`] takes rows of strings (spreadsheets, CSV), runs type
//!   inference and header derivation, then creates a typed table and bulk
//!   inserts every data row inside one transaction.
//! - [`create_table_from_records`] takes flattened JSON records (remote
//!   connectors) and creates an all-TEXT table from the union of keys seen
//!   in the first records.
//!
//! [`insert_records`] appends records to an existing table using that
//! table's current columns; the refresh engine relies on it.

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::db::quote_ident;
use crate::flatten::{collect_columns, format_value};
use crate::infer::{analyse_grid, derive_headers, ColumnType, HeaderSuggester};
use crate::models::{Record, TableSchema};
use crate::sanitize::{sanitize_name, UniqueNames};
use crate::store::sqlite_columns;

/// Records inspected when deriving the columns of a JSON-backed table.
pub const RECORD_SCHEMA_SAMPLE: usize = 10;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A value ready to bind into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Coerce a raw cell to `ty`. A failed numeric parse becomes NULL.
    pub fn coerce(raw: &str, ty: ColumnType) -> Self {
        match ty {
            ColumnType::Integer => raw
                .parse::<i64>()
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
            ColumnType::Real => raw
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or(SqlValue::Null),
            ColumnType::Text => SqlValue::Text(raw.to_string()),
        }
    }

    pub fn from_text(value: Option<String>) -> Self {
        value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
    }
}

pub(crate) fn bind_value(query: SqliteQuery<'_>, value: SqlValue) -> SqliteQuery<'_> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(i) => query.bind(i),
        SqlValue::Real(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
    }
}

pub(crate) fn insert_sql(table: &str, columns: &[String]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols.join(", "),
        placeholders
    )
}

/// Create `table` from a grid of string cells and insert its data rows.
///
/// The CREATE and every INSERT run in a single transaction, so a failure
/// leaves no partial table behind. Returns the created schema.
pub async fn ingest_grid(
    pool: &SqlitePool,
    table: &str,
    rows: &[Vec<String>],
    suggester: Option<&dyn HeaderSuggester>,
) -> Result<TableSchema> {
    if rows.is_empty() {
        bail!("no rows to process");
    }

    let Some(schema) = analyse_grid(rows) else {
        bail!("no valid columns found in sheet");
    };
    let headers = derive_headers(&schema, suggester).await;

    let col_defs: Vec<String> = headers
        .iter()
        .zip(&schema.types)
        .map(|(h, t)| format!("{} {}", quote_ident(h), t.as_sql()))
        .collect();
    let create = format!("CREATE TABLE {} ({})", quote_ident(table), col_defs.join(", "));
    let insert = insert_sql(table, &headers);

    let mut tx = pool.begin().await?;

    sqlx::query(&create)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to create table {}", table))?;

    let data = schema.data_rows();
    for (i, row) in data.iter().enumerate() {
        let mut q = sqlx::query(&insert);
        for (j, ty) in schema.types.iter().enumerate() {
            let value = match row.get(j) {
                Some(raw) => SqlValue::coerce(raw, *ty),
                None => SqlValue::Null,
            };
            q = bind_value(q, value);
        }
        q.execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert row {} in sheet {}", i + 1, table))?;
    }

    tx.commit().await?;
    debug!(table, rows = data.len(), columns = headers.len(), "ingested grid");

    Ok(TableSchema {
        table_name: table.to_string(),
        columns: headers,
    })
}

/// Sanitize every key of a flattened record, keeping key order.
pub fn sanitize_record(record: &Record) -> Record {
    let mut unique = UniqueNames::new();
    record
        .iter()
        .map(|(k, v)| (unique.claim(&sanitize_name(k)), v.clone()))
        .collect()
}

/// Create an all-TEXT table from flattened records and insert them.
///
/// Columns are the union of keys over the first [`RECORD_SCHEMA_SAMPLE`]
/// records. Rows that fail to insert are logged and skipped. An empty
/// input creates nothing and returns `None`.
pub async fn create_table_from_records(
    pool: &SqlitePool,
    table: &str,
    records: &[Record],
) -> Result<Option<TableSchema>> {
    if records.is_empty() {
        return Ok(None);
    }

    let records: Vec<Record> = records.iter().map(sanitize_record).collect();
    let columns = collect_columns(&records, RECORD_SCHEMA_SAMPLE);
    if columns.is_empty() {
        bail!("records for table {} have no fields", table);
    }

    let col_defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        col_defs.join(", ")
    ))
    .execute(pool)
    .await
    .with_context(|| format!("failed to create table {}", table))?;

    let inserted = insert_with_columns(pool, table, &columns, &records).await?;
    debug!(table, rows = inserted, "created table from records");

    Ok(Some(TableSchema {
        table_name: table.to_string(),
        columns,
    }))
}

/// Append records to an existing table, mapping fields onto its current
/// columns. Fields with no matching column are dropped; columns with no
/// matching field get NULL. Returns the number of rows written.
pub async fn insert_records(pool: &SqlitePool, table: &str, records: &[Record]) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }
    let columns: Vec<String> = sqlite_columns(pool, table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    if columns.is_empty() {
        bail!("table {} has no columns", table);
    }
    let records: Vec<Record> = records.iter().map(sanitize_record).collect();
    insert_with_columns(pool, table, &columns, &records).await
}

async fn insert_with_columns(
    pool: &SqlitePool,
    table: &str,
    columns: &[String],
    records: &[Record],
) -> Result<u64> {
    let insert = insert_sql(table, columns);
    let mut tx = pool.begin().await?;
    let mut inserted = 0u64;

    for record in records {
        let mut q = sqlx::query(&insert);
        for col in columns {
            let value = record.get(col).and_then(format_value);
            q = bind_value(q, SqlValue::from_text(value));
        }
        match q.execute(&mut *tx).await {
            Ok(_) => inserted += 1,
            Err(e) => warn!(table, error = %e, "failed to insert row"),
        }
    }

    tx.commit().await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use crate::flatten::flatten;
    use serde_json::json;
    use sqlx::Row;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        (tmp, pool)
    }

    #[test]
    fn coercion_failures_become_null() {
        assert_eq!(SqlValue::coerce("12", ColumnType::Integer), SqlValue::Integer(12));
        assert_eq!(SqlValue::coerce("1.5", ColumnType::Integer), SqlValue::Null);
        assert_eq!(SqlValue::coerce("", ColumnType::Real), SqlValue::Null);
        assert_eq!(SqlValue::coerce("x", ColumnType::Text), SqlValue::Text("x".into()));
    }

    #[tokio::test]
    async fn grid_creates_typed_table() {
        let (_tmp, pool) = pool().await;
        let rows = grid(&[
            &["id", "name", "price"],
            &["1", "apple", "1.25"],
            &["2", "pear"],
            &["x3", "plum", "2"],
        ]);
        let schema = ingest_grid(&pool, "fruit", &rows, None).await.unwrap();
        assert_eq!(schema.columns, vec!["id", "name", "price"]);

        let cols = sqlite_columns(&pool, "fruit").await.unwrap();
        let types: Vec<&str> = cols.iter().map(|c| c.col_type.as_str()).collect();
        assert_eq!(types, vec!["TEXT", "TEXT", "REAL"]);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM fruit")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 3);

        let missing: Option<f64> =
            sqlx::query_scalar("SELECT price FROM fruit WHERE name = 'pear'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn grid_rejects_empty_and_blank_input() {
        let (_tmp, pool) = pool().await;
        let err = ingest_grid(&pool, "t", &[], None).await.unwrap_err();
        assert!(err.to_string().contains("no rows to process"));

        let blank = grid(&[&["", ""], &["", ""]]);
        let err = ingest_grid(&pool, "t", &blank, None).await.unwrap_err();
        assert!(err.to_string().contains("no valid columns"));
    }

    #[tokio::test]
    async fn failed_create_keeps_existing_table_intact() {
        let (_tmp, pool) = pool().await;
        let rows = grid(&[&["a"], &["1"]]);
        ingest_grid(&pool, "dup", &rows, None).await.unwrap();
        // Second CREATE fails inside the transaction.
        assert!(ingest_grid(&pool, "dup", &rows, None).await.is_err());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dup")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn records_become_text_table() {
        let (_tmp, pool) = pool().await;
        let records = vec![
            flatten(&json!({"id": 1, "customer": {"email": "a@x.io"}, "total": 9.5})),
            flatten(&json!({"id": 2, "line items": [1, 2]})),
        ];
        let schema = create_table_from_records(&pool, "orders", &records)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            schema.columns,
            vec!["id", "customer_email", "total", "line_items"]
        );

        let row = sqlx::query("SELECT id, total, line_items FROM orders WHERE id = '2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("id"), "2");
        assert_eq!(row.get::<Option<String>, _>("total"), None);
        assert_eq!(row.get::<String, _>("line_items"), "[1,2]");
    }

    #[tokio::test]
    async fn insert_records_uses_existing_columns() {
        let (_tmp, pool) = pool().await;
        let first = vec![flatten(&json!({"id": 1, "name": "a"}))];
        create_table_from_records(&pool, "items", &first).await.unwrap();

        let later = vec![flatten(&json!({"id": 2, "extra": "ignored"}))];
        let n = insert_records(&pool, "items", &later).await.unwrap();
        assert_eq!(n, 1);

        let name: Option<String> = sqlx::query_scalar("SELECT name FROM items WHERE id = '2'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(name, None);
    }

    #[tokio::test]
    async fn empty_records_create_nothing() {
        let (_tmp, pool) = pool().await;
        assert!(create_table_from_records(&pool, "none", &[])
            .await
            .unwrap()
            .is_none());
    }
}
