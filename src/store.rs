//! Read access to the tables behind a data source.
//!
//! File and API imports live in a per-source SQLite store; MySQL-protocol
//! sources registered without a local copy are queried in place. Both are
//! wrapped by [`TableStore`] so callers never branch on the backend. Rows
//! come back as ordered JSON records.

use anyhow::{Context, Result};
use mysql_async::prelude::Queryable;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};

use crate::db::quote_ident;
use crate::models::{ColumnInfo, Record};

/// Rows returned by [`TableStore::rows`] when the caller passes no limit.
pub const DEFAULT_ROW_LIMIT: i64 = 100;

pub enum TableStore {
    Local(SqlitePool),
    Remote(mysql_async::Pool),
}

impl TableStore {
    /// User tables, in catalogue order.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        match self {
            TableStore::Local(pool) => {
                let names: Vec<String> = sqlx::query_scalar(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
                )
                .fetch_all(pool)
                .await?;
                Ok(names)
            }
            TableStore::Remote(pool) => {
                let mut conn = pool.get_conn().await?;
                let names: Vec<String> = conn.query("SHOW TABLES").await?;
                Ok(names)
            }
        }
    }

    pub async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        match self {
            TableStore::Local(pool) => sqlite_columns(pool, table).await,
            TableStore::Remote(pool) => {
                let mut conn = pool.get_conn().await?;
                let rows: Vec<mysql_async::Row> = conn
                    .query(format!("SHOW COLUMNS FROM {}", quote_ident(table)))
                    .await?;
                Ok(rows
                    .into_iter()
                    .filter_map(|row| {
                        let name: String = row.get(0)?;
                        let col_type: String = row.get(1).unwrap_or_default();
                        Some(ColumnInfo { name, col_type })
                    })
                    .collect())
            }
        }
    }

    /// Up to `limit` rows of `table`; a non-positive limit means [`DEFAULT_ROW_LIMIT`].
    pub async fn rows(&self, table: &str, limit: i64) -> Result<Vec<Record>> {
        let limit = if limit <= 0 { DEFAULT_ROW_LIMIT } else { limit };
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit);
        self.execute(&sql).await
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        match self {
            TableStore::Local(pool) => Ok(sqlx::query_scalar(&sql).fetch_one(pool).await?),
            TableStore::Remote(pool) => {
                let mut conn = pool.get_conn().await?;
                let n: Option<i64> = conn.query_first(sql).await?;
                Ok(n.unwrap_or(0))
            }
        }
    }

    /// Run arbitrary SQL and return any result rows.
    pub async fn execute(&self, sql: &str) -> Result<Vec<Record>> {
        match self {
            TableStore::Local(pool) => {
                let rows = sqlx::query(sql)
                    .fetch_all(pool)
                    .await
                    .with_context(|| "query failed")?;
                Ok(rows.iter().map(sqlite_row_to_record).collect())
            }
            TableStore::Remote(pool) => {
                let mut conn = pool.get_conn().await?;
                let rows: Vec<mysql_async::Row> =
                    conn.query(sql).await.with_context(|| "query failed")?;
                Ok(rows.into_iter().map(mysql_row_to_record).collect())
            }
        }
    }

    pub async fn close(self) {
        match self {
            TableStore::Local(pool) => pool.close().await,
            TableStore::Remote(pool) => {
                let _ = pool.disconnect().await;
            }
        }
    }
}

/// Columns of a SQLite table via `PRAGMA table_info`, in declaration order.
pub async fn sqlite_columns(pool: &SqlitePool, table: &str) -> Result<Vec<ColumnInfo>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get("name"),
            col_type: row.get("type"),
        })
        .collect())
}

pub fn sqlite_row_to_record(row: &SqliteRow) -> Record {
    row.columns()
        .iter()
        .map(|col| (col.name().to_string(), sqlite_value(row, col.ordinal())))
        .collect()
}

fn sqlite_value(row: &SqliteRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(idx).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(idx)
            .map(|b| Value::String(String::from_utf8_lossy(&b).into_owned()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

pub fn mysql_row_to_record(row: mysql_async::Row) -> Record {
    let names: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    names
        .into_iter()
        .zip(row.unwrap())
        .map(|(name, value)| (name, mysql_value_to_json(value)))
        .collect()
}

pub fn mysql_value_to_json(value: mysql_async::Value) -> Value {
    use mysql_async::Value as M;
    match value {
        M::NULL => Value::Null,
        M::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        M::Int(i) => Value::from(i),
        M::UInt(u) => Value::from(u),
        M::Float(f) => Value::from(f64::from(f)),
        M::Double(d) => Value::from(d),
        M::Date(y, mo, d, h, mi, s, us) => {
            if h == 0 && mi == 0 && s == 0 && us == 0 {
                Value::String(format!("{:04}-{:02}-{:02}", y, mo, d))
            } else {
                Value::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    y, mo, d, h, mi, s
                ))
            }
        }
        M::Time(neg, days, h, mi, s, _us) => {
            let hours = u32::from(h) + days * 24;
            let sign = if neg { "-" } else { "" };
            Value::String(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use serde_json::json;

    async fn seeded() -> (tempfile::TempDir, TableStore) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        sqlx::query("CREATE TABLE t (id INTEGER, price REAL, name TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for i in 0..150 {
            sqlx::query("INSERT INTO t VALUES (?, ?, ?)")
                .bind(i)
                .bind(i as f64 / 2.0)
                .bind(if i == 0 { None } else { Some(format!("n{}", i)) })
                .execute(&pool)
                .await
                .unwrap();
        }
        (tmp, TableStore::Local(pool))
    }

    #[tokio::test]
    async fn local_tables_columns_and_count() {
        let (_tmp, store) = seeded().await;
        assert_eq!(store.list_tables().await.unwrap(), vec!["t"]);
        let cols = store.columns("t").await.unwrap();
        assert_eq!(cols[1].name, "price");
        assert_eq!(cols[1].col_type, "REAL");
        assert_eq!(store.count("t").await.unwrap(), 150);
    }

    #[tokio::test]
    async fn rows_are_typed_records_with_default_limit() {
        let (_tmp, store) = seeded().await;
        let rows = store.rows("t", 0).await.unwrap();
        assert_eq!(rows.len(), 100);
        assert_eq!(rows[0]["id"], json!(0));
        assert_eq!(rows[0]["name"], Value::Null);
        assert_eq!(rows[3]["price"], json!(1.5));
        assert_eq!(rows[3]["name"], json!("n3"));
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, vec!["id", "price", "name"]);

        assert_eq!(store.rows("t", 5).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn execute_runs_arbitrary_sql() {
        let (_tmp, store) = seeded().await;
        let rows = store
            .execute("SELECT COUNT(*) AS n FROM t WHERE id >= 100")
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(50));
        assert!(store.execute("SELECT * FROM missing").await.is_err());
    }

    #[test]
    fn mysql_values_render_as_json() {
        use mysql_async::Value as M;
        assert_eq!(mysql_value_to_json(M::NULL), Value::Null);
        assert_eq!(mysql_value_to_json(M::Bytes(b"abc".to_vec())), json!("abc"));
        assert_eq!(mysql_value_to_json(M::Int(-4)), json!(-4));
        assert_eq!(
            mysql_value_to_json(M::Date(2024, 3, 9, 0, 0, 0, 0)),
            json!("2024-03-09")
        );
        assert_eq!(
            mysql_value_to_json(M::Time(false, 1, 2, 3, 4, 0)),
            json!("26:03:04")
        );
    }
}
