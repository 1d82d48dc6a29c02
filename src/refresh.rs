//! Incremental refresh engine.
//!
//! Two strategies keep a connector's local tables current without a full
//! re-download:
//!
//! | Strategy | Used by | Mechanism |
//! |----------|---------|-----------|
//! | insert-only | Shopify, BigCommerce, eBay, Etsy | skip records whose id is already stored |
//! | key upsert | Jira | insert new keys, update existing ones, add new columns |
//!
//! Insert-only assumes the remote listing is ordered newest first. It stops
//! paging at the first page that contributes no new record, or once the
//! configured cap of new records is reached. A listing that is not newest
//! first yields an incomplete refresh, not an error.

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::db::quote_ident;
use crate::flatten::{flatten, format_value};
use crate::http::{is_cancelled, RestPager};
use crate::ingest::{bind_value, create_table_from_records, insert_records, insert_sql, sanitize_record, SqlValue};
use crate::models::{Record, RefreshResult};
use crate::store::sqlite_columns;

/// Identifier field of a refreshable resource.
#[derive(Debug, Clone, Copy)]
pub struct IdField {
    pub name: &'static str,
    /// Compare ids as integers (`CAST(.. AS INTEGER)`) rather than trimmed text.
    pub numeric: bool,
}

impl IdField {
    pub const fn numeric(name: &'static str) -> Self {
        Self { name, numeric: true }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            numeric: false,
        }
    }

    /// Normalized id of a raw record, or `None` when it has no usable id.
    pub fn of(&self, record: &Record) -> Option<String> {
        let value = record.get(self.name)?;
        if self.numeric {
            match value {
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|f| f as i64))
                    .map(|i| i.to_string()),
                Value::String(s) => s.trim().parse::<i64>().ok().map(|i| i.to_string()),
                _ => None,
            }
        } else {
            format_value(value).map(|s| s.trim().to_string())
        }
    }
}

pub async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let n: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_one(pool)
            .await?;
    Ok(n > 0)
}

/// Ids already stored in `table`, normalized the same way as [`IdField::of`].
pub async fn existing_ids(pool: &SqlitePool, table: &str, id: IdField) -> Result<HashSet<String>> {
    if !table_exists(pool, table).await? {
        return Ok(HashSet::new());
    }
    let col = quote_ident(id.name);
    let ids: Vec<Option<String>> = if id.numeric {
        let rows: Vec<Option<i64>> = sqlx::query_scalar(&format!(
            "SELECT CAST({} AS INTEGER) FROM {}",
            col,
            quote_ident(table)
        ))
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(|v| v.map(|i| i.to_string())).collect()
    } else {
        sqlx::query_scalar(&format!(
            "SELECT CAST({} AS TEXT) FROM {}",
            col,
            quote_ident(table)
        ))
        .fetch_all(pool)
        .await?
    };
    Ok(ids
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .collect())
}

/// Insert-only refresh of one table from a newest-first listing.
///
/// Returns the number of rows written. A table that does not exist yet is
/// created from the fetched records.
pub async fn refresh_insert_only(
    pool: &SqlitePool,
    table: &str,
    id: IdField,
    pager: &mut RestPager,
    max_new: usize,
) -> Result<u64> {
    let mut seen = existing_ids(pool, table, id).await?;
    let mut staged: Vec<Record> = Vec::new();

    'pages: while let Some(page) = pager.next_page().await? {
        let mut new_in_page = 0usize;
        for record in page {
            let Some(key) = id.of(&record) else {
                continue;
            };
            if !seen.insert(key) {
                continue;
            }
            staged.push(flatten(&Value::Object(record)));
            new_in_page += 1;
            if staged.len() >= max_new {
                break 'pages;
            }
        }
        if new_in_page == 0 {
            break;
        }
    }

    debug!(table, new = staged.len(), "insert-only refresh staged records");
    if staged.is_empty() {
        return Ok(0);
    }
    if !table_exists(pool, table).await? {
        create_table_from_records(pool, table, &staged).await?;
        return Ok(staged.len() as u64);
    }
    insert_records(pool, table, &staged).await
}

/// One newest-first listing feeding one local table.
pub struct Listing {
    pub table: &'static str,
    pub id: IdField,
    pub pager: RestPager,
}

impl Listing {
    pub fn new(table: &'static str, id: IdField, pager: RestPager) -> Self {
        Self { table, id, pager }
    }
}

/// Run insert-only refresh over several listings.
///
/// A listing that fails is logged and noted in `result.error`; the others
/// still run. Fails only when every listing failed, or at once on
/// cancellation.
pub async fn refresh_listings(
    pool: &SqlitePool,
    listings: Vec<Listing>,
    max_new: usize,
    result: &mut RefreshResult,
) -> Result<()> {
    let total = listings.len();
    let mut failures = Vec::new();
    for mut listing in listings {
        match refresh_insert_only(pool, listing.table, listing.id, &mut listing.pager, max_new).await {
            Ok(n) => {
                info!(table = listing.table, new = n, "refreshed table");
                result.record(listing.table, n);
            }
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!(table = listing.table, error = %e, "failed to refresh table");
                failures.push(format!("{}: {:#}", listing.table, e));
            }
        }
    }
    note_failures(result, total, failures)
}

/// Record per-table failures on the result; error out when none succeeded.
pub fn note_failures(result: &mut RefreshResult, attempted: usize, failures: Vec<String>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let joined = failures.join("; ");
    if failures.len() == attempted {
        return Err(anyhow!("refresh failed: {}", joined));
    }
    result.error = Some(joined);
    Ok(())
}

/// Add a TEXT column for every record field missing from `table`.
pub async fn evolve_schema(pool: &SqlitePool, table: &str, records: &[Record]) -> Result<Vec<String>> {
    let existing: HashSet<String> = sqlite_columns(pool, table)
        .await?
        .into_iter()
        .map(|c| c.name.to_lowercase())
        .collect();
    let mut added = Vec::new();
    for record in records {
        for key in record.keys() {
            if existing.contains(&key.to_lowercase()) || added.contains(key) {
                continue;
            }
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN {} TEXT",
                quote_ident(table),
                quote_ident(key)
            ))
            .execute(pool)
            .await?;
            added.push(key.clone());
        }
    }
    if !added.is_empty() {
        debug!(table, columns = ?added, "added columns");
    }
    Ok(added)
}

/// Insert records whose `key` is new and update the ones already stored.
///
/// Records are flattened and sanitized; fields unknown to the table are
/// added as TEXT columns first. Returns rows inserted plus rows updated.
pub async fn upsert_records(pool: &SqlitePool, table: &str, key: &str, records: &[Record]) -> Result<u64> {
    let records: Vec<Record> = records
        .iter()
        .map(|r| sanitize_record(&flatten(&Value::Object(r.clone()))))
        .filter(|r| r.get(key).and_then(format_value).is_some_and(|k| !k.is_empty()))
        .collect();
    if records.is_empty() {
        return Ok(0);
    }
    if !table_exists(pool, table).await? {
        create_table_from_records(pool, table, &records).await?;
        return Ok(records.len() as u64);
    }
    evolve_schema(pool, table, &records).await?;

    let key_col = quote_ident(key);
    let exists_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE CAST({} AS TEXT) = ?",
        quote_ident(table),
        key_col
    );
    let mut written = 0u64;
    let mut tx = pool.begin().await?;

    for record in &records {
        let Some(key_value) = record.get(key).and_then(format_value) else {
            continue;
        };
        let present: i64 = sqlx::query_scalar(&exists_sql)
            .bind(&key_value)
            .fetch_one(&mut *tx)
            .await?;

        let columns: Vec<String> = record.keys().cloned().collect();
        let outcome = if present > 0 {
            let sets: Vec<String> = columns
                .iter()
                .filter(|c| c.as_str() != key)
                .map(|c| format!("{} = ?", quote_ident(c)))
                .collect();
            if sets.is_empty() {
                continue;
            }
            let sql = format!(
                "UPDATE {} SET {} WHERE CAST({} AS TEXT) = ?",
                quote_ident(table),
                sets.join(", "),
                key_col
            );
            let mut q = sqlx::query(&sql);
            for c in columns.iter().filter(|c| c.as_str() != key) {
                q = bind_value(q, SqlValue::from_text(record.get(c).and_then(format_value)));
            }
            q.bind(key_value.clone()).execute(&mut *tx).await
        } else {
            let sql = insert_sql(table, &columns);
            let mut q = sqlx::query(&sql);
            for c in &columns {
                q = bind_value(q, SqlValue::from_text(record.get(c).and_then(format_value)));
            }
            q.execute(&mut *tx).await
        };

        match outcome {
            Ok(_) => written += 1,
            Err(e) => warn!(table, key = %key_value, error = %e, "failed to upsert record"),
        }
    }
    tx.commit().await?;
    Ok(written)
}

/// Latest value of `column`, e.g. the newest `updated` timestamp.
pub async fn max_value(pool: &SqlitePool, table: &str, column: &str) -> Result<Option<String>> {
    if !table_exists(pool, table).await? {
        return Ok(None);
    }
    let columns = sqlite_columns(pool, table).await?;
    if !columns.iter().any(|c| c.name == column) {
        bail!("table {} has no column {}", table, column);
    }
    let max: Option<String> = sqlx::query_scalar(&format!(
        "SELECT MAX({c}) FROM {t} WHERE {c} IS NOT NULL AND {c} != ''",
        c = quote_ident(column),
        t = quote_ident(table)
    ))
    .fetch_one(pool)
    .await?;
    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use serde_json::json;

    fn rec(v: serde_json::Value) -> Record {
        v.as_object().unwrap().clone()
    }

    async fn pool() -> (tempfile::TempDir, SqlitePool) {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        (tmp, pool)
    }

    #[test]
    fn ids_normalize_numbers_and_strings() {
        let id = IdField::numeric("id");
        assert_eq!(id.of(&rec(json!({"id": 42}))).as_deref(), Some("42"));
        assert_eq!(id.of(&rec(json!({"id": "42"}))).as_deref(), Some("42"));
        assert_eq!(id.of(&rec(json!({"id": 4.2e1}))).as_deref(), Some("42"));
        assert_eq!(id.of(&rec(json!({"id": "x"}))), None);
        assert_eq!(id.of(&rec(json!({}))), None);

        let text = IdField::text("orderId");
        assert_eq!(
            text.of(&rec(json!({"orderId": " 12-345 "}))).as_deref(),
            Some("12-345")
        );
    }

    #[test]
    fn partial_failures_are_noted_total_failure_errors() {
        let mut result = RefreshResult::default();
        note_failures(&mut result, 3, Vec::new()).unwrap();
        assert!(result.error.is_none());

        note_failures(&mut result, 3, vec!["orders: timeout".into()]).unwrap();
        assert_eq!(result.error.as_deref(), Some("orders: timeout"));

        let err = note_failures(&mut result, 2, vec!["a: x".into(), "b: y".into()]).unwrap_err();
        assert_eq!(err.to_string(), "refresh failed: a: x; b: y");
    }

    #[tokio::test]
    async fn existing_ids_cast_stored_text() {
        let (_tmp, pool) = pool().await;
        create_table_from_records(&pool, "orders", &[rec(json!({"id": 7})), rec(json!({"id": "8"}))])
            .await
            .unwrap();
        let ids = existing_ids(&pool, "orders", IdField::numeric("id")).await.unwrap();
        assert!(ids.contains("7") && ids.contains("8"));
        assert!(existing_ids(&pool, "missing", IdField::numeric("id"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn upsert_inserts_updates_and_adds_columns() {
        let (_tmp, pool) = pool().await;
        let first = vec![
            rec(json!({"key": "P-1", "summary": "a", "updated": "2024-01-01"})),
            rec(json!({"key": "P-2", "summary": "b", "updated": "2024-01-02"})),
        ];
        assert_eq!(upsert_records(&pool, "issues", "key", &first).await.unwrap(), 2);

        let second = vec![
            rec(json!({"key": "P-2", "summary": "b2", "updated": "2024-02-01", "team": "core"})),
            rec(json!({"key": "P-3", "summary": "c", "updated": "2024-02-02"})),
            rec(json!({"summary": "no key"})),
        ];
        assert_eq!(upsert_records(&pool, "issues", "key", &second).await.unwrap(), 2);

        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM issues")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 3);
        let (summary, team): (String, String) =
            sqlx::query_as("SELECT summary, team FROM issues WHERE key = 'P-2'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!((summary.as_str(), team.as_str()), ("b2", "core"));

        let latest = max_value(&pool, "issues", "updated").await.unwrap();
        assert_eq!(latest.as_deref(), Some("2024-02-02"));
    }
}
