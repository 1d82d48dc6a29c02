//! Structural edits on a local store: drop a table, rename or drop a column.
//!
//! SQLite cannot drop a column in place on every version we ship against,
//! so [`drop_column`] rebuilds the table through a temporary copy inside a
//! single transaction. The matching `apply_*` helpers keep a data source's
//! [`Analysis`] schema in step with the store.

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;

use crate::db::quote_ident;
use crate::models::Analysis;
use crate::store::sqlite_columns;

/// Substrings a new column name may not contain.
const FORBIDDEN_IN_NAMES: [&str; 10] = [" ", "'", "\"", ";", "--", "/*", "*/", "\t", "\r", "\n"];

/// Check a proposed column name against the table's current columns.
pub fn validate_column_name(name: &str, existing: &[String]) -> Result<()> {
    if name.is_empty() {
        bail!("column name cannot be empty");
    }
    if let Some(bad) = FORBIDDEN_IN_NAMES.iter().find(|s| name.contains(**s)) {
        bail!("column name contains invalid characters: {:?}", bad);
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        bail!("column name cannot start with a digit");
    }
    if existing.iter().any(|c| c.eq_ignore_ascii_case(name)) {
        bail!("column '{}' already exists", name);
    }
    Ok(())
}

async fn column_names(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let columns: Vec<String> = sqlite_columns(pool, table)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    if columns.is_empty() {
        bail!("table not found: {}", table);
    }
    Ok(columns)
}

pub async fn drop_table(pool: &SqlitePool, table: &str) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(table)))
        .execute(pool)
        .await
        .with_context(|| format!("failed to drop table {}", table))?;
    Ok(())
}

pub async fn rename_column(pool: &SqlitePool, table: &str, old: &str, new: &str) -> Result<()> {
    let columns = column_names(pool, table).await?;
    if !columns.iter().any(|c| c == old) {
        bail!("column '{}' not found in table '{}'", old, table);
    }
    validate_column_name(new, &columns)?;
    sqlx::query(&format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quote_ident(table),
        quote_ident(old),
        quote_ident(new)
    ))
    .execute(pool)
    .await
    .with_context(|| format!("failed to rename column {} in {}", old, table))?;
    Ok(())
}

/// Remove `column` by copying the remaining columns into a fresh table.
pub async fn drop_column(pool: &SqlitePool, table: &str, column: &str) -> Result<()> {
    let columns = sqlite_columns(pool, table).await?;
    if columns.is_empty() {
        bail!("table not found: {}", table);
    }
    if !columns.iter().any(|c| c.name == column) {
        bail!("column '{}' not found in table '{}'", column, table);
    }
    if columns.len() == 1 {
        bail!("cannot drop the last column of table '{}'", table);
    }

    let kept: Vec<_> = columns.iter().filter(|c| c.name != column).collect();
    let defs: Vec<String> = kept
        .iter()
        .map(|c| match c.col_type.trim() {
            "" => quote_ident(&c.name),
            ty => format!("{} {}", quote_ident(&c.name), ty),
        })
        .collect();
    let names: Vec<String> = kept.iter().map(|c| quote_ident(&c.name)).collect();
    let temp = format!("{}_temp_delete_col", table);

    let mut tx = pool.begin().await?;
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", quote_ident(&temp)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("CREATE TABLE {} ({})", quote_ident(&temp), defs.join(", ")))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!(
        "INSERT INTO {} ({cols}) SELECT {cols} FROM {}",
        quote_ident(&temp),
        quote_ident(table),
        cols = names.join(", ")
    ))
    .execute(&mut *tx)
    .await?;
    sqlx::query(&format!("DROP TABLE {}", quote_ident(table)))
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&temp),
        quote_ident(table)
    ))
    .execute(&mut *tx)
    .await?;
    tx.commit()
        .await
        .with_context(|| format!("failed to drop column {} from {}", column, table))?;
    Ok(())
}

pub fn apply_drop_table(analysis: &mut Analysis, table: &str) {
    analysis.schema.retain(|t| t.table_name != table);
}

pub fn apply_rename_column(analysis: &mut Analysis, table: &str, old: &str, new: &str) {
    if let Some(schema) = analysis.table_mut(table) {
        for col in schema.columns.iter_mut().filter(|c| *c == old) {
            *col = new.to_string();
        }
    }
}

pub fn apply_drop_column(analysis: &mut Analysis, table: &str, column: &str) {
    if let Some(schema) = analysis.table_mut(table) {
        schema.columns.retain(|c| c != column);
    }
}
