//! Export tables of a data source.
//!
//! Three targets share the same row source ([`TableStore::execute`]):
//!
//! | Target | Output |
//! |--------|--------|
//! | CSV | `<parent of output>/<source name>/<table>.csv`, header first |
//! | SQL | one file of `INSERT` statements, a blank line between tables |
//! | MySQL | rows written into a live MySQL-protocol database |
//!
//! A MySQL export refuses to write back into the server and database a
//! remote source was imported from.

use anyhow::{bail, Context, Result};
use mysql_async::prelude::Queryable;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::db::quote_ident;
use crate::flatten::format_value;
use crate::import_remote::{mysql_pool, parse_port, DEFAULT_MYSQL_PORT};
use crate::models::{DataSource, MysqlExportConfig, Record};
use crate::sanitize::sanitize_name;
use crate::store::TableStore;

/// Where an export went and how many rows each table contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportReport {
    pub location: String,
    pub tables: BTreeMap<String, u64>,
}

impl ExportReport {
    pub fn total_rows(&self) -> u64 {
        self.tables.values().sum()
    }
}

fn require_tables(tables: &[String]) -> Result<()> {
    if tables.is_empty() {
        bail!("no tables specified for export");
    }
    Ok(())
}

/// Column names and rows of one table.
async fn read_table(store: &TableStore, table: &str) -> Result<(Vec<String>, Vec<Record>)> {
    let columns: Vec<String> = store
        .columns(table)
        .await
        .with_context(|| format!("failed to read columns of {}", table))?
        .into_iter()
        .map(|c| c.name)
        .collect();
    if columns.is_empty() {
        bail!("table not found: {}", table);
    }
    let rows = store
        .execute(&format!("SELECT * FROM {}", quote_ident(table)))
        .await
        .with_context(|| format!("failed to read rows of {}", table))?;
    Ok((columns, rows))
}

// ═══════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════

/// Directory the CSV files of `source_name` land in.
pub fn csv_dir(output: &Path, source_name: &str) -> PathBuf {
    let parent = output.parent().unwrap_or_else(|| Path::new("."));
    parent.join(sanitize_name(source_name))
}

pub async fn export_csv(
    store: &TableStore,
    tables: &[String],
    output: &Path,
    source_name: &str,
) -> Result<ExportReport> {
    require_tables(tables)?;
    let dir = csv_dir(output, source_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create export directory: {}", dir.display()))?;

    let mut report = ExportReport {
        location: dir.display().to_string(),
        ..Default::default()
    };
    for table in tables {
        let (columns, rows) = read_table(store, table).await?;
        let path = dir.join(format!("{}.csv", table));
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        writer.write_record(&columns)?;
        for row in &rows {
            let fields = columns
                .iter()
                .map(|c| row.get(c).and_then(format_value).unwrap_or_default());
            writer.write_record(fields)?;
        }
        writer.flush()?;
        info!(table = %table, rows = rows.len(), path = %path.display(), "exported csv");
        report.tables.insert(table.clone(), rows.len() as u64);
    }
    Ok(report)
}

// ═══════════════════════════════════════════════════════════════════════
// SQL
// ═══════════════════════════════════════════════════════════════════════

/// SQL literal for a JSON cell: NULL, bare numbers, quoted strings.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

pub fn insert_statement(table: &str, columns: &[String], row: &Record) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let values: Vec<String> = columns
        .iter()
        .map(|c| sql_literal(row.get(c).unwrap_or(&Value::Null)))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(table),
        cols.join(", "),
        values.join(", ")
    )
}

pub async fn export_sql(store: &TableStore, tables: &[String], output: &Path) -> Result<ExportReport> {
    require_tables(tables)?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create export directory: {}", parent.display()))?;
    }
    let file = std::fs::File::create(output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut out = std::io::BufWriter::new(file);

    let mut report = ExportReport {
        location: output.display().to_string(),
        ..Default::default()
    };
    for (i, table) in tables.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        let (columns, rows) = read_table(store, table).await?;
        writeln!(out, "-- Table: {}", table)?;
        for row in &rows {
            writeln!(out, "{}", insert_statement(table, &columns, row))?;
        }
        report.tables.insert(table.clone(), rows.len() as u64);
    }
    out.flush()?;
    info!(path = %output.display(), rows = report.total_rows(), "exported sql");
    Ok(report)
}

// ═══════════════════════════════════════════════════════════════════════
// MySQL
// ═══════════════════════════════════════════════════════════════════════

fn normalize_host(host: &str) -> String {
    match host.trim().to_ascii_lowercase().as_str() {
        "" | "127.0.0.1" | "::1" | "localhost" => "localhost".to_string(),
        other => other.to_string(),
    }
}

fn normalize_port(port: &str) -> u16 {
    parse_port(port).unwrap_or(DEFAULT_MYSQL_PORT)
}

/// Whether `target` is the very server and database `source` was imported from.
pub fn is_same_database(source: &DataSource, target: &MysqlExportConfig) -> bool {
    let is_remote = source
        .source_kind()
        .is_some_and(|k| k.is_remote_database());
    is_remote
        && normalize_host(&source.config.host) == normalize_host(&target.host)
        && normalize_port(&source.config.port) == normalize_port(&target.port)
        && source
            .config
            .database
            .trim()
            .eq_ignore_ascii_case(target.database.trim())
}

fn validate_target(target: &MysqlExportConfig) -> Result<()> {
    if target.host.trim().is_empty() {
        bail!("export host is required");
    }
    if target.user.trim().is_empty() {
        bail!("export user is required");
    }
    if target.database.trim().is_empty() {
        bail!("export database is required");
    }
    parse_port(&target.port)?;
    Ok(())
}

fn mysql_param(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => mysql_async::Value::Int(i),
            (None, Some(f)) => mysql_async::Value::Double(f),
            _ => mysql_async::Value::Bytes(n.to_string().into_bytes()),
        },
        other => match format_value(other) {
            Some(s) => mysql_async::Value::Bytes(s.into_bytes()),
            None => mysql_async::Value::NULL,
        },
    }
}

pub async fn export_mysql(
    store: &TableStore,
    tables: &[String],
    source: &DataSource,
    target: &MysqlExportConfig,
) -> Result<ExportReport> {
    require_tables(tables)?;
    validate_target(target)?;
    if is_same_database(source, target) {
        bail!("cannot export to the same database as the source");
    }

    let database = target.database.trim();
    let server = mysql_pool(&target.host, &target.port, &target.user, &target.password, "")?;
    let created = async {
        let mut conn = server
            .get_conn()
            .await
            .context("failed to connect to export database")?;
        conn.query_drop(format!(
            "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            quote_ident(database)
        ))
        .await
        .context("failed to create export database")
    }
    .await;
    let _ = server.disconnect().await;
    created?;

    let pool = mysql_pool(&target.host, &target.port, &target.user, &target.password, database)?;
    let outcome = write_tables(store, tables, &pool).await;
    let _ = pool.disconnect().await;
    let mut report = outcome?;
    report.location = format!(
        "{}:{}/{}",
        target.host.trim(),
        normalize_port(&target.port),
        database
    );
    Ok(report)
}

async fn write_tables(store: &TableStore, tables: &[String], pool: &mysql_async::Pool) -> Result<ExportReport> {
    let mut conn = pool.get_conn().await.context("failed to connect to export database")?;
    let mut report = ExportReport::default();
    for table in tables {
        let (columns, rows) = read_table(store, table).await?;
        let defs: Vec<String> = columns.iter().map(|c| format!("{} TEXT", quote_ident(c))).collect();
        conn.query_drop(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            defs.join(", ")
        ))
        .await
        .with_context(|| format!("failed to create table {}", table))?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            cols.join(", "),
            placeholders
        );
        let params = rows.iter().map(|row| {
            columns
                .iter()
                .map(|c| mysql_param(row.get(c).unwrap_or(&Value::Null)))
                .collect::<Vec<_>>()
        });
        conn.exec_batch(insert, params)
            .await
            .with_context(|| format!("failed to insert rows into {}", table))?;
        info!(table = %table, rows = rows.len(), "exported to mysql");
        report.tables.insert(table.clone(), rows.len() as u64);
    }
    Ok(report)
}
