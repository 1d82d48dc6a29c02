//! File importers: Excel workbooks, CSV files or directories, and the
//! structured JSON export format.
//!
//! Workbooks and CSV inputs may hold several grids (sheets or files). Each
//! grid is ingested as its own table, named after the sheet or file stem,
//! sanitized and deduplicated against its siblings. A grid that fails is
//! logged and skipped; the first grid that succeeds becomes the main table.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use globset::GlobBuilder;
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::db::{open_store, quote_ident};
use crate::infer::HeaderSuggester;
use crate::ingest::{bind_value, insert_sql, ingest_grid, SqlValue};
use crate::models::{DataSource, DataSourceConfig, SourceKind, TableSchema};
use crate::sanitize::{sanitize_name, UniqueNames};
use crate::traits::{record_tables, ImportContext, Importer};
use crate::workbook::read_workbook;

fn require_path(config: &DataSourceConfig) -> Result<PathBuf> {
    if config.original_file.trim().is_empty() {
        bail!("file path is required");
    }
    Ok(PathBuf::from(&config.original_file))
}

/// Ingest named grids into one store. Returns the tables that succeeded.
async fn ingest_named_grids(
    pool: &SqlitePool,
    grids: Vec<(String, Vec<Vec<String>>)>,
    suggester: Option<&dyn HeaderSuggester>,
) -> Vec<TableSchema> {
    let mut names = UniqueNames::new();
    let mut tables = Vec::new();
    for (raw_name, rows) in grids {
        if rows.is_empty() {
            continue;
        }
        let mut trial = names.clone();
        let table = trial.claim(&sanitize_name(&raw_name));
        match ingest_grid(pool, &table, &rows, suggester).await {
            Ok(schema) => {
                names = trial;
                info!(source = %raw_name, table = %table, rows = rows.len(), "imported grid");
                tables.push(schema);
            }
            Err(e) => warn!(source = %raw_name, error = %e, "skipping grid"),
        }
    }
    tables
}

// ═══════════════════════════════════════════════════════════════════════
// Excel
// ═══════════════════════════════════════════════════════════════════════

pub struct ExcelImporter;

#[async_trait]
impl Importer for ExcelImporter {
    fn kind(&self) -> SourceKind {
        SourceKind::Excel
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_path(config).map(|_| ())
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let path = require_path(&ds.config)?;
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
        let sheets = read_workbook(&path)?;
        if sheets.is_empty() {
            bail!("no sheets found in excel file");
        }

        let pool = open_store(&ctx.store_path).await?;
        let grids = sheets.into_iter().map(|s| (s.name, s.rows)).collect();
        let tables = ingest_named_grids(&pool, grids, ctx.suggester).await;
        pool.close().await;

        if tables.is_empty() {
            bail!("no valid data found in any sheet");
        }
        record_tables(ds, tables);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// CSV
// ═══════════════════════════════════════════════════════════════════════

pub struct CsvImporter;

/// CSV files to import: the file itself, or the `*.csv` entries directly
/// inside a directory, sorted by name.
pub fn csv_files(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(path).map_err(|_| anyhow!("path not found: {}", path.display()))?;
    let matcher = GlobBuilder::new("*.csv")
        .case_insensitive(true)
        .build()?
        .compile_matcher();

    if !meta.is_dir() {
        let is_csv = path.file_name().is_some_and(|n| matcher.is_match(n));
        if !is_csv {
            bail!("file is not a csv file: {}", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to read directory: {}", path.display()))?;
        if entry.file_type().is_file() && matcher.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }
    if files.is_empty() {
        bail!("no csv files found");
    }
    Ok(files)
}

/// Every record of a CSV file as raw cells. Bytes that are not UTF-8
/// (Latin-1, GBK exports) become U+FFFD instead of failing the file.
pub fn read_csv(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.with_context(|| format!("failed to parse {}", path.display()))?;
        rows.push(
            record
                .iter()
                .map(|cell| String::from_utf8_lossy(cell).into_owned())
                .collect(),
        );
    }
    Ok(rows)
}

#[async_trait]
impl Importer for CsvImporter {
    fn kind(&self) -> SourceKind {
        SourceKind::Csv
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_path(config).map(|_| ())
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let path = require_path(&ds.config)?;
        let files = csv_files(&path)?;

        let mut grids = Vec::new();
        for file in files {
            let stem = file
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            match read_csv(&file) {
                Ok(rows) => grids.push((stem, rows)),
                Err(e) => warn!(file = %file.display(), error = %e, "skipping unreadable csv"),
            }
        }

        let pool = open_store(&ctx.store_path).await?;
        let tables = ingest_named_grids(&pool, grids, ctx.suggester).await;
        pool.close().await;

        if tables.is_empty() {
            bail!("no valid csv data found");
        }
        record_tables(ds, tables);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Structured JSON
// ═══════════════════════════════════════════════════════════════════════

/// `{"tables": [{"name", "columns": [{"name", "type"}], "data": [{..}]}]}`
#[derive(Debug, Deserialize)]
pub struct JsonExport {
    #[serde(default)]
    pub tables: Vec<JsonTable>,
}

#[derive(Debug, Deserialize)]
pub struct JsonTable {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<JsonColumn>,
    #[serde(default)]
    pub data: Vec<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
pub struct JsonColumn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub col_type: String,
}

pub struct JsonImporter;

/// Declared column type, defaulting to TEXT. Only plain type names such as
/// `VARCHAR(255)` or `DOUBLE PRECISION` are accepted.
fn column_type(declared: &str) -> Result<String> {
    let t = declared.trim();
    if t.is_empty() {
        return Ok("TEXT".to_string());
    }
    let plain = t
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '(' | ')' | ',' | '_'));
    if !plain {
        bail!("invalid column type: {}", t);
    }
    Ok(t.to_string())
}

fn json_value(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}

async fn import_json_table(pool: &SqlitePool, index: usize, table: &JsonTable) -> Result<TableSchema> {
    if table.name.trim().is_empty() {
        bail!("table at index {} has no name", index);
    }
    if table.columns.is_empty() {
        bail!("table '{}' has no columns defined", table.name);
    }

    let col_defs = table
        .columns
        .iter()
        .map(|c| Ok(format!("{} {}", quote_ident(&c.name), column_type(&c.col_type)?)))
        .collect::<Result<Vec<_>>>()?;
    let names: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();

    let mut tx = pool.begin().await?;
    sqlx::query(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(&table.name),
        col_defs.join(", ")
    ))
    .execute(&mut *tx)
    .await
    .with_context(|| format!("failed to create table {}", table.name))?;

    let insert = insert_sql(&table.name, &names);
    for row in &table.data {
        let mut q = sqlx::query(&insert);
        for col in &names {
            q = bind_value(q, json_value(row.get(col)));
        }
        q.execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert data for table {}", table.name))?;
    }
    tx.commit().await?;

    Ok(TableSchema {
        table_name: table.name.clone(),
        columns: names,
    })
}

#[async_trait]
impl Importer for JsonImporter {
    fn kind(&self) -> SourceKind {
        SourceKind::Json
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_path(config).map(|_| ())
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let path = require_path(&ds.config)?;
        if !path.exists() {
            bail!("file not found: {}", path.display());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read JSON file: {}", path.display()))?;
        let export: JsonExport = serde_json::from_str(&content).context(
            "invalid JSON format, expected {\"tables\": [{\"name\", \"columns\": [{\"name\", \"type\"}], \"data\": [..]}]}",
        )?;
        if export.tables.is_empty() {
            bail!("JSON file contains no tables");
        }

        let pool = open_store(&ctx.store_path).await?;
        let mut tables = Vec::new();
        for (i, table) in export.tables.iter().enumerate() {
            match import_json_table(&pool, i, table).await {
                Ok(schema) => tables.push(schema),
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            }
        }
        pool.close().await;

        record_tables(ds, tables);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::TableStore;

    fn source(kind: &str, path: &Path) -> DataSource {
        DataSource {
            id: "ds1".into(),
            name: "test".into(),
            kind: kind.into(),
            created_at: 0,
            config: DataSourceConfig {
                original_file: path.to_string_lossy().into_owned(),
                ..Default::default()
            },
            analysis: None,
        }
    }

    #[test]
    fn csv_files_filters_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.csv"), "x\n1\n").unwrap();
        std::fs::write(tmp.path().join("A.CSV"), "x\n1\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "hi").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/c.csv"), "x\n1\n").unwrap();

        let files = csv_files(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["A.CSV", "b.csv"]);

        let err = csv_files(&tmp.path().join("notes.txt")).unwrap_err();
        assert!(err.to_string().contains("not a csv file"));
    }

    #[test]
    fn non_utf8_cells_are_read_lossily() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("menu.csv");
        std::fs::write(&file, b"name,amount\nCaf\xe9,10\nTea,5\n").unwrap();

        let rows = read_csv(&file).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["Caf\u{FFFD}".to_string(), "10".to_string()]);
        assert_eq!(rows[2][0], "Tea");
    }

    #[tokio::test]
    async fn csv_directory_imports_one_table_per_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("in");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("sales-2024.csv"), "id,amount\n1,9.5\n2,3\n").unwrap();
        std::fs::write(dir.join("sales_2024.csv"), "id,who\n1,ann\n").unwrap();
        std::fs::write(dir.join("blank.csv"), ",,\n,,\n").unwrap();

        let config = Config::with_root(tmp.path());
        let ctx = ImportContext {
            config: &config,
            store_path: tmp.path().join("store/data.db"),
            suggester: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let mut ds = source("csv", &dir);
        CsvImporter.import(&ctx, &mut ds).await.unwrap();

        assert_eq!(ds.config.table_name, "sales_2024");
        let schema = ds.analysis.unwrap().schema;
        let names: Vec<_> = schema.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["sales_2024", "sales_2024_1"]);

        let store = TableStore::Local(open_store(&ctx.store_path).await.unwrap());
        let cols = store.columns("sales_2024").await.unwrap();
        assert_eq!(cols[1].col_type, "REAL");
    }

    #[tokio::test]
    async fn json_export_format_imports_declared_schema() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("export.json");
        std::fs::write(
            &file,
            r#"{"tables":[{"name":"people","columns":[{"name":"id","type":"INTEGER"},{"name":"name","type":""}],
               "data":[{"id":1,"name":"ann"},{"id":2}]}]}"#,
        )
        .unwrap();

        let config = Config::with_root(tmp.path());
        let ctx = ImportContext {
            config: &config,
            store_path: tmp.path().join("store/data.db"),
            suggester: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let mut ds = source("json", &file);
        JsonImporter.import(&ctx, &mut ds).await.unwrap();
        assert_eq!(ds.config.table_name, "people");

        let store = TableStore::Local(open_store(&ctx.store_path).await.unwrap());
        let cols = store.columns("people").await.unwrap();
        assert_eq!(cols[1].col_type, "TEXT");
        let rows = store.rows("people", 10).await.unwrap();
        assert_eq!(rows[1]["name"], Value::Null);
    }

    #[tokio::test]
    async fn json_without_tables_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("empty.json");
        std::fs::write(&file, r#"{"tables":[]}"#).unwrap();
        let config = Config::with_root(tmp.path());
        let ctx = ImportContext {
            config: &config,
            store_path: tmp.path().join("store/data.db"),
            suggester: None,
            cancel: tokio_util::sync::CancellationToken::new(),
        };
        let mut ds = source("json", &file);
        let err = JsonImporter.import(&ctx, &mut ds).await.unwrap_err();
        assert!(err.to_string().contains("no tables"));
    }

    #[test]
    fn column_types_must_be_plain() {
        assert_eq!(column_type("").unwrap(), "TEXT");
        assert_eq!(column_type("VARCHAR(255)").unwrap(), "VARCHAR(255)");
        assert!(column_type("TEXT); DROP TABLE x; --").is_err());
    }

    #[test]
    fn file_importers_require_a_path() {
        let empty = DataSourceConfig::default();
        assert!(ExcelImporter.validate(&empty).is_err());
        assert!(CsvImporter.validate(&empty).is_err());
        assert!(JsonImporter.validate(&empty).is_err());
    }
}
