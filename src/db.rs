use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of every per-source local store.
pub const STORE_FILE: &str = "data.db";

/// Relative location of a data source's local store under the cache root.
pub fn store_rel_path(data_source_id: &str) -> PathBuf {
    Path::new("sources").join(data_source_id).join(STORE_FILE)
}

/// Open (creating if needed) the SQLite store at `path`.
pub async fn open_store(path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open local database: {}", path.display()))?;

    Ok(pool)
}

/// Open an existing store; a missing file is an error rather than a new database.
pub async fn open_existing(path: &Path) -> Result<SqlitePool> {
    if !path.exists() {
        anyhow::bail!("local database not found: {}", path.display());
    }
    open_store(path).await
}

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
