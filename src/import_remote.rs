//! MySQL-protocol database sources (MySQL, Doris).
//!
//! A remote source is either linked (queries go to the server) or, with
//! `store_locally`, copied table by table into a local store. Copies type
//! every column TEXT and stop at the first table that fails.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::{open_store, quote_ident};
use crate::error::RoutingError;
use crate::flatten::format_value;
use crate::http::ensure_active;
use crate::ingest::{bind_value, insert_sql, SqlValue};
use crate::models::{DataSource, DataSourceConfig, SourceKind, TableSchema};
use crate::sanitize::{sanitize_name, UniqueNames};
use crate::store::{mysql_value_to_json, TableStore};
use crate::traits::{record_tables, ImportContext, Importer};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Parse a port string, defaulting to 3306 when empty.
pub fn parse_port(port: &str) -> Result<u16> {
    let port = port.trim();
    if port.is_empty() {
        return Ok(DEFAULT_MYSQL_PORT);
    }
    port.parse()
        .with_context(|| format!("invalid port: {}", port))
}

/// Connection pool for a MySQL-protocol server. No connection is made yet.
pub fn mysql_pool(host: &str, port: &str, user: &str, password: &str, database: &str) -> Result<Pool> {
    let mut opts = OptsBuilder::default()
        .ip_or_hostname(host.to_string())
        .tcp_port(parse_port(port)?)
        .user(Some(user.to_string()))
        .pass(Some(password.to_string()));
    if !database.is_empty() {
        opts = opts.db_name(Some(database.to_string()));
    }
    Ok(Pool::new(opts))
}

/// Pool for the server a remote data source was registered against.
pub fn source_pool(config: &DataSourceConfig) -> Result<Pool> {
    mysql_pool(
        &config.host,
        &config.port,
        &config.user,
        &config.password,
        &config.database,
    )
}

pub async fn ping(pool: &Pool) -> Result<()> {
    let mut conn = pool
        .get_conn()
        .await
        .context("failed to connect to database")?;
    conn.ping().await.context("failed to connect to database")?;
    Ok(())
}

pub struct RemoteDbImporter {
    kind: SourceKind,
}

impl RemoteDbImporter {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Importer for RemoteDbImporter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        if config.host.trim().is_empty() {
            bail!("database host is required");
        }
        if config.user.trim().is_empty() {
            bail!("database user is required");
        }
        parse_port(&config.port)?;
        Ok(())
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        if ds.config.port.trim().is_empty() {
            ds.config.port = DEFAULT_MYSQL_PORT.to_string();
        }
        let remote = source_pool(&ds.config)?;
        let outcome = async {
            ping(&remote).await?;
            if ds.config.store_locally {
                let local = open_store(&ctx.store_path).await?;
                let copied = copy_database(&remote, &local, &ctx.cancel).await;
                local.close().await;
                record_tables(ds, copied?);
            }
            Ok::<_, anyhow::Error>(())
        }
        .await;
        let _ = remote.disconnect().await;
        outcome
    }
}

/// Copy every table of the remote database. The first failure aborts, and
/// `cancel` is checked before each table.
pub async fn copy_database(
    remote: &Pool,
    local: &SqlitePool,
    cancel: &CancellationToken,
) -> Result<Vec<TableSchema>> {
    let store = TableStore::Remote(remote.clone());
    let tables = store.list_tables().await.context("failed to list tables")?;
    if tables.is_empty() {
        bail!("no tables found in database");
    }

    let mut names = UniqueNames::new();
    let mut copied = Vec::new();
    for table in &tables {
        ensure_active(cancel)?;
        let local_name = names.claim(&sanitize_name(table));
        let schema = copy_table(remote, local, table, &local_name)
            .await
            .with_context(|| format!("failed to copy table {}", table))?;
        info!(table = %table, local = %local_name, "copied remote table");
        copied.push(schema);
    }
    Ok(copied)
}

async fn copy_table(remote: &Pool, local: &SqlitePool, table: &str, local_name: &str) -> Result<TableSchema> {
    let mut conn = remote.get_conn().await?;
    let rows: Vec<mysql_async::Row> = conn
        .query(format!("SELECT * FROM {}", quote_ident(table)))
        .await?;
    drop(conn);

    let remote_columns: Vec<String> = match rows.first() {
        Some(row) => row
            .columns_ref()
            .iter()
            .map(|c| c.name_str().into_owned())
            .collect(),
        None => TableStore::Remote(remote.clone())
            .columns(table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect(),
    };
    let mut unique = UniqueNames::new();
    let columns: Vec<String> = remote_columns
        .iter()
        .map(|c| unique.claim(&sanitize_name(c)))
        .collect();
    if columns.is_empty() {
        bail!("table has no columns");
    }

    let col_defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_ident(c)))
        .collect();
    let insert = insert_sql(local_name, &columns);

    let mut tx = local.begin().await?;
    sqlx::query(&format!(
        "CREATE TABLE {} ({})",
        quote_ident(local_name),
        col_defs.join(", ")
    ))
    .execute(&mut *tx)
    .await
    .context("failed to create table schema")?;

    for row in rows {
        let mut q = sqlx::query(&insert);
        for value in row.unwrap() {
            let text = format_value(&mysql_value_to_json(value));
            q = bind_value(q, SqlValue::from_text(text));
        }
        q.execute(&mut *tx).await?;
    }
    tx.commit().await?;

    Ok(TableSchema {
        table_name: local_name.to_string(),
        columns,
    })
}

/// PostgreSQL is a recognised kind whose import is not implemented.
pub struct PostgresImporter;

#[async_trait]
impl Importer for PostgresImporter {
    fn kind(&self) -> SourceKind {
        SourceKind::Postgresql
    }

    fn validate(&self, _config: &DataSourceConfig) -> Result<()> {
        Err(RoutingError::PostgresUnsupported.into())
    }

    async fn import(&self, _ctx: &ImportContext<'_>, _ds: &mut DataSource) -> Result<()> {
        Err(RoutingError::PostgresUnsupported.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_and_validates() {
        assert_eq!(parse_port("").unwrap(), 3306);
        assert_eq!(parse_port(" 9030 ").unwrap(), 9030);
        assert!(parse_port("abc").is_err());
    }

    #[test]
    fn remote_import_requires_host_and_user() {
        let importer = RemoteDbImporter::new(SourceKind::Mysql);
        let err = importer.validate(&DataSourceConfig::default()).unwrap_err();
        assert!(err.to_string().contains("host"));

        let cfg = DataSourceConfig {
            host: "db.local".into(),
            ..Default::default()
        };
        assert!(importer.validate(&cfg).unwrap_err().to_string().contains("user"));
    }

    #[test]
    fn postgres_is_rejected() {
        let err = PostgresImporter
            .validate(&DataSourceConfig::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "postgresql driver not supported yet");
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let pool = mysql_pool("127.0.0.1", "1", "root", "", "").unwrap();
        let err = ping(&pool).await.unwrap_err();
        assert!(err.to_string().contains("failed to connect to database"));
        let _ = pool.disconnect().await;
    }
}
