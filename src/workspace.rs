//! The [`Workspace`] facade: one cache root, its registry, the schema
//! cache, and the type-tag routing table.
//!
//! ```text
//! import(name, tag, config)
//!   ├─ check_name        duplicate names rejected before any I/O
//!   ├─ importer(tag)     RoutingError for unknown tags
//!   ├─ validate(config)  required fields
//!   ├─ import(ctx, ds)   writes sources/<id>/data.db
//!   │    └─ on error: remove sources/<id>/
//!   └─ registry.add(ds)
//! ```
//!
//! Table reads consult the [`SchemaCache`] first. Anything that changes a
//! store (refresh, edits, delete) invalidates the source's entry.
//!
//! Imports and refreshes observe the workspace's [`CancellationToken`].
//! Once cancelled, every later network import or refresh fails with
//! [`Cancelled`](crate::http::Cancelled); build a new workspace to continue.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{open_existing, store_rel_path};
use crate::edit;
use crate::export::{self, ExportReport};
use crate::import_remote::source_pool;
use crate::infer::HeaderSuggester;
use crate::models::{
    Analysis, ColumnInfo, DataSource, DataSourceConfig, MysqlExportConfig, Record, RefreshResult,
    TableSchema,
};
use crate::registry::Registry;
use crate::schema_cache::{SchemaCache, SAMPLE_CACHE_LIMIT};
use crate::store::TableStore;
use crate::traits::{ImportContext, RefreshContext, SourceRegistry};

pub struct Workspace {
    config: Config,
    registry: Registry,
    cache: Arc<SchemaCache>,
    sources: SourceRegistry,
    suggester: Option<Box<dyn HeaderSuggester>>,
    cancel: CancellationToken,
}

impl Workspace {
    /// Workspace over `config.cache.root` with every built-in source kind.
    pub fn new(config: Config) -> Self {
        Self::with_sources(config, SourceRegistry::with_builtins())
    }

    pub fn with_sources(config: Config, sources: SourceRegistry) -> Self {
        let ttl = chrono::Duration::seconds(config.schema_cache.ttl_secs);
        let cache = Arc::new(SchemaCache::new(ttl));
        let registry = Registry::new(config.cache.root.clone(), Arc::clone(&cache));
        Self {
            config,
            registry,
            cache,
            sources,
            suggester: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `suggester` to name the columns of headerless grids.
    pub fn with_suggester(mut self, suggester: Box<dyn HeaderSuggester>) -> Self {
        self.suggester = Some(suggester);
        self
    }

    /// Observe `token` during imports and refreshes.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle that cancels in-flight imports and refreshes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Create the cache root and an empty registry if absent.
    pub fn init(&self) -> Result<()> {
        let root = self.registry.root();
        std::fs::create_dir_all(root.join("sources"))
            .with_context(|| format!("failed to create cache root: {}", root.display()))?;
        self.registry.init()
    }

    pub fn list(&self) -> Result<Vec<DataSource>> {
        self.registry.load()
    }

    pub fn get(&self, id: &str) -> Result<DataSource> {
        self.registry.get(id)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Import / refresh
    // ═══════════════════════════════════════════════════════════════════

    /// Import a new data source of type `tag` and register it.
    ///
    /// A failed import leaves neither a registry entry nor a store behind.
    pub async fn import(&self, name: &str, tag: &str, config: DataSourceConfig) -> Result<DataSource> {
        self.registry.check_name(name, None)?;
        let importer = self.sources.importer(tag)?;
        importer.validate(&config)?;

        let id = uuid::Uuid::new_v4().to_string();
        let mut ds = DataSource {
            id: id.clone(),
            name: name.trim().to_string(),
            kind: importer.kind().as_str().to_string(),
            created_at: Utc::now().timestamp_millis(),
            config,
            analysis: None,
        };
        let store_path = self.registry.root().join(store_rel_path(&id));
        let ctx = ImportContext {
            config: &self.config,
            store_path: store_path.clone(),
            suggester: self.suggester.as_deref(),
            cancel: self.cancel.clone(),
        };

        let outcome = match importer.import(&ctx, &mut ds).await {
            Ok(()) => self.registry.add(ds.clone()),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            remove_store_dir(&store_path);
            return Err(e);
        }
        info!(id = %ds.id, name = %ds.name, kind = %ds.kind, "imported data source");
        Ok(ds)
    }

    /// Bring a refreshable source's local store up to date.
    pub async fn refresh(&self, id: &str) -> Result<RefreshResult> {
        let ds = self.registry.get(id)?;
        let refresher = self.sources.refresher(&ds.kind)?;
        let path = self
            .registry
            .store_path(&ds)
            .ok_or_else(|| anyhow!("data source '{}' has no local store", ds.name))?;
        let pool = open_existing(&path).await?;

        let mut result = RefreshResult::new(&ds);
        let ctx = RefreshContext {
            config: &self.config,
            pool: &pool,
            cancel: self.cancel.clone(),
        };
        let mut outcome = refresher.refresh(&ctx, &ds, &mut result).await;
        if outcome.is_ok() {
            let store = TableStore::Local(pool.clone());
            match store_schema(&store).await {
                Ok(schema) => {
                    let mut analysis = ds.analysis.clone().unwrap_or_default();
                    analysis.schema = schema;
                    if let Err(e) = self.registry.update_analysis(&ds.id, analysis) {
                        outcome = Err(e.context("failed to record schema after refresh"));
                    }
                }
                Err(e) => warn!(id = %ds.id, error = %e, "failed to read schema after refresh"),
            }
        }
        pool.close().await;
        self.cache.invalidate(id);
        outcome?;

        info!(
            id = %ds.id,
            tables = result.tables_updated.len(),
            rows = result.total_new_rows,
            "refreshed data source"
        );
        Ok(result)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Registry passthroughs
    // ═══════════════════════════════════════════════════════════════════

    pub fn rename(&self, id: &str, new_name: &str) -> Result<()> {
        self.registry.rename(id, new_name)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.registry.delete(id)
    }

    pub fn update_analysis(&self, id: &str, analysis: Analysis) -> Result<()> {
        self.registry.update_analysis(id, analysis)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Table access
    // ═══════════════════════════════════════════════════════════════════

    /// Open the tables behind `ds`: its local store, or the remote server
    /// for linked database sources.
    pub async fn open_tables(&self, ds: &DataSource) -> Result<TableStore> {
        let linked = ds.source_kind().is_some_and(|k| k.is_remote_database())
            && !ds.config.store_locally;
        if linked {
            return Ok(TableStore::Remote(source_pool(&ds.config)?));
        }
        let path = self
            .registry
            .store_path(ds)
            .ok_or_else(|| anyhow!("data source '{}' has no local store", ds.name))?;
        Ok(TableStore::Local(open_existing(&path).await?))
    }

    pub async fn tables(&self, id: &str) -> Result<Vec<String>> {
        if let Some(entry) = self.cache.get(id).filter(|e| !e.tables.is_empty()) {
            debug!(id, "table list cache hit");
            return Ok(entry.tables);
        }
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let tables = store.list_tables().await;
        store.close().await;
        let tables = tables?;

        let mut entry = self.cache.get_or_default(id);
        entry.tables = tables.clone();
        self.cache.put(id, entry);
        Ok(tables)
    }

    /// Up to `limit` rows of `table`; `limit <= 0` means 100. Requests of
    /// at most ten rows are served from the cache when possible.
    pub async fn table_rows(&self, id: &str, table: &str, limit: i64) -> Result<Vec<Record>> {
        let cacheable = limit > 0 && limit <= SAMPLE_CACHE_LIMIT;
        if cacheable {
            if let Some(rows) = self.cache.get(id).and_then(|e| e.samples.get(table).cloned()) {
                debug!(id, table, "sample cache hit");
                return Ok(rows.into_iter().take(limit as usize).collect());
            }
        }

        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let fetch = if cacheable { SAMPLE_CACHE_LIMIT } else { limit };
        let rows = store.rows(table, fetch).await;
        store.close().await;
        let rows = rows?;

        if cacheable {
            let mut entry = self.cache.get_or_default(id);
            entry.samples.insert(table.to_string(), rows.clone());
            self.cache.put(id, entry);
            return Ok(rows.into_iter().take(limit as usize).collect());
        }
        Ok(rows)
    }

    pub async fn table_columns(&self, id: &str, table: &str) -> Result<Vec<String>> {
        if let Some(cols) = self.cache.get(id).and_then(|e| e.columns.get(table).cloned()) {
            debug!(id, table, "column cache hit");
            return Ok(cols);
        }
        let cols: Vec<String> = self
            .table_columns_with_types(id, table)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect();

        let mut entry = self.cache.get_or_default(id);
        entry.columns.insert(table.to_string(), cols.clone());
        self.cache.put(id, entry);
        Ok(cols)
    }

    pub async fn table_columns_with_types(&self, id: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let cols = store.columns(table).await;
        store.close().await;
        cols
    }

    pub async fn table_count(&self, id: &str, table: &str) -> Result<i64> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let n = store.count(table).await;
        store.close().await;
        n
    }

    pub async fn execute_sql(&self, id: &str, sql: &str) -> Result<Vec<Record>> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let rows = store.execute(sql).await;
        store.close().await;
        rows
    }

    // ═══════════════════════════════════════════════════════════════════
    // Edits
    // ═══════════════════════════════════════════════════════════════════

    async fn local_pool(&self, ds: &DataSource) -> Result<SqlitePool> {
        match self.open_tables(ds).await? {
            TableStore::Local(pool) => Ok(pool),
            remote => {
                remote.close().await;
                Err(anyhow!(
                    "data source '{}' has no local store to edit",
                    ds.name
                ))
            }
        }
    }

    /// Persist an analysis change and drop the cache entry.
    fn after_edit(&self, ds: &DataSource, f: impl FnOnce(&mut Analysis)) -> Result<()> {
        if let Some(mut analysis) = ds.analysis.clone() {
            f(&mut analysis);
            self.registry.update_analysis(&ds.id, analysis)?;
        }
        self.cache.invalidate(&ds.id);
        Ok(())
    }

    pub async fn drop_table(&self, id: &str, table: &str) -> Result<()> {
        let ds = self.registry.get(id)?;
        let pool = self.local_pool(&ds).await?;
        let outcome = edit::drop_table(&pool, table).await;
        pool.close().await;
        outcome?;
        self.after_edit(&ds, |a| edit::apply_drop_table(a, table))
    }

    pub async fn rename_column(&self, id: &str, table: &str, old: &str, new: &str) -> Result<()> {
        let ds = self.registry.get(id)?;
        let pool = self.local_pool(&ds).await?;
        let outcome = edit::rename_column(&pool, table, old, new).await;
        pool.close().await;
        outcome?;
        self.after_edit(&ds, |a| edit::apply_rename_column(a, table, old, new))
    }

    pub async fn drop_column(&self, id: &str, table: &str, column: &str) -> Result<()> {
        let ds = self.registry.get(id)?;
        let pool = self.local_pool(&ds).await?;
        let outcome = edit::drop_column(&pool, table, column).await;
        pool.close().await;
        outcome?;
        self.after_edit(&ds, |a| edit::apply_drop_column(a, table, column))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Export
    // ═══════════════════════════════════════════════════════════════════

    pub async fn export_csv(&self, id: &str, tables: &[String], output: &Path) -> Result<ExportReport> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let report = export::export_csv(&store, tables, output, &ds.name).await;
        store.close().await;
        report
    }

    pub async fn export_sql(&self, id: &str, tables: &[String], output: &Path) -> Result<ExportReport> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let report = export::export_sql(&store, tables, output).await;
        store.close().await;
        report
    }

    /// Export into a MySQL database and remember the target on success.
    pub async fn export_mysql(
        &self,
        id: &str,
        tables: &[String],
        target: MysqlExportConfig,
    ) -> Result<ExportReport> {
        let ds = self.registry.get(id)?;
        let store = self.open_tables(&ds).await?;
        let report = export::export_mysql(&store, tables, &ds, &target).await;
        store.close().await;
        let report = report?;
        self.registry.update_mysql_export_config(id, target)?;
        Ok(report)
    }
}

/// Every table of a store with its ordered column names.
pub async fn store_schema(store: &TableStore) -> Result<Vec<TableSchema>> {
    let mut schema = Vec::new();
    for table in store.list_tables().await? {
        let columns = store.columns(&table).await?.into_iter().map(|c| c.name).collect();
        schema.push(TableSchema {
            table_name: table,
            columns,
        });
    }
    Ok(schema)
}

fn remove_store_dir(store_path: &Path) {
    let Some(dir) = store_path.parent().map(PathBuf::from) else {
        return;
    };
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %e, "failed to remove partial store");
        }
    }
}
