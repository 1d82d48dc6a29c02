//! Capability traits and type-tag routing.
//!
//! Every data source kind is served by an [`Importer`]; kinds that can be
//! kept current additionally have a [`Refresher`]. [`SourceRegistry`] maps
//! a type tag onto those capability objects, so the routing entry points
//! never switch on strings themselves.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                  SourceRegistry                    │
//! │  ┌──────────┐ ┌──────────┐ ┌─────────────────────┐ │
//! │  │  Files   │ │ Remote   │ │   REST connectors   │ │
//! │  │excel/csv/│ │ mysql/   │ │ shopify/bigcommerce │ │
//! │  │  json    │ │ doris/pg │ │ ebay/etsy/jira/fin  │ │
//! │  └──────────┘ └──────────┘ └─────────────────────┘ │
//! └──────────────┬─────────────────────────────────────┘
//!                ▼
//!     importer(tag)  → Importer::import  → local store
//!     refresher(tag) → Refresher::refresh → RefreshResult
//! ```
//!
//! Unknown tags fail with [`RoutingError::UnsupportedDriver`]; known kinds
//! without a refresher fail with [`RoutingError::RefreshUnsupported`].
//!
//! REST connectors share one import loop, [`import_resources`]: each named
//! resource is fetched and written as its own table, failures are logged
//! and skipped, and the import fails only when no resource succeeds.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::store_rel_path;
use crate::error::RoutingError;
use crate::http::is_cancelled;
use crate::infer::HeaderSuggester;
use crate::ingest::create_table_from_records;
use crate::models::{
    Analysis, DataSource, DataSourceConfig, Record, RefreshResult, SourceKind, TableSchema,
};
use crate::sanitize::{sanitize_name, UniqueNames};

// ═══════════════════════════════════════════════════════════════════════
// Contexts
// ═══════════════════════════════════════════════════════════════════════

/// Everything an importer may touch while building a data source.
pub struct ImportContext<'a> {
    pub config: &'a Config,
    /// Absolute path of the local store for the new data source.
    pub store_path: PathBuf,
    /// Optional header-name collaborator for headerless grids.
    pub suggester: Option<&'a dyn HeaderSuggester>,
    /// Checked between pages and requests by network importers.
    pub cancel: CancellationToken,
}

/// Everything a refresher may touch while updating a data source.
pub struct RefreshContext<'a> {
    pub config: &'a Config,
    pub pool: &'a SqlitePool,
    pub cancel: CancellationToken,
}

// ═══════════════════════════════════════════════════════════════════════
// Importer / Refresher
// ═══════════════════════════════════════════════════════════════════════

/// Builds a new data source of one kind.
///
/// # Lifecycle
///
/// 1. [`validate`](Importer::validate) checks mandatory fields. It performs
///    no I/O and must reject an all-empty configuration for any kind with
///    required fields.
/// 2. [`import`](Importer::import) fetches and writes the data, filling in
///    `ds.config.db_path`, the main table, and `ds.analysis`.
///
/// On error the caller removes the local store directory, so importers do
/// not need to clean up after themselves.
#[async_trait]
pub trait Importer: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn validate(&self, config: &DataSourceConfig) -> Result<()>;

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()>;
}

/// Brings an existing data source's local store up to date.
///
/// Implementations record per-table counts in `result` as they go, so a
/// failure part-way through still reports what was written.
#[async_trait]
pub trait Refresher: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()>;
}

/// Record a finished local import on the data source: store path, main
/// table (the first one created), and the schema snapshot.
pub fn record_tables(ds: &mut DataSource, tables: Vec<TableSchema>) {
    ds.config.db_path = store_rel_path(&ds.id).to_string_lossy().into_owned();
    ds.config.table_name = tables
        .first()
        .map(|t| t.table_name.clone())
        .unwrap_or_default();
    ds.analysis = Some(Analysis {
        summary: String::new(),
        schema: tables,
    });
}

// ═══════════════════════════════════════════════════════════════════════
// Resource fetching
// ═══════════════════════════════════════════════════════════════════════

/// A REST platform exposing a fixed list of named resources.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Platform name used in log lines and failure messages.
    fn platform(&self) -> &str;

    /// Resources to fetch, in order.
    fn resources(&self) -> Vec<&'static str>;

    /// Fetch one resource. A resource may produce several tables.
    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>>;

    fn failure_message(&self) -> String {
        format!("failed to import any {} data", self.platform())
    }
}

/// Fetch every resource and write each non-empty result as a TEXT table.
///
/// A resource counts as successful when it fetched and stored without
/// error, even if it returned no records. Cancellation aborts the whole
/// import instead of skipping the resource.
pub async fn import_resources(
    fetcher: &dyn ResourceFetcher,
    pool: &SqlitePool,
) -> Result<Vec<TableSchema>> {
    let mut tables = Vec::new();
    let mut names = UniqueNames::new();
    let mut succeeded = 0usize;
    let mut last_error = None;

    for resource in fetcher.resources() {
        let outcome = async {
            let mut created = Vec::new();
            for (table, records) in fetcher.fetch(resource).await? {
                let table = names.claim(&sanitize_name(&table));
                if let Some(schema) = create_table_from_records(pool, &table, &records).await? {
                    created.push(schema);
                }
            }
            Ok::<_, anyhow::Error>(created)
        }
        .await;

        match outcome {
            Ok(created) => {
                succeeded += 1;
                info!(
                    platform = fetcher.platform(),
                    resource,
                    tables = created.len(),
                    "fetched resource"
                );
                tables.extend(created);
            }
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => {
                warn!(platform = fetcher.platform(), resource, error = %e, "failed to fetch resource");
                last_error = Some(e);
            }
        }
    }

    if succeeded == 0 {
        let msg = fetcher.failure_message();
        return Err(match last_error {
            Some(e) => anyhow!("{}: {:#}", msg, e),
            None => anyhow!(msg),
        });
    }
    Ok(tables)
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Tag → capability routing table.
///
/// Use [`SourceRegistry::with_builtins`] for every built-in kind, or start
/// from [`new`](SourceRegistry::new) and register custom capabilities.
/// Later registrations for the same kind win.
pub struct SourceRegistry {
    importers: Vec<Box<dyn Importer>>,
    refreshers: Vec<Box<dyn Refresher>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            importers: Vec::new(),
            refreshers: Vec::new(),
        }
    }

    /// A registry with an importer for every [`SourceKind`] and a refresher
    /// for every refreshable kind.
    pub fn with_builtins() -> Self {
        use crate::connector_bigcommerce::BigCommerce;
        use crate::connector_ebay::Ebay;
        use crate::connector_etsy::Etsy;
        use crate::connector_financial::FinancialImporter;
        use crate::connector_jira::Jira;
        use crate::connector_shopify::Shopify;
        use crate::import_file::{CsvImporter, ExcelImporter, JsonImporter};
        use crate::import_remote::{PostgresImporter, RemoteDbImporter};

        let mut registry = Self::new();
        registry.register_importer(Box::new(ExcelImporter));
        registry.register_importer(Box::new(CsvImporter));
        registry.register_importer(Box::new(JsonImporter));
        registry.register_importer(Box::new(RemoteDbImporter::new(SourceKind::Mysql)));
        registry.register_importer(Box::new(RemoteDbImporter::new(SourceKind::Doris)));
        registry.register_importer(Box::new(PostgresImporter));
        for kind in [
            SourceKind::AlphaVantage,
            SourceKind::IexCloud,
            SourceKind::Quandl,
        ] {
            registry.register_importer(Box::new(FinancialImporter::new(kind)));
        }

        registry.register_importer(Box::new(Shopify));
        registry.register_importer(Box::new(BigCommerce));
        registry.register_importer(Box::new(Ebay));
        registry.register_importer(Box::new(Etsy));
        registry.register_importer(Box::new(Jira));

        registry.register_refresher(Box::new(Shopify));
        registry.register_refresher(Box::new(BigCommerce));
        registry.register_refresher(Box::new(Ebay));
        registry.register_refresher(Box::new(Etsy));
        registry.register_refresher(Box::new(Jira));
        registry
    }

    pub fn register_importer(&mut self, importer: Box<dyn Importer>) {
        self.importers.push(importer);
    }

    pub fn register_refresher(&mut self, refresher: Box<dyn Refresher>) {
        self.refreshers.push(refresher);
    }

    /// Importer for a type tag (case-insensitive).
    pub fn importer(&self, tag: &str) -> Result<&dyn Importer, RoutingError> {
        let kind = SourceKind::parse(tag)
            .ok_or_else(|| RoutingError::UnsupportedDriver(tag.to_string()))?;
        self.importers
            .iter()
            .rev()
            .find(|i| i.kind() == kind)
            .map(|i| i.as_ref())
            .ok_or_else(|| RoutingError::UnsupportedDriver(tag.to_string()))
    }

    /// Refresher for a type tag (case-insensitive).
    pub fn refresher(&self, tag: &str) -> Result<&dyn Refresher, RoutingError> {
        let kind = SourceKind::parse(tag)
            .ok_or_else(|| RoutingError::RefreshUnsupported(tag.to_string()))?;
        self.refreshers
            .iter()
            .rev()
            .find(|r| r.kind() == kind)
            .map(|r| r.as_ref())
            .ok_or_else(|| RoutingError::RefreshUnsupported(tag.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.importers.is_empty()
    }

    /// Number of registered importers.
    pub fn len(&self) -> usize {
        self.importers.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_store;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_kind_routes_to_an_importer() {
        let registry = SourceRegistry::with_builtins();
        for kind in SourceKind::ALL {
            let importer = registry.importer(kind.as_str()).unwrap();
            assert_eq!(importer.kind(), kind);
        }
        let upper = registry.importer("SHOPIFY").unwrap();
        assert_eq!(upper.kind(), SourceKind::Shopify);
    }

    #[test]
    fn unknown_tags_are_unsupported() {
        let registry = SourceRegistry::with_builtins();
        let err = registry.importer("oracle").err().unwrap();
        assert!(err.to_string().contains("unsupported driver type"));
    }

    #[test]
    fn refresh_routing_matches_refreshable_kinds() {
        let registry = SourceRegistry::with_builtins();
        for kind in SourceKind::ALL {
            match registry.refresher(kind.as_str()) {
                Ok(r) => {
                    assert!(kind.is_refreshable());
                    assert_eq!(r.kind(), kind);
                }
                Err(e) => {
                    assert!(!kind.is_refreshable());
                    assert!(e.to_string().contains("does not support refresh"));
                }
            }
        }
    }

    struct Scripted {
        calls: AtomicUsize,
        fail: Vec<&'static str>,
        cancel_at: Option<&'static str>,
    }

    #[async_trait]
    impl ResourceFetcher for Scripted {
        fn platform(&self) -> &str {
            "Test"
        }

        fn resources(&self) -> Vec<&'static str> {
            vec!["orders", "products", "empty"]
        }

        async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.cancel_at == Some(resource) {
                return Err(crate::http::Cancelled.into());
            }
            if self.fail.contains(&resource) {
                anyhow::bail!("{} exploded", resource);
            }
            if resource == "empty" {
                return Ok(vec![(resource.to_string(), Vec::new())]);
            }
            let row = json!({"id": 1, "name": resource});
            Ok(vec![(
                resource.to_string(),
                vec![row.as_object().unwrap().clone()],
            )])
        }
    }

    #[tokio::test]
    async fn partial_failures_are_skipped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        let fetcher = Scripted {
            calls: AtomicUsize::new(0),
            fail: vec!["products"],
            cancel_at: None,
        };
        let tables = import_resources(&fetcher, &pool).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        let names: Vec<_> = tables.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["orders"]);
    }

    #[tokio::test]
    async fn total_failure_reports_last_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        let fetcher = Scripted {
            calls: AtomicUsize::new(0),
            fail: vec!["orders", "products", "empty"],
            cancel_at: None,
        };
        let err = import_resources(&fetcher, &pool).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to import any Test data: empty exploded");
    }

    #[tokio::test]
    async fn cancellation_stops_the_remaining_resources() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = open_store(&tmp.path().join("data.db")).await.unwrap();
        let fetcher = Scripted {
            calls: AtomicUsize::new(0),
            fail: vec![],
            cancel_at: Some("products"),
        };
        let err = import_resources(&fetcher, &pool).await.unwrap_err();
        assert!(is_cancelled(&err));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
