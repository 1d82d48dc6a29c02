//! Core data models used throughout the harness.
//!
//! These types describe registered data sources, their connection settings,
//! the schema snapshot recorded after import, and refresh outcomes. They are
//! persisted as JSON in the metadata registry, so field names are part of the
//! on-disk format.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A flat, ordered record: column name to JSON scalar.
pub type Record = serde_json::Map<String, Value>;

/// A registered data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataSource {
    pub id: String,
    pub name: String,
    /// Type tag, e.g. `"csv"`, `"shopify"`. See [`SourceKind`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Creation time in unix milliseconds.
    pub created_at: i64,
    pub config: DataSourceConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl DataSource {
    /// Parsed type tag, if it is one of the known kinds.
    pub fn source_kind(&self) -> Option<SourceKind> {
        SourceKind::parse(&self.kind)
    }
}

/// Type-specific connection parameters, credentials, and flags.
///
/// Every field is optional on disk; empty strings mean "not set".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSourceConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub original_file: String,
    /// Local store path, relative to the cache root.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub db_path: String,
    /// Main table of a file import.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub table_name: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub port: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub database: String,
    #[serde(skip_serializing_if = "is_false")]
    pub store_locally: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mysql_export_config: Option<MysqlExportConfig>,

    /// Overrides the platform API root (proxies, gateways, test doubles).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_base_url: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub shopify_store: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub shopify_access_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub shopify_api_version: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub bigcommerce_store_hash: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bigcommerce_access_token: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub ebay_access_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ebay_environment: String,
    #[serde(skip_serializing_if = "is_false")]
    pub ebay_api_fulfillment: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub ebay_api_finances: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub ebay_api_analytics: bool,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub etsy_shop_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub etsy_access_token: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub jira_instance_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jira_base_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jira_username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jira_api_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jira_project_key: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub financial_api_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub financial_token: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub financial_symbols: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub financial_data_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub financial_dataset_code: String,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl DataSourceConfig {
    /// Set a single field by its serialized name, e.g. `("host", "db.local")`.
    ///
    /// Boolean fields accept `true`/`false`. Unknown keys are rejected.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut obj = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => bail!("config did not serialize to an object"),
        };
        if !Self::field_names().contains(&key) {
            bail!("unknown config key: '{}'", key);
        }
        let parsed = match value {
            "true" if Self::bool_fields().contains(&key) => Value::Bool(true),
            "false" if Self::bool_fields().contains(&key) => Value::Bool(false),
            _ if Self::bool_fields().contains(&key) => {
                bail!("config key '{}' expects true or false", key)
            }
            other => Value::String(other.to_string()),
        };
        obj.insert(key.to_string(), parsed);
        *self = serde_json::from_value(Value::Object(obj))?;
        Ok(())
    }

    fn bool_fields() -> &'static [&'static str] {
        &[
            "store_locally",
            "ebay_api_fulfillment",
            "ebay_api_finances",
            "ebay_api_analytics",
        ]
    }

    fn field_names() -> &'static [&'static str] {
        &[
            "original_file",
            "db_path",
            "table_name",
            "host",
            "port",
            "user",
            "password",
            "database",
            "store_locally",
            "api_base_url",
            "shopify_store",
            "shopify_access_token",
            "shopify_api_version",
            "bigcommerce_store_hash",
            "bigcommerce_access_token",
            "ebay_access_token",
            "ebay_environment",
            "ebay_api_fulfillment",
            "ebay_api_finances",
            "ebay_api_analytics",
            "etsy_shop_id",
            "etsy_access_token",
            "jira_instance_type",
            "jira_base_url",
            "jira_username",
            "jira_api_token",
            "jira_project_key",
            "financial_api_key",
            "financial_token",
            "financial_symbols",
            "financial_data_type",
            "financial_dataset_code",
        ]
    }
}

/// Target of a MySQL export, remembered per data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MysqlExportConfig {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// Summary text plus the schema snapshot of a data source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Analysis {
    pub summary: String,
    pub schema: Vec<TableSchema>,
}

impl Analysis {
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.schema.iter().find(|t| t.table_name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableSchema> {
        self.schema.iter_mut().find(|t| t.table_name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<String>,
}

/// Column name plus its declared storage type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: String,
}

/// Outcome of one refresh call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefreshResult {
    pub data_source_id: String,
    pub data_source_name: String,
    /// Table name to number of rows inserted or updated.
    pub tables_updated: BTreeMap<String, u64>,
    pub total_new_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshResult {
    pub fn new(ds: &DataSource) -> Self {
        Self {
            data_source_id: ds.id.clone(),
            data_source_name: ds.name.clone(),
            ..Default::default()
        }
    }

    /// Record `count` rows for `table`. Zero counts are not listed.
    pub fn record(&mut self, table: &str, count: u64) {
        if count == 0 {
            return;
        }
        *self.tables_updated.entry(table.to_string()).or_insert(0) += count;
        self.total_new_rows += count;
    }
}

/// Every type tag the harness recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    Excel,
    Csv,
    Json,
    Mysql,
    Doris,
    Postgresql,
    Shopify,
    BigCommerce,
    Ebay,
    Etsy,
    Jira,
    AlphaVantage,
    IexCloud,
    Quandl,
}

impl SourceKind {
    pub const ALL: [SourceKind; 14] = [
        SourceKind::Excel,
        SourceKind::Csv,
        SourceKind::Json,
        SourceKind::Mysql,
        SourceKind::Doris,
        SourceKind::Postgresql,
        SourceKind::Shopify,
        SourceKind::BigCommerce,
        SourceKind::Ebay,
        SourceKind::Etsy,
        SourceKind::Jira,
        SourceKind::AlphaVantage,
        SourceKind::IexCloud,
        SourceKind::Quandl,
    ];

    /// Case-insensitive lookup of a type tag.
    pub fn parse(tag: &str) -> Option<Self> {
        let lower = tag.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|k| k.as_str() == lower)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Excel => "excel",
            SourceKind::Csv => "csv",
            SourceKind::Json => "json",
            SourceKind::Mysql => "mysql",
            SourceKind::Doris => "doris",
            SourceKind::Postgresql => "postgresql",
            SourceKind::Shopify => "shopify",
            SourceKind::BigCommerce => "bigcommerce",
            SourceKind::Ebay => "ebay",
            SourceKind::Etsy => "etsy",
            SourceKind::Jira => "jira",
            SourceKind::AlphaVantage => "alpha_vantage",
            SourceKind::IexCloud => "iex_cloud",
            SourceKind::Quandl => "quandl",
        }
    }

    pub fn is_ecommerce(&self) -> bool {
        matches!(
            self,
            SourceKind::Shopify | SourceKind::BigCommerce | SourceKind::Ebay | SourceKind::Etsy
        )
    }

    pub fn is_refreshable(&self) -> bool {
        self.is_ecommerce() || *self == SourceKind::Jira
    }

    /// MySQL-protocol servers.
    pub fn is_remote_database(&self) -> bool {
        matches!(self, SourceKind::Mysql | SourceKind::Doris)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
