//! Market-data connectors: Alpha Vantage, IEX Cloud, and Quandl
//! (Nasdaq Data Link).
//!
//! Each provider is a set of endpoints. An endpoint is fetched for every
//! configured symbol and the rows are gathered into one table named after
//! the endpoint, with a `symbol` column prepended. A symbol that fails is
//! logged and skipped; an endpoint fails only when every symbol did.
//!
//! | Kind | Required | Tables |
//! |------|----------|--------|
//! | `alpha_vantage` | `financial_api_key`, `financial_symbols`, `financial_data_type` | the data type |
//! | `iex_cloud` | `financial_token`, `financial_symbols` | `quote`, `chart` |
//! | `quandl` | `financial_api_key`, `financial_dataset_code` | the sanitized dataset code |
//!
//! Alpha Vantage answers throttled calls with HTTP 200 and a `Note` or
//! `Information` body; those are reported as rate-limit errors. Nothing is
//! retried.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::db::open_store;
use crate::flatten::{flatten, format_value};
use crate::http::{api_root, array_objects, client, get_json_until, is_cancelled};
use crate::models::{DataSource, DataSourceConfig, Record, SourceKind};
use crate::sanitize::sanitize_name;
use crate::traits::{import_resources, record_tables, ImportContext, Importer, ResourceFetcher};

pub const ALPHA_VANTAGE_ROOT: &str = "https://www.alphavantage.co";
pub const IEX_CLOUD_ROOT: &str = "https://cloud.iexapis.com/stable";
pub const QUANDL_ROOT: &str = "https://data.nasdaq.com/api/v3";

/// Alpha Vantage data types and their `function` parameter.
const ALPHA_VANTAGE_FUNCTIONS: [(&str, &str); 5] = [
    ("time_series", "TIME_SERIES_DAILY"),
    ("overview", "OVERVIEW"),
    ("income_statement", "INCOME_STATEMENT"),
    ("balance_sheet", "BALANCE_SHEET"),
    ("cash_flow", "CASH_FLOW"),
];

/// Comma-separated symbols, trimmed and upper-cased, blanks dropped.
pub fn parse_symbols(symbols: &str) -> Vec<String> {
    symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn alpha_vantage_function(data_type: &str) -> Option<(&'static str, &'static str)> {
    let data_type = data_type.trim().to_ascii_lowercase();
    ALPHA_VANTAGE_FUNCTIONS
        .iter()
        .find(|(name, _)| *name == data_type)
        .copied()
}

/// `DATABASE/DATASET`, both parts non-empty.
fn split_dataset_code(code: &str) -> Result<(&str, &str)> {
    match code.trim().split_once('/') {
        Some((db, ds)) if !db.is_empty() && !ds.is_empty() && !ds.contains('/') => Ok((db, ds)),
        _ => bail!(
            "invalid Quandl dataset code format: '{}', expected DATABASE_CODE/DATASET_CODE",
            code.trim()
        ),
    }
}

fn require_symbols(config: &DataSourceConfig) -> Result<Vec<String>> {
    let symbols = parse_symbols(&config.financial_symbols);
    if symbols.is_empty() {
        bail!("at least one symbol is required");
    }
    Ok(symbols)
}

fn validate_kind(kind: SourceKind, config: &DataSourceConfig) -> Result<()> {
    match kind {
        SourceKind::AlphaVantage => {
            if config.financial_api_key.trim().is_empty() {
                bail!("alpha vantage API key is required");
            }
            require_symbols(config)?;
            if config.financial_data_type.trim().is_empty() {
                bail!("alpha vantage data type is required");
            }
            if alpha_vantage_function(&config.financial_data_type).is_none() {
                bail!(
                    "unsupported alpha vantage data type: {}",
                    config.financial_data_type.trim()
                );
            }
        }
        SourceKind::IexCloud => {
            if config.financial_token.trim().is_empty() {
                bail!("iex cloud token is required");
            }
            require_symbols(config)?;
        }
        SourceKind::Quandl => {
            if config.financial_api_key.trim().is_empty() {
                bail!("quandl API key is required");
            }
            if config.financial_dataset_code.trim().is_empty() {
                bail!("quandl dataset code is required");
            }
            split_dataset_code(&config.financial_dataset_code)?;
        }
        other => bail!("{} is not a financial data source", other),
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Response shaping
// ═══════════════════════════════════════════════════════════════════════

/// Strip Alpha Vantage's `"1. open"` numbering and normalize the key.
fn clean_key(key: &str) -> String {
    let trimmed = match key.split_once(". ") {
        Some((n, rest)) if n.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => key,
    };
    sanitize_name(&trimmed.to_lowercase())
}

fn with_symbol(symbol: &str, record: Record) -> Record {
    let mut row = Record::new();
    row.insert("symbol".into(), Value::String(symbol.to_string()));
    for (k, v) in record {
        if k != "symbol" {
            row.insert(k, v);
        }
    }
    row
}

/// Rows of an Alpha Vantage body for one symbol.
fn alpha_vantage_rows(body: &Value, data_type: &str, symbol: &str) -> Result<Vec<Record>> {
    if let Some(msg) = ["Note", "Information"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
    {
        bail!("alpha vantage rate limit reached: {}", msg);
    }
    if let Some(msg) = body.get("Error Message").and_then(Value::as_str) {
        bail!("alpha vantage error: {}", msg);
    }

    let mut rows = Vec::new();
    match data_type {
        "time_series" => {
            let series = body
                .as_object()
                .and_then(|o| o.iter().find(|(k, _)| k.starts_with("Time Series")))
                .and_then(|(_, v)| v.as_object())
                .ok_or_else(|| anyhow!("no time series in response for {}", symbol))?;
            for (date, values) in series {
                let mut row = Record::new();
                row.insert("date".into(), Value::String(date.clone()));
                if let Some(values) = values.as_object() {
                    for (k, v) in values {
                        row.insert(clean_key(k), v.clone());
                    }
                }
                rows.push(with_symbol(symbol, row));
            }
        }
        "overview" => {
            if let Some(obj) = body.as_object().filter(|o| !o.is_empty()) {
                rows.push(with_symbol(symbol, flatten(&Value::Object(obj.clone()))));
            }
        }
        _ => {
            for (key, report_type) in [("annualReports", "annual"), ("quarterlyReports", "quarterly")] {
                let reports = body
                    .get(key)
                    .and_then(Value::as_array)
                    .map(|a| array_objects(a))
                    .unwrap_or_default();
                for report in reports {
                    let mut row = with_symbol(symbol, flatten(&Value::Object(report)));
                    row.insert("report_type".into(), Value::String(report_type.into()));
                    rows.push(row);
                }
            }
        }
    }
    Ok(rows)
}

/// A single object or an array of objects.
fn object_rows(body: &Value) -> Vec<Record> {
    match body {
        Value::Array(items) => array_objects(items),
        Value::Object(obj) => vec![obj.clone()],
        _ => Vec::new(),
    }
}

/// `column_names` + `data` grid of a Quandl dataset body.
fn quandl_rows(body: &Value) -> Result<Vec<Record>> {
    let dataset = body
        .get("dataset")
        .ok_or_else(|| anyhow!("no dataset in Quandl response"))?;
    let columns: Vec<String> = dataset
        .get("column_names")
        .and_then(Value::as_array)
        .map(|cols| cols.iter().filter_map(format_value).collect())
        .unwrap_or_default();
    if columns.is_empty() {
        bail!("Quandl dataset has no column names");
    }
    let data = dataset
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    Ok(data
        .iter()
        .filter_map(Value::as_array)
        .map(|cells| {
            columns
                .iter()
                .zip(cells.iter())
                .map(|(c, v)| (c.clone(), v.clone()))
                .collect()
        })
        .collect())
}

// ═══════════════════════════════════════════════════════════════════════
// Fetcher
// ═══════════════════════════════════════════════════════════════════════

struct FinancialApi {
    kind: SourceKind,
    client: Client,
    base: String,
    config: DataSourceConfig,
    cancel: CancellationToken,
}

impl FinancialApi {
    fn from_config(
        kind: SourceKind,
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        validate_kind(kind, config)?;
        let default_root = match kind {
            SourceKind::AlphaVantage => ALPHA_VANTAGE_ROOT,
            SourceKind::IexCloud => IEX_CLOUD_ROOT,
            _ => QUANDL_ROOT,
        };
        Ok(Self {
            kind,
            client: client(settings.http.long_timeout_secs)?,
            base: api_root(&config.api_base_url, default_root),
            config: config.clone(),
            cancel: cancel.clone(),
        })
    }

    async fn fetch_symbol(&self, endpoint: &str, symbol: &str) -> Result<Vec<Record>> {
        match self.kind {
            SourceKind::AlphaVantage => {
                let (data_type, function) = alpha_vantage_function(endpoint)
                    .ok_or_else(|| anyhow!("unsupported alpha vantage data type: {}", endpoint))?;
                let req = self.client.get(format!("{}/query", self.base)).query(&[
                    ("function", function),
                    ("symbol", symbol),
                    ("apikey", self.config.financial_api_key.trim()),
                ]);
                alpha_vantage_rows(&get_json_until(req, &self.cancel).await?, data_type, symbol)
            }
            _ => {
                let req = self
                    .client
                    .get(format!("{}/stock/{}/{}", self.base, symbol.to_lowercase(), endpoint))
                    .query(&[("token", self.config.financial_token.trim())]);
                let body = get_json_until(req, &self.cancel).await?;
                Ok(object_rows(&body)
                    .into_iter()
                    .map(|r| with_symbol(symbol, flatten(&Value::Object(r))))
                    .collect())
            }
        }
    }

    async fn fetch_quandl(&self) -> Result<Vec<Record>> {
        let (database, dataset) = split_dataset_code(&self.config.financial_dataset_code)?;
        let req = self
            .client
            .get(format!("{}/datasets/{}/{}.json", self.base, database, dataset))
            .query(&[("api_key", self.config.financial_api_key.trim())]);
        quandl_rows(&get_json_until(req, &self.cancel).await?)
    }
}

#[async_trait]
impl ResourceFetcher for FinancialApi {
    fn platform(&self) -> &str {
        match self.kind {
            SourceKind::AlphaVantage => "Alpha Vantage",
            SourceKind::IexCloud => "IEX Cloud",
            _ => "Quandl",
        }
    }

    fn resources(&self) -> Vec<&'static str> {
        match self.kind {
            SourceKind::AlphaVantage => alpha_vantage_function(&self.config.financial_data_type)
                .map(|(name, _)| vec![name])
                .unwrap_or_default(),
            SourceKind::IexCloud => vec!["quote", "chart"],
            _ => vec!["dataset"],
        }
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        if self.kind == SourceKind::Quandl {
            let table = sanitize_name(self.config.financial_dataset_code.trim());
            return Ok(vec![(table, self.fetch_quandl().await?)]);
        }

        let symbols = parse_symbols(&self.config.financial_symbols);
        let mut rows = Vec::new();
        let mut last_error = None;
        let mut succeeded = 0usize;
        for symbol in &symbols {
            match self.fetch_symbol(resource, symbol).await {
                Ok(r) => {
                    succeeded += 1;
                    rows.extend(r);
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    warn!(platform = self.platform(), symbol = %symbol, endpoint = resource, error = %e, "skipping symbol");
                    last_error = Some(e);
                }
            }
        }
        if succeeded == 0 {
            return Err(last_error.unwrap_or_else(|| anyhow!("no symbols to fetch")));
        }
        Ok(vec![(resource.to_string(), rows)])
    }
}

/// Importer for one market-data provider.
pub struct FinancialImporter {
    kind: SourceKind,
}

impl FinancialImporter {
    pub fn new(kind: SourceKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Importer for FinancialImporter {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        validate_kind(self.kind, config)
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let api = FinancialApi::from_config(self.kind, &ds.config, ctx.config, &ctx.cancel)?;
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_fields_name_what_is_missing() {
        let av = FinancialImporter::new(SourceKind::AlphaVantage);
        let mut cfg = DataSourceConfig::default();
        assert!(av.validate(&cfg).unwrap_err().to_string().contains("API key"));
        cfg.financial_api_key = "k".into();
        assert!(av.validate(&cfg).unwrap_err().to_string().contains("symbol"));
        cfg.financial_symbols = "msft, aapl".into();
        assert!(av.validate(&cfg).unwrap_err().to_string().contains("data type"));
        cfg.financial_data_type = "time_series".into();
        assert!(av.validate(&cfg).is_ok());

        let iex = FinancialImporter::new(SourceKind::IexCloud);
        assert!(iex
            .validate(&DataSourceConfig::default())
            .unwrap_err()
            .to_string()
            .contains("token"));

        let quandl = FinancialImporter::new(SourceKind::Quandl);
        let cfg = DataSourceConfig {
            financial_api_key: "k".into(),
            ..Default::default()
        };
        assert!(quandl.validate(&cfg).unwrap_err().to_string().contains("dataset code"));
    }

    #[test]
    fn dataset_codes_need_both_parts() {
        assert_eq!(split_dataset_code("WIKI/AAPL").unwrap(), ("WIKI", "AAPL"));
        for bad in ["WIKIAAPL", "/AAPL", "WIKI/"] {
            let err = split_dataset_code(bad).unwrap_err().to_string();
            assert!(err.contains("invalid Quandl dataset code format"), "{}", bad);
        }
    }

    #[test]
    fn time_series_rows_per_date() {
        let body = json!({
            "Meta Data": {"2. Symbol": "MSFT"},
            "Time Series (Daily)": {
                "2024-01-03": {"1. open": "374.50", "4. close": "377.00"},
                "2024-01-02": {"1. open": "370.00", "4. close": "374.50"}
            }
        });
        let rows = alpha_vantage_rows(&body, "time_series", "MSFT").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["symbol"], "MSFT");
        assert_eq!(rows[0]["date"], "2024-01-03");
        assert_eq!(rows[0]["open"], "374.50");
        assert_eq!(rows[1]["close"], "374.50");
    }

    #[test]
    fn in_body_throttle_is_a_rate_limit_error() {
        let body = json!({"Note": "Our standard API call frequency is 5 calls per minute"});
        let err = alpha_vantage_rows(&body, "time_series", "AAPL").unwrap_err();
        assert!(err.to_string().contains("rate limit"));
    }

    #[test]
    fn statements_tag_report_type() {
        let body = json!({
            "symbol": "IBM",
            "annualReports": [{"fiscalDateEnding": "2023-12-31", "totalRevenue": "61860000000"}],
            "quarterlyReports": [{"fiscalDateEnding": "2024-03-31"}, {"fiscalDateEnding": "2023-12-31"}]
        });
        let rows = alpha_vantage_rows(&body, "income_statement", "IBM").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["report_type"], "annual");
        assert_eq!(rows[2]["report_type"], "quarterly");
    }

    #[test]
    fn quote_object_or_chart_array() {
        assert_eq!(object_rows(&json!({"symbol": "AAPL", "latestPrice": 150.25})).len(), 1);
        assert_eq!(object_rows(&json!([{"date": "2024-01-01"}, {"date": "2024-01-02"}])).len(), 2);
        assert!(object_rows(&json!("nope")).is_empty());
    }

    #[test]
    fn quandl_grid_becomes_records() {
        let body = json!({"dataset": {
            "column_names": ["Date", "Close"],
            "data": [["2024-01-02", 151.5], ["2024-01-03", 152.0]]
        }});
        let rows = quandl_rows(&body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Date"], "2024-01-02");
        assert_eq!(rows[0]["Close"], 151.5);
    }
}
