//! eBay Sell APIs connector.
//!
//! Three feature flags pick which API families are imported:
//!
//! | Flag | Tables |
//! |------|--------|
//! | `ebay_api_fulfillment` | `orders`, `order_line_items` |
//! | `ebay_api_finances` | `transactions`, `payouts` |
//! | `ebay_api_analytics` | `traffic_report`, `seller_standards` |
//!
//! With no flag set only fulfillment is imported. Line items are split out
//! of each order before flattening and carry the parent `orderId`.
//!
//! Accounts without Finances access get a 403 on transactions; that table
//! is skipped rather than failing the family.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Config;
use crate::db::open_store;
use crate::flatten::flatten_all;
use crate::http::{
    api_root, array_objects, client, error_status, get_json_until, is_cancelled, objects_at, Paging,
    RestPager,
};
use crate::models::{DataSource, DataSourceConfig, Record, RefreshResult, SourceKind};
use crate::refresh::{refresh_listings, IdField, Listing};
use crate::traits::{
    import_resources, record_tables, ImportContext, Importer, RefreshContext, Refresher,
    ResourceFetcher,
};

/// Largest page the Sell APIs accept.
const PAGE_LIMIT: usize = 200;

const TRAFFIC_REPORT_QUERY: &str = "dimension=DAY&metric=CLICK_THROUGH_RATE&metric=LISTING_IMPRESSION_TOTAL&metric=LISTING_VIEWS_TOTAL";

fn require_token(config: &DataSourceConfig) -> Result<()> {
    if config.ebay_access_token.trim().is_empty() {
        bail!("ebay access token is required");
    }
    Ok(())
}

pub fn default_root(environment: &str) -> &'static str {
    if environment.trim().eq_ignore_ascii_case("sandbox") {
        "https://api.sandbox.ebay.com"
    } else {
        "https://api.ebay.com"
    }
}

struct EbayApi {
    client: Client,
    base: String,
    token: String,
    families: Vec<&'static str>,
    cancel: CancellationToken,
}

impl EbayApi {
    fn from_config(
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        require_token(config)?;
        let mut families = Vec::new();
        if config.ebay_api_fulfillment {
            families.push("fulfillment");
        }
        if config.ebay_api_finances {
            families.push("finances");
        }
        if config.ebay_api_analytics {
            families.push("analytics");
        }
        if families.is_empty() {
            families.push("fulfillment");
        }
        Ok(Self {
            client: client(settings.http.long_timeout_secs)?,
            base: api_root(&config.api_base_url, default_root(&config.ebay_environment)),
            token: config.ebay_access_token.trim().to_string(),
            families,
            cancel: cancel.clone(),
        })
    }

    fn listing(&self, path: &str, items_key: &'static str, limit: usize) -> RestPager {
        let sep = if path.contains('?') { '&' } else { '?' };
        RestPager::new(
            self.client.clone(),
            format!("{}{}{}limit={}", self.base, path, sep, limit),
            Some(items_key),
        )
        .paging(Paging::Offset {
            param: "offset",
            limit,
            total_key: Some("total"),
        })
        .header("Authorization", format!("Bearer {}", self.token))
        .cancel_on(self.cancel.clone())
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let req = self
            .client
            .get(format!("{}{}", self.base, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/json");
        get_json_until(req, &self.cancel).await
    }

    async fn fulfillment(&self) -> Result<Vec<(String, Vec<Record>)>> {
        let orders = self
            .listing("/sell/fulfillment/v1/order", "orders", PAGE_LIMIT)
            .collect_all()
            .await?;
        if orders.is_empty() {
            return Ok(Vec::new());
        }
        let line_items = split_line_items(&orders);
        Ok(vec![
            ("orders".to_string(), flatten_all(orders)),
            ("order_line_items".to_string(), flatten_all(line_items)),
        ])
    }

    async fn finances(&self) -> Result<Vec<(String, Vec<Record>)>> {
        let mut tables = Vec::new();
        match self
            .listing("/sell/finances/v1/transaction", "transactions", PAGE_LIMIT)
            .collect_all()
            .await
        {
            Ok(txns) => tables.push(("transactions".to_string(), flatten_all(txns))),
            Err(e) if error_status(&e) == Some(403) => {
                warn!("Finances API access denied, skipping transactions");
            }
            Err(e) => return Err(e),
        }
        match self
            .listing("/sell/finances/v1/payout", "payouts", PAGE_LIMIT)
            .collect_all()
            .await
        {
            Ok(payouts) => tables.push(("payouts".to_string(), flatten_all(payouts))),
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => warn!(error = %e, "skipping payouts"),
        }
        Ok(tables)
    }

    async fn analytics(&self) -> Result<Vec<(String, Vec<Record>)>> {
        let traffic = self
            .get(&format!("/sell/analytics/v1/traffic_report?{}", TRAFFIC_REPORT_QUERY))
            .await?;
        let mut tables = vec![(
            "traffic_report".to_string(),
            flatten_all(objects_at(&traffic, "dimensionMetrics")),
        )];
        match self
            .get("/sell/analytics/v1/seller_standards_profile?program=GLOBAL")
            .await
        {
            Ok(Value::Object(profile)) => {
                tables.push(("seller_standards".to_string(), flatten_all(vec![profile])));
            }
            Ok(_) => {}
            Err(e) if is_cancelled(&e) => return Err(e),
            Err(e) => warn!(error = %e, "skipping seller standards profile"),
        }
        Ok(tables)
    }
}

/// Line items of every order, each tagged with its order's `orderId`.
fn split_line_items(orders: &[Record]) -> Vec<Record> {
    let mut items = Vec::new();
    for order in orders {
        let order_id = order.get("orderId").cloned().unwrap_or(Value::Null);
        let Some(lines) = order.get("lineItems").and_then(Value::as_array) else {
            continue;
        };
        for mut item in array_objects(lines) {
            item.insert("orderId".to_string(), order_id.clone());
            items.push(item);
        }
    }
    items
}

#[async_trait]
impl ResourceFetcher for EbayApi {
    fn platform(&self) -> &str {
        "eBay"
    }

    fn resources(&self) -> Vec<&'static str> {
        self.families.clone()
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        match resource {
            "fulfillment" => self.fulfillment().await,
            "finances" => self.finances().await,
            "analytics" => self.analytics().await,
            other => bail!("unknown eBay API family: {}", other),
        }
    }

    fn failure_message(&self) -> String {
        "failed to import any eBay data, please check your access token permissions".to_string()
    }
}

pub struct Ebay;

#[async_trait]
impl Importer for Ebay {
    fn kind(&self) -> SourceKind {
        SourceKind::Ebay
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_token(config)
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let api = EbayApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

#[async_trait]
impl Refresher for Ebay {
    fn kind(&self) -> SourceKind {
        SourceKind::Ebay
    }

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()> {
        let api = EbayApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let limit = ctx.config.refresh.page_size.min(PAGE_LIMIT);
        let listings = vec![Listing::new(
            "orders",
            IdField::text("orderId"),
            api.listing("/sell/fulfillment/v1/order", "orders", limit),
        )];
        refresh_listings(ctx.pool, listings, ctx.config.refresh.max_new_records, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> DataSourceConfig {
        DataSourceConfig {
            ebay_access_token: "v^1.1#token".into(),
            ..Default::default()
        }
    }

    #[test]
    fn token_is_required() {
        let err = Ebay.validate(&DataSourceConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "ebay access token is required");
    }

    #[test]
    fn no_flags_means_fulfillment_only() {
        let api = EbayApi::from_config(&cfg(), &Config::with_root("/tmp/dh"), &CancellationToken::new())
            .unwrap();
        assert_eq!(api.resources(), vec!["fulfillment"]);
        assert_eq!(api.base, "https://api.ebay.com");

        let mut c = cfg();
        c.ebay_api_finances = true;
        c.ebay_api_analytics = true;
        c.ebay_environment = "Sandbox".into();
        let api = EbayApi::from_config(&c, &Config::with_root("/tmp/dh"), &CancellationToken::new())
            .unwrap();
        assert_eq!(api.resources(), vec!["finances", "analytics"]);
        assert_eq!(api.base, "https://api.sandbox.ebay.com");
    }

    #[test]
    fn line_items_carry_order_id() {
        let orders = vec![
            json!({"orderId": "12-1", "lineItems": [{"sku": "A"}, {"sku": "B"}]}),
            json!({"orderId": "12-2"}),
        ]
        .into_iter()
        .map(|v| v.as_object().unwrap().clone())
        .collect::<Vec<_>>();
        let items = split_line_items(&orders);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["sku"], "B");
        assert_eq!(items[1]["orderId"], "12-1");
    }
}
