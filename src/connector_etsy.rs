//! Etsy Open API v3 connector.
//!
//! Imports the shop record plus active listings, receipts, transactions,
//! and reviews. Listings are wrapped in `{"count", "results"}` and paged by
//! `offset` in steps of 100 until `count` is reached.
//!
//! When no shop id is configured it is looked up from the authenticated
//! user (`/application/users/me`).

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::db::open_store;
use crate::flatten::{flatten_all, format_value};
use crate::http::{api_root, client, get_json_until, Paging, RestPager};
use crate::models::{DataSource, DataSourceConfig, Record, RefreshResult, SourceKind};
use crate::refresh::{refresh_listings, IdField, Listing};
use crate::traits::{
    import_resources, record_tables, ImportContext, Importer, RefreshContext, Refresher,
    ResourceFetcher,
};

pub const DEFAULT_ROOT: &str = "https://openapi.etsy.com/v3";
const PAGE_LIMIT: usize = 100;

struct EtsyApi {
    client: Client,
    base: String,
    token: String,
    shop_id: String,
    cancel: CancellationToken,
}

impl EtsyApi {
    fn from_config(
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        if config.etsy_access_token.trim().is_empty() {
            bail!("etsy access token is required");
        }
        Ok(Self {
            client: client(settings.http.timeout_secs)?,
            base: api_root(&config.api_base_url, DEFAULT_ROOT),
            token: config.etsy_access_token.trim().to_string(),
            shop_id: config.etsy_shop_id.trim().to_string(),
            cancel: cancel.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base, path))
            .bearer_auth(&self.token)
            .header("x-api-key", &self.token)
            .header("Accept", "application/json")
    }

    fn listing(&self, path: &str, limit: usize) -> RestPager {
        let sep = if path.contains('?') { '&' } else { '?' };
        RestPager::new(
            self.client.clone(),
            format!("{}{}{}limit={}", self.base, path, sep, limit),
            Some("results"),
        )
        .paging(Paging::Offset {
            param: "offset",
            limit,
            total_key: Some("count"),
        })
        .header("Authorization", format!("Bearer {}", self.token))
        .header("x-api-key", self.token.clone())
        .cancel_on(self.cancel.clone())
    }

    /// Fill in the shop id from the authenticated user when not configured.
    async fn resolve_shop_id(&mut self) -> Result<String> {
        if self.shop_id.is_empty() {
            let me = get_json_until(self.request("/application/users/me"), &self.cancel).await?;
            self.shop_id = me
                .get("shop_id")
                .and_then(format_value)
                .filter(|id| !id.is_empty() && id != "0")
                .ok_or_else(|| anyhow!("shop_id not found in user info, user may not have a shop"))?;
            info!(shop_id = %self.shop_id, "detected Etsy shop");
        }
        Ok(self.shop_id.clone())
    }
}

#[async_trait]
impl ResourceFetcher for EtsyApi {
    fn platform(&self) -> &str {
        "Etsy"
    }

    fn resources(&self) -> Vec<&'static str> {
        vec!["shop", "listings", "receipts", "transactions", "reviews"]
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        let shop = format!("/application/shops/{}", self.shop_id);
        let records = match resource {
            "shop" => match get_json_until(self.request(&shop), &self.cancel).await? {
                Value::Object(info) => vec![info],
                _ => Vec::new(),
            },
            "listings" => {
                self.listing(&format!("{}/listings?state=active", shop), PAGE_LIMIT)
                    .collect_all()
                    .await?
            }
            "receipts" | "transactions" | "reviews" => {
                self.listing(&format!("{}/{}", shop, resource), PAGE_LIMIT)
                    .collect_all()
                    .await?
            }
            other => bail!("unknown Etsy resource: {}", other),
        };
        Ok(vec![(resource.to_string(), flatten_all(records))])
    }

    fn failure_message(&self) -> String {
        "failed to import any Etsy data, please check your credentials".to_string()
    }
}

pub struct Etsy;

#[async_trait]
impl Importer for Etsy {
    fn kind(&self) -> SourceKind {
        SourceKind::Etsy
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        if config.etsy_access_token.trim().is_empty() {
            bail!("etsy access token is required");
        }
        Ok(())
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let mut api = EtsyApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        ds.config.etsy_shop_id = api.resolve_shop_id().await?;
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

#[async_trait]
impl Refresher for Etsy {
    fn kind(&self) -> SourceKind {
        SourceKind::Etsy
    }

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()> {
        if ds.config.etsy_access_token.trim().is_empty() || ds.config.etsy_shop_id.trim().is_empty()
        {
            bail!("etsy access token and shop ID are required");
        }
        let api = EtsyApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let limit = ctx.config.refresh.page_size.min(PAGE_LIMIT);
        let listings = vec![Listing::new(
            "receipts",
            IdField::numeric("receipt_id"),
            api.listing(&format!("/application/shops/{}/receipts", api.shop_id), limit),
        )];
        refresh_listings(ctx.pool, listings, ctx.config.refresh.max_new_records, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_required() {
        let err = Etsy.validate(&DataSourceConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "etsy access token is required");
    }

    #[tokio::test]
    async fn refresh_needs_a_shop_id() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = crate::db::open_store(&tmp.path().join("data.db")).await.unwrap();
        let settings = Config::with_root(tmp.path());
        let ds = DataSource {
            id: "e1".into(),
            name: "shop".into(),
            kind: "etsy".into(),
            created_at: 0,
            config: DataSourceConfig {
                etsy_access_token: "tok".into(),
                ..Default::default()
            },
            analysis: None,
        };
        let ctx = RefreshContext {
            config: &settings,
            pool: &pool,
            cancel: CancellationToken::new(),
        };
        let mut result = RefreshResult::new(&ds);
        let err = Etsy.refresh(&ctx, &ds, &mut result).await.unwrap_err();
        assert_eq!(err.to_string(), "etsy access token and shop ID are required");
    }
}
