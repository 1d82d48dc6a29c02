//! Shopify Admin REST connector.
//!
//! Imports orders, products, customers, and both collection kinds from one
//! store. Listings page through the `Link: <..>; rel="next"` header with
//! `limit=250`.
//!
//! # Configuration
//!
//! | Field | Required | Notes |
//! |-------|----------|-------|
//! | `shopify_store` | yes | `acme`, `acme.myshopify.com`, or a full URL |
//! | `shopify_access_token` | yes | sent as `X-Shopify-Access-Token` |
//! | `shopify_api_version` | no | defaults to `2024-01` |
//!
//! # Refresh
//!
//! Orders and customers are requested `created_at desc`; products use the
//! platform default order. All three are insert-only on the numeric `id`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::open_store;
use crate::flatten::flatten_all;
use crate::http::{api_root, client, Paging, RestPager};
use crate::models::{DataSource, DataSourceConfig, Record, RefreshResult, SourceKind};
use crate::refresh::{refresh_listings, IdField, Listing};
use crate::traits::{
    import_resources, record_tables, ImportContext, Importer, RefreshContext, Refresher,
    ResourceFetcher,
};

pub const DEFAULT_API_VERSION: &str = "2024-01";
const PAGE_LIMIT: usize = 250;

/// Strip scheme and trailing slashes; a bare shop name gets `.myshopify.com`.
pub fn normalize_store(store: &str) -> String {
    let store = store.trim();
    let store = store
        .strip_prefix("https://")
        .or_else(|| store.strip_prefix("http://"))
        .unwrap_or(store)
        .trim_end_matches('/');
    if store.contains('.') {
        store.to_string()
    } else {
        format!("{}.myshopify.com", store)
    }
}

fn require_credentials(config: &DataSourceConfig) -> Result<()> {
    if config.shopify_store.trim().is_empty() || config.shopify_access_token.trim().is_empty() {
        bail!("shopify store URL and access token are required");
    }
    Ok(())
}

struct ShopifyApi {
    client: Client,
    base: String,
    token: String,
    cancel: CancellationToken,
}

impl ShopifyApi {
    fn from_config(
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        require_credentials(config)?;
        let version = match config.shopify_api_version.trim() {
            "" => DEFAULT_API_VERSION,
            v => v,
        };
        let default_root = format!(
            "https://{}/admin/api/{}",
            normalize_store(&config.shopify_store),
            version
        );
        Ok(Self {
            client: client(settings.http.timeout_secs)?,
            base: api_root(&config.api_base_url, default_root),
            token: config.shopify_access_token.trim().to_string(),
            cancel: cancel.clone(),
        })
    }

    fn pager(&self, path_and_query: &str, items_key: &'static str) -> RestPager {
        RestPager::new(
            self.client.clone(),
            format!("{}{}", self.base, path_and_query),
            Some(items_key),
        )
        .paging(Paging::LinkHeader)
        .header("X-Shopify-Access-Token", self.token.clone())
        .cancel_on(self.cancel.clone())
    }
}

#[async_trait]
impl ResourceFetcher for ShopifyApi {
    fn platform(&self) -> &str {
        "Shopify"
    }

    fn resources(&self) -> Vec<&'static str> {
        vec![
            "orders",
            "products",
            "customers",
            "collections",
            "smart_collections",
        ]
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        let (path, key) = match resource {
            "orders" => (format!("/orders.json?status=any&limit={}", PAGE_LIMIT), "orders"),
            "products" => (format!("/products.json?limit={}", PAGE_LIMIT), "products"),
            "customers" => (format!("/customers.json?limit={}", PAGE_LIMIT), "customers"),
            "collections" => (
                format!("/custom_collections.json?limit={}", PAGE_LIMIT),
                "custom_collections",
            ),
            "smart_collections" => (
                format!("/smart_collections.json?limit={}", PAGE_LIMIT),
                "smart_collections",
            ),
            other => bail!("unknown Shopify resource: {}", other),
        };
        let records = self.pager(&path, key).collect_all().await?;
        Ok(vec![(resource.to_string(), flatten_all(records))])
    }
}

pub struct Shopify;

#[async_trait]
impl Importer for Shopify {
    fn kind(&self) -> SourceKind {
        SourceKind::Shopify
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_credentials(config)
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let api = ShopifyApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

#[async_trait]
impl Refresher for Shopify {
    fn kind(&self) -> SourceKind {
        SourceKind::Shopify
    }

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()> {
        let api = ShopifyApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let limit = ctx.config.refresh.page_size;
        let id = IdField::numeric("id");
        let listings = vec![
            Listing::new(
                "orders",
                id,
                api.pager(
                    &format!("/orders.json?status=any&limit={}&order=created_at%20desc", limit),
                    "orders",
                ),
            ),
            Listing::new(
                "customers",
                id,
                api.pager(
                    &format!("/customers.json?limit={}&order=created_at%20desc", limit),
                    "customers",
                ),
            ),
            Listing::new(
                "products",
                id,
                api.pager(&format!("/products.json?limit={}", limit), "products"),
            ),
        ];
        refresh_listings(ctx.pool, listings, ctx.config.refresh.max_new_records, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_names_normalize() {
        assert_eq!(normalize_store("acme"), "acme.myshopify.com");
        assert_eq!(normalize_store("https://acme.myshopify.com/"), "acme.myshopify.com");
        assert_eq!(normalize_store(" shop.example.com "), "shop.example.com");
    }

    #[test]
    fn credentials_are_required() {
        let err = Shopify.validate(&DataSourceConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "shopify store URL and access token are required");

        let cfg = DataSourceConfig {
            shopify_store: "acme".into(),
            ..Default::default()
        };
        assert!(Shopify.validate(&cfg).is_err());
    }

    #[test]
    fn api_root_uses_version_and_override() {
        let settings = Config::with_root("/tmp/dh");
        let mut cfg = DataSourceConfig {
            shopify_store: "acme".into(),
            shopify_access_token: "shpat_x".into(),
            ..Default::default()
        };
        let api = ShopifyApi::from_config(&cfg, &settings, &CancellationToken::new()).unwrap();
        assert_eq!(api.base, "https://acme.myshopify.com/admin/api/2024-01");

        cfg.api_base_url = "http://127.0.0.1:9000/".into();
        let api = ShopifyApi::from_config(&cfg, &settings, &CancellationToken::new()).unwrap();
        assert_eq!(api.base, "http://127.0.0.1:9000");
    }
}
