//! BigCommerce connector.
//!
//! Catalog and customer data come from the v3 API (`data` envelope, paged
//! by `meta.pagination.links.next`); orders only exist on the v2 API,
//! which returns a bare array and pages by `page=N` until it answers
//! `204 No Content` or an empty array.
//!
//! Every request carries `X-Auth-Token`.

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

const PAGE_LIMIT: usize = 250;

fn require_credentials(config: &DataSourceConfig) -> Result<()> {
    if config.bigcommerce_store_hash.trim().is_empty()
        || config.bigcommerce_access_token.trim().is_empty()
    {
        bail!("bigcommerce store hash and access token are required");
    }
    Ok(())
}

struct BigCommerceApi {
    client: Client,
    /// Store root; `/v2` and `/v3` hang off it.
    root: String,
    token: String,
    cancel: CancellationToken,
}

impl BigCommerceApi {
    fn from_config(
        config: &DataSourceConfig,
        settings: &Config,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        require_credentials(config)?;
        let default_root = format!(
            "https://api.bigcommerce.com/stores/{}",
            config.bigcommerce_store_hash.trim()
        );
        Ok(Self {
            client: client(settings.http.timeout_secs)?,
            root: api_root(&config.api_base_url, default_root),
            token: config.bigcommerce_access_token.trim().to_string(),
            cancel: cancel.clone(),
        })
    }

    fn v3(&self, path_and_query: &str) -> RestPager {
        RestPager::new(
            self.client.clone(),
            format!("{}/v3{}", self.root, path_and_query),
            Some("data"),
        )
        .paging(Paging::BodyLink)
        .header("X-Auth-Token", self.token.clone())
        .cancel_on(self.cancel.clone())
    }

    fn v2(&self, path_and_query: &str) -> RestPager {
        RestPager::new(
            self.client.clone(),
            format!("{}/v2{}", self.root, path_and_query),
            None,
        )
        .paging(Paging::PageNumber)
        .header("X-Auth-Token", self.token.clone())
        .cancel_on(self.cancel.clone())
    }
}

#[async_trait]
impl ResourceFetcher for BigCommerceApi {
    fn platform(&self) -> &str {
        "BigCommerce"
    }

    fn resources(&self) -> Vec<&'static str> {
        vec!["products", "categories", "brands", "customers", "orders"]
    }

    async fn fetch(&self, resource: &str) -> Result<Vec<(String, Vec<Record>)>> {
        let pager = match resource {
            "products" => self.v3(&format!("/catalog/products?limit={}", PAGE_LIMIT)),
            "categories" => self.v3(&format!("/catalog/categories?limit={}", PAGE_LIMIT)),
            "brands" => self.v3(&format!("/catalog/brands?limit={}", PAGE_LIMIT)),
            "customers" => self.v3(&format!("/customers?limit={}", PAGE_LIMIT)),
            "orders" => self.v2(&format!("/orders?limit={}", PAGE_LIMIT)),
            other => bail!("unknown BigCommerce resource: {}", other),
        };
        let records = pager.collect_all().await?;
        Ok(vec![(resource.to_string(), flatten_all(records))])
    }

    fn failure_message(&self) -> String {
        "failed to import any BigCommerce data, please check your access token permissions"
            .to_string()
    }
}

pub struct BigCommerce;

#[async_trait]
impl Importer for BigCommerce {
    fn kind(&self) -> SourceKind {
        SourceKind::BigCommerce
    }

    fn validate(&self, config: &DataSourceConfig) -> Result<()> {
        require_credentials(config)
    }

    async fn import(&self, ctx: &ImportContext<'_>, ds: &mut DataSource) -> Result<()> {
        let api = BigCommerceApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let pool = open_store(&ctx.store_path).await?;
        let tables = import_resources(&api, &pool).await;
        pool.close().await;
        record_tables(ds, tables?);
        Ok(())
    }
}

/// Refresh reads the newest page of each listing only.
#[async_trait]
impl Refresher for BigCommerce {
    fn kind(&self) -> SourceKind {
        SourceKind::BigCommerce
    }

    async fn refresh(
        &self,
        ctx: &RefreshContext<'_>,
        ds: &DataSource,
        result: &mut RefreshResult,
    ) -> Result<()> {
        let api = BigCommerceApi::from_config(&ds.config, ctx.config, &ctx.cancel)?;
        let limit = ctx.config.refresh.page_size;
        let id = IdField::numeric("id");
        let listings = vec![
            Listing::new(
                "orders",
                id,
                api.v2(&format!("/orders?limit={}&sort=date_created:desc", limit))
                    .paging(Paging::Single),
            ),
            Listing::new(
                "customers",
                id,
                api.v3(&format!("/customers?limit={}&sort=date_created:desc", limit))
                    .paging(Paging::Single),
            ),
            Listing::new(
                "products",
                id,
                api.v3(&format!("/catalog/products?limit={}&sort=id&direction=desc", limit))
                    .paging(Paging::Single),
            ),
        ];
        refresh_listings(ctx.pool, listings, ctx.config.refresh.max_new_records, result).await
    }
}
