//! Shared REST plumbing for the remote connectors.
//!
//! Every connector builds its own [`reqwest::Client`] with a per-request
//! timeout and sends requests through [`send`], which turns transport
//! failures and non-success statuses into descriptive errors. Nothing
//! here retries.

use anyhow::{Context, Result};
use reqwest::header::LINK;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Longest response-body excerpt carried in an error message.
const ERROR_BODY_LIMIT: usize = 500;

pub fn client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("failed to build HTTP client")
}

/// Platform root URL, or the configured override (proxies, test doubles).
pub fn api_root(override_url: &str, default: impl Into<String>) -> String {
    let override_url = override_url.trim().trim_end_matches('/');
    if override_url.is_empty() {
        default.into()
    } else {
        override_url.to_string()
    }
}

/// A received response: status, `Link: rel="next"` target, and body text.
#[derive(Debug)]
pub struct Page {
    pub status: StatusCode,
    pub next_link: Option<String>,
    body: String,
}

impl Page {
    pub fn is_no_content(&self) -> bool {
        self.status == StatusCode::NO_CONTENT || self.body.trim().is_empty()
    }

    /// Body as JSON, failing on any non-2xx status. An empty body is `null`.
    pub fn into_json(self) -> Result<Value> {
        check_status(self.status, &self.body)?;
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).context("failed to decode response")
    }
}

/// Non-success HTTP status, kept typed so callers can react to specific codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
}

impl ApiError {
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Auth { status, .. } | ApiError::Status { status, .. } => *status,
        }
    }
}

/// The caller cancelled the operation between or during requests.
#[derive(Debug, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Whether an error chain ends in [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|e| e.is::<Cancelled>())
}

/// Fail with [`Cancelled`] once `cancel` has fired.
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// [`get_json`] that gives up as soon as `cancel` fires.
pub async fn get_json_until(req: RequestBuilder, cancel: &CancellationToken) -> Result<Value> {
    ensure_active(cancel)?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Cancelled.into()),
        body = get_json(req) => body,
    }
}

/// HTTP status carried by an error chain, if it came from [`ApiError`].
pub fn error_status(err: &anyhow::Error) -> Option<u16> {
    err.chain()
        .find_map(|e| e.downcast_ref::<ApiError>())
        .map(ApiError::status)
}

fn check_status(status: StatusCode, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    let status = status.as_u16();
    if status == 401 || status == 403 {
        return Err(ApiError::Auth { status, body }.into());
    }
    Err(ApiError::Status { status, body }.into())
}

/// Send a request and read the whole body. Only transport failures error here.
pub async fn send(req: RequestBuilder) -> Result<Page> {
    let resp = req.send().await.context("failed to fetch data")?;
    let status = resp.status();
    let next_link = resp
        .headers()
        .get(LINK)
        .and_then(|v| v.to_str().ok())
        .and_then(next_link);
    let body = resp.text().await.context("failed to read response body")?;
    Ok(Page {
        status,
        next_link,
        body,
    })
}

/// Send a request and decode a successful JSON body.
pub async fn get_json(req: RequestBuilder) -> Result<Value> {
    send(req).await?.into_json()
}

/// Target of the `rel="next"` entry in an RFC 8288 `Link` header.
pub fn next_link(header: &str) -> Option<String> {
    header
        .split(',')
        .filter(|part| part.contains(r#"rel="next""#))
        .find_map(|part| {
            let start = part.find('<')?;
            let end = part.find('>')?;
            (end > start + 1).then(|| part[start + 1..end].to_string())
        })
}

// ═══════════════════════════════════════════════════════════════════════
// Pagination
// ═══════════════════════════════════════════════════════════════════════

/// How a paginated endpoint signals its next page.
#[derive(Debug, Clone, PartialEq)]
pub enum Paging {
    /// A single request.
    Single,
    /// RFC 8288 `Link` header with `rel="next"` (Shopify).
    LinkHeader,
    /// `meta.pagination.links.next` in the body, absolute or a bare query
    /// string relative to the current URL (BigCommerce v3).
    BodyLink,
    /// `page=N` from 1; a 204 or an empty page ends the listing (BigCommerce v2).
    PageNumber,
    /// `<param>=N` offsets stepping by `limit`. Ends on a short page, or once
    /// `offset + limit` reaches the body's `total_key` count when present.
    Offset {
        param: &'static str,
        limit: usize,
        total_key: Option<&'static str>,
    },
}

/// Walks a paginated JSON listing one page at a time.
///
/// `items_key` selects the array of records in each body; `None` means the
/// body itself is the array.
pub struct RestPager {
    client: Client,
    url: Option<String>,
    base_url: String,
    items_key: Option<&'static str>,
    paging: Paging,
    headers: Vec<(&'static str, String)>,
    basic_auth: Option<(String, String)>,
    cancel: CancellationToken,
    page: usize,
    offset: usize,
}

impl RestPager {
    pub fn new(client: Client, url: impl Into<String>, items_key: Option<&'static str>) -> Self {
        let url = url.into();
        Self {
            client,
            base_url: url.clone(),
            url: Some(url),
            items_key,
            paging: Paging::Single,
            headers: Vec::new(),
            basic_auth: None,
            cancel: CancellationToken::new(),
            page: 1,
            offset: 0,
        }
    }

    pub fn paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Stop paging once `token` is cancelled; the next call fails with [`Cancelled`].
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn request_url(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        match &self.paging {
            Paging::PageNumber => format!("{}{}page={}", url, sep, self.page),
            Paging::Offset { param, .. } => format!("{}{}{}={}", url, sep, param, self.offset),
            _ => url.to_string(),
        }
    }

    /// Fetch the next page of records, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<serde_json::Map<String, Value>>>> {
        let Some(url) = self.url.clone() else {
            return Ok(None);
        };
        ensure_active(&self.cancel)?;
        let mut req = self
            .client
            .get(self.request_url(&url))
            .header("Accept", "application/json");
        for (name, value) in &self.headers {
            req = req.header(*name, value);
        }
        if let Some((user, password)) = &self.basic_auth {
            req = req.basic_auth(user, Some(password));
        }

        let page = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Cancelled.into()),
            page = send(req) => page?,
        };
        if self.paging == Paging::PageNumber && page.is_no_content() {
            self.url = None;
            return Ok(None);
        }
        let link = page.next_link.clone();
        let body = page.into_json()?;
        let items = match self.items_key {
            Some(key) => objects_at(&body, key),
            None => body.as_array().map(|a| array_objects(a)).unwrap_or_default(),
        };

        self.url = match &self.paging {
            Paging::Single => None,
            Paging::LinkHeader => link,
            Paging::BodyLink => body
                .pointer("/meta/pagination/links/next")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|next| resolve_next(&self.base_url, next)),
            Paging::PageNumber => {
                self.page += 1;
                (!items.is_empty()).then_some(url)
            }
            Paging::Offset {
                limit, total_key, ..
            } => {
                let total = total_key
                    .and_then(|k| body.get(k))
                    .and_then(Value::as_u64)
                    .map(|t| t as usize);
                self.offset += limit;
                let short = items.len() < *limit;
                let past_total = total.is_some_and(|t| self.offset >= t);
                (!short && !past_total).then_some(url)
            }
        };
        Ok(Some(items))
    }

    /// Every record of every page.
    pub async fn collect_all(mut self) -> Result<Vec<serde_json::Map<String, Value>>> {
        let mut all = Vec::new();
        while let Some(items) = self.next_page().await? {
            all.extend(items);
        }
        Ok(all)
    }
}

/// Resolve a `next` link that may be a bare query string.
fn resolve_next(base_url: &str, next: &str) -> String {
    if next.starts_with('?') {
        let path = base_url.split('?').next().unwrap_or(base_url);
        format!("{}{}", path, next)
    } else {
        next.to_string()
    }
}

/// Objects under `key` of a JSON body; a missing key or non-array yields nothing.
pub fn objects_at(body: &Value, key: &str) -> Vec<serde_json::Map<String, Value>> {
    body.get(key)
        .and_then(Value::as_array)
        .map(|items| array_objects(items))
        .unwrap_or_default()
}

pub fn array_objects(items: &[Value]) -> Vec<serde_json::Map<String, Value>> {
    items
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn next_link_picks_rel_next() {
        let header = r#"<https://s.myshopify.com/a?page_info=p1>; rel="previous", <https://s.myshopify.com/a?page_info=p2>; rel="next""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://s.myshopify.com/a?page_info=p2")
        );
        assert_eq!(next_link(r#"<https://x/a>; rel="previous""#), None);
        assert_eq!(next_link(""), None);
    }

    #[test]
    fn auth_failures_carry_status_and_body() {
        let page = Page {
            status: StatusCode::UNAUTHORIZED,
            next_link: None,
            body: "bad token".into(),
        };
        let err = page.into_json().unwrap_err();
        assert_eq!(error_status(&err), Some(401));
        assert_eq!(err.to_string(), "authentication failed (401): bad token");
    }

    #[test]
    fn empty_success_body_is_null() {
        let page = Page {
            status: StatusCode::NO_CONTENT,
            next_link: None,
            body: String::new(),
        };
        assert!(page.is_no_content());
        assert_eq!(page.into_json().unwrap(), Value::Null);
    }

    #[test]
    fn relative_next_links_keep_the_path() {
        assert_eq!(
            resolve_next("https://api.x/v3/catalog/products?limit=250", "?page=2&limit=250"),
            "https://api.x/v3/catalog/products?page=2&limit=250"
        );
        assert_eq!(resolve_next("https://a/b", "https://a/c"), "https://a/c");
    }

    #[test]
    fn objects_at_skips_non_objects() {
        let body = json!({"orders": [{"id": 1}, 2, {"id": 3}]});
        assert_eq!(objects_at(&body, "orders").len(), 2);
        assert!(objects_at(&body, "missing").is_empty());
    }

    #[tokio::test]
    async fn cancelled_pager_sends_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let mut pager = RestPager::new(Client::new(), "http://127.0.0.1:9/orders", None)
            .paging(Paging::LinkHeader)
            .cancel_on(token.clone());
        let err = pager.next_page().await.unwrap_err();
        assert!(is_cancelled(&err));
        assert!(ensure_active(&token).is_err());
        assert!(ensure_active(&CancellationToken::new()).is_ok());
    }
}
