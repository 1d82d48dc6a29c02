//! Insert-only refresh over a multi-page, newest-first listing served by a
//! local stand-in that links its pages with `Link: rel="next"` headers.

use axum::extract::{Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use data_harness::db::open_store;
use data_harness::http::{is_cancelled, Paging, RestPager};
use data_harness::ingest::create_table_from_records;
use data_harness::models::Record;
use data_harness::refresh::{refresh_insert_only, table_exists, IdField};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Order ids per page, newest first.
const PAGES: [[u64; 2]; 3] = [[6, 5], [4, 3], [2, 1]];

#[derive(Clone)]
struct Listing {
    base: String,
    hits: Arc<[AtomicUsize; 3]>,
    cancel_after_first: Option<CancellationToken>,
}

impl Listing {
    fn hits(&self) -> Vec<usize> {
        self.hits.iter().map(|h| h.load(Ordering::SeqCst)).collect()
    }
}

async fn orders(State(listing): State<Listing>, Query(q): Query<HashMap<String, String>>) -> Response {
    let page: usize = q.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    listing.hits[page - 1].fetch_add(1, Ordering::SeqCst);
    if page == 1 {
        if let Some(token) = &listing.cancel_after_first {
            token.cancel();
        }
    }

    let orders: Vec<Value> = PAGES[page - 1]
        .iter()
        .map(|id| json!({"id": id, "total_price": format!("{}.00", id * 10)}))
        .collect();
    let mut resp = Json(json!({ "orders": orders })).into_response();
    if page < PAGES.len() {
        let link = format!(r#"<{}/orders?page={}>; rel="next""#, listing.base, page + 1);
        resp.headers_mut()
            .insert(header::LINK, HeaderValue::from_str(&link).unwrap());
    }
    resp
}

async fn serve(cancel_after_first: Option<CancellationToken>) -> Listing {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listing = Listing {
        base: format!("http://{}", listener.local_addr().unwrap()),
        hits: Arc::new(Default::default()),
        cancel_after_first,
    };
    let app = Router::new()
        .route("/orders", get(orders))
        .with_state(listing.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    listing
}

fn pager(listing: &Listing) -> RestPager {
    RestPager::new(
        reqwest::Client::new(),
        format!("{}/orders?page=1", listing.base),
        Some("orders"),
    )
    .paging(Paging::LinkHeader)
}

async fn store(tmp: &TempDir) -> SqlitePool {
    open_store(&tmp.path().join("data.db")).await.unwrap()
}

async fn count(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM orders")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn stops_after_a_page_with_nothing_new() {
    let listing = serve(None).await;
    let tmp = TempDir::new().unwrap();
    let pool = store(&tmp).await;
    let known: Vec<Record> = [4, 3]
        .iter()
        .map(|id| json!({"id": id}).as_object().unwrap().clone())
        .collect();
    create_table_from_records(&pool, "orders", &known).await.unwrap();

    let mut pager = pager(&listing);
    let n = refresh_insert_only(&pool, "orders", IdField::numeric("id"), &mut pager, 500)
        .await
        .unwrap();

    assert_eq!(n, 2);
    assert_eq!(listing.hits(), vec![1, 1, 0]);
    assert_eq!(count(&pool).await, 4);
}

#[tokio::test]
async fn stops_at_the_new_record_cap() {
    let listing = serve(None).await;
    let tmp = TempDir::new().unwrap();
    let pool = store(&tmp).await;

    let mut pager = pager(&listing);
    let n = refresh_insert_only(&pool, "orders", IdField::numeric("id"), &mut pager, 3)
        .await
        .unwrap();

    assert_eq!(n, 3);
    assert_eq!(listing.hits(), vec![1, 1, 0]);
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM orders ORDER BY id DESC")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(ids, vec!["6", "5", "4"]);
}

#[tokio::test]
async fn unchanged_listing_adds_nothing_the_second_time() {
    let listing = serve(None).await;
    let tmp = TempDir::new().unwrap();
    let pool = store(&tmp).await;

    let mut first = pager(&listing);
    let n = refresh_insert_only(&pool, "orders", IdField::numeric("id"), &mut first, 500)
        .await
        .unwrap();
    assert_eq!(n, 6);

    let mut second = pager(&listing);
    let n = refresh_insert_only(&pool, "orders", IdField::numeric("id"), &mut second, 500)
        .await
        .unwrap();
    assert_eq!(n, 0);
    assert_eq!(listing.hits(), vec![2, 1, 1]);
    assert_eq!(count(&pool).await, 6);
}

#[tokio::test]
async fn cancellation_between_pages_writes_nothing() {
    let token = CancellationToken::new();
    let listing = serve(Some(token.clone())).await;
    let tmp = TempDir::new().unwrap();
    let pool = store(&tmp).await;

    let mut pager = pager(&listing).cancel_on(token);
    let err = refresh_insert_only(&pool, "orders", IdField::numeric("id"), &mut pager, 500)
        .await
        .unwrap_err();

    assert!(is_cancelled(&err), "{:#}", err);
    assert_eq!(listing.hits()[1], 0);
    assert!(!table_exists(&pool, "orders").await.unwrap());
}
