//! # Data Harness
//!
//! A local-first import, schema-inference, and incremental-sync engine for
//! tabular data.
//!
//! Spreadsheets, CSV and JSON files, MySQL-protocol databases, and REST
//! platforms (e-commerce, Jira, market data) are normalized into one SQLite
//! store per data source. Long-lived connectors are kept current by
//! incremental refresh instead of re-downloading everything.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Importers   │──▶│   Ingest     │──▶│    SQLite    │
//! │ files/db/API │   │ infer+create │   │ sources/<id> │
//! └──────────────┘   └──────────────┘   └──────┬───────┘
//!        ▲                                     │
//!        │ refresh                             ▼
//! ┌──────┴───────┐                      ┌──────────────┐
//! │  Refreshers  │                      │ Schema cache │
//! │ insert/upsert│                      │  (TTL, RW)   │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dh init
//! dh import csv --name sales --path ./sales.csv
//! dh tables <id>
//! dh rows <id> sales --limit 5
//! dh import shopify --name shop --set shopify_store=acme --set shopify_access_token=...
//! dh refresh <id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`sanitize`] | Identifier sanitizing and dedup |
//! | [`infer`] | Header detection and column typing |
//! | [`flatten`] | Nested JSON to flat records |
//! | [`ingest`] | Table creation and bulk insert |
//! | [`workbook`] | xlsx / xls readers |
//! | [`import_file`] | Excel, CSV, JSON importers |
//! | [`import_remote`] | MySQL-protocol import and copy |
//! | [`http`] | REST client helpers and pagination |
//! | [`refresh`] | Insert-only and upsert refresh |
//! | [`schema_cache`] | Per-source schema cache |
//! | [`registry`] | `datasources.json` registry |
//! | [`traits`] | `Importer` / `Refresher` and routing |
//! | [`store`] | Table reads, local or remote |
//! | [`edit`] | Table and column edits |
//! | [`export`] | CSV, SQL, MySQL export |
//! | [`workspace`] | Facade over all of the above |

pub mod config;
pub mod connector_bigcommerce;
pub mod connector_ebay;
pub mod connector_etsy;
pub mod connector_financial;
pub mod connector_jira;
pub mod connector_shopify;
pub mod db;
pub mod edit;
pub mod error;
pub mod export;
pub mod flatten;
pub mod http;
pub mod import_file;
pub mod import_remote;
pub mod infer;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod refresh;
pub mod registry;
pub mod sanitize;
pub mod schema_cache;
pub mod store;
pub mod traits;
pub mod workbook;
pub mod workspace;
