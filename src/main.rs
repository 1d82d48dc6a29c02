//! # Data Harness CLI (`dh`)
//!
//! Import tabular data sources into local SQLite stores, inspect and edit
//! their tables, keep connectors current, and export the results.
//!
//! ## Usage
//!
//! ```bash
//! dh --config ./config/dh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dh init` | Create the cache root and an empty registry |
//! | `dh list` | List registered data sources |
//! | `dh import <kind>` | Import a new data source |
//! | `dh tables <id>` | List tables |
//! | `dh columns <id> <table>` | List columns (`--types` for declared types) |
//! | `dh rows <id> <table>` | Print rows as JSON |
//! | `dh count <id> <table>` | Count rows |
//! | `dh sql <id> "<query>"` | Run SQL, print rows as JSON |
//! | `dh refresh <id>` | Incrementally refresh a connector source |
//! | `dh rename` / `dh delete` | Registry edits |
//! | `dh drop-table` / `dh rename-column` / `dh drop-column` | Table edits |
//! | `dh export csv\|sql\|mysql` | Export tables |
//!
//! ## Examples
//!
//! ```bash
//! dh import excel --name budget --path ./budget.xlsx
//! dh import mysql --name warehouse --set host=db.local --set user=ro --set database=sales
//! dh import jira --name ops --set jira_base_url=acme.atlassian.net \
//!     --set jira_username=me@acme.io --set jira_api_token=... --set jira_project_key=OPS
//! dh export csv <id> --tables issues,worklogs --output ./exports/ops
//! ```

use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use data_harness::config::{self, Config};
use data_harness::logging;
use data_harness::models::{DataSourceConfig, MysqlExportConfig};
use data_harness::workspace::Workspace;

/// Data Harness CLI: import, inspect, refresh, and export tabular data sources.
#[derive(Parser)]
#[command(
    name = "dh",
    about = "Data Harness: a local-first import and incremental-sync engine for tabular data",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/dh.toml`. The `[cache] root` setting decides
    /// where the registry and local stores live.
    #[arg(long, global = true, default_value = "./config/dh.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the cache root and an empty registry. Safe to re-run.
    Init,

    /// List registered data sources.
    List,

    /// Import a new data source.
    ///
    /// Kinds: excel, csv, json, mysql, doris, shopify, bigcommerce, ebay,
    /// etsy, jira, alpha_vantage, iex_cloud, quandl.
    Import {
        /// Data source type tag (case-insensitive).
        kind: String,

        /// Unique display name.
        #[arg(long)]
        name: String,

        /// Input file or directory for file-backed kinds.
        #[arg(long)]
        path: Option<PathBuf>,

        /// Connection setting as `key=value`, e.g. `host=db.local`. Repeatable.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },

    /// List the tables of a data source.
    Tables { id: String },

    /// List the columns of a table.
    Columns {
        id: String,
        table: String,

        /// Also print each column's declared type.
        #[arg(long)]
        types: bool,
    },

    /// Print rows of a table as JSON.
    Rows {
        id: String,
        table: String,

        /// Maximum rows; 0 means the default of 100.
        #[arg(long, default_value_t = 0)]
        limit: i64,
    },

    /// Count the rows of a table.
    Count { id: String, table: String },

    /// Run SQL against a data source and print the rows as JSON.
    Sql { id: String, query: String },

    /// Fetch new and changed records for a connector data source.
    Refresh { id: String },

    /// Rename a data source.
    Rename { id: String, new_name: String },

    /// Delete a data source and its local store.
    Delete { id: String },

    /// Drop a table from a data source's local store.
    DropTable { id: String, table: String },

    /// Rename a column.
    RenameColumn {
        id: String,
        table: String,
        old: String,
        new: String,
    },

    /// Drop a column.
    DropColumn {
        id: String,
        table: String,
        column: String,
    },

    /// Export tables to CSV files, a SQL file, or a MySQL database.
    Export {
        #[command(subcommand)]
        target: ExportTarget,
    },

    /// Print shell completions.
    Completions { shell: clap_complete::Shell },
}

#[derive(Subcommand)]
enum ExportTarget {
    /// One CSV file per table under `<parent of output>/<source name>/`.
    Csv {
        id: String,
        /// Comma-separated table names.
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        output: PathBuf,
    },

    /// One file of INSERT statements.
    Sql {
        id: String,
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        output: PathBuf,
    },

    /// Write into a MySQL database, creating it if needed.
    Mysql {
        id: String,
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "3306")]
        port: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long)]
        database: String,
    },
}

fn parse_settings(path: Option<PathBuf>, settings: &[String]) -> Result<DataSourceConfig> {
    let mut cfg = DataSourceConfig::default();
    if let Some(path) = path {
        cfg.original_file = path.display().to_string();
    }
    for setting in settings {
        let (key, value) = setting
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got '{}'", setting))?;
        cfg.set(key.trim(), value)?;
    }
    Ok(cfg)
}

/// Cancel network work on the first Ctrl-C; the command then fails cleanly.
fn cancel_on_ctrl_c(ws: &Workspace) {
    let cancel = ws.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            cancel.cancel();
        }
    });
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "dh", &mut std::io::stdout());
        return Ok(());
    }

    let cfg: Config = config::load_config(&cli.config)?;
    let ws = Workspace::new(cfg);

    match cli.command {
        Commands::Init => {
            ws.init()?;
            println!("cache root: {}", ws.config().cache.root.display());
        }
        Commands::List => {
            for ds in ws.list()? {
                println!("{}  {:<13} {}", ds.id, ds.kind, ds.name);
            }
        }
        Commands::Import {
            kind,
            name,
            path,
            settings,
        } => {
            let config = parse_settings(path, &settings)?;
            cancel_on_ctrl_c(&ws);
            let ds = ws.import(&name, &kind, config).await?;
            println!("imported {} ({})", ds.name, ds.kind);
            println!("id: {}", ds.id);
            if let Some(analysis) = &ds.analysis {
                for table in &analysis.schema {
                    println!("  {} ({} columns)", table.table_name, table.columns.len());
                }
            }
        }
        Commands::Tables { id } => {
            for table in ws.tables(&id).await? {
                println!("{}", table);
            }
        }
        Commands::Columns { id, table, types } => {
            if types {
                for col in ws.table_columns_with_types(&id, &table).await? {
                    println!("{}\t{}", col.name, col.col_type);
                }
            } else {
                for col in ws.table_columns(&id, &table).await? {
                    println!("{}", col);
                }
            }
        }
        Commands::Rows { id, table, limit } => {
            print_json(&ws.table_rows(&id, &table, limit).await?)?;
        }
        Commands::Count { id, table } => {
            println!("{}", ws.table_count(&id, &table).await?);
        }
        Commands::Sql { id, query } => {
            print_json(&ws.execute_sql(&id, &query).await?)?;
        }
        Commands::Refresh { id } => {
            cancel_on_ctrl_c(&ws);
            let result = ws.refresh(&id).await?;
            for (table, n) in &result.tables_updated {
                println!("  {}: {}", table, n);
            }
            println!("new rows: {}", result.total_new_rows);
            if let Some(err) = &result.error {
                println!("warnings: {}", err);
            }
        }
        Commands::Rename { id, new_name } => ws.rename(&id, &new_name)?,
        Commands::Delete { id } => ws.delete(&id)?,
        Commands::DropTable { id, table } => ws.drop_table(&id, &table).await?,
        Commands::RenameColumn { id, table, old, new } => {
            ws.rename_column(&id, &table, &old, &new).await?
        }
        Commands::DropColumn { id, table, column } => {
            ws.drop_column(&id, &table, &column).await?
        }
        Commands::Export { target } => {
            let report = match target {
                ExportTarget::Csv { id, tables, output } => {
                    ws.export_csv(&id, &tables, &output).await?
                }
                ExportTarget::Sql { id, tables, output } => {
                    ws.export_sql(&id, &tables, &output).await?
                }
                ExportTarget::Mysql {
                    id,
                    tables,
                    host,
                    port,
                    user,
                    password,
                    database,
                } => {
                    let target = MysqlExportConfig {
                        host,
                        port,
                        user,
                        password,
                        database,
                    };
                    ws.export_mysql(&id, &tables, target).await?
                }
            };
            for (table, n) in &report.tables {
                println!("  {}: {} rows", table, n);
            }
            println!("exported to {}", report.location);
        }
        Commands::Completions { .. } => {}
    }

    println!("ok");
    Ok(())
}
