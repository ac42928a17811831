//! reportflow daemon
//!
//! Opens the `SQLite` store, starts the schedule and subscription sweeps and
//! runs until Ctrl+C or SIGTERM.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mimalloc::MiMalloc;

use reportflow::collaborators::InMemoryDatasetLoader;
use reportflow::config::AppConfig;
use reportflow::domain::Row;
use reportflow::logging::init_tracing;
use reportflow::store::SqliteStore;
use reportflow::{log_banner, log_success, ReportService};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "reportflow")]
#[command(about = "Report execution, scheduling and subscription delivery daemon")]
#[command(version)]
struct Args {
    /// Config file path.
    #[arg(short, long, env = "REPORTFLOW_CONFIG")]
    config: Option<String>,

    /// Log level, overriding the config file.
    #[arg(long, env = "REPORTFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    /// Database path, overriding the config file.
    #[arg(long, env = "REPORTFLOW_DATABASE")]
    database: Option<String>,

    /// JSON file of `{"table": [rows...]}` served by the dataset loader.
    #[arg(long, env = "REPORTFLOW_DATA")]
    data: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if let Some(path) = args.database {
        config.database.path = path;
    }

    init_tracing(&config.logging);
    log_banner!(
        format!("reportflow v{}", env!("CARGO_PKG_VERSION")),
        format!("database: {}", config.database.path)
    );

    let loader = match &args.data {
        Some(path) => load_tables(path).await?,
        None => InMemoryDatasetLoader::new(),
    };

    let store = SqliteStore::new(&config.database.path)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database.path))?;

    let service = ReportService::builder(Arc::new(store), Arc::new(loader), config).build();
    let summary = service.init().await?;
    log_success!(
        "Service ready: {} reports, {} schedules, {} subscriptions",
        summary.reports,
        summary.schedules,
        summary.subscriptions
    );

    shutdown_signal().await;
    service.dispose().await;

    tracing::info!("Shut down gracefully");
    Ok(())
}

async fn load_tables(path: &str) -> anyhow::Result<InMemoryDatasetLoader> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {path}"))?;
    let tables: BTreeMap<String, Vec<Row>> =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {path}"))?;

    let loader = InMemoryDatasetLoader::new();
    for (name, rows) in tables {
        tracing::info!(table = %name, rows = rows.len(), "Loaded table");
        loader.insert_table(name, rows);
    }
    Ok(loader)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
