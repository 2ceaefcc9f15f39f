// CAF Crosswalk - Web Server
// REST API with Axum over the populated store

use anyhow::{Context, Result};
use caf_crosswalk::api::router;
use caf_crosswalk::config::ServerConfig;
use caf_crosswalk::logging::{init_logging, LogFormat};
use caf_crosswalk::{populate_from_files, Store};
use clap::Parser;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "crosswalk-server", version, about = "HTTP API for MOSID and rank lookups")]
struct Cli {
    #[command(flatten)]
    config: ServerConfig,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value = "pretty")]
    log_format: LogFormat,
}

/// Create the schema and populate the store once, before serving
fn initialize_store(config: &ServerConfig) -> Result<Store> {
    let store = Store::new(&config.store.db_path);
    let conn = store
        .open_writer()
        .with_context(|| format!("Failed to open store {}", store.path().display()))?;

    if config.skip_populate {
        info!(db = %store.path().display(), "serving existing store");
    } else {
        populate_from_files(&conn, &config.store.mnet_data, &config.store.ranks)
            .context("Failed to populate store")?;
    }

    Ok(store)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(Level::INFO, cli.log_format)?;

    let store = initialize_store(&cli.config)?;
    info!(db = %store.path().display(), "store ready");

    let app = router(store);

    let listener = tokio::net::TcpListener::bind(&cli.config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", cli.config.bind))?;

    info!(addr = %cli.config.bind, "🚀 server running");

    axum::serve(listener, app)
        .await
        .context("Server terminated")?;

    Ok(())
}
