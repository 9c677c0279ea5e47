use anyhow::Context;
use std::path::Path;
use tracing::{error, info};

use airbnb_etl::config::Config;
use airbnb_etl::services::{self, RawLoader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    airbnb_etl::logging::init(&config.logging);

    let delimiter = config.source.delimiter_byte()?;
    let store = services::connect(&config.database).await.map_err(|e| {
        error!("Failed to connect to store: {}", e);
        e
    })?;

    let loader = RawLoader::new(store, &config.tables, delimiter);
    let report = loader
        .load(Path::new(&config.source.path))
        .await
        .with_context(|| format!("Failed to load {} into {}", config.source.path, config.tables.raw))?;

    info!("Loaded {} rows into {}", report.rows, report.table);
    Ok(())
}
