use anyhow::Context;
use tracing::{error, info};

use airbnb_etl::config::Config;
use airbnb_etl::services::{self, clock_from_config, EtlPipeline};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    airbnb_etl::logging::init(&config.logging);

    let store = services::connect(&config.database).await.map_err(|e| {
        error!("Failed to connect to store: {}", e);
        e
    })?;

    let pipeline = EtlPipeline::new(store, &config.tables, clock_from_config(&config.pipeline));
    let report = pipeline.run().await.context("ETL run failed")?;

    info!("Run summary: {}", serde_json::to_string(&report)?);
    Ok(())
}
