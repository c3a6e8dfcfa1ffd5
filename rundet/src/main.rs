//! rundet - Automated run detection service
//!
//! Consumes data-file paths from the ingress queue, evaluates each run
//! against its instrument's configured specification, and publishes approved
//! reduction requests to the egress queue.

use anyhow::Result;
use clap::Parser;
use rundet::{health, ingest, run_detection};
use rundet_common::Config;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting run detection v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::parse();
    info!(
        "Consuming from {} on {}:{}, publishing to {}",
        config.ingress_queue, config.queue_host, config.queue_port, config.egress_queue
    );

    let ingestor = ingest::default_ingestor()?;
    health::spawn_heartbeat(config.heartbeat_path.clone());

    run_detection::run(config, ingestor).await;
    Ok(())
}
