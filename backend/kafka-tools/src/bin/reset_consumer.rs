//! Consume with a throwaway group so `auto.offset.reset` decides the start

use anyhow::{Context, Result};
use clap::Parser;
use commit_consumer::{CommitStrategy, KafkaSettings, SourceConfig};
use kafka_tools::cli::ResetConsumerArgs;
use kafka_tools::logging::init_tracing;
use kafka_tools::processors::PrintProcessor;
use kafka_tools::runtime::run_consumer;
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ResetConsumerArgs::parse();
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = KafkaSettings::from_env().context("Failed to load Kafka settings")?;
    let group_id = Uuid::new_v4().to_string();

    info!(
        topic = %args.topic,
        group_id = %group_id,
        offset_reset = %args.offset_reset,
        "Starting reset consumer"
    );

    let config = SourceConfig::new(settings, group_id, vec![args.topic])
        .with_offset_reset(args.offset_reset)
        .with_commit_strategy(CommitStrategy::Broker);

    run_consumer(config, PrintProcessor).await?;
    Ok(())
}
