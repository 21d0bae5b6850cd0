//! Join a consumer group and log every record from the latest offset on

use anyhow::{Context, Result};
use clap::Parser;
use commit_consumer::{CommitStrategy, KafkaSettings, OffsetReset, SourceConfig};
use kafka_tools::cli::GroupConsumerArgs;
use kafka_tools::logging::init_tracing;
use kafka_tools::processors::PrintProcessor;
use kafka_tools::runtime::run_consumer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = GroupConsumerArgs::parse();
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = KafkaSettings::from_env().context("Failed to load Kafka settings")?;

    info!(
        topic = %args.topic,
        consumer_group = %args.consumer_group,
        "Starting group consumer"
    );

    let config = SourceConfig::new(settings, args.consumer_group, vec![args.topic])
        .with_offset_reset(OffsetReset::Latest)
        .with_commit_strategy(CommitStrategy::Broker);

    run_consumer(config, PrintProcessor).await?;
    Ok(())
}
