//! Consume a topic, store each record, then commit its offset

use anyhow::{Context, Result};
use clap::Parser;
use commit_consumer::{CommitStrategy, KafkaSettings, OffsetReset, SourceConfig};
use kafka_tools::cli::CommitConsumerArgs;
use kafka_tools::logging::init_tracing;
use kafka_tools::processors::{StoreProcessor, StoreSettings};
use kafka_tools::runtime::run_consumer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CommitConsumerArgs::parse();
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = KafkaSettings::from_env().context("Failed to load Kafka settings")?;
    let store_settings = StoreSettings::from_env().context("Failed to load store settings")?;
    let store = StoreProcessor::from_settings(&store_settings);

    info!(
        topic = %args.topic,
        group_id = %args.group_id,
        store_delay_ms = store_settings.delay_ms,
        "Starting commit consumer"
    );

    let config = SourceConfig::new(settings, args.group_id, vec![args.topic])
        .with_offset_reset(OffsetReset::Earliest)
        .with_commit_strategy(CommitStrategy::Manual);

    run_consumer(config, store).await?;
    Ok(())
}
