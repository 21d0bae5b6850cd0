//! Read stdin line by line and send each line to a topic

use anyhow::{Context, Result};
use clap::Parser;
use commit_consumer::{shutdown, KafkaSettings};
use kafka_tools::cli::LineProducerArgs;
use kafka_tools::logging::init_tracing;
use kafka_tools::producer::LineProducer;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::info;

fn main() -> Result<()> {
    let args = LineProducerArgs::parse();
    dotenvy::dotenv().ok();
    init_tracing();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
    let result = runtime.block_on(produce(args));

    // A pending stdin read holds a blocking thread until the next line arrives
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn produce(args: LineProducerArgs) -> Result<()> {
    let settings = KafkaSettings::from_env().context("Failed to load Kafka settings")?;
    let mut producer =
        LineProducer::new(&settings, &args.topic).context("Failed to create Kafka producer")?;

    let (trigger, signal) = shutdown::channel();
    let listener = shutdown::spawn_signal_listener(trigger);

    info!(topic = %args.topic, "Reading messages from stdin");
    let sent = producer
        .run(BufReader::new(tokio::io::stdin()), signal)
        .await
        .context("Producer stopped with an error")?;
    listener.abort();

    info!(sent, "Exiting safely");
    Ok(())
}
