//! Shared startup and shutdown for the consumer programs

use anyhow::{Context, Result};
use commit_consumer::{
    shutdown, ConsumerLoop, KafkaSource, LoopSummary, RecordProcessor, SourceConfig,
};
use tracing::info;

/// Connect, run the loop until SIGINT/SIGTERM, then close the consumer.
///
/// Returns an error for setup failures and for anything that stops the
/// loop other than a shutdown request.
pub async fn run_consumer<P>(config: SourceConfig, processor: P) -> Result<LoopSummary>
where
    P: RecordProcessor,
{
    let loop_config = config.settings.loop_config(config.commit_strategy);
    let source = KafkaSource::connect(&config).context("Failed to set up Kafka consumer")?;

    let (trigger, signal) = shutdown::channel();
    let listener = shutdown::spawn_signal_listener(trigger);

    let result = ConsumerLoop::new(source, processor, loop_config)
        .run(signal)
        .await;
    listener.abort();

    let summary = result.context("Consumer loop stopped with an error")?;
    info!(
        records = summary.records,
        committed = summary.committed,
        skipped = summary.skipped,
        "Exiting safely"
    );

    Ok(summary)
}
