//! Processing steps used by the demo consumers

use async_trait::async_trait;
use commit_consumer::{ProcessingError, Record, RecordProcessor};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

fn default_delay_ms() -> u64 {
    10_000
}

/// `STORE_*` environment settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// How long the simulated store takes
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl StoreSettings {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STORE_").from_env()
    }
}

/// Simulates a slow store: the window in which an interrupted consumer
/// must not have committed yet.
#[derive(Debug, Clone)]
pub struct StoreProcessor {
    delay: Duration,
}

impl StoreProcessor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self::new(Duration::from_millis(settings.delay_ms))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl RecordProcessor for StoreProcessor {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        info!(
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            "Received message: {}",
            record.value_lossy()
        );

        info!("Start storing");
        tokio::time::sleep(self.delay).await;
        info!("End storing");

        Ok(())
    }
}

/// Logs each record's value
#[derive(Debug, Clone, Default)]
pub struct PrintProcessor;

#[async_trait]
impl RecordProcessor for PrintProcessor {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        info!(
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            "Received message: {}",
            record.value_lossy()
        );
        Ok(())
    }
}
