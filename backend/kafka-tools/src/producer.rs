//! Line-oriented producer: one message per input line

use commit_consumer::shutdown::ShutdownSignal;
use commit_consumer::KafkaSettings;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info};

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

/// Message keys `0`, `1`, `2`, ... in send order
#[derive(Debug, Clone, Default)]
pub struct KeySequence {
    next: u64,
}

impl KeySequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_key(&mut self) -> String {
        let key = self.next.to_string();
        self.next += 1;
        key
    }

    /// Number of keys handed out so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

pub struct LineProducer {
    producer: FutureProducer,
    topic: String,
    keys: KeySequence,
}

impl LineProducer {
    pub fn new(settings: &KafkaSettings, topic: impl Into<String>) -> Result<Self, KafkaError> {
        let producer: FutureProducer = settings.producer_config().create()?;
        let topic = topic.into();

        info!(brokers = %settings.brokers, topic = %topic, "Kafka producer created");

        Ok(Self {
            producer,
            topic,
            keys: KeySequence::new(),
        })
    }

    /// Send one line and wait until it is flushed to the broker
    pub async fn send_line(&mut self, line: &str) -> Result<(), ProducerError> {
        let key = self.keys.next_key();
        let record = FutureRecord::to(&self.topic).key(&key).payload(line);

        let (partition, offset) = self
            .producer
            .send(record, SEND_TIMEOUT)
            .await
            .map_err(|(e, _)| e)?;
        self.producer.flush(FLUSH_TIMEOUT)?;

        debug!(key = %key, partition, offset, "Message sent");
        Ok(())
    }

    /// Send every line from `input` until EOF or shutdown. Returns the
    /// number of messages sent.
    pub async fn run<R>(
        &mut self,
        input: R,
        mut shutdown: ShutdownSignal,
    ) -> Result<u64, ProducerError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();

        loop {
            let line = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("Shutdown requested, stopping producer");
                    break;
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                info!("End of input");
                break;
            };

            self.send_line(&line).await?;
        }

        Ok(self.keys.issued())
    }
}
