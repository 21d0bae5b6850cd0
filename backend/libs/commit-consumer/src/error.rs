//! Error types for the commit-controlled consumer

use rdkafka::error::KafkaError;
use thiserror::Error;

/// Result type for consumer loop operations
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors reported by a record source (poll, commit, close)
#[derive(Error, Debug)]
pub enum SourceError {
    /// Broker-reported error (partition error, transport failure, commit rejected)
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Source was used after `close()`
    #[error("Record source is closed")]
    Closed,

    /// Blocking client call did not run to completion
    #[error("Blocking task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl SourceError {
    /// Check if the broker reported the error as fatal for the client instance
    ///
    /// Everything else (transport hiccups, rebalances in progress, unknown
    /// partitions during metadata refresh) is recovered by polling again.
    pub fn is_fatal(&self) -> bool {
        match self {
            SourceError::Kafka(KafkaError::MessageConsumptionFatal(_)) => true,
            SourceError::Kafka(_) => false,
            SourceError::Closed => true,
            SourceError::Blocking(_) => false,
        }
    }
}

/// Error returned by a record processor
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProcessingError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProcessingError {
    /// Create a processing error with a plain message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Configuration errors (environment loading and validation)
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable missing or malformed
    #[error("Environment error: {0}")]
    Env(#[from] envy::Error),

    /// Settings are present but inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that end the consumer loop
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// Connecting or subscribing to the source failed
    #[error("Source setup failed: {0}")]
    Setup(#[source] SourceError),

    /// Broker reported an unrecoverable error while polling
    #[error("Source failed: {0}")]
    Source(#[source] SourceError),

    /// Processing step failed and the failure policy gave up on the record
    #[error(
        "Processing failed for {topic}[{partition}]@{offset} after {attempts} attempt(s): {source}"
    )]
    Processing {
        topic: String,
        partition: i32,
        offset: i64,
        attempts: u32,
        #[source]
        source: ProcessingError,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ConsumerError {
    /// Offset of the record the loop stopped on, if the error is tied to one
    pub fn failed_offset(&self) -> Option<i64> {
        match self {
            ConsumerError::Processing { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
