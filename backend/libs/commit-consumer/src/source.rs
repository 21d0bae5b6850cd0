//! Seams between the consumer loop and the outside world

use async_trait::async_trait;
use std::time::Duration;

use crate::error::{ProcessingError, SourceError};
use crate::record::{Cursor, Record};

/// A durable, partitioned record source with manual cursor commits.
///
/// The loop owns its source exclusively; implementations do not need to
/// be shareable.
#[async_trait]
pub trait RecordSource: Send {
    /// Wait up to `timeout` for the next record.
    ///
    /// - `Ok(None)`: nothing arrived within the wait
    /// - `Ok(Some(record))`: next record
    /// - `Err`: broker-reported error for this attempt
    ///
    /// Must be cancel-safe: dropping the future before it resolves must not
    /// lose a record.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Record>, SourceError>;

    /// Durably commit `cursor` (blocking until the broker acknowledges)
    async fn commit(&mut self, cursor: &Cursor) -> Result<(), SourceError>;

    /// Release the connection
    async fn close(&mut self) -> Result<(), SourceError>;
}

/// Side-effecting processing step run for every record
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError>;
}

#[async_trait]
impl<P: RecordProcessor + ?Sized> RecordProcessor for std::sync::Arc<P> {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        (**self).process(record).await
    }
}

#[async_trait]
impl<P: RecordProcessor + ?Sized> RecordProcessor for Box<P> {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        (**self).process(record).await
    }
}
