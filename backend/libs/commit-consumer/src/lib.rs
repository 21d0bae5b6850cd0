//! # Commit-Controlled Kafka Consumer
//!
//! At-least-once consumption with manual offset commits: a record's offset
//! is committed only after its processing step has completed.
//!
//! ## Problem
//!
//! With auto-commit enabled the client commits offsets on a timer, regardless
//! of what the application did with the records:
//! - **Crash after commit, before processing**: record is lost
//! - **Slow processing**: offsets run ahead of the work actually done
//!
//! ## Solution
//!
//! Disable auto-commit and drive the cursor from the loop:
//!
//! ```text
//! Kafka ──poll(1s)──► ConsumerLoop ──process──► RecordProcessor (side effects)
//!   ▲                      │
//!   └──────commit(sync)────┘   only after process() returned Ok
//! ```
//!
//! - **Poll errors** are logged and the loop keeps polling
//! - **Processing errors** follow a [`FailurePolicy`]: abort, skip or bounded retry
//! - **Shutdown** is cooperative: the in-flight record is committed before
//!   the loop stops and the source is always closed
//!
//! ## Usage Example
//!
//! ```ignore
//! use commit_consumer::{
//!     shutdown, CommitStrategy, ConsumerLoop, KafkaSettings, KafkaSource, OffsetReset,
//!     ProcessingError, Record, RecordProcessor, SourceConfig,
//! };
//!
//! struct Store;
//!
//! #[async_trait::async_trait]
//! impl RecordProcessor for Store {
//!     async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
//!         println!("{}", record.value_lossy());
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = KafkaSettings::from_env()?;
//! let config = SourceConfig::new(settings.clone(), "g1", vec!["orders".to_string()])
//!     .with_offset_reset(OffsetReset::Earliest);
//!
//! let source = KafkaSource::connect(&config)?;
//! let (trigger, signal) = shutdown::channel();
//! shutdown::spawn_signal_listener(trigger);
//!
//! let summary = ConsumerLoop::new(source, Store, settings.loop_config(CommitStrategy::Manual))
//!     .run(signal)
//!     .await?;
//! println!("committed {} records", summary.committed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure Policies
//!
//! | Policy | Failed record | Loop |
//! |---|---|---|
//! | `Abort` (default) | not committed, redelivered on restart | stops with an error |
//! | `Skip` | not committed; a later commit on the partition covers it | continues |
//! | `Retry` | retried with backoff, committed on success | stops after the last attempt |
//!
//! ## Known Window
//!
//! The process can still be killed hard (SIGKILL, OOM) between processing
//! and commit. The record is then redelivered: processing steps must
//! tolerate duplicates.

pub mod config;
mod consumer_loop;
mod error;
pub mod kafka;
pub mod metrics;
mod policy;
mod record;
pub mod shutdown;
mod source;

pub use config::{KafkaSettings, OffsetReset, SecurityProtocol, SourceConfig};
pub use consumer_loop::{ConsumerLoop, LoopSummary, StepOutcome};
pub use error::{ConfigError, ConsumerError, ConsumerResult, ProcessingError, SourceError};
pub use kafka::{Assignment, AssignmentContext, KafkaSource};
pub use metrics::ConsumerMetrics;
pub use policy::{CommitStrategy, FailurePolicy, LoopConfig};
pub use record::{Cursor, CursorTable, Record};
pub use source::{RecordProcessor, RecordSource};
