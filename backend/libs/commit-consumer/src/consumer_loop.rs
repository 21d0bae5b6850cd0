//! The commit-controlled consumer loop
//!
//! Each iteration is strictly sequential:
//!
//! ```text
//! poll (bounded wait) -> process (to completion) -> commit (manual, sync)
//! ```
//!
//! A record's cursor is only committed after its processing step returned
//! `Ok`, so a crash at any point redelivers the record instead of losing it.

use tracing::{debug, error, info, warn};

use crate::error::{ConsumerError, ProcessingError, SourceError};
use crate::metrics::ConsumerMetrics;
use crate::policy::{CommitStrategy, LoopConfig};
use crate::record::{Cursor, CursorTable, Record};
use crate::shutdown::ShutdownSignal;
use crate::source::{RecordProcessor, RecordSource};

/// What a single iteration did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing arrived within the bounded wait
    Idle,
    /// The broker reported an error; the loop keeps going
    PollError,
    /// Record processed and its cursor committed
    Committed(Cursor),
    /// Record processed; committing is left to the broker's auto-commit
    Processed(Cursor),
    /// Record processed but the cursor was already at or past it
    AlreadyCommitted(Cursor),
    /// Record processed but the broker rejected the commit
    CommitFailed(Cursor),
    /// Processing failed and the record was left uncommitted
    Skipped(Cursor),
}

/// Counters for one `run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub polls: u64,
    pub empty_polls: u64,
    pub poll_errors: u64,
    pub records: u64,
    pub processed: u64,
    pub committed: u64,
    pub commit_failures: u64,
    pub skipped: u64,
}

/// Polls a source, processes each record, and commits it afterwards
pub struct ConsumerLoop<S, P> {
    source: S,
    processor: P,
    config: LoopConfig,
    cursors: CursorTable,
    summary: LoopSummary,
    metrics: Option<ConsumerMetrics>,
    consecutive_poll_errors: u32,
}

impl<S, P> ConsumerLoop<S, P>
where
    S: RecordSource,
    P: RecordProcessor,
{
    /// Take ownership of `source`; it is closed when `run` returns
    pub fn new(source: S, processor: P, config: LoopConfig) -> Self {
        Self {
            source,
            processor,
            config,
            cursors: CursorTable::new(),
            summary: LoopSummary::default(),
            metrics: None,
            consecutive_poll_errors: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: ConsumerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Cursors committed so far
    pub fn cursors(&self) -> &CursorTable {
        &self.cursors
    }

    pub fn summary(&self) -> &LoopSummary {
        &self.summary
    }

    /// Run until shutdown is requested or a fatal error occurs.
    ///
    /// Shutdown is checked between iterations and while waiting for a
    /// record, never between processing and commit. The source is closed
    /// on every exit path.
    pub async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<LoopSummary, ConsumerError> {
        info!(
            poll_timeout_ms = self.config.poll_timeout.as_millis() as u64,
            failure_policy = ?self.config.failure_policy,
            commit_strategy = ?self.config.commit_strategy,
            "Starting consumer loop"
        );

        let result = self.drive(&mut shutdown).await;

        if let Err(e) = self.source.close().await {
            warn!("Failed to close record source: {}", e);
        }

        match &result {
            Ok(()) => info!(
                records = self.summary.records,
                committed = self.summary.committed,
                skipped = self.summary.skipped,
                "Consumer loop stopped"
            ),
            Err(e) => error!(error = %e, "Consumer loop aborted"),
        }

        result.map(|()| self.summary)
    }

    async fn drive(&mut self, shutdown: &mut ShutdownSignal) -> Result<(), ConsumerError> {
        loop {
            if shutdown.is_triggered() {
                info!("Shutdown requested, leaving consumer loop");
                return Ok(());
            }

            let timeout = self.config.poll_timeout;
            let polled = tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    info!("Shutdown requested while waiting for records");
                    return Ok(());
                }
                polled = self.source.poll(timeout) => polled,
            };

            self.handle_poll(polled).await?;
        }
    }

    /// Run exactly one poll -> process -> commit iteration
    pub async fn step(&mut self) -> Result<StepOutcome, ConsumerError> {
        let polled = self.source.poll(self.config.poll_timeout).await;
        self.handle_poll(polled).await
    }

    async fn handle_poll(
        &mut self,
        polled: Result<Option<Record>, SourceError>,
    ) -> Result<StepOutcome, ConsumerError> {
        self.summary.polls += 1;

        let record = match polled {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.summary.empty_polls += 1;
                self.reset_poll_errors();
                if let Some(m) = &self.metrics {
                    m.empty_polls_total.inc();
                }
                return Ok(StepOutcome::Idle);
            }
            Err(e) => {
                self.summary.poll_errors += 1;
                self.consecutive_poll_errors += 1;
                if let Some(m) = &self.metrics {
                    m.poll_errors_total.inc();
                    m.consecutive_poll_errors
                        .set(i64::from(self.consecutive_poll_errors));
                }
                if e.is_fatal() {
                    error!("Unrecoverable consumer error: {}", e);
                    return Err(ConsumerError::Source(e));
                }
                error!(
                    consecutive_errors = self.consecutive_poll_errors,
                    "Consumer error: {}", e
                );
                return Ok(StepOutcome::PollError);
            }
        };

        self.reset_poll_errors();
        self.summary.records += 1;
        if let Some(m) = &self.metrics {
            m.records_polled_total.inc();
        }

        debug!(
            topic = record.topic(),
            partition = record.partition(),
            offset = record.offset(),
            "Received record"
        );

        let cursor = record.cursor();

        if let Err((attempts, e)) = self.process_with_policy(&record).await {
            if self.config.failure_policy.continues_after_failure() {
                warn!(
                    topic = %cursor.topic,
                    partition = cursor.partition,
                    offset = cursor.offset,
                    error = %e,
                    "Processing failed, skipping record without commit"
                );
                self.summary.skipped += 1;
                if let Some(m) = &self.metrics {
                    m.records_skipped_total.inc();
                }
                return Ok(StepOutcome::Skipped(cursor));
            }

            error!(
                topic = %cursor.topic,
                partition = cursor.partition,
                offset = cursor.offset,
                attempts,
                error = %e,
                "Processing failed, stopping without commit"
            );
            return Err(ConsumerError::Processing {
                topic: cursor.topic,
                partition: cursor.partition,
                offset: cursor.offset,
                attempts,
                source: e,
            });
        }

        self.summary.processed += 1;
        if let Some(m) = &self.metrics {
            m.records_processed_total.inc();
        }

        Ok(self.commit(cursor).await)
    }

    /// Run the processing step, retrying as the failure policy allows.
    /// On failure returns the number of attempts made and the last error.
    async fn process_with_policy(&self, record: &Record) -> Result<(), (u32, ProcessingError)> {
        let max_attempts = self.config.failure_policy.max_attempts();
        let backoff = self.config.failure_policy.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.processor.process(record).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if let Some(m) = &self.metrics {
                        m.processing_failures_total.inc();
                    }
                    if attempt >= max_attempts {
                        return Err((attempt, e));
                    }
                    warn!(
                        offset = record.offset(),
                        error = %e,
                        "Processing attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        backoff
                    );
                    if !backoff.is_zero() {
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }

    async fn commit(&mut self, cursor: Cursor) -> StepOutcome {
        if self.config.commit_strategy == CommitStrategy::Broker {
            return StepOutcome::Processed(cursor);
        }

        if !self.cursors.can_advance(&cursor) {
            debug!(cursor = %cursor, "Cursor already at or past record, not committing");
            return StepOutcome::AlreadyCommitted(cursor);
        }

        match self.source.commit(&cursor).await {
            Ok(()) => {
                self.cursors.advance(&cursor);
                self.summary.committed += 1;
                if let Some(m) = &self.metrics {
                    m.commits_total.inc();
                }
                info!(
                    topic = %cursor.topic,
                    partition = cursor.partition,
                    offset = cursor.offset,
                    "Message committed"
                );
                StepOutcome::Committed(cursor)
            }
            Err(e) => {
                self.summary.commit_failures += 1;
                if let Some(m) = &self.metrics {
                    m.commit_failures_total.inc();
                }
                warn!(
                    topic = %cursor.topic,
                    partition = cursor.partition,
                    offset = cursor.offset,
                    "Failed to commit offset: {}", e
                );
                StepOutcome::CommitFailed(cursor)
            }
        }
    }

    fn reset_poll_errors(&mut self) {
        if self.consecutive_poll_errors > 0 {
            self.consecutive_poll_errors = 0;
            if let Some(m) = &self.metrics {
                m.consecutive_poll_errors.set(0);
            }
        }
    }
}
