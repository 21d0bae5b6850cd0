//! Integration tests for the commit-controlled consumer loop
//!
//! These tests verify:
//! 1. Commits happen strictly after processing, in offset order
//! 2. Empty polls and broker errors never commit or stop the loop
//! 3. Each failure policy (abort, skip, retry) behaves consistently
//! 4. Shutdown lets the in-flight record commit, then stops polling
//! 5. The source is closed on every exit path
//!
//! The loop runs against an in-memory scripted source, so no broker is
//! needed. Broker-backed tests live in `kafka_test.rs`.

use async_trait::async_trait;
use commit_consumer::shutdown::{self, ShutdownTrigger};
use commit_consumer::{
    CommitStrategy, ConsumerError, ConsumerLoop, ConsumerMetrics, Cursor, FailurePolicy,
    LoopConfig, ProcessingError, Record, RecordProcessor, RecordSource, SourceError,
    StepOutcome,
};
use mockall::{mock, Sequence};
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Processed(i64),
    Failed(i64),
    Committed(i64),
}

type EventLog = Arc<Mutex<Vec<Event>>>;

fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

fn committed(log: &EventLog) -> Vec<i64> {
    events(log)
        .into_iter()
        .filter_map(|e| match e {
            Event::Committed(offset) => Some(offset),
            _ => None,
        })
        .collect()
}

enum Polled {
    Record(Record),
    Empty,
    Error(RDKafkaErrorCode),
    Fatal,
}

fn record(offset: i64) -> Polled {
    Polled::Record(Record::new(
        "orders",
        0,
        offset,
        Some(offset.to_string().into_bytes()),
        format!("order-{}", offset).into_bytes(),
    ))
}

/// Plays back a fixed script, then requests shutdown
struct ScriptedSource {
    script: VecDeque<Polled>,
    log: EventLog,
    when_exhausted: ShutdownTrigger,
    reject_commit: Option<i64>,
    closed: Arc<AtomicBool>,
}

impl ScriptedSource {
    fn new(script: Vec<Polled>, log: EventLog, when_exhausted: ShutdownTrigger) -> Self {
        Self {
            script: script.into(),
            log,
            when_exhausted,
            reject_commit: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn reject_commit_of(mut self, offset: i64) -> Self {
        self.reject_commit = Some(offset);
        self
    }
}

#[async_trait]
impl RecordSource for ScriptedSource {
    async fn poll(&mut self, _timeout: Duration) -> Result<Option<Record>, SourceError> {
        match self.script.pop_front() {
            Some(Polled::Record(record)) => Ok(Some(record)),
            Some(Polled::Empty) => Ok(None),
            Some(Polled::Error(code)) => {
                Err(SourceError::Kafka(KafkaError::MessageConsumption(code)))
            }
            Some(Polled::Fatal) => Err(SourceError::Kafka(KafkaError::MessageConsumptionFatal(
                RDKafkaErrorCode::Fatal,
            ))),
            None => {
                self.when_exhausted.trigger();
                Ok(None)
            }
        }
    }

    async fn commit(&mut self, cursor: &Cursor) -> Result<(), SourceError> {
        if self.reject_commit == Some(cursor.offset) {
            return Err(SourceError::Kafka(KafkaError::ConsumerCommit(
                RDKafkaErrorCode::RebalanceInProgress,
            )));
        }
        self.log.lock().unwrap().push(Event::Committed(cursor.offset));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every call; fails the configured offsets a given number of times
struct RecordingProcessor {
    log: EventLog,
    failures: Mutex<HashMap<i64, u32>>,
    shutdown_on: Option<(i64, ShutdownTrigger)>,
}

impl RecordingProcessor {
    fn new(log: EventLog) -> Self {
        Self {
            log,
            failures: Mutex::new(HashMap::new()),
            shutdown_on: None,
        }
    }

    fn failing(self, offset: i64, times: u32) -> Self {
        self.failures.lock().unwrap().insert(offset, times);
        self
    }

    fn shutdown_while_processing(mut self, offset: i64, trigger: ShutdownTrigger) -> Self {
        self.shutdown_on = Some((offset, trigger));
        self
    }
}

#[async_trait]
impl RecordProcessor for RecordingProcessor {
    async fn process(&self, record: &Record) -> Result<(), ProcessingError> {
        if let Some((offset, trigger)) = &self.shutdown_on {
            if *offset == record.offset() {
                trigger.trigger();
            }
        }

        tokio::task::yield_now().await;

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&record.offset()) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        if should_fail {
            self.log.lock().unwrap().push(Event::Failed(record.offset()));
            return Err(ProcessingError::new("store unavailable"));
        }

        self.log
            .lock()
            .unwrap()
            .push(Event::Processed(record.offset()));
        Ok(())
    }
}

fn loop_config(failure_policy: FailurePolicy) -> LoopConfig {
    LoopConfig {
        poll_timeout: Duration::from_millis(10),
        failure_policy,
        commit_strategy: CommitStrategy::Manual,
    }
}

/// Test: orders/g1/earliest, offsets 10, 11, 12, no-op processing
#[tokio::test]
async fn test_commits_follow_processing_in_offset_order() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );
    let closed = source.closed.clone();

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .expect("loop should stop cleanly");

    assert_eq!(
        events(&log),
        vec![
            Event::Processed(10),
            Event::Committed(10),
            Event::Processed(11),
            Event::Committed(11),
            Event::Processed(12),
            Event::Committed(12),
        ]
    );
    assert_eq!(summary.records, 3);
    assert_eq!(summary.committed, 3);
    assert!(closed.load(Ordering::SeqCst));
}

/// Test: empty polls neither commit nor stop the loop
#[tokio::test]
async fn test_empty_polls_do_not_commit_or_terminate() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![Polled::Empty, Polled::Empty, Polled::Empty, record(0)],
        log.clone(),
        trigger,
    );

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .unwrap();

    // The record after the empty polls is still reached
    assert_eq!(committed(&log), vec![0]);
    // Three scripted empty polls plus the one that ends the script
    assert_eq!(summary.empty_polls, 4);
}

/// Test: broker errors are logged and the loop keeps going
#[tokio::test]
async fn test_poll_errors_are_not_fatal() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![
            Polled::Error(RDKafkaErrorCode::BrokerTransportFailure),
            record(10),
            Polled::Error(RDKafkaErrorCode::UnknownPartition),
            record(11),
        ],
        log.clone(),
        trigger,
    );

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .unwrap();

    assert_eq!(committed(&log), vec![10, 11]);
    assert_eq!(summary.poll_errors, 2);
}

/// Test: a fatal client error ends the loop and still closes the source
#[tokio::test]
async fn test_fatal_poll_error_stops_loop() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), Polled::Fatal, record(11)],
        log.clone(),
        trigger,
    );
    let closed = source.closed.clone();

    let err = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .unwrap_err();

    assert!(matches!(err, ConsumerError::Source(_)));
    assert_eq!(committed(&log), vec![10]);
    assert!(closed.load(Ordering::SeqCst));
}

/// Test: skip policy leaves the failed offset uncommitted and moves on
#[tokio::test]
async fn test_skip_policy_leaves_gap() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(11, 1),
        loop_config(FailurePolicy::Skip),
    )
    .run(signal)
    .await
    .unwrap();

    assert_eq!(committed(&log), vec![10, 12]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.processed, 2);
}

/// Test: abort policy stops on the failed record without committing it
#[tokio::test]
async fn test_abort_policy_stops_without_commit() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );
    let closed = source.closed.clone();

    let err = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(11, 1),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .unwrap_err();

    assert_eq!(err.failed_offset(), Some(11));
    assert_eq!(
        events(&log),
        vec![Event::Processed(10), Event::Committed(10), Event::Failed(11)]
    );
    assert!(closed.load(Ordering::SeqCst));
}

/// Test: a transient failure is retried and then committed
#[tokio::test(start_paused = true)]
async fn test_retry_policy_recovers_transient_failure() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(11, 2),
        loop_config(FailurePolicy::Retry {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }),
    )
    .run(signal)
    .await
    .unwrap();

    assert_eq!(committed(&log), vec![10, 11, 12]);
    assert_eq!(
        events(&log)[2..5],
        [Event::Failed(11), Event::Failed(11), Event::Processed(11)]
    );
    assert_eq!(summary.skipped, 0);
}

/// Test: retries are bounded; the loop aborts once they are used up
#[tokio::test(start_paused = true)]
async fn test_retry_policy_aborts_after_last_attempt() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );

    let err = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(11, 10),
        loop_config(FailurePolicy::Retry {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }),
    )
    .run(signal)
    .await
    .unwrap_err();

    match err {
        ConsumerError::Processing {
            offset, attempts, ..
        } => {
            assert_eq!(offset, 11);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    let failures = events(&log)
        .iter()
        .filter(|e| **e == Event::Failed(11))
        .count();
    assert_eq!(failures, 3);
    assert_eq!(committed(&log), vec![10]);
}

/// Test: shutdown during processing lets that record commit, then stops
#[tokio::test]
async fn test_shutdown_commits_in_flight_record_then_stops() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let processor =
        RecordingProcessor::new(log.clone()).shutdown_while_processing(10, trigger.clone());
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );

    let summary = ConsumerLoop::new(source, processor, loop_config(FailurePolicy::Abort))
        .run(signal)
        .await
        .unwrap();

    assert_eq!(events(&log), vec![Event::Processed(10), Event::Committed(10)]);
    assert_eq!(summary.records, 1);
}

/// Never returns a record; every poll waits the full timeout
struct IdleSource {
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl RecordSource for IdleSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Record>, SourceError> {
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn commit(&mut self, _cursor: &Cursor) -> Result<(), SourceError> {
        panic!("idle source never delivers a record to commit");
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Test: shutdown interrupts the bounded wait instead of waiting it out
#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_idle_poll() {
    let closed = Arc::new(AtomicBool::new(false));
    let source = IdleSource {
        closed: closed.clone(),
    };
    let (trigger, signal) = shutdown::channel();
    let config = LoopConfig {
        poll_timeout: Duration::from_secs(30),
        ..LoopConfig::default()
    };
    let log = EventLog::default();

    let started = tokio::time::Instant::now();
    let handle = tokio::spawn(
        ConsumerLoop::new(source, RecordingProcessor::new(log), config).run(signal),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    trigger.trigger();

    let summary = handle.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_secs(30));
    assert_eq!(summary.records, 0);
    assert!(closed.load(Ordering::SeqCst));
}

/// Test: with broker auto-commit the loop processes but never commits
#[tokio::test]
async fn test_broker_strategy_never_commits() {
    let log = EventLog::default();
    let (trigger, _signal) = shutdown::channel();
    let source = ScriptedSource::new(vec![record(1), record(2)], log.clone(), trigger);
    let config = LoopConfig {
        commit_strategy: CommitStrategy::Broker,
        ..loop_config(FailurePolicy::Skip)
    };
    let mut consumer = ConsumerLoop::new(source, RecordingProcessor::new(log.clone()), config);

    assert!(matches!(
        consumer.step().await.unwrap(),
        StepOutcome::Processed(Cursor { offset: 1, .. })
    ));
    assert!(matches!(
        consumer.step().await.unwrap(),
        StepOutcome::Processed(Cursor { offset: 2, .. })
    ));
    assert!(committed(&log).is_empty());
    assert!(consumer.cursors().is_empty());
}

/// Test: a rejected commit is reported and the loop continues
#[tokio::test]
async fn test_commit_failure_does_not_stop_loop() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    )
    .reject_commit_of(11);

    let summary = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    )
    .run(signal)
    .await
    .unwrap();

    assert_eq!(committed(&log), vec![10, 12]);
    assert_eq!(summary.commit_failures, 1);
    assert_eq!(summary.processed, 3);
}

/// Test: a redelivered record is processed again but never moves the cursor back
#[tokio::test]
async fn test_redelivered_record_does_not_regress_cursor() {
    let log = EventLog::default();
    let (trigger, _signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(10)],
        log.clone(),
        trigger,
    );
    let mut consumer = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    );

    consumer.step().await.unwrap();
    consumer.step().await.unwrap();
    let outcome = consumer.step().await.unwrap();

    assert!(matches!(
        outcome,
        StepOutcome::AlreadyCommitted(Cursor { offset: 10, .. })
    ));
    assert_eq!(committed(&log), vec![10, 11]);
    assert_eq!(consumer.cursors().get("orders", 0), Some(11));
}

/// Test: step() reports idle and error polls without touching cursors
#[tokio::test]
async fn test_step_outcomes_for_idle_and_error_polls() {
    let log = EventLog::default();
    let (trigger, _signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![
            Polled::Empty,
            Polled::Error(RDKafkaErrorCode::BrokerTransportFailure),
        ],
        log.clone(),
        trigger,
    );
    let mut consumer = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()),
        loop_config(FailurePolicy::Abort),
    );

    assert_eq!(consumer.step().await.unwrap(), StepOutcome::Idle);
    assert_eq!(consumer.step().await.unwrap(), StepOutcome::PollError);
    assert!(consumer.cursors().is_empty());
    assert!(events(&log).is_empty());
}

mock! {
    pub Processor {}

    #[async_trait]
    impl RecordProcessor for Processor {
        async fn process(&self, record: &Record) -> Result<(), ProcessingError>;
    }
}

/// Test: the processor sees each record exactly once, in order
#[tokio::test]
async fn test_processor_called_once_per_record_in_order() {
    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );

    let mut processor = MockProcessor::new();
    let mut seq = Sequence::new();
    for offset in [10, 11, 12] {
        processor
            .expect_process()
            .withf(move |r| r.offset() == offset && r.topic() == "orders")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
    }

    let summary = ConsumerLoop::new(source, processor, loop_config(FailurePolicy::Abort))
        .run(signal)
        .await
        .unwrap();

    assert_eq!(summary.committed, 3);
    assert_eq!(committed(&log), vec![10, 11, 12]);
}

/// Test: metrics mirror what the loop did
#[tokio::test]
async fn test_metrics_track_loop_activity() {
    let registry = prometheus::Registry::new();
    let metrics = ConsumerMetrics::new(&registry).unwrap();

    let log = EventLog::default();
    let (trigger, signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![
            record(10),
            Polled::Empty,
            Polled::Error(RDKafkaErrorCode::BrokerTransportFailure),
            record(11),
            record(12),
        ],
        log.clone(),
        trigger,
    );

    ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(11, 1),
        loop_config(FailurePolicy::Skip),
    )
    .with_metrics(metrics.clone())
    .run(signal)
    .await
    .unwrap();

    assert_eq!(metrics.records_polled_total.get(), 3);
    assert_eq!(metrics.records_processed_total.get(), 2);
    assert_eq!(metrics.processing_failures_total.get(), 1);
    assert_eq!(metrics.records_skipped_total.get(), 1);
    assert_eq!(metrics.commits_total.get(), 2);
    assert_eq!(metrics.poll_errors_total.get(), 1);
    assert_eq!(metrics.consecutive_poll_errors.get(), 0);
}

/// Test: an abort during step() surfaces the error and commits nothing
#[tokio::test]
async fn test_step_abort_commits_nothing() {
    let log = EventLog::default();
    let (trigger, _signal) = shutdown::channel();
    let source = ScriptedSource::new(
        vec![record(10), record(11), record(12)],
        log.clone(),
        trigger,
    );
    let mut consumer = ConsumerLoop::new(
        source,
        RecordingProcessor::new(log.clone()).failing(10, 1),
        loop_config(FailurePolicy::Abort),
    );

    let err = consumer.step().await.unwrap_err();

    assert_eq!(err.failed_offset(), Some(10));
    assert!(committed(&log).is_empty());
    assert!(consumer.cursors().is_empty());
    assert_eq!(consumer.summary().records, 1);
}
