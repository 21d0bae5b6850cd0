//! Kafka-backed record source

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::{ClientContext, Offset};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::SourceConfig;
use crate::error::{ConsumerError, SourceError};
use crate::record::{Cursor, Record};
use crate::source::RecordSource;

/// Partitions currently assigned to this consumer instance.
///
/// The broker owns group membership; this only mirrors what the rebalance
/// callbacks report.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    assigned: BTreeSet<(String, i32)>,
    rebalance_count: u64,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add granted partitions. Returns the ones that were not held before.
    pub fn assign<I>(&mut self, partitions: I) -> Vec<(String, i32)>
    where
        I: IntoIterator<Item = (String, i32)>,
    {
        self.rebalance_count += 1;
        partitions
            .into_iter()
            .filter(|tp| self.assigned.insert(tp.clone()))
            .collect()
    }

    /// Drop revoked partitions. Returns the ones that were actually held.
    pub fn revoke<I>(&mut self, partitions: I) -> Vec<(String, i32)>
    where
        I: IntoIterator<Item = (String, i32)>,
    {
        self.rebalance_count += 1;
        partitions
            .into_iter()
            .filter(|tp| self.assigned.remove(tp))
            .collect()
    }

    pub fn partitions(&self) -> Vec<(String, i32)> {
        self.assigned.iter().cloned().collect()
    }

    pub fn is_assigned(&self, topic: &str, partition: i32) -> bool {
        self.assigned.contains(&(topic.to_string(), partition))
    }

    /// Assign and revoke callbacks seen so far
    pub fn rebalance_count(&self) -> u64 {
        self.rebalance_count
    }
}

fn partitions_of(tpl: &TopicPartitionList) -> Vec<(String, i32)> {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

/// Consumer context that logs every assignment and revocation.
///
/// Rebalance callbacks run on the client's thread while `recv()` is
/// driven, so the assignment sits behind a mutex.
pub struct AssignmentContext {
    group_id: String,
    assignment: Mutex<Assignment>,
}

impl AssignmentContext {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            assignment: Mutex::new(Assignment::new()),
        }
    }

    /// Snapshot of the current assignment
    pub fn assignment(&self) -> Assignment {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Assignment> {
        self.assignment.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClientContext for AssignmentContext {}

impl ConsumerContext for AssignmentContext {
    fn post_rebalance<'a>(&self, rebalance: &Rebalance<'a>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let mut assignment = self.lock();
                let granted = assignment.assign(partitions_of(tpl));
                info!(
                    group_id = %self.group_id,
                    assigned = ?granted,
                    partitions = ?assignment.partitions(),
                    rebalances = assignment.rebalance_count(),
                    "Partitions assigned"
                );
            }
            Rebalance::Revoke(tpl) => {
                let mut assignment = self.lock();
                let revoked = assignment.revoke(partitions_of(tpl));
                info!(
                    group_id = %self.group_id,
                    revoked = ?revoked,
                    partitions = ?assignment.partitions(),
                    rebalances = assignment.rebalance_count(),
                    "Partitions revoked"
                );
            }
            Rebalance::Error(e) => {
                warn!(group_id = %self.group_id, error = %e, "Rebalance error");
            }
        }
    }
}

type ContextConsumer = StreamConsumer<AssignmentContext>;

/// Record source over an rdkafka `StreamConsumer` with manual commits
pub struct KafkaSource {
    consumer: Option<Arc<ContextConsumer>>,
    group_id: String,
}

impl KafkaSource {
    /// Create the consumer and subscribe to the configured topics
    pub fn connect(config: &SourceConfig) -> Result<Self, ConsumerError> {
        config.validate()?;

        info!(
            brokers = %config.settings.brokers,
            group_id = %config.group_id,
            topics = ?config.topics,
            offset_reset = %config.offset_reset,
            commit_strategy = ?config.commit_strategy,
            "Creating Kafka consumer"
        );

        let context = AssignmentContext::new(config.group_id.clone());
        let consumer: ContextConsumer = config
            .to_client_config()
            .create_with_context(context)
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                ConsumerError::Setup(SourceError::Kafka(e))
            })?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics).map_err(|e| {
            error!("Failed to subscribe to topics: {}", e);
            ConsumerError::Setup(SourceError::Kafka(e))
        })?;

        info!(group_id = %config.group_id, topics = ?config.topics, "Kafka consumer subscribed");

        Ok(Self {
            consumer: Some(Arc::new(consumer)),
            group_id: config.group_id.clone(),
        })
    }

    /// Partitions held according to the latest rebalance callbacks
    pub fn assignment(&self) -> Assignment {
        self.consumer
            .as_ref()
            .map(|consumer| consumer.context().assignment())
            .unwrap_or_default()
    }

    fn consumer(&self) -> Result<&Arc<ContextConsumer>, SourceError> {
        self.consumer.as_ref().ok_or(SourceError::Closed)
    }
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<Record>, SourceError> {
        let consumer = self.consumer()?;

        match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(message)) => Ok(Some(Record::from_message(&message))),
            Ok(Err(e)) => Err(SourceError::Kafka(e)),
        }
    }

    async fn commit(&mut self, cursor: &Cursor) -> Result<(), SourceError> {
        let consumer = Arc::clone(self.consumer()?);

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &cursor.topic,
            cursor.partition,
            Offset::Offset(cursor.next_offset()),
        )?;

        // Sync commit waits for the broker; keep it off the async workers
        tokio::task::spawn_blocking(move || consumer.commit(&tpl, CommitMode::Sync)).await??;

        debug!(
            topic = %cursor.topic,
            partition = cursor.partition,
            offset = cursor.offset,
            "Committed offset"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            info!(group_id = %self.group_id, "Kafka consumer closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaSettings;
    use rdkafka::error::KafkaError;

    fn tpl(partitions: &[(&str, i32)]) -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        for (topic, partition) in partitions {
            tpl.add_partition(topic, *partition);
        }
        tpl
    }

    #[test]
    fn test_first_assignment_grants_everything() {
        let mut assignment = Assignment::new();
        let granted = assignment.assign(vec![("orders".into(), 0), ("orders".into(), 1)]);

        assert_eq!(granted.len(), 2);
        assert!(assignment.is_assigned("orders", 1));
        assert_eq!(assignment.rebalance_count(), 1);
    }

    #[test]
    fn test_revoke_only_reports_held_partitions() {
        let mut assignment = Assignment::new();
        assignment.assign(vec![("orders".into(), 0)]);
        let revoked = assignment.revoke(vec![("orders".into(), 0), ("orders".into(), 5)]);

        assert_eq!(revoked, vec![("orders".to_string(), 0)]);
        assert!(assignment.partitions().is_empty());
        assert_eq!(assignment.rebalance_count(), 2);
    }

    #[test]
    fn test_context_tracks_revoke_then_reassign_of_same_partition() {
        let context = AssignmentContext::new("g1");
        let orders = tpl(&[("orders", 0)]);

        context.post_rebalance(&Rebalance::Assign(&orders));
        context.post_rebalance(&Rebalance::Revoke(&orders));
        assert!(!context.assignment().is_assigned("orders", 0));

        context.post_rebalance(&Rebalance::Assign(&orders));
        let assignment = context.assignment();
        assert!(assignment.is_assigned("orders", 0));
        assert_eq!(assignment.rebalance_count(), 3);
    }

    #[test]
    fn test_context_incremental_assign_keeps_existing_partitions() {
        let context = AssignmentContext::new("g1");

        context.post_rebalance(&Rebalance::Assign(&tpl(&[("orders", 0), ("orders", 1)])));
        context.post_rebalance(&Rebalance::Revoke(&tpl(&[("orders", 0)])));
        context.post_rebalance(&Rebalance::Assign(&tpl(&[("orders", 2)])));

        assert_eq!(
            context.assignment().partitions(),
            vec![("orders".to_string(), 1), ("orders".to_string(), 2)]
        );
    }

    #[test]
    fn test_context_rebalance_error_leaves_assignment_alone() {
        let context = AssignmentContext::new("g1");
        context.post_rebalance(&Rebalance::Assign(&tpl(&[("orders", 0)])));

        let error = KafkaError::Rebalance(rdkafka::types::RDKafkaErrorCode::Fail);
        context.post_rebalance(&Rebalance::Error(error));

        let assignment = context.assignment();
        assert!(assignment.is_assigned("orders", 0));
        assert_eq!(assignment.rebalance_count(), 1);
    }

    #[test]
    fn test_connect_rejects_invalid_config_before_creating_client() {
        let config = SourceConfig::new(KafkaSettings::default(), "", vec!["orders".into()]);
        let err = KafkaSource::connect(&config).err().unwrap();
        assert!(matches!(err, ConsumerError::Config(_)));
    }
}
