//! Prometheus metrics for the consumer loop

use prometheus::{IntCounter, IntGauge, Registry};

/// Counters updated by the consumer loop
#[derive(Clone)]
pub struct ConsumerMetrics {
    /// Records returned by the source
    pub records_polled_total: IntCounter,
    /// Polls that returned nothing within the bounded wait
    pub empty_polls_total: IntCounter,
    /// Broker errors returned by poll
    pub poll_errors_total: IntCounter,
    /// Current run of consecutive poll errors (resets on a successful poll)
    pub consecutive_poll_errors: IntGauge,
    /// Records whose processing step completed
    pub records_processed_total: IntCounter,
    /// Failed processing attempts, including retried ones
    pub processing_failures_total: IntCounter,
    /// Records left uncommitted under the skip policy
    pub records_skipped_total: IntCounter,
    /// Cursors committed to the broker
    pub commits_total: IntCounter,
    /// Commits rejected by the broker
    pub commit_failures_total: IntCounter,
}

impl ConsumerMetrics {
    /// Create the metrics and register them into `registry`
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let metrics = Self {
            records_polled_total: IntCounter::new(
                "commit_consumer_records_polled_total",
                "Total number of records returned by the source",
            )?,
            empty_polls_total: IntCounter::new(
                "commit_consumer_empty_polls_total",
                "Total number of polls that returned no record",
            )?,
            poll_errors_total: IntCounter::new(
                "commit_consumer_poll_errors_total",
                "Total number of broker errors returned by poll",
            )?,
            consecutive_poll_errors: IntGauge::new(
                "commit_consumer_consecutive_poll_errors",
                "Current number of consecutive poll errors",
            )?,
            records_processed_total: IntCounter::new(
                "commit_consumer_records_processed_total",
                "Total number of records processed successfully",
            )?,
            processing_failures_total: IntCounter::new(
                "commit_consumer_processing_failures_total",
                "Total number of failed processing attempts",
            )?,
            records_skipped_total: IntCounter::new(
                "commit_consumer_records_skipped_total",
                "Total number of records left uncommitted after failed processing",
            )?,
            commits_total: IntCounter::new(
                "commit_consumer_commits_total",
                "Total number of cursors committed",
            )?,
            commit_failures_total: IntCounter::new(
                "commit_consumer_commit_failures_total",
                "Total number of commits rejected by the broker",
            )?,
        };

        for collector in [
            Box::new(metrics.records_polled_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(metrics.empty_polls_total.clone()),
            Box::new(metrics.poll_errors_total.clone()),
            Box::new(metrics.consecutive_poll_errors.clone()),
            Box::new(metrics.records_processed_total.clone()),
            Box::new(metrics.processing_failures_total.clone()),
            Box::new(metrics.records_skipped_total.clone()),
            Box::new(metrics.commits_total.clone()),
            Box::new(metrics.commit_failures_total.clone()),
        ] {
            registry.register(collector)?;
        }

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once_per_registry() {
        let registry = Registry::new();
        let metrics = ConsumerMetrics::new(&registry).unwrap();
        metrics.commits_total.inc();

        let families = registry.gather();
        assert_eq!(families.len(), 9);
        assert!(families
            .iter()
            .any(|f| f.get_name() == "commit_consumer_commits_total"));

        // Same names cannot be registered twice
        assert!(ConsumerMetrics::new(&registry).is_err());
    }
}
