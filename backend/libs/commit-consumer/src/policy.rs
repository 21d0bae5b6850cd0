use std::time::Duration;

/// What the loop does when the processing step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop without committing; the record is redelivered on restart
    #[default]
    Abort,
    /// Leave the record uncommitted and continue with the next one
    Skip,
    /// Re-run the step up to `max_attempts` times in total, then abort
    Retry {
        max_attempts: u32,
        backoff: Duration,
    },
}

impl FailurePolicy {
    /// Total number of times the step is run for one record
    pub fn max_attempts(&self) -> u32 {
        match self {
            FailurePolicy::Retry { max_attempts, .. } => (*max_attempts).max(1),
            FailurePolicy::Abort | FailurePolicy::Skip => 1,
        }
    }

    /// Pause between attempts
    pub fn backoff(&self) -> Duration {
        match self {
            FailurePolicy::Retry { backoff, .. } => *backoff,
            FailurePolicy::Abort | FailurePolicy::Skip => Duration::ZERO,
        }
    }

    /// Whether the loop keeps going once every attempt failed
    pub fn continues_after_failure(&self) -> bool {
        matches!(self, FailurePolicy::Skip)
    }
}

/// Who advances the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitStrategy {
    /// The loop commits each record after processing it
    #[default]
    Manual,
    /// The broker client auto-commits in the background; the loop never commits
    Broker,
}

/// Consumer loop settings
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Bounded wait for each poll
    pub poll_timeout: Duration,
    pub failure_policy: FailurePolicy,
    pub commit_strategy: CommitStrategy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            failure_policy: FailurePolicy::default(),
            commit_strategy: CommitStrategy::default(),
        }
    }
}
