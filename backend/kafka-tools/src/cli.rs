//! Positional arguments for each program

use clap::Parser;
use commit_consumer::OffsetReset;

/// Consume with manual commits, storing each record before committing it
#[derive(Parser, Debug)]
#[command(name = "commit-consumer", version, about)]
pub struct CommitConsumerArgs {
    /// Topic to consume
    pub topic: String,

    /// Consumer group id
    pub group_id: String,
}

/// Consume with a fresh random group to show where the offset reset starts
#[derive(Parser, Debug)]
#[command(name = "reset-consumer", version, about)]
pub struct ResetConsumerArgs {
    /// Topic to consume
    pub topic: String,

    /// `earliest` or `latest`
    pub offset_reset: OffsetReset,
}

/// Consume as a member of a shared group, starting from the latest offset
#[derive(Parser, Debug)]
#[command(name = "group-consumer", version, about)]
pub struct GroupConsumerArgs {
    /// Topic to consume
    pub topic: String,

    /// Consumer group to join
    pub consumer_group: String,
}

/// Send each line read from stdin as one message
#[derive(Parser, Debug)]
#[command(name = "line-producer", version, about)]
pub struct LineProducerArgs {
    /// Topic to produce to
    pub topic: String,
}
