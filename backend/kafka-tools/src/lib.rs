//! Command-line programs around the commit-controlled consumer
//!
//! - `commit-consumer`: manual commits after a simulated store
//! - `reset-consumer`: throwaway group, shows where `auto.offset.reset` starts
//! - `group-consumer`: shared group reading from `latest`
//! - `line-producer`: sends stdin lines with a running key

pub mod cli;
pub mod logging;
pub mod processors;
pub mod producer;
pub mod runtime;
