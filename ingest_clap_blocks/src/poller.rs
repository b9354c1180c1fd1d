//! CLI config for the shard stream poller.

use std::time::Duration;

use ingest_poller::{PollerConfig, ProcessingErrorPolicy};
use ingest_types::{MaxMessages, ResetPolicy};

/// What to do when processing a message fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ErrorPolicyKind {
    /// Stop ingesting the shard.
    #[default]
    Halt,

    /// Drop the message and carry on. This loses data.
    Skip,

    /// Retry the message, then halt if it still fails.
    Retry,
}

/// CLI config for the shard stream poller.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct PollerCliConfig {
    /// Maximum number of messages returned by a single shard read.
    ///
    /// 0 means no limit.
    #[clap(
        long = "max-messages",
        env = "INGEST_POLLER_MAX_MESSAGES",
        default_value = "0",
        action
    )]
    pub max_messages: usize,

    /// How long a single shard read waits for new messages.
    #[clap(
        long = "read-timeout",
        env = "INGEST_POLLER_READ_TIMEOUT",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub read_timeout: Duration,

    /// Where to start reading the shard: "none" resumes from the
    /// checkpoint, "earliest" replays everything retained, "latest" skips
    /// the existing backlog.
    #[clap(
        long = "reset-policy",
        env = "INGEST_POLLER_RESET_POLICY",
        default_value = "none",
        action
    )]
    pub reset_policy: ResetPolicy,

    /// What to do when processing a message fails.
    #[clap(
        long = "processing-error-policy",
        env = "INGEST_POLLER_PROCESSING_ERROR_POLICY",
        default_value_t = ErrorPolicyKind::default(),
        value_enum,
        action
    )]
    pub error_policy: ErrorPolicyKind,

    /// Number of additional attempts for a failed message under the "retry"
    /// processing error policy.
    #[clap(
        long = "processing-max-retries",
        env = "INGEST_POLLER_PROCESSING_MAX_RETRIES",
        default_value = "3",
        action
    )]
    pub max_retries: usize,

    /// Sleep between attempts under the "retry" processing error policy.
    #[clap(
        long = "processing-retry-backoff",
        env = "INGEST_POLLER_PROCESSING_RETRY_BACKOFF",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub retry_backoff: Duration,

    /// Sleep before retrying a shard read that failed.
    #[clap(
        long = "consumer-error-backoff",
        env = "INGEST_POLLER_CONSUMER_ERROR_BACKOFF",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub consumer_error_backoff: Duration,
}

impl PollerCliConfig {
    pub fn poller_config(&self) -> PollerConfig {
        let error_policy = match self.error_policy {
            ErrorPolicyKind::Halt => ProcessingErrorPolicy::Halt,
            ErrorPolicyKind::Skip => ProcessingErrorPolicy::Skip,
            ErrorPolicyKind::Retry => ProcessingErrorPolicy::Retry {
                max_retries: self.max_retries,
                backoff: self.retry_backoff,
            },
        };

        PollerConfig::default()
            .with_max_messages(MaxMessages::from_count(self.max_messages))
            .with_read_timeout(self.read_timeout)
            .with_reset_policy(self.reset_policy)
            .with_error_policy(error_policy)
            .with_consumer_error_backoff(self.consumer_error_backoff)
    }
}
