use std::time::Duration;

use ingest_types::{MaxMessages, ResetPolicy};

/// Default bound on how long a single shard read blocks.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default sleep between retries of a failed (non-timeout) shard read.
pub const DEFAULT_CONSUMER_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What a [`StreamPoller`] does when the message processor returns an error.
///
/// [`StreamPoller`]: crate::StreamPoller
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ProcessingErrorPolicy {
    /// Stop consuming the shard, leaving the cursor at the failed message.
    #[default]
    Halt,

    /// Drop the message and continue with the next one.
    ///
    /// This loses data.
    Skip,

    /// Re-submit the message up to `max_retries` more times, sleeping
    /// `backoff` between attempts, then [`ProcessingErrorPolicy::Halt`].
    Retry {
        max_retries: usize,
        backoff: Duration,
    },
}

/// Tunables of a [`StreamPoller`].
///
/// [`StreamPoller`]: crate::StreamPoller
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Upper bound on the size of each read batch.
    pub max_messages: MaxMessages,

    /// How long a read blocks waiting for messages before giving up and
    /// trying again.
    pub read_timeout: Duration,

    /// Where the poller starts reading.
    pub reset_policy: ResetPolicy,

    pub error_policy: ProcessingErrorPolicy,

    /// Sleep between retries of a shard read that failed with anything other
    /// than a timeout.
    pub consumer_error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_messages: MaxMessages::Unlimited,
            read_timeout: DEFAULT_READ_TIMEOUT,
            reset_policy: ResetPolicy::None,
            error_policy: ProcessingErrorPolicy::Halt,
            consumer_error_backoff: DEFAULT_CONSUMER_ERROR_BACKOFF,
        }
    }
}

impl PollerConfig {
    pub fn with_max_messages(mut self, max_messages: MaxMessages) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_reset_policy(mut self, reset_policy: ResetPolicy) -> Self {
        self.reset_policy = reset_policy;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ProcessingErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn with_consumer_error_backoff(mut self, backoff: Duration) -> Self {
        self.consumer_error_backoff = backoff;
        self
    }
}
