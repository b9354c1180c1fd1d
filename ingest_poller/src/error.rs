use std::error::Error;

use ingest_consumer::ConsumerError;
use ingest_types::{ResetPolicy, ShardId};
use thiserror::Error;

/// Errors returned by a [`StreamPoller`].
///
/// [`StreamPoller`]: crate::StreamPoller
#[derive(Debug, Error)]
pub enum PollerError {
    /// A poll was requested before [`StreamPoller::start()`] was called.
    ///
    /// [`StreamPoller::start()`]: crate::StreamPoller::start()
    #[error("poller is not started")]
    NotStarted,

    /// The poller was closed, or halted after a processing failure.
    #[error("poller is closed")]
    Closed,

    #[error("poller is already started")]
    AlreadyStarted,

    /// The start pointer could not be resolved from the shard.
    #[error("failed to resolve {policy} start pointer for shard {shard_id}: {source}")]
    ResolveStart {
        policy: ResetPolicy,
        shard_id: ShardId,
        source: ConsumerError,
    },

    /// A non-timeout error reading from the shard.
    #[error("failed to read shard {shard_id} at pointer {pointer}: {source}")]
    Consumer {
        shard_id: ShardId,
        pointer: String,
        source: ConsumerError,
    },

    /// The message processor failed and the error policy gave up on it.
    #[error("failed to process message at pointer {pointer} of shard {shard_id}: {source}")]
    Processing {
        shard_id: ShardId,
        pointer: String,
        source: Box<dyn Error + Send + Sync>,
    },

    /// A message was read at the last position the shard can hold.
    #[error("shard {shard_id} has no position after pointer {pointer}")]
    EndOfShard { shard_id: ShardId, pointer: String },
}

impl PollerError {
    /// Returns the consumer error that caused this error, if any.
    pub fn consumer_error(&self) -> Option<&ConsumerError> {
        match self {
            Self::ResolveStart { source, .. } | Self::Consumer { source, .. } => Some(source),
            _ => None,
        }
    }
}
