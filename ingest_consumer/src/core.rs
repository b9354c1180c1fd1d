use std::{
    error::Error,
    fmt::{Debug, Display},
    time::Duration,
};

use async_trait::async_trait;
use ingest_types::{MaxMessages, ReadResult, ShardId, ShardPointer};

/// Classification of a [`ConsumerError`], used by readers to decide how to
/// react to a failed shard read.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsumerErrorKind {
    /// No batch could be assembled before the read deadline elapsed.
    ///
    /// This is the steady state of a caught-up reader and is not a failure.
    Timeout,

    /// The consumer was released and can no longer be read from.
    Closed,

    /// The requested pointer is outside of the retained range of the shard.
    PointerOutOfRange,

    /// A message could not be decoded from the shard.
    InvalidData,

    /// A transient I/O error talking to the log.
    Io,

    /// Anything else.
    Unknown,
}

/// Generic error returned by [`ShardConsumer`] implementations.
#[derive(Debug)]
pub struct ConsumerError {
    inner: Box<dyn Error + Sync + Send>,
    kind: ConsumerErrorKind,
}

impl ConsumerError {
    pub fn new(kind: ConsumerErrorKind, e: impl Into<Box<dyn Error + Sync + Send>>) -> Self {
        Self {
            inner: e.into(),
            kind,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ConsumerErrorKind::Timeout,
            format!("no messages available after {}ms", after.as_millis()),
        )
    }

    pub fn closed() -> Self {
        Self::new(ConsumerErrorKind::Closed, "shard consumer is closed")
    }

    pub fn invalid_data(e: impl Into<Box<dyn Error + Sync + Send>>) -> Self {
        Self::new(ConsumerErrorKind::InvalidData, e)
    }

    pub fn io(e: impl Into<Box<dyn Error + Sync + Send>>) -> Self {
        Self::new(ConsumerErrorKind::Io, e)
    }

    pub fn unknown(e: impl Into<Box<dyn Error + Sync + Send>>) -> Self {
        Self::new(ConsumerErrorKind::Unknown, e)
    }

    /// Returns the kind of error this was
    pub fn kind(&self) -> ConsumerErrorKind {
        self.kind
    }

    /// Returns true if this error only signals that the read deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        self.kind == ConsumerErrorKind::Timeout
    }

    /// Returns the inner error
    pub fn inner(&self) -> &dyn Error {
        self.inner.as_ref()
    }
}

impl Display for ConsumerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConsumerError({:?}): {}", self.kind, self.inner)
    }
}

impl Error for ConsumerError {}

impl From<std::io::Error> for ConsumerError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e)
    }
}

/// An ordered batch of messages from one shard.
pub type ReadBatch<P, M> = Vec<ReadResult<P, M>>;

/// A reader of one shard of an offset-addressable log.
///
/// Implementations are owned by exactly one reader and are never accessed
/// concurrently, hence the `&mut self` receivers.
#[async_trait]
pub trait ShardConsumer: Debug + Send + 'static {
    /// The position type of this shard.
    type Pointer: ShardPointer;

    /// The payload type of this shard.
    type Message: Debug + Send + Sync + 'static;

    /// Read the messages at and after `pointer` (inclusive), in pointer order.
    ///
    /// At most `max_messages` results are returned. If no message can be
    /// produced within `timeout`, an error of kind
    /// [`ConsumerErrorKind::Timeout`] is returned.
    async fn read_next(
        &mut self,
        pointer: &Self::Pointer,
        max_messages: MaxMessages,
        timeout: Duration,
    ) -> Result<ReadBatch<Self::Pointer, Self::Message>, ConsumerError>;

    /// The lowest pointer still retained by the shard.
    async fn earliest_pointer(&mut self) -> Result<Self::Pointer, ConsumerError>;

    /// The current end of the shard: the pointer the next appended message
    /// will be assigned.
    async fn latest_pointer(&mut self) -> Result<Self::Pointer, ConsumerError>;

    /// The shard this consumer reads from.
    fn shard_id(&self) -> ShardId;

    /// Release any resources held by this consumer.
    ///
    /// Reads after a successful close fail with [`ConsumerErrorKind::Closed`].
    async fn close(&mut self) -> Result<(), ConsumerError>;
}
