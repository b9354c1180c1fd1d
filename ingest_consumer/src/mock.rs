//! An in-memory shard, for testing readers without a real log.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt::Debug,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use ingest_types::{MaxMessages, Offset, ReadResult, ShardId, ShardPointer};
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use crate::core::{ConsumerError, ConsumerErrorKind, ReadBatch, ShardConsumer};

#[derive(Debug)]
struct MockShard<M> {
    /// Retained messages, keyed by their offset.
    messages: BTreeMap<Offset, M>,

    /// The lowest offset still retained.
    earliest: Offset,

    /// The offset the next pushed message is assigned.
    next: Offset,

    /// Set once a message was pushed at the last representable offset.
    exhausted: bool,

    /// Errors returned by subsequent reads, in order, before any data.
    errors: VecDeque<ConsumerError>,

    /// Start pointer of every read call observed, across all consumers.
    reads: Vec<Offset>,

    /// Errors returned by subsequent close calls, in order.
    close_errors: VecDeque<ConsumerError>,

    /// Number of close calls on an open consumer, across all consumers.
    close_attempts: usize,

    /// Number of successful close calls, across all consumers.
    close_count: usize,
}

/// Shared state of a mocked shard.
///
/// Cloning yields a handle to the same shard, so a test can keep a
/// [`MockShardState`] to push messages and inspect calls while a
/// [`MockShardConsumer`] built from it is owned by the reader under test.
#[derive(Debug)]
pub struct MockShardState<M> {
    shard_id: ShardId,
    inner: Arc<Mutex<MockShard<M>>>,
    notify: Arc<Notify>,
}

impl<M> Clone for MockShardState<M> {
    fn clone(&self) -> Self {
        Self {
            shard_id: self.shard_id,
            inner: Arc::clone(&self.inner),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl<M> MockShardState<M>
where
    M: Clone + Debug + Send + Sync + 'static,
{
    /// Create an empty shard whose first message will be at offset 0.
    pub fn new(shard_id: ShardId) -> Self {
        Self::starting_at(shard_id, Offset::new(0))
    }

    /// Create an empty shard whose first message will be at `first`.
    pub fn starting_at(shard_id: ShardId, first: Offset) -> Self {
        Self {
            shard_id,
            inner: Arc::new(Mutex::new(MockShard {
                messages: BTreeMap::new(),
                earliest: first,
                next: first,
                exhausted: false,
                errors: VecDeque::new(),
                reads: Vec::new(),
                close_errors: VecDeque::new(),
                close_attempts: 0,
                close_count: 0,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a shard containing `messages` at offsets `0..messages.len()`.
    pub fn with_messages(shard_id: ShardId, messages: impl IntoIterator<Item = M>) -> Self {
        let state = Self::new(shard_id);
        for m in messages {
            state.push(m);
        }
        state
    }

    /// Append a message to the end of the shard, returning its offset.
    ///
    /// # Panics
    ///
    /// Panics if the shard already holds a message at the last offset.
    pub fn push(&self, message: M) -> Offset {
        let offset = {
            let mut guard = self.inner.lock();
            assert!(!guard.exhausted, "mock shard offsets exhausted");

            let offset = guard.next;
            guard.messages.insert(offset, message);
            match offset.successor() {
                Some(next) => guard.next = next,
                None => guard.exhausted = true,
            }
            offset
        };
        self.notify.notify_waiters();
        offset
    }

    /// Make the next read return `error` instead of data.
    ///
    /// Multiple pushed errors are returned by consecutive reads, in order.
    pub fn push_error(&self, error: ConsumerError) {
        self.inner.lock().errors.push_back(error);
        self.notify.notify_waiters();
    }

    /// Make the next close of an open consumer fail with `error`.
    ///
    /// The failed consumer stays open.
    pub fn push_close_error(&self, error: ConsumerError) {
        self.inner.lock().close_errors.push_back(error);
    }

    /// Drop every message before `offset`, as log retention would.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the shard.
    pub fn truncate_before(&self, offset: Offset) {
        let mut guard = self.inner.lock();
        assert!(
            offset <= guard.next,
            "cannot truncate past the end of the shard"
        );
        guard.messages = guard.messages.split_off(&offset);
        guard.earliest = guard.earliest.max(offset);
    }

    /// The start pointer of every read performed against this shard.
    pub fn reads(&self) -> Vec<Offset> {
        self.inner.lock().reads.clone()
    }

    /// How many times closing an open consumer of this shard was attempted,
    /// including attempts that failed.
    pub fn close_attempts(&self) -> usize {
        self.inner.lock().close_attempts
    }

    /// How many times a consumer of this shard was closed.
    pub fn close_count(&self) -> usize {
        self.inner.lock().close_count
    }

    /// Build a consumer reading from this shard.
    pub fn consumer(&self) -> MockShardConsumer<M> {
        MockShardConsumer {
            state: self.clone(),
            closed: false,
        }
    }

    fn try_read(
        &self,
        pointer: &Offset,
        max_messages: MaxMessages,
    ) -> Result<ReadBatch<Offset, M>, ConsumerError> {
        let mut guard = self.inner.lock();

        if let Some(e) = guard.errors.pop_front() {
            return Err(e);
        }

        if *pointer < guard.earliest || *pointer > guard.next {
            return Err(ConsumerError::new(
                ConsumerErrorKind::PointerOutOfRange,
                format!(
                    "offset {pointer} outside of retained range [{}, {}]",
                    guard.earliest, guard.next
                ),
            ));
        }

        let limit = max_messages.limit().unwrap_or(usize::MAX);
        Ok(guard
            .messages
            .range(*pointer..)
            .take(limit)
            .map(|(offset, m)| ReadResult::new(*offset, m.clone()))
            .collect())
    }
}

/// A [`ShardConsumer`] reading from a [`MockShardState`].
#[derive(Debug)]
pub struct MockShardConsumer<M> {
    state: MockShardState<M>,
    closed: bool,
}

#[async_trait]
impl<M> ShardConsumer for MockShardConsumer<M>
where
    M: Clone + Debug + Send + Sync + 'static,
{
    type Pointer = Offset;
    type Message = M;

    async fn read_next(
        &mut self,
        pointer: &Offset,
        max_messages: MaxMessages,
        timeout: Duration,
    ) -> Result<ReadBatch<Offset, M>, ConsumerError> {
        if self.closed {
            return Err(ConsumerError::closed());
        }

        self.state.inner.lock().reads.push(*pointer);
        let deadline = Instant::now() + timeout;

        loop {
            // Register for wake-ups before inspecting the shard so a push
            // racing with this read is never missed.
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.state.try_read(pointer, max_messages)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ConsumerError::timeout(timeout));
            }
        }
    }

    async fn earliest_pointer(&mut self) -> Result<Offset, ConsumerError> {
        if self.closed {
            return Err(ConsumerError::closed());
        }
        Ok(self.state.inner.lock().earliest)
    }

    async fn latest_pointer(&mut self) -> Result<Offset, ConsumerError> {
        if self.closed {
            return Err(ConsumerError::closed());
        }
        Ok(self.state.inner.lock().next)
    }

    fn shard_id(&self) -> ShardId {
        self.state.shard_id
    }

    async fn close(&mut self) -> Result<(), ConsumerError> {
        if self.closed {
            return Ok(());
        }

        let mut guard = self.state.inner.lock();
        guard.close_attempts += 1;
        if let Some(e) = guard.close_errors.pop_front() {
            return Err(e);
        }

        self.closed = true;
        guard.close_count += 1;
        Ok(())
    }
}
