use std::{sync::Arc, time::Duration};

use ingest_consumer::{ConsumerErrorKind, ShardConsumer};
use ingest_types::{PersistedPointers, PollerState, ShardId, ShardPointer};
use iox_time::{SystemProvider, TimeProvider};
use metric::DurationCounter;
use observability_deps::tracing::*;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::{
    PollerConfig, PollerError, metrics::PollerMetrics, processor::MessageProcessor,
    shared::Shared, worker::Worker,
};

/// While paused, the loop wakes up this often to report the pause duration.
const PAUSE_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Counts of what happened to the messages of one poll.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Messages successfully handed to the processor.
    pub processed: usize,

    /// Messages skipped because their pointer was already persisted.
    pub already_persisted: usize,

    /// Messages dropped after the processor failed on them.
    pub dropped: usize,
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.already_persisted == 0 && self.dropped == 0
    }
}

/// A [`StreamPoller`] drives the consumption of a single shard.
///
/// Once [`StreamPoller::start()`] is called, a background task repeatedly
/// reads a batch from the [`ShardConsumer`] starting at the batch start
/// pointer, hands every message whose pointer is not in the
/// [`PersistedPointers`] snapshot to the [`MessageProcessor`] in pointer
/// order, and advances the batch start pointer past the batch.
///
/// [`StreamPoller::pause()`] and [`StreamPoller::close()`] take effect
/// between batches. All observers read lock-free or briefly locked state and
/// never wait for an in-flight read.
#[derive(Debug)]
pub struct StreamPoller<C, R>
where
    C: ShardConsumer,
{
    shared: Arc<Shared<C::Pointer>>,
    worker: Arc<tokio::sync::Mutex<Worker<C, R>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<C, R> StreamPoller<C, R>
where
    C: ShardConsumer,
    R: MessageProcessor<C::Pointer, C::Message>,
{
    /// Initialise a poller for the shard read by `consumer`.
    ///
    /// Reading starts at `start` unless the reset policy in `config` says
    /// otherwise. Messages at pointers in `persisted` are never processed.
    pub fn new(
        start: C::Pointer,
        persisted: PersistedPointers<C::Pointer>,
        consumer: C,
        processor: R,
        config: PollerConfig,
        metrics: &metric::Registry,
    ) -> Self {
        Self::new_with_time_provider(
            start,
            persisted,
            consumer,
            processor,
            config,
            metrics,
            Arc::new(SystemProvider::new()),
        )
    }

    /// Like [`StreamPoller::new()`], measuring pauses with `time_provider`.
    pub fn new_with_time_provider(
        start: C::Pointer,
        persisted: PersistedPointers<C::Pointer>,
        consumer: C,
        processor: R,
        config: PollerConfig,
        metrics: &metric::Registry,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        let shard_id = consumer.shard_id();
        let worker = Worker::new(
            consumer,
            processor,
            Arc::new(persisted),
            config,
            PollerMetrics::new(shard_id, metrics),
        );

        Self {
            shared: Arc::new(Shared::new(shard_id, start, time_provider)),
            worker: Arc::new(tokio::sync::Mutex::new(worker)),
            handle: Mutex::new(None),
        }
    }

    /// Resolve the start pointer and spawn the background poll loop.
    ///
    /// Only valid on a [`PollerState::Created`] poller.
    pub async fn start(&self) -> Result<(), PollerError> {
        check_startable(self.shared.state())?;

        let mut worker = self.worker.lock().await;

        // Re-check now that concurrent start() and close() calls are serialised.
        check_startable(self.shared.state())?;
        if self.shared.is_close_requested() {
            return Err(PollerError::Closed);
        }

        let start = worker
            .resolve_start(self.shared.batch_start_pointer())
            .await?;
        self.shared.set_batch_start_pointer(start.clone());

        if !self
            .shared
            .transition(PollerState::Created, PollerState::Polling)
        {
            return Err(PollerError::Closed);
        }

        let pause_duration = worker.metrics().pause_duration.clone();
        info!(
            shard_id=%self.shared.shard_id(),
            batch_start=%start,
            reset_policy=%worker.config().reset_policy,
            max_messages=%worker.config().max_messages,
            "starting stream poller"
        );
        drop(worker);

        let handle = tokio::spawn(run(
            Arc::clone(&self.shared),
            Arc::clone(&self.worker),
            pause_duration,
        ));
        *self.handle.lock() = Some(handle);

        Ok(())
    }

    /// Perform one read-and-process iteration on the calling task.
    ///
    /// A read that times out yields an empty [`PollOutcome`]. This call
    /// waits for any iteration the background loop has in flight.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollerError> {
        check_pollable(self.shared.state())?;

        let mut worker = self.worker.lock().await;
        check_pollable(self.shared.state())?;

        worker
            .poll_once(&self.shared, None)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Request that polling pauses once the current batch is done.
    pub fn pause(&self) {
        if self.shared.state().is_terminal() || self.shared.is_pause_requested() {
            return;
        }
        debug!(shard_id=%self.shared.shard_id(), "pause requested");
        self.shared.request_pause();
    }

    /// Lift a pause, continuing from the batch start pointer.
    pub fn resume(&self) {
        if !self.shared.is_pause_requested() {
            return;
        }
        debug!(shard_id=%self.shared.shard_id(), "resume requested");
        self.shared.request_resume();
    }

    /// Stop polling, release the consumer and move to [`PollerState::Closed`].
    ///
    /// A batch already being processed is completed first; a pending read is
    /// abandoned. The consumer is released once, however many times this is
    /// called, and even if releasing it fails.
    pub async fn close(&self) {
        if self.shared.request_close() {
            info!(shard_id=%self.shared.shard_id(), "closing stream poller");
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(
                    error=%e,
                    shard_id=%self.shared.shard_id(),
                    "stream poller task failed"
                );
            }
        }

        // The loop releases the consumer on exit, but it may never have run.
        self.worker.lock().await.release().await;
        self.shared.mark_closed();
    }

    pub fn state(&self) -> PollerState {
        self.shared.state()
    }

    /// Returns true if a pause was requested and not yet lifted.
    pub fn is_paused(&self) -> bool {
        self.shared.is_pause_requested()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().is_terminal()
    }

    /// The pointer the next read starts at (inclusive).
    pub fn batch_start_pointer(&self) -> C::Pointer {
        self.shared.batch_start_pointer()
    }

    /// The greatest pointer read so far that was already persisted.
    pub fn max_persisted_pointer(&self) -> Option<C::Pointer> {
        self.shared.max_persisted_pointer()
    }

    pub fn shard_id(&self) -> ShardId {
        self.shared.shard_id()
    }

    /// The error that halted the background loop, if any.
    pub fn failure(&self) -> Option<Arc<PollerError>> {
        self.shared.failure()
    }

    /// Resolves once the poller has been asked to stop, either by
    /// [`StreamPoller::close()`] or by the background loop halting.
    ///
    /// Call [`StreamPoller::close()`] afterwards to wait for the consumer to
    /// be released.
    pub async fn wait_for_stop(&self) {
        self.shared.shutdown().cancelled().await
    }
}

impl<C, R> Drop for StreamPoller<C, R>
where
    C: ShardConsumer,
{
    fn drop(&mut self) {
        // Stop the loop, which releases the consumer on its way out.
        self.shared.shutdown().cancel();
    }
}

fn check_startable(state: PollerState) -> Result<(), PollerError> {
    match state {
        PollerState::Created => Ok(()),
        PollerState::Closed => Err(PollerError::Closed),
        PollerState::Polling | PollerState::Paused => Err(PollerError::AlreadyStarted),
    }
}

fn check_pollable(state: PollerState) -> Result<(), PollerError> {
    match state {
        PollerState::Created => Err(PollerError::NotStarted),
        PollerState::Closed => Err(PollerError::Closed),
        PollerState::Polling | PollerState::Paused => Ok(()),
    }
}

/// The background poll loop, running until the poller is closed or halted.
async fn run<C, R>(
    shared: Arc<Shared<C::Pointer>>,
    worker: Arc<tokio::sync::Mutex<Worker<C, R>>>,
    pause_duration: DurationCounter,
) where
    C: ShardConsumer,
    R: MessageProcessor<C::Pointer, C::Message>,
{
    let shard_id = shared.shard_id();

    loop {
        if shared.shutdown().is_cancelled() {
            break;
        }

        if shared.is_pause_requested() {
            wait_while_paused(&shared, &pause_duration).await;
            continue;
        }

        let mut guard = worker.lock().await;
        let res = guard.poll_once(&shared, Some(shared.shutdown())).await;
        match res {
            Ok(Some(outcome)) => {
                if !outcome.is_empty() {
                    debug!(
                        shard_id=%shard_id,
                        processed=outcome.processed,
                        already_persisted=outcome.already_persisted,
                        dropped=outcome.dropped,
                        batch_start=%shared.batch_start_pointer(),
                        "polled shard"
                    );
                }
            }
            Ok(None) => break,
            Err(e)
                if e.consumer_error()
                    .is_some_and(|c| c.kind() == ConsumerErrorKind::Closed) =>
            {
                warn!(
                    error=%e,
                    shard_id=%shard_id,
                    "shard consumer closed underneath the poller - stopping"
                );
                shared.request_close();
                break;
            }
            Err(e @ PollerError::Consumer { .. }) => {
                let backoff = guard.config().consumer_error_backoff;
                drop(guard);

                warn!(
                    error=%e,
                    shard_id=%shard_id,
                    backoff=?backoff,
                    "error reading from shard - retrying"
                );
                tokio::select! {
                    _ = shared.shutdown().cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {},
                }
            }
            Err(e) => {
                error!(
                    error=%e,
                    shard_id=%shard_id,
                    batch_start=%shared.batch_start_pointer(),
                    "stream poller halted"
                );
                shared.halt(e);
                break;
            }
        }
    }

    worker.lock().await.release().await;
    shared.mark_closed();

    info!(
        shard_id=%shard_id,
        batch_start=%shared.batch_start_pointer(),
        "stream poller stopped"
    );
}

/// Block until the pause is lifted or the poller is closed.
async fn wait_while_paused<P>(shared: &Shared<P>, pause_duration: &DurationCounter)
where
    P: ShardPointer,
{
    // Taken before the paused state is observable.
    let started_at = shared.time_provider().now();
    if !shared.transition(PollerState::Polling, PollerState::Paused) {
        return;
    }

    info!(shard_id=%shared.shard_id(), "pausing ingest");

    let mut reported_at = started_at;
    loop {
        let notified = shared.resume_notify().notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !shared.is_pause_requested() || shared.shutdown().is_cancelled() {
            break;
        }

        tokio::select! {
            _ = notified => {},
            _ = shared.shutdown().cancelled() => {},
            _ = tokio::time::sleep(PAUSE_REPORT_INTERVAL) => {},
        }

        // Incrementally report so a long pause is visible before it ends.
        let now = shared.time_provider().now();
        if let Some(delta) = now.checked_duration_since(reported_at) {
            pause_duration.inc(delta);
        }
        reported_at = now;
    }

    if shared.shutdown().is_cancelled() {
        return;
    }
    shared.transition(PollerState::Paused, PollerState::Polling);

    let duration_str = shared
        .time_provider()
        .now()
        .checked_duration_since(started_at)
        .map(|v| format!("{}ms", v.as_millis()))
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        shard_id=%shared.shard_id(),
        pause_duration=%duration_str,
        "resuming ingest"
    );
}
