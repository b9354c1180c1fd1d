//! State shared between a poller handle and its background loop.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, Ordering},
};

use ingest_types::{PollerState, ShardId, ShardPointer};
use iox_time::TimeProvider;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::PollerError;

/// Signals and observable cursors of one poller.
///
/// Every lock in here guards a single value and is never held across an
/// `.await`, so observers are never blocked behind an in-flight read.
#[derive(Debug)]
pub(crate) struct Shared<P> {
    shard_id: ShardId,
    state: AtomicU8,

    pause_requested: AtomicBool,
    close_requested: AtomicBool,

    /// Cancelled once the poller is asked to stop, by a close or a halt.
    shutdown: CancellationToken,

    /// Woken when a pause is lifted.
    resume: Notify,

    batch_start: Mutex<P>,
    max_persisted: Mutex<Option<P>>,
    failure: Mutex<Option<Arc<PollerError>>>,

    time_provider: Arc<dyn TimeProvider>,
}

impl<P> Shared<P>
where
    P: ShardPointer,
{
    pub(crate) fn new(shard_id: ShardId, start: P, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            shard_id,
            state: AtomicU8::new(PollerState::Created.as_u8()),
            pause_requested: AtomicBool::new(false),
            close_requested: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            resume: Notify::new(),
            batch_start: Mutex::new(start),
            max_persisted: Mutex::new(None),
            failure: Mutex::new(None),
            time_provider,
        }
    }

    pub(crate) fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub(crate) fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, returning false if the state was not `from`.
    pub(crate) fn transition(&self, from: PollerState, to: PollerState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(PollerState::Closed.as_u8(), Ordering::Release);
    }

    pub(crate) fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::Acquire)
    }

    pub(crate) fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::Release);
    }

    pub(crate) fn request_resume(&self) {
        self.pause_requested.store(false, Ordering::Release);
        self.resume.notify_waiters();
    }

    /// Ask the poller to stop, returning true for the first caller only.
    pub(crate) fn request_close(&self) -> bool {
        let first = !self.close_requested.swap(true, Ordering::AcqRel);
        self.shutdown.cancel();
        first
    }

    pub(crate) fn is_close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn resume_notify(&self) -> &Notify {
        &self.resume
    }

    pub(crate) fn batch_start_pointer(&self) -> P {
        self.batch_start.lock().clone()
    }

    pub(crate) fn set_batch_start_pointer(&self, pointer: P) {
        *self.batch_start.lock() = pointer;
    }

    pub(crate) fn max_persisted_pointer(&self) -> Option<P> {
        self.max_persisted.lock().clone()
    }

    /// Raise the max persisted pointer to `pointer`. It never decreases.
    pub(crate) fn observe_persisted(&self, pointer: &P) {
        let mut guard = self.max_persisted.lock();
        if guard.as_ref().is_none_or(|max| pointer > max) {
            *guard = Some(pointer.clone());
        }
    }

    pub(crate) fn failure(&self) -> Option<Arc<PollerError>> {
        self.failure.lock().clone()
    }

    /// Record the error that stopped the poller and ask it to stop.
    pub(crate) fn halt(&self, error: PollerError) {
        *self.failure.lock() = Some(Arc::new(error));
        self.request_close();
    }

    pub(crate) fn time_provider(&self) -> &dyn TimeProvider {
        self.time_provider.as_ref()
    }
}
