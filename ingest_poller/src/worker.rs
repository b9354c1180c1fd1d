//! The single owner of a shard's consumer and processor.

use std::sync::Arc;

use ingest_consumer::ShardConsumer;
use ingest_types::{PersistedPointers, ResetPolicy, ShardId, ShardPointer};
use observability_deps::tracing::*;
use tokio_util::sync::CancellationToken;

use crate::{
    PollOutcome, PollerConfig, PollerError, ProcessingErrorPolicy, metrics::PollerMetrics,
    processor::MessageProcessor, shared::Shared,
};

/// What became of one message handed to the processor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Disposition {
    Processed,

    /// The processor failed and the error policy dropped the message.
    Dropped,
}

#[derive(Debug)]
pub(crate) struct Worker<C, R>
where
    C: ShardConsumer,
{
    consumer: C,
    processor: R,
    persisted: Arc<PersistedPointers<C::Pointer>>,
    config: PollerConfig,
    metrics: PollerMetrics,

    /// Set once the consumer has been closed, so it is closed only once.
    released: bool,
}

impl<C, R> Worker<C, R>
where
    C: ShardConsumer,
    R: MessageProcessor<C::Pointer, C::Message>,
{
    pub(crate) fn new(
        consumer: C,
        processor: R,
        persisted: Arc<PersistedPointers<C::Pointer>>,
        config: PollerConfig,
        metrics: PollerMetrics,
    ) -> Self {
        Self {
            consumer,
            processor,
            persisted,
            config,
            metrics,
            released: false,
        }
    }

    pub(crate) fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &PollerMetrics {
        &self.metrics
    }

    /// Pick the first pointer to read according to the configured
    /// [`ResetPolicy`], given the caller-supplied `supplied` pointer.
    pub(crate) async fn resolve_start(
        &mut self,
        supplied: C::Pointer,
    ) -> Result<C::Pointer, PollerError> {
        let policy = self.config.reset_policy;
        let shard_id = self.consumer.shard_id();

        let res = match policy {
            ResetPolicy::None => return Ok(supplied),
            ResetPolicy::Earliest => self.consumer.earliest_pointer().await,
            ResetPolicy::Latest => self.consumer.latest_pointer().await,
        };

        let pointer = res.map_err(|source| PollerError::ResolveStart {
            policy,
            shard_id,
            source,
        })?;

        info!(
            shard_id=%shard_id,
            reset_policy=%policy,
            supplied_pointer=%supplied,
            %pointer,
            "reset shard start pointer"
        );

        Ok(pointer)
    }

    /// Read one batch starting at the batch start pointer of `shared` and
    /// hand every message not already persisted to the processor.
    ///
    /// If `shutdown` is provided, the read is abandoned once it is cancelled
    /// and `None` is returned. A batch that was read is always processed to
    /// completion.
    pub(crate) async fn poll_once(
        &mut self,
        shared: &Shared<C::Pointer>,
        shutdown: Option<&CancellationToken>,
    ) -> Result<Option<PollOutcome>, PollerError> {
        let shard_id = self.consumer.shard_id();
        let start = shared.batch_start_pointer();

        let read = self.consumer.read_next(
            &start,
            self.config.max_messages,
            self.config.read_timeout,
        );
        let res = match shutdown {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(None),
                res = read => res,
            },
            None => read.await,
        };

        let batch = match res {
            Ok(batch) => batch,
            Err(e) if e.is_timeout() => {
                trace!(shard_id=%shard_id, pointer=%start, "no messages available in shard");
                self.metrics.read_timeouts.inc(1);
                return Ok(Some(PollOutcome::default()));
            }
            Err(e) => {
                self.metrics.record_consumer_error(e.kind());
                return Err(PollerError::Consumer {
                    shard_id,
                    pointer: start.to_string(),
                    source: e,
                });
            }
        };

        trace!(
            shard_id=%shard_id,
            pointer=%start,
            batch_size=batch.len(),
            "read batch from shard"
        );

        let mut outcome = PollOutcome::default();
        let mut last: Option<C::Pointer> = None;

        for result in batch {
            let (pointer, message) = result.into_parts();

            // Pointers must strictly increase from the start pointer.
            let in_order = match &last {
                Some(prev) => pointer > *prev,
                None => pointer >= start,
            };
            if !in_order {
                warn!(
                    shard_id=%shard_id,
                    %pointer,
                    batch_start=%start,
                    "ignoring out of order message read from shard"
                );
                continue;
            }

            if self.persisted.contains(&pointer) {
                trace!(
                    shard_id=%shard_id,
                    %pointer,
                    "skipping message (already persisted previously)"
                );
                shared.observe_persisted(&pointer);
                self.metrics.already_persisted.inc(1);
                outcome.already_persisted += 1;
            } else {
                match self.process(shard_id, &pointer, &message).await {
                    Ok(Disposition::Processed) => outcome.processed += 1,
                    Ok(Disposition::Dropped) => outcome.dropped += 1,
                    Err(e) => {
                        // Resume from the failed message.
                        shared.set_batch_start_pointer(pointer);
                        return Err(e);
                    }
                }
            }

            last = Some(pointer);
        }

        if let Some(last) = last {
            let Some(next) = last.successor() else {
                shared.set_batch_start_pointer(last.clone());
                return Err(PollerError::EndOfShard {
                    shard_id,
                    pointer: last.to_string(),
                });
            };
            shared.set_batch_start_pointer(next);
        }

        Ok(Some(outcome))
    }

    async fn process(
        &mut self,
        shard_id: ShardId,
        pointer: &C::Pointer,
        message: &C::Message,
    ) -> Result<Disposition, PollerError> {
        let mut attempt = 0;

        loop {
            let err = match self.processor.process(pointer, message).await {
                Ok(()) => {
                    trace!(shard_id=%shard_id, %pointer, "processed message");
                    self.metrics.processed.inc(1);
                    return Ok(Disposition::Processed);
                }
                Err(e) => e,
            };
            self.metrics.failed.inc(1);

            match self.config.error_policy {
                ProcessingErrorPolicy::Skip => {
                    error!(
                        error=%err,
                        shard_id=%shard_id,
                        %pointer,
                        potential_data_loss=true,
                        "failed to process message - skipping it"
                    );
                    return Ok(Disposition::Dropped);
                }
                ProcessingErrorPolicy::Retry {
                    max_retries,
                    backoff,
                } if attempt < max_retries => {
                    attempt += 1;
                    warn!(
                        error=%err,
                        shard_id=%shard_id,
                        %pointer,
                        attempt,
                        max_retries,
                        "failed to process message - retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                ProcessingErrorPolicy::Halt | ProcessingErrorPolicy::Retry { .. } => {
                    error!(
                        error=%err,
                        shard_id=%shard_id,
                        %pointer,
                        attempts=attempt + 1,
                        "failed to process message - halting shard ingest"
                    );
                    return Err(PollerError::Processing {
                        shard_id,
                        pointer: pointer.to_string(),
                        source: Box::new(err),
                    });
                }
            }
        }
    }

    /// Close the consumer, once. Failures are logged and otherwise ignored.
    pub(crate) async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let shard_id = self.consumer.shard_id();
        match self.consumer.close().await {
            Ok(()) => debug!(shard_id=%shard_id, "released shard consumer"),
            Err(e) => warn!(error=%e, shard_id=%shard_id, "failed to release shard consumer"),
        }
    }
}
